//! Client and server endpoints. They own the connections and the state per remote peer that
//!  outlives a connection, and run a [crate::channel::peer_channel::PeerChannel] for each live
//!  connection.

pub mod backoff;
pub mod client;
pub mod hello;
pub mod server;
