//! The engine that moves calls and results over one connection to one remote peer.
//!
//! A [peer_channel::PeerChannel] is bound to a single [connection::DuplexConnection]. Everything
//!  that must outlive a connection (pending calls, waiting callers, results of executed calls)
//!  lives in an [outbox::Outbox] and an [executed_calls::ExecutedCalls] cache that are owned by
//!  whoever creates the channels.

pub mod config;
pub mod connection;
pub mod executed_calls;
pub mod executor;
pub mod open_calls;
pub mod outbox;
pub mod peer_channel;
pub mod tcp_connection;
