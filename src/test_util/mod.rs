//! This module contains utilities that are useful for testing code based on RPC channels. They
//!  are used for testing the crate itself, and they are also exported for application testing.

pub mod calculator;
pub mod channel;
pub mod outcome;
