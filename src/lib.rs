pub mod backlog;
pub mod call;
pub mod channel;
pub mod peer;
pub mod queue;
pub mod util;
pub mod wire;
pub mod test_util;
