//! The value types of a remote call: what is invoked ([method_invocation::MethodInvocation]), how
//!  the caller wants it handled ([call::Call], [retry_strategy::RetryStrategy]), and how it
//!  ended ([rpc_result::RpcResult]). There is no I/O in here.

pub mod call;
pub mod method_invocation;
pub mod peer_info;
pub mod retry_strategy;
pub mod rpc_result;
