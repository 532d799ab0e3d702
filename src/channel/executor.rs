use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;

use crate::call::method_invocation::MethodInvocation;
use crate::call::peer_info::PeerInfo;


/// Application code that executes incoming method invocations. An `Err` is reported to the
///  calling peer as a `RemoteException` failure carrying the error's message, and the call is
///  not retried.
///
/// Executions run on their own task, so a slow executor does not hold up the channel.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MethodExecutor: Send + Sync + 'static {
    async fn execute(&self, invocation: &MethodInvocation, calling_peer: &PeerInfo) -> anyhow::Result<Bytes>;
}


/// Adapts a plain function or closure to a [MethodExecutor]
pub struct FnExecutor<F> {
    f: F,
}

impl <F> FnExecutor<F>
where F: Fn(&MethodInvocation, &PeerInfo) -> anyhow::Result<Bytes> + Send + Sync + 'static
{
    pub fn new(f: F) -> FnExecutor<F> {
        FnExecutor { f }
    }
}

#[async_trait]
impl <F> MethodExecutor for FnExecutor<F>
where F: Fn(&MethodInvocation, &PeerInfo) -> anyhow::Result<Bytes> + Send + Sync + 'static
{
    async fn execute(&self, invocation: &MethodInvocation, calling_peer: &PeerInfo) -> anyhow::Result<Bytes> {
        (self.f)(invocation, calling_peer)
    }
}
