use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;

use crate::call::call::Call;
use crate::call::rpc_result::RpcResult;


/// Notified whenever a call reaches its terminal outcome and is removed from its queue - whether
///  or not the code that issued the call is still waiting for it. This is the way to learn about
///  the outcome of retried calls after `run()` gave up waiting for them.
pub trait OutcomeListener: Send + Sync + 'static {
    fn on_outcome(&self, call: &Call, result: &RpcResult);
}

pub struct ChannelConfig {
    /// timeout for calls that do not specify their own
    pub default_timeout: Duration,
    /// The send loop waits at most this long when there is nothing to do. It is woken up
    ///  explicitly for new calls and results, so this is only a safety net.
    pub idle_wait: Duration,
    /// minimum delay before a call is resent after a retryable failure
    pub retry_delay: Duration,
    /// maximum number of calls pending per target peer
    pub max_queue_len: usize,
    /// number of results of executed calls that are kept for answering duplicate calls
    pub executed_cache_size: usize,
    pub outcome_listener: Option<Arc<dyn OutcomeListener>>,
}

impl Debug for ChannelConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("default_timeout", &self.default_timeout)
            .field("idle_wait", &self.idle_wait)
            .field("retry_delay", &self.retry_delay)
            .field("max_queue_len", &self.max_queue_len)
            .field("executed_cache_size", &self.executed_cache_size)
            .field("outcome_listener", &self.outcome_listener.is_some())
            .finish()
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig::new()
    }
}

impl ChannelConfig {
    pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24*60*60);

    pub fn new() -> ChannelConfig {
        ChannelConfig {
            default_timeout: Duration::from_secs(30),
            idle_wait: Duration::from_millis(50),
            retry_delay: Duration::from_millis(100),
            max_queue_len: 10_000,
            executed_cache_size: 1_000,
            outcome_listener: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_timeout.is_zero() {
            bail!("default timeout must be positive");
        }
        if self.idle_wait.is_zero() {
            bail!("idle wait must be positive");
        }
        if self.retry_delay > Self::MAX_RETRY_DELAY {
            bail!("retry delay must be at most {:?}", Self::MAX_RETRY_DELAY);
        }
        if self.max_queue_len == 0 {
            bail!("queue length must be positive");
        }
        if self.executed_cache_size == 0 {
            bail!("executed call cache size must be positive");
        }
        Ok(())
    }
}
