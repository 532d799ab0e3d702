use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::backlog::Backlog;
use crate::call::call::Call;
use crate::call::peer_info::PeerId;
use crate::call::rpc_result::{FailureKind, RpcResult};
use crate::channel::config::ChannelConfig;
use crate::channel::open_calls::OpenCalls;
use crate::queue::retry_queue::{Admission, RetryQueue};


/// Everything on the calling side for one target peer that must survive a reconnect: the queue of
///  pending calls, the callers waiting for them, and the signal that wakes up the send loop of
///  whichever channel currently serves the target.
pub struct Outbox {
    queue: RetryQueue,
    open_calls: OpenCalls,
    wake: Notify,
    config: Arc<ChannelConfig>,
}

impl Outbox {
    pub async fn create(target: PeerId, backlog: Option<Arc<dyn Backlog>>, config: Arc<ChannelConfig>) -> anyhow::Result<Outbox> {
        config.validate()?;
        let queue = RetryQueue::create(target, backlog, config.max_queue_len).await?;
        Ok(Outbox {
            queue,
            open_calls: OpenCalls::new(),
            wake: Notify::new(),
            config,
        })
    }

    pub fn target(&self) -> &PeerId {
        self.queue.target()
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    pub fn open_calls(&self) -> &OpenCalls {
        &self.open_calls
    }

    pub fn config(&self) -> &Arc<ChannelConfig> {
        &self.config
    }

    /// Wakes up the send loop. If it is not waiting right now, it will not wait the next time.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub async fn woken(&self) {
        self.wake.notified().await
    }

    /// Enqueues a call and waits for its first terminal outcome, or for the call's timeout to
    ///  expire. This never fails: problems are reported as a failed [RpcResult].
    ///
    /// If this returns because of the timeout, the call stays queued and is processed (and
    ///  possibly retried) regardless. Its eventual outcome is reported to the configured
    ///  outcome listener.
    pub async fn run(&self, call: Call) -> RpcResult {
        let method_id = call.method_id();
        let timeout = call.effective_timeout(self.config.default_timeout);

        let completion = self.open_calls.register(method_id);
        let result = match self.queue.enqueue(call).await {
            Ok(Admission::Accepted) => {
                self.wake();
                match tokio::time::timeout(timeout, completion).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => RpcResult::failure(method_id, FailureKind::Other, "call was abandoned"),
                    Err(_) => {
                        debug!("call #{} to {:?} timed out after {:?}", method_id, self.target(), timeout);
                        RpcResult::failure(method_id, FailureKind::Timeout, format!("no result after {:?}", timeout))
                    }
                }
            }
            Ok(Admission::Overflow) => {
                RpcResult::failure(method_id, FailureKind::QueueOverflow, format!("queue for {:?} is full", self.target()))
            }
            Err(e) => {
                warn!("error enqueueing call #{} to {:?}: {:#}", method_id, self.target(), e);
                RpcResult::failure(method_id, FailureKind::Other, format!("{:#}", e))
            }
        };

        self.open_calls.remove(method_id);
        result
    }
}
