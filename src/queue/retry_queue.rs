use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::bail;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace};

use crate::backlog::Backlog;
use crate::call::call::Call;
use crate::call::peer_info::PeerId;


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Admission {
    Accepted,
    /// the queue is at capacity, the call was not enqueued
    Overflow,
}


/// The authoritative order of pending calls for one target peer. Retryable calls are mirrored
///  into a [Backlog] if there is one, so they survive a restart.
///
/// All operations are serialized by a single lock for the queue, which is held across backlog
///  I/O. In-memory state and backlog may disagree transiently inside an operation, but never
///  once the lock is released.
///
/// Calls stay at the head of the queue while they are in flight: they are removed only once they
///  reached a terminal outcome.
pub struct RetryQueue {
    target: PeerId,
    max_len: usize,
    backlog: Option<Arc<dyn Backlog>>,
    calls: Mutex<VecDeque<Call>>,
}

impl RetryQueue {
    /// Creates a queue for a target peer. If there is a backlog, the queue is seeded with the
    ///  backlog's calls for the target, oldest first, before any new call is accepted. Seeded
    ///  calls start fresh, without start time or result.
    pub async fn create(target: PeerId, backlog: Option<Arc<dyn Backlog>>, max_len: usize) -> anyhow::Result<RetryQueue> {
        let mut calls = VecDeque::new();
        if let Some(backlog) = &backlog {
            for mut call in backlog.read_all(&target).await? {
                call.reset();
                calls.push_back(call);
            }
            if !calls.is_empty() {
                info!("restored {} pending calls to {:?} from backlog", calls.len(), target);
            }
        }

        Ok(RetryQueue {
            target,
            max_len,
            backlog,
            calls: Mutex::new(calls),
        })
    }

    pub fn target(&self) -> &PeerId {
        &self.target
    }

    pub async fn len(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.calls.lock().await.is_empty()
    }

    pub async fn peek(&self) -> Option<Call> {
        self.calls.lock().await
            .front()
            .cloned()
    }

    /// Appends a call. Fails if the call is addressed to a different peer than this queue's.
    pub async fn enqueue(&self, call: Call) -> anyhow::Result<Admission> {
        if call.target() != &self.target {
            bail!("call #{} for {:?} was enqueued in the queue for {:?}", call.method_id(), call.target(), self.target);
        }

        let mut calls = self.calls.lock().await;
        if calls.len() >= self.max_len {
            debug!("queue for {:?} is full ({} calls) - rejecting call #{}", self.target, calls.len(), call.method_id());
            return Ok(Admission::Overflow);
        }

        if call.is_retryable() {
            if let Some(backlog) = &self.backlog {
                backlog.enqueue(&call).await?;
            }
        }

        trace!("enqueued call #{} {:?} for {:?}", call.method_id(), call.method_name(), self.target);
        calls.push_back(call);
        Ok(Admission::Accepted)
    }

    /// Removes and returns the head of the queue
    pub async fn dequeue(&self) -> anyhow::Result<Option<Call>> {
        let mut calls = self.calls.lock().await;
        let Some(call) = calls.pop_front() else {
            return Ok(None);
        };

        if let Err(e) = self.remove_from_backlog(&call).await {
            calls.push_front(call);
            return Err(e);
        }
        Ok(Some(call))
    }

    /// Removes the head of the queue if it is the call with the given id. This guards against
    ///  removing the wrong call if the head changed since it was peeked.
    pub async fn dequeue_if_head(&self, method_id: u64) -> anyhow::Result<Option<Call>> {
        let mut calls = self.calls.lock().await;
        match calls.front() {
            Some(head) if head.method_id() == method_id => {}
            Some(head) => {
                error!("expected call #{} at the head of the queue for {:?}, found #{}", method_id, self.target, head.method_id());
                return Ok(None);
            }
            None => return Ok(None),
        }

        let Some(call) = calls.pop_front() else {
            return Ok(None);
        };
        if let Err(e) = self.remove_from_backlog(&call).await {
            calls.push_front(call);
            return Err(e);
        }
        Ok(Some(call))
    }

    async fn remove_from_backlog(&self, call: &Call) -> anyhow::Result<()> {
        if !call.is_retryable() {
            return Ok(());
        }
        if let Some(backlog) = &self.backlog {
            // the backlog may not have the call any more if it was superseded by a more recent
            //  RetryLatest call
            backlog.remove(&self.target, call.method_id()).await?;
        }
        Ok(())
    }

    /// method ids of all queued calls, head first
    pub async fn method_ids(&self) -> Vec<u64> {
        self.calls.lock().await
            .iter()
            .map(|c| c.method_id())
            .collect()
    }
}
