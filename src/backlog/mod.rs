//! A backlog is the durable record of retryable calls that were not delivered yet, so they
//!  survive a process restart. It is independent of any particular channel: a call that was
//!  persisted while talking to a peer is delivered by whichever channel is next bound to that
//!  peer.
//!
//! Calls are kept per target peer, oldest first. Since method ids are ordered by creation time,
//!  'oldest' is the call with the smallest method id.
//!
//! Backlog implementations must allow concurrent access for *different* target peers. Operations
//!  on the same target peer are serialized by the owning [crate::queue::retry_queue::RetryQueue].

pub mod file_backlog;
pub mod memory_backlog;

use async_trait::async_trait;

use crate::call::call::Call;
use crate::call::peer_info::PeerId;

#[async_trait]
pub trait Backlog: Send + Sync + 'static {
    /// the oldest call for a target, without removing it
    async fn try_peek(&self, target: &PeerId) -> anyhow::Result<Option<Call>>;

    /// the oldest call for a target, removing it
    async fn try_dequeue(&self, target: &PeerId) -> anyhow::Result<Option<Call>>;

    /// Appends a call for its target. If the call's strategy is
    ///  [crate::call::retry_strategy::RetryStrategy::RetryLatest], all existing calls for the same
    ///  target with the same method name are removed first.
    async fn enqueue(&self, call: &Call) -> anyhow::Result<()>;

    /// removes a specific call, returning `false` if there was no call with that id
    async fn remove(&self, target: &PeerId, method_id: u64) -> anyhow::Result<bool>;

    /// removes all calls for a target with a given method name, returning the number of removed
    ///  calls
    async fn remove_by_name(&self, target: &PeerId, method_name: &str) -> anyhow::Result<usize>;

    /// all calls for a target, oldest first
    async fn read_all(&self, target: &PeerId) -> anyhow::Result<Vec<Call>>;
}
