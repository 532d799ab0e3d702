use std::collections::BTreeMap;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::trace;

use crate::backlog::Backlog;
use crate::call::call::Call;
use crate::call::peer_info::PeerId;


/// Keeps calls in memory, i.e. for the lifetime of the process. This is useful for keeping calls
///  across reconnects, and for testing.
#[derive(Default)]
pub struct MemoryBacklog {
    calls: RwLock<FxHashMap<PeerId, BTreeMap<u64, Call>>>,
}

impl MemoryBacklog {
    pub fn new() -> MemoryBacklog {
        Default::default()
    }
}

#[async_trait]
impl Backlog for MemoryBacklog {
    async fn try_peek(&self, target: &PeerId) -> anyhow::Result<Option<Call>> {
        Ok(self.calls.read().await
            .get(target)
            .and_then(|calls| calls.first_key_value())
            .map(|(_, call)| call.clone()))
    }

    async fn try_dequeue(&self, target: &PeerId) -> anyhow::Result<Option<Call>> {
        Ok(self.calls.write().await
            .get_mut(target)
            .and_then(|calls| calls.pop_first())
            .map(|(_, call)| call))
    }

    async fn enqueue(&self, call: &Call) -> anyhow::Result<()> {
        let mut all_calls = self.calls.write().await;
        let calls = all_calls.entry(call.target().clone())
            .or_default();

        if call.is_retry_latest() {
            let before = calls.len();
            calls.retain(|_, c| c.method_name() != call.method_name());
            trace!("superseded {} calls to {:?} for {:?}", before - calls.len(), call.method_name(), call.target());
        }

        calls.insert(call.method_id(), call.clone());
        Ok(())
    }

    async fn remove(&self, target: &PeerId, method_id: u64) -> anyhow::Result<bool> {
        Ok(self.calls.write().await
            .get_mut(target)
            .map(|calls| calls.remove(&method_id).is_some())
            .unwrap_or(false))
    }

    async fn remove_by_name(&self, target: &PeerId, method_name: &str) -> anyhow::Result<usize> {
        let mut all_calls = self.calls.write().await;
        let Some(calls) = all_calls.get_mut(target) else {
            return Ok(0);
        };

        let before = calls.len();
        calls.retain(|_, c| c.method_name() != method_name);
        Ok(before - calls.len())
    }

    async fn read_all(&self, target: &PeerId) -> anyhow::Result<Vec<Call>> {
        Ok(self.calls.read().await
            .get(target)
            .map(|calls| calls.values().cloned().collect())
            .unwrap_or_default())
    }
}
