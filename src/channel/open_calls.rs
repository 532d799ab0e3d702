use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::trace;

use crate::call::rpc_result::RpcResult;


/// Local callers waiting for the outcome of their calls, by method id. The lock is never held
///  across an await point.
#[derive(Default)]
pub struct OpenCalls {
    waiters: Mutex<FxHashMap<u64, oneshot::Sender<RpcResult>>>,
}

impl OpenCalls {
    pub fn new() -> OpenCalls {
        Default::default()
    }

    /// Registers a waiter for a method id, replacing a previous waiter for the same id
    pub fn register(&self, method_id: u64) -> oneshot::Receiver<RpcResult> {
        let (send, recv) = oneshot::channel();
        if self.lock().insert(method_id, send).is_some() {
            trace!("replaced waiter for call #{}", method_id);
        }
        recv
    }

    /// Hands a result to the waiter for its method id. Returns `false` if nobody is waiting
    ///  any more.
    pub fn complete(&self, result: RpcResult) -> bool {
        let Some(waiter) = self.lock().remove(&result.method_id) else {
            return false;
        };
        waiter.send(result).is_ok()
    }

    pub fn remove(&self, method_id: u64) {
        self.lock().remove(&method_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<u64, oneshot::Sender<RpcResult>>> {
        // the map stays consistent even if a thread panicked while holding the lock
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
