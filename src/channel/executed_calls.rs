use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::call::rpc_result::RpcResult;


/// What to do with an incoming method invocation
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Disposition {
    /// first time this call arrives: execute it
    Execute,
    /// the call is being executed right now, its result will be sent once it is available
    InProgress,
    /// the call was executed before, answer with the original result
    Cached(RpcResult),
    /// the call is older than all remembered results, so we cannot tell if it was executed
    Obsolete,
}


/// Remembers which calls from one remote peer were executed, so a retransmitted call is executed
///  at most once. Results are kept for the `capacity` most recent method ids; anything up to the
///  highest evicted id is considered obsolete.
///
/// This relies on method ids being monotonic per caller.
pub struct ExecutedCalls {
    capacity: usize,
    state: Mutex<ExecutedCallsState>,
}

#[derive(Default)]
struct ExecutedCallsState {
    in_progress: FxHashSet<u64>,
    results: BTreeMap<u64, RpcResult>,
    evicted_up_to: Option<u64>,
}

impl ExecutedCalls {
    pub fn new(capacity: usize) -> ExecutedCalls {
        ExecutedCalls {
            capacity: capacity.max(1),
            state: Default::default(),
        }
    }

    /// Decides how to handle an incoming call. If the call should be executed, it is marked as
    ///  'in progress' until its result is recorded.
    pub fn admit(&self, method_id: u64) -> Disposition {
        let mut state = self.lock();

        if state.in_progress.contains(&method_id) {
            return Disposition::InProgress;
        }
        if let Some(result) = state.results.get(&method_id) {
            return Disposition::Cached(result.clone());
        }
        if let Some(evicted_up_to) = state.evicted_up_to {
            if method_id <= evicted_up_to {
                return Disposition::Obsolete;
            }
        }

        state.in_progress.insert(method_id);
        Disposition::Execute
    }

    pub fn record(&self, result: RpcResult) {
        let mut state = self.lock();
        state.in_progress.remove(&result.method_id);
        state.results.insert(result.method_id, result);

        while state.results.len() > self.capacity {
            if let Some((evicted, _)) = state.results.pop_first() {
                debug!("evicting result of call #{} from the executed calls cache", evicted);
                state.evicted_up_to = Some(state.evicted_up_to.map_or(evicted, |prev| prev.max(evicted)));
            }
        }
    }

    pub fn num_cached(&self) -> usize {
        self.lock().results.len()
    }

    fn lock(&self) -> MutexGuard<'_, ExecutedCallsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}


#[cfg(test)]
mod tests {
    use crate::call::rpc_result::FailureKind;
    use super::*;

    #[test]
    fn test_lifecycle() {
        let executed = ExecutedCalls::new(10);

        assert_eq!(executed.admit(1), Disposition::Execute);
        assert_eq!(executed.admit(1), Disposition::InProgress);

        executed.record(RpcResult::success(1, vec![42u8]));
        assert_eq!(executed.admit(1), Disposition::Cached(RpcResult::success(1, vec![42u8])));
        assert_eq!(executed.admit(1), Disposition::Cached(RpcResult::success(1, vec![42u8])));
    }

    #[test]
    fn test_failures_are_cached() {
        let executed = ExecutedCalls::new(10);
        assert_eq!(executed.admit(3), Disposition::Execute);
        executed.record(RpcResult::failure(3, FailureKind::RemoteException, "boom"));
        assert_eq!(executed.admit(3), Disposition::Cached(RpcResult::failure(3, FailureKind::RemoteException, "boom")));
    }

    #[test]
    fn test_eviction() {
        let executed = ExecutedCalls::new(2);
        for id in [10, 20, 30] {
            assert_eq!(executed.admit(id), Disposition::Execute);
            executed.record(RpcResult::success(id, vec![]));
        }
        assert_eq!(executed.num_cached(), 2);

        assert_eq!(executed.admit(10), Disposition::Obsolete);
        assert_eq!(executed.admit(5), Disposition::Obsolete);
        assert_eq!(executed.admit(20), Disposition::Cached(RpcResult::success(20, vec![])));
        assert_eq!(executed.admit(15), Disposition::Execute);
        assert_eq!(executed.admit(25), Disposition::Execute);
        assert_eq!(executed.admit(40), Disposition::Execute);
    }

    #[test]
    fn test_in_progress_calls_are_not_evicted() {
        let executed = ExecutedCalls::new(1);
        assert_eq!(executed.admit(1), Disposition::Execute);
        assert_eq!(executed.admit(2), Disposition::Execute);
        assert_eq!(executed.admit(3), Disposition::Execute);
        executed.record(RpcResult::success(3, vec![]));
        executed.record(RpcResult::success(2, vec![]));

        assert_eq!(executed.admit(1), Disposition::InProgress);
        assert_eq!(executed.admit(2), Disposition::Obsolete);
        assert_eq!(executed.admit(3), Disposition::Cached(RpcResult::success(3, vec![])));
    }
}
