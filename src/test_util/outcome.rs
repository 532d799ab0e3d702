use std::sync::{Mutex, PoisonError};

use crate::call::call::Call;
use crate::call::rpc_result::RpcResult;
use crate::channel::config::OutcomeListener;


/// Records every outcome it is notified of, in order
#[derive(Default)]
pub struct RecordingOutcomeListener {
    outcomes: Mutex<Vec<RpcResult>>,
}

impl RecordingOutcomeListener {
    pub fn new() -> RecordingOutcomeListener {
        Default::default()
    }

    pub fn outcomes(&self) -> Vec<RpcResult> {
        self.outcomes.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn outcome_for(&self, method_id: u64) -> Option<RpcResult> {
        self.outcomes()
            .into_iter()
            .find(|r| r.method_id == method_id)
    }
}

impl OutcomeListener for RecordingOutcomeListener {
    fn on_outcome(&self, _call: &Call, result: &RpcResult) {
        self.outcomes.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.clone());
    }
}
