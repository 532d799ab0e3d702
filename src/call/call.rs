use std::time::Duration;

use tokio::time::Instant;

use crate::call::method_invocation::MethodInvocation;
use crate::call::peer_info::PeerId;
use crate::call::retry_strategy::RetryStrategy;
use crate::call::rpc_result::RpcResult;


/// The caller-side wrapper around a [MethodInvocation]: where it goes, how it is retried, how long
///  to wait for it. The start time and result are the state of the attempt that is currently on
///  the wire, and are cleared before a retry.
///
/// A call's identity for queueing and persistence is the pair (target, method id).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Call {
    target: PeerId,
    invocation: MethodInvocation,
    retry_strategy: Option<RetryStrategy>,
    timeout: Option<Duration>,
    start_time: Option<Instant>,
    result: Option<RpcResult>,
}

impl Call {
    pub fn new(target: PeerId, invocation: MethodInvocation) -> Call {
        Call {
            target,
            invocation,
            retry_strategy: None,
            timeout: None,
            start_time: None,
            result: None,
        }
    }

    pub fn with_retry_strategy(mut self, retry_strategy: RetryStrategy) -> Call {
        self.retry_strategy = Some(retry_strategy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Call {
        self.timeout = Some(timeout);
        self
    }

    pub fn target(&self) -> &PeerId {
        &self.target
    }

    pub fn invocation(&self) -> &MethodInvocation {
        &self.invocation
    }

    pub fn method_id(&self) -> u64 {
        self.invocation.id
    }

    pub fn method_name(&self) -> &str {
        &self.invocation.name
    }

    pub fn retry_strategy(&self) -> Option<RetryStrategy> {
        self.retry_strategy
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// true if the call is configured to be retried, i.e. it has a retry strategy other than
    ///  [RetryStrategy::None]
    pub fn is_retryable(&self) -> bool {
        self.retry_strategy
            .map(|s| s.allows_retry())
            .unwrap_or(false)
    }

    pub fn is_retry_latest(&self) -> bool {
        self.retry_strategy == Some(RetryStrategy::RetryLatest)
    }

    pub fn effective_timeout(&self, default_timeout: Duration) -> Duration {
        self.timeout.unwrap_or(default_timeout)
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.start_time
    }

    pub fn mark_started(&mut self, now: Instant) {
        self.start_time = Some(now);
    }

    /// `None` while no attempt is in flight, or if the timeout is too long to ever expire
    pub fn deadline(&self, default_timeout: Duration) -> Option<Instant> {
        self.start_time
            .and_then(|start| start.checked_add(self.effective_timeout(default_timeout)))
    }

    pub fn result(&self) -> Option<&RpcResult> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, result: RpcResult) {
        self.result = Some(result);
    }

    pub fn take_result(&mut self) -> Option<RpcResult> {
        self.result.take()
    }

    /// Prepare the call for a fresh attempt
    pub fn reset(&mut self) {
        self.start_time = None;
        self.result = None;
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use crate::call::rpc_result::FailureKind;
    use super::*;

    fn call(strategy: Option<RetryStrategy>) -> Call {
        let call = Call::new(PeerId::Server, MethodInvocation::new(7, "SetName", vec![]).unwrap());
        match strategy {
            Some(s) => call.with_retry_strategy(s),
            None => call,
        }
    }

    #[rstest]
    #[case::unset(None, false)]
    #[case::none(Some(RetryStrategy::None), false)]
    #[case::retry(Some(RetryStrategy::Retry), true)]
    #[case::retry_latest(Some(RetryStrategy::RetryLatest), true)]
    fn test_is_retryable(#[case] strategy: Option<RetryStrategy>, #[case] expected: bool) {
        assert_eq!(call(strategy).is_retryable(), expected);
    }

    #[test]
    fn test_effective_timeout() {
        let default_timeout = Duration::from_secs(30);
        assert_eq!(call(None).effective_timeout(default_timeout), default_timeout);
        assert_eq!(call(None).with_timeout(Duration::from_millis(5)).effective_timeout(default_timeout), Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_state() {
        let mut call = call(Some(RetryStrategy::Retry)).with_timeout(Duration::from_millis(100));
        assert_eq!(call.deadline(Duration::from_secs(1)), None);

        let now = Instant::now();
        call.mark_started(now);
        assert_eq!(call.deadline(Duration::from_secs(1)), Some(now + Duration::from_millis(100)));

        call.set_result(RpcResult::failure(7, FailureKind::Timeout, ""));
        assert!(call.result().is_some());

        call.reset();
        assert_eq!(call.start_time(), None);
        assert_eq!(call.result(), None);
        assert_eq!(call.method_id(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_has_no_deadline() {
        let mut with_override = call(None).with_timeout(Duration::MAX);
        with_override.mark_started(Instant::now());
        assert_eq!(with_override.deadline(Duration::from_secs(1)), None);

        let mut with_default = call(None);
        with_default.mark_started(Instant::now());
        assert_eq!(with_default.deadline(Duration::MAX), None);
    }
}
