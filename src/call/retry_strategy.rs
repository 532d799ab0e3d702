use anyhow::bail;


/// What happens to a call after a retryable failure
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RetryStrategy {
    /// no automatic retry: the failure goes straight to the caller
    None,
    /// keep the call at its position in the queue and resend it until it succeeds or fails
    ///  permanently. Calls with this strategy are delivered in the order they were enqueued.
    Retry,
    /// like [RetryStrategy::Retry], but enqueueing a call supersedes all persisted calls to the
    ///  same target with the same method name ('set latest value' semantics)
    RetryLatest,
}

impl RetryStrategy {
    pub fn allows_retry(&self) -> bool {
        !matches!(self, RetryStrategy::None)
    }

    /// single-byte tag used when calls are persisted
    pub fn tag(strategy: Option<RetryStrategy>) -> u8 {
        match strategy {
            None => b'-',
            Some(RetryStrategy::None) => b'N',
            Some(RetryStrategy::Retry) => b'R',
            Some(RetryStrategy::RetryLatest) => b'L',
        }
    }

    pub fn try_from_tag(tag: u8) -> anyhow::Result<Option<RetryStrategy>> {
        match tag {
            b'-' => Ok(None),
            b'N' => Ok(Some(RetryStrategy::None)),
            b'R' => Ok(Some(RetryStrategy::Retry)),
            b'L' => Ok(Some(RetryStrategy::RetryLatest)),
            t => bail!("invalid retry strategy tag {}", t),
        }
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::unset(None)]
    #[case::none(Some(RetryStrategy::None))]
    #[case::retry(Some(RetryStrategy::Retry))]
    #[case::retry_latest(Some(RetryStrategy::RetryLatest))]
    fn test_tag(#[case] strategy: Option<RetryStrategy>) {
        assert_eq!(RetryStrategy::try_from_tag(RetryStrategy::tag(strategy)).unwrap(), strategy);
    }

    #[test]
    fn test_invalid_tag() {
        assert!(RetryStrategy::try_from_tag(b'x').is_err());
    }
}
