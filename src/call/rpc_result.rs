use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use anyhow::anyhow;
use bytes::Bytes;


/// The closed set of reasons a call can fail. Only some of them are worth retrying - repeating a
///  call that failed in application code would just fail again.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum FailureKind {
    /// the callee's application code failed
    RemoteException,
    /// no result arrived in time
    Timeout,
    /// the local queue was full
    QueueOverflow,
    /// transport level anomaly, e.g. a malformed result
    RpcError,
    /// the callee no longer remembers the outcome of a call with this id, so it can neither
    ///  execute it again nor report its result
    ObsoleteCommandID,
    Other,
}

impl FailureKind {
    pub const ALL: [FailureKind; 6] = [
        FailureKind::RemoteException,
        FailureKind::Timeout,
        FailureKind::QueueOverflow,
        FailureKind::RpcError,
        FailureKind::ObsoleteCommandID,
        FailureKind::Other,
    ];

    pub fn is_retryable(&self) -> bool {
        match self {
            FailureKind::Timeout | FailureKind::QueueOverflow | FailureKind::RpcError => true,
            FailureKind::RemoteException | FailureKind::ObsoleteCommandID | FailureKind::Other => false,
        }
    }

    /// the name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RemoteException => "RemoteException",
            FailureKind::Timeout => "Timeout",
            FailureKind::QueueOverflow => "QueueOverflow",
            FailureKind::RpcError => "RpcError",
            FailureKind::ObsoleteCommandID => "ObsoleteCommandID",
            FailureKind::Other => "Other",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow!("unknown failure kind {:?}", s))
    }
}


/// An empty message means 'no message'
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}


#[derive(Clone, Eq, PartialEq)]
pub enum Outcome {
    Success(Bytes),
    Failure(Failure),
}


/// The outcome of exactly one method invocation, created once by whichever side executed (or
///  gave up on) the call.
#[derive(Clone, Eq, PartialEq)]
pub struct RpcResult {
    pub method_id: u64,
    pub outcome: Outcome,
}

impl RpcResult {
    pub fn success(method_id: u64, return_value: impl Into<Bytes>) -> RpcResult {
        RpcResult {
            method_id,
            outcome: Outcome::Success(return_value.into()),
        }
    }

    pub fn failure(method_id: u64, kind: FailureKind, message: impl Into<String>) -> RpcResult {
        RpcResult {
            method_id,
            outcome: Outcome::Failure(Failure {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn return_value(&self) -> Option<&Bytes> {
        match &self.outcome {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure_info(&self) -> Option<&Failure> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_info().map(|f| f.kind)
    }

    pub fn is_retryable_failure(&self) -> bool {
        self.failure_info()
            .map(|f| f.is_retryable())
            .unwrap_or(false)
    }
}

impl Debug for RpcResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            Outcome::Success(value) => write!(f, "RpcResult{{#{}: success, {} bytes}}", self.method_id, value.len()),
            Outcome::Failure(failure) => write!(f, "RpcResult{{#{}: {} {:?}}}", self.method_id, failure.kind, failure.message),
        }
    }
}
