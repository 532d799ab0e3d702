use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Source of wall-clock milliseconds for [IdGenerator]. This is a seam for tests, which need
///  deterministic ids.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> u64;
}

pub struct SystemClock;
impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to
#[derive(Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);
impl ManualClock {
    pub fn new(millis: u64) -> ManualClock {
        ManualClock(Arc::new(AtomicU64::new(millis)))
    }

    pub fn set(&self, millis: u64) {
        self.0.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}
impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

struct IdState {
    last_millis: u64,
    sequence: u64,
}

/// Generates method ids as `millis * 10000 + sequence`, which makes them unique and ordered
///  consistently with wall-clock time.
///
/// If the sequence for a millisecond is exhausted, or the clock moves backwards, the generator
///  keeps counting on its most recent millisecond (borrowing from the future) rather than
///  wrapping: ids are strictly increasing for the lifetime of a generator.
pub struct IdGenerator {
    clock: Box<dyn Clock>,
    state: Mutex<IdState>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        IdGenerator::new()
    }
}

impl IdGenerator {
    pub const IDS_PER_MILLI: u64 = 10_000;

    pub fn new() -> IdGenerator {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock) -> IdGenerator {
        IdGenerator {
            clock: Box::new(clock),
            state: Mutex::new(IdState {
                last_millis: 0,
                sequence: 0,
            }),
        }
    }

    pub fn next_id(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut state = self.state.lock()
            .unwrap_or_else(PoisonError::into_inner);

        if now > state.last_millis {
            state.last_millis = now;
            state.sequence = 0;
        }
        else {
            state.sequence += 1;
            if state.sequence == Self::IDS_PER_MILLI {
                warn!("more than {} ids requested in one millisecond - borrowing from the next millisecond", Self::IDS_PER_MILLI);
                state.last_millis += 1;
                state.sequence = 0;
            }
        }

        state.last_millis * Self::IDS_PER_MILLI + state.sequence
    }
}
