use std::time::Duration;


/// Exponentially growing delay between reconnect attempts. It is reset once a connection was
///  established successfully.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    factor: u32,
    current_delay: Duration,
    failure_count: u32,
}

impl ReconnectBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, factor: u32) -> ReconnectBackoff {
        ReconnectBackoff {
            initial_delay,
            max_delay,
            factor: factor.max(1),
            current_delay: initial_delay,
            failure_count: 0,
        }
    }

    /// Registers a failed attempt, returning the delay before the next one
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current_delay;
        self.failure_count += 1;
        self.current_delay = self.current_delay
            .saturating_mul(self.factor)
            .min(self.max_delay);
        delay
    }

    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.failure_count = 0;
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }
}
