use std::time::Duration;

/// Backoff applied between reconnect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3_000);

/// Fixed-delay retry schedule with an optional attempt bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever, waiting `delay` between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up after `max` consecutive failures.
    pub fn with_max_attempts(self, max: u32) -> Self {
        Self {
            max_attempts: Some(max),
            ..self
        }
    }

    /// Delay to wait after the `failures`-th consecutive failure (1-based), or `None` when the
    /// policy is exhausted.
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if failures > max => None,
            _ => Some(self.delay),
        }
    }

    /// Configured delay between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Configured attempt bound, if any.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}
