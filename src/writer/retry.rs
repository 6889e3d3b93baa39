//! Exponential backoff schedule for resubmitting unprocessed items.

use std::time::Duration;

/// Backoff configuration for the batched writer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts per chunk (not including the
    /// initial attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Multiplier applied to the delay after every retry.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Production schedule: 5 retries at 100, 200, 400, 800 and 1600 ms.
    pub const DEFAULT: Self = Self {
        max_retries: 5,
        base_delay: Duration::from_millis(100),
        backoff_multiplier: 2.0,
    };

    /// Creates a new retry configuration.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_multiplier,
        }
    }

    /// Computes the delay before retry `attempt` (0-indexed):
    /// `base_delay * backoff_multiplier^attempt`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let multiplier = self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * multiplier).unwrap_or(Duration::MAX)
    }

    /// Returns an iterator over every retry delay in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
