//! Retry policy configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_FACTOR: f64 = 2.0;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of invocations, including the first one.
    pub attempts: u32,
    /// Delay after the first failure.
    pub min_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure.
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            factor: DEFAULT_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately, mostly useful in tests.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Number of invocations this policy allows. Never less than one.
    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Delay to wait after the `failed_attempt`-th failure (1-based).
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let scaled = self.min_delay.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay.max(self.min_delay);
        }
        Duration::from_secs_f64(scaled)
    }
}
