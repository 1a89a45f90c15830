//! Exponential backoff retry policy.

use std::time::Duration;

use crate::error::ErrorKind;

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_delay: Duration,
    /// Extra multiplier applied after a `RateLimited` failure.
    pub rate_limit_backoff_factor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            rate_limit_backoff_factor: 2,
        }
    }
}

/// Stateless retry policy — computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the next attempt, after `attempt` (0-based) failed with
    /// `kind`: `base_delay * 2^attempt`.
    ///
    /// Returns `None` once `attempt` reaches `max_retries`.
    pub fn next_delay(&self, attempt: u32, kind: ErrorKind) -> Option<Duration> {
        if attempt >= self.config.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt);
        let mut delay = self.config.base_delay.saturating_mul(factor);
        if kind == ErrorKind::RateLimited {
            delay = delay.saturating_mul(self.config.rate_limit_backoff_factor.max(1));
        }
        Some(delay.min(self.config.max_delay))
    }
}
