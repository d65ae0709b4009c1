//! Retry delay computation for provider calls.
//!
//! Delays are deterministic; there is no jitter.

use std::time::Duration;

use crate::error::ProviderError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 3). Values below 1 are
    /// treated as 1.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (default: 1 second).
    pub base_delay: Duration,
    /// Upper bound on any computed delay (default: 60 seconds).
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Attempts actually made.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Delay after failed attempt `attempt` (0-indexed): `min(base * 2^attempt, max)`.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    config.base_delay.saturating_mul(factor).min(config.max_delay)
}

/// Delay after a throttled attempt.
///
/// Prefers the server's hint, then whatever backoff the limiter is already
/// enforcing, then plain exponential backoff.
pub fn throttle_delay(
    config: &RetryConfig,
    attempt: u32,
    retry_after_ms: Option<u64>,
    limiter_backoff: Duration,
) -> Duration {
    if let Some(ms) = retry_after_ms {
        return Duration::from_millis(ms);
    }
    if !limiter_backoff.is_zero() {
        return limiter_backoff;
    }
    compute_delay(config, attempt)
}

/// Whether another attempt could change the outcome.
///
/// Missing credentials never fix themselves; everything else might.
pub fn is_retryable(err: &ProviderError) -> bool {
    !matches!(err, ProviderError::NotConfigured(_))
}
