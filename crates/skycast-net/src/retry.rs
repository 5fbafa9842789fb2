//! Exponential backoff for transient network failures.
//!
//! The delay before attempt `n` (1-indexed, `n >= 2`) is
//! `min(base_delay * 2^(n-2), max_delay)`. The same schedule spaces out
//! background sync attempts. Which failures are retried is decided by
//! [`crate::NetworkError::is_retryable`].

use std::time::Duration;

use skycast_core::ResilienceConfig;

/// Default backoff configuration
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 16_000;

/// Backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the second attempt (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom delays
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Delay to wait before the given attempt. The first attempt never waits.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempt - 2);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(16));
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_before_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_before_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_secs(4));
        assert_eq!(policy.delay_before_attempt(6), Duration::from_secs(16));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new(100, 1000);

        // 100ms * 2^4 = 1600 > 1000
        assert_eq!(policy.delay_before_attempt(6), Duration::from_millis(1000));
        assert_eq!(policy.delay_before_attempt(200), Duration::from_millis(1000));
    }

    #[test]
    fn test_delays_are_monotonic_and_bounded() {
        let policy = RetryPolicy::new(250, 16_000);
        let mut previous = Duration::ZERO;
        for attempt in 2..=64 {
            let delay = policy.delay_before_attempt(attempt);
            assert!(delay >= previous, "attempt {} went backwards", attempt);
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }
}
