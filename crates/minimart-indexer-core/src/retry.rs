//! Bounded retry policy for batch writes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the write retry policy: a bounded number of attempts
/// separated by a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per batch, the first try included.
    pub max_attempts: u32,
    /// Delay between consecutive attempts.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fixed(3, Duration::from_millis(125))
    }
}

impl RetryConfig {
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// Stateless retry policy: computes the delay after a given failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay to wait after the `attempt`-th failure (1-based) before trying
    /// again, or `None` once all attempts are spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        Some(self.config.backoff)
    }

    /// Returns `true` if another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_three_attempts_fixed_125ms() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(125)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(125)));
        assert!(policy.next_delay(3).is_none());
    }

    #[test]
    fn delay_stays_fixed_across_attempts() {
        let policy = RetryPolicy::new(RetryConfig::fixed(10, Duration::from_millis(40)));
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(40)));
        assert_eq!(policy.next_delay(9), Some(Duration::from_millis(40)));
        assert!(policy.next_delay(10).is_none());
    }

    #[test]
    fn single_attempt_never_retries() {
        let policy = RetryPolicy::new(RetryConfig::fixed(1, Duration::from_millis(10)));
        assert!(!policy.should_retry(1));
        assert!(policy.next_delay(1).is_none());
    }
}
