use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, FeedSyncError};

/// Retry policy for page fetches
///
/// Only transient failures are retried. Delay for attempt `n` (0-based) is
/// `base_delay * backoff_factor^n`, capped at `max_delay`, with ±`jitter_factor/2`
/// random spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per page, first try included
    pub max_attempts: u32,
    /// Base delay (milliseconds)
    pub base_delay_ms: u64,
    /// Delay cap (milliseconds)
    pub max_delay_ms: u64,
    /// Exponential backoff factor
    pub backoff_factor: f64,
    /// Random jitter factor (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Same attempt cap, no waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff_factor: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Whether a failure on attempt `attempt` (0-based) should be retried.
    pub fn should_retry(&self, attempt: u32, error: &FeedSyncError) -> bool {
        error.kind() == ErrorKind::Transient && attempt + 1 < self.max_attempts
    }

    /// Backoff before the attempt after `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let base = self.base_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5);
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retried() {
        let policy = RetryPolicy::default();
        let transient = FeedSyncError::from_status(502, "bad gateway");
        let fatal = FeedSyncError::from_status(403, "forbidden");
        assert!(policy.should_retry(0, &transient));
        assert!(policy.should_retry(3, &transient));
        assert!(!policy.should_retry(4, &transient));
        assert!(!policy.should_retry(0, &fatal));
        assert!(!policy.should_retry(0, &FeedSyncError::KvStore("io".into())));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(1).as_millis() as i64;
            assert!((1_900..=2_100).contains(&delay), "delay {} out of band", delay);
        }
    }

    #[test]
    fn immediate_never_sleeps() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.delay_for(5), Duration::ZERO);
        assert!(policy.should_retry(1, &FeedSyncError::Timeout("t".into())));
        assert!(!policy.should_retry(2, &FeedSyncError::Timeout("t".into())));
    }
}
