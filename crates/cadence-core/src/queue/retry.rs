//! Retry policy: decides whether and when a failed one-shot execution runs again.

use std::time::Duration;

/// Exponential backoff bounded by a total number of runs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total runs allowed (including the first). 1 = never retry.
    pub max_attempts: u32,

    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Never retry (one run per execution).
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }

    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before the next run, given the runs already made (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1)
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_never_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::none()
        };

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);

        assert_eq!(d1, Duration::from_secs(2));
        assert_eq!(d2, Duration::from_secs(4));
        assert_eq!(d3, Duration::from_secs(8));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.next_delay(10_000), Duration::MAX);
    }
}
