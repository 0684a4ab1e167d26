use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Exponential retry policy shared by the schedule aggregate and the outbox
/// delivery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts before the work is parked.
    pub max_retries: u32,
    /// Backoff base: the n-th retry waits `base^n` seconds.
    pub backoff_base_secs: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_secs: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base_secs: u32) -> Self {
        Self {
            max_retries,
            backoff_base_secs,
        }
    }

    /// Delay before the given (1-indexed) retry attempt.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let secs = (self.backoff_base_secs as i64).saturating_pow(retry_count);
        Duration::seconds(secs)
    }

    pub fn retries_remain(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy::new(5, 2);
        assert_eq!(policy.delay_for(1), Duration::seconds(2));
        assert_eq!(policy.delay_for(2), Duration::seconds(4));
        assert_eq!(policy.delay_for(3), Duration::seconds(8));
    }

    #[test]
    fn retries_remain_respects_the_cap() {
        let policy = RetryPolicy::new(3, 2);
        assert!(policy.retries_remain(0));
        assert!(policy.retries_remain(2));
        assert!(!policy.retries_remain(3));
        assert!(!policy.retries_remain(4));
    }
}
