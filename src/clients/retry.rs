use crate::constants;
use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff schedule for one outbound dependency.
///
/// Attempt `n` (zero-based) sleeps `base * 2^n` plus up to 25% jitter
/// before retrying. The total attempt count includes the first try.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn classifier() -> Self {
        Self {
            attempts: constants::CLASSIFIER_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(constants::CLASSIFIER_RETRY_BASE_MS),
        }
    }

    pub fn github() -> Self {
        Self {
            attempts: constants::GITHUB_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(constants::GITHUB_RETRY_BASE_MS),
        }
    }

    /// Backoff before retry number `attempt` (zero-based count of failures
    /// so far).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * (1u64 << attempt.min(16));
        let jitter = rand::thread_rng().gen_range(0..=exp / 4);
        Duration::from_millis(exp + jitter)
    }

    pub fn is_last_attempt(&self, attempt: u32) -> bool {
        attempt + 1 >= self.attempts
    }
}
