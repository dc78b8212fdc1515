//! Backoff policy: decides retry delays and when to give up.

use std::time::Duration;

use super::Decision;

/// Exponent ceiling for `delay_for`. `2^30` already exceeds any realistic cap.
const MAX_EXPONENT: u32 = 30;

/// Retry policy for failed attempts.
///
/// Pure and deterministic: no I/O, no clock, no randomness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound for any delay.
    pub max_delay: Duration,

    /// Retries allowed beyond the initial attempt. 0 means never retry.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    /// base=2s, max=900s, 2 retries (3 attempts in total).
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(900),
            max_retries: 2,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
        }
    }

    /// `min(base_delay * 2^attempt_count, max_delay)`.
    ///
    /// Example with base=2s, max=900s:
    /// - attempt 0: 2s
    /// - attempt 1: 4s
    /// - attempt 2: 8s
    /// - attempt 9+: 900s
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.min(MAX_EXPONENT);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// True iff `attempt_count < max_retries`.
    pub fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_retries
    }

    /// What to do after the attempt carrying `attempt_count` failed.
    ///
    /// The delay uses the count before it is incremented, so the first retry
    /// after attempt 0 waits `delay_for(0)`.
    pub fn decide(&self, attempt_count: u32) -> Decision {
        if self.should_retry(attempt_count) {
            Decision::Retry {
                delay: self.delay_for(attempt_count),
                next_attempt_count: attempt_count.saturating_add(1),
            }
        } else {
            Decision::GiveUp {
                attempt_count,
                max_retries: self.max_retries,
            }
        }
    }
}
