//! Decision model: what to do after a failed attempt.

use std::time::Duration;

/// Reason carried by dead-letter envelopes produced by the processor.
pub const RETRIES_EXHAUSTED: &str = "retries exhausted";

/// The next action for a task whose attempt failed.
///
/// Produced by `BackoffPolicy::decide`; carried out by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Redeliver no earlier than `delay`, carrying `next_attempt_count`.
    Retry {
        delay: Duration,
        next_attempt_count: u32,
    },

    /// Route to the dead-letter path and mark the task failed.
    GiveUp { attempt_count: u32, max_retries: u32 },
}

impl Decision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Decision::Retry { .. })
    }

    /// Human-readable note stored on the task record.
    pub fn note(&self, error: &str) -> String {
        match self {
            Decision::Retry {
                delay,
                next_attempt_count,
            } => format!(
                "retry {next_attempt_count} scheduled in {}s after: {error}",
                delay.as_secs()
            ),
            Decision::GiveUp {
                attempt_count,
                max_retries,
            } => format!(
                "{RETRIES_EXHAUSTED} ({attempt_count}/{max_retries} retries used): {error}"
            ),
        }
    }
}
