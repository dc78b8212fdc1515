//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a task record.
///
/// State transitions:
/// - Pending -> Processing -> Processed
/// - Pending -> Processing -> Pending (retry loop)
/// - Pending -> Processing -> Failed (retries exhausted)
/// - Pending -> Failed (dead-letter reconciliation, failed submission)
/// - Processing -> Processing (duplicate delivery of the same attempt)
/// - Pending -> Processed, Pending -> Pending (the best-effort PROCESSING marker was lost)
///
/// Processed and Failed are terminal: nothing leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for a delivery to be processed.
    Pending,

    /// A worker is running the unit of work.
    Processing,

    /// Completed successfully.
    Processed,

    /// Gave up (retries exhausted or reconciled from the dead-letter path).
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Processed,
        TaskStatus::Failed,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Processed | TaskStatus::Failed)
    }

    /// Is `self -> next` an edge of the state machine?
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Processed)
                | (Pending, Pending)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Processed)
                | (Processing, Pending)
                | (Processing, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Processed => "PROCESSED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
