//! Task record: the persisted status + attempt history of one task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::StoreError;
use super::{TaskId, TaskStatus};

/// Authoritative status record for a task.
///
/// Design:
/// - `task_id` and `payload` never change after creation.
/// - `attempt_count` only goes up, and is frozen once the status is terminal.
/// - `updated_at` never moves backwards, even if the clock does.
/// - Status changes go through `transition`, which only follows
///   `TaskStatus::can_transition_to` edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub payload: String,
    pub status: TaskStatus,
    pub attempt_count: u32,

    /// Latest failure description or retry note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// New record in `Pending` with no attempts.
    pub fn new(task_id: TaskId, payload: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            payload: payload.into(),
            status: TaskStatus::Pending,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, optionally recording an error/note, as one write.
    ///
    /// `error = None` leaves the previous `last_error` in place.
    pub fn transition(
        &mut self,
        next: TaskStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !self.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                task_id: self.task_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if let Some(error) = error {
            self.last_error = Some(error.to_string());
        }
        self.touch(now);
        Ok(())
    }

    /// Bump the attempt count. Returns the new value.
    pub fn increment_attempt_count(&mut self, now: DateTime<Utc>) -> Result<u32, StoreError> {
        if self.status.is_terminal() {
            return Err(StoreError::Terminal {
                task_id: self.task_id.clone(),
                status: self.status,
            });
        }
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.touch(now);
        Ok(self.attempt_count)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}
