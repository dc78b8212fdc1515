//! Status - ステータスクエリの集計
//!
//! submitter から見えるのは task の最終状態だけなので、ここで件数を数える。

use serde::{Deserialize, Serialize};

use crate::domain::{TaskRecord, TaskStatus};

/// Count of task records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub processed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.add(record.status);
        }
        counts
    }

    pub fn add(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Processing => self.processing += 1,
            TaskStatus::Processed => self.processed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.processed + self.failed
    }

    /// Number of records in a terminal status.
    pub fn terminal(&self) -> usize {
        self.processed + self.failed
    }

    pub fn all_terminal(&self) -> bool {
        self.terminal() == self.total()
    }
}
