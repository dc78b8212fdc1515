//! TaskStore port - タスク状態の正本（source of truth）
//!
//! 永続化の方式はこの crate の関心外。Processor と Monitor はこの trait だけを見る。

use async_trait::async_trait;

use crate::domain::{StoreError, TaskId, TaskRecord, TaskStatus};

/// Persistence of task records.
///
/// # 設計原則
/// - `set_status` は status + updated_at + error を 1 回の atomic write で書く
/// - `set_status` は状態遷移の辺（`TaskStatus::can_transition_to`）を条件付き書き込みで守る
/// - `increment_attempt_count` は store 側で atomic（呼び出し側の read-modify-write ではない）
/// - 呼び出し側は store 操作をリトライしない（必要なら実装側の transport でやる）
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a `Pending` record with zero attempts.
    async fn create(&self, task_id: TaskId, payload: String) -> Result<TaskRecord, StoreError>;

    /// `Ok(None)` when no such task exists.
    async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Atomically write status, timestamp and (if given) the error/note.
    async fn set_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Atomically add one to the attempt count. Returns the new count.
    ///
    /// Fails with `StoreError::Terminal` once the task is processed or failed.
    async fn increment_attempt_count(&self, task_id: &TaskId) -> Result<u32, StoreError>;

    /// Every record, oldest first.
    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError>;
}
