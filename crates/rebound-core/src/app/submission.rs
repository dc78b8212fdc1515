//! TaskService - 受付とステータス照会
//!
//! - submit: record を PENDING で作り、最初の delivery (attemptCount=0) を enqueue
//! - enqueue に失敗したら record を FAILED にしてからエラーを返す（PENDING のまま放置しない）
//! - list / get: submitter が見られるのは最終状態だけ

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::domain::{Delivery, StoreError, SubmitError, TaskId, TaskRecord, TaskStatus};
use crate::ports::{IdGenerator, TaskQueue, TaskStore};

pub const SUBMITTED_MESSAGE: &str = "Task submitted";

/// Submission request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub payload: Option<String>,
}

/// Submission response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
}

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn TaskQueue>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { store, queue, ids }
    }

    /// Parse a JSON request body and submit it.
    pub async fn submit_json(&self, body: &[u8]) -> Result<SubmitResponse, SubmitError> {
        let request: SubmitRequest =
            serde_json::from_slice(body).map_err(|e| SubmitError::InvalidBody(e.to_string()))?;
        match request.payload {
            Some(payload) if !payload.is_empty() => self.submit(payload).await,
            _ => Err(SubmitError::MissingPayload),
        }
    }

    #[instrument(name = "submit_task", skip_all, fields(task_id = tracing::field::Empty))]
    pub async fn submit(&self, payload: String) -> Result<SubmitResponse, SubmitError> {
        if payload.is_empty() {
            return Err(SubmitError::MissingPayload);
        }

        let task_id = self.ids.generate_task_id();
        tracing::Span::current().record("task_id", tracing::field::display(&task_id));

        let record = self.store.create(task_id.clone(), payload).await?;

        let delivery = Delivery::initial(task_id.clone(), record.payload);
        if let Err(err) = self.queue.enqueue(delivery).await {
            error!(error = %err, "initial enqueue failed; marking task FAILED");
            let note = format!("submission enqueue failed: {err}");
            if let Err(store_err) = self
                .store
                .set_status(&task_id, TaskStatus::Failed, Some(&note))
                .await
            {
                error!(error = %store_err, "could not mark unsubmitted task FAILED");
            }
            return Err(err.into());
        }

        info!("task submitted");
        Ok(SubmitResponse {
            task_id,
            status: TaskStatus::Pending,
            message: SUBMITTED_MESSAGE.to_string(),
        })
    }

    /// All task records, oldest first.
    pub async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.store.list().await
    }

    pub async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.store.get(task_id).await
    }
}
