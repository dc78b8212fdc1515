//! DeadLetterMonitor - dead-letter path の受け手
//!
//! processor が FAILED を書く前に落ちても、ここで最終状態を FAILED に揃える。
//!
//! # 設計原則
//! - 決して失敗を返さない（返すと dead-letter path 自体が詰まる）
//! - store のエラーはログに出して ack する
//! - 既に terminal なら何もしない（冪等）

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::domain::{DeadLetterEnvelope, StoreError, TaskStatus};
use crate::ports::TaskStore;

/// Result of handling one dead-letter delivery. Every variant is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Status was moved to FAILED.
    Reconciled,

    /// Already PROCESSED or FAILED; nothing written.
    AlreadyTerminal(TaskStatus),

    /// No record for the envelope's task id.
    UnknownTask,

    /// Body could not be decoded into an envelope.
    Malformed,

    /// Lookup or status write failed; logged and dropped.
    StoreFailed,
}

pub struct DeadLetterMonitor {
    store: Arc<dyn TaskStore>,
}

impl DeadLetterMonitor {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Decode and handle a raw dead-letter body.
    pub async fn handle_raw(&self, body: &[u8]) -> MonitorOutcome {
        match DeadLetterEnvelope::decode(body) {
            Ok(envelope) => self.handle(envelope).await,
            Err(err) => {
                error!(
                    error = %err,
                    body = %String::from_utf8_lossy(body),
                    "undecodable dead letter; acknowledging"
                );
                MonitorOutcome::Malformed
            }
        }
    }

    #[instrument(
        name = "reconcile_dead_letter",
        skip_all,
        fields(task_id = %envelope.task_id, attempt_count = envelope.attempt_count)
    )]
    pub async fn handle(&self, envelope: DeadLetterEnvelope) -> MonitorOutcome {
        info!(
            reason = %envelope.reason,
            payload = %envelope.payload,
            dead_lettered_at = %envelope.dead_lettered_at.to_rfc3339(),
            "dead letter received"
        );

        let record = match self.store.get(&envelope.task_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("no task record for dead letter");
                return MonitorOutcome::UnknownTask;
            }
            Err(err) => {
                error!(error = %err, "task lookup failed; acknowledging anyway");
                return MonitorOutcome::StoreFailed;
            }
        };

        if record.status.is_terminal() {
            info!(status = %record.status, "task already terminal");
            return MonitorOutcome::AlreadyTerminal(record.status);
        }

        match self
            .store
            .set_status(&envelope.task_id, TaskStatus::Failed, Some(&envelope.reason))
            .await
        {
            Ok(()) => {
                info!(previous = %record.status, "task reconciled to FAILED");
                MonitorOutcome::Reconciled
            }
            // Lost a race with another writer that finished the task.
            Err(StoreError::InvalidTransition { from, .. }) if from.is_terminal() => {
                info!(status = %from, "task became terminal concurrently");
                MonitorOutcome::AlreadyTerminal(from)
            }
            Err(err) => {
                error!(error = %err, "could not mark task FAILED; acknowledging anyway");
                MonitorOutcome::StoreFailed
            }
        }
    }
}
