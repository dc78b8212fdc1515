//! Errors - エラー型と分類
//!
//! - work failure: `WorkError`（リトライ/DLQ 判定で処理される。外には出ない）
//! - store failure: `StoreError`
//! - queue failure: `QueueError`
//! - malformed delivery: `DeliveryError`（transport の poison 処理へ）

use thiserror::Error;

use super::{TaskId, TaskStatus};

/// Failure of a task store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),

    #[error("task {task_id}: illegal status change {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {task_id} is {status}; attempt count is frozen")]
    Terminal { task_id: TaskId, status: TaskStatus },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a queue operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// A delivery body that cannot be attributed to a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("malformed delivery: {0}")]
    Malformed(String),

    #[error("delivery has no task id")]
    MissingTaskId,
}

/// Failure signal returned by a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct WorkError(pub String);

impl WorkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors the processor hands back to the delivery transport.
///
/// Work failures never show up here; they end in a retry or a dead letter.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    MalformedDelivery(#[from] DeliveryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ProcessError {
    /// Malformed deliveries go straight to poison handling; redelivery cannot help.
    pub fn is_poison(&self) -> bool {
        matches!(self, ProcessError::MalformedDelivery(_))
    }
}

/// Errors returned by task submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("payload is required")]
    MissingPayload,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl SubmitError {
    /// Caller mistakes (reported as a client error), as opposed to backend faults.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SubmitError::InvalidBody(_) | SubmitError::MissingPayload)
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {key}={value:?}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}
