//! Delivery and dead-letter envelope: the messages carried by the transport.
//!
//! Wire format is JSON (camelCase):
//! - delivery: `{taskId, payload, attemptCount}`
//! - dead letter: `{taskId, payload, attemptCount, reason, timestamp}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;
use super::errors::{DeliveryError, QueueError};

/// One attempt-bearing message describing a task to process. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub task_id: TaskId,
    pub payload: String,

    /// Attempt count at send time.
    pub attempt_count: u32,
}

impl Delivery {
    pub fn new(task_id: TaskId, payload: impl Into<String>, attempt_count: u32) -> Self {
        Self {
            task_id,
            payload: payload.into(),
            attempt_count,
        }
    }

    /// First delivery of a freshly submitted task.
    pub fn initial(task_id: TaskId, payload: impl Into<String>) -> Self {
        Self::new(task_id, payload, 0)
    }

    /// The redelivery carrying the next attempt count.
    pub fn next_attempt(&self) -> Self {
        Self {
            task_id: self.task_id.clone(),
            payload: self.payload.clone(),
            attempt_count: self.attempt_count.saturating_add(1),
        }
    }

    /// Parse a raw transport body.
    ///
    /// Anything that does not yield a task id is `DeliveryError`; the caller must
    /// not touch any task record for it.
    pub fn decode(body: &[u8]) -> Result<Self, DeliveryError> {
        let delivery: Delivery =
            serde_json::from_slice(body).map_err(|e| DeliveryError::Malformed(e.to_string()))?;
        if delivery.task_id.is_blank() {
            return Err(DeliveryError::MissingTaskId);
        }
        Ok(delivery)
    }

    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(|e| QueueError::Encode(e.to_string()))
    }
}

/// A task handed to the dead-letter path after the processor gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEnvelope {
    pub task_id: TaskId,
    pub payload: String,
    pub attempt_count: u32,
    pub reason: String,

    #[serde(rename = "timestamp")]
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEnvelope {
    pub fn from_delivery(
        delivery: &Delivery,
        reason: impl Into<String>,
        dead_lettered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: delivery.task_id.clone(),
            payload: delivery.payload.clone(),
            attempt_count: delivery.attempt_count,
            reason: reason.into(),
            dead_lettered_at,
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, DeliveryError> {
        let envelope: DeadLetterEnvelope =
            serde_json::from_slice(body).map_err(|e| DeliveryError::Malformed(e.to_string()))?;
        if envelope.task_id.is_blank() {
            return Err(DeliveryError::MissingTaskId);
        }
        Ok(envelope)
    }

    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(|e| QueueError::Encode(e.to_string()))
    }
}
