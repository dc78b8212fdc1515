//! TaskQueue port - 送信側のキュー（通常キュー + dead-letter path）
//!
//! 配送の仕組み（SQS, Redis, in-memory ...）は実装側に閉じる。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{DeadLetterEnvelope, Delivery, QueueError};

/// Send side of the delivery transport, as used by the core.
///
/// Delays are scheduling hints ("redeliver no earlier than"); nobody sleeps
/// on them. Ordering across tasks is not guaranteed.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Deliver as soon as possible (initial submission).
    async fn enqueue(&self, delivery: Delivery) -> Result<(), QueueError> {
        self.enqueue_retry(delivery, Duration::ZERO).await
    }

    /// Schedule redelivery no earlier than `delay` from now.
    async fn enqueue_retry(&self, delivery: Delivery, delay: Duration) -> Result<(), QueueError>;

    /// Hand the envelope to the dead-letter path (asynchronous, at-least-once).
    async fn enqueue_dead_letter(&self, envelope: DeadLetterEnvelope) -> Result<(), QueueError>;
}
