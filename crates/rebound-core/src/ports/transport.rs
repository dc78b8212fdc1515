//! DeliveryTransport port - 受信側の transport
//!
//! worker pool が使う。ack は「受け取った時点で取り除く」方式で、
//! redelivery と poison 処理は `release` / `quarantine` で明示的に行う。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::QueueError;

/// A raw message taken off the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub body: Vec<u8>,

    /// How many times this body has been handed out, including this one.
    pub receive_count: u32,
}

impl ReceivedMessage {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            receive_count: 1,
        }
    }
}

/// Receive side of the delivery transport.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Wait for the next due delivery.
    async fn receive(&self) -> ReceivedMessage;

    /// Wait for the next dead-letter envelope.
    async fn receive_dead_letter(&self) -> ReceivedMessage;

    /// Put a message back for redelivery after `delay`, bumping its receive count.
    async fn release(&self, message: ReceivedMessage, delay: Duration) -> Result<(), QueueError>;

    /// Park a message that cannot be processed (poison handling).
    async fn quarantine(&self, message: ReceivedMessage, reason: String) -> Result<(), QueueError>;
}
