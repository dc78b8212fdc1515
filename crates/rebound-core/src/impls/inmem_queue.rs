//! InMemoryTaskQueue - 開発用の配送キュー
//!
//! `TaskQueue`（送信側）と `DeliveryTransport`（受信側）の両方を実装する。
//!
//! - ready: すぐ配送できるメッセージ
//! - scheduled: 遅延付きメッセージ（BinaryHeap で最早時刻順）
//! - dead_letters: dead-letter path
//! - quarantined: poison メッセージの退避先（タスク管理の外）
//!
//! メッセージは JSON にエンコードした body で保持するので、
//! 受信側は本物の transport と同じく raw bytes を decode する。

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{DeadLetterEnvelope, Delivery, QueueError};
use crate::ports::{DeliveryTransport, ReceivedMessage, TaskQueue};

/// Scheduled message entry for the delay heap.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first);
/// `seq` keeps FIFO order among equal due times.
#[derive(Debug)]
struct ScheduledMessage {
    due: Instant,
    seq: u64,
    message: ReceivedMessage,
}

impl PartialEq for ScheduledMessage {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledMessage {}

impl PartialOrd for ScheduledMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A body parked by poison handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedMessage {
    pub body: Vec<u8>,
    pub receive_count: u32,
    pub reason: String,
}

/// Queue depths for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueDepths {
    pub ready: usize,
    pub scheduled: usize,
    pub dead_letters: usize,
    pub quarantined: usize,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ReceivedMessage>,
    scheduled: BinaryHeap<ScheduledMessage>,
    dead_letters: VecDeque<ReceivedMessage>,
    quarantined: Vec<QuarantinedMessage>,
    next_seq: u64,
}

impl QueueState {
    fn push(&mut self, message: ReceivedMessage, delay: Duration) {
        if delay.is_zero() {
            self.ready.push_back(message);
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.scheduled.push(ScheduledMessage {
            due: Instant::now() + delay,
            seq,
            message,
        });
    }

    /// Move messages whose time has come from scheduled to ready.
    fn promote_scheduled(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.scheduled.peek() {
            if entry.due > now {
                break; // Heap is sorted, so we can stop
            }
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.message);
            }
        }
    }
}

/// In-memory delivery transport with delayed redelivery and a dead-letter path.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
    ready_notify: Notify,
    dead_letter_notify: Notify,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw body as a fresh delivery (tests, bridging other transports).
    pub async fn push_raw(&self, body: Vec<u8>) {
        self.state
            .lock()
            .await
            .push(ReceivedMessage::new(body), Duration::ZERO);
        self.ready_notify.notify_one();
    }

    pub async fn depths(&self) -> QueueDepths {
        let state = self.state.lock().await;
        QueueDepths {
            ready: state.ready.len(),
            scheduled: state.scheduled.len(),
            dead_letters: state.dead_letters.len(),
            quarantined: state.quarantined.len(),
        }
    }

    pub async fn quarantined(&self) -> Vec<QuarantinedMessage> {
        self.state.lock().await.quarantined.clone()
    }

    /// Non-blocking receive: the next due delivery, if any.
    pub async fn try_receive(&self) -> Option<ReceivedMessage> {
        let mut state = self.state.lock().await;
        state.promote_scheduled();
        state.ready.pop_front()
    }

    /// Non-blocking receive from the dead-letter path.
    pub async fn try_receive_dead_letter(&self) -> Option<ReceivedMessage> {
        self.state.lock().await.dead_letters.pop_front()
    }

    /// Decoded view of what is currently waiting (ready and scheduled).
    pub async fn pending_deliveries(&self) -> Vec<Delivery> {
        let state = self.state.lock().await;
        state
            .ready
            .iter()
            .chain(state.scheduled.iter().map(|s| &s.message))
            .filter_map(|m| Delivery::decode(&m.body).ok())
            .collect()
    }

    /// Decoded view of the dead-letter path.
    pub async fn dead_letters(&self) -> Vec<DeadLetterEnvelope> {
        let state = self.state.lock().await;
        state
            .dead_letters
            .iter()
            .filter_map(|m| DeadLetterEnvelope::decode(&m.body).ok())
            .collect()
    }

    async fn push(&self, message: ReceivedMessage, delay: Duration) {
        self.state.lock().await.push(message, delay);
        // Wake a waiter even for delayed messages so it re-computes its wake time.
        self.ready_notify.notify_one();
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue_retry(&self, delivery: Delivery, delay: Duration) -> Result<(), QueueError> {
        let body = delivery.encode()?;
        debug!(
            task_id = %delivery.task_id,
            attempt_count = delivery.attempt_count,
            delay_secs = delay.as_secs(),
            "enqueued delivery"
        );
        self.push(ReceivedMessage::new(body), delay).await;
        Ok(())
    }

    async fn enqueue_dead_letter(&self, envelope: DeadLetterEnvelope) -> Result<(), QueueError> {
        let body = envelope.encode()?;
        self.state
            .lock()
            .await
            .dead_letters
            .push_back(ReceivedMessage::new(body));
        self.dead_letter_notify.notify_one();
        debug!(task_id = %envelope.task_id, reason = %envelope.reason, "enqueued dead letter");
        Ok(())
    }
}

#[async_trait]
impl DeliveryTransport for InMemoryTaskQueue {
    async fn receive(&self) -> ReceivedMessage {
        loop {
            let next_wake = {
                let mut state = self.state.lock().await;
                state.promote_scheduled();
                if let Some(message) = state.ready.pop_front() {
                    return message;
                }
                state.scheduled.peek().map(|entry| entry.due)
            };

            // Wait for a push OR the next scheduled message
            if let Some(wake_time) = next_wake {
                tokio::select! {
                    _ = self.ready_notify.notified() => {},
                    _ = tokio::time::sleep_until(wake_time) => {},
                }
            } else {
                self.ready_notify.notified().await;
            }
        }
    }

    async fn receive_dead_letter(&self) -> ReceivedMessage {
        loop {
            if let Some(message) = self.state.lock().await.dead_letters.pop_front() {
                return message;
            }
            self.dead_letter_notify.notified().await;
        }
    }

    async fn release(&self, message: ReceivedMessage, delay: Duration) -> Result<(), QueueError> {
        let message = ReceivedMessage {
            receive_count: message.receive_count.saturating_add(1),
            ..message
        };
        self.push(message, delay).await;
        Ok(())
    }

    async fn quarantine(&self, message: ReceivedMessage, reason: String) -> Result<(), QueueError> {
        warn!(
            receive_count = message.receive_count,
            reason = %reason,
            body = %String::from_utf8_lossy(&message.body),
            "quarantined delivery"
        );
        self.state.lock().await.quarantined.push(QuarantinedMessage {
            body: message.body,
            receive_count: message.receive_count,
            reason,
        });
        Ok(())
    }
}
