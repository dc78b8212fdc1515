//! WorkerGroup - transport から delivery を受け取って processor / monitor に渡す
//!
//! - N 個の processor worker + 1 個の dead-letter worker
//! - `shutdown_tx` で全 worker が新しい delivery の受け取りをやめる
//! - 実行中の処理はキャンセルしない（終わるまで待つ）
//!
//! processor が `Err` を返した delivery の扱い:
//! - malformed: すぐ quarantine（再配送しても直らない）
//! - それ以外: `max_receive_count` までは release して再配送、超えたら quarantine

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::app::{DeadLetterMonitor, TaskProcessor};
use crate::ports::{DeliveryTransport, ReceivedMessage};

/// How the pool treats deliveries whose processing returned an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Receives allowed before a delivery is quarantined.
    pub max_receive_count: u32,

    /// Delay before a released delivery becomes visible again.
    pub delay: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_receive_count: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Worker group handle.
/// - `request_shutdown()` で受け取りを止める
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `workers` processor workers (at least one) and one dead-letter worker.
    pub fn spawn(
        workers: usize,
        transport: Arc<dyn DeliveryTransport>,
        processor: Arc<TaskProcessor>,
        monitor: Arc<DeadLetterMonitor>,
        redelivery: RedeliveryPolicy,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = workers.max(1);

        let mut joins = Vec::with_capacity(workers + 1);
        for worker_id in 0..workers {
            let transport = Arc::clone(&transport);
            let processor = Arc::clone(&processor);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(
                async move {
                    worker_loop(transport, processor, redelivery, &mut rx).await;
                }
                .instrument(info_span!("worker", worker_id)),
            );
            joins.push(join);
        }

        let mut rx = shutdown_rx;
        joins.push(tokio::spawn(
            async move {
                dead_letter_loop(transport, monitor, &mut rx).await;
            }
            .instrument(info_span!("dead_letter_worker")),
        ));

        Self { shutdown_tx, joins }
    }

    /// Stop taking new deliveries. In-flight processing is not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker task ended abnormally");
            }
        }
    }
}

async fn worker_loop(
    transport: Arc<dyn DeliveryTransport>,
    processor: Arc<TaskProcessor>,
    redelivery: RedeliveryPolicy,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // receive は待つので shutdown と競合させる
        let message = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            message = transport.receive() => message,
        };

        match processor.process_raw(&message.body).await {
            Ok(outcome) => debug!(?outcome, "delivery acknowledged"),
            Err(err) if err.is_poison() => {
                quarantine(transport.as_ref(), message, err.to_string()).await;
            }
            Err(err) if message.receive_count >= redelivery.max_receive_count => {
                let reason = format!(
                    "gave up after {} receives: {err}",
                    message.receive_count
                );
                quarantine(transport.as_ref(), message, reason).await;
            }
            Err(err) => {
                warn!(
                    error = %err,
                    receive_count = message.receive_count,
                    "processing failed; releasing for redelivery"
                );
                if let Err(queue_err) = transport.release(message, redelivery.delay).await {
                    error!(error = %queue_err, "release failed; delivery lost");
                }
            }
        }
    }
}

async fn dead_letter_loop(
    transport: Arc<dyn DeliveryTransport>,
    monitor: Arc<DeadLetterMonitor>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let message = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            message = transport.receive_dead_letter() => message,
        };

        // the monitor never fails; every dead letter is acknowledged
        let outcome = monitor.handle_raw(&message.body).await;
        debug!(?outcome, "dead letter acknowledged");
    }
}

async fn quarantine(transport: &dyn DeliveryTransport, message: ReceivedMessage, reason: String) {
    if let Err(err) = transport.quarantine(message, reason).await {
        error!(error = %err, "quarantine failed; delivery lost");
    }
}
