//! TaskProcessor - 1 件の delivery を処理する状態機械
//!
//! # フロー
//! 1. status を PROCESSING に（best-effort）
//! 2. unit of work を実行（失敗 = Err または panic）
//! 3. 成功: PROCESSED
//! 4. 失敗: BackoffPolicy で判定
//!    - retry: attempt count を increment → 遅延付きで再 enqueue → PENDING
//!    - give up: dead-letter へ enqueue → FAILED
//! 5. delivery 自体が壊れている: 何も書き換えずに Err を返す（transport の poison 処理へ）
//!
//! 同じタスクへの重複 delivery は直列化しない。attempt count の整合は store の
//! atomic increment と状態遷移チェックに任せる。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    BackoffPolicy, DeadLetterEnvelope, Decision, Delivery, ProcessError, RETRIES_EXHAUSTED,
    StoreError, TaskId, TaskStatus, WorkError,
};
use crate::ports::{Clock, SystemClock, TaskQueue, TaskStore, UnitOfWork};

/// What happened to a delivery that was handled without a transport-level error.
///
/// Every variant means "acknowledge the delivery".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,

    RetryScheduled {
        next_attempt_count: u32,
        delay: Duration,
    },

    DeadLettered {
        attempt_count: u32,
    },

    /// The task had already reached a terminal status (e.g. through a
    /// duplicate delivery) before this attempt could record its result.
    AlreadyTerminal {
        status: TaskStatus,
    },
}

/// Consumes deliveries one at a time. Cheap to share behind an `Arc`.
pub struct TaskProcessor {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    work: Arc<dyn UnitOfWork>,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl TaskProcessor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn TaskQueue>,
        work: Arc<dyn UnitOfWork>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            work,
            policy,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock used for dead-letter timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Decode a raw transport body and process it.
    ///
    /// An undecodable body is returned as `ProcessError::MalformedDelivery`
    /// without touching any task record.
    pub async fn process_raw(&self, body: &[u8]) -> Result<ProcessOutcome, ProcessError> {
        let delivery = Delivery::decode(body).inspect_err(|err| {
            warn!(error = %err, "delivery cannot be attributed to a task");
        })?;
        self.process(delivery).await
    }

    /// Run one attempt and carry out the resulting decision.
    ///
    /// `Err` means the transport should redeliver (store/queue fault on a
    /// step that must not be lost) or poison-handle the delivery.
    #[instrument(
        name = "process_delivery",
        skip_all,
        fields(task_id = %delivery.task_id, attempt_count = delivery.attempt_count)
    )]
    pub async fn process(&self, delivery: Delivery) -> Result<ProcessOutcome, ProcessError> {
        info!(attempt = delivery.attempt_count.saturating_add(1), "processing task");
        self.mark(&delivery.task_id, TaskStatus::Processing, None)
            .await;

        match self.run_work(&delivery.payload).await {
            Ok(()) => self.on_success(&delivery.task_id).await,
            Err(err) => {
                warn!(error = %err, "attempt failed");
                self.on_failure(&delivery, &err).await
            }
        }
    }

    async fn on_success(&self, task_id: &TaskId) -> Result<ProcessOutcome, ProcessError> {
        match self.store.set_status(task_id, TaskStatus::Processed, None).await {
            Ok(()) => {
                info!("task processed");
                Ok(ProcessOutcome::Processed)
            }
            // a duplicate delivery or the monitor got there first
            Err(StoreError::InvalidTransition { from, .. }) if from.is_terminal() => {
                info!(status = %from, "work succeeded but task already terminal");
                Ok(ProcessOutcome::AlreadyTerminal { status: from })
            }
            Err(err) => {
                warn!(error = %err, "status write failed; continuing");
                Ok(ProcessOutcome::Processed)
            }
        }
    }

    async fn on_failure(
        &self,
        delivery: &Delivery,
        err: &WorkError,
    ) -> Result<ProcessOutcome, ProcessError> {
        let decision = self.policy.decide(delivery.attempt_count);
        let note = decision.note(&err.0);

        match decision {
            Decision::Retry {
                delay,
                next_attempt_count,
            } => {
                match self.store.increment_attempt_count(&delivery.task_id).await {
                    Ok(stored) => {
                        debug!(stored_attempt_count = stored, "attempt count incremented")
                    }
                    Err(StoreError::Terminal { status, .. }) => {
                        info!(%status, "task already terminal; dropping retry");
                        return Ok(ProcessOutcome::AlreadyTerminal { status });
                    }
                    Err(store_err) => {
                        error!(error = %store_err, "could not increment attempt count");
                        return Err(store_err.into());
                    }
                }

                if let Err(queue_err) = self
                    .queue
                    .enqueue_retry(delivery.next_attempt(), delay)
                    .await
                {
                    error!(error = %queue_err, "could not enqueue retry");
                    return Err(queue_err.into());
                }

                info!(next_attempt_count, delay_secs = delay.as_secs(), "retry scheduled");
                self.mark(&delivery.task_id, TaskStatus::Pending, Some(&note))
                    .await;
                Ok(ProcessOutcome::RetryScheduled {
                    next_attempt_count,
                    delay,
                })
            }
            Decision::GiveUp { attempt_count, .. } => {
                let envelope = DeadLetterEnvelope::from_delivery(
                    delivery,
                    RETRIES_EXHAUSTED,
                    self.clock.now(),
                );

                // Both writes are attempted; the dead-letter monitor repairs a
                // missing FAILED status, but nothing repairs a lost envelope.
                let enqueued = self.queue.enqueue_dead_letter(envelope).await;
                if let Err(queue_err) = &enqueued {
                    error!(error = %queue_err, "could not enqueue dead letter");
                }
                self.mark(&delivery.task_id, TaskStatus::Failed, Some(&note))
                    .await;
                enqueued?;

                warn!(attempt_count, "retries exhausted; task dead-lettered");
                Ok(ProcessOutcome::DeadLettered { attempt_count })
            }
        }
    }

    /// Run the unit of work on its own task so a panic counts as a failed attempt.
    async fn run_work(&self, payload: &str) -> Result<(), WorkError> {
        let work = Arc::clone(&self.work);
        let payload = payload.to_owned();
        match tokio::spawn(async move { work.run(&payload).await }).await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => Err(WorkError::new(format!(
                "unit of work panicked: {}",
                panic_message(join_err.into_panic())
            ))),
            Err(join_err) => Err(WorkError::new(format!("unit of work aborted: {join_err}"))),
        }
    }

    /// Best-effort status write. Failures are logged, never returned.
    async fn mark(&self, task_id: &TaskId, status: TaskStatus, note: Option<&str>) {
        if let Err(err) = self.store.set_status(task_id, status, note).await {
            warn!(%status, error = %err, "status write failed; continuing");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueError, TaskRecord};
    use crate::impls::{
        FaultyQueue, FaultyStore, InMemoryTaskQueue, InMemoryTaskStore, QueueOp, ScriptedWork,
        Step, StoreOp,
    };
    use rstest::rstest;

    struct Harness {
        store: Arc<FaultyStore<InMemoryTaskStore>>,
        queue: Arc<FaultyQueue<InMemoryTaskQueue>>,
        work: Arc<ScriptedWork>,
        processor: TaskProcessor,
    }

    impl Harness {
        fn new(steps: Vec<Step>) -> Self {
            Self::with_policy(steps, BackoffPolicy::default())
        }

        fn with_policy(steps: Vec<Step>, policy: BackoffPolicy) -> Self {
            let store = Arc::new(FaultyStore::new(InMemoryTaskStore::default()));
            let queue = Arc::new(FaultyQueue::new(InMemoryTaskQueue::new()));
            let work = Arc::new(ScriptedWork::new(steps));
            let processor = TaskProcessor::new(store.clone(), queue.clone(), work.clone(), policy);
            Self {
                store,
                queue,
                work,
                processor,
            }
        }

        async fn submit(&self, id: &str) -> Delivery {
            let task_id = TaskId::new(id).unwrap();
            self.store
                .inner()
                .create(task_id.clone(), format!("payload-{id}"))
                .await
                .unwrap();
            Delivery::initial(task_id, format!("payload-{id}"))
        }

        async fn record(&self, id: &str) -> TaskRecord {
            self.store
                .inner()
                .get(&TaskId::new(id).unwrap())
                .await
                .unwrap()
                .unwrap()
        }
    }

    fn fail(msg: &str) -> Step {
        Step::Fail(msg.to_string())
    }

    #[tokio::test]
    async fn success_marks_processed() {
        let h = Harness::new(vec![]);
        let d = h.submit("t1").await;

        let outcome = h.processor.process(d).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Processed);
        let r = h.record("t1").await;
        assert_eq!(r.status, TaskStatus::Processed);
        assert_eq!(r.attempt_count, 0);
        assert_eq!(h.work.payloads(), vec!["payload-t1"]);
        assert_eq!(h.queue.inner().depths().await, Default::default());
    }

    #[tokio::test]
    async fn first_failure_schedules_retry_with_base_delay() {
        let h = Harness::new(vec![fail("flaky")]);
        let d = h.submit("t1").await;

        let outcome = h.processor.process(d).await.unwrap();

        assert_eq!(
            outcome,
            ProcessOutcome::RetryScheduled {
                next_attempt_count: 1,
                delay: Duration::from_secs(2),
            }
        );
        let r = h.record("t1").await;
        assert_eq!(r.status, TaskStatus::Pending);
        assert_eq!(r.attempt_count, 1);
        assert_eq!(
            r.last_error.as_deref(),
            Some("retry 1 scheduled in 2s after: flaky")
        );

        let pending = h.queue.inner().pending_deliveries().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt_count, 1);
        assert_eq!(pending[0].payload, "payload-t1");
        assert_eq!(h.queue.inner().depths().await.scheduled, 1);
    }

    #[rstest]
    #[case(0, 2)]
    #[case(1, 4)]
    #[tokio::test]
    async fn retry_delay_uses_delivered_attempt_count(#[case] attempt: u32, #[case] secs: u64) {
        let h = Harness::new(vec![fail("x")]);
        let mut d = h.submit("t1").await;
        d.attempt_count = attempt;

        let outcome = h.processor.process(d).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::RetryScheduled {
                next_attempt_count: attempt + 1,
                delay: Duration::from_secs(secs),
            }
        );
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_and_fail() {
        let h = Harness::new(vec![fail("still broken")]);
        let mut d = h.submit("t1").await;
        d.attempt_count = 2;

        let outcome = h.processor.process(d).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::DeadLettered { attempt_count: 2 });
        let r = h.record("t1").await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert_eq!(r.attempt_count, 0, "give-up path does not increment");
        assert!(r.last_error.unwrap().contains("still broken"));

        let dead = h.queue.inner().dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, RETRIES_EXHAUSTED);
        assert_eq!(dead[0].attempt_count, 2);
        assert_eq!(dead[0].payload, "payload-t1");
        assert!(h.queue.inner().pending_deliveries().await.is_empty());
    }

    #[tokio::test]
    async fn zero_max_retries_dead_letters_first_failure() {
        let policy = BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(900), 0);
        let h = Harness::with_policy(vec![fail("x")], policy);
        let d = h.submit("t1").await;

        let outcome = h.processor.process(d).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::DeadLettered { attempt_count: 0 });
    }

    #[tokio::test]
    async fn panicking_work_counts_as_failed_attempt() {
        let h = Harness::new(vec![Step::Panic("kaboom".into())]);
        let d = h.submit("t1").await;

        let outcome = h.processor.process(d).await.unwrap();

        assert!(matches!(outcome, ProcessOutcome::RetryScheduled { .. }));
        let r = h.record("t1").await;
        assert!(r.last_error.unwrap().contains("panicked: kaboom"));
    }

    #[rstest]
    #[case::garbage(&b"%%%"[..])]
    #[case::no_task_id(&br#"{"payload":"x","attemptCount":0}"#[..])]
    #[case::blank_task_id(&br#"{"taskId":"","payload":"x","attemptCount":0}"#[..])]
    #[tokio::test]
    async fn malformed_delivery_is_returned_untouched(#[case] body: &[u8]) {
        let h = Harness::new(vec![]);
        h.submit("t1").await;
        let before = h.record("t1").await;

        let err = h.processor.process_raw(body).await.unwrap_err();

        assert!(err.is_poison());
        assert_eq!(h.record("t1").await, before);
        assert_eq!(h.work.calls(), 0);
        assert_eq!(h.queue.inner().depths().await, Default::default());
    }

    #[tokio::test]
    async fn processing_marker_failure_does_not_stop_the_attempt() {
        let h = Harness::new(vec![]);
        h.store.fail(StoreOp::SetStatus(TaskStatus::Processing));
        let d = h.submit("t1").await;

        let outcome = h.processor.process(d).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Processed);
        assert_eq!(h.work.calls(), 1);
        assert_eq!(h.record("t1").await.status, TaskStatus::Processed);
    }

    #[tokio::test]
    async fn increment_failure_is_returned_before_enqueue() {
        let h = Harness::new(vec![fail("x")]);
        h.store.fail(StoreOp::Increment);
        let d = h.submit("t1").await;

        let err = h.processor.process(d).await.unwrap_err();

        assert!(matches!(err, ProcessError::Store(StoreError::Unavailable(_))));
        assert!(h.queue.inner().pending_deliveries().await.is_empty());
        assert_eq!(h.record("t1").await.attempt_count, 0);
    }

    #[tokio::test]
    async fn retry_enqueue_failure_is_returned_after_increment() {
        let h = Harness::new(vec![fail("x")]);
        h.queue.fail(QueueOp::Enqueue);
        let d = h.submit("t1").await;

        let err = h.processor.process(d).await.unwrap_err();

        assert!(matches!(err, ProcessError::Queue(QueueError::Unavailable(_))));
        let r = h.record("t1").await;
        assert_eq!(r.attempt_count, 1);
        // no PENDING note: the retry was never scheduled
        assert_eq!(r.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn pending_marker_failure_still_acknowledges_retry() {
        let h = Harness::new(vec![fail("x")]);
        h.store.fail(StoreOp::SetStatus(TaskStatus::Pending));
        let d = h.submit("t1").await;

        let outcome = h.processor.process(d).await.unwrap();

        assert!(matches!(outcome, ProcessOutcome::RetryScheduled { .. }));
        assert_eq!(h.queue.inner().pending_deliveries().await.len(), 1);
    }

    #[tokio::test]
    async fn dead_letter_enqueue_failure_still_writes_failed() {
        let h = Harness::new(vec![fail("x")]);
        h.queue.fail(QueueOp::DeadLetter);
        let mut d = h.submit("t1").await;
        d.attempt_count = 2;

        let err = h.processor.process(d).await.unwrap_err();

        assert!(matches!(err, ProcessError::Queue(_)));
        assert_eq!(h.record("t1").await.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn failed_status_write_still_dead_letters() {
        let h = Harness::new(vec![fail("x")]);
        h.store.fail(StoreOp::SetStatus(TaskStatus::Failed));
        let mut d = h.submit("t1").await;
        d.attempt_count = 2;

        let outcome = h.processor.process(d).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::DeadLettered { attempt_count: 2 });
        assert_eq!(h.record("t1").await.status, TaskStatus::Processing);
        assert_eq!(h.queue.inner().dead_letters().await.len(), 1);
    }

    #[tokio::test]
    async fn failure_after_terminal_status_is_dropped() {
        let h = Harness::new(vec![fail("late duplicate")]);
        let d = h.submit("t1").await;
        h.store
            .inner()
            .set_status(&d.task_id, TaskStatus::Failed, Some("gave up"))
            .await
            .unwrap();

        let outcome = h.processor.process(d).await.unwrap();

        assert_eq!(
            outcome,
            ProcessOutcome::AlreadyTerminal {
                status: TaskStatus::Failed
            }
        );
        let r = h.record("t1").await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert_eq!(r.attempt_count, 0);
        assert_eq!(r.last_error.as_deref(), Some("gave up"));
        assert!(h.queue.inner().pending_deliveries().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_deliveries_each_run_the_work() {
        let h = Harness::new(vec![]);
        let d = h.submit("t1").await;

        let a = h.processor.process(d.clone());
        let b = h.processor.process(d);
        let (a, b) = tokio::join!(a, b);

        // whichever finishes second finds the task already processed
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, ProcessOutcome::AlreadyTerminal { .. }));
        assert_eq!(
            outcomes,
            vec![
                ProcessOutcome::Processed,
                ProcessOutcome::AlreadyTerminal {
                    status: TaskStatus::Processed
                },
            ]
        );
        assert_eq!(h.work.calls(), 2);
        assert_eq!(h.record("t1").await.status, TaskStatus::Processed);
    }

    #[tokio::test]
    async fn success_after_terminal_status_is_not_reported_as_processed() {
        let h = Harness::new(vec![]);
        let d = h.submit("t1").await;
        h.store
            .inner()
            .set_status(&d.task_id, TaskStatus::Failed, Some("gave up"))
            .await
            .unwrap();
        let before = h.record("t1").await;

        let outcome = h.processor.process(d).await.unwrap();

        assert_eq!(
            outcome,
            ProcessOutcome::AlreadyTerminal {
                status: TaskStatus::Failed
            }
        );
        assert_eq!(h.work.calls(), 1);
        assert_eq!(h.record("t1").await, before);
    }

    #[tokio::test]
    async fn success_with_lost_processed_write_is_still_processed() {
        let h = Harness::new(vec![]);
        h.store.fail(StoreOp::SetStatus(TaskStatus::Processed));
        let d = h.submit("t1").await;

        let outcome = h.processor.process(d).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Processed);
        assert_eq!(h.record("t1").await.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn max_attempt_count_is_logged_without_overflow() {
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::TRACE)
                .with_test_writer()
                .finish(),
        );
        let h = Harness::new(vec![]);
        h.submit("t1").await;

        let outcome = h
            .processor
            .process_raw(br#"{"taskId":"t1","payload":"p","attemptCount":4294967295}"#)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Processed);
        assert_eq!(h.work.payloads(), vec!["p"]);
    }
}
