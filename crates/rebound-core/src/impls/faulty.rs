//! Fault injection wrappers for `TaskStore` / `TaskQueue`.
//!
//! 部分障害（store は成功したが queue が失敗した、など）を再現するために使う。
//! 障害は操作ごとに on/off できる。

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    DeadLetterEnvelope, Delivery, QueueError, StoreError, TaskId, TaskRecord, TaskStatus,
};
use crate::ports::{TaskQueue, TaskStore};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Get,
    /// Writes of this particular status.
    SetStatus(TaskStatus),
    Increment,
    List,
}

/// Queue operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOp {
    /// `enqueue` and `enqueue_retry`.
    Enqueue,
    DeadLetter,
}

#[derive(Debug)]
struct Faults<T> {
    failing: Mutex<HashSet<T>>,
}

impl<T: Eq + std::hash::Hash> Faults<T> {
    fn new() -> Self {
        Self {
            failing: Mutex::new(HashSet::new()),
        }
    }

    fn set(&self, op: T, failing: bool) {
        let mut set = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing {
            set.insert(op);
        } else {
            set.remove(&op);
        }
    }

    fn is_failing(&self, op: &T) -> bool {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(op)
    }
}

/// A `TaskStore` that fails selected operations with `StoreError::Unavailable`.
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: S,
    faults: Faults<StoreOp>,
}

impl<S: TaskStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Faults::new(),
        }
    }

    pub fn fail(&self, op: StoreOp) {
        self.faults.set(op, true);
    }

    pub fn heal(&self, op: StoreOp) {
        self.faults.set(op, false);
    }

    /// The wrapped store, bypassing fault injection.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        if self.faults.is_failing(&op) {
            return Err(StoreError::Unavailable(format!("injected fault on {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: TaskStore> TaskStore for FaultyStore<S> {
    async fn create(&self, task_id: TaskId, payload: String) -> Result<TaskRecord, StoreError> {
        self.check(StoreOp::Create)?;
        self.inner.create(task_id, payload).await
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.check(StoreOp::Get)?;
        self.inner.get(task_id).await
    }

    async fn set_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.check(StoreOp::SetStatus(status))?;
        self.inner.set_status(task_id, status, error).await
    }

    async fn increment_attempt_count(&self, task_id: &TaskId) -> Result<u32, StoreError> {
        self.check(StoreOp::Increment)?;
        self.inner.increment_attempt_count(task_id).await
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.check(StoreOp::List)?;
        self.inner.list().await
    }
}

/// A `TaskQueue` that fails selected operations with `QueueError::Unavailable`.
#[derive(Debug)]
pub struct FaultyQueue<Q> {
    inner: Q,
    faults: Faults<QueueOp>,
}

impl<Q: TaskQueue> FaultyQueue<Q> {
    pub fn new(inner: Q) -> Self {
        Self {
            inner,
            faults: Faults::new(),
        }
    }

    pub fn fail(&self, op: QueueOp) {
        self.faults.set(op, true);
    }

    pub fn heal(&self, op: QueueOp) {
        self.faults.set(op, false);
    }

    pub fn inner(&self) -> &Q {
        &self.inner
    }

    fn check(&self, op: QueueOp) -> Result<(), QueueError> {
        if self.faults.is_failing(&op) {
            return Err(QueueError::Unavailable(format!("injected fault on {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl<Q: TaskQueue> TaskQueue for FaultyQueue<Q> {
    async fn enqueue_retry(&self, delivery: Delivery, delay: Duration) -> Result<(), QueueError> {
        self.check(QueueOp::Enqueue)?;
        self.inner.enqueue_retry(delivery, delay).await
    }

    async fn enqueue_dead_letter(&self, envelope: DeadLetterEnvelope) -> Result<(), QueueError> {
        self.check(QueueOp::DeadLetter)?;
        self.inner.enqueue_dead_letter(envelope).await
    }
}
