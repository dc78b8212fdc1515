//! InMemoryTaskStore - 開発・テスト用の正本
//!
//! - `Mutex<HashMap<TaskId, TaskRecord>>` で管理
//! - 1 操作 = 1 回のロック。ロックを持ったまま await しない
//! - 状態遷移のチェックは `TaskRecord` 側（compare-and-set 相当）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{StoreError, TaskId, TaskRecord, TaskStatus};
use crate::ports::{Clock, SystemClock, TaskStore};

/// In-memory task store. Every operation is atomic per key.
pub struct InMemoryTaskStore {
    records: Mutex<HashMap<TaskId, TaskRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task_id: TaskId, payload: String) -> Result<TaskRecord, StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&task_id) {
            return Err(StoreError::AlreadyExists(task_id));
        }
        let record = TaskRecord::new(task_id.clone(), payload, self.clock.now());
        records.insert(task_id.clone(), record.clone());
        debug!(%task_id, "created task record");
        Ok(record)
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.lock().await.get(task_id).cloned())
    }

    async fn set_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))?;
        record.transition(status, error, self.clock.now())?;
        debug!(%task_id, %status, "updated task status");
        Ok(())
    }

    async fn increment_attempt_count(&self, task_id: &TaskId) -> Result<u32, StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))?;
        let count = record.increment_attempt_count(self.clock.now())?;
        debug!(%task_id, attempt_count = count, "incremented attempt count");
        Ok(count)
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut all: Vec<TaskRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{Duration, TimeZone, Utc};

    fn id(s: &str) -> TaskId {
        TaskId::new(s).unwrap()
    }

    fn fixed_store() -> (InMemoryTaskStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        (InMemoryTaskStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = InMemoryTaskStore::default();
        let created = store.create(id("t1"), "p".into()).await.unwrap();
        assert_eq!(created.status, TaskStatus::Pending);

        let fetched = store.get(&id("t1")).await.unwrap();
        assert_eq!(fetched, Some(created));
        assert_eq!(store.get(&id("nope")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = InMemoryTaskStore::default();
        store.create(id("t1"), "a".into()).await.unwrap();
        let err = store.create(id("t1"), "b".into()).await.unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists(id("t1")));

        // the original payload is untouched
        let r = store.get(&id("t1")).await.unwrap().unwrap();
        assert_eq!(r.payload, "a");
    }

    #[tokio::test]
    async fn set_status_on_unknown_task_is_not_found() {
        let store = InMemoryTaskStore::default();
        let err = store
            .set_status(&id("ghost"), TaskStatus::Processing, None)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound(id("ghost")));
    }

    #[tokio::test]
    async fn set_status_updates_timestamp_from_clock() {
        let (store, clock) = fixed_store();
        store.create(id("t1"), "p".into()).await.unwrap();
        clock.advance(Duration::seconds(10));

        store
            .set_status(&id("t1"), TaskStatus::Processing, Some("started"))
            .await
            .unwrap();

        let r = store.get(&id("t1")).await.unwrap().unwrap();
        assert_eq!(r.status, TaskStatus::Processing);
        assert_eq!(r.last_error.as_deref(), Some("started"));
        assert_eq!(r.updated_at, r.created_at + Duration::seconds(10));
    }

    #[tokio::test]
    async fn failed_is_terminal_for_status_and_attempts() {
        let store = InMemoryTaskStore::default();
        store.create(id("t1"), "p".into()).await.unwrap();
        store
            .set_status(&id("t1"), TaskStatus::Failed, Some("gave up"))
            .await
            .unwrap();

        assert!(matches!(
            store.set_status(&id("t1"), TaskStatus::Pending, None).await,
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.increment_attempt_count(&id("t1")).await,
            Err(StoreError::Terminal { .. })
        ));

        let r = store.get(&id("t1")).await.unwrap().unwrap();
        assert_eq!(r.status, TaskStatus::Failed);
        assert_eq!(r.attempt_count, 0);
        assert_eq!(r.last_error.as_deref(), Some("gave up"));
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryTaskStore::default());
        store.create(id("t1"), "p".into()).await.unwrap();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment_attempt_count(&id("t1")).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let r = store.get(&id("t1")).await.unwrap().unwrap();
        assert_eq!(r.attempt_count, 50);
    }

    #[tokio::test]
    async fn list_is_ordered_oldest_first() {
        let (store, clock) = fixed_store();
        store.create(id("b"), "1".into()).await.unwrap();
        clock.advance(Duration::seconds(1));
        store.create(id("a"), "2".into()).await.unwrap();
        store.create(id("c"), "3".into()).await.unwrap();

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.task_id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(store.len().await, 3);
    }
}
