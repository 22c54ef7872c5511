//! In-memory store. Backs the engine's integration tests and local
//! experiments; claim atomicity comes from the map lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::kind::WorkKind;
use crate::model::{ItemId, Status, WorkItem};

use super::{HistoryRecord, HistorySink, QueueCounts, Store};

pub struct MemoryStore<K: WorkKind> {
    items: Mutex<HashMap<ItemId, WorkItem<K::Payload>>>,
    _kind: PhantomData<K>,
}

impl<K: WorkKind> MemoryStore<K> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            _kind: PhantomData,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ItemId, WorkItem<K::Payload>>> {
        // Lock poisoning only happens when a holder panicked; the data
        // is plain-old state, so recover it.
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K: WorkKind> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: WorkKind> Store<K> for MemoryStore<K> {
    async fn insert_many(&self, items: Vec<WorkItem<K::Payload>>) -> Result<()> {
        let mut map = self.lock();
        for item in items {
            map.insert(item.id, item);
        }
        Ok(())
    }

    async fn get(&self, id: ItemId) -> Result<WorkItem<K::Payload>> {
        self.lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))
    }

    async fn claim_one(
        &self,
        assignee: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem<K::Payload>>> {
        let mut map = self.lock();

        let next = map
            .values()
            .filter(|item| {
                item.status == Status::Pending
                    && item.next_retry_at.is_none_or(|at| at <= now)
            })
            .min_by_key(|item| (item.priority, item.created_at, item.id.0))
            .map(|item| item.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let item = map.get_mut(&id).ok_or_else(|| {
            Error::NotFound(format!("work item {id}"))
        })?;
        item.status = Status::Processing;
        item.assignee = Some(assignee.to_string());
        item.claimed_at = Some(now);
        item.last_heartbeat_at = Some(now);
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn heartbeat(
        &self,
        id: ItemId,
        assignee: &str,
        progress: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<WorkItem<K::Payload>> {
        let mut map = self.lock();
        let item = map.get_mut(&id).filter(|item| {
            item.status == Status::Processing && item.assignee.as_deref() == Some(assignee)
        });

        let Some(item) = item else {
            return Err(Error::NotFound(format!(
                "work item {id} is not processing under assignee {assignee}"
            )));
        };

        item.last_heartbeat_at = Some(now);
        if progress.is_some() {
            item.progress = progress;
        }
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn delete(&self, id: ItemId) -> Result<bool> {
        Ok(self.lock().remove(&id).is_some())
    }

    async fn reschedule(
        &self,
        id: ItemId,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut map = self.lock();
        let item = map
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))?;
        item.status = Status::Pending;
        item.assignee = None;
        item.claimed_at = None;
        item.retry_count = retry_count;
        item.next_retry_at = Some(next_retry_at);
        item.last_error = Some(error.to_string());
        item.updated_at = now;
        Ok(())
    }

    async fn mark_failed(&self, id: ItemId, error: &str, now: DateTime<Utc>) -> Result<()> {
        let mut map = self.lock();
        let item = map
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))?;
        item.status = Status::Failed;
        item.assignee = None;
        item.claimed_at = None;
        item.next_retry_at = None;
        item.last_error = Some(error.to_string());
        item.updated_at = now;
        Ok(())
    }

    async fn release_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let mut map = self.lock();
        let mut released = 0;
        for item in map.values_mut() {
            if item.status != Status::Processing {
                continue;
            }
            let last_seen = item
                .last_heartbeat_at
                .or(item.claimed_at)
                .unwrap_or(item.created_at);
            if last_seen < cutoff {
                item.status = Status::Pending;
                item.assignee = None;
                item.claimed_at = None;
                item.next_retry_at = None;
                item.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn purge_failed(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, item| !(item.status == Status::Failed && item.updated_at < cutoff));
        Ok((before - map.len()) as u64)
    }

    async fn list_active(&self, limit: i64) -> Result<Vec<WorkItem<K::Payload>>> {
        let map = self.lock();
        let mut items: Vec<_> = map
            .values()
            .filter(|item| !item.status.is_terminal())
            .cloned()
            .collect();
        items.sort_by_key(|item| item.updated_at);
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem<K::Payload>>> {
        let map = self.lock();
        let mut items: Vec<_> = map
            .values()
            .filter(|item| status.is_none_or(|s| item.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let map = self.lock();
        let mut counts = QueueCounts::default();
        for item in map.values() {
            match item.status {
                Status::Pending => counts.pending += 1,
                Status::Processing => counts.processing += 1,
                Status::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

/// History sink that keeps records in memory, with an accessor for
/// assertions.
#[derive(Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn record(&self, record: HistoryRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }
}
