//! Storage seams for the engine.
//!
//! The engine takes a store handle at construction — nothing is looked
//! up from process-global state. [`postgres`] is the production backend;
//! [`memory`] backs the integration tests and local experiments.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::kind::WorkKind;
use crate::model::{ItemId, Status, WorkItem};

/// Persistence primitives for one queue kind. Mutual exclusion between
/// workers is the store's responsibility: `claim_one` must be atomic
/// under concurrent callers (filter-on-write), never relying on
/// in-process locks of the caller.
#[async_trait]
pub trait Store<K: WorkKind>: Send + Sync {
    /// Bulk-insert fully populated items. The only way new pending work
    /// enters the system.
    async fn insert_many(&self, items: Vec<WorkItem<K::Payload>>) -> Result<()>;

    async fn get(&self, id: ItemId) -> Result<WorkItem<K::Payload>>;

    /// Atomically claim the next eligible pending item for `assignee`,
    /// or None when the queue is drained. Eligible means pending with
    /// `next_retry_at` unset or passed; claim order is
    /// `(priority ASC, created_at ASC)`.
    async fn claim_one(
        &self,
        assignee: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem<K::Payload>>>;

    /// Refresh the heartbeat (and optionally progress) of an item held
    /// by `assignee`. Fails with NotFound when the item is not
    /// processing under that assignee.
    async fn heartbeat(
        &self,
        id: ItemId,
        assignee: &str,
        progress: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<WorkItem<K::Payload>>;

    /// Remove an item from the active queue. Returns false when it was
    /// already gone.
    async fn delete(&self, id: ItemId) -> Result<bool>;

    /// Re-arm a failed attempt: back to pending with the new retry
    /// count, a future `next_retry_at`, and the error message. Clears
    /// the claim.
    async fn reschedule(
        &self,
        id: ItemId,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Terminal failure: `status=failed`, claim cleared, error recorded.
    /// The row remains (not claimable) until the sweep purges it.
    async fn mark_failed(&self, id: ItemId, error: &str, now: DateTime<Utc>) -> Result<()>;

    /// Reset processing items whose heartbeat (falling back to claim
    /// time, then creation time) predates `cutoff` back to pending,
    /// clearing the claim and `next_retry_at`. Returns the released
    /// count.
    async fn release_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64>;

    /// Delete failed items whose last update predates `cutoff`.
    async fn purge_failed(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Non-terminal items, oldest-updated first, for the sweep's
    /// structural validation pass.
    async fn list_active(&self, limit: i64) -> Result<Vec<WorkItem<K::Payload>>>;

    /// Items filtered by status (or all), newest first. Operator tooling.
    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem<K::Payload>>>;

    /// Row counts per status. Operator tooling.
    async fn counts(&self) -> Result<QueueCounts>;
}

/// Per-status row counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
}

/// Immutable audit entry describing the outcome of one processing
/// attempt (or one externally reported terminal outcome).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HistoryRecord {
    pub id: ItemId,
    /// Queue kind name ([`WorkKind::NAME`]).
    pub queue: String,
    pub item_id: ItemId,
    pub owner_id: uuid::Uuid,
    pub outcome: HistoryOutcome,
    pub error: Option<String>,
    /// Retry count at the time of the attempt.
    pub retry_count: u32,
    /// Executor result for successful attempts, when one was produced.
    pub result: Option<serde_json::Value>,
    /// Payload snapshot for reporting.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Outcome recorded in history. `Sent` covers the delivery queue's
/// successful send; `Completed` the command queue's successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Sent,
    Completed,
    Failed,
}

impl HistoryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryOutcome::Sent => "sent",
            HistoryOutcome::Completed => "completed",
            HistoryOutcome::Failed => "failed",
        }
    }
}

/// Sink for history records. Append-only.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, record: HistoryRecord) -> Result<()>;
}
