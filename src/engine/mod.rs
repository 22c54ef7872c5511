//! The generic queue engine.
//!
//! [`WorkQueue`] is the façade over one queue kind: enqueue, claim,
//! heartbeat, outcome reporting, and the liveness sweep. It owns the
//! lifecycle rules (status transitions, retry accounting, history);
//! the store underneath owns atomicity, and the pipeline on top owns
//! execution.

pub mod pipeline;
pub mod sweep;
pub mod worker;

pub use pipeline::{Credential, CredentialResolver, ExecError, Executor, Processor};
pub use sweep::Sweeper;
pub use worker::{ShutdownToken, Worker, WorkerConfig};

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::kind::WorkKind;
use crate::model::{ItemId, NewWorkItem, Status, WorkItem};
use crate::policy::{RetryDecision, RetryPolicy};
use crate::store::{HistoryOutcome, HistoryRecord, HistorySink, QueueCounts, Store};
use crate::telemetry::metrics;

/// Claim batch sizes are clamped to this range.
const CLAIM_LIMIT_RANGE: std::ops::RangeInclusive<usize> = 1..=100;

/// Default claim-ordering priority for new items (lower claims first).
const DEFAULT_PRIORITY: i32 = 3;

/// Parameters for one maintenance sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Interval between sweeps when run by a [`Sweeper`].
    pub interval: std::time::Duration,
    /// Processing items whose last heartbeat (or claim) is older than
    /// this are considered abandoned and released.
    pub staleness: chrono::Duration,
    /// Failed items untouched for longer than this are purged.
    pub retention: chrono::Duration,
    /// Max items examined by the structural-validation pass.
    pub batch: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(60),
            staleness: chrono::Duration::seconds(300),
            retention: chrono::Duration::days(7),
            batch: 50,
        }
    }
}

impl SweepConfig {
    /// Defaults with the staleness window the kind declares.
    pub fn for_kind<K: WorkKind>() -> Self {
        Self {
            staleness: chrono::Duration::seconds(K::SWEEP_STALENESS_SECS),
            ..Self::default()
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stuck processing items reset to pending.
    pub released: u64,
    /// Structurally invalid pending items marked failed.
    pub invalidated: u64,
    /// Failed items deleted past retention.
    pub purged: u64,
}

/// One queue: a store, a history sink, a clock, and a retry policy.
///
/// Everything is handed in at construction; the engine holds no global
/// state and two instances (delivery, commands) coexist in one process.
pub struct WorkQueue<K: WorkKind> {
    store: Arc<dyn Store<K>>,
    history: Arc<dyn HistorySink>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl<K: WorkKind> WorkQueue<K> {
    pub fn new(
        store: Arc<dyn Store<K>>,
        history: Arc<dyn HistorySink>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            history,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Enqueue one item. Structural validation happens here too, so a
    /// caller gets the rejection synchronously instead of finding a
    /// failed row later.
    pub async fn enqueue(&self, new: NewWorkItem<K::Payload>) -> Result<WorkItem<K::Payload>> {
        let mut items = self.enqueue_many(vec![new]).await?;
        Ok(items.pop().ok_or_else(|| {
            Error::Other("enqueue_many returned no items".into())
        })?)
    }

    /// Enqueue a batch in one store round-trip.
    pub async fn enqueue_many(
        &self,
        new: Vec<NewWorkItem<K::Payload>>,
    ) -> Result<Vec<WorkItem<K::Payload>>> {
        let now = self.clock.now();

        let mut items = Vec::with_capacity(new.len());
        for n in new {
            K::validate(&n.payload)
                .map_err(|reason| Error::InvalidPayload(format!("{}: {reason}", K::NAME)))?;

            items.push(WorkItem {
                id: ItemId::new(),
                owner_id: n.owner_id,
                status: Status::Pending,
                payload: n.payload,
                assignee: None,
                claimed_at: None,
                last_heartbeat_at: None,
                retry_count: 0,
                max_retries: n.max_retries.unwrap_or(self.policy.default_max_retries),
                next_retry_at: None,
                priority: n.priority.unwrap_or(DEFAULT_PRIORITY),
                progress: None,
                last_error: None,
                created_at: now,
                updated_at: now,
            });
        }

        self.store.insert_many(items.clone()).await?;

        metrics::items_enqueued().add(
            items.len() as u64,
            &[KeyValue::new("queue", K::NAME)],
        );
        tracing::debug!(queue = K::NAME, count = items.len(), "enqueued work items");
        Ok(items)
    }

    /// Claim up to `limit` eligible items for `assignee`. The limit is
    /// clamped to 1..=100; an empty assignee is rejected because the
    /// sweep could never attribute the claim.
    pub async fn claim_batch(
        &self,
        assignee: &str,
        limit: usize,
    ) -> Result<Vec<WorkItem<K::Payload>>> {
        if assignee.trim().is_empty() {
            return Err(Error::Other("assignee must not be empty".into()));
        }
        let limit = limit.clamp(*CLAIM_LIMIT_RANGE.start(), *CLAIM_LIMIT_RANGE.end());

        let mut claimed = Vec::new();
        for _ in 0..limit {
            match self.store.claim_one(assignee, self.clock.now()).await? {
                Some(item) => claimed.push(item),
                None => break,
            }
        }

        if !claimed.is_empty() {
            metrics::items_claimed().add(
                claimed.len() as u64,
                &[KeyValue::new("queue", K::NAME)],
            );
        }
        Ok(claimed)
    }

    /// Refresh liveness (and optionally progress) for an item held by
    /// `assignee`.
    pub async fn heartbeat(
        &self,
        id: ItemId,
        assignee: &str,
        progress: Option<serde_json::Value>,
    ) -> Result<WorkItem<K::Payload>> {
        self.store
            .heartbeat(id, assignee, progress, self.clock.now())
            .await
    }

    /// Report a successful attempt: record history, then delete the row.
    /// The history record is the durable evidence the work happened.
    ///
    /// A missing item is treated as already completed — the outcome was
    /// reported twice, and the first report won.
    pub async fn mark_succeeded(
        &self,
        id: ItemId,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        let item = match self.store.get(id).await {
            Ok(item) => item,
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        self.record_history(&item, K::SUCCESS_OUTCOME, None, result)
            .await?;
        self.store.delete(id).await?;

        metrics::item_outcomes().add(
            1,
            &[
                KeyValue::new("queue", K::NAME),
                KeyValue::new("outcome", "succeeded"),
            ],
        );
        tracing::info!(queue = K::NAME, item = %id, "work item succeeded");
        Ok(())
    }

    /// Report a failed attempt. The retry policy decides between
    /// rescheduling with backoff and terminal failure; either way a
    /// failure history record is written for the attempt.
    ///
    /// Reporting failure on an already-failed item is a no-op, so a
    /// duplicate report cannot resurrect a terminal row.
    pub async fn mark_failed_or_retry(&self, id: ItemId, error: &str) -> Result<RetryDecision> {
        let item = self.store.get(id).await?;
        if item.status == Status::Failed {
            return Ok(RetryDecision::Exhausted);
        }

        self.record_history(&item, HistoryOutcome::Failed, Some(error), None)
            .await?;

        let decision = self.policy.on_failure(item.retry_count, item.max_retries);
        let now = self.clock.now();
        match &decision {
            RetryDecision::Retry { retry_count, delay } => {
                self.store
                    .reschedule(id, *retry_count, now + *delay, error, now)
                    .await?;
                metrics::item_outcomes().add(
                    1,
                    &[
                        KeyValue::new("queue", K::NAME),
                        KeyValue::new("outcome", "retried"),
                    ],
                );
                tracing::warn!(
                    queue = K::NAME,
                    item = %id,
                    retry_count = retry_count,
                    delay_secs = delay.num_seconds(),
                    error = error,
                    "work item rescheduled"
                );
            }
            RetryDecision::Exhausted => {
                self.store.mark_failed(id, error, now).await?;
                metrics::item_outcomes().add(
                    1,
                    &[
                        KeyValue::new("queue", K::NAME),
                        KeyValue::new("outcome", "failed"),
                    ],
                );
                tracing::error!(
                    queue = K::NAME,
                    item = %id,
                    retries = item.retry_count,
                    error = error,
                    "work item failed terminally"
                );
            }
        }
        Ok(decision)
    }

    /// Fail an item without consuming retries. Used for defects that no
    /// amount of retrying fixes (invalid payload, revoked credential).
    pub async fn mark_failed_permanent(&self, id: ItemId, error: &str) -> Result<()> {
        let item = self.store.get(id).await?;
        if item.status == Status::Failed {
            return Ok(());
        }

        self.record_history(&item, HistoryOutcome::Failed, Some(error), None)
            .await?;
        self.store.mark_failed(id, error, self.clock.now()).await?;

        metrics::item_outcomes().add(
            1,
            &[
                KeyValue::new("queue", K::NAME),
                KeyValue::new("outcome", "failed"),
            ],
        );
        tracing::error!(queue = K::NAME, item = %id, error = error, "work item failed permanently");
        Ok(())
    }

    /// Release processing items whose heartbeat went stale. Returns the
    /// released count.
    pub async fn release_stuck(&self, staleness: chrono::Duration) -> Result<u64> {
        let now = self.clock.now();
        let released = self.store.release_stuck(now - staleness, now).await?;
        if released > 0 {
            metrics::items_released().add(released, &[KeyValue::new("queue", K::NAME)]);
            tracing::warn!(queue = K::NAME, released, "released stuck work items");
        }
        Ok(released)
    }

    /// One maintenance pass: release stuck items, fail structurally
    /// invalid pending ones, purge failed rows past retention.
    pub async fn sweep(&self, cfg: &SweepConfig) -> Result<SweepReport> {
        let released = self.release_stuck(cfg.staleness).await?;

        let mut invalidated = 0;
        for item in self.store.list_active(cfg.batch).await? {
            if item.status != Status::Pending {
                continue;
            }
            if let Err(reason) = K::validate(&item.payload) {
                self.mark_failed_permanent(item.id, &format!("invalid payload: {reason}"))
                    .await?;
                invalidated += 1;
            }
        }

        let purged = self
            .store
            .purge_failed(self.clock.now() - cfg.retention)
            .await?;
        if purged > 0 {
            metrics::items_purged().add(purged, &[KeyValue::new("queue", K::NAME)]);
        }

        let report = SweepReport {
            released,
            invalidated,
            purged,
        };
        tracing::debug!(
            queue = K::NAME,
            released = report.released,
            invalidated = report.invalidated,
            purged = report.purged,
            "sweep completed"
        );
        Ok(report)
    }

    /// Purge failed rows older than `retention` now, outside the sweep
    /// schedule. Operator tooling.
    pub async fn purge_failed(&self, retention: chrono::Duration) -> Result<u64> {
        let purged = self
            .store
            .purge_failed(self.clock.now() - retention)
            .await?;
        if purged > 0 {
            metrics::items_purged().add(purged, &[KeyValue::new("queue", K::NAME)]);
        }
        Ok(purged)
    }

    pub async fn get(&self, id: ItemId) -> Result<WorkItem<K::Payload>> {
        self.store.get(id).await
    }

    pub async fn list(
        &self,
        status: Option<Status>,
        limit: i64,
    ) -> Result<Vec<WorkItem<K::Payload>>> {
        self.store.list(status, limit).await
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        self.store.counts().await
    }

    async fn record_history(
        &self,
        item: &WorkItem<K::Payload>,
        outcome: HistoryOutcome,
        error: Option<&str>,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        self.history
            .record(HistoryRecord {
                id: ItemId::new(),
                queue: K::NAME.to_string(),
                item_id: item.id,
                owner_id: item.owner_id,
                outcome,
                error: error.map(str::to_string),
                retry_count: item.retry_count,
                result,
                payload: serde_json::to_value(&item.payload)?,
                created_at: self.clock.now(),
            })
            .await
    }
}
