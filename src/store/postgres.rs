//! Postgres backend: connection pool, migrations, and the per-kind
//! queue/history tables.
//!
//! The claim is a single `UPDATE ... FROM (SELECT ... FOR UPDATE SKIP
//! LOCKED)` whose filter re-checks `status = 'pending'`, so concurrent
//! workers racing for the same row cannot both win — a losing caller
//! simply matches nothing. This filter-on-write is the only mutual
//! exclusion in the system; safe multi-process scaling depends on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::marker::PhantomData;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::kind::WorkKind;
use crate::model::{ItemId, Status, WorkItem};

use super::{HistoryRecord, HistorySink, QueueCounts, Store};

/// Database handle. Owns the connection pool shared by all queue kinds.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const COLUMNS: &str = "id, owner_id, status, payload, assignee, claimed_at, \
     last_heartbeat_at, retry_count, max_retries, next_retry_at, priority, \
     progress, last_error, created_at, updated_at";

/// Postgres store for one queue kind. Table names come from the kind's
/// consts, so every SQL string here is built from compile-time parts.
pub struct PgStore<K: WorkKind> {
    pool: PgPool,
    _kind: PhantomData<K>,
}

impl<K: WorkKind> PgStore<K> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _kind: PhantomData,
        }
    }

    fn to_row_values(item: &WorkItem<K::Payload>) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&item.payload)?)
    }
}

#[async_trait]
impl<K: WorkKind> Store<K> for PgStore<K> {
    async fn insert_many(&self, items: Vec<WorkItem<K::Payload>>) -> Result<()> {
        let sql = format!(
            "INSERT INTO {table} ({COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            table = K::TABLE,
        );

        let mut tx = self.pool.begin().await?;
        for item in &items {
            sqlx::query(&sql)
                .bind(item.id.0)
                .bind(item.owner_id)
                .bind(item.status.as_str())
                .bind(Self::to_row_values(item)?)
                .bind(&item.assignee)
                .bind(item.claimed_at)
                .bind(item.last_heartbeat_at)
                .bind(item.retry_count as i32)
                .bind(item.max_retries as i32)
                .bind(item.next_retry_at)
                .bind(item.priority)
                .bind(&item.progress)
                .bind(&item.last_error)
                .bind(item.created_at)
                .bind(item.updated_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: ItemId) -> Result<WorkItem<K::Payload>> {
        let sql = format!("SELECT {COLUMNS} FROM {table} WHERE id = $1", table = K::TABLE);
        let row: Option<WorkItemRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::NotFound(format!("work item {id}")))?
            .try_into_item()
    }

    async fn claim_one(
        &self,
        assignee: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem<K::Payload>>> {
        let sql = format!(
            "WITH next AS (
                 SELECT id FROM {table}
                 WHERE status = 'pending'
                   AND (next_retry_at IS NULL OR next_retry_at <= $2)
                 ORDER BY priority ASC, created_at ASC
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1
             )
             UPDATE {table} t
             SET status = 'processing',
                 assignee = $1,
                 claimed_at = $2,
                 last_heartbeat_at = $2,
                 updated_at = $2
             FROM next
             WHERE t.id = next.id AND t.status = 'pending'
             RETURNING {prefixed}",
            table = K::TABLE,
            prefixed = prefixed_columns("t"),
        );

        let row: Option<WorkItemRow> = sqlx::query_as(&sql)
            .bind(assignee)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.map(WorkItemRow::try_into_item).transpose()
    }

    async fn heartbeat(
        &self,
        id: ItemId,
        assignee: &str,
        progress: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<WorkItem<K::Payload>> {
        let sql = format!(
            "UPDATE {table}
             SET last_heartbeat_at = $3,
                 progress = COALESCE($4, progress),
                 updated_at = $3
             WHERE id = $1 AND status = 'processing' AND assignee = $2
             RETURNING {COLUMNS}",
            table = K::TABLE,
        );

        let row: Option<WorkItemRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .bind(assignee)
            .bind(now)
            .bind(progress)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| {
            Error::NotFound(format!(
                "work item {id} is not processing under assignee {assignee}"
            ))
        })?
        .try_into_item()
    }

    async fn delete(&self, id: ItemId) -> Result<bool> {
        let sql = format!("DELETE FROM {table} WHERE id = $1", table = K::TABLE);
        let affected = sqlx::query(&sql)
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn reschedule(
        &self,
        id: ItemId,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {table}
             SET status = 'pending',
                 assignee = NULL,
                 claimed_at = NULL,
                 retry_count = $2,
                 next_retry_at = $3,
                 last_error = $4,
                 updated_at = $5
             WHERE id = $1",
            table = K::TABLE,
        );
        sqlx::query(&sql)
            .bind(id.0)
            .bind(retry_count as i32)
            .bind(next_retry_at)
            .bind(error)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: ItemId, error: &str, now: DateTime<Utc>) -> Result<()> {
        let sql = format!(
            "UPDATE {table}
             SET status = 'failed',
                 assignee = NULL,
                 claimed_at = NULL,
                 next_retry_at = NULL,
                 last_error = $2,
                 updated_at = $3
             WHERE id = $1",
            table = K::TABLE,
        );
        sqlx::query(&sql)
            .bind(id.0)
            .bind(error)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            "UPDATE {table}
             SET status = 'pending',
                 assignee = NULL,
                 claimed_at = NULL,
                 next_retry_at = NULL,
                 updated_at = $2
             WHERE status = 'processing'
               AND COALESCE(last_heartbeat_at, claimed_at, created_at) < $1",
            table = K::TABLE,
        );
        let affected = sqlx::query(&sql)
            .bind(cutoff)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    async fn purge_failed(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {table} WHERE status = 'failed' AND updated_at < $1",
            table = K::TABLE,
        );
        let affected = sqlx::query(&sql)
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    async fn list_active(&self, limit: i64) -> Result<Vec<WorkItem<K::Payload>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {table}
             WHERE status <> 'failed'
             ORDER BY updated_at ASC
             LIMIT $1",
            table = K::TABLE,
        );
        let rows: Vec<WorkItemRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WorkItemRow::try_into_item).collect()
    }

    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem<K::Payload>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {table}
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC
             LIMIT $2",
            table = K::TABLE,
        );
        let rows: Vec<WorkItemRow> = sqlx::query_as(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WorkItemRow::try_into_item).collect()
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let sql = format!(
            "SELECT status, COUNT(*) AS count FROM {table} GROUP BY status",
            table = K::TABLE,
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match status.parse::<Status>()? {
                Status::Pending => counts.pending = count as u64,
                Status::Processing => counts.processing = count as u64,
                Status::Failed => counts.failed = count as u64,
            }
        }
        Ok(counts)
    }
}

fn prefixed_columns(alias: &str) -> String {
    COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: Uuid,
    owner_id: Uuid,
    status: String,
    payload: serde_json::Value,
    assignee: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    priority: i32,
    progress: Option<serde_json::Value>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkItemRow {
    fn try_into_item<P: serde::de::DeserializeOwned>(self) -> Result<WorkItem<P>> {
        Ok(WorkItem {
            id: ItemId(self.id),
            owner_id: self.owner_id,
            status: self.status.parse()?,
            payload: serde_json::from_value(self.payload)?,
            assignee: self.assignee,
            claimed_at: self.claimed_at,
            last_heartbeat_at: self.last_heartbeat_at,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            next_retry_at: self.next_retry_at,
            priority: self.priority,
            progress: self.progress,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Append-only history sink writing to a kind's history table.
pub struct PgHistorySink {
    pool: PgPool,
    table: &'static str,
}

impl PgHistorySink {
    pub fn new(pool: PgPool, table: &'static str) -> Self {
        Self { pool, table }
    }
}

#[async_trait]
impl HistorySink for PgHistorySink {
    async fn record(&self, record: HistoryRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {table}
                 (id, queue, item_id, owner_id, outcome, error, retry_count, result, payload, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            table = self.table,
        );
        sqlx::query(&sql)
            .bind(record.id.0)
            .bind(&record.queue)
            .bind(record.item_id.0)
            .bind(record.owner_id)
            .bind(record.outcome.as_str())
            .bind(&record.error)
            .bind(record.retry_count as i32)
            .bind(&record.result)
            .bind(&record.payload)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
