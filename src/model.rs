//! Core data model.
//!
//! A work item is a unit of pending, in-flight, or terminally failed
//! asynchronous work. The engine tracks its lifecycle; the payload is
//! opaque and belongs to the instantiating kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item. Exactly one at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting for a worker; eligible once `next_retry_at` has passed.
    Pending,
    /// Claimed by exactly one worker, identified by `assignee`.
    Processing,
    /// Terminal: retries exhausted or failure was permanent. Retained
    /// until purged by the liveness sweep.
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Failed => "failed",
        }
    }

    /// Terminal statuses receive no further automatic transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "processing" => Ok(Status::Processing),
            "failed" => Ok(Status::Failed),
            other => Err(crate::error::Error::Other(format!(
                "unknown work item status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Work item
// ---------------------------------------------------------------------------

/// A unit of work tracked by the engine.
///
/// Successful items are deleted on completion (the history record is the
/// durable evidence), so there is no `completed` row status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem<P> {
    /// Unique identifier, assigned at creation, immutable.
    pub id: ItemId,

    /// Owning organization/tenant. Scopes visibility; immutable.
    pub owner_id: Uuid,

    /// Current lifecycle status.
    pub status: Status,

    /// Opaque payload — pre-rendered delivery content or command
    /// parameters. The engine never interprets it.
    pub payload: P,

    /// Worker currently holding the claim. None while pending.
    pub assignee: Option<String>,

    /// Set when the item was claimed; cleared when released.
    pub claimed_at: Option<DateTime<Utc>>,

    /// Refreshed by long-running work via heartbeat. Staleness here (or
    /// on `claimed_at` when never refreshed) is what the liveness sweep
    /// keys on.
    pub last_heartbeat_at: Option<DateTime<Utc>>,

    /// Attempts consumed so far. Invariant: `retry_count <= max_retries`.
    pub retry_count: u32,

    /// Attempt bound before the item goes terminally failed.
    pub max_retries: u32,

    /// Not eligible for claim until this passes. None = immediately.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Claim ordering hint; lower is claimed first.
    pub priority: i32,

    /// Progress map reported through heartbeats (command kind).
    pub progress: Option<serde_json::Value>,

    /// Last failure message. Observability only.
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for enqueueing a work item. The engine fills in lifecycle fields.
#[derive(Debug, Clone)]
pub struct NewWorkItem<P> {
    pub owner_id: Uuid,
    pub payload: P,
    /// None = policy default (3).
    pub max_retries: Option<u32>,
    /// None = default medium priority (3).
    pub priority: Option<i32>,
}

impl<P> NewWorkItem<P> {
    pub fn new(owner_id: Uuid, payload: P) -> Self {
        Self {
            owner_id,
            payload,
            max_retries: None,
            priority: None,
        }
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn priority(mut self, p: i32) -> Self {
        self.priority = Some(p);
        self
    }
}
