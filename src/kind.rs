//! Work kind abstraction.
//!
//! A kind binds a payload type to its queue tables and to the two pieces
//! of domain knowledge the generic engine needs: structural validity and
//! whether execution requires a resolved credential.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::store::HistoryOutcome;

/// A queue kind. The engine is instantiated once per implementor; see
/// [`crate::kinds`] for the two shipped kinds.
pub trait WorkKind: Send + Sync + 'static {
    /// Queue name, used in telemetry labels and history records.
    const NAME: &'static str;
    /// Active work item table.
    const TABLE: &'static str;
    /// Immutable outcome record table.
    const HISTORY_TABLE: &'static str;

    /// History outcome recorded for a successful attempt.
    const SUCCESS_OUTCOME: HistoryOutcome = HistoryOutcome::Completed;

    /// Seconds without a heartbeat before a processing item of this
    /// kind counts as abandoned. Kinds with long-running work widen it.
    const SWEEP_STALENESS_SECS: i64 = 300;

    type Payload: Serialize
        + DeserializeOwned
        + Clone
        + std::fmt::Debug
        + Send
        + Sync
        + 'static;

    /// Structural validation. `Err(reason)` marks the item permanently
    /// failed — no retries are consumed. Payload semantics beyond
    /// structure are the caller's responsibility.
    fn validate(payload: &Self::Payload) -> std::result::Result<(), String>;

    /// The credential needed to execute this payload, if any. `None`
    /// means the executor runs without one.
    fn credential(payload: &Self::Payload) -> Option<CredentialRef<'_>>;
}

/// Reference to a side-channel credential: the live lookup id plus an
/// optional encrypted inline snapshot (fast path).
#[derive(Debug, Clone, Copy)]
pub struct CredentialRef<'a> {
    pub id: uuid::Uuid,
    pub snapshot: Option<&'a str>,
}
