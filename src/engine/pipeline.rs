//! The per-item processing pipeline.
//!
//! [`Processor::process_item`] drives one claimed item through
//! validation, credential resolution, and execution, then reports the
//! outcome back to the queue. It never returns an error to the worker:
//! every failure mode ends in a recorded outcome (or, if even that
//! fails, a logged error and an item the sweep will reclaim).

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument as _;
use uuid::Uuid;

use crate::crypto::SnapshotCipher;
use crate::error::Result;
use crate::kind::{CredentialRef, WorkKind};
use crate::model::WorkItem;
use crate::policy::RetryDecision;
use crate::telemetry::{metrics, queue as qtel};

use super::WorkQueue;

/// A resolved side-channel credential (sender config, agent binding).
/// `config` is the transport-specific document; the engine only looks
/// at `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub active: bool,
    pub config: serde_json::Value,
}

/// Live credential lookup, the fallback when an item carries no usable
/// snapshot. `Ok(None)` means the credential does not exist (anymore).
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, id: Uuid) -> Result<Option<Credential>>;
}

/// Executes one item's side effect: the email/telegram/webhook send for
/// the delivery queue, the agent invocation for the command queue.
///
/// `Ok(Some(value))` carries an executor result into the history record.
#[async_trait]
pub trait Executor<K: WorkKind>: Send + Sync {
    async fn execute(
        &self,
        item: &WorkItem<K::Payload>,
        credential: Option<&Credential>,
    ) -> std::result::Result<Option<serde_json::Value>, ExecError>;
}

/// An execution failure, classified by whether retrying can help.
#[derive(Debug, Clone)]
pub struct ExecError {
    pub message: String,
    pub retryable: bool,
}

impl ExecError {
    /// A transient failure — timeouts, 5xx responses, rate limits.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A permanent failure — rejected recipient, malformed request.
    /// Consumes no retries.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExecError {}

/// Drives claimed items through validate → credential → execute →
/// report for one queue kind.
pub struct Processor<K: WorkKind> {
    queue: Arc<WorkQueue<K>>,
    executor: Arc<dyn Executor<K>>,
    resolver: Arc<dyn CredentialResolver>,
    /// Decrypts inline credential snapshots. `None` disables the fast
    /// path and every credentialed item goes through the resolver.
    cipher: Option<Arc<SnapshotCipher>>,
}

/// How credential resolution for one item ended.
enum Resolved {
    Credential(Credential),
    NotNeeded,
    /// Credential exists but is switched off. Permanent.
    Inactive(Uuid),
    /// Neither snapshot nor live lookup produced one. Retryable.
    Unavailable(String),
}

impl<K: WorkKind> Processor<K> {
    pub fn new(
        queue: Arc<WorkQueue<K>>,
        executor: Arc<dyn Executor<K>>,
        resolver: Arc<dyn CredentialResolver>,
        cipher: Option<Arc<SnapshotCipher>>,
    ) -> Self {
        Self {
            queue,
            executor,
            resolver,
            cipher,
        }
    }

    /// Process one claimed item to a recorded outcome. Infallible from
    /// the worker's point of view: internal engine errors are logged and
    /// the item is left processing for the sweep to reclaim.
    pub async fn process_item(&self, item: WorkItem<K::Payload>) {
        let span = qtel::start_attempt_span(K::NAME, item.id, item.retry_count);
        if let Err(e) = self.run(&item).instrument(span).await {
            tracing::error!(
                queue = K::NAME,
                item = %item.id,
                error = %e,
                "failed to record processing outcome; item left for sweep"
            );
        }
    }

    async fn run(&self, item: &WorkItem<K::Payload>) -> Result<()> {
        let span = tracing::Span::current();

        if let Err(reason) = K::validate(&item.payload) {
            self.queue
                .mark_failed_permanent(item.id, &format!("invalid payload: {reason}"))
                .await?;
            qtel::record_transition(&span, "processing", "failed");
            return Ok(());
        }

        let credential = match self.resolve_credential(item).await {
            Resolved::Credential(c) => Some(c),
            Resolved::NotNeeded => None,
            Resolved::Inactive(id) => {
                self.queue
                    .mark_failed_permanent(item.id, &format!("credential {id} is inactive"))
                    .await?;
                qtel::record_transition(&span, "processing", "failed");
                return Ok(());
            }
            Resolved::Unavailable(reason) => {
                let decision = self.queue.mark_failed_or_retry(item.id, &reason).await?;
                qtel::record_transition(&span, "processing", transition_target(&decision));
                return Ok(());
            }
        };

        let started = std::time::Instant::now();
        let outcome = self.executor.execute(item, credential.as_ref()).await;
        metrics::attempt_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("queue", K::NAME)],
        );

        match outcome {
            Ok(result) => {
                self.queue.mark_succeeded(item.id, result).await?;
                qtel::record_transition(&span, "processing", K::SUCCESS_OUTCOME.as_str());
                Ok(())
            }
            Err(e) if e.retryable => {
                let decision = self.queue.mark_failed_or_retry(item.id, &e.message).await?;
                qtel::record_transition(&span, "processing", transition_target(&decision));
                Ok(())
            }
            Err(e) => {
                self.queue
                    .mark_failed_permanent(item.id, &e.message)
                    .await?;
                qtel::record_transition(&span, "processing", "failed");
                Ok(())
            }
        }
    }

    /// Snapshot fast path first, live lookup as fallback. A snapshot
    /// that fails to decrypt is only logged — the resolver still gets
    /// its chance before the attempt counts as failed.
    async fn resolve_credential(&self, item: &WorkItem<K::Payload>) -> Resolved {
        let Some(CredentialRef { id, snapshot }) = K::credential(&item.payload) else {
            return Resolved::NotNeeded;
        };

        if let (Some(cipher), Some(snapshot)) = (self.cipher.as_ref(), snapshot) {
            match decrypt_snapshot(cipher, id, snapshot) {
                Ok(credential) => {
                    return if credential.active {
                        Resolved::Credential(credential)
                    } else {
                        Resolved::Inactive(id)
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        queue = K::NAME,
                        item = %item.id,
                        credential = %id,
                        error = %e,
                        "credential snapshot unusable; falling back to live lookup"
                    );
                }
            }
        }

        match self.resolver.resolve(id).await {
            Ok(Some(credential)) if credential.active => Resolved::Credential(credential),
            Ok(Some(_)) => Resolved::Inactive(id),
            Ok(None) => Resolved::Unavailable(format!("credential {id} not found")),
            Err(e) => Resolved::Unavailable(format!("credential {id} lookup failed: {e}")),
        }
    }
}

/// Span label for where a failure report landed the item.
fn transition_target(decision: &RetryDecision) -> &'static str {
    match decision {
        RetryDecision::Retry { .. } => "pending",
        RetryDecision::Exhausted => "failed",
    }
}

/// Decrypt and shape an inline snapshot. The document is the credential
/// config; an `active` field, when present, is honored.
fn decrypt_snapshot(cipher: &SnapshotCipher, id: Uuid, snapshot: &str) -> Result<Credential> {
    let bytes = cipher.decrypt(snapshot)?;
    let config: serde_json::Value = serde_json::from_slice(&bytes)?;
    let active = config
        .get("active")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true);
    Ok(Credential { id, active, config })
}
