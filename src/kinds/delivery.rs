//! Notification delivery queue kind.
//!
//! Payloads arrive fully rendered — subject, content, and call-to-action
//! links already carry their tracking URLs. The engine only moves them;
//! a channel transport (email, telegram, webhook) plugged in as the
//! Executor performs the send.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kind::{CredentialRef, WorkKind};
use crate::store::HistoryOutcome;

/// Delivery channel. Transports themselves live outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Telegram,
    Webhook,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email => f.write_str("email"),
            Channel::Telegram => f.write_str("telegram"),
            Channel::Webhook => f.write_str("webhook"),
        }
    }
}

/// A rendered call-to-action carried with the notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedCta {
    pub label: String,
    pub url: String,
}

/// Pre-rendered notification ready for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayload {
    /// Originating event type, kept for history/reporting.
    pub event_type: String,
    pub channel: Channel,
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ctas: Vec<RenderedCta>,
    /// Sender credential id, for the live-lookup fallback.
    pub sender_id: Uuid,
    /// Encrypted sender credential snapshot (fast path). See
    /// [`crate::crypto::SnapshotCipher`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_snapshot: Option<String>,
}

pub struct DeliveryKind;

impl WorkKind for DeliveryKind {
    const NAME: &'static str = "delivery";
    const TABLE: &'static str = "delivery_queue";
    const HISTORY_TABLE: &'static str = "delivery_history";
    const SUCCESS_OUTCOME: HistoryOutcome = HistoryOutcome::Sent;

    type Payload = DeliveryPayload;

    fn validate(payload: &Self::Payload) -> std::result::Result<(), String> {
        if payload.sender_id.is_nil() {
            return Err("senderId is empty or invalid".into());
        }
        if payload.recipient.trim().is_empty() {
            return Err("recipient is empty".into());
        }
        Ok(())
    }

    fn credential(payload: &Self::Payload) -> Option<CredentialRef<'_>> {
        Some(CredentialRef {
            id: payload.sender_id,
            snapshot: payload.sender_snapshot.as_deref(),
        })
    }
}
