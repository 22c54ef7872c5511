//! Processing span helpers.
//!
//! Provides span creation and status-transition recording for work items
//! flowing through the pipeline.

use tracing::Span;

use crate::model::ItemId;

/// Start a span for one processing attempt.
///
/// The `item.status` field is declared empty and can be updated via
/// [`record_transition`].
pub fn start_attempt_span(queue: &str, item_id: ItemId, retry_count: u32) -> Span {
    tracing::info_span!(
        "item.process",
        "item.queue" = queue,
        "item.id" = %item_id,
        "item.retry_count" = retry_count,
        "item.status" = tracing::field::Empty,
    )
}

/// Record a status transition event on the given span and update its
/// `item.status` field to the destination.
pub fn record_transition(span: &Span, from: &str, to: &str) {
    span.record("item.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}
