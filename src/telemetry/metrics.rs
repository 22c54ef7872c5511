//! Metric instrument factories for relayq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"relayq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for relayq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("relayq")
}

/// Counter: number of work items enqueued.
/// Labels: `queue`.
pub fn items_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("relayq.items.enqueued")
        .with_description("Number of work items enqueued")
        .build()
}

/// Counter: number of work items claimed by workers.
/// Labels: `queue`.
pub fn items_claimed() -> Counter<u64> {
    meter()
        .u64_counter("relayq.items.claimed")
        .with_description("Number of work items claimed")
        .build()
}

/// Counter: processing outcomes.
/// Labels: `queue`, `outcome` ("succeeded" | "retried" | "failed").
pub fn item_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("relayq.items.outcomes")
        .with_description("Number of processing attempt outcomes")
        .build()
}

/// Counter: items reset to pending by the liveness sweep.
/// Labels: `queue`.
pub fn items_released() -> Counter<u64> {
    meter()
        .u64_counter("relayq.sweep.released")
        .with_description("Number of stuck items released back to pending")
        .build()
}

/// Counter: failed items deleted by the retention purge.
/// Labels: `queue`.
pub fn items_purged() -> Counter<u64> {
    meter()
        .u64_counter("relayq.sweep.purged")
        .with_description("Number of failed items purged past retention")
        .build()
}

/// Histogram: executor attempt duration in milliseconds.
/// Labels: `queue`.
pub fn attempt_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("relayq.attempt.duration_ms")
        .with_description("Executor attempt duration in milliseconds")
        .with_unit("ms")
        .build()
}
