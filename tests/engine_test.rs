//! Integration tests for the queue engine: lifecycle, retry accounting,
//! and the liveness sweep, driven deterministically through the
//! in-memory store and a manual clock.

use chrono::{Duration, TimeZone, Utc};
use relayq::clock::{Clock, ManualClock};
use relayq::engine::{SweepConfig, WorkQueue};
use relayq::kinds::DeliveryKind;
use relayq::kinds::delivery::{Channel, DeliveryPayload};
use relayq::model::{ItemId, NewWorkItem, Status, WorkItem};
use relayq::policy::{RetryDecision, RetryPolicy};
use relayq::store::memory::{MemoryHistory, MemoryStore};
use relayq::store::{HistoryOutcome, Store};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    queue: WorkQueue<DeliveryKind>,
    store: Arc<MemoryStore<DeliveryKind>>,
    history: Arc<MemoryHistory>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let history = Arc::new(MemoryHistory::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
    ));
    let queue = WorkQueue::new(
        store.clone(),
        history.clone(),
        clock.clone(),
        RetryPolicy::default(),
    );
    Harness {
        queue,
        store,
        history,
        clock,
    }
}

fn payload() -> DeliveryPayload {
    DeliveryPayload {
        event_type: "deal.stage_changed".to_string(),
        channel: Channel::Email,
        recipient: "owner@example.com".to_string(),
        subject: Some("Deal moved".to_string()),
        content: "Deal Acme-Q3 moved to negotiation".to_string(),
        ctas: vec![],
        sender_id: Uuid::new_v4(),
        sender_snapshot: None,
    }
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_applies_defaults() {
    let h = harness();

    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()))
        .await
        .unwrap();

    assert_eq!(item.status, Status::Pending);
    assert_eq!(item.retry_count, 0);
    assert_eq!(item.max_retries, 3);
    assert_eq!(item.priority, 3);
    assert!(item.assignee.is_none());
    assert!(item.next_retry_at.is_none());
    assert_eq!(item.created_at, h.clock.now());
}

#[tokio::test]
async fn enqueue_honors_overrides() {
    let h = harness();

    let item = h
        .queue
        .enqueue(
            NewWorkItem::new(Uuid::new_v4(), payload())
                .max_retries(5)
                .priority(1),
        )
        .await
        .unwrap();

    assert_eq!(item.max_retries, 5);
    assert_eq!(item.priority, 1);
}

#[tokio::test]
async fn enqueue_rejects_invalid_payload() {
    let h = harness();

    let mut bad = payload();
    bad.recipient = "   ".to_string();

    let result = h.queue.enqueue(NewWorkItem::new(Uuid::new_v4(), bad)).await;
    assert!(matches!(result, Err(relayq::error::Error::InvalidPayload(_))));
    assert_eq!(h.queue.counts().await.unwrap().pending, 0);
}

// ---------------------------------------------------------------------------
// Claiming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claim_moves_item_to_processing() {
    let h = harness();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()))
        .await
        .unwrap();

    let claimed = h.queue.claim_batch("worker-1", 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, item.id);
    assert_eq!(claimed[0].status, Status::Processing);
    assert_eq!(claimed[0].assignee.as_deref(), Some("worker-1"));
    assert_eq!(claimed[0].claimed_at, Some(h.clock.now()));
    assert_eq!(claimed[0].last_heartbeat_at, Some(h.clock.now()));
}

#[tokio::test]
async fn claimed_item_is_not_claimable_again() {
    let h = harness();
    h.queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()))
        .await
        .unwrap();

    let first = h.queue.claim_batch("worker-1", 1).await.unwrap();
    let second = h.queue.claim_batch("worker-2", 1).await.unwrap();

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
}

#[tokio::test]
async fn claim_respects_priority_then_age() {
    let h = harness();
    let owner = Uuid::new_v4();

    let low = h
        .queue
        .enqueue(NewWorkItem::new(owner, payload()).priority(5))
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(1));
    let urgent = h
        .queue
        .enqueue(NewWorkItem::new(owner, payload()).priority(1))
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(1));
    let urgent_later = h
        .queue
        .enqueue(NewWorkItem::new(owner, payload()).priority(1))
        .await
        .unwrap();

    let claimed = h.queue.claim_batch("worker-1", 10).await.unwrap();
    let ids: Vec<ItemId> = claimed.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![urgent.id, urgent_later.id, low.id]);
}

#[tokio::test]
async fn claim_batch_rejects_blank_assignee() {
    let h = harness();
    assert!(h.queue.claim_batch("  ", 10).await.is_err());
}

#[tokio::test]
async fn claim_batch_clamps_limit() {
    let h = harness();
    let owner = Uuid::new_v4();
    for _ in 0..3 {
        h.queue
            .enqueue(NewWorkItem::new(owner, payload()))
            .await
            .unwrap();
    }

    // limit 0 clamps up to 1
    let claimed = h.queue.claim_batch("worker-1", 0).await.unwrap();
    assert_eq!(claimed.len(), 1);
}

#[tokio::test]
async fn claim_on_empty_queue_returns_nothing() {
    let h = harness();
    assert!(h.queue.claim_batch("worker-1", 10).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Success path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn success_deletes_row_and_records_history() {
    let h = harness();
    let owner = Uuid::new_v4();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(owner, payload()))
        .await
        .unwrap();
    h.queue.claim_batch("worker-1", 1).await.unwrap();

    h.queue
        .mark_succeeded(item.id, Some(json!({"message_id": "abc"})))
        .await
        .unwrap();

    assert!(h.queue.get(item.id).await.is_err());
    let records = h.history.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, HistoryOutcome::Sent);
    assert_eq!(records[0].item_id, item.id);
    assert_eq!(records[0].owner_id, owner);
    assert_eq!(records[0].result, Some(json!({"message_id": "abc"})));
}

#[tokio::test]
async fn duplicate_success_report_is_a_noop() {
    let h = harness();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()))
        .await
        .unwrap();
    h.queue.claim_batch("worker-1", 1).await.unwrap();

    h.queue.mark_succeeded(item.id, None).await.unwrap();
    h.queue.mark_succeeded(item.id, None).await.unwrap();

    assert_eq!(h.history.records().len(), 1);
}

// ---------------------------------------------------------------------------
// Retry accounting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failures_reschedule_with_doubling_backoff_then_exhaust() {
    let h = harness();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()))
        .await
        .unwrap();

    // Attempts 1-3 reschedule with 2s, 4s, 8s delays.
    for (attempt, delay) in [(1u32, 2i64), (2, 4), (3, 8)] {
        let claimed = h.queue.claim_batch("worker-1", 1).await.unwrap();
        assert_eq!(claimed.len(), 1, "attempt {attempt} should claim");

        let decision = h
            .queue
            .mark_failed_or_retry(item.id, "smtp timeout")
            .await
            .unwrap();
        assert!(matches!(decision, RetryDecision::Retry { retry_count, .. } if retry_count == attempt));

        let row = h.queue.get(item.id).await.unwrap();
        assert_eq!(row.status, Status::Pending);
        assert_eq!(row.retry_count, attempt);
        assert_eq!(
            row.next_retry_at,
            Some(h.clock.now() + Duration::seconds(delay))
        );
        assert!(row.assignee.is_none());

        // Not claimable until the backoff passes.
        h.clock.advance(Duration::seconds(delay - 1));
        assert!(h.queue.claim_batch("worker-1", 1).await.unwrap().is_empty());
        h.clock.advance(Duration::seconds(1));
    }

    // Fourth attempt exhausts the budget.
    let claimed = h.queue.claim_batch("worker-1", 1).await.unwrap();
    assert_eq!(claimed.len(), 1);
    let decision = h
        .queue
        .mark_failed_or_retry(item.id, "smtp timeout")
        .await
        .unwrap();
    assert_eq!(decision, RetryDecision::Exhausted);

    let row = h.queue.get(item.id).await.unwrap();
    assert_eq!(row.status, Status::Failed);
    assert_eq!(row.last_error.as_deref(), Some("smtp timeout"));

    // One failure history record per attempt.
    let records = h.history.records();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.outcome == HistoryOutcome::Failed));
    let counts: Vec<u32> = records.iter().map(|r| r.retry_count).collect();
    assert_eq!(counts, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn failure_report_on_failed_item_is_a_noop() {
    let h = harness();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()).max_retries(0))
        .await
        .unwrap();
    h.queue.claim_batch("worker-1", 1).await.unwrap();

    let decision = h.queue.mark_failed_or_retry(item.id, "boom").await.unwrap();
    assert_eq!(decision, RetryDecision::Exhausted);
    let history_before = h.history.records().len();

    // A straggling duplicate report must not add history or resurrect.
    let decision = h.queue.mark_failed_or_retry(item.id, "boom again").await.unwrap();
    assert_eq!(decision, RetryDecision::Exhausted);
    assert_eq!(h.history.records().len(), history_before);
    assert_eq!(
        h.queue.get(item.id).await.unwrap().last_error.as_deref(),
        Some("boom")
    );
}

#[tokio::test]
async fn permanent_failure_skips_remaining_retries() {
    let h = harness();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()))
        .await
        .unwrap();
    h.queue.claim_batch("worker-1", 1).await.unwrap();

    h.queue
        .mark_failed_permanent(item.id, "recipient rejected")
        .await
        .unwrap();

    let row = h.queue.get(item.id).await.unwrap();
    assert_eq!(row.status, Status::Failed);
    assert_eq!(row.retry_count, 0);
    assert_eq!(h.history.records().len(), 1);
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_refreshes_liveness_and_progress() {
    let h = harness();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()))
        .await
        .unwrap();
    h.queue.claim_batch("worker-1", 1).await.unwrap();

    h.clock.advance(Duration::seconds(30));
    let updated = h
        .queue
        .heartbeat(item.id, "worker-1", Some(json!({"step": 2})))
        .await
        .unwrap();

    assert_eq!(updated.last_heartbeat_at, Some(h.clock.now()));
    assert_eq!(updated.progress, Some(json!({"step": 2})));

    // Progress survives a heartbeat that carries none.
    h.clock.advance(Duration::seconds(30));
    let updated = h.queue.heartbeat(item.id, "worker-1", None).await.unwrap();
    assert_eq!(updated.progress, Some(json!({"step": 2})));
}

#[tokio::test]
async fn heartbeat_from_wrong_assignee_is_rejected() {
    let h = harness();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()))
        .await
        .unwrap();
    h.queue.claim_batch("worker-1", 1).await.unwrap();

    let result = h.queue.heartbeat(item.id, "worker-2", None).await;
    assert!(matches!(result, Err(relayq::error::Error::NotFound(_))));
}

#[tokio::test]
async fn heartbeat_on_pending_item_is_rejected() {
    let h = harness();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()))
        .await
        .unwrap();

    assert!(h.queue.heartbeat(item.id, "worker-1", None).await.is_err());
}

// ---------------------------------------------------------------------------
// Liveness sweep
// ---------------------------------------------------------------------------

fn sweep_config() -> SweepConfig {
    SweepConfig::default()
}

#[tokio::test]
async fn sweep_releases_items_with_stale_heartbeats() {
    let h = harness();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()))
        .await
        .unwrap();
    h.queue.claim_batch("worker-1", 1).await.unwrap();

    h.clock.advance(Duration::seconds(301));
    let report = h.queue.sweep(&sweep_config()).await.unwrap();
    assert_eq!(report.released, 1);

    let row = h.queue.get(item.id).await.unwrap();
    assert_eq!(row.status, Status::Pending);
    assert!(row.assignee.is_none());
    assert!(row.next_retry_at.is_none());

    // Immediately claimable by another worker.
    let reclaimed = h.queue.claim_batch("worker-2", 1).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, item.id);
}

#[tokio::test]
async fn sweep_spares_items_with_fresh_heartbeats() {
    let h = harness();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()))
        .await
        .unwrap();
    h.queue.claim_batch("worker-1", 1).await.unwrap();

    h.clock.advance(Duration::seconds(250));
    h.queue.heartbeat(item.id, "worker-1", None).await.unwrap();
    h.clock.advance(Duration::seconds(250));

    // 500s since claim but only 250s since the heartbeat.
    let report = h.queue.sweep(&sweep_config()).await.unwrap();
    assert_eq!(report.released, 0);
    assert_eq!(
        h.queue.get(item.id).await.unwrap().status,
        Status::Processing
    );
}

#[tokio::test]
async fn sweep_falls_back_to_creation_time_for_timestampless_claims() {
    let h = harness();

    // Processing row with neither heartbeat nor claim time, written
    // behind the engine's back. Its age is its creation time.
    let now = h.clock.now();
    let rogue = WorkItem {
        id: ItemId::new(),
        owner_id: Uuid::new_v4(),
        status: Status::Processing,
        payload: payload(),
        assignee: Some("ghost-worker".to_string()),
        claimed_at: None,
        last_heartbeat_at: None,
        retry_count: 0,
        max_retries: 3,
        next_retry_at: None,
        priority: 3,
        progress: None,
        last_error: None,
        created_at: now,
        updated_at: now,
    };
    let rogue_id = rogue.id;
    h.store.insert_many(vec![rogue]).await.unwrap();

    // Freshly created: not yet considered abandoned.
    let released = h.queue.release_stuck(Duration::seconds(300)).await.unwrap();
    assert_eq!(released, 0);
    assert_eq!(
        h.queue.get(rogue_id).await.unwrap().status,
        Status::Processing
    );

    h.clock.advance(Duration::seconds(301));
    let released = h.queue.release_stuck(Duration::seconds(300)).await.unwrap();
    assert_eq!(released, 1);
    assert_eq!(h.queue.get(rogue_id).await.unwrap().status, Status::Pending);
}

#[tokio::test]
async fn sweep_fails_structurally_invalid_pending_items() {
    let h = harness();

    // Legacy row that predates validation — inserted behind the
    // engine's back.
    let mut bad = payload();
    bad.recipient = String::new();
    let now = h.clock.now();
    let rogue = WorkItem {
        id: ItemId::new(),
        owner_id: Uuid::new_v4(),
        status: Status::Pending,
        payload: bad,
        assignee: None,
        claimed_at: None,
        last_heartbeat_at: None,
        retry_count: 0,
        max_retries: 3,
        next_retry_at: None,
        priority: 3,
        progress: None,
        last_error: None,
        created_at: now,
        updated_at: now,
    };
    let rogue_id = rogue.id;
    h.store.insert_many(vec![rogue]).await.unwrap();

    let report = h.queue.sweep(&sweep_config()).await.unwrap();
    assert_eq!(report.invalidated, 1);

    let row = h.queue.get(rogue_id).await.unwrap();
    assert_eq!(row.status, Status::Failed);
    assert!(row.last_error.unwrap().contains("invalid payload"));
}

#[tokio::test]
async fn sweep_purges_failed_items_past_retention() {
    let h = harness();
    let item = h
        .queue
        .enqueue(NewWorkItem::new(Uuid::new_v4(), payload()).max_retries(0))
        .await
        .unwrap();
    h.queue.claim_batch("worker-1", 1).await.unwrap();
    h.queue.mark_failed_or_retry(item.id, "boom").await.unwrap();

    // Within retention: kept.
    h.clock.advance(Duration::days(6));
    let report = h.queue.sweep(&sweep_config()).await.unwrap();
    assert_eq!(report.purged, 0);
    assert!(h.queue.get(item.id).await.is_ok());

    // Past retention: gone.
    h.clock.advance(Duration::days(2));
    let report = h.queue.sweep(&sweep_config()).await.unwrap();
    assert_eq!(report.purged, 1);
    assert!(h.queue.get(item.id).await.is_err());
}

// ---------------------------------------------------------------------------
// Operator views
// ---------------------------------------------------------------------------

#[tokio::test]
async fn counts_track_statuses() {
    let h = harness();
    let owner = Uuid::new_v4();

    for _ in 0..3 {
        h.queue
            .enqueue(NewWorkItem::new(owner, payload()))
            .await
            .unwrap();
    }
    let claimed = h.queue.claim_batch("worker-1", 1).await.unwrap();
    h.queue
        .mark_failed_permanent(claimed[0].id, "boom")
        .await
        .unwrap();
    h.queue.claim_batch("worker-1", 1).await.unwrap();

    let counts = h.queue.counts().await.unwrap();
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.processing, 1);
    assert_eq!(counts.failed, 1);
}

#[tokio::test]
async fn list_filters_by_status() {
    let h = harness();
    let owner = Uuid::new_v4();
    h.queue
        .enqueue(NewWorkItem::new(owner, payload()))
        .await
        .unwrap();
    h.queue
        .enqueue(NewWorkItem::new(owner, payload()))
        .await
        .unwrap();
    h.queue.claim_batch("worker-1", 1).await.unwrap();

    let pending = h.queue.list(Some(Status::Pending), 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    let all = h.queue.list(None, 10).await.unwrap();
    assert_eq!(all.len(), 2);
}
