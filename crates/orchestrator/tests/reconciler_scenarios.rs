//! Reconciler behaviour against recording fakes.

mod common;

use common::{id, Call, Harness, HOUR};
use lifecycle::{
    DeferredDelivery, Edge, EntityKind, EventHandle, LifecycleSignal, Notification, RecordStore,
    RetryPolicy, ScheduledEntity, Timestamp, WritePrecondition,
};
use orchestrator::{
    DeliveryOutcome, DiscardReason, RearmReport, ReconcileError, ReconcileOutcome, StaleReason,
    DEFAULT_REDELIVERY_DELAY,
};
use proptest::prelude::*;

fn created(external_id: &str, kind: EntityKind, start: Timestamp, end: Option<Timestamp>) -> Notification {
    Notification::Created {
        external_id: id(external_id),
        kind,
        start_time: start,
        end_time: end,
    }
}

fn updated(external_id: &str, kind: EntityKind, start: Timestamp, end: Option<Timestamp>) -> Notification {
    Notification::Updated {
        external_id: id(external_id),
        kind,
        start_time: start,
        end_time: end,
    }
}

fn deleted(external_id: &str) -> Notification {
    Notification::Deleted {
        external_id: id(external_id),
    }
}

fn delivery(kind: EntityKind, edge: Edge, external_id: &str, handle: EventHandle, at: Timestamp) -> DeferredDelivery {
    DeferredDelivery {
        handle,
        signal: LifecycleSignal::new(kind, edge, id(external_id)),
        deliver_at: at,
    }
}

// ---------------------------------------------------------------------------
// onCreated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn created_future_drop_persists_the_scheduler_handle() {
    let h = Harness::new();
    let start = h.at(HOUR);

    let outcome = h
        .reconciler
        .apply(created("drop-1", EntityKind::Drop, start, None))
        .await
        .unwrap();

    let scheduled = h.journal.scheduled();
    assert_eq!(scheduled.len(), 1);
    let (signal, at, handle) = &scheduled[0];
    assert_eq!(signal, "drop.started");
    assert_eq!(*at, start);
    assert_eq!(
        outcome,
        ReconcileOutcome::Created {
            start: Some(*handle),
            end: None
        }
    );

    let record = h.record("drop-1").await.unwrap().value;
    assert_eq!(record.start_event_handle, Some(*handle));
    assert_eq!(record.end_event_handle, None);
    assert!(h.journal.emitted().is_empty());
}

#[tokio::test]
async fn duplicate_created_is_absorbed() {
    let h = Harness::new();
    let note = created("drop-1", EntityKind::Drop, h.at(HOUR), Some(h.at(2 * HOUR)));

    h.reconciler.apply(note.clone()).await.unwrap();
    let first = h.record("drop-1").await.unwrap();
    h.journal.clear();

    let outcome = h.reconciler.apply(note).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Duplicate);
    assert!(h.journal.calls().is_empty(), "no scheduling and no write");
    assert_eq!(h.record("drop-1").await.unwrap(), first);
}

#[tokio::test]
async fn created_drop_with_future_window_arms_both_edges() {
    let h = Harness::new();
    let (start, end) = (h.at(HOUR), h.at(3 * HOUR));

    let outcome = h
        .reconciler
        .apply(created("drop-1", EntityKind::Drop, start, Some(end)))
        .await
        .unwrap();

    let scheduled = h.journal.scheduled();
    assert_eq!(scheduled.len(), 2);
    assert_eq!((scheduled[0].0.as_str(), scheduled[0].1), ("drop.started", start));
    assert_eq!((scheduled[1].0.as_str(), scheduled[1].1), ("drop.ended", end));

    let record = h.record("drop-1").await.unwrap().value;
    assert_eq!(record.start_event_handle, Some(scheduled[0].2));
    assert_eq!(record.end_event_handle, Some(scheduled[1].2));
    assert_eq!(
        outcome,
        ReconcileOutcome::Created {
            start: Some(scheduled[0].2),
            end: Some(scheduled[1].2)
        }
    );
    assert!(h.journal.emitted().is_empty(), "no immediate events");
}

#[tokio::test]
async fn created_drop_already_running_arms_only_the_end() {
    let h = Harness::new();
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, h.at(-HOUR), Some(h.at(HOUR))))
        .await
        .unwrap();

    let scheduled = h.journal.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].0, "drop.ended");
    let record = h.record("drop-1").await.unwrap().value;
    assert_eq!(record.start_event_handle, None);
    assert_eq!(record.end_event_handle, Some(scheduled[0].2));
    assert!(h.journal.emitted().is_empty());
}

#[tokio::test]
async fn created_draw_in_the_past_is_skipped() {
    let h = Harness::new();
    for start in [h.at(-60), h.now()] {
        let outcome = h
            .reconciler
            .apply(created("draw-1", EntityKind::Draw, start, None))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Stale(StaleReason::DrawStartPassed));
    }
    assert!(h.record("draw-1").await.is_none());
    assert!(h.journal.calls().is_empty());
}

#[tokio::test]
async fn created_draw_ignores_end_time() {
    let h = Harness::new();
    h.reconciler
        .apply(created("draw-1", EntityKind::Draw, h.at(HOUR), Some(h.at(2 * HOUR))))
        .await
        .unwrap();

    let scheduled = h.journal.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].0, "prize_draw.started");
    let record = h.record("draw-1").await.unwrap().value;
    assert_eq!(record.end_time, None);
    assert_eq!(record.end_event_handle, None);
}

#[tokio::test]
async fn end_before_start_is_rejected_before_any_side_effect() {
    let h = Harness::new();
    let err = h
        .reconciler
        .apply(created("drop-1", EntityKind::Drop, h.at(2 * HOUR), Some(h.at(HOUR))))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::InvalidWindow { .. }));
    assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable);
    assert!(h.journal.calls().is_empty());
    assert!(h.record("drop-1").await.is_none());
}

#[tokio::test]
async fn concurrent_creates_for_one_id_schedule_once() {
    let h = Harness::new();
    let note = created("drop-1", EntityKind::Drop, h.at(HOUR), None);

    let (a, b) = tokio::join!(
        h.reconciler.apply(note.clone()),
        h.reconciler.apply(note.clone())
    );
    let mut outcomes = [a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, ReconcileOutcome::Duplicate));

    assert!(matches!(outcomes[0], ReconcileOutcome::Created { .. }));
    assert_eq!(outcomes[1], ReconcileOutcome::Duplicate);
    assert_eq!(h.journal.scheduled().len(), 1);
}

// ---------------------------------------------------------------------------
// onUpdated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_update_touches_nothing() {
    let h = Harness::new();
    let (start, end) = (h.at(HOUR), Some(h.at(3 * HOUR)));
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, start, end))
        .await
        .unwrap();
    h.journal.clear();

    let outcome = h
        .reconciler
        .apply(updated("drop-1", EntityKind::Drop, start, end))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Unchanged);
    assert!(h.journal.calls().is_empty());
}

#[tokio::test]
async fn active_to_inactive_emits_ended_once_and_cancels_both_handles() {
    let h = Harness::new();
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, h.at(HOUR), Some(h.at(3 * HOUR))))
        .await
        .unwrap();
    let old = h.record("drop-1").await.unwrap().value;
    let old_handles = [old.start_event_handle.unwrap(), old.end_event_handle.unwrap()];

    // Start has been reached but its delivery has not been processed yet.
    h.clock.advance(2 * HOUR);
    h.journal.clear();

    let outcome = h
        .reconciler
        .apply(updated("drop-1", EntityKind::Drop, h.at(5 * HOUR), Some(h.at(6 * HOUR))))
        .await
        .unwrap();

    assert_eq!(h.journal.emitted(), ["drop.ended"]);
    assert_eq!(h.journal.cancelled(), old_handles);
    let ReconcileOutcome::Rescheduled { start, end, emitted } = outcome else {
        panic!("expected a reschedule, got {outcome:?}");
    };
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].edge, Edge::Ended);

    let record = h.record("drop-1").await.unwrap().value;
    assert_eq!(record.start_event_handle, start);
    assert_eq!(record.end_event_handle, end);
    assert!(h.scheduler.live().is_disjoint(&old_handles.into_iter().collect()));

    // Cancel, then emit, then schedule, then write.
    let kinds: Vec<&'static str> = h
        .journal
        .calls()
        .iter()
        .map(|c| match c {
            Call::Cancel(_) => "cancel",
            Call::Emit(_) => "emit",
            Call::Schedule { .. } => "schedule",
            Call::Put => "put",
            Call::Delete => "delete",
        })
        .collect();
    assert_eq!(kinds, ["cancel", "cancel", "emit", "schedule", "schedule", "put"]);
}

#[tokio::test]
async fn still_active_update_to_open_ended_replaces_handles_silently() {
    let h = Harness::new();
    // Created an hour before its start, three hours before its end.
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, h.at(HOUR), Some(h.at(3 * HOUR))))
        .await
        .unwrap();
    let old = h.record("drop-1").await.unwrap().value;

    // Now between the old start and the old end.
    h.clock.advance(2 * HOUR);
    h.journal.clear();

    let outcome = h
        .reconciler
        .apply(updated("drop-1", EntityKind::Drop, h.at(-HOUR), None))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Rescheduled {
            start: None,
            end: None,
            emitted: vec![]
        }
    );
    assert!(h.journal.emitted().is_empty());
    assert!(h.journal.scheduled().is_empty());
    assert!(h.journal.cancelled().contains(&old.end_event_handle.unwrap()));

    let record = h.record("drop-1").await.unwrap().value;
    assert_eq!(record.end_time, None);
    assert_eq!(record.start_event_handle, None);
    assert_eq!(record.end_event_handle, None);
}

#[tokio::test]
async fn inactive_to_active_emits_started() {
    let h = Harness::new();
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, h.at(HOUR), Some(h.at(3 * HOUR))))
        .await
        .unwrap();
    h.journal.clear();

    let end = h.at(HOUR);
    let outcome = h
        .reconciler
        .apply(updated("drop-1", EntityKind::Drop, h.at(-HOUR), Some(end)))
        .await
        .unwrap();

    assert_eq!(h.journal.emitted(), ["drop.started"]);
    let scheduled = h.journal.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!((scheduled[0].0.as_str(), scheduled[0].1), ("drop.ended", end));
    assert!(matches!(
        outcome,
        ReconcileOutcome::Rescheduled { start: None, end: Some(_), .. }
    ));
}

#[tokio::test]
async fn update_without_record_heals_into_creation() {
    let h = Harness::new();
    let outcome = h
        .reconciler
        .apply(updated("drop-1", EntityKind::Drop, h.at(HOUR), None))
        .await
        .unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Created { start: Some(_), end: None }));
    assert!(h.record("drop-1").await.is_some());
    assert!(h.journal.emitted().is_empty());
}

#[tokio::test]
async fn update_with_other_kind_is_rejected() {
    let h = Harness::new();
    h.reconciler
        .apply(created("x-1", EntityKind::Drop, h.at(HOUR), None))
        .await
        .unwrap();
    h.journal.clear();

    let err = h
        .reconciler
        .apply(updated("x-1", EntityKind::Draw, h.at(2 * HOUR), None))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::KindMismatch {
            stored: EntityKind::Drop,
            received: EntityKind::Draw,
            ..
        }
    ));
    assert!(h.journal.calls().is_empty());
}

#[tokio::test]
async fn draw_start_is_immutable_once_reached() {
    let h = Harness::new();
    h.reconciler
        .apply(created("draw-1", EntityKind::Draw, h.at(HOUR), None))
        .await
        .unwrap();
    let before = h.record("draw-1").await.unwrap();
    h.clock.advance(2 * HOUR);
    h.journal.clear();

    let outcome = h
        .reconciler
        .apply(updated("draw-1", EntityKind::Draw, h.at(HOUR), None))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Stale(StaleReason::DrawAlreadyStarted));
    assert!(h.journal.calls().is_empty());
    assert_eq!(h.record("draw-1").await.unwrap(), before);
}

#[tokio::test]
async fn draw_cannot_be_moved_into_the_past() {
    let h = Harness::new();
    h.reconciler
        .apply(created("draw-1", EntityKind::Draw, h.at(HOUR), None))
        .await
        .unwrap();
    h.journal.clear();

    let outcome = h
        .reconciler
        .apply(updated("draw-1", EntityKind::Draw, h.at(-HOUR), None))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Stale(StaleReason::DrawStartPassed));
    assert!(h.journal.calls().is_empty());
}

#[tokio::test]
async fn future_draw_is_rescheduled() {
    let h = Harness::new();
    h.reconciler
        .apply(created("draw-1", EntityKind::Draw, h.at(HOUR), None))
        .await
        .unwrap();
    let old = h.record("draw-1").await.unwrap().value.start_event_handle.unwrap();
    h.journal.clear();

    let new_start = h.at(4 * HOUR);
    h.reconciler
        .apply(updated("draw-1", EntityKind::Draw, new_start, None))
        .await
        .unwrap();

    assert_eq!(h.journal.cancelled(), [old]);
    let scheduled = h.journal.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!((scheduled[0].0.as_str(), scheduled[0].1), ("prize_draw.started", new_start));
    let record = h.record("draw-1").await.unwrap().value;
    assert_eq!(record.start_time, new_start);
    assert_eq!(record.start_event_handle, Some(scheduled[0].2));
    assert!(h.journal.emitted().is_empty());
}

// ---------------------------------------------------------------------------
// onDeleted
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deleting_an_active_drop_emits_ended_and_removes_it() {
    let h = Harness::new();
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, h.at(-HOUR), Some(h.at(HOUR))))
        .await
        .unwrap();
    let end_handle = h.record("drop-1").await.unwrap().value.end_event_handle.unwrap();
    h.journal.clear();

    let outcome = h.reconciler.apply(deleted("drop-1")).await.unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Removed { emitted: Some(_) }));
    assert_eq!(h.journal.emitted(), ["drop.ended"]);
    assert_eq!(h.journal.cancelled(), [end_handle]);
    assert!(h.record("drop-1").await.is_none());
}

#[tokio::test]
async fn deleting_an_inactive_drop_emits_nothing() {
    let h = Harness::new();
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, h.at(HOUR), Some(h.at(2 * HOUR))))
        .await
        .unwrap();
    h.journal.clear();

    let outcome = h.reconciler.apply(deleted("drop-1")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Removed { emitted: None });
    assert!(h.journal.emitted().is_empty());
    assert_eq!(h.journal.cancelled().len(), 2);
    assert!(h.scheduler.live().is_empty());
    assert!(h.record("drop-1").await.is_none());
}

#[tokio::test]
async fn deleting_a_started_draw_emits_draw_ended() {
    let h = Harness::new();
    h.reconciler
        .apply(created("draw-1", EntityKind::Draw, h.at(HOUR), None))
        .await
        .unwrap();
    h.clock.advance(2 * HOUR);
    h.journal.clear();

    h.reconciler.apply(deleted("draw-1")).await.unwrap();
    assert_eq!(h.journal.emitted(), ["prize_draw.ended"]);
}

#[tokio::test]
async fn deleting_an_unknown_id_is_a_no_op() {
    let h = Harness::new();
    let outcome = h.reconciler.apply(deleted("ghost")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Absent);
    assert!(h.journal.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Failures and rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scheduler_failure_on_create_persists_nothing_and_rolls_back() {
    let h = Harness::new();
    h.scheduler.fail_on_schedule(2);

    let err = h
        .reconciler
        .apply(created("drop-1", EntityKind::Drop, h.at(HOUR), Some(h.at(2 * HOUR))))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Scheduler(_)));
    assert!(matches!(err.retry_policy(), RetryPolicy::Retryable { .. }));
    assert!(h.record("drop-1").await.is_none());
    assert!(h.scheduler.live().is_empty(), "the start timer was cancelled again");
    assert!(!h.journal.calls().contains(&Call::Put));
}

#[tokio::test]
async fn store_failure_on_update_keeps_old_record_and_replay_succeeds() {
    let h = Harness::new();
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, h.at(HOUR), None))
        .await
        .unwrap();
    let before = h.record("drop-1").await.unwrap();

    h.store.set_failing(true);
    let note = updated("drop-1", EntityKind::Drop, h.at(2 * HOUR), None);
    let err = h.reconciler.apply(note.clone()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Store(_)));
    assert_eq!(h.record("drop-1").await.unwrap(), before);
    assert!(h.scheduler.live().is_empty(), "new handle rolled back, old one cancelled");

    h.store.set_failing(false);
    let outcome = h.reconciler.apply(note).await.unwrap();
    let ReconcileOutcome::Rescheduled { start: Some(start), .. } = outcome else {
        panic!("expected a reschedule, got {outcome:?}");
    };
    assert_eq!(h.scheduler.live().into_iter().collect::<Vec<_>>(), [start]);
}

#[tokio::test]
async fn emit_failure_is_retryable_and_replay_emits() {
    let h = Harness::new();
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, h.at(-HOUR), None))
        .await
        .unwrap();
    let note = updated("drop-1", EntityKind::Drop, h.at(HOUR), None);

    h.sink.set_failing(true);
    let err = h.reconciler.apply(note.clone()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Emit(_)));
    assert_eq!(err.retry_policy(), RetryPolicy::Retryable { after: None });
    assert!(h.journal.scheduled().is_empty(), "nothing scheduled after a failed emit");

    h.sink.set_failing(false);
    h.reconciler.apply(note).await.unwrap();
    assert_eq!(h.journal.emitted(), ["drop.ended"]);
}

#[tokio::test]
async fn concurrent_writer_is_detected_by_version_check() {
    let h = Harness::new();
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, h.at(HOUR), None))
        .await
        .unwrap();
    let current = h.record("drop-1").await.unwrap();

    // Another instance rewrites the record behind this one's back.
    h.store
        .inner
        .put(current.value.clone(), WritePrecondition::MatchesVersion(current.version))
        .await
        .unwrap();

    // A write based on the stale read loses.
    let err = h
        .store
        .put(current.value, WritePrecondition::MatchesVersion(current.version))
        .await
        .unwrap_err();
    assert!(matches!(err.retry_policy(), RetryPolicy::Retryable { .. }));
}

// ---------------------------------------------------------------------------
// Deferred deliveries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn current_delivery_is_emitted_and_its_handle_cleared() {
    let h = Harness::new();
    let start = h.at(HOUR);
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, start, Some(h.at(2 * HOUR))))
        .await
        .unwrap();
    let record = h.record("drop-1").await.unwrap().value;
    let handle = record.start_event_handle.unwrap();
    h.clock.advance(HOUR);

    let outcome = h
        .reconciler
        .on_deferred(delivery(EntityKind::Drop, Edge::Started, "drop-1", handle, start))
        .await
        .unwrap();

    assert!(matches!(outcome, DeliveryOutcome::Accepted(ref s) if s.edge == Edge::Started));
    assert_eq!(h.journal.emitted(), ["drop.started"]);
    let after = h.record("drop-1").await.unwrap().value;
    assert_eq!(after.start_event_handle, None);
    assert_eq!(after.end_event_handle, record.end_event_handle);

    // The same delivery again is stale.
    let again = h
        .reconciler
        .on_deferred(delivery(EntityKind::Drop, Edge::Started, "drop-1", handle, start))
        .await
        .unwrap();
    assert_eq!(again, DeliveryOutcome::Discarded(DiscardReason::HandleSuperseded));
    assert_eq!(h.journal.emitted().len(), 1);
}

#[tokio::test]
async fn delivery_of_replaced_timer_is_discarded() {
    let h = Harness::new();
    let start = h.at(HOUR);
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, start, None))
        .await
        .unwrap();
    let old = h.record("drop-1").await.unwrap().value.start_event_handle.unwrap();
    h.reconciler
        .apply(updated("drop-1", EntityKind::Drop, h.at(2 * HOUR), None))
        .await
        .unwrap();

    let outcome = h
        .reconciler
        .on_deferred(delivery(EntityKind::Drop, Edge::Started, "drop-1", old, start))
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Discarded(DiscardReason::HandleSuperseded));
    assert!(h.journal.emitted().is_empty());
}

#[tokio::test]
async fn delivery_after_delete_is_discarded() {
    let h = Harness::new();
    let start = h.at(HOUR);
    h.reconciler
        .apply(created("draw-1", EntityKind::Draw, start, None))
        .await
        .unwrap();
    let handle = h.record("draw-1").await.unwrap().value.start_event_handle.unwrap();
    h.reconciler.apply(deleted("draw-1")).await.unwrap();

    let outcome = h
        .reconciler
        .on_deferred(delivery(EntityKind::Draw, Edge::Started, "draw-1", handle, start))
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Discarded(DiscardReason::RecordMissing));
}

#[tokio::test]
async fn failed_emit_at_fire_time_rearms_the_edge() {
    let h = Harness::new();
    let start = h.at(HOUR);
    h.reconciler
        .apply(created("draw-1", EntityKind::Draw, start, None))
        .await
        .unwrap();
    let fired = h.record("draw-1").await.unwrap().value.start_event_handle.unwrap();
    h.clock.advance(HOUR);
    h.journal.clear();
    h.sink.set_failing(true);

    let err = h
        .reconciler
        .on_deferred(delivery(EntityKind::Draw, Edge::Started, "draw-1", fired, start))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Emit(_)));
    assert_eq!(err.retry_policy(), RetryPolicy::Retryable { after: None });

    let scheduled = h.journal.scheduled();
    assert_eq!(scheduled.len(), 1);
    let (signal, retry_at, retry) = scheduled[0].clone();
    assert_eq!(signal, "prize_draw.started");
    let delay = i64::try_from(DEFAULT_REDELIVERY_DELAY.as_secs()).unwrap();
    assert_eq!(retry_at, h.at(delay));
    assert_eq!(
        h.record("draw-1").await.unwrap().value.start_event_handle,
        Some(retry)
    );

    // Once the sink recovers the redelivery goes through and the fired handle is stale.
    h.sink.set_failing(false);
    let stale = h
        .reconciler
        .on_deferred(delivery(EntityKind::Draw, Edge::Started, "draw-1", fired, start))
        .await
        .unwrap();
    assert_eq!(stale, DeliveryOutcome::Discarded(DiscardReason::HandleSuperseded));

    h.clock.advance(delay);
    let outcome = h
        .reconciler
        .on_deferred(delivery(EntityKind::Draw, Edge::Started, "draw-1", retry, retry_at))
        .await
        .unwrap();
    assert!(matches!(outcome, DeliveryOutcome::Accepted(_)));
    assert_eq!(h.journal.emitted(), ["prize_draw.started"]);
    assert_eq!(h.record("draw-1").await.unwrap().value.start_event_handle, None);
}

#[tokio::test]
async fn failed_handle_clear_leaves_the_edge_for_rearming() {
    let h = Harness::new();
    let start = h.at(HOUR);
    h.reconciler
        .apply(created("drop-1", EntityKind::Drop, start, None))
        .await
        .unwrap();
    let fired = h.record("drop-1").await.unwrap().value.start_event_handle.unwrap();
    h.clock.advance(HOUR);
    h.journal.clear();
    h.store.set_failing(true);

    let err = h
        .reconciler
        .on_deferred(delivery(EntityKind::Drop, Edge::Started, "drop-1", fired, start))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Store(_)));
    assert_eq!(h.journal.emitted(), ["drop.started"]);

    // The redelivery timer could not be recorded, so it was withdrawn.
    let (_, _, retry) = h.journal.scheduled()[0].clone();
    assert_eq!(h.journal.cancelled(), [retry]);
    assert_eq!(
        h.record("drop-1").await.unwrap().value.start_event_handle,
        Some(fired)
    );

    h.store.set_failing(false);
    let report = h.reconciler.rearm_pending().await.unwrap();
    assert_eq!(
        report,
        RearmReport {
            records: 1,
            rearmed: 1,
            dropped: 0
        }
    );
    let rearmed = h.record("drop-1").await.unwrap().value.start_event_handle.unwrap();
    assert_ne!(rearmed, fired);

    let outcome = h
        .reconciler
        .on_deferred(delivery(EntityKind::Drop, Edge::Started, "drop-1", rearmed, start))
        .await
        .unwrap();
    assert!(matches!(outcome, DeliveryOutcome::Accepted(_)));
    assert_eq!(h.journal.emitted(), ["drop.started", "drop.started"]);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

fn seed(h: &Harness, start: Timestamp, end: Option<Timestamp>) -> [EventHandle; 2] {
    let handles = [EventHandle::new_random(), EventHandle::new_random()];
    let entity = ScheduledEntity {
        external_id: id("drop-p"),
        kind: EntityKind::Drop,
        start_time: start,
        end_time: end,
        start_event_handle: Some(handles[0]),
        end_event_handle: Some(handles[1]),
    };
    block_on(h.store.inner.put(entity, WritePrecondition::MustNotExist)).unwrap();
    handles
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

/// An inactive window relative to `now`: either entirely future or already ended.
fn inactive_window() -> impl Strategy<Value = (i64, Option<i64>)> {
    prop_oneof![
        (1..10 * HOUR, proptest::option::of(0..10 * HOUR))
            .prop_map(|(start, len)| (start, len.map(|l| start + l))),
        (-10 * HOUR..0, 0..10 * HOUR).prop_map(|(end, len)| (end - len, Some(end))),
    ]
}

proptest! {
    #[test]
    fn any_active_to_inactive_update_emits_exactly_one_ended(
        old_start in -10 * HOUR..=0,
        old_len in proptest::option::of(1..10 * HOUR),
        (new_start, new_end) in inactive_window(),
    ) {
        let h = Harness::new();
        let old_end = old_len.map(|l| h.at(l));
        let seeded = seed(&h, h.at(old_start), old_end);

        let outcome = block_on(h.reconciler.apply(updated(
            "drop-p",
            EntityKind::Drop,
            h.at(new_start),
            new_end.map(|e| h.at(e)),
        )))
        .unwrap();

        prop_assert!(
            matches!(outcome, ReconcileOutcome::Rescheduled { .. }),
            "expected a reschedule, got {:?}",
            outcome
        );
        prop_assert_eq!(h.journal.emitted(), vec!["drop.ended".to_string()]);
        prop_assert_eq!(h.journal.cancelled(), seeded.to_vec());
    }
}
