//! The drop/draw reconciler.
//!
//! Turns create/update/delete notifications into scheduler calls, store writes
//! and immediate transition events, and validates deferred deliveries against
//! the persisted record when they fire.
//!
//! ## Ordering
//!
//! Within one invocation the steps always run in this order:
//!
//! 1. read the record,
//! 2. cancel the old handles,
//! 3. emit synchronous transition events,
//! 4. schedule the new handles,
//! 5. write the record.
//!
//! A failure at any step returns before the store write, so the store never
//! holds a handle the scheduler did not issue. Handles scheduled in step 4 are
//! cancelled again if step 5 fails. Replaying a failed notification re-derives
//! the same decisions from the untouched record.
//!
//! ## Deliveries
//!
//! A delivery whose signal cannot be emitted is armed again after
//! [`DEFAULT_REDELIVERY_DELAY`], so a downstream outage delays an edge rather
//! than losing it. Timers do not outlive the process; after a restart
//! [`Reconciler::rearm_pending`] arms every edge the store still records as
//! pending.
//!
//! ## Concurrency
//!
//! Invocations for the same external id are serialised in-process; the store's
//! conditional writes catch races with other instances.

use std::sync::Arc;
use std::time::Duration;

use lifecycle::{
    ActivationWindow, Clock, DeferredDelivery, DeferredScheduler, DomainEventSink, Edge,
    EntityKind, EventHandle, ExternalId, LifecycleSignal, Notification, RecordStore,
    RecordVersion, ScheduledEntity, StoreError, Timestamp, WritePrecondition,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::keyed_lock::KeyedLocks;
use crate::ReconcileError;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a notification was deliberately skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// A draw whose (new) start time has already been reached.
    DrawStartPassed,
    /// A draw that has already run; its start time is immutable.
    DrawAlreadyStarted,
}

/// What a reconciler entry point did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A new record was persisted with the given handles.
    Created {
        /// Handle of the armed "started" timer, if any.
        start: Option<EventHandle>,
        /// Handle of the armed "ended" timer, if any.
        end: Option<EventHandle>,
    },
    /// A record already existed; nothing was changed.
    Duplicate,
    /// The notification was skipped by rule.
    Stale(StaleReason),
    /// The times did not change; nothing was touched.
    Unchanged,
    /// The record's window was replaced.
    Rescheduled {
        /// Handle of the new "started" timer, if any.
        start: Option<EventHandle>,
        /// Handle of the new "ended" timer, if any.
        end: Option<EventHandle>,
        /// Transition events emitted synchronously.
        emitted: Vec<LifecycleSignal>,
    },
    /// The record was removed.
    Removed {
        /// The "ended" event emitted because the entity was live, if any.
        emitted: Option<LifecycleSignal>,
    },
    /// There was no record to remove.
    Absent,
}

/// Why a deferred delivery was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// The entity has been deleted since the timer was armed.
    RecordMissing,
    /// The record no longer references this handle (cancelled or replaced).
    HandleSuperseded,
}

/// What [`Reconciler::on_deferred`] did with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The delivery was current: the signal was emitted and the handle cleared.
    Accepted(LifecycleSignal),
    /// The delivery was stale and dropped.
    Discarded(DiscardReason),
}

/// What [`Reconciler::rearm_pending`] found in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RearmReport {
    /// Records inspected.
    pub records: usize,
    /// Timers armed on the current scheduler.
    pub rearmed: usize,
    /// Pending edges dropped because they can no longer fire in order.
    pub dropped: usize,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// How long a delivery whose emission failed waits before firing again.
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(30);

/// Reconciles drop/draw notifications against the Persisted Record Store.
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    scheduler: Arc<dyn DeferredScheduler>,
    sink: Arc<dyn DomainEventSink>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<ExternalId>,
    redelivery_delay: Duration,
}

impl Reconciler {
    /// Creates a reconciler over the given collaborators.
    pub fn new(
        store: Arc<dyn RecordStore>,
        scheduler: Arc<dyn DeferredScheduler>,
        sink: Arc<dyn DomainEventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            sink,
            clock,
            locks: KeyedLocks::new(),
            redelivery_delay: DEFAULT_REDELIVERY_DELAY,
        }
    }

    /// Overrides [`DEFAULT_REDELIVERY_DELAY`].
    #[must_use]
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// Dispatches a notification to the matching entry point.
    pub async fn apply(&self, notification: Notification) -> Result<ReconcileOutcome, ReconcileError> {
        match notification {
            Notification::Created {
                external_id,
                kind,
                start_time,
                end_time,
            } => self.on_created(external_id, kind, start_time, end_time).await,
            Notification::Updated {
                external_id,
                kind,
                start_time,
                end_time,
            } => self.on_updated(external_id, kind, start_time, end_time).await,
            Notification::Deleted { external_id } => self.on_deleted(external_id).await,
        }
    }

    /// Handles a "created" notification.
    ///
    /// Idempotent: a second notification for an existing record is a no-op.
    /// A draw whose start has already been reached is skipped.
    #[instrument(skip_all, fields(external_id = %external_id, kind = %kind))]
    pub async fn on_created(
        &self,
        external_id: ExternalId,
        kind: EntityKind,
        start_time: Timestamp,
        end_time: Option<Timestamp>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let window = normalise_window(&external_id, kind, start_time, end_time)?;
        let _guard = self.locks.lock(&external_id).await;

        if self.store.get(&external_id).await?.is_some() {
            debug!("record already exists; duplicate notification absorbed");
            return Ok(ReconcileOutcome::Duplicate);
        }
        self.create_absent(external_id, kind, window).await
    }

    /// Handles an "updated" notification.
    ///
    /// Falls back to creation when no record exists, so a missed "created"
    /// webhook heals itself.
    #[instrument(skip_all, fields(external_id = %external_id, kind = %kind))]
    pub async fn on_updated(
        &self,
        external_id: ExternalId,
        kind: EntityKind,
        start_time: Timestamp,
        end_time: Option<Timestamp>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let new_window = normalise_window(&external_id, kind, start_time, end_time)?;
        let _guard = self.locks.lock(&external_id).await;

        let Some(current) = self.store.get(&external_id).await? else {
            info!("record not found; treating update as creation");
            return self.create_absent(external_id, kind, new_window).await;
        };
        let old = current.value;

        if old.kind != kind {
            return Err(ReconcileError::KindMismatch {
                external_id,
                stored: old.kind,
                received: kind,
            });
        }

        if old.window() == new_window {
            debug!("window unchanged; skipping");
            return Ok(ReconcileOutcome::Unchanged);
        }

        let now = self.clock.now();
        info!(
            previous_start = %old.start_time,
            new_start = %new_window.start,
            "window changed"
        );

        if kind == EntityKind::Draw {
            if !old.start_time.is_after(now) {
                info!("draw already started; ignoring update");
                return Ok(ReconcileOutcome::Stale(StaleReason::DrawAlreadyStarted));
            }
            if !new_window.start.is_after(now) {
                info!("new draw start is in the past; ignoring update");
                return Ok(ReconcileOutcome::Stale(StaleReason::DrawStartPassed));
            }
        }

        let was_active = old.window().is_active_at(now);
        let is_active = new_window.is_active_at(now);

        self.cancel_all(&old).await?;

        let mut emitted = Vec::new();
        if was_active && !is_active {
            emitted.push(self.emit(kind, Edge::Ended, &external_id).await?);
        }
        if !was_active && is_active {
            emitted.push(self.emit(kind, Edge::Started, &external_id).await?);
        }

        let (start, end) = self.schedule_window(kind, &external_id, new_window, now).await?;
        let updated = ScheduledEntity {
            external_id,
            kind,
            start_time: new_window.start,
            end_time: new_window.end,
            start_event_handle: start,
            end_event_handle: end,
        };
        if let Err(e) = self
            .store
            .put(updated, WritePrecondition::MatchesVersion(current.version))
            .await
        {
            self.rollback([start, end]).await;
            return Err(e.into());
        }

        Ok(ReconcileOutcome::Rescheduled {
            start,
            end,
            emitted,
        })
    }

    /// Handles a "deleted" notification.
    ///
    /// Emits an "ended" event if the entity was live at the moment of deletion.
    #[instrument(skip_all, fields(external_id = %external_id))]
    pub async fn on_deleted(
        &self,
        external_id: ExternalId,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let _guard = self.locks.lock(&external_id).await;

        let Some(current) = self.store.get(&external_id).await? else {
            debug!("no record; nothing to delete");
            return Ok(ReconcileOutcome::Absent);
        };
        let entity = current.value;
        let now = self.clock.now();

        self.cancel_all(&entity).await?;

        let emitted = if entity.window().is_active_at(now) {
            Some(self.emit(entity.kind, Edge::Ended, &external_id).await?)
        } else {
            None
        };

        self.store.delete(&external_id, current.version).await?;
        info!(was_active = emitted.is_some(), "record removed");
        Ok(ReconcileOutcome::Removed { emitted })
    }

    /// Validates a deferred delivery against the persisted record.
    ///
    /// Cancellation is best-effort, so a cancelled or replaced timer may still
    /// fire. Only a delivery whose handle is still the record's handle for that
    /// edge is forwarded; the handle is then cleared.
    ///
    /// If the signal cannot be emitted, or the cleared handle cannot be
    /// written, the edge is armed again before the error is returned.
    #[instrument(skip_all, fields(external_id = %delivery.signal.entity_id, signal = %delivery.signal.name()))]
    pub async fn on_deferred(
        &self,
        delivery: DeferredDelivery,
    ) -> Result<DeliveryOutcome, ReconcileError> {
        let external_id = delivery.signal.entity_id.clone();
        let _guard = self.locks.lock(&external_id).await;

        let Some(current) = self.store.get(&external_id).await? else {
            info!("entity no longer exists; discarding delivery");
            return Ok(DeliveryOutcome::Discarded(DiscardReason::RecordMissing));
        };
        let mut entity = current.value;
        let edge = delivery.signal.edge;

        if entity.kind != delivery.signal.kind || entity.handle_for(edge) != Some(delivery.handle) {
            info!(handle = %delivery.handle, "handle superseded; discarding delivery");
            return Ok(DeliveryOutcome::Discarded(DiscardReason::HandleSuperseded));
        }

        if let Err(e) = self.sink.emit(&delivery.signal).await {
            warn!(error = %e, "emit failed; re-arming delivery");
            self.redeliver(entity, current.version, delivery.signal).await;
            return Err(e.into());
        }

        let fired = entity.clone();
        entity.clear_handle(edge);
        if let Err(e) = self
            .store
            .put(entity, WritePrecondition::MatchesVersion(current.version))
            .await
        {
            warn!(error = %e, "failed to clear fired handle; re-arming delivery");
            self.redeliver(fired, current.version, delivery.signal).await;
            return Err(e.into());
        }
        Ok(DeliveryOutcome::Accepted(delivery.signal))
    }

    /// Arms every edge the store records as pending on the current scheduler.
    ///
    /// Meant for startup, when the scheduler holds none of the stored handles.
    /// Each pending edge gets a fresh timer at its original time, so an edge
    /// that fell due while the process was down fires immediately. A start
    /// edge whose window has already closed is dropped; only its end fires.
    /// Calling this again replaces the handles it armed before.
    #[instrument(skip_all)]
    pub async fn rearm_pending(&self) -> Result<RearmReport, ReconcileError> {
        let mut report = RearmReport::default();
        for listed in self.store.list().await? {
            let external_id = listed.value.external_id;
            let _guard = self.locks.lock(&external_id).await;
            let Some(current) = self.store.get(&external_id).await? else {
                continue;
            };
            report.records += 1;
            self.rearm_record(current.value, current.version, &mut report)
                .await?;
        }
        info!(
            records = report.records,
            rearmed = report.rearmed,
            dropped = report.dropped,
            "pending timers re-armed"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Creates a record known to be absent. Caller holds the key lock.
    async fn create_absent(
        &self,
        external_id: ExternalId,
        kind: EntityKind,
        window: ActivationWindow,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let now = self.clock.now();

        if kind == EntityKind::Draw && !window.start.is_after(now) {
            info!(start = %window.start, "draw start time is in the past; skipping");
            return Ok(ReconcileOutcome::Stale(StaleReason::DrawStartPassed));
        }

        let (start, end) = self.schedule_window(kind, &external_id, window, now).await?;
        let entity = ScheduledEntity {
            external_id,
            kind,
            start_time: window.start,
            end_time: window.end,
            start_event_handle: start,
            end_event_handle: end,
        };

        match self.store.put(entity, WritePrecondition::MustNotExist).await {
            Ok(_) => {
                info!(
                    start_handle = ?start,
                    end_handle = ?end,
                    "record created"
                );
                Ok(ReconcileOutcome::Created { start, end })
            }
            Err(StoreError::Conflict { .. }) => {
                // Another instance created the record first.
                self.rollback([start, end]).await;
                debug!("lost creation race; duplicate notification absorbed");
                Ok(ReconcileOutcome::Duplicate)
            }
            Err(e) => {
                self.rollback([start, end]).await;
                Err(e.into())
            }
        }
    }

    /// Re-arms the pending edges of one record. Caller holds the key lock.
    async fn rearm_record(
        &self,
        mut entity: ScheduledEntity,
        version: RecordVersion,
        report: &mut RearmReport,
    ) -> Result<(), ReconcileError> {
        let pending: Vec<(Edge, EventHandle)> = entity.handles().collect();
        if pending.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        let closed = entity.end_time.is_some_and(|end| !end.is_after(now));

        let mut armed = Vec::new();
        for (edge, old) in pending {
            self.scheduler.cancel(old).await?;
            let due = match entity.time_of(edge) {
                Some(due) if !(edge == Edge::Started && closed) => due,
                _ => {
                    debug!(edge = edge.as_str(), "window closed; dropping pending edge");
                    entity.clear_handle(edge);
                    report.dropped += 1;
                    continue;
                }
            };
            let signal = LifecycleSignal::new(entity.kind, edge, entity.external_id.clone());
            match self.scheduler.schedule(signal, due).await {
                Ok(handle) => {
                    entity.set_handle(edge, Some(handle));
                    armed.push(Some(handle));
                }
                Err(e) => {
                    self.rollback(armed).await;
                    return Err(e.into());
                }
            }
        }

        let count = armed.len();
        if let Err(e) = self
            .store
            .put(entity, WritePrecondition::MatchesVersion(version))
            .await
        {
            self.rollback(armed).await;
            return Err(e.into());
        }
        report.rearmed += count;
        Ok(())
    }

    /// Arms `signal` again after the redelivery delay and records the new
    /// handle. On failure the fired handle stays recorded, so the next
    /// [`Reconciler::rearm_pending`] picks the edge up.
    async fn redeliver(
        &self,
        mut entity: ScheduledEntity,
        version: RecordVersion,
        signal: LifecycleSignal,
    ) {
        let edge = signal.edge;
        let delay = i64::try_from(self.redelivery_delay.as_secs()).unwrap_or(i64::MAX);
        let retry_at = self.clock.now().offset_seconds(delay);
        let handle = match self.scheduler.schedule(signal, retry_at).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "failed to re-arm delivery");
                return;
            }
        };
        entity.set_handle(edge, Some(handle));
        match self
            .store
            .put(entity, WritePrecondition::MatchesVersion(version))
            .await
        {
            Ok(_) => info!(%handle, %retry_at, "delivery re-armed"),
            Err(e) => {
                warn!(error = %e, "failed to record re-armed delivery");
                self.rollback([Some(handle)]).await;
            }
        }
    }

    /// Arms timers for every edge of `window` that lies in the future.
    async fn schedule_window(
        &self,
        kind: EntityKind,
        external_id: &ExternalId,
        window: ActivationWindow,
        now: Timestamp,
    ) -> Result<(Option<EventHandle>, Option<EventHandle>), ReconcileError> {
        let start = if window.start.is_after(now) {
            let signal = LifecycleSignal::new(kind, Edge::Started, external_id.clone());
            Some(self.scheduler.schedule(signal, window.start).await?)
        } else {
            None
        };

        let end = match window.end {
            Some(end_time) if end_time.is_after(now) => {
                let signal = LifecycleSignal::new(kind, Edge::Ended, external_id.clone());
                match self.scheduler.schedule(signal, end_time).await {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        self.rollback([start]).await;
                        return Err(e.into());
                    }
                }
            }
            _ => None,
        };

        Ok((start, end))
    }

    async fn cancel_all(&self, entity: &ScheduledEntity) -> Result<(), ReconcileError> {
        for (edge, handle) in entity.handles() {
            debug!(edge = edge.as_str(), %handle, "cancelling timer");
            self.scheduler.cancel(handle).await?;
        }
        Ok(())
    }

    /// Best-effort cancellation of handles armed by a failed invocation.
    async fn rollback(&self, handles: impl IntoIterator<Item = Option<EventHandle>>) {
        for handle in handles.into_iter().flatten() {
            if let Err(e) = self.scheduler.cancel(handle).await {
                warn!(%handle, error = %e, "failed to roll back timer; it may fire once");
            }
        }
    }

    async fn emit(
        &self,
        kind: EntityKind,
        edge: Edge,
        external_id: &ExternalId,
    ) -> Result<LifecycleSignal, ReconcileError> {
        let signal = LifecycleSignal::new(kind, edge, external_id.clone());
        info!(signal = %signal.name(), "emitting transition");
        self.sink.emit(&signal).await?;
        Ok(signal)
    }
}

/// Applies the window rules shared by create and update.
///
/// Draws never end, so any end time on a draw is discarded. An end before the
/// start is rejected.
fn normalise_window(
    external_id: &ExternalId,
    kind: EntityKind,
    start: Timestamp,
    end: Option<Timestamp>,
) -> Result<ActivationWindow, ReconcileError> {
    let end = match kind {
        EntityKind::Drop => end,
        EntityKind::Draw => {
            if end.is_some() {
                debug!("ignoring end time on prize draw");
            }
            None
        }
    };
    let window = ActivationWindow::new(start, end);
    match window.end {
        Some(end) if !window.is_well_formed() => Err(ReconcileError::InvalidWindow {
            external_id: external_id.clone(),
            start,
            end,
        }),
        _ => Ok(window),
    }
}
