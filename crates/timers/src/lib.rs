//! In-process Deferred Event Scheduler.
//!
//! [`TokioScheduler`] implements [`lifecycle::DeferredScheduler`] with one
//! sleeping tokio task per handle. When a timer elapses its
//! [`DeferredDelivery`] is sent on the channel returned by
//! [`TokioScheduler::new`]; the consumer validates it against the store before
//! acting, as it must for any scheduler.
//!
//! ## Delivery semantics
//!
//! - At most once per handle: the pending table entry is removed by exactly one
//!   of "fire" or "cancel".
//! - Cancellation is best-effort: a cancel that loses the race with the fire
//!   still succeeds, and the delivery may already be on the channel.
//! - A `deliver_at` already in the past is delivered immediately.
//! - Timers do not survive a restart. Deployments that need that should put a
//!   durable scheduler behind the same trait.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.**

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use lifecycle::{
    Clock, DeferredDelivery, DeferredScheduler, EventHandle, LifecycleSignal, SchedulerError,
    SystemClock, Timestamp,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest single sleep. Long timers re-check the wall clock at this interval,
/// which also bounds drift between the monotonic and wall clocks.
const MAX_SLEEP: Duration = Duration::from_secs(60 * 60);

struct Inner {
    pending: Mutex<HashMap<EventHandle, CancellationToken>>,
    deliveries: mpsc::Sender<DeferredDelivery>,
    shutdown: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl Inner {
    /// Removes `handle` from the pending table, returning its token if this
    /// call was the one to remove it.
    fn take(&self, handle: EventHandle) -> Option<CancellationToken> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
    }
}

/// A [`DeferredScheduler`] backed by tokio timers.
///
/// Cloning shares the pending table and delivery channel.
#[derive(Clone)]
pub struct TokioScheduler {
    inner: Arc<Inner>,
}

impl TokioScheduler {
    /// Creates a scheduler and the receiver its deliveries arrive on.
    ///
    /// `capacity` bounds the delivery channel; a full channel delays the firing
    /// task, never drops the delivery.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DeferredDelivery>) {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    /// As [`TokioScheduler::new`], measuring delays against `clock`.
    pub fn with_clock(
        capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<DeferredDelivery>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let scheduler = Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                deliveries: tx,
                shutdown: CancellationToken::new(),
                clock,
            }),
        };
        (scheduler, rx)
    }

    /// Number of timers armed and not yet fired or cancelled.
    ///
    /// A timer leaves this count in the same step that puts its delivery on
    /// the channel.
    pub fn pending(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cancels every pending timer and refuses new ones.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let drained: Vec<_> = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        debug!(cancelled = drained.len(), "scheduler shut down");
        for (_, token) in drained {
            token.cancel();
        }
    }
}

#[async_trait]
impl DeferredScheduler for TokioScheduler {
    async fn schedule(
        &self,
        signal: LifecycleSignal,
        deliver_at: Timestamp,
    ) -> Result<EventHandle, SchedulerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::Rejected {
                reason: "scheduler is shut down".to_string(),
            });
        }

        let handle = EventHandle::new_random();
        let token = self.inner.shutdown.child_token();
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, token.clone());

        debug!(%handle, signal = %signal.name(), %deliver_at, "timer armed");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_timer(inner, handle, signal, deliver_at, token));
        Ok(handle)
    }

    async fn cancel(&self, handle: EventHandle) -> Result<(), SchedulerError> {
        match self.inner.take(handle) {
            Some(token) => {
                token.cancel();
                debug!(%handle, "timer cancelled");
            }
            None => debug!(%handle, "cancel of unknown or fired timer"),
        }
        Ok(())
    }
}

async fn run_timer(
    inner: Arc<Inner>,
    handle: EventHandle,
    signal: LifecycleSignal,
    deliver_at: Timestamp,
    token: CancellationToken,
) {
    loop {
        let Some(remaining) = deliver_at.duration_since(inner.clock.now()) else {
            break;
        };
        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(remaining.min(MAX_SLEEP)) => {}
        }
    }

    // Removal and send happen under one lock: a fired timer is always either
    // in the table or on the channel.
    let permit = tokio::select! {
        () = token.cancelled() => return,
        permit = inner.deliveries.reserve() => permit,
    };
    let Ok(permit) = permit else {
        inner.take(handle);
        warn!(%handle, "delivery receiver dropped; timer lost");
        return;
    };

    let mut pending = inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
    if pending.remove(&handle).is_none() {
        // Cancelled between wake-up and delivery.
        return;
    }
    permit.send(DeferredDelivery {
        handle,
        signal,
        deliver_at,
    });
}
