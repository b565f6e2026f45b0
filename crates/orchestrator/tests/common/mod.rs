//! In-process fakes for every port, sharing one call journal so tests can
//! assert both what happened and in which order.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use lifecycle::{
    Clock, DeferredScheduler, DomainEventSink, DrawCatalog, DrawConfig, DrawId, EmitError, Email,
    EventHandle, ExternalId, LifecycleSignal, OrderCreator, OrderId, Participant,
    ParticipantDirectory, PrizeLineItem, RecordStore, RecordVersion, ScheduledEntity, SchedulerError, StoreError, Timestamp, UpstreamError,
    Versioned, WritePrecondition,
};
use orchestrator::Reconciler;
use store::MemoryStore;

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Schedule {
        signal: String,
        at: Timestamp,
        handle: EventHandle,
    },
    Cancel(EventHandle),
    Emit(String),
    Put,
    Delete,
}

#[derive(Debug, Default)]
pub struct Journal {
    calls: Mutex<Vec<Call>>,
}

impl Journal {
    pub fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn scheduled(&self) -> Vec<(String, Timestamp, EventHandle)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Schedule { signal, at, handle } => Some((signal, at, handle)),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<EventHandle> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Cancel(h) => Some(h),
                _ => None,
            })
            .collect()
    }

    pub fn emitted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Emit(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// True if the scheduler was neither asked to schedule nor cancel.
    pub fn scheduler_untouched(&self) -> bool {
        self.calls()
            .iter()
            .all(|c| !matches!(c, Call::Schedule { .. } | Call::Cancel(_)))
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Records calls and hands out fresh handles. `fail_on_schedule(n)` makes the
/// n-th schedule call (1-based) fail.
pub struct RecordingScheduler {
    journal: Arc<Journal>,
    schedule_calls: AtomicUsize,
    fail_at: AtomicUsize,
    live: Mutex<HashSet<EventHandle>>,
}

impl RecordingScheduler {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            schedule_calls: AtomicUsize::new(0),
            fail_at: AtomicUsize::new(0),
            live: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_on_schedule(&self, nth: usize) {
        self.schedule_calls.store(0, Ordering::SeqCst);
        self.fail_at.store(nth, Ordering::SeqCst);
    }

    /// Handles scheduled and not yet cancelled.
    pub fn live(&self) -> HashSet<EventHandle> {
        self.live.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeferredScheduler for RecordingScheduler {
    async fn schedule(
        &self,
        signal: LifecycleSignal,
        deliver_at: Timestamp,
    ) -> Result<EventHandle, SchedulerError> {
        let n = self.schedule_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at.load(Ordering::SeqCst) {
            return Err(SchedulerError::Unavailable {
                message: "injected".into(),
            });
        }
        let handle = EventHandle::new_random();
        self.live.lock().unwrap().insert(handle);
        self.journal.record(Call::Schedule {
            signal: signal.name(),
            at: deliver_at,
            handle,
        });
        Ok(handle)
    }

    async fn cancel(&self, handle: EventHandle) -> Result<(), SchedulerError> {
        self.live.lock().unwrap().remove(&handle);
        self.journal.record(Call::Cancel(handle));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

pub struct RecordingSink {
    journal: Arc<Journal>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DomainEventSink for RecordingSink {
    async fn emit(&self, signal: &LifecycleSignal) -> Result<(), EmitError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmitError {
                signal_name: signal.name(),
                message: "injected".into(),
            });
        }
        self.journal.record(Call::Emit(signal.name()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A [`MemoryStore`] that journals writes and can be told to fail them.
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    journal: Arc<Journal>,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            inner: MemoryStore::new(),
            journal,
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Io {
                message: "injected".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Versioned<ScheduledEntity>>, StoreError> {
        self.inner.get(external_id).await
    }

    async fn put(
        &self,
        entity: ScheduledEntity,
        precondition: WritePrecondition,
    ) -> Result<RecordVersion, StoreError> {
        self.check()?;
        self.journal.record(Call::Put);
        self.inner.put(entity, precondition).await
    }

    async fn delete(
        &self,
        external_id: &ExternalId,
        expected: RecordVersion,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.journal.record(Call::Delete);
        self.inner.delete(external_id, expected).await
    }

    async fn list(&self) -> Result<Vec<Versioned<ScheduledEntity>>, StoreError> {
        self.inner.list().await
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub struct FixedClock {
    now: Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, seconds: i64) {
        let mut now = self.now.lock().unwrap();
        *now = now.offset_seconds(seconds);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

/// A fixed reference instant for tests.
pub fn t0() -> Timestamp {
    Timestamp::from_utc(Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap())
}

pub const HOUR: i64 = 60 * 60;

pub fn id(s: &str) -> ExternalId {
    ExternalId::new(s).unwrap()
}

pub fn email(s: &str) -> Email {
    Email::new(s).unwrap()
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCatalog {
    configs: Mutex<HashMap<DrawId, DrawConfig>>,
    unavailable: AtomicBool,
}

impl FakeCatalog {
    pub fn with_draw(self, draw_id: &DrawId, config: DrawConfig) -> Self {
        self.configs.lock().unwrap().insert(draw_id.clone(), config);
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl DrawCatalog for FakeCatalog {
    async fn fetch_draw_config(
        &self,
        draw_id: &DrawId,
    ) -> Result<Option<DrawConfig>, UpstreamError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(UpstreamError::Status {
                status: 503,
                message: "maintenance".into(),
                retry_after: None,
            });
        }
        Ok(self.configs.lock().unwrap().get(draw_id).cloned())
    }
}

pub fn draw_config(number_available: u32, secret: Option<&str>) -> DrawConfig {
    DrawConfig {
        number_available,
        prize_line_item: PrizeLineItem {
            variant_id: "variant-1".into(),
            quantity: 1,
        },
        secret: secret.map(str::to_string),
    }
}

/// Records order calls; addresses in `failing` are answered with a 500.
#[derive(Default)]
pub struct FakeOrders {
    calls: Mutex<Vec<(DrawId, Email, PrizeLineItem)>>,
    failing: Mutex<HashSet<Email>>,
}

impl FakeOrders {
    pub fn fail_for(&self, email: &Email) {
        self.failing.lock().unwrap().insert(email.clone());
    }

    pub fn calls(&self) -> Vec<(DrawId, Email, PrizeLineItem)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderCreator for FakeOrders {
    async fn create_order_for_winner(
        &self,
        draw_id: &DrawId,
        email: &Email,
        prize: &PrizeLineItem,
    ) -> Result<OrderId, UpstreamError> {
        self.calls
            .lock()
            .unwrap()
            .push((draw_id.clone(), email.clone(), prize.clone()));
        if self.failing.lock().unwrap().contains(email) {
            return Err(UpstreamError::Status {
                status: 500,
                message: "order service down".into(),
                retry_after: None,
            });
        }
        Ok(OrderId::new(format!("order-for-{email}")).unwrap())
    }
}

/// Records customer tagging calls; can be told to answer with a 502.
#[derive(Default)]
pub struct FakeDirectory {
    calls: Mutex<Vec<(Participant, DrawId)>>,
    failing: AtomicBool,
}

impl FakeDirectory {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(Participant, DrawId)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ParticipantDirectory for FakeDirectory {
    async fn tag_participant(
        &self,
        participant: &Participant,
        draw_id: &DrawId,
    ) -> Result<(), UpstreamError> {
        self.calls
            .lock()
            .unwrap()
            .push((participant.clone(), draw_id.clone()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::Status {
                status: 502,
                message: "bad gateway".into(),
                retry_after: None,
            });
        }
        Ok(())
    }
}

pub fn participant(address: &str) -> Participant {
    Participant {
        email: email(address),
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub journal: Arc<Journal>,
    pub store: FlakyStore,
    pub scheduler: Arc<RecordingScheduler>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<FixedClock>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        let journal = Arc::new(Journal::default());
        let store = FlakyStore::new(Arc::clone(&journal));
        let scheduler = Arc::new(RecordingScheduler::new(Arc::clone(&journal)));
        let sink = Arc::new(RecordingSink::new(Arc::clone(&journal)));
        let clock = Arc::new(FixedClock::new(t0()));
        let reconciler = Reconciler::new(
            Arc::new(store.clone()),
            scheduler.clone(),
            sink.clone(),
            clock.clone(),
        );
        Self {
            journal,
            store,
            scheduler,
            sink,
            clock,
            reconciler,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// `now + seconds`.
    pub fn at(&self, seconds: i64) -> Timestamp {
        self.now().offset_seconds(seconds)
    }

    pub async fn record(&self, external_id: &str) -> Option<Versioned<ScheduledEntity>> {
        self.store.get(&id(external_id)).await.unwrap()
    }
}
