//! Port traits: everything the orchestration layer needs from the outside world.
//!
//! Infrastructure crates implement these; the orchestration crate consumes them
//! as trait objects. All async methods use `async_trait` so the traits stay
//! dyn-compatible.

use async_trait::async_trait;

use crate::{
    DrawConfig, DrawId, Email, EmitError, EventHandle, ExternalId, LifecycleSignal, OrderId,
    Participant, PrizeLineItem, RecordVersion, ScheduledEntity, SchedulerError, SignupRecord,
    StoreError, Timestamp, UpstreamError, Versioned, WritePrecondition,
};

/// Persisted Record Store: one [`ScheduledEntity`] per external id.
///
/// Writes are conditional so that read-modify-write sequences for the same key
/// are serialisable: a write whose precondition no longer holds fails with
/// [`StoreError::Conflict`] and leaves the stored record untouched.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the record for `external_id` and its current version.
    async fn get(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Versioned<ScheduledEntity>>, StoreError>;

    /// Inserts or replaces the record keyed by `entity.external_id`.
    ///
    /// Returns the version assigned to the written record.
    async fn put(
        &self,
        entity: ScheduledEntity,
        precondition: WritePrecondition,
    ) -> Result<RecordVersion, StoreError>;

    /// Removes the record if it is still at `expected`.
    async fn delete(
        &self,
        external_id: &ExternalId,
        expected: RecordVersion,
    ) -> Result<(), StoreError>;

    /// Returns every record with its version, ordered by external id.
    async fn list(&self) -> Result<Vec<Versioned<ScheduledEntity>>, StoreError>;
}

/// Deferred Event Scheduler: deliver a signal at or after a given time.
///
/// Delivery is at-most-once per handle from the scheduler's side; consumers
/// must still tolerate a cancelled handle firing once, since cancellation is
/// best-effort.
#[async_trait]
pub trait DeferredScheduler: Send + Sync {
    /// Arms a delivery of `signal` at `deliver_at`.
    ///
    /// A `deliver_at` that has already passed is delivered immediately.
    async fn schedule(
        &self,
        signal: LifecycleSignal,
        deliver_at: Timestamp,
    ) -> Result<EventHandle, SchedulerError>;

    /// Requests cancellation of a pending delivery.
    ///
    /// Cancelling an unknown or already-fired handle succeeds.
    async fn cancel(&self, handle: EventHandle) -> Result<(), SchedulerError>;
}

/// Immediate, non-deferred publication of domain events.
#[async_trait]
pub trait DomainEventSink: Send + Sync {
    /// Publishes `signal` to downstream consumers.
    async fn emit(&self, signal: &LifecycleSignal) -> Result<(), EmitError>;
}

/// Outcome of inserting a signup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignupInsert {
    /// The signup was stored.
    Inserted,
    /// The email already holds a signup (for this or another draw).
    EmailTaken {
        /// Draw the existing signup belongs to.
        existing_draw: DrawId,
    },
}

/// Storage for draw participants.
#[async_trait]
pub trait SignupStore: Send + Sync {
    /// Returns every signup for `draw_id`, in registration order.
    async fn fetch_signups(&self, draw_id: &DrawId) -> Result<Vec<SignupRecord>, StoreError>;

    /// Stores a signup unless its email is already registered.
    async fn insert_signup(&self, signup: SignupRecord) -> Result<SignupInsert, StoreError>;
}

/// Read access to draw configuration held by the upstream system.
#[async_trait]
pub trait DrawCatalog: Send + Sync {
    /// Returns the draw's configuration, or `None` if it no longer exists.
    async fn fetch_draw_config(&self, draw_id: &DrawId)
        -> Result<Option<DrawConfig>, UpstreamError>;
}

/// Creates the prize order for one winner.
#[async_trait]
pub trait OrderCreator: Send + Sync {
    /// Places an order of `prize` for `email`, on behalf of `draw_id`.
    async fn create_order_for_winner(
        &self,
        draw_id: &DrawId,
        email: &Email,
        prize: &PrizeLineItem,
    ) -> Result<OrderId, UpstreamError>;
}

/// Customer records held by the upstream system.
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    /// Creates the participant as a customer if absent and tags them with
    /// `draw_id`. Repeating the call for the same pair changes nothing.
    async fn tag_participant(
        &self,
        participant: &Participant,
        draw_id: &DrawId,
    ) -> Result<(), UpstreamError>;
}

/// Source of "now". Injected so reconciliation decisions are testable.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}
