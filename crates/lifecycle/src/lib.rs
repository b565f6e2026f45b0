//! Core domain for the drop/draw lifecycle orchestrator.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, port trait, and port-level error type used by the orchestrator.
//! Infrastructure crates implement the traits defined here; they never add
//! domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ExternalId`, `EventHandle`, `Email`, ...) |
//! | [`types`] | Value types (`Timestamp`, `ActivationWindow`, `ScheduledEntity`, ...) |
//! | [`signals`] | Lifecycle signals, deferred deliveries, inbound notifications |
//! | [`errors`] | Port-level error and retry-policy types |
//! | [`ports`] | Store, scheduler, sink, catalog, order, directory and clock traits |
//! | [`selection`] | Fisher–Yates winner selection |

pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod selection;
pub mod signals;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{EmitError, RetryPolicy, SchedulerError, StoreError, UpstreamError};
pub use identifiers::{DrawId, Email, EventHandle, ExternalId, InvalidIdentifier, OrderId};
pub use ports::{
    Clock, DeferredScheduler, DomainEventSink, DrawCatalog, OrderCreator, ParticipantDirectory,
    RecordStore, SignupInsert, SignupStore, SystemClock,
};
pub use selection::select_winners;
pub use signals::{DeferredDelivery, Edge, LifecycleSignal, Notification};
pub use types::{
    ActivationWindow, DrawConfig, EntityKind, Participant, PrizeLineItem, RecordVersion,
    ScheduledEntity, SignupRecord, Timestamp, Versioned, WritePrecondition,
};
