//! Orchestration layer for drop and prize-draw lifecycles.
//!
//! This crate sequences calls between the business rules in [`lifecycle`] and
//! the infrastructure behind its port traits. It owns no I/O of its own.
//!
//! | Component | Triggered by |
//! |-----------|--------------|
//! | [`Reconciler`] | create/update/delete notifications and deferred deliveries |
//! | [`DrawExecutionEngine`] | an accepted `prize_draw.started` delivery |
//! | [`SignupRegistrar`] | a participant registering for a draw |

pub mod draw;
pub mod errors;
mod keyed_lock;
pub mod reconciler;
pub mod signups;

pub use draw::{DrawExecutionEngine, DrawOutcome, DrawReport, WinnerFailure, WinnerOrder};
pub use errors::{DrawError, ReconcileError, SignupError};
pub use reconciler::{
    DeliveryOutcome, DiscardReason, RearmReport, ReconcileOutcome, Reconciler, StaleReason,
    DEFAULT_REDELIVERY_DELAY,
};
pub use signups::{SignupOutcome, SignupRegistrar};
