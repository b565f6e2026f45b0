//! Errors surfaced by the orchestration entry points.
//!
//! Benign conditions (duplicate notifications, stale draws, missing upstream
//! records when a timer fires) are *outcomes*, not errors; see
//! [`crate::ReconcileOutcome`] and [`crate::DrawOutcome`].

use lifecycle::{
    DrawId, EmitError, EntityKind, ExternalId, RetryPolicy, SchedulerError, StoreError, Timestamp,
    UpstreamError,
};
use thiserror::Error;

/// Hard failures of a [`crate::Reconciler`] entry point.
///
/// When one of these is returned, no store write from that invocation has been
/// committed.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The notification's end precedes its start.
    #[error("invalid window for {external_id}: end {end} precedes start {start}")]
    InvalidWindow {
        /// Entity the notification concerned.
        external_id: ExternalId,
        /// Window start as received.
        start: Timestamp,
        /// Window end as received.
        end: Timestamp,
    },

    /// An update arrived for a record of a different kind.
    #[error("{external_id} is stored as a {stored} but was notified as a {received}")]
    KindMismatch {
        /// Entity the notification concerned.
        external_id: ExternalId,
        /// Kind held by the persisted record.
        stored: EntityKind,
        /// Kind carried by the notification.
        received: EntityKind,
    },

    /// The Persisted Record Store failed (including lost optimistic races).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The Deferred Event Scheduler failed to schedule or cancel.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// An immediate transition event could not be published.
    #[error(transparent)]
    Emit(#[from] EmitError),
}

impl ReconcileError {
    /// Returns the retry advice for the notification producer.
    ///
    /// Malformed notifications are final. Everything else is safe to replay:
    /// a replay re-reads the record and re-derives the same decisions.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            ReconcileError::InvalidWindow { .. } | ReconcileError::KindMismatch { .. } => {
                RetryPolicy::NonRetryable
            }
            ReconcileError::Store(e) => e.retry_policy(),
            ReconcileError::Scheduler(e) => e.retry_policy(),
            ReconcileError::Emit(_) => RetryPolicy::Retryable { after: None },
        }
    }
}

/// Failures that abort a whole draw execution.
///
/// Per-winner order failures never produce this; they are reported in
/// [`crate::DrawReport::failed`].
#[derive(Debug, Error)]
pub enum DrawError {
    /// The draw configuration could not be fetched.
    #[error("failed to fetch configuration for draw {draw_id}: {source}")]
    Catalog {
        /// Draw being executed.
        draw_id: DrawId,
        /// Underlying failure.
        #[source]
        source: UpstreamError,
    },

    /// The signups could not be read.
    #[error("failed to fetch signups for draw {draw_id}: {source}")]
    Signups {
        /// Draw being executed.
        draw_id: DrawId,
        /// Underlying failure.
        #[source]
        source: StoreError,
    },
}

/// Rejections and failures of signup registration.
#[derive(Debug, Error)]
pub enum SignupError {
    /// The draw does not exist upstream.
    #[error("draw {0} not found")]
    DrawNotFound(DrawId),

    /// The registration lacks a first or last name.
    #[error("registration for draw {0} needs a first and last name")]
    MissingName(DrawId),

    /// The presented secret does not match the draw's secret, or the draw has none.
    #[error("invalid secret for draw {0}")]
    InvalidSecret(DrawId),

    /// The id refers to a drop, not a draw.
    #[error("{0} is not a prize draw")]
    NotADraw(DrawId),

    /// The draw has already started; the signup period is over.
    #[error("signups for draw {draw_id} closed at {started_at}")]
    SignupClosed {
        /// Draw the registration targeted.
        draw_id: DrawId,
        /// When the draw started.
        started_at: Timestamp,
    },

    /// The draw configuration could not be fetched.
    #[error(transparent)]
    Catalog(#[from] UpstreamError),

    /// Signup or record storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
