//! Port-level error and retry-policy types.
//!
//! Each port trait in [`crate::ports`] has its own error type so adapters can
//! report failures precisely and the orchestration layer can decide whether a
//! failure is worth surfacing as retryable to the notification producer.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EventHandle, ExternalId, RecordVersion};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// The reconciler never retries on its own; this is advice for whoever drives
/// it (the webhook glue, a queue consumer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately or apply the caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried without human intervention.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Persisted Record Store
// ---------------------------------------------------------------------------

/// Failures of a [`crate::RecordStore`] or [`crate::SignupStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional write lost a race with another writer for the same key.
    #[error("conflicting write for {external_id}: expected {expected:?}, found {actual:?}")]
    Conflict {
        /// Key that was being written.
        external_id: ExternalId,
        /// Version the writer expected (`None` = expected no record).
        expected: Option<RecordVersion>,
        /// Version actually present (`None` = record missing).
        actual: Option<RecordVersion>,
    },

    /// The backing medium could not be read or written.
    #[error("store I/O failure: {message}")]
    Io {
        /// Description of the failure.
        message: String,
    },

    /// Stored data could not be decoded.
    #[error("store data corrupt: {message}")]
    Corrupt {
        /// Description of the decoding failure.
        message: String,
    },
}

impl StoreError {
    /// Conflicts and I/O failures are transient; corrupt data is not.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            StoreError::Conflict { .. } | StoreError::Io { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            StoreError::Corrupt { .. } => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Deferred Event Scheduler
// ---------------------------------------------------------------------------

/// Failures of a [`crate::DeferredScheduler`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler refused the request (e.g. shutting down, capacity reached).
    #[error("scheduler rejected request: {reason}")]
    Rejected {
        /// Why the request was refused.
        reason: String,
    },

    /// The scheduler could not be reached or did not answer in time.
    #[error("scheduler unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// Cancellation of a specific handle failed for a reason other than the
    /// handle being unknown or already fired (both of which are success).
    #[error("failed to cancel {handle}: {message}")]
    CancelFailed {
        /// Handle whose cancellation failed.
        handle: EventHandle,
        /// Description of the failure.
        message: String,
    },
}

impl SchedulerError {
    /// Returns the retry advice for this failure.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            SchedulerError::Rejected { .. } => RetryPolicy::NonRetryable,
            SchedulerError::Unavailable { .. } | SchedulerError::CancelFailed { .. } => {
                RetryPolicy::Retryable { after: None }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Domain event sink
// ---------------------------------------------------------------------------

/// Failure to publish an immediate domain event.
#[derive(Debug, Error)]
#[error("failed to emit {signal_name}: {message}")]
pub struct EmitError {
    /// Name of the signal that could not be published.
    pub signal_name: String,
    /// Description of the failure.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Upstream collaborators
// ---------------------------------------------------------------------------

/// Failures talking to the upstream admin platform.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The upstream service answered with an error status.
    #[error("upstream returned status {status}: {message}")]
    Status {
        /// HTTP-like status code.
        status: u16,
        /// Response body or summary.
        message: String,
        /// Value of a `Retry-After` style hint, if any.
        retry_after: Option<Duration>,
    },

    /// The request did not complete (connection refused, timeout, ...).
    #[error("upstream transport failure: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The response could not be decoded.
    #[error("upstream response invalid: {message}")]
    InvalidResponse {
        /// Description of the decoding failure.
        message: String,
    },
}

impl UpstreamError {
    /// 5xx, 429 and transport failures are retryable; everything else is not.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            UpstreamError::Status {
                status,
                retry_after,
                ..
            } if *status == 429 || *status >= 500 => RetryPolicy::Retryable {
                after: *retry_after,
            },
            UpstreamError::Transport { .. } => RetryPolicy::Retryable { after: None },
            _ => RetryPolicy::NonRetryable,
        }
    }
}
