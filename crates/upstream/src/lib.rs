//! Upstream admin platform adapters.
//!
//! | Type | Implements |
//! |------|------------|
//! | [`HttpUpstreamClient`] | [`lifecycle::DrawCatalog`], [`lifecycle::OrderCreator`], [`lifecycle::ParticipantDirectory`] |
//! | [`HttpEventForwarder`] | [`lifecycle::DomainEventSink`] (POSTs each signal downstream) |
//! | [`LogEventSink`] | [`lifecycle::DomainEventSink`] (structured log only) |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, wire shapes and status mapping live
//! here. The orchestrator sees only the port traits and
//! [`lifecycle::UpstreamError`], whose `retry_policy()` reflects the status
//! codes mapped below.

mod client;
mod events;

use std::time::Duration;

use lifecycle::UpstreamError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use thiserror::Error;

pub use client::{HttpUpstreamClient, UpstreamSettings};
pub use events::{HttpEventForwarder, LogEventSink};

/// Appends percent-encoded path `segments` to `base`.
///
/// Identifiers from the admin platform may contain `/` (for example
/// `gid://shop/Product/1`), so each one is a single encoded segment.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, UpstreamError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| UpstreamError::Transport {
            message: format!("cannot build a request path on {base}"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Construction failures for the HTTP adapters.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The configured URL is unusable as a request base.
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl {
        /// URL as configured.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The underlying HTTP client could not be created.
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Parses a URL from configuration, requiring one that can carry a path.
pub(crate) fn parse_base(raw: &str) -> Result<Url, BuildError> {
    let url = Url::parse(raw).map_err(|e| BuildError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(BuildError::InvalidUrl {
            url: raw.to_string(),
            reason: "not a hierarchical url".to_string(),
        });
    }
    Ok(url)
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub(crate) fn status_error(status: StatusCode, headers: &HeaderMap, body: String) -> UpstreamError {
    UpstreamError::Status {
        status: status.as_u16(),
        message: if body.is_empty() {
            status.to_string()
        } else {
            body
        },
        retry_after: retry_after(headers),
    }
}

pub(crate) fn transport_error(e: &reqwest::Error) -> UpstreamError {
    UpstreamError::Transport {
        message: e.to_string(),
    }
}
