//! Shared value types for the drop/draw lifecycle domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (a window's end never precedes its start,
//! at most one pending handle per edge) and participate in domain computations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Edge, Email, EventHandle, ExternalId};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Returns this timestamp shifted by a signed number of seconds.
    ///
    /// Saturates at the representable range rather than overflowing.
    #[must_use]
    pub fn offset_seconds(self, seconds: i64) -> Self {
        chrono::TimeDelta::try_seconds(seconds)
            .and_then(|delta| self.0.checked_add_signed(delta))
            .map_or(self, Self)
    }

    /// Returns `true` if this instant lies strictly after `now`.
    ///
    /// An instant equal to `now` is considered already reached.
    pub fn is_after(self, now: Timestamp) -> bool {
        self.0 > now.0
    }

    /// Returns how long until `self` is reached from `now`, or `None` if it
    /// has already been reached.
    pub fn duration_since(self, now: Timestamp) -> Option<Duration> {
        if self.is_after(now) {
            (self.0 - now.0).to_std().ok()
        } else {
            None
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Entity kind
// ---------------------------------------------------------------------------

/// Which lifecycle a scheduled entity follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A product-availability window with a start and optional end.
    Drop,
    /// A prize lottery that runs once at its start time and never ends.
    #[serde(rename = "prize_draw")]
    Draw,
}

impl EntityKind {
    /// Wire name used as the prefix of lifecycle signal names.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Drop => "drop",
            EntityKind::Draw => "prize_draw",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Activation window
// ---------------------------------------------------------------------------

/// The interval during which an entity is live: `[start, end)`, open-ended
/// when `end` is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationWindow {
    /// First instant at which the entity is live.
    pub start: Timestamp,
    /// First instant at which the entity is no longer live, if bounded.
    pub end: Option<Timestamp>,
}

impl ActivationWindow {
    /// Creates a window from its bounds. No ordering check is performed; see
    /// [`ActivationWindow::is_well_formed`].
    pub fn new(start: Timestamp, end: Option<Timestamp>) -> Self {
        Self { start, end }
    }

    /// `now >= start AND (end absent OR now < end)`.
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        now >= self.start && self.end.map_or(true, |end| now < end)
    }

    /// Returns `false` when the end precedes the start.
    ///
    /// A zero-length window (`end == start`) is well formed and never active.
    pub fn is_well_formed(&self) -> bool {
        self.end.map_or(true, |end| end >= self.start)
    }

    /// Returns the instant of the given edge, if the window has one.
    pub fn edge_time(&self, edge: Edge) -> Option<Timestamp> {
        match edge {
            Edge::Started => Some(self.start),
            Edge::Ended => self.end,
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted record
// ---------------------------------------------------------------------------

/// The last-known schedule of one drop or draw, as held by the Persisted
/// Record Store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEntity {
    /// Unique key from the source system.
    pub external_id: ExternalId,
    /// Drop or draw.
    pub kind: EntityKind,
    /// When the entity becomes live.
    pub start_time: Timestamp,
    /// When the entity stops being live. Always `None` for draws.
    pub end_time: Option<Timestamp>,
    /// Pending "started" timer, if one is armed.
    pub start_event_handle: Option<EventHandle>,
    /// Pending "ended" timer, if one is armed.
    pub end_event_handle: Option<EventHandle>,
}

impl ScheduledEntity {
    /// Returns the entity's activation window.
    pub fn window(&self) -> ActivationWindow {
        ActivationWindow::new(self.start_time, self.end_time)
    }

    /// Returns the pending handle for the given edge.
    pub fn handle_for(&self, edge: Edge) -> Option<EventHandle> {
        match edge {
            Edge::Started => self.start_event_handle,
            Edge::Ended => self.end_event_handle,
        }
    }

    /// Clears the pending handle for the given edge.
    pub fn clear_handle(&mut self, edge: Edge) {
        self.set_handle(edge, None);
    }

    /// Replaces the pending handle for the given edge.
    pub fn set_handle(&mut self, edge: Edge, handle: Option<EventHandle>) {
        match edge {
            Edge::Started => self.start_event_handle = handle,
            Edge::Ended => self.end_event_handle = handle,
        }
    }

    /// When the given edge is due: the start time, or the end time if any.
    pub fn time_of(&self, edge: Edge) -> Option<Timestamp> {
        match edge {
            Edge::Started => Some(self.start_time),
            Edge::Ended => self.end_time,
        }
    }

    /// Returns every pending handle, start first.
    pub fn handles(&self) -> impl Iterator<Item = (Edge, EventHandle)> + '_ {
        [
            (Edge::Started, self.start_event_handle),
            (Edge::Ended, self.end_event_handle),
        ]
        .into_iter()
        .filter_map(|(edge, handle)| handle.map(|h| (edge, h)))
    }
}

// ---------------------------------------------------------------------------
// Draw participants and configuration
// ---------------------------------------------------------------------------

/// A participant's registration for one draw.
///
/// `email` is globally unique: one signup per address across every draw.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignupRecord {
    /// Draw the participant registered for.
    pub draw_id: ExternalId,
    /// Participant contact address.
    pub email: Email,
}

/// The person behind a registration, as presented when signing up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Contact address; also the signup's uniqueness key.
    pub email: Email,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
}

impl Participant {
    /// Returns `true` when both names are present after trimming.
    pub fn is_named(&self) -> bool {
        !self.first_name.trim().is_empty() && !self.last_name.trim().is_empty()
    }
}

/// The product line awarded to each winner of a draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeLineItem {
    /// Upstream product variant id.
    pub variant_id: String,
    /// Units per winner.
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// Draw configuration fetched from the upstream system at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawConfig {
    /// Number of winners to select.
    pub number_available: u32,
    /// Prize given to every winner.
    pub prize_line_item: PrizeLineItem,
    /// Shared secret a participant must present to register, if the draw is gated.
    #[serde(default)]
    pub secret: Option<String>,
}

// ---------------------------------------------------------------------------
// Store versioning
// ---------------------------------------------------------------------------

/// Monotonic per-key version assigned by the Persisted Record Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordVersion(u64);

impl RecordVersion {
    /// Version assigned to the first write of a key.
    pub const INITIAL: RecordVersion = RecordVersion(1);

    /// Creates a version from its raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the version that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A value read from the store together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// The stored value.
    pub value: T,
    /// Version to present in a later conditional write.
    pub version: RecordVersion,
}

/// Condition attached to a store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if no record exists for the key.
    MustNotExist,
    /// Write only if the record is still at the given version.
    MatchesVersion(RecordVersion),
}
