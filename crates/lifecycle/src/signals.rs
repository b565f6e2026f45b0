//! Lifecycle signals and inbound notifications.
//!
//! A [`LifecycleSignal`] names one edge of one entity's activation window
//! (`drop.started`, `prize_draw.started`, ...). It is both what the reconciler
//! hands the deferred scheduler and what it emits as an immediate domain event.
//! [`Notification`] is the only inbound wire contract: the three shapes the
//! webhook glue translates admin-platform deliveries into.

use serde::{Deserialize, Serialize};

use crate::{EntityKind, EventHandle, ExternalId, Timestamp};

/// One boundary of an activation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    /// The window opens.
    Started,
    /// The window closes.
    Ended,
}

impl Edge {
    /// Wire name used as the suffix of lifecycle signal names.
    pub fn as_str(self) -> &'static str {
        match self {
            Edge::Started => "started",
            Edge::Ended => "ended",
        }
    }
}

/// A named transition of one entity: `<kind>.<edge>` for `entity_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LifecycleSignal {
    /// Which lifecycle the entity follows.
    pub kind: EntityKind,
    /// Which boundary was crossed.
    pub edge: Edge,
    /// Entity the signal refers to.
    pub entity_id: ExternalId,
}

impl LifecycleSignal {
    /// Creates a signal.
    pub fn new(kind: EntityKind, edge: Edge, entity_id: ExternalId) -> Self {
        Self {
            kind,
            edge,
            entity_id,
        }
    }

    /// Canonical signal name, e.g. `"drop.ended"`.
    pub fn name(&self) -> String {
        format!("{}.{}", self.kind.as_str(), self.edge.as_str())
    }

    /// JSON payload forwarded downstream alongside [`LifecycleSignal::name`].
    ///
    /// Drops are keyed by `dropId`, draws by `drawId`.
    pub fn payload(&self) -> serde_json::Value {
        let key = match self.kind {
            EntityKind::Drop => "dropId",
            EntityKind::Draw => "drawId",
        };
        let mut body = serde_json::Map::new();
        body.insert(
            key.to_string(),
            serde_json::Value::String(self.entity_id.to_string()),
        );
        serde_json::Value::Object(body)
    }
}

impl std::fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name(), self.entity_id)
    }
}

/// A deferred signal delivered by the scheduler when its time arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredDelivery {
    /// Handle returned when the signal was scheduled.
    pub handle: EventHandle,
    /// The scheduled signal.
    pub signal: LifecycleSignal,
    /// Time the signal was scheduled for.
    pub deliver_at: Timestamp,
}

/// An inbound create/update/delete notification for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The entity was created upstream.
    Created {
        /// Entity key.
        external_id: ExternalId,
        /// Drop or draw.
        kind: EntityKind,
        /// Window start.
        start_time: Timestamp,
        /// Window end, if bounded.
        #[serde(default)]
        end_time: Option<Timestamp>,
    },
    /// The entity was edited upstream.
    Updated {
        /// Entity key.
        external_id: ExternalId,
        /// Drop or draw.
        kind: EntityKind,
        /// New window start.
        start_time: Timestamp,
        /// New window end, if bounded.
        #[serde(default)]
        end_time: Option<Timestamp>,
    },
    /// The entity was removed upstream.
    Deleted {
        /// Entity key.
        external_id: ExternalId,
    },
}

impl Notification {
    /// Returns the key of the entity this notification concerns.
    pub fn external_id(&self) -> &ExternalId {
        match self {
            Notification::Created { external_id, .. }
            | Notification::Updated { external_id, .. }
            | Notification::Deleted { external_id } => external_id,
        }
    }

    /// Entity kind carried by the notification; deletions carry none.
    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            Notification::Created { kind, .. } | Notification::Updated { kind, .. } => Some(*kind),
            Notification::Deleted { .. } => None,
        }
    }

    /// Short action name for logging (`created`, `updated`, `deleted`).
    pub fn action(&self) -> &'static str {
        match self {
            Notification::Created { .. } => "created",
            Notification::Updated { .. } => "updated",
            Notification::Deleted { .. } => "deleted",
        }
    }
}
