//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example, a
//! drop's [`ExternalId`] with a winner's [`OrderId`] even though both are strings
//! under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.trim().is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidIdentifier;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value).ok_or(InvalidIdentifier { kind: stringify!($name) })
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Returned when deserialising an identifier from an empty or malformed string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}")]
pub struct InvalidIdentifier {
    /// Name of the identifier type that rejected the value.
    pub kind: &'static str,
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed (assigned by the admin platform)
// ---------------------------------------------------------------------------

string_id! {
    /// Stable identifier of a drop or draw in the source admin platform.
    ///
    /// Typically a global id such as `gid://shopify/Metaobject/123`. This is the
    /// unique key of the Persisted Record Store.
    ExternalId
}

string_id! {
    /// Identifier of a downstream order created for a draw winner.
    OrderId
}

/// A draw is keyed by the same external id as any other scheduled entity.
pub type DrawId = ExternalId;

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

/// A participant's email address.
///
/// Stored lower-cased so the "one signup per email" rule is case-insensitive.
/// Validation is deliberately shallow: a non-empty local part, an `@`, and a
/// non-empty domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Parses an email address, returning `None` if it is obviously malformed.
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let v = value.as_ref().trim();
        let (local, domain) = v.split_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return None;
        }
        Some(Self(v.to_lowercase()))
    }

    /// Returns the normalised address.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Email {
    type Error = InvalidIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidIdentifier { kind: "Email" })
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (generated by the scheduler)
// ---------------------------------------------------------------------------

/// Opaque reference to one pending deferred delivery.
///
/// Issued by a [`crate::DeferredScheduler`] and usable only to cancel that
/// delivery or to recognise it when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventHandle(Uuid);

impl EventHandle {
    /// Generates a new random handle.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an [`EventHandle`] from an existing UUID (e.g. deserialised from state).
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for EventHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
