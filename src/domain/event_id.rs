//! Type-safe event identifier.
//!
//! [`EventId`] is a category prefix joined to a random UUID v4 in simple
//! form, e.g. `evt_0f4c...`. Identities are assigned once, by the
//! publisher, and never reused.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix for identities assigned to inbound events.
pub const EVENT_ID_PREFIX: &str = "evt";

/// Unique identifier of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generates a fresh random identity with the event prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(EVENT_ID_PREFIX)
    }

    /// Generates a fresh random identity under `prefix`.
    #[must_use]
    pub fn with_prefix(prefix: &str) -> Self {
        Self(format!("{prefix}_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Wraps an identity that was assigned earlier (e.g. read back from a
    /// queue message).
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
