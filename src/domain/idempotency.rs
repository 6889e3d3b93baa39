//! Idempotency keys and the responses cached under them.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest accepted caller-supplied token.
pub const MAX_TOKEN_LEN: usize = 255;

/// A caller token scoped to the operation it guards.
///
/// The scope (method and route) is part of the key, so the same token sent
/// to two different operations never collides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Builds the key `<METHOD> <route>#<token>`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidField`] if the token is empty,
    /// longer than [`MAX_TOKEN_LEN`], or contains anything other than
    /// visible ASCII.
    pub fn scoped(method: &str, route: &str, token: &str) -> Result<Self, ValidationError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(ValidationError::InvalidField {
                field: "idempotency-key",
                reason: format!("must be 1 to {MAX_TOKEN_LEN} characters"),
            });
        }
        if !token.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidField {
                field: "idempotency-key",
                reason: "must be visible ASCII".to_string(),
            });
        }
        Ok(Self(format!("{} {route}#{token}", method.to_ascii_uppercase())))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The canonical response for an idempotency key. Written once, never
/// updated; inert after `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Scoped key.
    pub key: IdempotencyKey,
    /// HTTP status of the original response.
    pub status_code: u16,
    /// Body of the original response.
    pub body: String,
    /// When the response was first produced.
    pub created_at: DateTime<Utc>,
    /// After this instant the record is treated as absent.
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Creates a record that lives for `ttl` from `now`.
    #[must_use]
    pub fn new(
        key: IdempotencyKey,
        status_code: u16,
        body: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            key,
            status_code,
            body,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Returns `true` once `now` has reached `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
