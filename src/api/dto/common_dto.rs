//! Shared DTO types used across multiple endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Largest page a list endpoint returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// Cursor pagination query parameters for list endpoints.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CursorParams {
    /// Opaque cursor from the previous page's `next_cursor`.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Items per page (1 to 100). Defaults to 20.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Pagination metadata included in list responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CursorMeta {
    /// Items per page actually applied.
    pub limit: usize,
    /// Cursor for the next page, absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

fn default_limit() -> usize {
    20
}

impl CursorParams {
    /// Clamps `limit` to `1..=100`.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            cursor: self.cursor.clone().filter(|c| !c.is_empty()),
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
        }
    }
}
