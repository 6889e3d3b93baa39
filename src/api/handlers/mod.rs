//! REST endpoint handlers organized by resource.

pub mod events;
pub mod system;
pub mod webhook;

use axum::Router;
use serde::de::DeserializeOwned;

use crate::app_state::AppState;
use crate::error::ValidationError;

/// Composes all resource routes under `/api/v1`.
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new().merge(events::routes(state))
}

/// Parses an already-buffered JSON body.
///
/// Signed routes read the raw bytes, so handlers decode JSON themselves
/// rather than through the `Json` extractor.
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ValidationError> {
    serde_json::from_slice(body).map_err(|e| ValidationError::MalformedJson(e.to_string()))
}
