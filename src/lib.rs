//! # lifelog-gateway
//!
//! Write-path reliability layer for a personal status API.
//!
//! Signed webhooks are verified and put on a queue; consumers drain the
//! queue into an append-only event log with per-message failure isolation;
//! bulk writes go through a chunked writer that resubmits only what the
//! storage engine left unprocessed; synchronous mutations are guarded by
//! idempotency keys.
//!
//! ## Architecture
//!
//! ```text
//! Webhook POST ──► signature check ──► EventPublisher ──► queue
//!                                                          │
//!                                       dispatcher ◄───────┘
//!                                           │
//!                                    EventConsumer ──► EventLog ──► BatchWriter ──► storage
//!                                                                      ▲
//! API POST ──► signature ──► idempotency ──► EventLog ─────────────────┤
//!                                                                      │
//! bulk-import CLI ──► CSV records ─────────────────────────────────────┘
//! ```

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod import;
pub mod queue;
pub mod service;
pub mod storage;
pub mod writer;

#[cfg(test)]
pub mod test_utils;
