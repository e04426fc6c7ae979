//! Health check endpoint.

use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::state::RelayState;
use crate::storage::RelayStore;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Attached watch channels.
    pub watchers: usize,
    /// Attached collect channels.
    pub collectors: usize,
    /// Buffered handoff bundles.
    pub pending_bundles: usize,
    /// Total pairs in the database.
    pub total_pairs: u64,
    /// Total users in the database.
    pub total_users: u64,
    /// Total undelivered entries in the database.
    pub total_entries: u64,
    /// Total ciphertext bytes at rest.
    pub storage_bytes: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(state): Extension<Arc<RelayState>>) -> Json<HealthStatus> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    let total_pairs = state.store.total_pairs().await.unwrap_or(0);
    let total_users = state.store.total_users().await.unwrap_or(0);
    let total_entries = state.store.total_entries().await.unwrap_or(0);
    let storage_bytes = state.store.total_payload_bytes().await.unwrap_or(0);

    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        watchers: state.handoff.waiter_count(),
        collectors: state.handoff.collector_count(),
        pending_bundles: state.handoff.pending_bundle_count(),
        total_pairs,
        total_users,
        total_entries,
        storage_bytes,
    })
}
