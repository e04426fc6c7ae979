//! Prometheus metrics endpoint.

use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::state::RelayState;
use crate::storage::RelayStore;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(state): Extension<Arc<RelayState>>) -> impl IntoResponse {
    let m = &state.metrics;

    // Gauges — current state
    let watchers = state.handoff.waiter_count();
    let collectors = state.handoff.collector_count();
    let pending_bundles = state.handoff.pending_bundle_count();
    let throttle_keys = state.throttle.tracked_keys();

    // Counters — monotonic since startup
    let initiated = m.pairs_initiated_total.load(Ordering::Relaxed);
    let joined = m.pairs_joined_total.load(Ordering::Relaxed);
    let uploads = m.uploads_total.load(Ordering::Relaxed);
    let fetches = m.fetches_total.load(Ordering::Relaxed);
    let acks = m.acks_total.load(Ordering::Relaxed);
    let bundles = m.bundles_relayed_total.load(Ordering::Relaxed);
    let throttled = m.throttle_hits_total.load(Ordering::Relaxed);
    let push_sent = m.push_sent_total.load(Ordering::Relaxed);
    let push_pruned = m.push_pruned_total.load(Ordering::Relaxed);
    let bytes_rx = m.bytes_received.load(Ordering::Relaxed);
    let bytes_tx = m.bytes_sent.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    // Storage stats (async queries — best effort)
    let total_entries = state.store.total_entries().await.unwrap_or(0);
    let storage_bytes = state.store.total_payload_bytes().await.unwrap_or(0);
    let total_pairs = state.store.total_pairs().await.unwrap_or(0);

    let body = format!(
        r#"# HELP duet_relay_watchers_active Attached watch channels
# TYPE duet_relay_watchers_active gauge
duet_relay_watchers_active {watchers}

# HELP duet_relay_collectors_active Attached collect channels
# TYPE duet_relay_collectors_active gauge
duet_relay_collectors_active {collectors}

# HELP duet_relay_pending_bundles Buffered handoff bundles
# TYPE duet_relay_pending_bundles gauge
duet_relay_pending_bundles {pending_bundles}

# HELP duet_relay_throttle_keys Tracked throttle windows
# TYPE duet_relay_throttle_keys gauge
duet_relay_throttle_keys {throttle_keys}

# HELP duet_relay_info Server information
# TYPE duet_relay_info gauge
duet_relay_info{{version="{version}"}} 1

# HELP duet_relay_pairs_initiated_total Total pairs initiated
# TYPE duet_relay_pairs_initiated_total counter
duet_relay_pairs_initiated_total {initiated}

# HELP duet_relay_pairs_joined_total Total successful joins
# TYPE duet_relay_pairs_joined_total counter
duet_relay_pairs_joined_total {joined}

# HELP duet_relay_uploads_total Total entries uploaded
# TYPE duet_relay_uploads_total counter
duet_relay_uploads_total {uploads}

# HELP duet_relay_fetches_total Total fetch requests handled
# TYPE duet_relay_fetches_total counter
duet_relay_fetches_total {fetches}

# HELP duet_relay_acks_total Total entries deleted by acknowledgement
# TYPE duet_relay_acks_total counter
duet_relay_acks_total {acks}

# HELP duet_relay_bundles_relayed_total Total history bundles relayed
# TYPE duet_relay_bundles_relayed_total counter
duet_relay_bundles_relayed_total {bundles}

# HELP duet_relay_throttle_hits_total Total requests rejected by the throttle
# TYPE duet_relay_throttle_hits_total counter
duet_relay_throttle_hits_total {throttled}

# HELP duet_relay_push_sent_total Total push notifications delivered
# TYPE duet_relay_push_sent_total counter
duet_relay_push_sent_total {push_sent}

# HELP duet_relay_push_pruned_total Total push subscriptions pruned
# TYPE duet_relay_push_pruned_total counter
duet_relay_push_pruned_total {push_pruned}

# HELP duet_relay_bytes_received_total Total ciphertext bytes received
# TYPE duet_relay_bytes_received_total counter
duet_relay_bytes_received_total {bytes_rx}

# HELP duet_relay_bytes_sent_total Total ciphertext bytes sent
# TYPE duet_relay_bytes_sent_total counter
duet_relay_bytes_sent_total {bytes_tx}

# HELP duet_relay_errors_total Total request and channel errors
# TYPE duet_relay_errors_total counter
duet_relay_errors_total {errors}

# HELP duet_relay_storage_entries Entries currently in the database
# TYPE duet_relay_storage_entries gauge
duet_relay_storage_entries {total_entries}

# HELP duet_relay_storage_bytes Ciphertext bytes currently at rest
# TYPE duet_relay_storage_bytes gauge
duet_relay_storage_bytes {storage_bytes}

# HELP duet_relay_storage_pairs Pairs currently in the database
# TYPE duet_relay_storage_pairs gauge
duet_relay_storage_pairs {total_pairs}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
