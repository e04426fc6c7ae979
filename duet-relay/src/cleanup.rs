//! Background cleanup tasks.
//!
//! Two periodic jobs: a storage pass deleting expired relay tokens and
//! orphaned entries, and a directory sweep dropping expired pending
//! bundles and stale throttle windows.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::config::CleanupConfig;
use crate::state::RelayState;
use crate::storage::{now_ms, RelayStore, SqliteStore};

/// Entries older than this with no ack are eligible for deletion.
pub const ORPHAN_HORIZON_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Spawn the periodic storage cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_storage_cleanup(
    store: SqliteStore,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("storage cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs;
        tracing::info!("storage cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            let now = now_ms();

            match store.cleanup_expired_tokens(now).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!("cleanup: deleted {} expired relay tokens", removed);
                }
                Ok(_) => tracing::debug!("cleanup: no expired relay tokens"),
                Err(e) => tracing::error!("cleanup: token pass failed: {}", e),
            }

            match store.cleanup_orphaned_entries(now - ORPHAN_HORIZON_MS).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!("cleanup: deleted {} orphaned entries", removed);
                }
                Ok(_) => tracing::debug!("cleanup: no orphaned entries"),
                Err(e) => tracing::error!("cleanup: orphan pass failed: {}", e),
            }
        }
    })
}

/// Spawn the pending-bundle and throttle-window sweep.
pub fn spawn_directory_sweep(
    state: Arc<RelayState>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("directory sweep task disabled");
            return;
        }

        let interval_secs = config.bundle_sweep_secs;
        tracing::info!("directory sweep task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            let now = now_ms();

            let swept = state.handoff.sweep_expired(now);
            if swept > 0 {
                tracing::info!("sweep: discarded {} expired pending bundles", swept);
            }

            state.throttle.retain_active(now);
        }
    })
}
