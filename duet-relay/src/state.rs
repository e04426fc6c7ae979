//! Shared relay state.
//!
//! One `RelayState` is built at startup and shared across all request
//! workers, the handoff channels, and the background tasks.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crate::config::Config;
use crate::handoff::HandoffDirectory;
use crate::push::PushTransport;
use crate::storage::SqliteStore;
use crate::throttle::Throttle;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64` — no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total pairs initiated.
    pub pairs_initiated_total: AtomicU64,
    /// Total successful joins (tokens redeemed).
    pub pairs_joined_total: AtomicU64,
    /// Total entries uploaded.
    pub uploads_total: AtomicU64,
    /// Total fetch requests handled.
    pub fetches_total: AtomicU64,
    /// Total entries deleted by acknowledgement.
    pub acks_total: AtomicU64,
    /// Total history bundles relayed (live or buffered).
    pub bundles_relayed_total: AtomicU64,
    /// Total requests rejected by the per-key throttle.
    pub throttle_hits_total: AtomicU64,
    /// Total push notifications handed to the transport.
    pub push_sent_total: AtomicU64,
    /// Total push subscriptions pruned after a permanent rejection.
    pub push_pruned_total: AtomicU64,
    /// Total ciphertext bytes received (upload payloads).
    pub bytes_received: AtomicU64,
    /// Total ciphertext bytes sent (fetch payloads).
    pub bytes_sent: AtomicU64,
    /// Total errors across request and channel handling.
    pub errors_total: AtomicU64,
}

/// Shared state for the relay.
pub struct RelayState {
    /// Relay configuration.
    pub config: Config,
    /// The persistent store gateway.
    pub store: SqliteStore,
    /// Handoff channel directories.
    pub handoff: HandoffDirectory,
    /// Per-key request throttle.
    pub throttle: Throttle,
    /// Push collaborator.
    pub push: Arc<dyn PushTransport>,
    /// Operational metrics.
    pub metrics: RelayMetrics,
}

impl RelayState {
    /// Build the shared state from its collaborators.
    pub fn new(config: Config, store: SqliteStore, push: Arc<dyn PushTransport>) -> Self {
        let throttle = Throttle::new(
            config.limits.requests_per_window,
            config.limits.window_secs as i64 * 1000,
        );
        Self {
            config,
            store,
            handoff: HandoffDirectory::new(),
            throttle,
            push,
            metrics: RelayMetrics::default(),
        }
    }
}

impl std::fmt::Debug for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayState")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("waiters", &self.handoff.waiter_count())
            .field("collectors", &self.handoff.collector_count())
            .finish_non_exhaustive()
    }
}
