//! Post-pairing history bundle transfer.
//!
//! A just-paired device pair may transfer encrypted history from the
//! initiator's device to the follower's new device over a long-lived
//! WebSocket. The relay only forwards opaque bytes.
//!
//! Three process-local directories, all keyed by pair:
//! - `waiters`: the initiator's channel, authenticated as a watcher
//! - `collectors`: the follower's channel, authenticated as a collector
//! - `pending_bundles`: a bundle sent before the collector attached
//!
//! None of this state is replicated; a restart invalidates any in-flight
//! transfer and the client flow re-drives it.

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use duet_types::{ChannelFrame, PairId, PublicKey};
use futures::{SinkExt, Stream, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::auth::{self, ChannelRole};
use crate::state::RelayState;

/// Lifetime of a buffered bundle, in milliseconds.
pub const BUNDLE_TTL_MS: i64 = 5 * 60 * 1000;

/// Frames queued for a channel's writer task.
#[derive(Debug)]
enum Outbound {
    /// Send a frame, keep the channel open.
    Frame(ChannelFrame),
    /// Send a frame, then close the channel.
    Terminal(ChannelFrame),
    /// Close the channel without a frame.
    Close,
}

/// A registered channel's send half.
#[derive(Debug, Clone)]
struct ChannelHandle {
    channel_id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelHandle {
    fn send(&self, frame: ChannelFrame) {
        // Receiver gone means the channel already closed; nothing to do.
        let _ = self.tx.send(Outbound::Frame(frame));
    }

    fn send_terminal(&self, frame: ChannelFrame) {
        let _ = self.tx.send(Outbound::Terminal(frame));
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// A bundle sent before the collector attached.
#[derive(Debug, Clone)]
struct PendingBundle {
    payload: String,
    expires_at: i64,
}

/// Where a bundle ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleDelivery {
    /// Delivered to an attached collector, which was then closed.
    DeliveredLive,
    /// Buffered awaiting the collector, with a 5-minute TTL.
    Buffered,
}

/// The handoff directories.
pub struct HandoffDirectory {
    waiters: DashMap<PairId, ChannelHandle>,
    collectors: DashMap<PairId, ChannelHandle>,
    pending_bundles: DashMap<PairId, PendingBundle>,
    next_channel_id: AtomicU64,
}

impl Default for HandoffDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl HandoffDirectory {
    /// Create empty directories.
    pub fn new() -> Self {
        Self {
            waiters: DashMap::new(),
            collectors: DashMap::new(),
            pending_bundles: DashMap::new(),
            next_channel_id: AtomicU64::new(1),
        }
    }

    fn next_channel_id(&self) -> u64 {
        self.next_channel_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register_watcher(&self, pair_id: &PairId, handle: ChannelHandle) {
        if let Some(old) = self.waiters.insert(pair_id.clone(), handle) {
            old.send_terminal(ChannelFrame::Error {
                message: "superseded by a newer watch channel".to_string(),
            });
        }
    }

    fn register_collector(&self, pair_id: &PairId, handle: ChannelHandle) {
        if let Some(old) = self.collectors.insert(pair_id.clone(), handle) {
            old.send_terminal(ChannelFrame::Error {
                message: "superseded by a newer collect channel".to_string(),
            });
        }
    }

    /// Remove a watcher, but only the given channel.
    ///
    /// The id guard keeps a stale disconnect from evicting a replacement
    /// channel registered in the meantime.
    fn remove_watcher(&self, pair_id: &PairId, channel_id: u64) {
        self.waiters
            .remove_if(pair_id, |_, h| h.channel_id == channel_id);
    }

    /// Remove a collector, but only the given channel.
    fn remove_collector(&self, pair_id: &PairId, channel_id: u64) {
        self.collectors
            .remove_if(pair_id, |_, h| h.channel_id == channel_id);
    }

    /// Push the `paired` frame to the pair's watcher, if attached.
    ///
    /// The watcher stays open; the initiator may still send a bundle.
    pub fn notify_paired(&self, pair_id: &PairId, partner_key: &PublicKey) {
        if let Some(watcher) = self.waiters.get(pair_id) {
            watcher.send(ChannelFrame::Paired {
                partner_public_key: partner_key.as_str().to_string(),
            });
        }
    }

    /// Route a bundle from the watcher.
    ///
    /// An attached collector receives it immediately and is closed;
    /// otherwise the bundle is buffered with a TTL.
    fn deliver_bundle(&self, pair_id: &PairId, payload: String, now: i64) -> BundleDelivery {
        if let Some((_, collector)) = self.collectors.remove(pair_id) {
            collector.send_terminal(ChannelFrame::Bundle { payload });
            BundleDelivery::DeliveredLive
        } else {
            self.pending_bundles.insert(
                pair_id.clone(),
                PendingBundle {
                    payload,
                    expires_at: now + BUNDLE_TTL_MS,
                },
            );
            BundleDelivery::Buffered
        }
    }

    /// Consume the pair's pending bundle, if one is buffered and fresh.
    ///
    /// An expired bundle is discarded either way.
    fn take_pending_bundle(&self, pair_id: &PairId, now: i64) -> Option<String> {
        let (_, bundle) = self.pending_bundles.remove(pair_id)?;
        if bundle.expires_at > now {
            Some(bundle.payload)
        } else {
            None
        }
    }

    /// Drop pending bundles past their TTL. Returns the number removed.
    pub fn sweep_expired(&self, now: i64) -> usize {
        let before = self.pending_bundles.len();
        self.pending_bundles.retain(|_, b| b.expires_at > now);
        before.saturating_sub(self.pending_bundles.len())
    }

    /// Number of attached watchers (for health reporting).
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Number of attached collectors (for health reporting).
    pub fn collector_count(&self) -> usize {
        self.collectors.len()
    }

    /// Number of buffered bundles (for health reporting).
    pub fn pending_bundle_count(&self) -> usize {
        self.pending_bundles.len()
    }
}

/// Drive one upgraded channel to completion.
///
/// The channel starts with no role; the first frame must be `auth` or
/// `collect_auth`. Any deviation closes the channel with an error frame.
pub async fn run_channel(state: Arc<RelayState>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Frame(frame) => {
                    if sink.send(Message::Text(frame.to_json())).await.is_err() {
                        break;
                    }
                }
                Outbound::Terminal(frame) => {
                    let _ = sink.send(Message::Text(frame.to_json())).await;
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let handle = ChannelHandle {
        channel_id: state.handoff.next_channel_id(),
        tx: tx.clone(),
    };

    let auth_timeout = Duration::from_secs(state.config.limits.channel_auth_timeout_secs);
    let registration = authenticate_channel(&state, &mut stream, &handle, auth_timeout).await;

    if let Some((role, pair_id)) = registration {
        read_until_closed(&state, &mut stream, &handle, role, &pair_id).await;

        match role {
            ChannelRole::Watcher => state.handoff.remove_watcher(&pair_id, handle.channel_id),
            ChannelRole::Collector => state.handoff.remove_collector(&pair_id, handle.channel_id),
        }
    }

    drop(tx);
    drop(handle);
    let _ = writer.await;
}

/// Read and validate the single auth frame, register the channel.
///
/// Returns the registered role and pair, or `None` if the channel
/// terminated during authentication (including the collector case where
/// a buffered bundle was served immediately).
async fn authenticate_channel(
    state: &Arc<RelayState>,
    stream: &mut (impl Stream<Item = Result<Message, axum::Error>> + Unpin),
    handle: &ChannelHandle,
    timeout: Duration,
) -> Option<(ChannelRole, PairId)> {
    let first = match tokio::time::timeout(timeout, stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(_) => {
            handle.send_terminal(ChannelFrame::Error {
                message: "expected an auth frame".to_string(),
            });
            return None;
        }
        Err(_) => {
            tracing::debug!("channel dropped: no auth frame within {:?}", timeout);
            handle.close();
            return None;
        }
    };

    let (role, public_key, timestamp, signature) = match ChannelFrame::from_json(&first) {
        Ok(ChannelFrame::Auth {
            public_key,
            timestamp,
            signature,
        }) => (ChannelRole::Watcher, public_key, timestamp, signature),
        Ok(ChannelFrame::CollectAuth {
            public_key,
            timestamp,
            signature,
        }) => (ChannelRole::Collector, public_key, timestamp, signature),
        _ => {
            handle.send_terminal(ChannelFrame::Error {
                message: "expected an auth frame".to_string(),
            });
            return None;
        }
    };

    let ctx = match auth::verify_channel_auth(&state.store, role, &public_key, &timestamp, &signature)
        .await
    {
        Ok(ctx) => ctx,
        Err(_) => {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            handle.send_terminal(ChannelFrame::Error {
                message: "authentication failed".to_string(),
            });
            return None;
        }
    };

    let pair_id = ctx.pair_id;
    match role {
        ChannelRole::Watcher => {
            state.handoff.register_watcher(&pair_id, handle.clone());
            handle.send(ChannelFrame::Ready);
            tracing::debug!("watcher attached for {:?}", pair_id);
            Some((role, pair_id))
        }
        ChannelRole::Collector => {
            let now = crate::storage::now_ms();
            if let Some(payload) = state.handoff.take_pending_bundle(&pair_id, now) {
                // Buffered handoff: serve and close without registering.
                handle.send_terminal(ChannelFrame::Bundle { payload });
                state
                    .metrics
                    .bundles_relayed_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!("buffered bundle served for {:?}", pair_id);
                None
            } else {
                state.handoff.register_collector(&pair_id, handle.clone());
                handle.send(ChannelFrame::Ready);
                tracing::debug!("collector attached for {:?}", pair_id);
                Some((role, pair_id))
            }
        }
    }
}

/// Process frames until the client disconnects or the channel reaches a
/// terminal state.
async fn read_until_closed(
    state: &Arc<RelayState>,
    stream: &mut (impl Stream<Item = Result<Message, axum::Error>> + Unpin),
    handle: &ChannelHandle,
    role: ChannelRole,
    pair_id: &PairId,
) {
    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Pings are answered by axum; ignore other frames.
            _ => continue,
        };

        match (role, ChannelFrame::from_json(&text)) {
            (ChannelRole::Watcher, Ok(ChannelFrame::Bundle { payload })) => {
                let now = crate::storage::now_ms();
                let delivery = state.handoff.deliver_bundle(pair_id, payload, now);
                state
                    .metrics
                    .bundles_relayed_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!("bundle from watcher for {:?}: {:?}", pair_id, delivery);

                // The watcher is done either way.
                state.handoff.remove_watcher(pair_id, handle.channel_id);
                handle.close();
                break;
            }
            _ => {
                state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                handle.send_terminal(ChannelFrame::Error {
                    message: "unexpected frame".to_string(),
                });
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pair() -> PairId {
        PairId::new()
    }

    fn test_key(seed: u8) -> PublicKey {
        PublicKey::from_key_bytes(&[seed; 32])
    }

    fn attach(
        directory: &HandoffDirectory,
    ) -> (ChannelHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ChannelHandle {
            channel_id: directory.next_channel_id(),
            tx,
        };
        (handle, rx)
    }

    #[tokio::test]
    async fn watcher_receives_paired_frame() {
        let directory = HandoffDirectory::new();
        let pair = test_pair();
        let (handle, mut rx) = attach(&directory);

        directory.register_watcher(&pair, handle);
        directory.notify_paired(&pair, &test_key(2));

        match rx.recv().await.unwrap() {
            Outbound::Frame(ChannelFrame::Paired { partner_public_key }) => {
                assert_eq!(partner_public_key, test_key(2).as_str());
            }
            other => panic!("expected paired frame, got {:?}", other),
        }

        // The watcher stays registered; it may still send a bundle.
        assert_eq!(directory.waiter_count(), 1);
    }

    #[tokio::test]
    async fn notify_paired_without_watcher_is_noop() {
        let directory = HandoffDirectory::new();
        directory.notify_paired(&test_pair(), &test_key(2));
    }

    #[tokio::test]
    async fn bundle_reaches_live_collector_and_closes_it() {
        let directory = HandoffDirectory::new();
        let pair = test_pair();
        let (collector, mut rx) = attach(&directory);

        directory.register_collector(&pair, collector);
        let delivery = directory.deliver_bundle(&pair, "BLOB".to_string(), 0);

        assert_eq!(delivery, BundleDelivery::DeliveredLive);
        assert_eq!(directory.collector_count(), 0);
        assert_eq!(directory.pending_bundle_count(), 0);

        match rx.recv().await.unwrap() {
            Outbound::Terminal(ChannelFrame::Bundle { payload }) => {
                assert_eq!(payload, "BLOB");
            }
            other => panic!("expected terminal bundle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn bundle_is_buffered_without_collector() {
        let directory = HandoffDirectory::new();
        let pair = test_pair();

        let delivery = directory.deliver_bundle(&pair, "BLOB".to_string(), 1000);
        assert_eq!(delivery, BundleDelivery::Buffered);
        assert_eq!(directory.pending_bundle_count(), 1);

        // First collect within the TTL consumes it.
        assert_eq!(
            directory.take_pending_bundle(&pair, 2000),
            Some("BLOB".to_string())
        );
        // A re-opened collect channel finds nothing.
        assert_eq!(directory.take_pending_bundle(&pair, 2000), None);
    }

    #[tokio::test]
    async fn expired_pending_bundle_is_discarded_on_collect() {
        let directory = HandoffDirectory::new();
        let pair = test_pair();

        directory.deliver_bundle(&pair, "BLOB".to_string(), 0);
        assert_eq!(
            directory.take_pending_bundle(&pair, BUNDLE_TTL_MS + 1),
            None
        );
        // Discarded, not retained.
        assert_eq!(directory.pending_bundle_count(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_bundles() {
        let directory = HandoffDirectory::new();
        let fresh = test_pair();
        let stale = test_pair();

        directory.deliver_bundle(&stale, "old".to_string(), 0);
        directory.deliver_bundle(&fresh, "new".to_string(), BUNDLE_TTL_MS);

        let removed = directory.sweep_expired(BUNDLE_TTL_MS + 1);
        assert_eq!(removed, 1);
        assert_eq!(directory.pending_bundle_count(), 1);
        assert_eq!(
            directory.take_pending_bundle(&fresh, BUNDLE_TTL_MS + 2),
            Some("new".to_string())
        );
    }

    #[tokio::test]
    async fn newer_watcher_supersedes_older() {
        let directory = HandoffDirectory::new();
        let pair = test_pair();
        let (first, mut first_rx) = attach(&directory);
        let first_id = first.channel_id;
        let (second, _second_rx) = attach(&directory);

        directory.register_watcher(&pair, first);
        directory.register_watcher(&pair, second);

        match first_rx.recv().await.unwrap() {
            Outbound::Terminal(ChannelFrame::Error { .. }) => {}
            other => panic!("expected terminal error, got {:?}", other),
        }

        // The stale channel's disconnect must not evict the replacement.
        directory.remove_watcher(&pair, first_id);
        assert_eq!(directory.waiter_count(), 1);
    }

    #[tokio::test]
    async fn collector_disconnect_does_not_evict_watcher() {
        let directory = HandoffDirectory::new();
        let pair = test_pair();
        let (watcher, _watcher_rx) = attach(&directory);
        let (collector, _collector_rx) = attach(&directory);
        let collector_id = collector.channel_id;

        directory.register_watcher(&pair, watcher);
        directory.register_collector(&pair, collector);

        directory.remove_collector(&pair, collector_id);
        assert_eq!(directory.collector_count(), 0);
        assert_eq!(directory.waiter_count(), 1);
    }

    #[tokio::test]
    async fn watcher_removal_is_scoped_to_channel_id() {
        let directory = HandoffDirectory::new();
        let pair = test_pair();
        let (watcher, _rx) = attach(&directory);
        let live_id = watcher.channel_id;

        directory.register_watcher(&pair, watcher);

        // A stale id is a no-op.
        directory.remove_watcher(&pair, live_id + 100);
        assert_eq!(directory.waiter_count(), 1);

        directory.remove_watcher(&pair, live_id);
        assert_eq!(directory.waiter_count(), 0);
    }
}
