//! Push collaborator.
//!
//! The entry service produces a "notify partner" event on upload; the
//! transport behind [`PushTransport`] delivers it. Delivery is best
//! effort: failures never surface to the uploader, the entry is already
//! durably stored. A permanent rejection (410, subscription gone) prunes
//! the recipient's subscription.

use async_trait::async_trait;
use duet_types::{PairId, PublicKey};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::state::RelayState;
use crate::storage::{PushSubscription, RelayStore};

/// The fixed payload posted for a partner-entry notification.
pub const PARTNER_ENTRY_PAYLOAD: &str = r#"{"type":"partner-entry"}"#;

/// Transport-level delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// The subscription is permanently gone (HTTP 410).
    #[error("subscription gone")]
    SubscriptionGone,

    /// Anything transient; logged and dropped.
    #[error("push transport error: {0}")]
    Transport(String),
}

/// Deliver a payload to a partner subscription.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Post a payload to the subscription's endpoint.
    async fn deliver(&self, subscription: &PushSubscription, payload: &[u8])
        -> Result<(), PushError>;
}

/// HTTP push transport.
///
/// Posts the payload to the subscription endpoint. The web-push
/// encryption layer lives outside the relay; from here the payload and
/// the subscription triple are opaque delivery inputs.
pub struct HttpPushTransport {
    client: reqwest::Client,
}

impl HttpPushTransport {
    /// Create a transport with the given request timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("push client construction should not fail");
        Self { client }
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> Result<(), PushError> {
        let response = self
            .client
            .post(&subscription.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::GONE => Err(PushError::SubscriptionGone),
            status => Err(PushError::Transport(format!("status {status}"))),
        }
    }
}

/// A transport that drops everything (push disabled in config).
pub struct NoopPushTransport;

#[async_trait]
impl PushTransport for NoopPushTransport {
    async fn deliver(&self, _: &PushSubscription, _: &[u8]) -> Result<(), PushError> {
        Ok(())
    }
}

/// Notify the author's partner that a new entry is available.
///
/// Runs detached from the upload request; every outcome is terminal
/// here. Absent partner or absent subscription is a no-op.
pub async fn notify_partner(state: Arc<RelayState>, author: PublicKey, pair_id: PairId) {
    if !state.config.push.enabled {
        return;
    }

    let partner = match state.store.get_partner(&author, &pair_id).await {
        Ok(Some(partner)) => partner,
        Ok(None) => return,
        Err(e) => {
            tracing::debug!("notify: partner lookup failed: {}", e);
            return;
        }
    };

    let Some(subscription) = partner.push else {
        return;
    };

    match state
        .push
        .deliver(&subscription, PARTNER_ENTRY_PAYLOAD.as_bytes())
        .await
    {
        Ok(()) => {
            state.metrics.push_sent_total.fetch_add(1, Ordering::Relaxed);
        }
        Err(PushError::SubscriptionGone) => {
            // Prune so future notifies become no-ops until re-subscribe.
            if let Err(e) = state
                .store
                .clear_push_subscription(&partner.public_key)
                .await
            {
                tracing::warn!("notify: failed to prune subscription: {}", e);
            } else {
                state
                    .metrics
                    .push_pruned_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!("pruned gone subscription for {:?}", partner.public_key);
            }
        }
        Err(PushError::Transport(reason)) => {
            tracing::debug!("notify: transient push failure: {}", reason);
        }
    }
}
