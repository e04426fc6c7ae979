//! Push subscription endpoint.

use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ApiJson;
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::RelayState;
use crate::storage::{PushSubscription, RelayStore};

/// Body of `POST /api/push/subscribe`.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Client public key for payload encryption.
    pub p256dh: String,
    /// Client auth secret.
    pub auth: String,
}

/// Response of `POST /api/push/subscribe`.
#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    /// Always `"subscribed"`.
    pub status: &'static str,
}

/// `POST /api/push/subscribe` (authenticated).
pub async fn subscribe_handler(
    Extension(state): Extension<Arc<RelayState>>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(req): ApiJson<SubscribeRequest>,
) -> ApiResult<Json<SubscribeResponse>> {
    if req.endpoint.is_empty() || req.p256dh.is_empty() || req.auth.is_empty() {
        return Err(ApiError::InvalidInput(
            "subscription fields must be non-empty".to_string(),
        ));
    }

    state
        .store
        .set_push_subscription(
            &ctx.public_key,
            &PushSubscription {
                endpoint: req.endpoint,
                p256dh: req.p256dh,
                auth: req.auth,
            },
        )
        .await?;

    Ok(Json(SubscribeResponse {
        status: "subscribed",
    }))
}
