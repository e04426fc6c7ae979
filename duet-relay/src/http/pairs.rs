//! Pairing endpoints.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ApiJson;
use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::pairing;
use crate::state::RelayState;

/// Body of `POST /api/pairs/initiate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    /// The initiator's public key.
    pub public_key: String,
}

/// Response of `POST /api/pairs/initiate`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    /// The freshly created pair.
    pub pair_id: String,
    /// Single-use token for the follower's join.
    pub relay_token: String,
}

/// `POST /api/pairs/initiate` (unauthenticated).
pub async fn initiate_handler(
    Extension(state): Extension<Arc<RelayState>>,
    ApiJson(req): ApiJson<InitiateRequest>,
) -> ApiResult<impl IntoResponse> {
    let (pair_id, relay_token) = pairing::initiate(&state, &req.public_key).await?;

    Ok((
        StatusCode::CREATED,
        Json(InitiateResponse {
            pair_id: pair_id.to_string(),
            relay_token: relay_token.to_string(),
        }),
    ))
}

/// Body of `POST /api/pairs/join`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// The follower's public key.
    pub public_key: String,
    /// The token minted by the initiator.
    pub relay_token: String,
}

/// Response of `POST /api/pairs/join`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    /// The pair the follower joined.
    pub pair_id: String,
    /// The initiator's public key.
    pub partner_public_key: String,
}

/// `POST /api/pairs/join` (unauthenticated).
pub async fn join_handler(
    Extension(state): Extension<Arc<RelayState>>,
    ApiJson(req): ApiJson<JoinRequest>,
) -> ApiResult<Json<JoinResponse>> {
    let joined = pairing::join(&state, &req.public_key, &req.relay_token).await?;

    Ok(Json(JoinResponse {
        pair_id: joined.pair_id.to_string(),
        partner_public_key: joined.partner_key.to_string(),
    }))
}

/// Response of `GET /api/pairs/status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Whether the pair has two users.
    pub paired: bool,
    /// The other user's public key, when paired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_public_key: Option<String>,
}

/// `GET /api/pairs/status` (authenticated).
pub async fn status_handler(
    Extension(state): Extension<Arc<RelayState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<StatusResponse>> {
    let status = pairing::status(&state, &ctx).await?;

    Ok(Json(StatusResponse {
        paired: status.partner_key.is_some(),
        partner_public_key: status.partner_key.map(|k| k.to_string()),
    }))
}
