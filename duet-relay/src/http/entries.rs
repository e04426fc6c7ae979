//! Entry endpoints.

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ApiJson;
use crate::auth::AuthContext;
use crate::entries;
use crate::error::ApiResult;
use crate::state::RelayState;

/// Body of `POST /api/entries`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// Calendar date the entry is addressed to.
    pub day_id: String,
    /// Ciphertext, standard base64.
    pub payload: String,
}

/// Response of `POST /api/entries`.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// The stored entry's id.
    pub id: String,
    /// Always `"stored"`.
    pub status: &'static str,
}

/// `POST /api/entries` (authenticated).
pub async fn upload_handler(
    Extension(state): Extension<Arc<RelayState>>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(req): ApiJson<UploadRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = entries::upload(&state, &ctx, &req.day_id, &req.payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            id: id.to_string(),
            status: "stored",
        }),
    ))
}

/// Query of `GET /api/entries`.
#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    /// Inclusive day-id lower bound; defaults to the epoch.
    pub since: Option<String>,
}

/// One entry in a fetch response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDto {
    /// The entry's id, used for acknowledgement.
    pub id: String,
    /// Canonical `YYYY-MM-DD`.
    pub day_id: String,
    /// Ciphertext, standard base64.
    pub payload: String,
}

/// Response of `GET /api/entries`.
#[derive(Debug, Serialize)]
pub struct FetchResponse {
    /// The partner's undelivered entries, oldest day first.
    pub entries: Vec<EntryDto>,
}

/// `GET /api/entries?since=YYYY-MM-DD` (authenticated).
pub async fn fetch_handler(
    Extension(state): Extension<Arc<RelayState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<FetchQuery>,
) -> ApiResult<Json<FetchResponse>> {
    let rows = entries::fetch_undelivered(&state, &ctx, query.since.as_deref()).await?;

    let entries = rows
        .into_iter()
        .map(|row| EntryDto {
            id: row.id.to_string(),
            day_id: row.day_id.to_string(),
            payload: STANDARD.encode(row.payload),
        })
        .collect();

    Ok(Json(FetchResponse { entries }))
}

/// Body of `POST /api/entries/ack`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    /// Ids of received entries to delete.
    pub entry_ids: Vec<String>,
}

/// Response of `POST /api/entries/ack`.
#[derive(Debug, Serialize)]
pub struct AckResponse {
    /// How many rows the acknowledgement deleted.
    pub deleted: u64,
}

/// `POST /api/entries/ack` (authenticated).
pub async fn ack_handler(
    Extension(state): Extension<Arc<RelayState>>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(req): ApiJson<AckRequest>,
) -> ApiResult<Json<AckResponse>> {
    let deleted = entries::ack(&state, &ctx, &req.entry_ids).await?;
    Ok(Json(AckResponse { deleted }))
}
