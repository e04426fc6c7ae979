//! Entry service: upload, fetch-undelivered, acknowledge.
//!
//! Entries are opaque ciphertext blobs addressed by `(pair, author,
//! dayId)`. They live on the relay only until the partner acknowledges
//! them; acknowledgement deletes the row outright.

use base64::{engine::general_purpose::STANDARD, Engine};
use duet_types::{DayId, EntryId};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::RelayState;
use crate::storage::{now_ms, EntryRow, RelayStore};

/// Upload ceiling per author per day.
pub const DAILY_ENTRY_CAP: u32 = 2;

/// Store an entry and fire the partner notification.
///
/// The notify event runs detached; upload latency is never coupled to
/// push latency. The count-then-insert cap is best effort by design:
/// racing uploads may briefly exceed it.
pub async fn upload(
    state: &Arc<RelayState>,
    ctx: &AuthContext,
    day_id: &str,
    payload_b64: &str,
) -> ApiResult<EntryId> {
    let day = DayId::parse(day_id)
        .map_err(|_| ApiError::InvalidInput("invalid day id".to_string()))?;

    let count = state
        .store
        .count_entries_for_day(&ctx.public_key, &day)
        .await?;
    if count >= DAILY_ENTRY_CAP {
        return Err(ApiError::RateLimited(
            "daily entry limit reached".to_string(),
        ));
    }

    let payload = STANDARD
        .decode(payload_b64)
        .map_err(|_| ApiError::InvalidInput("invalid payload encoding".to_string()))?;

    let id = EntryId::new();
    state
        .store
        .insert_entry(&id, &ctx.public_key, &ctx.pair_id, &day, &payload, now_ms())
        .await?;

    state.metrics.uploads_total.fetch_add(1, Ordering::Relaxed);
    state
        .metrics
        .bytes_received
        .fetch_add(payload.len() as u64, Ordering::Relaxed);
    tracing::debug!("entry {:?} stored for {:?} on {}", id, ctx.pair_id, day);

    let notify_state = state.clone();
    let author = ctx.public_key.clone();
    let pair_id = ctx.pair_id.clone();
    tokio::spawn(async move {
        crate::push::notify_partner(notify_state, author, pair_id).await;
    });

    Ok(id)
}

/// Fetch the partner's unacknowledged entries since a day bound.
///
/// No partner yet means an empty result, not an error. Rows read for the
/// first time get their `fetched_at` stamped.
pub async fn fetch_undelivered(
    state: &RelayState,
    ctx: &AuthContext,
    since: Option<&str>,
) -> ApiResult<Vec<EntryRow>> {
    let since = match since {
        Some(s) => DayId::parse(s)
            .map_err(|_| ApiError::InvalidInput("invalid since day id".to_string()))?,
        None => DayId::epoch(),
    };

    let Some(partner) = state
        .store
        .get_partner(&ctx.public_key, &ctx.pair_id)
        .await?
    else {
        return Ok(Vec::new());
    };

    let rows = state
        .store
        .fetch_undelivered(&ctx.pair_id, &partner.public_key, &since, now_ms())
        .await?;

    state.metrics.fetches_total.fetch_add(1, Ordering::Relaxed);
    let sent: u64 = rows.iter().map(|r| r.payload.len() as u64).sum();
    state.metrics.bytes_sent.fetch_add(sent, Ordering::Relaxed);

    Ok(rows)
}

/// Delete acknowledged entries.
///
/// The delete predicate only matches rows in the caller's pair authored
/// by the partner, so a caller can never ack their own uploads and
/// cross-pair ids silently count zero.
pub async fn ack(state: &RelayState, ctx: &AuthContext, ids: &[String]) -> ApiResult<u64> {
    if ids.is_empty() {
        return Err(ApiError::InvalidInput(
            "entryIds must be a non-empty array".to_string(),
        ));
    }

    let Some(partner) = state
        .store
        .get_partner(&ctx.public_key, &ctx.pair_id)
        .await?
    else {
        return Err(ApiError::InvalidInput("no partner in pair".to_string()));
    };

    let ids: Vec<EntryId> = ids
        .iter()
        .map(|s| EntryId::from_string(s.clone()))
        .collect();

    let deleted = state
        .store
        .ack_entries(&ids, &ctx.pair_id, &partner.public_key)
        .await?;

    state.metrics.acks_total.fetch_add(deleted, Ordering::Relaxed);
    Ok(deleted)
}
