//! Pairing service: initiate, join, status, account deletion.
//!
//! A pair holds at most two users. Initiate creates the pair and mints a
//! single-use relay token; join redeems the token and registers the
//! follower. Once two users are registered no further user can be added;
//! re-pairing creates a new pair and moves the user.

use duet_types::{PairId, PublicKey, RelayToken};
use std::sync::atomic::Ordering;

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::RelayState;
use crate::storage::{now_ms, JoinOutcome, RelayStore};

/// Relay token lifetime: 10 minutes from initiation.
pub const TOKEN_TTL_MS: i64 = 10 * 60 * 1000;

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct Joined {
    /// The pair the follower joined.
    pub pair_id: PairId,
    /// The initiator, now the follower's partner.
    pub partner_key: PublicKey,
}

/// Partner presence as seen by one user.
#[derive(Debug, Clone)]
pub struct PairStatus {
    /// The other user's key, if the pair has two users.
    pub partner_key: Option<PublicKey>,
}

/// Create a pair and mint a relay token for the initiator.
///
/// An already-registered key re-pairs: its prior membership is replaced
/// and its push subscription cleared.
pub async fn initiate(state: &RelayState, public_key: &str) -> ApiResult<(PairId, RelayToken)> {
    let key = PublicKey::parse(public_key)
        .map_err(|_| ApiError::InvalidInput("invalid public key".to_string()))?;

    let token = RelayToken::generate();
    let expires_at = now_ms() + TOKEN_TTL_MS;
    let pair_id = state.store.initiate_pair(&key, &token, expires_at).await?;

    state
        .metrics
        .pairs_initiated_total
        .fetch_add(1, Ordering::Relaxed);
    tracing::info!("pair initiated: {:?} by {:?}", pair_id, key);

    Ok((pair_id, token))
}

/// Redeem a relay token and register the follower.
///
/// The precondition checks are advisory fast-fails; the compare-and-set
/// inside the join transaction is authoritative, so two racing joins see
/// one success and one `Gone`.
pub async fn join(state: &RelayState, public_key: &str, relay_token: &str) -> ApiResult<Joined> {
    let follower = PublicKey::parse(public_key)
        .map_err(|_| ApiError::InvalidInput("invalid public key".to_string()))?;

    let token = state
        .store
        .get_token(relay_token)
        .await?
        .ok_or_else(|| ApiError::NotFound("relay token not found".to_string()))?;

    if token.initiator_key == follower {
        return Err(ApiError::InvalidInput(
            "cannot join a pair you initiated".to_string(),
        ));
    }
    if token.consumed {
        return Err(ApiError::Gone("relay token already consumed".to_string()));
    }
    if token.expires_at <= now_ms() {
        return Err(ApiError::Gone("relay token expired".to_string()));
    }

    match state.store.join_pair(relay_token, &follower).await? {
        JoinOutcome::AlreadyConsumed => {
            Err(ApiError::Gone("relay token already consumed".to_string()))
        }
        JoinOutcome::Joined {
            pair_id,
            initiator_key,
        } => {
            state
                .metrics
                .pairs_joined_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::info!("pair completed: {:?}", pair_id);

            // Wake the initiator's watch channel, if attached.
            state.handoff.notify_paired(&pair_id, &follower);

            Ok(Joined {
                pair_id,
                partner_key: initiator_key,
            })
        }
    }
}

/// Report whether the caller's pair has a second user.
pub async fn status(state: &RelayState, ctx: &AuthContext) -> ApiResult<PairStatus> {
    let partner = state
        .store
        .get_partner(&ctx.public_key, &ctx.pair_id)
        .await?;

    Ok(PairStatus {
        partner_key: partner.map(|u| u.public_key),
    })
}

/// Erase the caller: their entries, their tokens, their user row.
///
/// The surviving partner keeps their pair membership; their next status
/// call simply reports `paired: false`.
pub async fn delete_account(state: &RelayState, ctx: &AuthContext) -> ApiResult<()> {
    state.store.delete_account(&ctx.public_key).await?;
    tracing::info!("account deleted: {:?}", ctx.public_key);
    Ok(())
}
