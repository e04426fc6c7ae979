//! Per-request signature verification.
//!
//! Every authenticated request carries three headers: the signature,
//! the signing public key, and an ISO-8601 timestamp. The signature
//! covers `method\npathWithQuery\ntimestamp\nbodyHash`, where the body
//! hash is the lower-case hex SHA-256 of the raw body bytes (empty
//! string for bodyless requests). The 5-minute freshness window plus
//! the exact-byte binding is the replay defence; there is no nonce
//! cache.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use duet_types::{PairId, PublicKey};
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::{ApiError, AuthError};
use crate::storage::{RelayStore, SqliteStore};

/// Header carrying the signing public key.
pub const HEADER_PUBLIC_KEY: &str = "x-public-key";

/// Header carrying the signed ISO-8601 timestamp.
pub const HEADER_TIMESTAMP: &str = "x-timestamp";

/// Scheme prefix in the Authorization header.
pub const SIGNATURE_SCHEME: &str = "Signature ";

/// Maximum tolerated clock skew, in milliseconds.
pub const FRESHNESS_WINDOW_MS: i64 = 5 * 60 * 1000;

/// The verified identity attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The signing key, confirmed registered.
    pub public_key: PublicKey,
    /// The pair the key belongs to.
    pub pair_id: PairId,
}

/// Role a handoff channel authenticates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// The initiator watching for the pairing to complete.
    Watcher,
    /// The follower collecting the history bundle.
    Collector,
}

/// Build the canonical byte sequence a request signature covers.
pub fn canonical_request_bytes(
    method: &str,
    path_with_query: &str,
    timestamp: &str,
    body: &[u8],
) -> Vec<u8> {
    let body_hash = if body.is_empty() {
        String::new()
    } else {
        hex::encode(Sha256::digest(body))
    };
    format!("{method}\n{path_with_query}\n{timestamp}\n{body_hash}").into_bytes()
}

/// Build the canonical byte sequence a channel auth signature covers.
///
/// Distinct prefixes per role: a watch signature cannot stand in for a
/// collect.
pub fn canonical_channel_bytes(role: ChannelRole, public_key: &str, timestamp: &str) -> Vec<u8> {
    let prefix = match role {
        ChannelRole::Watcher => "WATCH",
        ChannelRole::Collector => "COLLECT",
    };
    format!("{prefix}\n{public_key}\n{timestamp}").into_bytes()
}

/// Check that a timestamp parses and sits within the freshness window.
pub fn check_freshness(timestamp: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
    let ts = DateTime::parse_from_rfc3339(timestamp).map_err(|_| AuthError::ClockSkew)?;
    let skew = (now - ts.with_timezone(&Utc)).num_milliseconds().abs();
    if skew > FRESHNESS_WINDOW_MS {
        return Err(AuthError::ClockSkew);
    }
    Ok(())
}

/// Verify a detached Ed25519 signature over a payload.
pub fn verify_signature(
    public_key: &PublicKey,
    signature_b64: &str,
    payload: &[u8],
) -> Result<(), AuthError> {
    let sig_bytes = STANDARD
        .decode(signature_b64)
        .map_err(|e| AuthError::BadHeader(format!("signature base64: {e}")))?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| AuthError::BadSignature)?;
    let verifying_key =
        VerifyingKey::from_bytes(&public_key.key_bytes()).map_err(|_| AuthError::BadSignature)?;
    verifying_key
        .verify_strict(payload, &signature)
        .map_err(|_| AuthError::BadSignature)
}

fn extract_headers(headers: &HeaderMap) -> Result<(String, String, String), AuthError> {
    let signature = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeaders)?
        .to_str()
        .map_err(|_| AuthError::BadHeader("authorization not ASCII".to_string()))?;
    let signature = signature
        .strip_prefix(SIGNATURE_SCHEME)
        .ok_or_else(|| AuthError::BadHeader("authorization scheme".to_string()))?
        .to_string();

    let public_key = headers
        .get(HEADER_PUBLIC_KEY)
        .ok_or(AuthError::MissingHeaders)?
        .to_str()
        .map_err(|_| AuthError::BadHeader("public key not ASCII".to_string()))?
        .to_string();

    let timestamp = headers
        .get(HEADER_TIMESTAMP)
        .ok_or(AuthError::MissingHeaders)?
        .to_str()
        .map_err(|_| AuthError::BadHeader("timestamp not ASCII".to_string()))?
        .to_string();

    Ok((signature, public_key, timestamp))
}

/// Verify an authenticated HTTP request.
///
/// Cryptographic checks run first; only then is the key resolved against
/// the user table, so a valid signature over a non-enrolled key never
/// touches any account's state. Suspends on the database lookup only.
pub async fn verify_request(
    store: &SqliteStore,
    method: &str,
    path_with_query: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<AuthContext, ApiError> {
    let (signature, public_key, timestamp) = extract_headers(headers)?;

    let public_key = PublicKey::parse(&public_key)
        .map_err(|e| AuthError::BadHeader(e.to_string()))
        .map_err(ApiError::from)?;

    check_freshness(&timestamp, Utc::now())?;

    let payload = canonical_request_bytes(method, path_with_query, &timestamp, body);
    verify_signature(&public_key, &signature, &payload)?;

    let user = store
        .get_user(&public_key)
        .await?
        .ok_or(AuthError::UnknownUser)?;

    Ok(AuthContext {
        public_key: user.public_key,
        pair_id: user.pair_id,
    })
}

/// Verify a handoff channel auth frame.
pub async fn verify_channel_auth(
    store: &SqliteStore,
    role: ChannelRole,
    public_key: &str,
    timestamp: &str,
    signature: &str,
) -> Result<AuthContext, ApiError> {
    let key = PublicKey::parse(public_key)
        .map_err(|e| AuthError::BadHeader(e.to_string()))
        .map_err(ApiError::from)?;

    check_freshness(timestamp, Utc::now())?;

    let payload = canonical_channel_bytes(role, public_key, timestamp);
    verify_signature(&key, signature, &payload)?;

    let user = store.get_user(&key).await?.ok_or(AuthError::UnknownUser)?;

    Ok(AuthContext {
        public_key: user.public_key,
        pair_id: user.pair_id,
    })
}
