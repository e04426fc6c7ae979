//! HTTP front door for duet-relay.
//!
//! Routes, per-key throttle, the signature middleware for authenticated
//! endpoints, and the uniform error envelope.

pub mod account;
pub mod entries;
pub mod health;
pub mod metrics;
pub mod pairs;
pub mod push;
pub mod watch;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{async_trait, Extension, Router};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::auth;
use crate::error::ApiError;
use crate::state::RelayState;
use crate::storage::now_ms;

/// Build the HTTP router with all endpoints.
pub fn build_router(state: Arc<RelayState>) -> Router {
    let protected = Router::new()
        .route("/api/pairs/status", get(pairs::status_handler))
        .route(
            "/api/entries",
            post(entries::upload_handler).get(entries::fetch_handler),
        )
        .route("/api/entries/ack", post(entries::ack_handler))
        .route("/api/push/subscribe", post(push::subscribe_handler))
        .route("/api/account", delete(account::delete_handler))
        .layer(middleware::from_fn(require_signature));

    Router::new()
        .route("/api/pairs/initiate", post(pairs::initiate_handler))
        .route("/api/pairs/join", post(pairs::join_handler))
        .route("/api/pairs/watch", get(watch::watch_handler))
        .merge(protected)
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(middleware::from_fn(throttle_requests))
        .layer(Extension(state))
}

/// Per-key fixed-window throttle.
///
/// Keyed on the public-key header; requests without it pass untouched —
/// the pairing endpoints rely on signature cost and token semantics for
/// abuse resistance.
async fn throttle_requests(
    Extension(state): Extension<Arc<RelayState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = req
        .headers()
        .get(auth::HEADER_PUBLIC_KEY)
        .and_then(|v| v.to_str().ok());

    if let Some(key) = key {
        if state.throttle.check(key, now_ms()).is_err() {
            state
                .metrics
                .throttle_hits_total
                .fetch_add(1, Ordering::Relaxed);
            return Err(ApiError::RateLimited("Too many requests".to_string()));
        }
    }

    Ok(next.run(req).await)
}

/// Signature verification for authenticated routes.
///
/// Buffers the body so the canonical hash covers exactly the bytes the
/// handler will read, then re-attaches it along with the verified
/// identity.
async fn require_signature(
    Extension(state): Extension<Arc<RelayState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = req.into_parts();

    let bytes = axum::body::to_bytes(body, state.config.storage.max_body_size)
        .await
        .map_err(|_| ApiError::InvalidInput("request body too large".to_string()))?;

    let path_with_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let ctx = auth::verify_request(
        &state.store,
        parts.method.as_str(),
        &path_with_query,
        &parts.headers,
        &bytes,
    )
    .await?;

    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// JSON extractor whose rejection keeps the `{"error": ...}` envelope.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::InvalidInput(rejection.body_text()))?;
        Ok(ApiJson(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::push::NoopPushTransport;
    use crate::storage::{RelayStore, SqliteStore};
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use axum::http::StatusCode;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use chrono::Utc;
    use duet_types::PublicKey;
    use ed25519_dalek::{Signer, SigningKey};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    async fn test_state() -> Arc<RelayState> {
        test_state_with(Config::default()).await
    }

    async fn test_state_with(config: Config) -> Arc<RelayState> {
        let store = SqliteStore::in_memory().await.unwrap();
        Arc::new(RelayState::new(config, store, Arc::new(NoopPushTransport)))
    }

    fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn pk_str(seed: u8) -> String {
        PublicKey::from_key_bytes(signing_key(seed).verifying_key().as_bytes())
            .as_str()
            .to_string()
    }

    fn json_request(method: &str, path: &str, body: Value) -> Request {
        Request::builder()
            .method(method)
            .uri(path)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn signed_request(seed: u8, method: &str, path_with_query: &str, body: Option<Value>) -> Request {
        let signing = signing_key(seed);
        let timestamp = Utc::now().to_rfc3339();
        let body_bytes = body
            .as_ref()
            .map(|v| serde_json::to_vec(v).unwrap())
            .unwrap_or_default();

        let canonical =
            auth::canonical_request_bytes(method, path_with_query, &timestamp, &body_bytes);
        let signature = STANDARD.encode(signing.sign(&canonical).to_bytes());

        let mut builder = Request::builder()
            .method(method)
            .uri(path_with_query)
            .header(AUTHORIZATION, format!("Signature {signature}"))
            .header(auth::HEADER_PUBLIC_KEY, pk_str(seed))
            .header(auth::HEADER_TIMESTAMP, timestamp.as_str());
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        builder.body(Body::from(body_bytes)).unwrap()
    }

    async fn send(app: &Router, req: Request) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Initiate for A (seed), returning `(pairId, relayToken)`.
    async fn initiate(app: &Router, seed: u8) -> (String, String) {
        let (status, body) = send(
            app,
            json_request(
                "POST",
                "/api/pairs/initiate",
                json!({ "publicKey": pk_str(seed) }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["pairId"].as_str().unwrap().to_string(),
            body["relayToken"].as_str().unwrap().to_string(),
        )
    }

    async fn join(app: &Router, seed: u8, token: &str) -> (StatusCode, Value) {
        send(
            app,
            json_request(
                "POST",
                "/api/pairs/join",
                json!({ "publicKey": pk_str(seed), "relayToken": token }),
            ),
        )
        .await
    }

    #[tokio::test]
    async fn initiate_returns_pair_and_token() {
        let app = build_router(test_state().await);
        let (pair_id, token) = initiate(&app, 1).await;
        assert!(!pair_id.is_empty());
        assert_eq!(token.len(), 43);
    }

    #[tokio::test]
    async fn initiate_with_bad_key_uses_error_envelope() {
        let app = build_router(test_state().await);
        let (status, body) = send(
            &app,
            json_request("POST", "/api/pairs/initiate", json!({ "publicKey": "nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("public key"));
    }

    #[tokio::test]
    async fn malformed_json_body_uses_error_envelope() {
        let app = build_router(test_state().await);
        let req = Request::builder()
            .method("POST")
            .uri("/api/pairs/initiate")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn happy_pair_round_trip() {
        let app = build_router(test_state().await);

        // initiate(A) → join(B) → upload by A → fetch by B → ack → empty
        let (pair_id, token) = initiate(&app, 1).await;
        let (status, body) = join(&app, 2, &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pairId"], pair_id);
        assert_eq!(body["partnerPublicKey"], pk_str(1));

        let (status, body) = send(
            &app,
            signed_request(
                1,
                "POST",
                "/api/entries",
                Some(json!({ "dayId": "2026-02-15", "payload": STANDARD.encode(b"X") })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "stored");
        let entry_id = body["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            signed_request(2, "GET", "/api/entries?since=2026-01-01", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let fetched = body["entries"].as_array().unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0]["dayId"], "2026-02-15");
        assert_eq!(fetched[0]["payload"], STANDARD.encode(b"X"));

        let (status, body) = send(
            &app,
            signed_request(
                2,
                "POST",
                "/api/entries/ack",
                Some(json!({ "entryIds": [entry_id] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 1);

        let (status, body) = send(&app, signed_request(2, "GET", "/api/entries", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["entries"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn both_sides_see_paired_status() {
        let app = build_router(test_state().await);
        let (_, token) = initiate(&app, 1).await;
        join(&app, 2, &token).await;

        let (status, body) = send(&app, signed_request(1, "GET", "/api/pairs/status", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paired"], true);
        assert_eq!(body["partnerPublicKey"], pk_str(2));

        let (_, body) = send(&app, signed_request(2, "GET", "/api/pairs/status", None)).await;
        assert_eq!(body["paired"], true);
        assert_eq!(body["partnerPublicKey"], pk_str(1));
    }

    #[tokio::test]
    async fn pending_status_omits_partner_key() {
        let app = build_router(test_state().await);
        initiate(&app, 1).await;

        let (status, body) = send(&app, signed_request(1, "GET", "/api/pairs/status", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paired"], false);
        assert!(body.get("partnerPublicKey").is_none());
    }

    #[tokio::test]
    async fn token_redeems_exactly_once() {
        let app = build_router(test_state().await);
        let (_, token) = initiate(&app, 1).await;

        let (first, _) = join(&app, 2, &token).await;
        let (second, body) = join(&app, 3, &token).await;
        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::GONE);
        assert!(body["error"].as_str().unwrap().contains("consumed"));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let app = build_router(test_state().await);
        let (status, _) = join(&app, 2, "missing-token").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_sequence_hits_daily_cap() {
        let app = build_router(test_state().await);
        let (_, token) = initiate(&app, 1).await;
        join(&app, 2, &token).await;

        let mut statuses = Vec::new();
        for n in 0..3 {
            let (status, _) = send(
                &app,
                signed_request(
                    1,
                    "POST",
                    "/api/entries",
                    Some(json!({
                        "dayId": "2026-02-16",
                        "payload": STANDARD.encode(format!("entry-{n}").as_bytes()),
                    })),
                ),
            )
            .await;
            statuses.push(status);
        }

        assert_eq!(
            statuses,
            vec![
                StatusCode::CREATED,
                StatusCode::CREATED,
                StatusCode::TOO_MANY_REQUESTS
            ]
        );
    }

    #[tokio::test]
    async fn self_ack_deletes_nothing() {
        let app = build_router(test_state().await);
        let (_, token) = initiate(&app, 1).await;
        join(&app, 2, &token).await;

        let (_, body) = send(
            &app,
            signed_request(
                1,
                "POST",
                "/api/entries",
                Some(json!({ "dayId": "2026-02-15", "payload": STANDARD.encode(b"mine") })),
            ),
        )
        .await;
        let entry_id = body["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            signed_request(
                1,
                "POST",
                "/api/entries/ack",
                Some(json!({ "entryIds": [entry_id] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 0);

        // B can still fetch the entry.
        let (_, body) = send(&app, signed_request(2, "GET", "/api/entries", None)).await;
        assert_eq!(body["entries"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_auth_headers_is_unauthorized() {
        let app = build_router(test_state().await);
        let req = Request::builder()
            .method("GET")
            .uri("/api/pairs/status")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn stale_timestamp_is_unauthorized() {
        let app = build_router(test_state().await);
        initiate(&app, 1).await;

        let signing = signing_key(1);
        let timestamp = "2020-01-01T00:00:00Z";
        let canonical = auth::canonical_request_bytes("GET", "/api/pairs/status", timestamp, b"");
        let signature = STANDARD.encode(signing.sign(&canonical).to_bytes());

        let req = Request::builder()
            .method("GET")
            .uri("/api/pairs/status")
            .header(AUTHORIZATION, format!("Signature {signature}"))
            .header(auth::HEADER_PUBLIC_KEY, pk_str(1))
            .header(auth::HEADER_TIMESTAMP, timestamp)
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn tampered_body_is_unauthorized() {
        let app = build_router(test_state().await);
        let (_, token) = initiate(&app, 1).await;
        join(&app, 2, &token).await;

        // Sign one body, send another.
        let signing = signing_key(1);
        let timestamp = Utc::now().to_rfc3339();
        let signed_body = serde_json::to_vec(
            &json!({ "dayId": "2026-02-15", "payload": STANDARD.encode(b"good") }),
        )
        .unwrap();
        let sent_body = serde_json::to_vec(
            &json!({ "dayId": "2026-02-15", "payload": STANDARD.encode(b"evil") }),
        )
        .unwrap();

        let canonical =
            auth::canonical_request_bytes("POST", "/api/entries", &timestamp, &signed_body);
        let signature = STANDARD.encode(signing.sign(&canonical).to_bytes());

        let req = Request::builder()
            .method("POST")
            .uri("/api/entries")
            .header(AUTHORIZATION, format!("Signature {signature}"))
            .header(auth::HEADER_PUBLIC_KEY, pk_str(1))
            .header(auth::HEADER_TIMESTAMP, timestamp.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(sent_body))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signature_binds_the_query_string() {
        let app = build_router(test_state().await);
        let (_, token) = initiate(&app, 1).await;
        join(&app, 2, &token).await;

        // Signed for one query, sent with another.
        let signing = signing_key(2);
        let timestamp = Utc::now().to_rfc3339();
        let canonical = auth::canonical_request_bytes(
            "GET",
            "/api/entries?since=2026-01-01",
            &timestamp,
            b"",
        );
        let signature = STANDARD.encode(signing.sign(&canonical).to_bytes());

        let req = Request::builder()
            .method("GET")
            .uri("/api/entries?since=1970-01-01")
            .header(AUTHORIZATION, format!("Signature {signature}"))
            .header(auth::HEADER_PUBLIC_KEY, pk_str(2))
            .header(auth::HEADER_TIMESTAMP, timestamp.as_str())
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_since_parameter_is_rejected() {
        let app = build_router(test_state().await);
        let (_, token) = initiate(&app, 1).await;
        join(&app, 2, &token).await;

        let (status, _) = send(
            &app,
            signed_request(2, "GET", "/api/entries?since=26-01-01", None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn throttle_rejects_past_the_window_cap() {
        let mut config = Config::default();
        config.limits.requests_per_window = 2;
        let app = build_router(test_state_with(config).await);
        initiate(&app, 1).await;

        let (first, _) = send(&app, signed_request(1, "GET", "/api/pairs/status", None)).await;
        let (second, _) = send(&app, signed_request(1, "GET", "/api/pairs/status", None)).await;
        let (third, body) = send(&app, signed_request(1, "GET", "/api/pairs/status", None)).await;

        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::OK);
        assert_eq!(third, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Too many requests");
    }

    #[tokio::test]
    async fn throttle_ignores_keyless_requests() {
        let mut config = Config::default();
        config.limits.requests_per_window = 1;
        let app = build_router(test_state_with(config).await);

        for _ in 0..5 {
            let req = Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap();
            let (status, _) = send(&app, req).await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn subscribe_then_repair_clears_push() {
        let state = test_state().await;
        let app = build_router(state.clone());
        let (_, token) = initiate(&app, 1).await;
        join(&app, 2, &token).await;

        let (status, body) = send(
            &app,
            signed_request(
                1,
                "POST",
                "/api/push/subscribe",
                Some(json!({
                    "endpoint": "https://push.example/sub",
                    "p256dh": "key",
                    "auth": "secret",
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "subscribed");

        let user_key = PublicKey::parse(&pk_str(1)).unwrap();
        let user = state.store.get_user(&user_key).await.unwrap().unwrap();
        assert!(user.push.is_some());

        // Re-initiating moves the user to a new pair and drops the push fields.
        initiate(&app, 1).await;
        let user = state.store.get_user(&user_key).await.unwrap().unwrap();
        assert!(user.push.is_none());
    }

    #[tokio::test]
    async fn subscribe_rejects_empty_fields() {
        let app = build_router(test_state().await);
        initiate(&app, 1).await;

        let (status, _) = send(
            &app,
            signed_request(
                1,
                "POST",
                "/api/push/subscribe",
                Some(json!({ "endpoint": "", "p256dh": "k", "auth": "s" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_account_is_terminal() {
        let app = build_router(test_state().await);
        initiate(&app, 1).await;

        let response = app
            .clone()
            .oneshot(signed_request(1, "DELETE", "/api/account", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // The key is no longer registered.
        let (status, _) = send(&app, signed_request(1, "GET", "/api/pairs/status", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(test_state().await);
        let req = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_text() {
        let app = build_router(test_state().await);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("duet_relay_uploads_total"));
    }
}
