//! Handoff channel upgrade endpoint.

use axum::extract::WebSocketUpgrade;
use axum::response::Response;
use axum::Extension;
use std::sync::Arc;

use crate::handoff;
use crate::state::RelayState;

/// `GET /api/pairs/watch` — upgrade to the handoff channel.
///
/// Authentication happens in-stream: the first frame must be an `auth`
/// (watcher) or `collect_auth` (collector) frame signed with the role's
/// prefix.
pub async fn watch_handler(
    Extension(state): Extension<Arc<RelayState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handoff::run_channel(state, socket))
}
