//! Account deletion endpoint.

use axum::http::StatusCode;
use axum::Extension;
use std::sync::Arc;

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::pairing;
use crate::state::RelayState;

/// `DELETE /api/account` (authenticated).
///
/// Erases the caller's entries, tokens, and user row. Device key loss is
/// unrecoverable by design; this is the only account-ending operation.
pub async fn delete_handler(
    Extension(state): Extension<Arc<RelayState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<StatusCode> {
    pairing::delete_account(&state, &ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}
