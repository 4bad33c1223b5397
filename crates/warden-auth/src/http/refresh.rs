//! `POST /auth/refresh`

use axum::{Json, extract::State};
use serde::Deserialize;

use super::AuthorityState;
use crate::error::AuthError;
use crate::issuer::TokenPair;

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Exchanges a refresh token for a new pair.
///
/// A replayed token answers 400 `invalid_grant` with
/// `error_kind = reuse_detected`; the client must re-authenticate.
pub async fn refresh_handler(
    State(state): State<AuthorityState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, AuthError> {
    if request.refresh_token.is_empty() {
        return Err(AuthError::invalid_request("refresh_token is required"));
    }
    let pair = state.rotation.rotate(&request.refresh_token).await?;
    Ok(Json(pair))
}
