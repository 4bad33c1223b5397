//! Key administration endpoints.
//!
//! - `GET /admin/keys`
//! - `POST /admin/keys/rotate`
//! - `POST /admin/keys/{kid}/retire`
//! - `POST /admin/keys/{kid}/compromise`

use axum::{
    Json,
    extract::{Path, State},
};

use super::AuthorityState;
use crate::error::AuthError;
use crate::keys::KeyMetadata;

pub async fn list_keys_handler(State(state): State<AuthorityState>) -> Json<Vec<KeyMetadata>> {
    Json(state.keys.keys().await)
}

pub async fn rotate_key_handler(
    State(state): State<AuthorityState>,
) -> Result<Json<KeyMetadata>, AuthError> {
    Ok(Json(state.keys.rotate().await?))
}

pub async fn retire_key_handler(
    State(state): State<AuthorityState>,
    Path(kid): Path<String>,
) -> Result<Json<KeyMetadata>, AuthError> {
    Ok(Json(state.keys.retire(&kid).await?))
}

/// Removes `kid` from the published set at once. Returns the key that is
/// active afterwards.
pub async fn compromise_key_handler(
    State(state): State<AuthorityState>,
    Path(kid): Path<String>,
) -> Result<Json<KeyMetadata>, AuthError> {
    Ok(Json(state.keys.emergency_revoke(&kid).await?))
}
