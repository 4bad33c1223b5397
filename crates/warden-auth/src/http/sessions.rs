//! Session endpoints.
//!
//! - `POST /internal/sessions`: mint a session for an authenticated principal
//! - `POST /auth/sessions/{id}/revoke`: revoke one session
//! - `POST /auth/subjects/{id}/revoke-all`: sign a subject out everywhere

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthorityState;
use crate::error::AuthError;
use crate::issuer::MintedSession;
use crate::types::{Principal, RevocationReason};

pub async fn mint_handler(
    State(state): State<AuthorityState>,
    Json(principal): Json<Principal>,
) -> Result<(StatusCode, Json<MintedSession>), AuthError> {
    let minted = state.issuer.mint(&principal).await?;
    Ok((StatusCode::CREATED, Json(minted)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeSessionRequest {
    #[serde(default)]
    pub reason: Option<RevocationReason>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeSessionResponse {
    pub session_id: Uuid,
    /// `false` if the session was already revoked.
    pub revoked: bool,
}

pub async fn revoke_session_handler(
    State(state): State<AuthorityState>,
    Path(session_id): Path<Uuid>,
    request: Option<Json<RevokeSessionRequest>>,
) -> Result<Json<RevokeSessionResponse>, AuthError> {
    let reason = request
        .and_then(|Json(r)| r.reason)
        .unwrap_or(RevocationReason::Logout);
    let revoked = state.revocations.revoke(session_id, reason).await?;
    Ok(Json(RevokeSessionResponse {
        session_id,
        revoked,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeAllResponse {
    pub subject_id: String,
    pub revoked_sessions: Vec<Uuid>,
}

pub async fn revoke_all_handler(
    State(state): State<AuthorityState>,
    Path(subject_id): Path<String>,
) -> Result<Json<RevokeAllResponse>, AuthError> {
    let revoked_sessions = state.revocations.revoke_all(&subject_id).await?;
    Ok(Json(RevokeAllResponse {
        subject_id,
        revoked_sessions,
    }))
}
