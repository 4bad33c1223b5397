//! `POST /auth/verify`
//!
//! The edge verification contract. Always answers 200 with
//! `{valid, claims?, errorKind?}`; a rejected token is not an HTTP error.

use axum::{Json, extract::State};
use serde::Deserialize;

use super::AuthorityState;
use crate::verifier::{VerificationMode, VerificationResponse};

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
    /// Defaults to authoritative.
    #[serde(default)]
    pub mode: Option<VerificationMode>,
}

pub async fn verify_handler(
    State(state): State<AuthorityState>,
    Json(request): Json<VerifyRequest>,
) -> Json<VerificationResponse> {
    let verifier = match (request.mode, &state.edge_verifier) {
        (Some(VerificationMode::Edge), Some(edge)) => edge,
        _ => &state.verifier,
    };
    let response = verifier.check(&request.token).await;
    tracing::debug!(
        mode = ?verifier.mode(),
        valid = response.valid,
        error_kind = ?response.error_kind,
        "Token verified"
    );
    Json(response)
}
