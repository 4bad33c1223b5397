//! Error responses.
//!
//! `AuthError` renders as a JSON body:
//!
//! ```json
//! {
//!   "error": "invalid_token",
//!   "error_description": "Token expired",
//!   "error_kind": "expired_token",
//!   "recovery": "refresh"
//! }
//! ```
//!
//! 401 responses carry a `WWW-Authenticate: Bearer` challenge.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::AuthError;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code) = error_details(&self);

        let description = if status.is_server_error() && !self.is_transient() {
            tracing::error!(error = %self, category = %self.category(), "Request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "error": error_code,
            "error_description": description,
            "error_kind": self.kind(),
            "recovery": self.recovery(),
        });

        let mut headers = HeaderMap::new();
        if status == StatusCode::UNAUTHORIZED {
            let challenge = format!(
                "Bearer error=\"{error_code}\", error_description=\"{}\"",
                description.replace('"', "'")
            );
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            headers.insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }

        (status, headers, Json(body)).into_response()
    }
}

/// Returns (HTTP status, OAuth-style error code).
fn error_details(error: &AuthError) -> (StatusCode, &'static str) {
    match error {
        AuthError::ExpiredToken
        | AuthError::InvalidSignature { .. }
        | AuthError::UnknownKey { .. }
        | AuthError::ClaimMismatch { .. }
        | AuthError::MalformedToken { .. }
        | AuthError::Revoked => (StatusCode::UNAUTHORIZED, "invalid_token"),
        AuthError::ReuseDetected | AuthError::RefreshExpired => {
            (StatusCode::BAD_REQUEST, "invalid_grant")
        }
        AuthError::StoreUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable")
        }
        AuthError::AccessDenied { .. } => (StatusCode::FORBIDDEN, "access_denied"),
        AuthError::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
        AuthError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        AuthError::KeyManagement { .. } => (StatusCode::CONFLICT, "conflict"),
        AuthError::Storage { .. } | AuthError::Configuration { .. } | AuthError::Internal { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "server_error")
        }
    }
}
