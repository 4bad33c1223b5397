use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, Method, Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;
use warden_auth::{AccessClaims, AuthError, AuthorityState};

/// Resource name the key administration routes are authorized against.
pub const KEYS_RESOURCE: &str = "keys";
/// Resource and action for revoking sessions that belong to someone else.
pub const SESSIONS_RESOURCE: &str = "sessions";
pub const REVOKE_ACTION: &str = "revoke";
/// Header carrying the collaborator credential.
pub const INTERNAL_KEY_HEADER: &str = "x-warden-internal-key";

// Middleware that ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    let req_id_value = match req.headers().get(&header_name) {
        Some(value) => value.clone(),
        None => HeaderValue::from_str(&Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    };
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub(crate) fn bearer_token(req: &Request<Body>) -> Option<&str> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;
    (scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty()).then(|| token.trim())
}

/// Requires an authoritatively verified access token that the configured
/// authorizer allows to act on [`KEYS_RESOURCE`].
pub async fn require_admin(
    State(state): State<AuthorityState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&req).map(str::to_owned) else {
        tracing::debug!(path = %req.uri().path(), "No bearer token on admin route");
        return AuthError::malformed_token("missing bearer token").into_response();
    };

    let action = if req.method() == Method::GET { "read" } else { "write" };
    let decision = state
        .verifier
        .verify_and_authorize(&token, KEYS_RESOURCE, action)
        .await;
    match decision {
        Ok(principal) => {
            tracing::info!(
                subject_id = %principal.claims.sub,
                method = %req.method(),
                path = %req.uri().path(),
                "Admin request authorized"
            );
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// State for the collaborator and revocation guards.
#[derive(Clone)]
pub struct CallerGuard {
    state: AuthorityState,
    internal_key: Option<Arc<str>>,
}

impl CallerGuard {
    #[must_use]
    pub fn new(state: AuthorityState, internal_key: Option<&str>) -> Self {
        Self {
            state,
            internal_key: internal_key.map(Arc::from),
        }
    }

    fn has_internal_key(&self, req: &Request<Body>) -> bool {
        let presented = req
            .headers()
            .get(INTERNAL_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        match (self.internal_key.as_deref(), presented) {
            (Some(expected), Some(presented)) => {
                constant_time_eq(presented.as_bytes(), expected.as_bytes())
            }
            _ => false,
        }
    }

    /// Lets the request through for collaborators holding the internal key,
    /// for the owner of the target (`owns`), or for principals the
    /// authorizer allows to revoke on behalf of others.
    async fn authorize_revocation<F>(&self, req: Request<Body>, next: Next, owns: F) -> Response
    where
        F: FnOnce(&AccessClaims) -> bool,
    {
        if self.has_internal_key(&req) {
            return next.run(req).await;
        }
        let Some(token) = bearer_token(&req).map(str::to_owned) else {
            tracing::debug!(path = %req.uri().path(), "No credentials on revocation route");
            return AuthError::malformed_token("missing bearer token").into_response();
        };

        let verifier = &self.state.verifier;
        let principal = match verifier.verify(&token).await {
            Ok(principal) => principal,
            Err(e) => return e.into_response(),
        };
        if !owns(&principal.claims) {
            let decision = verifier
                .authorize(&principal, SESSIONS_RESOURCE, REVOKE_ACTION)
                .await;
            if let Err(e) = decision {
                return e.into_response();
            }
            tracing::info!(
                subject_id = %principal.claims.sub,
                path = %req.uri().path(),
                "Revocation on behalf of another subject authorized"
            );
        }
        next.run(req).await
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (left, right) in a.iter().zip(b.iter()) {
        diff |= left ^ right;
    }
    diff == 0
}

/// Requires the collaborator credential.
pub async fn require_internal_key(
    State(guard): State<CallerGuard>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if guard.has_internal_key(&req) {
        return next.run(req).await;
    }
    tracing::warn!(path = %req.uri().path(), "Rejected internal request");
    if req.headers().contains_key(INTERNAL_KEY_HEADER) {
        AuthError::access_denied("invalid internal key").into_response()
    } else {
        AuthError::malformed_token("missing internal key").into_response()
    }
}

/// Guards `POST /auth/sessions/{id}/revoke`. A token bound to the session
/// may revoke it.
pub async fn authorize_session_revoke(
    State(guard): State<CallerGuard>,
    Path(session_id): Path<Uuid>,
    req: Request<Body>,
    next: Next,
) -> Response {
    guard
        .authorize_revocation(req, next, |claims| claims.sid == session_id)
        .await
}

/// Guards `POST /auth/subjects/{id}/revoke-all`. A subject may sign itself
/// out everywhere.
pub async fn authorize_subject_revoke(
    State(guard): State<CallerGuard>,
    Path(subject_id): Path<String>,
    req: Request<Body>,
    next: Next,
) -> Response {
    guard
        .authorize_revocation(req, next, |claims| claims.sub == subject_id)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(header: &str) -> Request<Body> {
        Request::builder()
            .uri("/admin/keys")
            .header(AUTHORIZATION, header)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&request_with("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(&request_with("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&request_with("Basic dXNlcg==")), None);
        assert_eq!(bearer_token(&request_with("Bearer ")), None);

        let bare = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(bearer_token(&bare), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"0123456789abcdef", b"0123456789abcdef"));
        assert!(!constant_time_eq(b"0123456789abcdef", b"0123456789abcdeg"));
        assert!(!constant_time_eq(b"0123456789abcdef", b"0123456789abcde"));
    }
}
