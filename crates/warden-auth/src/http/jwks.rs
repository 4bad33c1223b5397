//! `GET /.well-known/jwks.json`
//!
//! Serves the published verification key set with an `ETag` equal to the
//! set version. `Cache-Control: max-age` is the configured key set max age,
//! which is shorter than the rotation overlap, so a cached copy always
//! contains the key that signs after the next promotion.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use super::AuthorityState;

pub async fn jwks_handler(State(state): State<AuthorityState>, headers: HeaderMap) -> Response {
    let document = state.keys.verification_set().to_document();
    let etag = document.etag();

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response_headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!(
        "public, max-age={}",
        state.key_set_max_age.as_secs()
    )) {
        response_headers.insert(header::CACHE_CONTROL, value);
    }

    if if_none_match(&headers, &etag) {
        return (StatusCode::NOT_MODIFIED, response_headers).into_response();
    }
    (StatusCode::OK, response_headers, Json(document)).into_response()
}

/// Returns `true` if the request's `If-None-Match` names `etag`.
pub(crate) fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag || tag.trim() == "*"))
}
