//! `GET /auth/revocations`
//!
//! The revocation feed polled by edge verifiers. The `ETag` is the feed
//! version, so an unchanged feed costs a 304.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use super::AuthorityState;
use super::jwks::if_none_match;
use crate::error::AuthError;

pub async fn revocation_feed_handler(
    State(state): State<AuthorityState>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let feed = state.revocations.feed().await?;
    let etag = format!("\"{}\"", feed.version);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response_headers.insert(header::ETAG, value);
    }

    if if_none_match(&headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }
    Ok((StatusCode::OK, response_headers, Json(feed.as_ref().clone())).into_response())
}
