//! HTTP sources for edge verifiers running outside the authority process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::edge::{KeySetSource, RevocationFeedSource};
use crate::AuthResult;
use crate::error::AuthError;
use crate::keys::{KeySetDocument, VerificationKeySet};
use crate::types::RevocationFeed;

fn http_client(timeout: Duration) -> AuthResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {e}")))
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
) -> AuthResult<T> {
    tracing::debug!(%url, "Fetching published document");

    let response = client
        .get(url.as_str())
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(%url, error = %e, "Failed to fetch published document");
            AuthError::store_unavailable(format!("fetching {url}: {e}"))
        })?;

    if !response.status().is_success() {
        return Err(AuthError::store_unavailable(format!(
            "fetching {url}: HTTP {}",
            response.status().as_u16()
        )));
    }

    response.json().await.map_err(|e| {
        tracing::warn!(%url, error = %e, "Failed to parse published document");
        AuthError::store_unavailable(format!("parsing {url}: {e}"))
    })
}

/// Reads the key-set document from `/.well-known/jwks.json`.
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpKeySetSource {
    /// # Errors
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> AuthResult<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url,
        })
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch_key_set(&self) -> AuthResult<Arc<VerificationKeySet>> {
        let document: KeySetDocument = fetch_json(&self.client, &self.url).await?;
        Ok(Arc::new(VerificationKeySet::from_document(&document)?))
    }
}

/// Reads the revocation feed from `/auth/revocations`.
#[derive(Debug, Clone)]
pub struct HttpRevocationFeedSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpRevocationFeedSource {
    /// # Errors
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> AuthResult<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url,
        })
    }
}

#[async_trait]
impl RevocationFeedSource for HttpRevocationFeedSource {
    async fn fetch_feed(&self) -> AuthResult<Arc<RevocationFeed>> {
        Ok(Arc::new(fetch_json(&self.client, &self.url).await?))
    }
}
