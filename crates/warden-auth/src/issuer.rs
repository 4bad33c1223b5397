//! Token issuer: the single entry point for minting sessions.
//!
//! Credential, MFA and federation flows call [`TokenIssuer::mint`] once
//! identity is established. They never construct tokens themselves.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::audit::{AuditDispatcher, AuditEvent, AuditEventType};
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::keys::KeyManager;
use crate::session::SessionStore;
use crate::token::{AccessClaims, TokenCodec};
use crate::types::{Principal, RefreshTokenRecord, RevocationReason, Session};

/// Access/refresh pair returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,

    /// Opaque refresh token. Only its hash is stored.
    pub refresh_token: String,

    /// Always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    pub session_id: Uuid,
}

/// Result of [`TokenIssuer::mint`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintedSession {
    pub session: Session,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Issuer settings.
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    pub access_token_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
}

impl IssuerConfig {
    #[must_use]
    pub fn from_auth_config(config: &AuthConfig) -> Self {
        Self {
            access_token_lifetime: config.tokens.access_token_lifetime,
            refresh_token_lifetime: config.tokens.refresh_token_lifetime,
        }
    }
}

/// Creates sessions and signs their tokens.
pub struct TokenIssuer {
    store: Arc<SessionStore>,
    keys: Arc<KeyManager>,
    codec: TokenCodec,
    audit: AuditDispatcher,
    clock: Arc<dyn Clock>,
    config: IssuerConfig,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        keys: Arc<KeyManager>,
        codec: TokenCodec,
        audit: AuditDispatcher,
        clock: Arc<dyn Clock>,
        config: IssuerConfig,
    ) -> Self {
        Self {
            store,
            keys,
            codec,
            audit,
            clock,
            config,
        }
    }

    /// Creates a session for `principal` and returns its first token pair.
    ///
    /// # Errors
    /// Returns `InvalidRequest` for an incomplete principal, or a store or
    /// signing error.
    #[tracing::instrument(skip(self, principal), fields(subject_id = %principal.subject_id))]
    pub async fn mint(&self, principal: &Principal) -> AuthResult<MintedSession> {
        principal.validate().map_err(AuthError::invalid_request)?;

        let session = self.store.create(principal).await?;
        let now = self.clock.now();

        let tokens = match self.first_pair(&session, now).await {
            Ok(tokens) => tokens,
            Err(e) => {
                self.abandon(&session, &e).await;
                return Err(e);
            }
        };

        tracing::info!(
            session_id = %session.session_id,
            tenant_id = %session.tenant_id,
            "Session created"
        );
        self.audit.emit(AuditEvent::new(
            AuditEventType::SessionCreated,
            session.session_id,
            &session.subject_id,
            now,
        ));

        Ok(MintedSession { session, tokens })
    }

    async fn first_pair(&self, session: &Session, now: OffsetDateTime) -> AuthResult<TokenPair> {
        let refresh_token = RefreshTokenRecord::generate_token();
        let family_expiry = (now + self.config.refresh_token_lifetime).min(session.expires_at);
        let record = RefreshTokenRecord::root(
            RefreshTokenRecord::hash_token(&refresh_token),
            session.session_id,
            session.current_refresh_family,
            now,
            family_expiry,
        );
        self.store.create_refresh(&record).await?;
        self.token_pair(session, refresh_token)
    }

    /// Revokes a session whose first tokens could not be issued, so no
    /// active session is left without a refresh family.
    async fn abandon(&self, session: &Session, cause: &AuthError) {
        tracing::warn!(
            session_id = %session.session_id,
            error = %cause,
            "Token issuance failed; revoking the new session"
        );
        if let Err(e) = self
            .store
            .revoke(session.session_id, RevocationReason::IssueFailed)
            .await
        {
            tracing::error!(
                session_id = %session.session_id,
                error = %e,
                "Failed to revoke session after issuance failure"
            );
        }
    }

    /// Signs a fresh access token for `session` and pairs it with
    /// `refresh_token`.
    pub(crate) fn token_pair(&self, session: &Session, refresh_token: String) -> AuthResult<TokenPair> {
        let now = self.clock.now();
        let claims = AccessClaims::for_session(
            session,
            self.codec.issuer(),
            self.codec.audience(),
            now,
            self.config.access_token_lifetime,
        );
        let access_token = self.keys.sign(&self.codec, &claims)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: claims.expires_in(now),
            session_id: session.session_id,
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }
}
