//! Access token verification.
//!
//! Two modes share one contract:
//!
//! - **authoritative**: signature and claims, then a session store lookup.
//!   Revocation is visible on the next request. Store outages are handled by
//!   the [`StoreFailurePolicy`] fixed at construction.
//! - **edge**: signature and claims against a cached key set, revocation
//!   against a cached feed. No store round trip. Revocation is visible
//!   within one feed refresh interval plus the authority's feed cache TTL.
//!   A snapshot older than `max_revocation_staleness` is never trusted; the
//!   edge answers `StoreUnavailable` instead.
//!
//! Neither mode ever returns a principal for a token it could not fully
//! check, except authoritative fail-open, which marks the principal with
//! `revocation_checked = false`.

pub mod edge;
pub mod remote;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use edge::{EdgeCache, EdgeCacheConfig, KeySetSource, RevocationFeedSource, RevocationSnapshot};
pub use remote::{HttpKeySetSource, HttpRevocationFeedSource};

use crate::AuthResult;
use crate::authz::{AccessAuthorizer, AccessDecision};
use crate::config::StoreFailurePolicy;
use crate::error::{AuthError, ErrorKind};
use crate::keys::{KeyManager, VerificationKeySet};
use crate::session::SessionStore;
use crate::token::{AccessClaims, CodecError, TokenCodec};

/// Read access to the currently published verification keys.
///
/// Verifiers see only public keys.
pub trait VerificationKeys: Send + Sync {
    fn current(&self) -> Arc<VerificationKeySet>;
}

impl VerificationKeys for KeyManager {
    fn current(&self) -> Arc<VerificationKeySet> {
        self.verification_set()
    }
}

/// Where revocation state comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    Authoritative,
    Edge,
}

/// A verified token.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedPrincipal {
    pub claims: AccessClaims,
    pub mode: VerificationMode,
    /// `false` only when the store was unreachable under fail-open.
    pub revocation_checked: bool,
}

/// Wire form of a verification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<AccessClaims>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl From<AuthResult<AuthenticatedPrincipal>> for VerificationResponse {
    fn from(result: AuthResult<AuthenticatedPrincipal>) -> Self {
        match result {
            Ok(principal) => Self {
                valid: true,
                claims: Some(principal.claims),
                error_kind: None,
            },
            Err(e) => Self {
                valid: false,
                claims: None,
                error_kind: Some(e.kind()),
            },
        }
    }
}

enum Backend {
    Authoritative {
        keys: Arc<dyn VerificationKeys>,
        store: Arc<SessionStore>,
        failure_policy: StoreFailurePolicy,
    },
    Edge {
        cache: Arc<EdgeCache>,
    },
}

/// Verifies access tokens on the request path.
pub struct Verifier {
    codec: TokenCodec,
    backend: Backend,
    authorizer: Option<Arc<dyn AccessAuthorizer>>,
}

impl Verifier {
    /// A verifier that consults the session store on every call.
    #[must_use]
    pub fn authoritative(
        codec: TokenCodec,
        keys: Arc<dyn VerificationKeys>,
        store: Arc<SessionStore>,
        failure_policy: StoreFailurePolicy,
    ) -> Self {
        Self {
            codec,
            backend: Backend::Authoritative {
                keys,
                store,
                failure_policy,
            },
            authorizer: None,
        }
    }

    /// A verifier that only reads cached snapshots.
    #[must_use]
    pub fn edge(codec: TokenCodec, cache: Arc<EdgeCache>) -> Self {
        Self {
            codec,
            backend: Backend::Edge { cache },
            authorizer: None,
        }
    }

    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn AccessAuthorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    #[must_use]
    pub fn mode(&self) -> VerificationMode {
        match self.backend {
            Backend::Authoritative { .. } => VerificationMode::Authoritative,
            Backend::Edge { .. } => VerificationMode::Edge,
        }
    }

    /// Verifies signature, claims and revocation status of `token`.
    ///
    /// # Errors
    /// Returns the typed reason the token was rejected.
    pub async fn verify(&self, token: &str) -> AuthResult<AuthenticatedPrincipal> {
        match &self.backend {
            Backend::Authoritative {
                keys,
                store,
                failure_policy,
            } => {
                let claims = self.codec.verify(token, &keys.current())?;
                let revocation_checked = match store.is_revoked(claims.sid).await {
                    Ok(true) => return Err(AuthError::Revoked),
                    Ok(false) => true,
                    Err(e) if e.is_transient() && *failure_policy == StoreFailurePolicy::FailOpen => {
                        tracing::warn!(
                            session_id = %claims.sid,
                            error = %e,
                            "Session store unavailable; accepting token without revocation check"
                        );
                        false
                    }
                    Err(e) => return Err(e),
                };
                Ok(AuthenticatedPrincipal {
                    claims,
                    mode: VerificationMode::Authoritative,
                    revocation_checked,
                })
            }
            Backend::Edge { cache } => {
                cache.ensure_fresh().await?;

                let claims = match self.codec.verify(token, &cache.current()) {
                    Err(CodecError::UnknownKey { kid }) => {
                        if !cache.refresh_keys_for_unknown_kid().await {
                            return Err(AuthError::unknown_key(kid));
                        }
                        self.codec.verify(token, &cache.current())?
                    }
                    other => other?,
                };

                let revoked = cache
                    .revocations()
                    .ok_or_else(|| AuthError::store_unavailable("revocation feed not loaded"))?
                    .is_revoked(&claims);
                if revoked {
                    return Err(AuthError::Revoked);
                }
                Ok(AuthenticatedPrincipal {
                    claims,
                    mode: VerificationMode::Edge,
                    revocation_checked: true,
                })
            }
        }
    }

    /// Verifies `token`, then asks the configured authorizer about
    /// `(resource, action)`. Without an authorizer every verified token is
    /// allowed.
    ///
    /// # Errors
    /// Returns `AccessDenied` if the authorizer denies, or any verification
    /// error.
    pub async fn verify_and_authorize(
        &self,
        token: &str,
        resource: &str,
        action: &str,
    ) -> AuthResult<AuthenticatedPrincipal> {
        let principal = self.verify(token).await?;
        self.authorize(&principal, resource, action).await?;
        Ok(principal)
    }

    /// Asks the configured authorizer about `(resource, action)` for a
    /// principal this verifier already accepted.
    ///
    /// # Errors
    /// Returns `AccessDenied` if the authorizer denies.
    pub async fn authorize(
        &self,
        principal: &AuthenticatedPrincipal,
        resource: &str,
        action: &str,
    ) -> AuthResult<()> {
        if let Some(authorizer) = &self.authorizer
            && let AccessDecision::Deny { reason } =
                authorizer.authorize(principal, resource, action).await
        {
            tracing::debug!(resource, action, %reason, "Access denied");
            return Err(AuthError::access_denied(reason));
        }
        Ok(())
    }

    /// Verifies `token` and returns the wire-form result.
    pub async fn check(&self, token: &str) -> VerificationResponse {
        self.verify(token).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use crate::audit::AuditDispatcher;
    use crate::authz::RoleAuthorizer;
    use crate::clock::ManualClock;
    use crate::issuer::{IssuerConfig, TokenIssuer};
    use crate::keys::{KeyManagerConfig, SigningAlgorithm};
    use crate::revocation::{RevocationConfig, RevocationCoordinator};
    use crate::session::SessionStoreConfig;
    use crate::storage::{
        InMemoryRefreshTokenStorage, InMemoryRevocationStorage, InMemorySessionStorage,
        SessionStorage,
    };
    use crate::types::{Principal, RevocationFeed, RevocationReason, Session};

    struct Harness {
        clock: Arc<ManualClock>,
        keys: Arc<KeyManager>,
        store: Arc<SessionStore>,
        issuer: TokenIssuer,
        revocations: Arc<RevocationCoordinator>,
        codec: TokenCodec,
    }

    fn harness_with(sessions: Arc<dyn SessionStorage>) -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(SessionStore::new(
            sessions,
            Arc::new(InMemoryRefreshTokenStorage::new()),
            Arc::new(InMemoryRevocationStorage::new()),
            clock.clone(),
            SessionStoreConfig {
                timeout: Duration::from_millis(50),
                session_lifetime: Duration::from_secs(24 * 3600),
            },
        ));
        let keys = Arc::new(
            KeyManager::new(
                KeyManagerConfig {
                    algorithm: SigningAlgorithm::ES384,
                    propagation_delay: Duration::from_secs(1800),
                    retirement_grace: Duration::from_secs(960),
                },
                clock.clone(),
            )
            .unwrap(),
        );
        let codec = TokenCodec::new("https://auth.test", "api", Duration::from_secs(60), clock.clone());
        let issuer = TokenIssuer::new(
            store.clone(),
            keys.clone(),
            codec.clone(),
            AuditDispatcher::disabled(),
            clock.clone(),
            IssuerConfig {
                access_token_lifetime: Duration::from_secs(900),
                refresh_token_lifetime: Duration::from_secs(3600),
            },
        );
        let revocations = Arc::new(RevocationCoordinator::new(
            store.clone(),
            AuditDispatcher::disabled(),
            clock.clone(),
            RevocationConfig {
                entry_ttl: Duration::from_secs(960),
                feed_cache_ttl: Duration::ZERO,
            },
        ));
        Harness {
            clock,
            keys,
            store,
            issuer,
            revocations,
            codec,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(InMemorySessionStorage::new()))
    }

    fn authoritative(h: &Harness, policy: StoreFailurePolicy) -> Verifier {
        Verifier::authoritative(h.codec.clone(), h.keys.clone(), h.store.clone(), policy)
    }

    fn edge(h: &Harness) -> (Arc<EdgeCache>, Verifier) {
        let cache = Arc::new(EdgeCache::new(
            h.keys.clone(),
            h.revocations.clone(),
            h.clock.clone(),
            EdgeCacheConfig {
                key_set_refresh_interval: Duration::from_secs(300),
                revocation_refresh_interval: Duration::from_secs(30),
                max_revocation_staleness: Duration::from_secs(60),
            },
        ));
        (cache.clone(), Verifier::edge(h.codec.clone(), cache))
    }

    #[tokio::test]
    async fn test_authoritative_sees_revocation_immediately() {
        let h = harness();
        let verifier = authoritative(&h, StoreFailurePolicy::FailClosed);
        let minted = h.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();

        let principal = verifier.verify(&minted.tokens.access_token).await.unwrap();
        assert_eq!(principal.mode, VerificationMode::Authoritative);
        assert!(principal.revocation_checked);

        h.revocations
            .revoke(minted.session.session_id, RevocationReason::Logout)
            .await
            .unwrap();
        let err = verifier.verify(&minted.tokens.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Revoked));
    }

    #[tokio::test]
    async fn test_edge_sees_revocation_within_interval() {
        let h = harness();
        let (_, verifier) = edge(&h);
        let minted = h.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();

        assert!(verifier.verify(&minted.tokens.access_token).await.is_ok());
        h.revocations
            .revoke(minted.session.session_id, RevocationReason::Admin)
            .await
            .unwrap();

        // Still within the cached window.
        assert!(verifier.verify(&minted.tokens.access_token).await.is_ok());

        h.clock.advance(Duration::from_secs(30));
        let err = verifier.verify(&minted.tokens.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Revoked));
    }

    struct FlakyFeed {
        inner: Arc<RevocationCoordinator>,
        down: AtomicBool,
    }

    #[async_trait]
    impl RevocationFeedSource for FlakyFeed {
        async fn fetch_feed(&self) -> AuthResult<Arc<RevocationFeed>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(AuthError::store_unavailable("feed unreachable"));
            }
            self.inner.fetch_feed().await
        }
    }

    #[tokio::test]
    async fn test_edge_rejects_when_feed_outage_exceeds_bound() {
        let h = harness();
        let feed = Arc::new(FlakyFeed {
            inner: h.revocations.clone(),
            down: AtomicBool::new(false),
        });
        let cache = Arc::new(EdgeCache::new(
            h.keys.clone(),
            feed.clone(),
            h.clock.clone(),
            EdgeCacheConfig {
                key_set_refresh_interval: Duration::from_secs(300),
                revocation_refresh_interval: Duration::from_secs(30),
                max_revocation_staleness: Duration::from_secs(60),
            },
        ));
        let verifier = Verifier::edge(h.codec.clone(), cache);
        let minted = h.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
        assert!(verifier.verify(&minted.tokens.access_token).await.is_ok());

        feed.down.store(true, Ordering::SeqCst);
        h.revocations
            .revoke(minted.session.session_id, RevocationReason::Admin)
            .await
            .unwrap();

        h.clock.advance(Duration::from_secs(600));
        let err = verifier.verify(&minted.tokens.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable { .. }));

        feed.down.store(false, Ordering::SeqCst);
        let err = verifier.verify(&minted.tokens.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Revoked));
    }

    #[tokio::test]
    async fn test_edge_refetches_keys_for_unknown_kid() {
        let h = harness();
        let (_, verifier) = edge(&h);
        let minted = h.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
        verifier.verify(&minted.tokens.access_token).await.unwrap();

        // Compromise the active key: a replacement signs from now on.
        let old = h.keys.active_kid();
        h.keys.emergency_revoke(&old).await.unwrap();
        h.clock.advance(Duration::from_secs(10));
        let minted = h.issuer.mint(&Principal::new("u2", "t1")).await.unwrap();

        let principal = verifier.verify(&minted.tokens.access_token).await.unwrap();
        assert_eq!(principal.claims.sub, "u2");
    }

    #[tokio::test]
    async fn test_expired_token() {
        let h = harness();
        let verifier = authoritative(&h, StoreFailurePolicy::FailClosed);
        let minted = h.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();

        h.clock.advance(Duration::from_secs(900 + 60));
        let err = verifier.verify(&minted.tokens.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::ExpiredToken));
    }

    struct OutageSessionStorage {
        inner: InMemorySessionStorage,
    }

    #[async_trait]
    impl SessionStorage for OutageSessionStorage {
        async fn create(&self, session: &Session) -> AuthResult<()> {
            self.inner.create(session).await
        }
        async fn find_by_id(&self, _session_id: Uuid) -> AuthResult<Option<Session>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn touch(&self, session_id: Uuid, at: OffsetDateTime) -> AuthResult<()> {
            self.inner.touch(session_id, at).await
        }
        async fn revoke(
            &self,
            session_id: Uuid,
            reason: RevocationReason,
            at: OffsetDateTime,
        ) -> AuthResult<bool> {
            self.inner.revoke(session_id, reason, at).await
        }
        async fn revoke_by_subject(
            &self,
            subject_id: &str,
            reason: RevocationReason,
            at: OffsetDateTime,
        ) -> AuthResult<Vec<Uuid>> {
            self.inner.revoke_by_subject(subject_id, reason, at).await
        }
        async fn list_by_subject(&self, subject_id: &str) -> AuthResult<Vec<Session>> {
            self.inner.list_by_subject(subject_id).await
        }
        async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
            self.inner.cleanup_expired(now).await
        }
    }

    #[tokio::test]
    async fn test_store_outage_policies() {
        let h = harness_with(Arc::new(OutageSessionStorage {
            inner: InMemorySessionStorage::new(),
        }));
        let minted = h.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();

        let closed = authoritative(&h, StoreFailurePolicy::FailClosed);
        let err = closed.verify(&minted.tokens.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable { .. }));

        let open = authoritative(&h, StoreFailurePolicy::FailOpen);
        let principal = open.verify(&minted.tokens.access_token).await.unwrap();
        assert!(!principal.revocation_checked);
    }

    #[tokio::test]
    async fn test_fail_open_still_rejects_bad_signature() {
        let h = harness_with(Arc::new(OutageSessionStorage {
            inner: InMemorySessionStorage::new(),
        }));
        let minted = h.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
        let open = authoritative(&h, StoreFailurePolicy::FailOpen);

        let mut tampered = minted.tokens.access_token.clone();
        tampered.push('x');
        assert!(open.verify(&tampered).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_and_authorize() {
        let h = harness();
        let verifier = authoritative(&h, StoreFailurePolicy::FailClosed).with_authorizer(Arc::new(
            RoleAuthorizer::new().require("reports", "write", "editor"),
        ));
        let reader = h
            .issuer
            .mint(&Principal::new("u1", "t1").with_roles(["reader"]))
            .await
            .unwrap();
        let editor = h
            .issuer
            .mint(&Principal::new("u2", "t1").with_roles(["editor"]))
            .await
            .unwrap();

        assert!(
            verifier
                .verify_and_authorize(&reader.tokens.access_token, "reports", "read")
                .await
                .is_ok()
        );
        let err = verifier
            .verify_and_authorize(&reader.tokens.access_token, "reports", "write")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccessDenied { .. }));
        assert!(
            verifier
                .verify_and_authorize(&editor.tokens.access_token, "reports", "write")
                .await
                .is_ok()
        );

        let principal = verifier.verify(&reader.tokens.access_token).await.unwrap();
        assert!(verifier.authorize(&principal, "reports", "read").await.is_ok());
        assert!(verifier.authorize(&principal, "reports", "write").await.is_err());
    }

    #[tokio::test]
    async fn test_check_wire_form() {
        let h = harness();
        let verifier = authoritative(&h, StoreFailurePolicy::FailClosed);

        let response = verifier.check("garbage").await;
        assert!(!response.valid);
        assert_eq!(response.error_kind, Some(ErrorKind::MalformedToken));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["errorKind"], "malformed_token");
        assert!(json.get("claims").is_none());
    }
}
