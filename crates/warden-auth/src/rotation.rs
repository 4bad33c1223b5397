//! Refresh rotation engine.
//!
//! Every refresh token is single use. Presenting a valid one consumes it
//! through a compare-and-swap on the record version and yields a new pair
//! whose refresh record is the consumed one's successor. Presenting a token
//! that was already consumed (or losing the compare-and-swap to a concurrent
//! caller) is treated as replay: the whole family and its session are
//! revoked and the caller gets [`AuthError::ReuseDetected`].

use std::sync::Arc;

use uuid::Uuid;

use crate::AuthResult;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::issuer::{TokenIssuer, TokenPair};
use crate::revocation::RevocationCoordinator;
use crate::session::SessionStore;
use crate::storage::ConsumeOutcome;
use crate::types::{RefreshTokenRecord, RefreshTokenStatus};

/// Exchanges refresh tokens for new token pairs.
pub struct RefreshRotationEngine {
    store: Arc<SessionStore>,
    issuer: Arc<TokenIssuer>,
    revocations: Arc<RevocationCoordinator>,
    clock: Arc<dyn Clock>,
}

impl RefreshRotationEngine {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        issuer: Arc<TokenIssuer>,
        revocations: Arc<RevocationCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            issuer,
            revocations,
            clock,
        }
    }

    /// Consumes `refresh_token` and returns a new pair bound to the same
    /// session.
    ///
    /// # Errors
    /// - `RefreshExpired` if the token is unknown, or it or its session has
    ///   expired. Expiry wins over every other check.
    /// - `ReuseDetected` if the unexpired token or its session was already
    ///   revoked, the token was already consumed, or a concurrent rotation
    ///   consumed it first
    /// - `StoreUnavailable` if the store did not answer in time
    #[tracing::instrument(skip_all)]
    pub async fn rotate(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let jti = RefreshTokenRecord::hash_token(refresh_token);
        let now = self.clock.now();

        let Some(record) = self.store.find_refresh(&jti).await? else {
            tracing::debug!("Unknown refresh token presented");
            return Err(AuthError::RefreshExpired);
        };

        if record.is_expired(now) {
            return Err(AuthError::RefreshExpired);
        }

        if record.status != RefreshTokenStatus::Valid {
            tracing::warn!(
                session_id = %record.session_id,
                status = %record.status,
                "Spent refresh token presented"
            );
            return Err(self.reuse_detected(record.session_id).await);
        }

        let Some(session) = self.store.get(record.session_id).await? else {
            return Err(AuthError::RefreshExpired);
        };
        if session.is_revoked() {
            return Err(self.reuse_detected(record.session_id).await);
        }
        if session.is_expired(now) {
            return Err(AuthError::RefreshExpired);
        }

        let new_token = RefreshTokenRecord::generate_token();
        let successor = record.successor(RefreshTokenRecord::hash_token(&new_token), now);

        match self.store.consume_refresh(&record, &successor).await? {
            ConsumeOutcome::Consumed => {}
            ConsumeOutcome::Conflict => {
                tracing::warn!(session_id = %record.session_id, "Lost refresh rotation race");
                return Err(self.reuse_detected(record.session_id).await);
            }
        }

        if let Err(e) = self.store.touch(session.session_id).await {
            tracing::warn!(session_id = %session.session_id, error = %e, "Failed to touch session");
        }

        let pair = self.issuer.token_pair(&session, new_token)?;
        tracing::info!(session_id = %session.session_id, "Refresh token rotated");
        Ok(pair)
    }

    /// Revokes the family of `session_id` and returns the error to surface.
    ///
    /// The caller sees `ReuseDetected` even if the revocation itself fails;
    /// the failure is logged.
    async fn reuse_detected(&self, session_id: Uuid) -> AuthError {
        let subject_id = match self.store.get(session_id).await {
            Ok(Some(session)) => session.subject_id,
            _ => String::new(),
        };
        if let Err(e) = self.revocations.revoke_for_reuse(session_id, &subject_id).await {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "Failed to revoke family after refresh token reuse"
            );
        }
        AuthError::ReuseDetected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::audit::AuditDispatcher;
    use crate::clock::ManualClock;
    use crate::issuer::IssuerConfig;
    use crate::keys::{KeyManager, KeyManagerConfig, SigningAlgorithm};
    use crate::revocation::RevocationConfig;
    use crate::session::SessionStoreConfig;
    use crate::storage::{
        InMemoryRefreshTokenStorage, InMemoryRevocationStorage, InMemorySessionStorage,
    };
    use crate::token::TokenCodec;
    use crate::types::{Principal, RevocationReason};

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<SessionStore>,
        issuer: Arc<TokenIssuer>,
        revocations: Arc<RevocationCoordinator>,
        engine: RefreshRotationEngine,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(SessionStore::new(
            Arc::new(InMemorySessionStorage::new()),
            Arc::new(InMemoryRefreshTokenStorage::new()),
            Arc::new(InMemoryRevocationStorage::new()),
            clock.clone(),
            SessionStoreConfig {
                timeout: Duration::from_secs(1),
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
        let issuer = Arc::new(TokenIssuer::new(
            store.clone(),
            keys,
            TokenCodec::new("https://auth.test", "api", Duration::from_secs(60), clock.clone()),
            AuditDispatcher::disabled(),
            clock.clone(),
            IssuerConfig {
                access_token_lifetime: Duration::from_secs(900),
                refresh_token_lifetime: Duration::from_secs(3600),
            },
        ));
        let revocations = Arc::new(RevocationCoordinator::new(
            store.clone(),
            AuditDispatcher::disabled(),
            clock.clone(),
            RevocationConfig {
                entry_ttl: Duration::from_secs(960),
                feed_cache_ttl: Duration::ZERO,
            },
        ));
        let engine = RefreshRotationEngine::new(
            store.clone(),
            issuer.clone(),
            revocations.clone(),
            clock.clone(),
        );
        Fixture {
            clock,
            store,
            issuer,
            revocations,
            engine,
        }
    }

    #[tokio::test]
    async fn test_rotate_links_successor() {
        let f = fixture();
        let minted = f.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
        f.clock.advance(Duration::from_secs(60));

        let pair = f.engine.rotate(&minted.tokens.refresh_token).await.unwrap();
        assert_ne!(pair.refresh_token, minted.tokens.refresh_token);
        assert_eq!(pair.session_id, minted.session.session_id);

        let old_jti = RefreshTokenRecord::hash_token(&minted.tokens.refresh_token);
        let old = f.store.find_refresh(&old_jti).await.unwrap().unwrap();
        assert_eq!(old.status, RefreshTokenStatus::Consumed);
        assert_eq!(old.consumed_at, Some(f.clock.now()));

        let new = f
            .store
            .find_refresh(&RefreshTokenRecord::hash_token(&pair.refresh_token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new.parent_jti.as_deref(), Some(old_jti.as_str()));
        assert_eq!(new.family_id, old.family_id);
        assert_eq!(new.expires_at, old.expires_at);

        let session = f.store.get(minted.session.session_id).await.unwrap().unwrap();
        assert_eq!(session.last_seen_at, f.clock.now());
    }

    #[tokio::test]
    async fn test_replay_revokes_family() {
        let f = fixture();
        let minted = f.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
        let next = f.engine.rotate(&minted.tokens.refresh_token).await.unwrap();

        let err = f.engine.rotate(&minted.tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::ReuseDetected));
        assert!(f.store.is_revoked(minted.session.session_id).await.unwrap());

        let err = f.engine.rotate(&next.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::ReuseDetected));
    }

    #[tokio::test]
    async fn test_unknown_and_expired_tokens() {
        let f = fixture();
        let err = f.engine.rotate("not-a-token").await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshExpired));

        let minted = f.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
        f.clock.advance(Duration::from_secs(3600));
        let err = f.engine.rotate(&minted.tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshExpired));
    }

    #[tokio::test]
    async fn test_expired_spent_token_is_not_reuse() {
        let f = fixture();
        let minted = f.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
        f.engine.rotate(&minted.tokens.refresh_token).await.unwrap();

        f.clock.advance(Duration::from_secs(3600));
        let err = f.engine.rotate(&minted.tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshExpired));
        assert!(!f.store.is_revoked(minted.session.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_after_logout_is_reuse() {
        let f = fixture();
        let minted = f.issuer.mint(&Principal::new("u1", "t1")).await.unwrap();
        f.revocations
            .revoke(minted.session.session_id, RevocationReason::Logout)
            .await
            .unwrap();

        let err = f.engine.rotate(&minted.tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::ReuseDetected));
    }
}
