//! Revocation coordinator.
//!
//! Revoking a session updates three things: the session itself, its refresh
//! family, and a revocation entry that edge verifiers pick up through the
//! feed. Authoritative verification sees the change on the next request;
//! edge verification within one feed refresh interval.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::audit::{AuditDispatcher, AuditEvent, AuditEventType};
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::session::SessionStore;
use crate::types::{RevocationEntry, RevocationFeed, RevocationReason, RevocationTarget};

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct RevocationConfig {
    /// How long an entry is kept. Must cover the access token lifetime plus
    /// clock skew so that no token outlives its entry.
    pub entry_ttl: Duration,
    /// How long a generated feed is served before it is rebuilt.
    pub feed_cache_ttl: Duration,
}

impl RevocationConfig {
    #[must_use]
    pub fn from_auth_config(config: &AuthConfig) -> Self {
        Self {
            entry_ttl: config.tokens.access_token_lifetime + config.tokens.clock_skew,
            feed_cache_ttl: config.edge.feed_cache_ttl,
        }
    }
}

struct CachedFeed {
    feed: Arc<RevocationFeed>,
    built_at: OffsetDateTime,
}

/// Applies revocations and publishes the revocation feed.
pub struct RevocationCoordinator {
    store: Arc<SessionStore>,
    audit: AuditDispatcher,
    clock: Arc<dyn Clock>,
    config: RevocationConfig,
    cached_feed: ArcSwapOption<CachedFeed>,
}

impl RevocationCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        audit: AuditDispatcher,
        clock: Arc<dyn Clock>,
        config: RevocationConfig,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            config,
            cached_feed: ArcSwapOption::empty(),
        }
    }

    fn entry(&self, target: RevocationTarget, reason: RevocationReason) -> RevocationEntry {
        let now = self.clock.now();
        RevocationEntry {
            target,
            reason,
            revoked_at: now,
            expires_at: now + self.config.entry_ttl,
        }
    }

    /// Revokes one session and its refresh family.
    ///
    /// Returns `false` if the session was already revoked. Calling it again
    /// repairs any part of an earlier attempt that did not complete.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown session, or a store error.
    #[tracing::instrument(skip(self), fields(session_id = %session_id))]
    pub async fn revoke(&self, session_id: Uuid, reason: RevocationReason) -> AuthResult<bool> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| AuthError::not_found(format!("session {session_id}")))?;

        let newly_revoked = self.store.revoke(session_id, reason).await?;
        self.store
            .record_revocation(&self.entry(RevocationTarget::Session(session_id), reason))
            .await?;
        let refresh_revoked = self.store.revoke_family(session_id).await?;
        self.invalidate_feed();

        if newly_revoked {
            tracing::info!(
                subject_id = %session.subject_id,
                reason = %reason,
                refresh_revoked,
                "Session revoked"
            );
            self.audit.emit(
                AuditEvent::new(
                    AuditEventType::SessionRevoked,
                    session_id,
                    &session.subject_id,
                    self.clock.now(),
                )
                .with_reason(reason),
            );
        }
        Ok(newly_revoked)
    }

    /// Revokes every session of a subject ("sign out everywhere").
    ///
    /// Access tokens issued to the subject up to now are rejected even if
    /// their session is unknown to this authority.
    ///
    /// # Errors
    /// Returns a store error.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_all(&self, subject_id: &str) -> AuthResult<Vec<Uuid>> {
        let reason = RevocationReason::SignOutEverywhere;
        self.store
            .record_revocation(&self.entry(RevocationTarget::Subject(subject_id.to_string()), reason))
            .await?;

        let revoked = self.store.revoke_by_subject(subject_id, reason).await?;
        for session_id in &revoked {
            self.store.revoke_family(*session_id).await?;
            self.audit.emit(
                AuditEvent::new(
                    AuditEventType::SessionRevoked,
                    *session_id,
                    subject_id,
                    self.clock.now(),
                )
                .with_reason(reason),
            );
        }
        self.invalidate_feed();

        tracing::info!(sessions = revoked.len(), "Subject signed out everywhere");
        Ok(revoked)
    }

    /// Reacts to a replayed refresh token: revokes the whole family and the
    /// session it belongs to.
    ///
    /// # Errors
    /// Returns a store error.
    pub async fn revoke_for_reuse(&self, session_id: Uuid, subject_id: &str) -> AuthResult<u64> {
        let reason = RevocationReason::ReuseDetected;
        self.store.revoke(session_id, reason).await?;
        self.store
            .record_revocation(&self.entry(RevocationTarget::Session(session_id), reason))
            .await?;
        let revoked = self.store.revoke_family(session_id).await?;
        self.invalidate_feed();

        tracing::error!(
            session_id = %session_id,
            subject_id,
            refresh_revoked = revoked,
            "Refresh token reuse detected; family revoked"
        );
        self.audit.emit(
            AuditEvent::new(AuditEventType::RefreshReused, session_id, subject_id, self.clock.now())
                .with_reason(reason),
        );
        Ok(revoked)
    }

    /// Returns the current revocation feed, rebuilding it when the cached
    /// copy is older than the cache TTL.
    ///
    /// # Errors
    /// Returns a store error.
    pub async fn feed(&self) -> AuthResult<Arc<RevocationFeed>> {
        let now = self.clock.now();
        if let Some(cached) = self.cached_feed.load_full()
            && now < cached.built_at + self.config.feed_cache_ttl
        {
            return Ok(cached.feed.clone());
        }

        let feed = Arc::new(self.store.revocation_feed().await?);
        self.cached_feed.store(Some(Arc::new(CachedFeed {
            feed: feed.clone(),
            built_at: now,
        })));
        Ok(feed)
    }

    fn invalidate_feed(&self) {
        self.cached_feed.store(None);
    }
}
