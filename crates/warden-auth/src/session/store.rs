//! TTL-aware session store with bounded call latency.
//!
//! [`SessionStore`] wraps the storage traits and applies the configured
//! timeout to every backend call. A call that does not finish in time fails
//! with [`AuthError::StoreUnavailable`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::AuthResult;
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::storage::{ConsumeOutcome, RefreshTokenStorage, RevocationStorage, SessionStorage};
use crate::types::{
    Principal, RefreshTokenRecord, RevocationEntry, RevocationFeed, RevocationReason, Session,
};

/// Session store settings.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Upper bound for each backend call.
    pub timeout: Duration,
    /// Lifetime of newly created sessions.
    pub session_lifetime: Duration,
}

impl SessionStoreConfig {
    #[must_use]
    pub fn from_auth_config(config: &AuthConfig) -> Self {
        Self {
            timeout: config.store.timeout,
            session_lifetime: config.tokens.session_lifetime,
        }
    }
}

/// Counts of records removed by [`SessionStore::cleanup_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions: u64,
    pub refresh_tokens: u64,
    pub revocations: u64,
}

/// Durable record of sessions, refresh lineage and revocations.
pub struct SessionStore {
    sessions: Arc<dyn SessionStorage>,
    refresh_tokens: Arc<dyn RefreshTokenStorage>,
    revocations: Arc<dyn RevocationStorage>,
    clock: Arc<dyn Clock>,
    config: SessionStoreConfig,
}

impl SessionStore {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStorage>,
        refresh_tokens: Arc<dyn RefreshTokenStorage>,
        revocations: Arc<dyn RevocationStorage>,
        clock: Arc<dyn Clock>,
        config: SessionStoreConfig,
    ) -> Self {
        Self {
            sessions,
            refresh_tokens,
            revocations,
            clock,
            config,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        match tokio::time::timeout(self.config.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "Session store call timed out"
                );
                Err(AuthError::store_unavailable(format!(
                    "{operation} timed out after {}ms",
                    self.config.timeout.as_millis()
                )))
            }
        }
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Creates and stores an active session for `principal`.
    pub async fn create(&self, principal: &Principal) -> AuthResult<Session> {
        let session = Session::new(principal, self.clock.now(), self.config.session_lifetime);
        self.guarded("session.create", self.sessions.create(&session))
            .await?;
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid) -> AuthResult<Option<Session>> {
        self.guarded("session.get", self.sessions.find_by_id(session_id))
            .await
    }

    pub async fn touch(&self, session_id: Uuid) -> AuthResult<()> {
        let now = self.clock.now();
        self.guarded("session.touch", self.sessions.touch(session_id, now))
            .await
    }

    /// Marks the session revoked. Returns `false` if it already was, or does
    /// not exist. Independent of the session's TTL.
    pub async fn revoke(&self, session_id: Uuid, reason: RevocationReason) -> AuthResult<bool> {
        let now = self.clock.now();
        self.guarded("session.revoke", self.sessions.revoke(session_id, reason, now))
            .await
    }

    /// Returns `true` unless the session exists, is active and not expired.
    pub async fn is_revoked(&self, session_id: Uuid) -> AuthResult<bool> {
        let now = self.clock.now();
        Ok(!self
            .get(session_id)
            .await?
            .is_some_and(|session| session.is_active(now)))
    }

    pub async fn list_by_subject(&self, subject_id: &str) -> AuthResult<Vec<Session>> {
        self.guarded("session.list_by_subject", self.sessions.list_by_subject(subject_id))
            .await
    }

    pub async fn revoke_by_subject(
        &self,
        subject_id: &str,
        reason: RevocationReason,
    ) -> AuthResult<Vec<Uuid>> {
        let now = self.clock.now();
        self.guarded(
            "session.revoke_by_subject",
            self.sessions.revoke_by_subject(subject_id, reason, now),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Refresh lineage
    // ------------------------------------------------------------------

    pub async fn create_refresh(&self, record: &RefreshTokenRecord) -> AuthResult<()> {
        self.guarded("refresh.create", self.refresh_tokens.create(record))
            .await
    }

    pub async fn find_refresh(&self, jti: &str) -> AuthResult<Option<RefreshTokenRecord>> {
        self.guarded("refresh.find", self.refresh_tokens.find_by_jti(jti))
            .await
    }

    /// Compare-and-swap consume of `record`, storing `successor` atomically.
    pub async fn consume_refresh(
        &self,
        record: &RefreshTokenRecord,
        successor: &RefreshTokenRecord,
    ) -> AuthResult<ConsumeOutcome> {
        let now = self.clock.now();
        self.guarded(
            "refresh.consume",
            self.refresh_tokens
                .compare_and_consume(&record.jti, record.version, now, successor),
        )
        .await
    }

    pub async fn revoke_family(&self, session_id: Uuid) -> AuthResult<u64> {
        self.guarded("refresh.revoke_family", self.refresh_tokens.revoke_family(session_id))
            .await
    }

    pub async fn refresh_chain(&self, session_id: Uuid) -> AuthResult<Vec<RefreshTokenRecord>> {
        self.guarded("refresh.list", self.refresh_tokens.list_by_session(session_id))
            .await
    }

    // ------------------------------------------------------------------
    // Revocations
    // ------------------------------------------------------------------

    pub async fn record_revocation(&self, entry: &RevocationEntry) -> AuthResult<bool> {
        self.guarded("revocation.record", self.revocations.record(entry))
            .await
    }

    pub async fn revocation_feed(&self) -> AuthResult<RevocationFeed> {
        let now = self.clock.now();
        self.guarded("revocation.feed", self.revocations.feed(now))
            .await
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Removes expired sessions, refresh records and revocation entries.
    pub async fn cleanup_expired(&self) -> AuthResult<CleanupReport> {
        let now = self.clock.now();
        let report = CleanupReport {
            sessions: self
                .guarded("session.cleanup", self.sessions.cleanup_expired(now))
                .await?,
            refresh_tokens: self
                .guarded("refresh.cleanup", self.refresh_tokens.cleanup_expired(now))
                .await?,
            revocations: self
                .guarded("revocation.cleanup", self.revocations.cleanup_expired(now))
                .await?,
        };
        if report != CleanupReport::default() {
            tracing::info!(
                sessions = report.sessions,
                refresh_tokens = report.refresh_tokens,
                revocations = report.revocations,
                "Pruned expired records"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{
        InMemoryRefreshTokenStorage, InMemoryRevocationStorage, InMemorySessionStorage,
    };
    use async_trait::async_trait;
    use time::OffsetDateTime;

    fn store(clock: Arc<ManualClock>, sessions: Arc<dyn SessionStorage>) -> SessionStore {
        SessionStore::new(
            sessions,
            Arc::new(InMemoryRefreshTokenStorage::new()),
            Arc::new(InMemoryRevocationStorage::new()),
            clock,
            SessionStoreConfig {
                timeout: Duration::from_millis(50),
                session_lifetime: Duration::from_secs(3600),
            },
        )
    }

    struct SlowSessionStorage;

    #[async_trait]
    impl SessionStorage for SlowSessionStorage {
        async fn create(&self, _session: &Session) -> AuthResult<()> {
            Ok(())
        }
        async fn find_by_id(&self, _session_id: Uuid) -> AuthResult<Option<Session>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn touch(&self, _session_id: Uuid, _at: OffsetDateTime) -> AuthResult<()> {
            Ok(())
        }
        async fn revoke(
            &self,
            _session_id: Uuid,
            _reason: RevocationReason,
            _at: OffsetDateTime,
        ) -> AuthResult<bool> {
            Ok(false)
        }
        async fn revoke_by_subject(
            &self,
            _subject_id: &str,
            _reason: RevocationReason,
            _at: OffsetDateTime,
        ) -> AuthResult<Vec<Uuid>> {
            Ok(Vec::new())
        }
        async fn list_by_subject(&self, _subject_id: &str) -> AuthResult<Vec<Session>> {
            Ok(Vec::new())
        }
        async fn cleanup_expired(&self, _now: OffsetDateTime) -> AuthResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_create_get_touch() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock.clone(), Arc::new(InMemorySessionStorage::new()));

        let session = store.create(&Principal::new("u1", "t1")).await.unwrap();
        assert_eq!(session.expires_at, clock.now() + Duration::from_secs(3600));

        clock.advance(Duration::from_secs(30));
        store.touch(session.session_id).await.unwrap();
        let stored = store.get(session.session_id).await.unwrap().unwrap();
        assert_eq!(stored.last_seen_at, clock.now());
    }

    #[tokio::test]
    async fn test_is_revoked() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock.clone(), Arc::new(InMemorySessionStorage::new()));
        let session = store.create(&Principal::new("u1", "t1")).await.unwrap();

        assert!(!store.is_revoked(session.session_id).await.unwrap());
        assert!(store.is_revoked(Uuid::new_v4()).await.unwrap());

        assert!(store.revoke(session.session_id, RevocationReason::Logout).await.unwrap());
        assert!(!store.revoke(session.session_id, RevocationReason::Logout).await.unwrap());
        assert!(store.is_revoked(session.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_session_counts_as_revoked() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock.clone(), Arc::new(InMemorySessionStorage::new()));
        let session = store.create(&Principal::new("u1", "t1")).await.unwrap();

        clock.advance(Duration::from_secs(3600));
        assert!(store.is_revoked(session.session_id).await.unwrap());
        assert_eq!(store.cleanup_expired().await.unwrap().sessions, 1);
    }

    #[tokio::test]
    async fn test_timeout_yields_store_unavailable() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock, Arc::new(SlowSessionStorage));

        let err = store.is_revoked(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable { .. }));
        assert!(err.is_transient());
    }
}
