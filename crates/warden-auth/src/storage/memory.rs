//! In-memory storage backend.
//!
//! Each store keeps its data behind a `tokio::sync::RwLock`. The refresh
//! token consume runs entirely under the write lock, which makes it
//! linearizable within one process. Multi-replica deployments need a shared
//! backend such as `warden-auth-postgres`.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::refresh_token::{ConsumeOutcome, RefreshTokenStorage};
use super::revocation::RevocationStorage;
use super::session::SessionStorage;
use crate::AuthResult;
use crate::error::AuthError;
use crate::types::{
    RefreshTokenRecord, RefreshTokenStatus, RevocationEntry, RevocationFeed, RevocationReason,
    RevocationTarget, Session, SessionStatus,
};

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemorySessionStorage {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn create(&self, session: &Session) -> AuthResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(AuthError::storage(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn find_by_id(&self, session_id: Uuid) -> AuthResult<Option<Session>> {
        Ok(self.sessions.read().await.get(&session_id).cloned())
    }

    async fn touch(&self, session_id: Uuid, at: OffsetDateTime) -> AuthResult<()> {
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.last_seen_at = session.last_seen_at.max(at);
        }
        Ok(())
    }

    async fn revoke(
        &self,
        session_id: Uuid,
        reason: RevocationReason,
        at: OffsetDateTime,
    ) -> AuthResult<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .get_mut(&session_id)
            .is_some_and(|session| mark_revoked(session, reason, at)))
    }

    async fn revoke_by_subject(
        &self,
        subject_id: &str,
        reason: RevocationReason,
        at: OffsetDateTime,
    ) -> AuthResult<Vec<Uuid>> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .values_mut()
            .filter(|s| s.subject_id == subject_id)
            .filter_map(|s| mark_revoked(s, reason, at).then_some(s.session_id))
            .collect())
    }

    async fn list_by_subject(&self, subject_id: &str) -> AuthResult<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<Session> = sessions
            .values()
            .filter(|s| s.subject_id == subject_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        Ok(found)
    }

    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}

fn mark_revoked(session: &mut Session, reason: RevocationReason, at: OffsetDateTime) -> bool {
    if session.status == SessionStatus::Revoked {
        return false;
    }
    session.status = SessionStatus::Revoked;
    session.revoked_at = Some(at);
    session.revocation_reason = Some(reason.to_string());
    true
}

// ============================================================================
// Refresh tokens
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStorage {
    records: RwLock<HashMap<String, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTokenStorage for InMemoryRefreshTokenStorage {
    async fn create(&self, record: &RefreshTokenRecord) -> AuthResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.jti) {
            return Err(AuthError::storage("refresh token record already exists"));
        }
        records.insert(record.jti.clone(), record.clone());
        Ok(())
    }

    async fn find_by_jti(&self, jti: &str) -> AuthResult<Option<RefreshTokenRecord>> {
        Ok(self.records.read().await.get(jti).cloned())
    }

    async fn compare_and_consume(
        &self,
        jti: &str,
        expected_version: i64,
        consumed_at: OffsetDateTime,
        successor: &RefreshTokenRecord,
    ) -> AuthResult<ConsumeOutcome> {
        let mut records = self.records.write().await;
        if records.contains_key(&successor.jti) {
            return Err(AuthError::storage("successor refresh token record already exists"));
        }

        let Some(record) = records.get_mut(jti) else {
            return Ok(ConsumeOutcome::Conflict);
        };
        if record.status != RefreshTokenStatus::Valid || record.version != expected_version {
            return Ok(ConsumeOutcome::Conflict);
        }

        record.status = RefreshTokenStatus::Consumed;
        record.consumed_at = Some(consumed_at);
        record.version += 1;
        records.insert(successor.jti.clone(), successor.clone());
        Ok(ConsumeOutcome::Consumed)
    }

    async fn revoke_family(&self, session_id: Uuid) -> AuthResult<u64> {
        let mut records = self.records.write().await;
        let mut revoked = 0;
        for record in records.values_mut().filter(|r| r.session_id == session_id) {
            if record.status == RefreshTokenStatus::Valid {
                revoked += 1;
            }
            if record.status != RefreshTokenStatus::Revoked {
                record.status = RefreshTokenStatus::Revoked;
                record.version += 1;
            }
        }
        Ok(revoked)
    }

    async fn list_by_session(&self, session_id: Uuid) -> AuthResult<Vec<RefreshTokenRecord>> {
        let records = self.records.read().await;
        let mut chain: Vec<RefreshTokenRecord> = records
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        chain.sort_by_key(|r| r.issued_at);
        Ok(chain)
    }

    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        Ok((before - records.len()) as u64)
    }
}

// ============================================================================
// Revocations
// ============================================================================

#[derive(Debug, Default)]
struct RevocationTable {
    entries: HashMap<RevocationTarget, RevocationEntry>,
    version: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryRevocationStorage {
    table: RwLock<RevocationTable>,
}

impl InMemoryRevocationStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStorage for InMemoryRevocationStorage {
    async fn record(&self, entry: &RevocationEntry) -> AuthResult<bool> {
        let mut table = self.table.write().await;
        let replace = match (table.entries.get(&entry.target), &entry.target) {
            (None, _) => true,
            (Some(_), RevocationTarget::Session(_)) => false,
            (Some(existing), RevocationTarget::Subject(_)) => entry.revoked_at > existing.revoked_at,
        };
        if replace {
            table.entries.insert(entry.target.clone(), entry.clone());
            table.version += 1;
        }
        Ok(replace)
    }

    async fn find(&self, target: &RevocationTarget) -> AuthResult<Option<RevocationEntry>> {
        Ok(self.table.read().await.entries.get(target).cloned())
    }

    async fn feed(&self, now: OffsetDateTime) -> AuthResult<RevocationFeed> {
        let table = self.table.read().await;
        let mut entries: Vec<RevocationEntry> = table
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.revoked_at);
        Ok(RevocationFeed {
            version: table.version,
            generated_at: Some(now),
            entries,
        })
    }

    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let mut table = self.table.write().await;
        let before = table.entries.len();
        table.entries.retain(|_, e| !e.is_expired(now));
        Ok((before - table.entries.len()) as u64)
    }
}
