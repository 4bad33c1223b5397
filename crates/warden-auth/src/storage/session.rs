//! Session storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::{RevocationReason, Session};

/// Storage trait for sessions.
///
/// Sessions expire by TTL (`expires_at`) and can be revoked explicitly at
/// any time independent of their TTL.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Stores a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session already exists or storage fails.
    async fn create(&self, session: &Session) -> AuthResult<()>;

    /// Finds a session by id.
    ///
    /// # Returns
    ///
    /// Returns the session regardless of its status; callers use
    /// [`Session::is_active`] to decide whether it may be honoured.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, session_id: Uuid) -> AuthResult<Option<Session>>;

    /// Updates `last_seen_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails. Touching a missing
    /// session is not an error.
    async fn touch(&self, session_id: Uuid, at: OffsetDateTime) -> AuthResult<()>;

    /// Marks a session revoked.
    ///
    /// # Returns
    ///
    /// Returns `true` if the session transitioned to revoked, `false` if it
    /// was already revoked or does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke(
        &self,
        session_id: Uuid,
        reason: RevocationReason,
        at: OffsetDateTime,
    ) -> AuthResult<bool>;

    /// Marks every active session of a subject revoked.
    ///
    /// # Returns
    ///
    /// The ids of the sessions that transitioned.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_by_subject(
        &self,
        subject_id: &str,
        reason: RevocationReason,
        at: OffsetDateTime,
    ) -> AuthResult<Vec<Uuid>>;

    /// Lists every stored session of a subject.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_by_subject(&self, subject_id: &str) -> AuthResult<Vec<Session>>;

    /// Deletes sessions whose `expires_at` is before `now`.
    ///
    /// # Returns
    ///
    /// The number of sessions deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
