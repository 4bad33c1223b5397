//! Refresh token lineage storage trait.
//!
//! # Security Considerations
//!
//! - Records are keyed by the SHA-256 digest of the token, never plaintext
//! - Consuming a record must be linearizable: a compare-and-swap on
//!   `(status = valid, version)`, never read-then-write
//! - Family revocation must be atomic and immediate

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::RefreshTokenRecord;

/// Result of a compare-and-swap consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// This caller moved the record from valid to consumed and the successor
    /// was stored.
    Consumed,
    /// The record was no longer valid at `expected_version`; another caller
    /// got there first, or the family was revoked.
    Conflict,
}

/// Storage trait for refresh token records.
#[async_trait]
pub trait RefreshTokenStorage: Send + Sync {
    /// Stores a new record (a family root).
    ///
    /// # Errors
    ///
    /// Returns an error if a record with the same jti exists or storage fails.
    async fn create(&self, record: &RefreshTokenRecord) -> AuthResult<()>;

    /// Finds a record by jti (token digest).
    ///
    /// # Returns
    ///
    /// Returns the record regardless of status or expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_jti(&self, jti: &str) -> AuthResult<Option<RefreshTokenRecord>>;

    /// Atomically consumes a record and stores its successor.
    ///
    /// # Atomicity
    ///
    /// The record transitions valid -> consumed (stamping `consumed_at` and
    /// bumping `version`) only if it is still valid at `expected_version`.
    /// The successor is stored in the same atomic step. Of N concurrent calls
    /// for the same jti and version, exactly one returns
    /// [`ConsumeOutcome::Consumed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn compare_and_consume(
        &self,
        jti: &str,
        expected_version: i64,
        consumed_at: OffsetDateTime,
        successor: &RefreshTokenRecord,
    ) -> AuthResult<ConsumeOutcome>;

    /// Marks every record of a session revoked.
    ///
    /// # Returns
    ///
    /// The number of records that were still valid and are now revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_family(&self, session_id: Uuid) -> AuthResult<u64>;

    /// Lists the chain of a session ordered by issue time.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_by_session(&self, session_id: Uuid) -> AuthResult<Vec<RefreshTokenRecord>>;

    /// Deletes records whose `expires_at` is before `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
