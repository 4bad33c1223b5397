//! Revocation entry storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::{RevocationEntry, RevocationFeed, RevocationTarget};

/// Storage trait for revocation entries.
///
/// Entries are keyed by target. Edge verifiers read them through
/// [`RevocationStorage::feed`].
#[async_trait]
pub trait RevocationStorage: Send + Sync {
    /// Records a revocation.
    ///
    /// # Idempotence
    ///
    /// A session target is recorded once; later entries for it are ignored.
    /// A subject target is replaced by an entry with a later `revoked_at`
    /// (a new "sign out everywhere"). Recording the same entry twice leaves
    /// the store unchanged.
    ///
    /// # Returns
    ///
    /// Returns `true` if the store changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn record(&self, entry: &RevocationEntry) -> AuthResult<bool>;

    /// Finds the entry for a target.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, target: &RevocationTarget) -> AuthResult<Option<RevocationEntry>>;

    /// Returns every entry that has not yet expired at `now`, with a version
    /// that changes whenever an entry is recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn feed(&self, now: OffsetDateTime) -> AuthResult<RevocationFeed>;

    /// Deletes entries whose `expires_at` is before `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
