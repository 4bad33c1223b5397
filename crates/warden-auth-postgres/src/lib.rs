//! PostgreSQL storage backend for warden-auth
//!
//! Provides persistent storage for:
//!
//! - Sessions (`warden_session`)
//! - Refresh token lineage (`warden_refresh_token`)
//! - Revocation entries and the feed version (`warden_revocation`)
//!
//! Refresh token consumption is a conditional `UPDATE` on `(status, version)`
//! inside the same transaction that inserts the successor, so concurrent
//! replicas racing on one token see exactly one winner.
//!
//! # Example
//!
//! ```ignore
//! use warden_auth::Authority;
//! use warden_auth_postgres::PostgresAuthStorage;
//!
//! let storage = PostgresAuthStorage::connect("postgres://localhost/warden", 10).await?;
//! storage.migrate().await?;
//!
//! let authority = Authority::builder(config)
//!     .storage(storage.backends())
//!     .build()?;
//! ```

pub mod refresh_token;
pub mod revocation;
pub mod schema;
pub mod session;

use std::sync::Arc;

use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;
use warden_auth::AuthError;
use warden_auth::authority::StorageBackends;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use refresh_token::PostgresRefreshTokenStorage;
pub use revocation::PostgresRevocationStorage;
pub use session::PostgresSessionStorage;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Row already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be mapped back to a domain type.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl StorageError {
    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a `CorruptRow` error.
    #[must_use]
    pub fn corrupt_row(message: impl Into<String>) -> Self {
        Self::CorruptRow(message.into())
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns `true` if the database could not be reached at all, as opposed
    /// to rejecting a statement.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Database(
                sqlx_core::Error::Io(_)
                    | sqlx_core::Error::PoolTimedOut
                    | sqlx_core::Error::PoolClosed
                    | sqlx_core::Error::Tls(_)
            )
        )
    }
}

/// Maps a unique-constraint violation to `Conflict`, everything else to
/// `Database`.
pub(crate) fn map_insert_error(e: sqlx_core::Error, what: &str) -> StorageError {
    if let sqlx_core::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StorageError::conflict(format!("{what} already exists"));
    }
    StorageError::Database(e)
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        if err.is_connectivity() {
            AuthError::store_unavailable(err.to_string())
        } else {
            AuthError::storage(err.to_string())
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// PostgreSQL Auth Storage
// =============================================================================

/// PostgreSQL storage backend for sessions, refresh lineage and revocations.
#[derive(Debug, Clone)]
pub struct PostgresAuthStorage {
    pool: Arc<PgPool>,
}

impl PostgresAuthStorage {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates tables, indexes and the revocation sequence if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        schema::ensure_schema(&self.pool).await
    }

    // -------------------------------------------------------------------------
    // Storage Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn sessions(&self) -> PostgresSessionStorage {
        PostgresSessionStorage::new(Arc::clone(&self.pool))
    }

    #[must_use]
    pub fn refresh_tokens(&self) -> PostgresRefreshTokenStorage {
        PostgresRefreshTokenStorage::new(Arc::clone(&self.pool))
    }

    #[must_use]
    pub fn revocations(&self) -> PostgresRevocationStorage {
        PostgresRevocationStorage::new(Arc::clone(&self.pool))
    }

    /// Bundles all three stores for [`warden_auth::Authority::builder`].
    #[must_use]
    pub fn backends(&self) -> StorageBackends {
        StorageBackends {
            sessions: Arc::new(self.sessions()),
            refresh_tokens: Arc::new(self.refresh_tokens()),
            revocations: Arc::new(self.revocations()),
        }
    }
}
