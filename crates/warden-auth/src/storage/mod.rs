//! Storage traits for sessions, refresh lineage and revocations.
//!
//! # Implementations
//!
//! - [`memory`] - in-process backend for single-node deployments and tests
//! - `warden-auth-postgres` - PostgreSQL backend for multi-replica deployments

pub mod memory;
pub mod refresh_token;
pub mod revocation;
pub mod session;

pub use memory::{InMemoryRefreshTokenStorage, InMemoryRevocationStorage, InMemorySessionStorage};
pub use refresh_token::{ConsumeOutcome, RefreshTokenStorage};
pub use revocation::RevocationStorage;
pub use session::SessionStorage;
