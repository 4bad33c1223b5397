//! # warden-auth
//!
//! Session and token authority for a multi-tenant identity platform.
//!
//! This crate provides:
//! - Signing key lifecycle with zero-downtime rotation and emergency revocation
//! - Signed access tokens bound to a session and refresh lineage
//! - Single-use refresh tokens with replay detection
//! - Authoritative and edge verification
//! - Session revocation with a bounded edge staleness window
//! - Audit events for security-relevant transitions
//!
//! ## Modules
//!
//! - [`config`] - Authority configuration
//! - [`keys`] - Signing keys and the published verification key set
//! - [`token`] - Access token claims and the token codec
//! - [`session`] - Session store
//! - [`issuer`] - Session minting
//! - [`rotation`] - Refresh rotation engine
//! - [`verifier`] - Token verification (authoritative and edge)
//! - [`revocation`] - Revocation coordinator and feed
//! - [`storage`] - Storage traits and the in-memory backend
//! - [`audit`] - Audit event delivery
//! - [`authz`] - Authorization hook
//! - [`http`] - Axum HTTP handlers
//! - [`authority`] - Wiring of every component

pub mod audit;
pub mod authority;
pub mod authz;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod issuer;
pub mod keys;
pub mod revocation;
pub mod rotation;
pub mod session;
pub mod storage;
pub mod token;
pub mod types;
pub mod verifier;

pub use authority::{Authority, AuthorityBuilder, MaintenanceReport, StorageBackends};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthConfig, ConfigError, StoreFailurePolicy};
pub use error::{AuthError, ErrorCategory, ErrorKind, RecoveryAction};
pub use http::AuthorityState;
pub use issuer::{MintedSession, TokenIssuer, TokenPair};
pub use keys::{KeyManager, KeyMetadata, KeyStatus, SigningAlgorithm, VerificationKeySet};
pub use revocation::RevocationCoordinator;
pub use rotation::RefreshRotationEngine;
pub use session::SessionStore;
pub use token::{AccessClaims, TokenCodec};
pub use types::{Principal, RevocationReason, Session};
pub use verifier::{AuthenticatedPrincipal, VerificationMode, VerificationResponse, Verifier};

/// Type alias for authority results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use warden_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::authority::{Authority, StorageBackends};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{AuthConfig, StoreFailurePolicy};
    pub use crate::error::{AuthError, ErrorKind, RecoveryAction};
    pub use crate::issuer::{MintedSession, TokenPair};
    pub use crate::storage::{RefreshTokenStorage, RevocationStorage, SessionStorage};
    pub use crate::types::{Principal, RevocationReason, Session};
    pub use crate::verifier::{AuthenticatedPrincipal, VerificationMode, Verifier};
}
