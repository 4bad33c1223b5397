//! Axum handlers for the authority's HTTP surface.
//!
//! # Available Handlers
//!
//! - [`jwks_handler`] - published verification keys
//! - [`verify_handler`] - edge verification contract
//! - [`refresh_handler`] - refresh token rotation
//! - [`mint_handler`] - session minting for identity collaborators
//! - [`revoke_session_handler`], [`revoke_all_handler`] - revocation
//! - [`revocation_feed_handler`] - revocation feed for edge verifiers
//! - [`list_keys_handler`], [`rotate_key_handler`], [`retire_key_handler`],
//!   [`compromise_key_handler`] - key administration
//!
//! Routing is left to the binary.

pub mod error;
pub mod jwks;
pub mod keys;
pub mod refresh;
pub mod revocations;
pub mod sessions;
pub mod verify;

use std::sync::Arc;
use std::time::Duration;

pub use jwks::jwks_handler;
pub use keys::{compromise_key_handler, list_keys_handler, retire_key_handler, rotate_key_handler};
pub use refresh::refresh_handler;
pub use revocations::revocation_feed_handler;
pub use sessions::{mint_handler, revoke_all_handler, revoke_session_handler};
pub use verify::verify_handler;

use crate::issuer::TokenIssuer;
use crate::keys::KeyManager;
use crate::revocation::RevocationCoordinator;
use crate::rotation::RefreshRotationEngine;
use crate::verifier::Verifier;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AuthorityState {
    pub keys: Arc<KeyManager>,
    pub issuer: Arc<TokenIssuer>,
    pub rotation: Arc<RefreshRotationEngine>,
    pub revocations: Arc<RevocationCoordinator>,
    /// Authoritative verifier.
    pub verifier: Arc<Verifier>,
    /// Edge verifier, when the process also serves edge-mode checks.
    pub edge_verifier: Option<Arc<Verifier>>,
    /// `Cache-Control: max-age` of the key set document.
    pub key_set_max_age: Duration,
}
