//! Signing key material, the published verification key set and the key
//! lifecycle manager.
//!
//! Private material lives only inside [`SigningKey`] values owned by the
//! [`KeyManager`]. Everything handed to verifiers is a [`VerificationKeySet`]
//! built from public JWK components.

pub mod key_set;
pub mod manager;
pub mod signing_key;

pub use key_set::{Jwk, KeySetDocument, VerificationKey, VerificationKeySet};
pub use manager::{KeyManager, KeyManagerConfig};
pub use signing_key::{KeyMetadata, KeyStatus, SigningAlgorithm, SigningKey};
