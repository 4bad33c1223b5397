//! Signing keys and their algorithms.
//!
//! ## Supported Algorithms
//!
//! - **RS256**: RSA with SHA-256 (widely compatible)
//! - **RS384**: RSA with SHA-384
//! - **ES384**: ECDSA with P-384 curve (smaller keys, fast generation)

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::EncodePrivateKey as EcEncodePrivateKey;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::LineEnding;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::key_set::Jwk;
use crate::error::AuthError;

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms. The algorithm is pinned per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSA with SHA-256.
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA with P-384 curve.
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the jsonwebtoken `Algorithm` type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Maps a jsonwebtoken `Algorithm` back, if supported.
    #[must_use]
    pub fn from_jwt_algorithm(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::RS256 => Some(Self::RS256),
            Algorithm::RS384 => Some(Self::RS384),
            Algorithm::ES384 => Some(Self::ES384),
            _ => None,
        }
    }

    /// Returns the algorithm name as used in JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "ES384" => Ok(Self::ES384),
            other => Err(AuthError::configuration(format!(
                "unsupported signing algorithm '{other}'"
            ))),
        }
    }
}

// ============================================================================
// Key status and metadata
// ============================================================================

/// Lifecycle state of a signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Generated, not yet published.
    Pending,
    /// Published alongside the active key, awaiting promotion.
    Next,
    /// Signs every new token. Exactly one per manager.
    Active,
    /// No longer signs; verifiable until `not_after`, then purged.
    Retired,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Next => "next",
            Self::Active => "active",
            Self::Retired => "retired",
        };
        f.write_str(s)
    }
}

/// Public view of a managed key. Carries no private material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub kid: String,
    pub algorithm: SigningAlgorithm,
    pub status: KeyStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub not_before: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub not_after: Option<OffsetDateTime>,
}

// ============================================================================
// Signing Key
// ============================================================================

/// A signing key pair.
///
/// The private half is held as a jsonwebtoken [`EncodingKey`] and is only
/// reachable from inside the crate.
pub struct SigningKey {
    kid: String,
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    public_jwk: Jwk,
    created_at: OffsetDateTime,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generates a new key for `algorithm` with a random key id.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate(algorithm: SigningAlgorithm, created_at: OffsetDateTime) -> Result<Self, AuthError> {
        let kid = uuid::Uuid::new_v4().to_string();
        if algorithm.is_rsa() {
            Self::generate_rsa(kid, algorithm, created_at)
        } else {
            Self::generate_ec(kid, created_at)
        }
    }

    fn generate_rsa(
        kid: String,
        algorithm: SigningAlgorithm,
        created_at: OffsetDateTime,
    ) -> Result<Self, AuthError> {
        let bits = 2048;
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| AuthError::internal(format!("RSA key generation failed: {e}")))?;

        let public_key = private_key.to_public_key();
        let n = public_key.n().to_bytes_be();
        let e = public_key.e().to_bytes_be();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::internal(format!("RSA key export failed: {e}")))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::internal(format!("RSA encoding key rejected: {e}")))?;

        let public_jwk = Jwk {
            kty: "RSA".to_string(),
            kid: kid.clone(),
            use_: "sig".to_string(),
            alg: algorithm.as_str().to_string(),
            n: Some(URL_SAFE_NO_PAD.encode(n)),
            e: Some(URL_SAFE_NO_PAD.encode(e)),
            crv: None,
            x: None,
            y: None,
        };

        Ok(Self {
            kid,
            algorithm,
            encoding_key,
            public_jwk,
            created_at,
        })
    }

    fn generate_ec(kid: String, created_at: OffsetDateTime) -> Result<Self, AuthError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let signing_key = EcSigningKey::from(&secret_key);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| AuthError::internal("EC key generation produced no x coordinate"))?;
        let y = point
            .y()
            .ok_or_else(|| AuthError::internal("EC key generation produced no y coordinate"))?;

        // jsonwebtoken wants PKCS8 PEM for EC signing keys
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::internal(format!("EC key export failed: {e}")))?;

        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::internal(format!("EC encoding key rejected: {e}")))?;

        let public_jwk = Jwk {
            kty: "EC".to_string(),
            kid: kid.clone(),
            use_: "sig".to_string(),
            alg: SigningAlgorithm::ES384.as_str().to_string(),
            n: None,
            e: None,
            crv: Some("P-384".to_string()),
            x: Some(URL_SAFE_NO_PAD.encode(x.as_slice())),
            y: Some(URL_SAFE_NO_PAD.encode(y.as_slice())),
        };

        Ok(Self {
            kid,
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            public_jwk,
            created_at,
        })
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Exports the public half as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        self.public_jwk.clone()
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ec_key() {
        let key = SigningKey::generate(SigningAlgorithm::ES384, OffsetDateTime::now_utc()).unwrap();
        let jwk = key.to_jwk();

        assert_eq!(key.algorithm(), SigningAlgorithm::ES384);
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.kid, key.kid());
        assert_eq!(jwk.crv.as_deref(), Some("P-384"));
        assert!(jwk.x.is_some() && jwk.y.is_some());
        assert!(jwk.n.is_none());
    }

    #[test]
    fn test_generate_rsa_key() {
        let key = SigningKey::generate(SigningAlgorithm::RS256, OffsetDateTime::now_utc()).unwrap();
        let jwk = key.to_jwk();

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.alg, "RS256");
        assert!(jwk.n.is_some() && jwk.e.is_some());
        assert!(jwk.crv.is_none());
    }

    #[test]
    fn test_kids_are_unique() {
        let now = OffsetDateTime::now_utc();
        let a = SigningKey::generate(SigningAlgorithm::ES384, now).unwrap();
        let b = SigningKey::generate(SigningAlgorithm::ES384, now).unwrap();
        assert_ne!(a.kid(), b.kid());
    }

    #[test]
    fn test_debug_hides_private_material() {
        let key = SigningKey::generate(SigningAlgorithm::ES384, OffsetDateTime::now_utc()).unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains(key.kid()));
        assert!(!debug.contains("encoding_key"));
    }

    #[test]
    fn test_signing_algorithm_properties() {
        assert!(SigningAlgorithm::RS256.is_rsa());
        assert!(SigningAlgorithm::RS384.is_rsa());
        assert!(!SigningAlgorithm::ES384.is_rsa());
        assert_eq!(SigningAlgorithm::ES384.to_string(), "ES384");
        assert_eq!("RS384".parse::<SigningAlgorithm>().unwrap(), SigningAlgorithm::RS384);
        assert!("HS256".parse::<SigningAlgorithm>().is_err());
        assert_eq!(
            SigningAlgorithm::from_jwt_algorithm(Algorithm::HS256),
            None
        );
    }
}
