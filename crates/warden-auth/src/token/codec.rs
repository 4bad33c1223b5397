//! Signed token codec.
//!
//! Tokens use the standard `header.payload.signature` structure. The header
//! carries `alg` and `kid`; the payload carries [`AccessClaims`].
//!
//! Verification runs in a fixed order:
//!
//! 1. structural well-formedness of the header
//! 2. key lookup by `kid` in the supplied [`VerificationKeySet`]
//! 3. header `alg` must equal the algorithm pinned to that key
//! 4. signature
//! 5. `exp` / `nbf` against the clock with bounded skew
//! 6. exact `iss` and `aud` match

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Header, Validation, decode, decode_header, encode};

use super::claims::AccessClaims;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::keys::{SigningAlgorithm, SigningKey, VerificationKeySet};

// ============================================================================
// Error Types
// ============================================================================

/// Errors produced by the codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed token: {message}")]
    Malformed { message: String },

    #[error("Token header has no key id")]
    MissingKeyId,

    #[error("Key not found: {kid}")]
    UnknownKey { kid: String },

    #[error("Algorithm mismatch: key requires {expected}, token declares {found}")]
    AlgorithmMismatch { expected: String, found: String },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Token not yet valid")]
    NotYetValid,

    #[error("Issuer mismatch")]
    IssuerMismatch,

    #[error("Audience mismatch")]
    AudienceMismatch,

    #[error("Failed to encode token: {message}")]
    Encoding { message: String },
}

impl CodecError {
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for CodecError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::InvalidSignature,
            ErrorKind::InvalidAlgorithm => Self::AlgorithmMismatch {
                expected: "pinned key algorithm".to_string(),
                found: "other".to_string(),
            },
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidIssuer => Self::IssuerMismatch,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            _ => Self::malformed(err.to_string()),
        }
    }
}

impl From<CodecError> for AuthError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Malformed { message } => AuthError::malformed_token(message),
            CodecError::MissingKeyId => AuthError::unknown_key(""),
            CodecError::UnknownKey { kid } => AuthError::unknown_key(kid),
            e @ (CodecError::AlgorithmMismatch { .. } | CodecError::InvalidSignature) => {
                AuthError::invalid_signature(e.to_string())
            }
            CodecError::Expired => AuthError::ExpiredToken,
            e @ (CodecError::NotYetValid
            | CodecError::IssuerMismatch
            | CodecError::AudienceMismatch) => AuthError::claim_mismatch(e.to_string()),
            CodecError::Encoding { message } => AuthError::internal(message),
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Signs and verifies access tokens.
///
/// The codec holds no key material of its own; signing keys are supplied by
/// the key manager and verification keys by a published key set.
#[derive(Clone)]
pub struct TokenCodec {
    issuer: String,
    audience: String,
    clock_skew: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        clock_skew: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            clock_skew,
            clock,
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    /// Signs `claims` with `key`, setting `alg` and `kid` in the header.
    ///
    /// # Errors
    /// Returns `CodecError::Encoding` if signing fails.
    pub fn sign(&self, claims: &AccessClaims, key: &SigningKey) -> Result<String, CodecError> {
        let mut header = Header::new(key.algorithm().to_jwt_algorithm());
        header.kid = Some(key.kid().to_string());

        encode(&header, claims, key.encoding_key()).map_err(|e| CodecError::Encoding {
            message: e.to_string(),
        })
    }

    /// Verifies `token` against `keys` and returns its claims.
    ///
    /// # Errors
    /// Returns a typed `CodecError` for the first check that fails.
    pub fn verify(&self, token: &str, keys: &VerificationKeySet) -> Result<AccessClaims, CodecError> {
        if token.split('.').count() != 3 {
            return Err(CodecError::malformed("expected three dot-separated segments"));
        }

        let header = decode_header(token).map_err(|e| CodecError::malformed(e.to_string()))?;
        let kid = header.kid.ok_or(CodecError::MissingKeyId)?;
        let key = keys
            .get(&kid)
            .ok_or_else(|| CodecError::UnknownKey { kid: kid.clone() })?;

        if SigningAlgorithm::from_jwt_algorithm(header.alg) != Some(key.algorithm()) {
            return Err(CodecError::AlgorithmMismatch {
                expected: key.algorithm().to_string(),
                found: format!("{:?}", header.alg),
            });
        }

        // Time and audience checks are done below against our own clock.
        let mut validation = Validation::new(key.algorithm().to_jwt_algorithm());
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = decode::<AccessClaims>(token, key.decoding_key(), &validation)
            .map_err(CodecError::from)?
            .claims;

        let now = self.clock.now().unix_timestamp();
        let skew = i64::try_from(self.clock_skew.as_secs()).unwrap_or(i64::MAX);
        if now >= claims.exp.saturating_add(skew) {
            return Err(CodecError::Expired);
        }
        if now.saturating_add(skew) < claims.nbf {
            return Err(CodecError::NotYetValid);
        }

        if claims.iss != self.issuer {
            return Err(CodecError::IssuerMismatch);
        }
        if claims.aud != self.audience {
            return Err(CodecError::AudienceMismatch);
        }

        Ok(claims)
    }
}
