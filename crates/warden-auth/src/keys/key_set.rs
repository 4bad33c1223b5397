//! The published verification key set.
//!
//! A [`VerificationKeySet`] is an immutable, versioned snapshot. The key
//! manager publishes a new snapshot on every key state change; verifiers
//! only ever read whole snapshots.

use std::collections::HashMap;
use std::fmt;

use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::signing_key::SigningAlgorithm;
use crate::error::AuthError;

/// JSON Web Key (RFC 7517) carrying public components only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use ("sig" for signing).
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm pinned to this key.
    pub alg: String,

    /// RSA modulus (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// A public key ready for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    algorithm: SigningAlgorithm,
    decoding_key: DecodingKey,
    jwk: Jwk,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Builds a verification key from a JWK.
    ///
    /// # Errors
    /// Returns an error if the algorithm is unsupported, the key type does not
    /// match it, or the components are missing or malformed.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, AuthError> {
        let algorithm: SigningAlgorithm = jwk.alg.parse()?;
        let decoding_key = match (algorithm.is_rsa(), jwk.kty.as_str()) {
            (true, "RSA") => {
                let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
                    return Err(AuthError::invalid_request(format!(
                        "RSA key {} is missing n or e",
                        jwk.kid
                    )));
                };
                DecodingKey::from_rsa_components(n, e)
            }
            (false, "EC") => {
                if jwk.crv.as_deref() != Some("P-384") {
                    return Err(AuthError::invalid_request(format!(
                        "EC key {} must use curve P-384",
                        jwk.kid
                    )));
                }
                let (Some(x), Some(y)) = (&jwk.x, &jwk.y) else {
                    return Err(AuthError::invalid_request(format!(
                        "EC key {} is missing x or y",
                        jwk.kid
                    )));
                };
                DecodingKey::from_ec_components(x, y)
            }
            (_, kty) => {
                return Err(AuthError::invalid_request(format!(
                    "key {} has type {kty} which does not match algorithm {algorithm}",
                    jwk.kid
                )));
            }
        }
        .map_err(|e| AuthError::invalid_request(format!("invalid key {}: {e}", jwk.kid)))?;

        Ok(Self {
            kid: jwk.kid.clone(),
            algorithm,
            decoding_key,
            jwk: jwk.clone(),
        })
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The only algorithm tokens signed by this key may declare.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    #[must_use]
    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }
}

/// Versioned, read-only set of verification keys.
#[derive(Debug, Clone)]
pub struct VerificationKeySet {
    version: u64,
    generated_at: OffsetDateTime,
    keys: HashMap<String, VerificationKey>,
}

impl VerificationKeySet {
    /// Creates a set from already-built keys.
    #[must_use]
    pub fn new(
        version: u64,
        generated_at: OffsetDateTime,
        keys: impl IntoIterator<Item = VerificationKey>,
    ) -> Self {
        Self {
            version,
            generated_at,
            keys: keys.into_iter().map(|k| (k.kid.clone(), k)).collect(),
        }
    }

    /// An empty set with version 0.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(0, OffsetDateTime::UNIX_EPOCH, Vec::new())
    }

    /// Looks up a key by id.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.get(kid)
    }

    #[must_use]
    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn generated_at(&self) -> OffsetDateTime {
        self.generated_at
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the key ids, sorted.
    #[must_use]
    pub fn kids(&self) -> Vec<String> {
        let mut kids: Vec<String> = self.keys.keys().cloned().collect();
        kids.sort();
        kids
    }

    /// Produces the cacheable key-set document.
    #[must_use]
    pub fn to_document(&self) -> KeySetDocument {
        let mut keys: Vec<Jwk> = self.keys.values().map(|k| k.jwk.clone()).collect();
        keys.sort_by(|a, b| a.kid.cmp(&b.kid));
        KeySetDocument {
            version: self.version,
            generated_at: self.generated_at,
            keys,
        }
    }

    /// Rebuilds a set from a fetched document.
    ///
    /// # Errors
    /// Returns an error if any key in the document is unusable.
    pub fn from_document(document: &KeySetDocument) -> Result<Self, AuthError> {
        let keys = document
            .keys
            .iter()
            .map(VerificationKey::from_jwk)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(document.version, document.generated_at, keys))
    }
}

/// Wire form of the verification key set (a JWKS with version metadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySetDocument {
    pub version: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub keys: Vec<Jwk>,
}

impl KeySetDocument {
    /// Entity tag derived from the version.
    #[must_use]
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SigningKey;

    fn key(alg: SigningAlgorithm) -> SigningKey {
        SigningKey::generate(alg, OffsetDateTime::now_utc()).unwrap()
    }

    #[test]
    fn test_verification_key_from_ec_jwk() {
        let signing = key(SigningAlgorithm::ES384);
        let vk = VerificationKey::from_jwk(&signing.to_jwk()).unwrap();
        assert_eq!(vk.kid(), signing.kid());
        assert_eq!(vk.algorithm(), SigningAlgorithm::ES384);
    }

    #[test]
    fn test_verification_key_from_rsa_jwk() {
        let signing = key(SigningAlgorithm::RS384);
        let vk = VerificationKey::from_jwk(&signing.to_jwk()).unwrap();
        assert_eq!(vk.algorithm(), SigningAlgorithm::RS384);
    }

    #[test]
    fn test_mismatched_kty_rejected() {
        let mut jwk = key(SigningAlgorithm::ES384).to_jwk();
        jwk.alg = "RS256".to_string();
        assert!(VerificationKey::from_jwk(&jwk).is_err());
    }

    #[test]
    fn test_unsupported_alg_rejected() {
        let mut jwk = key(SigningAlgorithm::ES384).to_jwk();
        jwk.alg = "HS256".to_string();
        assert!(VerificationKey::from_jwk(&jwk).is_err());
    }

    #[test]
    fn test_document_round_trip() {
        let a = key(SigningAlgorithm::ES384);
        let b = key(SigningAlgorithm::ES384);
        let set = VerificationKeySet::new(
            7,
            OffsetDateTime::now_utc(),
            [
                VerificationKey::from_jwk(&a.to_jwk()).unwrap(),
                VerificationKey::from_jwk(&b.to_jwk()).unwrap(),
            ],
        );

        let doc = set.to_document();
        assert_eq!(doc.version, 7);
        assert_eq!(doc.keys.len(), 2);
        assert_eq!(doc.etag(), "\"7\"");

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["keys"][0]["use"], "sig");

        let rebuilt = VerificationKeySet::from_document(&doc).unwrap();
        assert_eq!(rebuilt.version(), 7);
        assert!(rebuilt.contains(a.kid()));
        assert!(rebuilt.contains(b.kid()));
    }

    #[test]
    fn test_empty_set() {
        let set = VerificationKeySet::empty();
        assert!(set.is_empty());
        assert_eq!(set.version(), 0);
        assert!(set.get("missing").is_none());
    }
}
