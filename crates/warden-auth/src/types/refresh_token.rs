//! Refresh token lineage records.
//!
//! # Security
//!
//! - Refresh tokens are opaque random values handed to the client once
//! - Only the SHA-256 digest is persisted; it doubles as the record's `jti`
//! - Records of one session form a chain linked through `parent_jti`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Status of a refresh token record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTokenStatus {
    /// May be exchanged exactly once.
    Valid,
    /// Already exchanged for a successor.
    Consumed,
    /// Invalidated by revocation of its session.
    Revoked,
}

impl RefreshTokenStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Consumed => "consumed",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for RefreshTokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshTokenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Self::Valid),
            "consumed" => Ok(Self::Consumed),
            "revoked" => Ok(Self::Revoked),
            other => Err(format!("unknown refresh token status '{other}'")),
        }
    }
}

/// One link of a session's refresh family.
///
/// At most one record per family is `Valid` at any time. Consuming a record
/// is a compare-and-swap on `version`; the storage backend creates the
/// successor in the same atomic step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// SHA-256 hex digest of the refresh token value.
    pub jti: String,

    /// Session this record belongs to.
    pub session_id: Uuid,

    /// Refresh family identifier (the session's `current_refresh_family`).
    pub family_id: Uuid,

    /// Predecessor in the chain; `None` for the family root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_jti: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// Expiry of the whole family; successors inherit it.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub consumed_at: Option<OffsetDateTime>,

    pub status: RefreshTokenStatus,

    /// Optimistic concurrency version, bumped on every status change.
    pub version: i64,
}

impl RefreshTokenRecord {
    /// Creates the root record of a new family.
    #[must_use]
    pub fn root(
        jti: String,
        session_id: Uuid,
        family_id: Uuid,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            jti,
            session_id,
            family_id,
            parent_jti: None,
            issued_at,
            expires_at,
            consumed_at: None,
            status: RefreshTokenStatus::Valid,
            version: 0,
        }
    }

    /// Creates the successor of this record. The family expiry is inherited.
    #[must_use]
    pub fn successor(&self, jti: String, issued_at: OffsetDateTime) -> Self {
        Self {
            jti,
            session_id: self.session_id,
            family_id: self.family_id,
            parent_jti: Some(self.jti.clone()),
            issued_at,
            expires_at: self.expires_at,
            consumed_at: None,
            status: RefreshTokenStatus::Valid,
            version: 0,
        }
    }

    /// Returns `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if this is the family root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_jti.is_none()
    }

    /// Hash a token value using SHA-256.
    ///
    /// Used when storing new tokens and when looking tokens up.
    #[must_use]
    pub fn hash_token(token: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generate a cryptographically secure random token.
    ///
    /// Returns a 256-bit random value encoded as base64url (43 characters).
    #[must_use]
    pub fn generate_token() -> String {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn root_record(now: OffsetDateTime) -> RefreshTokenRecord {
        RefreshTokenRecord::root(
            RefreshTokenRecord::hash_token("root"),
            Uuid::new_v4(),
            Uuid::new_v4(),
            now,
            now + Duration::from_secs(3600),
        )
    }

    #[test]
    fn test_hash_token() {
        let hash = RefreshTokenRecord::hash_token("test-token-value");

        // SHA-256 produces 64 hex characters
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, RefreshTokenRecord::hash_token("test-token-value"));
        assert_ne!(hash, RefreshTokenRecord::hash_token("different-token"));
    }

    #[test]
    fn test_generate_token() {
        let token = RefreshTokenRecord::generate_token();

        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_generate_token_uniqueness() {
        let mut tokens: Vec<String> = (0..100)
            .map(|_| RefreshTokenRecord::generate_token())
            .collect();
        tokens.sort();
        tokens.dedup();
        assert_eq!(tokens.len(), 100);
    }

    #[test]
    fn test_successor_inherits_family_expiry() {
        let now = OffsetDateTime::now_utc();
        let root = root_record(now);
        let later = now + Duration::from_secs(600);
        let next = root.successor(RefreshTokenRecord::hash_token("next"), later);

        assert!(root.is_root());
        assert!(!next.is_root());
        assert_eq!(next.parent_jti.as_deref(), Some(root.jti.as_str()));
        assert_eq!(next.family_id, root.family_id);
        assert_eq!(next.session_id, root.session_id);
        assert_eq!(next.expires_at, root.expires_at);
        assert_eq!(next.issued_at, later);
        assert_eq!(next.status, RefreshTokenStatus::Valid);
    }

    #[test]
    fn test_is_expired() {
        let now = OffsetDateTime::now_utc();
        let record = root_record(now);
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "consumed".parse::<RefreshTokenStatus>().unwrap(),
            RefreshTokenStatus::Consumed
        );
        assert!("spent".parse::<RefreshTokenStatus>().is_err());
    }
}
