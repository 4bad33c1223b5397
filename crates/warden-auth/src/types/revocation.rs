//! Revocation entries and the feed edge verifiers poll.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// What a revocation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RevocationTarget {
    /// A single session and its refresh family.
    Session(Uuid),
    /// Every session of a subject ("sign out everywhere").
    Subject(String),
}

impl RevocationTarget {
    /// Returns the kind as stored by persistent backends.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::Subject(_) => "subject",
        }
    }

    /// Returns the identifier as a string.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Session(id) => id.to_string(),
            Self::Subject(id) => id.clone(),
        }
    }

    /// Rebuilds a target from its stored `(kind, id)` pair.
    pub fn from_parts(kind: &str, id: &str) -> Result<Self, String> {
        match kind {
            "session" => Uuid::parse_str(id)
                .map(Self::Session)
                .map_err(|e| format!("invalid session id '{id}': {e}")),
            "subject" => Ok(Self::Subject(id.to_string())),
            other => Err(format!("unknown revocation target kind '{other}'")),
        }
    }
}

impl fmt::Display for RevocationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Why a revocation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// The user logged out.
    Logout,
    /// An administrator revoked access.
    Admin,
    /// A consumed refresh token was presented again.
    ReuseDetected,
    /// The subject signed out of every session.
    SignOutEverywhere,
    /// Credentials or the device are suspected compromised.
    Compromised,
    /// The session was created but its first tokens could not be issued.
    IssueFailed,
}

impl RevocationReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::Admin => "admin",
            Self::ReuseDetected => "reuse_detected",
            Self::SignOutEverywhere => "sign_out_everywhere",
            Self::Compromised => "compromised",
            Self::IssueFailed => "issue_failed",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logout" => Ok(Self::Logout),
            "admin" => Ok(Self::Admin),
            "reuse_detected" => Ok(Self::ReuseDetected),
            "sign_out_everywhere" => Ok(Self::SignOutEverywhere),
            "compromised" => Ok(Self::Compromised),
            "issue_failed" => Ok(Self::IssueFailed),
            other => Err(format!("unknown revocation reason '{other}'")),
        }
    }
}

/// A recorded revocation.
///
/// Entries are kept only until every access token they could affect has
/// expired on its own; after `expires_at` they are pruned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub target: RevocationTarget,
    pub reason: RevocationReason,
    #[serde(with = "time::serde::rfc3339")]
    pub revoked_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl RevocationEntry {
    /// Returns `true` once the entry no longer needs to be remembered.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if an access token with the given session, subject and
    /// issue time is invalidated by this entry.
    ///
    /// Subject entries only cover tokens issued at or before the revocation.
    #[must_use]
    pub fn covers(&self, session_id: Uuid, subject_id: &str, issued_at: i64) -> bool {
        match &self.target {
            RevocationTarget::Session(id) => *id == session_id,
            RevocationTarget::Subject(id) => {
                id == subject_id && issued_at <= self.revoked_at.unix_timestamp()
            }
        }
    }
}

/// Snapshot of all unexpired revocations, as published to edge verifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevocationFeed {
    /// Monotonic version; changes whenever an entry is recorded.
    pub version: u64,

    #[serde(with = "time::serde::rfc3339::option", default)]
    pub generated_at: Option<OffsetDateTime>,

    pub entries: Vec<RevocationEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(target: RevocationTarget, revoked_at: OffsetDateTime) -> RevocationEntry {
        RevocationEntry {
            target,
            reason: RevocationReason::Logout,
            revoked_at,
            expires_at: revoked_at + Duration::from_secs(960),
        }
    }

    #[test]
    fn test_session_entry_covers_only_its_session() {
        let now = OffsetDateTime::now_utc();
        let sid = Uuid::new_v4();
        let e = entry(RevocationTarget::Session(sid), now);

        assert!(e.covers(sid, "u1", now.unix_timestamp()));
        assert!(!e.covers(Uuid::new_v4(), "u1", now.unix_timestamp()));
    }

    #[test]
    fn test_subject_entry_covers_tokens_issued_before() {
        let now = OffsetDateTime::now_utc();
        let e = entry(RevocationTarget::Subject("u1".to_string()), now);
        let sid = Uuid::new_v4();

        assert!(e.covers(sid, "u1", now.unix_timestamp() - 30));
        assert!(e.covers(sid, "u1", now.unix_timestamp()));
        assert!(!e.covers(sid, "u1", now.unix_timestamp() + 1));
        assert!(!e.covers(sid, "u2", now.unix_timestamp() - 30));
    }

    #[test]
    fn test_entry_expiry() {
        let now = OffsetDateTime::now_utc();
        let e = entry(RevocationTarget::Subject("u1".to_string()), now);
        assert!(!e.is_expired(now));
        assert!(e.is_expired(now + Duration::from_secs(960)));
    }

    #[test]
    fn test_target_wire_form() {
        let target = RevocationTarget::Subject("u1".to_string());
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "subject", "id": "u1"}));

        let sid = Uuid::new_v4();
        let parsed =
            RevocationTarget::from_parts("session", &sid.to_string()).unwrap();
        assert_eq!(parsed, RevocationTarget::Session(sid));
        assert!(RevocationTarget::from_parts("device", "x").is_err());
    }
}
