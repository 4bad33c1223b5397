//! Session domain type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::Principal;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Revoked,
    Expired,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// An authenticated session.
///
/// Created by the token issuer, touched by the rotation engine and revoked
/// by the revocation coordinator. Each session owns exactly one refresh
/// family, identified by `current_refresh_family`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub subject_id: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub status: SessionStatus,
    pub current_refresh_family: Uuid,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub revoked_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
}

impl Session {
    /// Creates a new active session for `principal`.
    #[must_use]
    pub fn new(principal: &Principal, now: OffsetDateTime, lifetime: std::time::Duration) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            subject_id: principal.subject_id.clone(),
            tenant_id: principal.tenant_id.clone(),
            organization_id: principal.organization_id.clone(),
            roles: principal.roles.clone(),
            device_fingerprint: principal.device_fingerprint.clone(),
            created_at: now,
            last_seen_at: now,
            expires_at: now + lifetime,
            status: SessionStatus::Active,
            current_refresh_family: Uuid::new_v4(),
            revoked_at: None,
            revocation_reason: None,
        }
    }

    /// Returns `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the session has been explicitly revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.status == SessionStatus::Revoked
    }

    /// Returns the status taking expiry into account.
    #[must_use]
    pub fn effective_status(&self, now: OffsetDateTime) -> SessionStatus {
        match self.status {
            SessionStatus::Active if self.is_expired(now) => SessionStatus::Expired,
            status => status,
        }
    }

    /// Returns `true` if tokens bound to this session may still be honoured.
    #[must_use]
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        self.effective_status(now) == SessionStatus::Active
    }

    /// Rebuilds the principal the session was created for.
    #[must_use]
    pub fn principal(&self) -> Principal {
        Principal {
            subject_id: self.subject_id.clone(),
            tenant_id: self.tenant_id.clone(),
            organization_id: self.organization_id.clone(),
            roles: self.roles.clone(),
            device_fingerprint: self.device_fingerprint.clone(),
        }
    }
}
