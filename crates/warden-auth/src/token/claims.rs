//! Access token claim set.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::types::Session;

/// Claims carried by an access token.
///
/// Access tokens are never persisted. They are bound to a session through
/// `sid` and to its refresh lineage through `fam`, but remain verifiable by
/// signature and expiry alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Issuer.
    pub iss: String,

    /// Subject.
    pub sub: String,

    /// Audience.
    pub aud: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Not before (Unix timestamp).
    pub nbf: i64,

    /// Unique token identifier.
    pub jti: String,

    /// Tenant.
    pub tid: String,

    /// Organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,

    /// Roles.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Session the token is bound to.
    pub sid: Uuid,

    /// Refresh family the token was minted from.
    pub fam: Uuid,
}

impl AccessClaims {
    /// Builds the claims for a token bound to `session`.
    #[must_use]
    pub fn for_session(
        session: &Session,
        issuer: &str,
        audience: &str,
        now: OffsetDateTime,
        lifetime: Duration,
    ) -> Self {
        let iat = now.unix_timestamp();
        Self {
            iss: issuer.to_string(),
            sub: session.subject_id.clone(),
            aud: audience.to_string(),
            exp: (now + lifetime).unix_timestamp(),
            iat,
            nbf: iat,
            jti: Uuid::new_v4().to_string(),
            tid: session.tenant_id.clone(),
            oid: session.organization_id.clone(),
            roles: session.roles.clone(),
            sid: session.session_id,
            fam: session.current_refresh_family,
        }
    }

    /// Returns the expiry as an instant.
    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.exp).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Returns seconds until expiry, saturating at zero.
    #[must_use]
    pub fn expires_in(&self, now: OffsetDateTime) -> u64 {
        u64::try_from(self.exp - now.unix_timestamp()).unwrap_or(0)
    }

    /// Returns `true` if the subject holds `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
