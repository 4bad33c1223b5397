//! The authenticated subject handed to the issuer by credential, MFA and
//! federation collaborators.

use serde::{Deserialize, Serialize};

/// An authenticated security principal.
///
/// Collaborators construct this once identity has been established and pass
/// it to [`TokenIssuer::mint`](crate::issuer::TokenIssuer::mint). They never
/// construct tokens themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Subject identifier (`sub`).
    pub subject_id: String,

    /// Tenant identifier (`tid`).
    pub tenant_id: String,

    /// Optional organization identifier (`oid`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Roles granted to the subject.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Fingerprint of the device the session was established from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
}

impl Principal {
    /// Creates a principal with no organization, roles or device.
    #[must_use]
    pub fn new(subject_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            tenant_id: tenant_id.into(),
            organization_id: None,
            roles: Vec::new(),
            device_fingerprint: None,
        }
    }

    /// Sets the organization.
    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Sets the roles.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the device fingerprint.
    #[must_use]
    pub fn with_device(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    /// Checks that the identifiers are present.
    pub fn validate(&self) -> Result<(), String> {
        if self.subject_id.trim().is_empty() {
            return Err("subject_id cannot be empty".to_string());
        }
        if self.tenant_id.trim().is_empty() {
            return Err("tenant_id cannot be empty".to_string());
        }
        Ok(())
    }
}
