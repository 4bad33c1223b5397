//! Authorization hook consulted after a token has been verified.
//!
//! The authority does not evaluate policy itself. Deployments plug in an
//! [`AccessAuthorizer`] that answers allow or deny for
//! `(principal, resource, action)`.

use async_trait::async_trait;

use crate::verifier::AuthenticatedPrincipal;

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny { reason: String },
}

impl AccessDecision {
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Pure allow/deny function over a verified principal.
#[async_trait]
pub trait AccessAuthorizer: Send + Sync {
    async fn authorize(
        &self,
        principal: &AuthenticatedPrincipal,
        resource: &str,
        action: &str,
    ) -> AccessDecision;
}

/// Grants access when the principal holds a required role.
///
/// Resources not listed are allowed.
#[derive(Debug, Default, Clone)]
pub struct RoleAuthorizer {
    rules: Vec<(String, String, String)>,
}

impl RoleAuthorizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `role` for `action` on `resource`. `*` matches any action.
    #[must_use]
    pub fn require(
        mut self,
        resource: impl Into<String>,
        action: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        self.rules.push((resource.into(), action.into(), role.into()));
        self
    }
}

#[async_trait]
impl AccessAuthorizer for RoleAuthorizer {
    async fn authorize(
        &self,
        principal: &AuthenticatedPrincipal,
        resource: &str,
        action: &str,
    ) -> AccessDecision {
        let required: Vec<&str> = self
            .rules
            .iter()
            .filter(|(r, a, _)| r == resource && (a == action || a == "*"))
            .map(|(_, _, role)| role.as_str())
            .collect();

        if required.is_empty() || required.iter().any(|role| principal.claims.has_role(role)) {
            AccessDecision::Allow
        } else {
            AccessDecision::deny(format!(
                "{action} on {resource} requires one of: {}",
                required.join(", ")
            ))
        }
    }
}
