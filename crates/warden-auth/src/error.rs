//! Error types for the session and token authority.
//!
//! Every failure the authority can report is a typed [`AuthError`]. The
//! variants distinguish "please refresh" ([`AuthError::ExpiredToken`]) from
//! "reject outright" ([`AuthError::InvalidSignature`], [`AuthError::UnknownKey`],
//! [`AuthError::ReuseDetected`]) and from transient infrastructure problems
//! ([`AuthError::StoreUnavailable`]). [`ErrorKind`] is the wire form used by
//! the edge verification contract and [`RecoveryAction`] tells callers what
//! to do next.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur while minting, verifying, rotating or revoking tokens.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token's `exp` (or `nbf`) lies outside the accepted window.
    #[error("Token expired")]
    ExpiredToken,

    /// The token signature does not verify, or the header algorithm does not
    /// match the algorithm pinned to the key.
    #[error("Invalid signature: {message}")]
    InvalidSignature {
        /// Description of the signature failure.
        message: String,
    },

    /// The token references a key id that is not in the verification key set.
    #[error("Unknown signing key: {kid}")]
    UnknownKey {
        /// The key id from the token header (empty when the header has none).
        kid: String,
    },

    /// The `iss` or `aud` claim does not match the expected value.
    #[error("Claim mismatch: {message}")]
    ClaimMismatch {
        /// Description of the mismatching claim.
        message: String,
    },

    /// The token is not a well-formed signed token.
    #[error("Malformed token: {message}")]
    MalformedToken {
        /// Description of the structural problem.
        message: String,
    },

    /// A refresh token that was already exchanged has been presented again.
    /// The whole session has been revoked.
    #[error("Refresh token reuse detected")]
    ReuseDetected,

    /// The refresh token is unknown or past its expiry.
    #[error("Refresh token expired or unknown")]
    RefreshExpired,

    /// The session bound to the token has been revoked.
    #[error("Token revoked")]
    Revoked,

    /// The session store did not answer within its timeout or is unreachable.
    #[error("Session store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the store failure.
        message: String,
    },

    /// The authorization hook denied the request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of why access was denied.
        message: String,
    },

    /// The request is invalid or malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The referenced session or key does not exist.
    #[error("Not found: {message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// A key lifecycle operation conflicts with the current key state.
    #[error("Key management error: {message}")]
    KeyManagement {
        /// Description of the conflict.
        message: String,
    },

    /// An error occurred while storing or retrieving session data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidSignature` error.
    #[must_use]
    pub fn invalid_signature(message: impl Into<String>) -> Self {
        Self::InvalidSignature {
            message: message.into(),
        }
    }

    /// Creates a new `UnknownKey` error.
    #[must_use]
    pub fn unknown_key(kid: impl Into<String>) -> Self {
        Self::UnknownKey { kid: kid.into() }
    }

    /// Creates a new `ClaimMismatch` error.
    #[must_use]
    pub fn claim_mismatch(message: impl Into<String>) -> Self {
        Self::ClaimMismatch {
            message: message.into(),
        }
    }

    /// Creates a new `MalformedToken` error.
    #[must_use]
    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: message.into(),
        }
    }

    /// Creates a new `StoreUnavailable` error.
    #[must_use]
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a new `KeyManagement` error.
    #[must_use]
    pub fn key_management(message: impl Into<String>) -> Self {
        Self::KeyManagement {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error was caused by the caller's input.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ExpiredToken
                | Self::InvalidSignature { .. }
                | Self::UnknownKey { .. }
                | Self::ClaimMismatch { .. }
                | Self::MalformedToken { .. }
                | Self::ReuseDetected
                | Self::RefreshExpired
                | Self::Revoked
                | Self::AccessDenied { .. }
                | Self::InvalidRequest { .. }
                | Self::NotFound { .. }
                | Self::KeyManagement { .. }
        )
    }

    /// Returns `true` if this error originates on the server side.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::Storage { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if this error describes a rejected token.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::ExpiredToken
                | Self::InvalidSignature { .. }
                | Self::UnknownKey { .. }
                | Self::ClaimMismatch { .. }
                | Self::MalformedToken { .. }
                | Self::ReuseDetected
                | Self::RefreshExpired
                | Self::Revoked
        )
    }

    /// Returns `true` if retrying the same operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Returns the category of this error for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ExpiredToken
            | Self::InvalidSignature { .. }
            | Self::UnknownKey { .. }
            | Self::ClaimMismatch { .. }
            | Self::MalformedToken { .. }
            | Self::Revoked => ErrorCategory::Token,
            Self::ReuseDetected | Self::RefreshExpired => ErrorCategory::Session,
            Self::AccessDenied { .. } => ErrorCategory::Authorization,
            Self::InvalidRequest { .. } | Self::NotFound { .. } => ErrorCategory::Validation,
            Self::KeyManagement { .. } => ErrorCategory::KeyManagement,
            Self::StoreUnavailable { .. } | Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the wire-level error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ExpiredToken => ErrorKind::ExpiredToken,
            Self::InvalidSignature { .. } => ErrorKind::InvalidSignature,
            Self::UnknownKey { .. } => ErrorKind::UnknownKey,
            Self::ClaimMismatch { .. } => ErrorKind::ClaimMismatch,
            Self::MalformedToken { .. } => ErrorKind::MalformedToken,
            Self::ReuseDetected => ErrorKind::ReuseDetected,
            Self::RefreshExpired => ErrorKind::RefreshExpired,
            Self::Revoked => ErrorKind::Revoked,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::KeyManagement { .. } => ErrorKind::Conflict,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Returns what the caller should do about this error.
    #[must_use]
    pub fn recovery(&self) -> RecoveryAction {
        self.kind().recovery()
    }
}

impl From<crate::config::ConfigError> for AuthError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

/// Categories of errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Token verification errors.
    Token,
    /// Session and refresh lineage errors.
    Session,
    /// Authorization hook errors.
    Authorization,
    /// Request validation errors.
    Validation,
    /// Signing key lifecycle errors.
    KeyManagement,
    /// Infrastructure errors (storage, network).
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Session => write!(f, "session"),
            Self::Authorization => write!(f, "authorization"),
            Self::Validation => write!(f, "validation"),
            Self::KeyManagement => write!(f, "key_management"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Serializable error kind returned in verification responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ExpiredToken,
    InvalidSignature,
    UnknownKey,
    ClaimMismatch,
    MalformedToken,
    ReuseDetected,
    RefreshExpired,
    Revoked,
    StoreUnavailable,
    AccessDenied,
    InvalidRequest,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorKind {
    /// Returns the snake_case wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpiredToken => "expired_token",
            Self::InvalidSignature => "invalid_signature",
            Self::UnknownKey => "unknown_key",
            Self::ClaimMismatch => "claim_mismatch",
            Self::MalformedToken => "malformed_token",
            Self::ReuseDetected => "reuse_detected",
            Self::RefreshExpired => "refresh_expired",
            Self::Revoked => "revoked",
            Self::StoreUnavailable => "store_unavailable",
            Self::AccessDenied => "access_denied",
            Self::InvalidRequest => "invalid_request",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }

    /// Maps the error kind to the action a client should take.
    #[must_use]
    pub fn recovery(&self) -> RecoveryAction {
        match self {
            Self::ExpiredToken => RecoveryAction::Refresh,
            Self::InvalidSignature
            | Self::UnknownKey
            | Self::ClaimMismatch
            | Self::MalformedToken
            | Self::ReuseDetected
            | Self::RefreshExpired
            | Self::Revoked => RecoveryAction::Reauthenticate,
            Self::StoreUnavailable => RecoveryAction::RetryOrDegrade,
            Self::AccessDenied
            | Self::InvalidRequest
            | Self::NotFound
            | Self::Conflict
            | Self::Internal => RecoveryAction::Reject,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Silently exchange the refresh token for a new pair.
    Refresh,
    /// Force a full re-authentication.
    Reauthenticate,
    /// Retry later, or degrade according to deployment policy.
    RetryOrDegrade,
    /// Reject the request; retrying will not help.
    Reject,
}
