//! Session and token authority configuration.
//!
//! All durations are written in humantime notation (`"15m"`, `"30d"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::keys::SigningAlgorithm;

/// Root configuration for the authority.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// issuer = "https://auth.example.com"
/// audience = "https://api.example.com"
///
/// [auth.tokens]
/// access_token_lifetime = "15m"
/// refresh_token_lifetime = "30d"
///
/// [auth.store]
/// timeout = "250ms"
/// failure_policy = "fail_closed"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Value of the `iss` claim. Verification requires an exact match.
    pub issuer: String,

    /// Value of the `aud` claim. Verification requires an exact match.
    pub audience: String,

    /// Token and session lifetimes.
    pub tokens: TokenLifetimeConfig,

    /// Signing key configuration.
    pub signing: SigningConfig,

    /// Session store access configuration.
    pub store: StoreConfig,

    /// Edge verification configuration.
    pub edge: EdgeConfig,

    /// Audit event delivery.
    pub audit: AuditConfig,

    /// Background maintenance.
    pub maintenance: MaintenanceConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            audience: "http://localhost:8080".to_string(),
            tokens: TokenLifetimeConfig::default(),
            signing: SigningConfig::default(),
            store: StoreConfig::default(),
            edge: EdgeConfig::default(),
            audit: AuditConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

/// Token and session lifetimes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenLifetimeConfig {
    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Lifetime of a refresh family. Rotation does not extend it.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Session lifetime.
    #[serde(with = "humantime_serde")]
    pub session_lifetime: Duration,

    /// Tolerance applied to `exp` and `nbf` checks.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for TokenLifetimeConfig {
    fn default() -> Self {
        Self {
            access_token_lifetime: Duration::from_secs(15 * 60), // 15 minutes
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600), // 30 days
            session_lifetime: Duration::from_secs(30 * 24 * 3600), // 30 days
            clock_skew: Duration::from_secs(60),
        }
    }
}

/// Signing key configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm for new keys.
    /// Supported: "RS256", "RS384", "ES384"
    pub algorithm: String,

    /// Delay between publishing a "next" key and promoting it to active.
    /// Defaults to twice the access token lifetime.
    #[serde(default, with = "humantime_serde")]
    pub propagation_delay: Option<Duration>,

    /// `Cache-Control` max-age of the published key set.
    /// Must be shorter than the propagation delay.
    #[serde(with = "humantime_serde")]
    pub key_set_max_age: Duration,

    /// Start a rotation automatically once the active key is this old.
    #[serde(default, with = "humantime_serde")]
    pub rotation_interval: Option<Duration>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "ES384".to_string(),
            propagation_delay: None,
            key_set_max_age: Duration::from_secs(300), // 5 minutes
            rotation_interval: None,
        }
    }
}

/// Failure policy applied when the session store cannot be reached during
/// authoritative verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Reject the token with `StoreUnavailable`.
    #[default]
    FailClosed,
    /// Accept the token on signature and claims alone.
    FailOpen,
}

/// Session store access configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Timeout applied to every session store call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Behaviour of authoritative verification when the store is unavailable.
    pub failure_policy: StoreFailurePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(250),
            failure_policy: StoreFailurePolicy::FailClosed,
        }
    }
}

/// Edge verification configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// How often the edge reloads the revocation feed. Together with
    /// `feed_cache_ttl` this bounds how long a revoked token may still pass
    /// edge verification while the feed is reachable.
    #[serde(with = "humantime_serde")]
    pub revocation_refresh_interval: Duration,

    /// Oldest revocation snapshot the edge will verify against when the feed
    /// cannot be fetched. Past this age edge verification fails with
    /// `StoreUnavailable`.
    ///
    /// Defaults to twice `revocation_refresh_interval`.
    #[serde(default, with = "humantime_serde")]
    pub max_revocation_staleness: Option<Duration>,

    /// How often the edge reloads the verification key set.
    #[serde(with = "humantime_serde")]
    pub key_set_refresh_interval: Duration,

    /// Timeout for fetching remote documents.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// How long the authority reuses a generated revocation feed.
    #[serde(with = "humantime_serde")]
    pub feed_cache_ttl: Duration,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            revocation_refresh_interval: Duration::from_secs(30),
            max_revocation_staleness: None,
            key_set_refresh_interval: Duration::from_secs(300), // 5 minutes
            fetch_timeout: Duration::from_secs(5),
            feed_cache_ttl: Duration::from_secs(1),
        }
    }
}

/// Audit event delivery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Emit audit events.
    pub enabled: bool,

    /// Per-event delivery timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Background maintenance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Interval for key promotion/purge and pruning of expired records.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Returns the effective propagation delay for key rotation.
    #[must_use]
    pub fn propagation_delay(&self) -> Duration {
        self.signing
            .propagation_delay
            .unwrap_or(self.tokens.access_token_lifetime * 2)
    }

    /// Returns the effective bound on revocation snapshot age at the edge.
    #[must_use]
    pub fn max_revocation_staleness(&self) -> Duration {
        self.edge
            .max_revocation_staleness
            .unwrap_or(self.edge.revocation_refresh_interval * 2)
    }

    /// Returns the configured signing algorithm.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unsupported algorithms.
    pub fn signing_algorithm(&self) -> Result<SigningAlgorithm, ConfigError> {
        self.signing.algorithm.parse().map_err(|_| {
            ConfigError::InvalidValue(format!(
                "Invalid signing algorithm: '{}'. Must be RS256, RS384, or ES384",
                self.signing.algorithm
            ))
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The issuer or audience is empty
    /// - A lifetime is zero
    /// - The signing algorithm is not supported
    /// - The key set cache lifetime is not shorter than the rotation overlap
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Missing("issuer cannot be empty".to_string()));
        }
        if self.audience.is_empty() {
            return Err(ConfigError::Missing("audience cannot be empty".to_string()));
        }

        let lifetimes = [
            ("access_token_lifetime", self.tokens.access_token_lifetime),
            ("refresh_token_lifetime", self.tokens.refresh_token_lifetime),
            ("session_lifetime", self.tokens.session_lifetime),
            ("store.timeout", self.store.timeout),
            (
                "edge.revocation_refresh_interval",
                self.edge.revocation_refresh_interval,
            ),
            ("maintenance.interval", self.maintenance.interval),
        ];
        for (name, value) in lifetimes {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        self.signing_algorithm()?;

        if self.signing.key_set_max_age >= self.propagation_delay() {
            return Err(ConfigError::InvalidValue(format!(
                "signing.key_set_max_age ({}s) must be shorter than the propagation delay ({}s)",
                self.signing.key_set_max_age.as_secs(),
                self.propagation_delay().as_secs()
            )));
        }

        if self.max_revocation_staleness() < self.edge.revocation_refresh_interval {
            return Err(ConfigError::InvalidValue(
                "edge.max_revocation_staleness must not be shorter than edge.revocation_refresh_interval"
                    .to_string(),
            ));
        }

        if let Some(interval) = self.signing.rotation_interval
            && interval <= self.propagation_delay()
        {
            return Err(ConfigError::InvalidValue(
                "signing.rotation_interval must be longer than the propagation delay".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.tokens.access_token_lifetime, Duration::from_secs(900));
        assert_eq!(config.tokens.clock_skew, Duration::from_secs(60));
        assert_eq!(config.signing.algorithm, "ES384");
        assert_eq!(config.store.failure_policy, StoreFailurePolicy::FailClosed);
        assert_eq!(config.propagation_delay(), Duration::from_secs(1800));
    }

    #[test]
    fn test_default_config_validates() {
        assert!(AuthConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_issuer_fails_validation() {
        let mut config = AuthConfig::default();
        config.issuer = String::new();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
        assert!(err.to_string().contains("issuer"));
    }

    #[test]
    fn test_invalid_algorithm_fails_validation() {
        let mut config = AuthConfig::default();
        config.signing.algorithm = "HS256".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
        assert!(err.to_string().contains("signing algorithm"));
    }

    #[test]
    fn test_valid_algorithms() {
        for alg in ["RS256", "RS384", "ES384"] {
            let mut config = AuthConfig::default();
            config.signing.algorithm = alg.to_string();
            assert!(config.validate().is_ok(), "{alg} should be accepted");
        }
    }

    #[test]
    fn test_key_set_max_age_must_be_shorter_than_overlap() {
        let mut config = AuthConfig::default();
        config.signing.propagation_delay = Some(Duration::from_secs(120));
        config.signing.key_set_max_age = Duration::from_secs(300);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("key_set_max_age"));
    }

    #[test]
    fn test_revocation_staleness_bound() {
        let mut config = AuthConfig::default();
        assert_eq!(config.max_revocation_staleness(), Duration::from_secs(60));

        config.edge.max_revocation_staleness = Some(Duration::from_secs(10));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_revocation_staleness"));
    }

    #[test]
    fn test_zero_lifetime_fails_validation() {
        let mut config = AuthConfig::default();
        config.tokens.access_token_lifetime = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("access_token_lifetime"));
    }

    #[test]
    fn test_humantime_deserialization() {
        let json = r#"{
            "issuer": "https://auth.example.com",
            "audience": "api",
            "tokens": { "access_token_lifetime": "5m", "clock_skew": "30s" },
            "signing": { "algorithm": "RS256", "propagation_delay": "20m" },
            "store": { "timeout": "100ms", "failure_policy": "fail_open" }
        }"#;
        let config: AuthConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tokens.access_token_lifetime, Duration::from_secs(300));
        assert_eq!(config.tokens.clock_skew, Duration::from_secs(30));
        assert_eq!(
            config.tokens.refresh_token_lifetime,
            Duration::from_secs(30 * 24 * 3600)
        );
        assert_eq!(config.propagation_delay(), Duration::from_secs(1200));
        assert_eq!(config.store.timeout, Duration::from_millis(100));
        assert_eq!(config.store.failure_policy, StoreFailurePolicy::FailOpen);
        assert!(config.validate().is_ok());
    }
}
