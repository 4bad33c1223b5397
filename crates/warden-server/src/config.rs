//! Process configuration.
//!
//! Loaded from an optional TOML file overlaid with `WARDEN__`-prefixed
//! environment variables, e.g. `WARDEN__SERVER__LISTEN=0.0.0.0:9000` or
//! `WARDEN__AUTH__TOKENS__ACCESS_TOKEN_LIFETIME=10m`.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_auth::AuthConfig;

pub const DEFAULT_CONFIG_PATH: &str = "warden.toml";

const MIN_INTERNAL_KEY_LEN: usize = 16;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub admin: AdminConfig,
    pub internal: InternalConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// How long in-flight requests may run after a shutdown signal.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub url: Option<String>,
    pub pool_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            url: None,
            pool_size: 10,
        }
    }
}

/// Access control for the `/admin` routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// When `false` the admin routes accept anonymous requests.
    pub require_auth: bool,
    /// Role an access token must carry to manage keys.
    pub role: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            role: "admin".into(),
        }
    }
}

/// Credential for trusted collaborators.
///
/// Minting is only routed when `api_key` is set. Callers present it in the
/// `x-warden-internal-key` header. The same key also authorizes revocation
/// on behalf of any subject.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalConfig {
    pub api_key: Option<String>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.auth.validate().map_err(|e| e.to_string())?;

        if self.storage.backend == StorageBackend::Postgres
            && self.storage.url.as_deref().is_none_or(str::is_empty)
        {
            return Err("storage.url is required for the postgres backend".into());
        }
        if self.storage.pool_size == 0 {
            return Err("storage.pool_size must be greater than zero".into());
        }
        if self.admin.role.trim().is_empty() {
            return Err("admin.role must not be empty".into());
        }
        if let Some(key) = &self.internal.api_key
            && key.len() < MIN_INTERNAL_KEY_LEN
        {
            return Err(format!(
                "internal.api_key must be at least {MIN_INTERNAL_KEY_LEN} characters"
            ));
        }
        Ok(())
    }
}

pub mod loader {
    use super::{AppConfig, DEFAULT_CONFIG_PATH};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));

        let mut builder = Config::builder();
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file {} not found", pathbuf.display()));
        }
        builder = builder.add_source(
            Environment::with_prefix("WARDEN")
                .try_parsing(true)
                .separator("__"),
        );

        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::loader::load_config;
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert!(cfg.admin.require_auth);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
            [server]
            listen = "127.0.0.1:9100"
            shutdown_timeout = "3s"

            [logging]
            level = "debug"
            json = true

            [auth]
            issuer = "https://auth.example.com"
            audience = "api"

            [auth.tokens]
            access_token_lifetime = "10m"

            [auth.edge]
            revocation_refresh_interval = "15s"
            "#,
        );

        let cfg = load_config(file.path().to_str()).unwrap();
        assert_eq!(cfg.server.listen, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(cfg.server.shutdown_timeout, Duration::from_secs(3));
        assert!(cfg.logging.json);
        assert_eq!(cfg.auth.issuer, "https://auth.example.com");
        assert_eq!(cfg.auth.tokens.access_token_lifetime, Duration::from_secs(600));
        assert_eq!(
            cfg.auth.edge.revocation_refresh_interval,
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = load_config(Some("/nonexistent/warden.toml")).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_postgres_requires_url() {
        let file = write_config(
            r#"
            [storage]
            backend = "postgres"
            "#,
        );
        let err = load_config(file.path().to_str()).unwrap_err();
        assert!(err.contains("storage.url"));
    }

    #[test]
    fn test_internal_key_is_optional_but_not_short() {
        let mut cfg = AppConfig::default();
        assert!(cfg.internal.api_key.is_none());

        cfg.internal.api_key = Some("short".into());
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("internal.api_key"));

        cfg.internal.api_key = Some("0123456789abcdef".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_invalid_auth_section_is_rejected() {
        let file = write_config(
            r#"
            [auth]
            issuer = ""
            "#,
        );
        assert!(load_config(file.path().to_str()).is_err());
    }
}
