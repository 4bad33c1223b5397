//! Wiring of every component from one [`AuthConfig`].

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::AuthResult;
use crate::audit::{AuditDispatcher, AuditSink, TracingAuditSink};
use crate::authz::AccessAuthorizer;
use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::http::AuthorityState;
use crate::issuer::{IssuerConfig, TokenIssuer};
use crate::keys::{KeyManager, KeyManagerConfig};
use crate::revocation::{RevocationConfig, RevocationCoordinator};
use crate::rotation::RefreshRotationEngine;
use crate::session::{CleanupReport, SessionStore, SessionStoreConfig};
use crate::storage::{
    InMemoryRefreshTokenStorage, InMemoryRevocationStorage, InMemorySessionStorage,
    RefreshTokenStorage, RevocationStorage, SessionStorage,
};
use crate::token::TokenCodec;
use crate::verifier::{EdgeCache, EdgeCacheConfig, Verifier};

/// The storage backends an authority persists to.
#[derive(Clone)]
pub struct StorageBackends {
    pub sessions: Arc<dyn SessionStorage>,
    pub refresh_tokens: Arc<dyn RefreshTokenStorage>,
    pub revocations: Arc<dyn RevocationStorage>,
}

impl StorageBackends {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(InMemorySessionStorage::new()),
            refresh_tokens: Arc::new(InMemoryRefreshTokenStorage::new()),
            revocations: Arc::new(InMemoryRevocationStorage::new()),
        }
    }
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub rotated: Option<String>,
    pub promoted: Option<String>,
    pub purged: Vec<String>,
    pub cleanup: CleanupReport,
}

/// Builder for [`Authority`].
pub struct AuthorityBuilder {
    config: AuthConfig,
    storage: StorageBackends,
    clock: Arc<dyn Clock>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    authorizer: Option<Arc<dyn AccessAuthorizer>>,
}

impl AuthorityBuilder {
    #[must_use]
    pub fn storage(mut self, storage: StorageBackends) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn authorizer(mut self, authorizer: Arc<dyn AccessAuthorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Validates the configuration and builds every component.
    ///
    /// # Errors
    /// Returns `Configuration` for an invalid config, or `KeyManagement` if
    /// the first signing key cannot be generated.
    pub fn build(self) -> AuthResult<Authority> {
        let Self {
            config,
            storage,
            clock,
            audit_sink,
            authorizer,
        } = self;
        config.validate()?;

        let audit = if config.audit.enabled {
            AuditDispatcher::new(
                audit_sink.unwrap_or_else(|| Arc::new(TracingAuditSink)),
                config.audit.timeout,
            )
        } else {
            AuditDispatcher::disabled()
        };

        let keys = Arc::new(KeyManager::new(
            KeyManagerConfig::from_auth_config(&config)?,
            clock.clone(),
        )?);
        let codec = TokenCodec::new(
            config.issuer.clone(),
            config.audience.clone(),
            config.tokens.clock_skew,
            clock.clone(),
        );
        let store = Arc::new(SessionStore::new(
            storage.sessions,
            storage.refresh_tokens,
            storage.revocations,
            clock.clone(),
            SessionStoreConfig::from_auth_config(&config),
        ));
        let revocations = Arc::new(RevocationCoordinator::new(
            store.clone(),
            audit.clone(),
            clock.clone(),
            RevocationConfig::from_auth_config(&config),
        ));
        let issuer = Arc::new(TokenIssuer::new(
            store.clone(),
            keys.clone(),
            codec.clone(),
            audit,
            clock.clone(),
            IssuerConfig::from_auth_config(&config),
        ));
        let rotation = Arc::new(RefreshRotationEngine::new(
            store.clone(),
            issuer.clone(),
            revocations.clone(),
            clock.clone(),
        ));

        let mut verifier = Verifier::authoritative(
            codec.clone(),
            keys.clone(),
            store.clone(),
            config.store.failure_policy,
        );
        let edge_cache = Arc::new(EdgeCache::new(
            keys.clone(),
            revocations.clone(),
            clock.clone(),
            EdgeCacheConfig::from_auth_config(&config),
        ));
        let mut edge_verifier = Verifier::edge(codec, edge_cache.clone());
        if let Some(authorizer) = authorizer {
            verifier = verifier.with_authorizer(authorizer.clone());
            edge_verifier = edge_verifier.with_authorizer(authorizer);
        }

        tracing::info!(
            issuer = %config.issuer,
            algorithm = %config.signing.algorithm,
            failure_policy = ?config.store.failure_policy,
            "Authority initialised"
        );

        Ok(Authority {
            config,
            clock,
            keys,
            store,
            issuer,
            rotation,
            revocations,
            verifier: Arc::new(verifier),
            edge_cache,
            edge_verifier: Arc::new(edge_verifier),
        })
    }
}

/// Every component of the authority, wired together.
pub struct Authority {
    pub config: AuthConfig,
    pub clock: Arc<dyn Clock>,
    pub keys: Arc<KeyManager>,
    pub store: Arc<SessionStore>,
    pub issuer: Arc<TokenIssuer>,
    pub rotation: Arc<RefreshRotationEngine>,
    pub revocations: Arc<RevocationCoordinator>,
    pub verifier: Arc<Verifier>,
    /// In-process edge cache fed by this authority's own key manager and
    /// revocation feed.
    pub edge_cache: Arc<EdgeCache>,
    pub edge_verifier: Arc<Verifier>,
}

impl Authority {
    /// Starts a builder with in-memory storage, the system clock and the
    /// tracing audit sink.
    #[must_use]
    pub fn builder(config: AuthConfig) -> AuthorityBuilder {
        AuthorityBuilder {
            config,
            storage: StorageBackends::in_memory(),
            clock: Arc::new(SystemClock),
            audit_sink: None,
            authorizer: None,
        }
    }

    /// State for the HTTP handlers.
    #[must_use]
    pub fn http_state(&self) -> AuthorityState {
        AuthorityState {
            keys: self.keys.clone(),
            issuer: self.issuer.clone(),
            rotation: self.rotation.clone(),
            revocations: self.revocations.clone(),
            verifier: self.verifier.clone(),
            edge_verifier: Some(self.edge_verifier.clone()),
            key_set_max_age: self.config.signing.key_set_max_age,
        }
    }

    /// Runs scheduled key rotation, promotion and purge, then prunes expired
    /// records.
    ///
    /// # Errors
    /// Returns the first key management or store error.
    pub async fn run_maintenance(&self) -> AuthResult<MaintenanceReport> {
        let rotated = match self.config.signing.rotation_interval {
            Some(interval) => self.keys.rotate_if_older_than(interval).await?,
            None => None,
        };
        let promoted = self.keys.promote_due().await?;
        let purged = self.keys.purge_expired().await;
        let cleanup = self.store.cleanup_expired().await?;

        Ok(MaintenanceReport {
            rotated: rotated.map(|k| k.kid),
            promoted: promoted.map(|k| k.kid),
            purged,
            cleanup,
        })
    }

    /// Runs [`Self::run_maintenance`] every `maintenance.interval`.
    ///
    /// Abort the returned handle to stop it.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let authority = Arc::clone(self);
        let period = authority.config.maintenance.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match authority.run_maintenance().await {
                    Ok(report) => tracing::debug!(?report, "Maintenance pass complete"),
                    Err(e) => tracing::warn!(error = %e, "Maintenance pass failed"),
                }
            }
        })
    }
}
