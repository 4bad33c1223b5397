use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use warden_auth::authz::RoleAuthorizer;
use warden_auth::http::{
    compromise_key_handler, jwks_handler, list_keys_handler, mint_handler, refresh_handler,
    retire_key_handler, revocation_feed_handler, revoke_all_handler, revoke_session_handler,
    rotate_key_handler, verify_handler,
};
use warden_auth::{Authority, AuthorityState, StorageBackends};
use warden_auth_postgres::PostgresAuthStorage;

use crate::config::{AppConfig, StorageBackend};
use crate::middleware::{
    CallerGuard, KEYS_RESOURCE, REVOKE_ACTION, SESSIONS_RESOURCE, authorize_session_revoke,
    authorize_subject_revoke, request_id, require_admin, require_internal_key,
};

/// Builds the authority with the configured storage backend.
pub async fn build_authority(cfg: &AppConfig) -> anyhow::Result<Arc<Authority>> {
    let storage = match cfg.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; sessions do not survive a restart");
            StorageBackends::in_memory()
        }
        StorageBackend::Postgres => {
            let url = cfg
                .storage
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("storage.url is required for postgres"))?;
            let storage = PostgresAuthStorage::connect(url, cfg.storage.pool_size).await?;
            storage.migrate().await?;
            tracing::info!(pool_size = cfg.storage.pool_size, "PostgreSQL storage ready");
            storage.backends()
        }
    };

    let mut authorizer =
        RoleAuthorizer::new().require(SESSIONS_RESOURCE, REVOKE_ACTION, cfg.admin.role.clone());
    if cfg.admin.require_auth {
        authorizer = authorizer.require(KEYS_RESOURCE, "*", cfg.admin.role.clone());
    }
    let authority = Authority::builder(cfg.auth.clone())
        .storage(storage)
        .authorizer(Arc::new(authorizer))
        .build()?;
    Ok(Arc::new(authority))
}

/// Builds the router.
///
/// Minting is only mounted when `cfg.internal.api_key` is set. Revocation
/// accepts the internal key, a token owned by the target, or a token the
/// authorizer allows to revoke on behalf of others.
pub fn build_app(state: AuthorityState, cfg: &AppConfig) -> Router {
    let guard = CallerGuard::new(state.clone(), cfg.internal.api_key.as_deref());

    let mut admin = Router::new()
        .route("/admin/keys", get(list_keys_handler))
        .route("/admin/keys/rotate", post(rotate_key_handler))
        .route("/admin/keys/{kid}/retire", post(retire_key_handler))
        .route("/admin/keys/{kid}/compromise", post(compromise_key_handler));
    if cfg.admin.require_auth {
        admin = admin.layer(middleware::from_fn_with_state(state.clone(), require_admin));
    } else {
        tracing::warn!("Admin routes accept anonymous requests");
    }

    let revoke_session = Router::new()
        .route("/auth/sessions/{id}/revoke", post(revoke_session_handler))
        .route_layer(middleware::from_fn_with_state(
            guard.clone(),
            authorize_session_revoke,
        ));
    let revoke_subject = Router::new()
        .route("/auth/subjects/{id}/revoke-all", post(revoke_all_handler))
        .route_layer(middleware::from_fn_with_state(
            guard.clone(),
            authorize_subject_revoke,
        ));

    let mut app = Router::new()
        .route("/healthz", get(healthz))
        .route("/.well-known/jwks.json", get(jwks_handler))
        .route("/auth/verify", post(verify_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/revocations", get(revocation_feed_handler))
        .merge(revoke_session)
        .merge(revoke_subject)
        .merge(admin);
    if cfg.internal.api_key.is_some() {
        app = app.merge(
            Router::new()
                .route("/internal/sessions", post(mint_handler))
                .route_layer(middleware::from_fn_with_state(guard, require_internal_key)),
        );
    } else {
        tracing::warn!("internal.api_key is not set; /internal/sessions is disabled");
    }

    app.layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<AuthorityState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_kid": state.keys.active_kid(),
    }))
}

pub struct WardenServer {
    listener: TcpListener,
    app: Router,
    authority: Arc<Authority>,
    shutdown_timeout: Duration,
}

impl WardenServer {
    /// Builds the authority and binds the listener.
    pub async fn bind(cfg: &AppConfig) -> anyhow::Result<Self> {
        let authority = build_authority(cfg).await?;
        let app = build_app(authority.http_state(), cfg);
        let listener = TcpListener::bind(cfg.server.listen).await?;
        Ok(Self {
            listener,
            app,
            authority,
            shutdown_timeout: cfg.server.shutdown_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[must_use]
    pub fn authority(&self) -> &Arc<Authority> {
        &self.authority
    }

    /// Serves until Ctrl+C.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests for
    /// at most the configured shutdown timeout.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let Self {
            listener,
            app,
            authority,
            shutdown_timeout,
        } = self;
        let maintenance = authority.spawn_maintenance();

        let draining = Arc::new(Notify::new());
        let signal = Arc::clone(&draining);
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                signal.notify_one();
            })
            .into_future();

        tracing::info!(%addr, "listening");
        let deadline = async {
            draining.notified().await;
            tokio::time::sleep(shutdown_timeout).await;
        };

        let result = tokio::select! {
            result = serve => result.map_err(anyhow::Error::from),
            () = deadline => {
                tracing::warn!(
                    timeout = ?shutdown_timeout,
                    "In-flight requests did not finish in time; forcing shutdown"
                );
                Ok(())
            }
        };

        maintenance.abort();
        tracing::info!("server stopped");
        result
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
