//! Edge-side caches of the key set and the revocation feed.
//!
//! An edge verifier never talks to the session store on the request path.
//! It verifies signatures against a cached [`VerificationKeySet`] and checks
//! revocation against a cached [`RevocationSnapshot`]. Both are swapped
//! atomically when refreshed, so readers never block on a refresh.
//!
//! While the feed is reachable, a revocation becomes visible at the edge
//! within `revocation_refresh_interval` plus the authority's
//! `feed_cache_ttl`. When the feed cannot be fetched the last snapshot keeps
//! being served until it is older than `max_revocation_staleness`. After
//! that every edge verification fails with `StoreUnavailable` until a fetch
//! succeeds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::VerificationKeys;
use crate::AuthResult;
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::keys::{KeyManager, VerificationKeySet};
use crate::revocation::RevocationCoordinator;
use crate::token::AccessClaims;
use crate::types::{RevocationFeed, RevocationTarget};

/// Minimum spacing between key set fetches forced by an unknown `kid`.
const FORCED_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Source of the published verification key set.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    async fn fetch_key_set(&self) -> AuthResult<Arc<VerificationKeySet>>;
}

/// Source of the published revocation feed.
#[async_trait]
pub trait RevocationFeedSource: Send + Sync {
    async fn fetch_feed(&self) -> AuthResult<Arc<RevocationFeed>>;
}

#[async_trait]
impl KeySetSource for KeyManager {
    async fn fetch_key_set(&self) -> AuthResult<Arc<VerificationKeySet>> {
        Ok(self.verification_set())
    }
}

#[async_trait]
impl RevocationFeedSource for RevocationCoordinator {
    async fn fetch_feed(&self) -> AuthResult<Arc<RevocationFeed>> {
        self.feed().await
    }
}

/// Revocation feed indexed for lookups on the request path.
#[derive(Debug, Clone)]
pub struct RevocationSnapshot {
    version: u64,
    sessions: HashSet<Uuid>,
    /// Subject to the latest revocation instant (Unix seconds).
    subjects: HashMap<String, i64>,
    fetched_at: OffsetDateTime,
}

impl RevocationSnapshot {
    #[must_use]
    pub fn from_feed(feed: &RevocationFeed, fetched_at: OffsetDateTime) -> Self {
        let mut sessions = HashSet::new();
        let mut subjects: HashMap<String, i64> = HashMap::new();
        for entry in &feed.entries {
            match &entry.target {
                RevocationTarget::Session(id) => {
                    sessions.insert(*id);
                }
                RevocationTarget::Subject(id) => {
                    let at = entry.revoked_at.unix_timestamp();
                    subjects
                        .entry(id.clone())
                        .and_modify(|t| *t = (*t).max(at))
                        .or_insert(at);
                }
            }
        }
        Self {
            version: feed.version,
            sessions,
            subjects,
            fetched_at,
        }
    }

    /// Returns `true` if a token with these claims has been revoked.
    #[must_use]
    pub fn is_revoked(&self, claims: &AccessClaims) -> bool {
        self.sessions.contains(&claims.sid)
            || self
                .subjects
                .get(&claims.sub)
                .is_some_and(|revoked_at| claims.iat <= *revoked_at)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn fetched_at(&self) -> OffsetDateTime {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.sessions.len() + self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Edge cache refresh intervals.
#[derive(Debug, Clone)]
pub struct EdgeCacheConfig {
    pub key_set_refresh_interval: Duration,
    pub revocation_refresh_interval: Duration,
    /// Oldest snapshot verification may rely on.
    pub max_revocation_staleness: Duration,
}

impl EdgeCacheConfig {
    #[must_use]
    pub fn from_auth_config(config: &AuthConfig) -> Self {
        Self {
            key_set_refresh_interval: config.edge.key_set_refresh_interval,
            revocation_refresh_interval: config.edge.revocation_refresh_interval,
            max_revocation_staleness: config.max_revocation_staleness(),
        }
    }
}

struct CachedKeySet {
    keys: Arc<VerificationKeySet>,
    fetched_at: OffsetDateTime,
}

/// Atomically swapped snapshots of the key set and revocation feed.
pub struct EdgeCache {
    key_source: Arc<dyn KeySetSource>,
    feed_source: Arc<dyn RevocationFeedSource>,
    clock: Arc<dyn Clock>,
    config: EdgeCacheConfig,
    keys: ArcSwapOption<CachedKeySet>,
    revocations: ArcSwapOption<RevocationSnapshot>,
    refresh_lock: Mutex<()>,
}

impl EdgeCache {
    #[must_use]
    pub fn new(
        key_source: Arc<dyn KeySetSource>,
        feed_source: Arc<dyn RevocationFeedSource>,
        clock: Arc<dyn Clock>,
        config: EdgeCacheConfig,
    ) -> Self {
        Self {
            key_source,
            feed_source,
            clock,
            config,
            keys: ArcSwapOption::empty(),
            revocations: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns the cached key set, if one was ever loaded.
    pub fn key_set(&self) -> Option<Arc<VerificationKeySet>> {
        self.keys.load_full().map(|cached| cached.keys.clone())
    }

    /// Returns the cached revocation snapshot, if one was ever loaded.
    pub fn revocations(&self) -> Option<Arc<RevocationSnapshot>> {
        self.revocations.load_full()
    }

    fn keys_stale(&self, now: OffsetDateTime) -> bool {
        self.keys.load_full().is_none_or(|cached| {
            now >= cached.fetched_at + self.config.key_set_refresh_interval
        })
    }

    fn revocations_stale(&self, now: OffsetDateTime) -> bool {
        self.revocations.load_full().is_none_or(|snapshot| {
            now >= snapshot.fetched_at + self.config.revocation_refresh_interval
        })
    }

    /// Refreshes whichever snapshot is older than its interval.
    ///
    /// A failed refresh keeps serving the previous snapshot as long as the
    /// revocation snapshot is within `max_revocation_staleness`.
    ///
    /// # Errors
    /// Returns the source's error if a snapshot has never been loaded and the
    /// fetch fails, or `StoreUnavailable` if the revocation snapshot is too
    /// old to rely on.
    pub async fn ensure_fresh(&self) -> AuthResult<()> {
        let now = self.clock.now();
        if self.keys_stale(now) || self.revocations_stale(now) {
            self.refresh_stale().await?;
        }
        self.check_revocation_age(self.clock.now())
    }

    fn check_revocation_age(&self, now: OffsetDateTime) -> AuthResult<()> {
        let snapshot = self
            .revocations
            .load_full()
            .ok_or_else(|| AuthError::store_unavailable("revocation feed not loaded"))?;
        let age = Duration::try_from(now - snapshot.fetched_at).unwrap_or_default();
        if age > self.config.max_revocation_staleness {
            tracing::warn!(
                age = ?age,
                max = ?self.config.max_revocation_staleness,
                version = snapshot.version,
                "Revocation snapshot too old; rejecting edge verification"
            );
            return Err(AuthError::store_unavailable(format!(
                "revocation feed is {}s old",
                age.as_secs()
            )));
        }
        Ok(())
    }

    async fn refresh_stale(&self) -> AuthResult<()> {
        let _guard = self.refresh_lock.lock().await;
        let now = self.clock.now();

        if self.keys_stale(now)
            && let Err(e) = self.load_keys(now).await
        {
            if self.keys.load().is_none() {
                return Err(e);
            }
            tracing::warn!(error = %e, "Key set refresh failed; serving cached key set");
        }

        if self.revocations_stale(now)
            && let Err(e) = self.load_revocations(now).await
        {
            if self.revocations.load().is_none() {
                return Err(e);
            }
            tracing::warn!(
                error = %e,
                "Revocation feed refresh failed; serving cached feed"
            );
        }
        Ok(())
    }

    /// Fetches the key set now, unless it was fetched very recently.
    ///
    /// Used when a token names a `kid` the cached set does not contain.
    /// Returns `true` if a new set was loaded.
    pub async fn refresh_keys_for_unknown_kid(&self) -> bool {
        let _guard = self.refresh_lock.lock().await;
        let now = self.clock.now();
        let recent = self
            .keys
            .load_full()
            .is_some_and(|cached| now < cached.fetched_at + FORCED_KEY_REFRESH_INTERVAL);
        if recent {
            return false;
        }
        match self.load_keys(now).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Forced key set refresh failed");
                false
            }
        }
    }

    /// Fetches both snapshots unconditionally.
    ///
    /// # Errors
    /// Returns the first fetch error.
    pub async fn refresh(&self) -> AuthResult<()> {
        let _guard = self.refresh_lock.lock().await;
        let now = self.clock.now();
        self.load_keys(now).await?;
        self.load_revocations(now).await
    }

    /// Drops both snapshots. The next verification must refetch.
    pub fn invalidate(&self) {
        self.keys.store(None);
        self.revocations.store(None);
    }

    async fn load_keys(&self, now: OffsetDateTime) -> AuthResult<()> {
        let keys = self.key_source.fetch_key_set().await?;
        tracing::debug!(version = keys.version(), keys = keys.len(), "Loaded key set");
        self.keys.store(Some(Arc::new(CachedKeySet {
            keys,
            fetched_at: now,
        })));
        Ok(())
    }

    async fn load_revocations(&self, now: OffsetDateTime) -> AuthResult<()> {
        let feed = self.feed_source.fetch_feed().await?;
        let snapshot = RevocationSnapshot::from_feed(&feed, now);

        let previous = self.revocations.load_full().map(|s| s.version);
        if previous != Some(snapshot.version) {
            tracing::info!(
                version = snapshot.version,
                entries = snapshot.len(),
                "Loaded revocation feed"
            );
        }
        self.revocations.store(Some(Arc::new(snapshot)));
        Ok(())
    }

    /// Spawns a task that keeps both snapshots fresh in the background.
    ///
    /// Abort the returned handle to stop it.
    pub fn spawn_refresh_task(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = cache
            .config
            .revocation_refresh_interval
            .min(cache.config.key_set_refresh_interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = cache.ensure_fresh().await {
                    tracing::warn!(error = %e, "Background edge cache refresh failed");
                }
            }
        })
    }
}

impl VerificationKeys for EdgeCache {
    fn current(&self) -> Arc<VerificationKeySet> {
        self.key_set()
            .unwrap_or_else(|| Arc::new(VerificationKeySet::empty()))
    }
}
