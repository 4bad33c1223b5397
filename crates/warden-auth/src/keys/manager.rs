//! Signing key lifecycle.
//!
//! The [`KeyManager`] owns every private key for one tenant scope and
//! publishes an immutable [`VerificationKeySet`] snapshot whenever a key
//! changes state.
//!
//! Normal rotation:
//!
//! 1. `rotate()` generates a key and publishes it as `next` next to the
//!    still-active key
//! 2. once the propagation delay has passed, `promote_due()` makes it
//!    `active` and demotes the prior key to `retired`
//! 3. the retired key stays in the published set until every token it signed
//!    has expired, after which `purge_expired()` drops it
//!
//! `emergency_revoke()` skips the overlap and removes a key at once.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::key_set::{VerificationKey, VerificationKeySet};
use super::signing_key::{KeyMetadata, KeyStatus, SigningAlgorithm, SigningKey};
use crate::AuthResult;
use crate::clock::Clock;
use crate::config::{AuthConfig, ConfigError};
use crate::error::AuthError;
use crate::token::{AccessClaims, TokenCodec};

/// Key manager settings.
#[derive(Debug, Clone)]
pub struct KeyManagerConfig {
    /// Algorithm for newly generated keys.
    pub algorithm: SigningAlgorithm,
    /// Overlap between publishing a `next` key and promoting it.
    pub propagation_delay: Duration,
    /// How long a retired key stays verifiable. Must cover the access token
    /// lifetime plus clock skew.
    pub retirement_grace: Duration,
}

impl KeyManagerConfig {
    /// Derives the key manager settings from the authority configuration.
    ///
    /// # Errors
    /// Returns an error if the signing algorithm is not supported.
    pub fn from_auth_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            algorithm: config.signing_algorithm()?,
            propagation_delay: config.propagation_delay(),
            retirement_grace: config.tokens.access_token_lifetime + config.tokens.clock_skew,
        })
    }
}

struct ManagedKey {
    key: Arc<SigningKey>,
    verification: VerificationKey,
    status: KeyStatus,
    not_before: Option<OffsetDateTime>,
    not_after: Option<OffsetDateTime>,
}

impl ManagedKey {
    fn new(key: SigningKey, status: KeyStatus) -> AuthResult<Self> {
        let verification = VerificationKey::from_jwk(&key.to_jwk())?;
        Ok(Self {
            key: Arc::new(key),
            verification,
            status,
            not_before: None,
            not_after: None,
        })
    }

    fn kid(&self) -> &str {
        self.key.kid()
    }

    fn is_published(&self) -> bool {
        !matches!(self.status, KeyStatus::Pending)
    }

    fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            kid: self.key.kid().to_string(),
            algorithm: self.key.algorithm(),
            status: self.status,
            created_at: self.key.created_at(),
            not_before: self.not_before,
            not_after: self.not_after,
        }
    }
}

struct KeyRing {
    keys: Vec<ManagedKey>,
    version: u64,
}

impl KeyRing {
    fn position(&self, kid: &str) -> Option<usize> {
        self.keys.iter().position(|k| k.kid() == kid)
    }

    fn successor(&self) -> Option<usize> {
        self.keys
            .iter()
            .position(|k| matches!(k.status, KeyStatus::Next | KeyStatus::Pending))
    }

    fn active(&self) -> Option<&ManagedKey> {
        self.keys.iter().find(|k| k.status == KeyStatus::Active)
    }
}

/// Owner of signing key material for one tenant scope.
pub struct KeyManager {
    config: KeyManagerConfig,
    clock: Arc<dyn Clock>,
    ring: Mutex<KeyRing>,
    active: ArcSwap<SigningKey>,
    published: ArcSwap<VerificationKeySet>,
}

impl KeyManager {
    /// Creates a manager with a freshly generated active key.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn new(config: KeyManagerConfig, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        let now = clock.now();
        let mut initial = ManagedKey::new(
            SigningKey::generate(config.algorithm, now)?,
            KeyStatus::Active,
        )?;
        initial.not_before = Some(now);

        let active = ArcSwap::new(initial.key.clone());
        let mut ring = KeyRing {
            keys: vec![initial],
            version: 0,
        };
        let published = ArcSwap::from_pointee(Self::snapshot(&mut ring, now));
        let manager = Self {
            config,
            clock,
            ring: Mutex::new(ring),
            active,
            published,
        };

        tracing::info!(
            kid = %manager.active_kid(),
            algorithm = %manager.config.algorithm,
            "Key manager initialised"
        );
        Ok(manager)
    }

    /// Returns the currently published verification key set.
    #[must_use]
    pub fn verification_set(&self) -> Arc<VerificationKeySet> {
        self.published.load_full()
    }

    /// Returns the kid of the key that signs new tokens.
    #[must_use]
    pub fn active_kid(&self) -> String {
        self.active.load().kid().to_string()
    }

    /// Returns metadata of the active key.
    ///
    /// # Errors
    /// Returns an internal error if no key is active, which would indicate a
    /// broken invariant.
    pub async fn get_active(&self) -> AuthResult<KeyMetadata> {
        let ring = self.ring.lock().await;
        ring.active()
            .map(ManagedKey::metadata)
            .ok_or_else(|| AuthError::internal("no active signing key"))
    }

    /// Lists metadata of every managed key, oldest first.
    pub async fn keys(&self) -> Vec<KeyMetadata> {
        let ring = self.ring.lock().await;
        let mut keys: Vec<KeyMetadata> = ring.keys.iter().map(ManagedKey::metadata).collect();
        keys.sort_by_key(|k| k.created_at);
        keys
    }

    /// Signs `claims` with the active key.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn sign(&self, codec: &TokenCodec, claims: &AccessClaims) -> AuthResult<String> {
        let key = self.active.load_full();
        codec.sign(claims, &key).map_err(AuthError::from)
    }

    /// Starts a rotation: generates a key and publishes it as `next`.
    ///
    /// # Errors
    /// Returns `KeyManagement` if a rotation is already in progress.
    #[tracing::instrument(skip(self))]
    pub async fn rotate(&self) -> AuthResult<KeyMetadata> {
        let mut ring = self.ring.lock().await;
        self.rotate_locked(&mut ring).await
    }

    /// Starts a rotation if the active key has been active for at least
    /// `interval` and no rotation is in progress.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub async fn rotate_if_older_than(&self, interval: Duration) -> AuthResult<Option<KeyMetadata>> {
        let mut ring = self.ring.lock().await;
        if ring.successor().is_some() {
            return Ok(None);
        }
        let now = self.clock.now();
        let due = ring
            .active()
            .and_then(|k| k.not_before)
            .is_some_and(|since| since + interval <= now);
        if !due {
            return Ok(None);
        }
        self.rotate_locked(&mut ring).await.map(Some)
    }

    async fn rotate_locked(&self, ring: &mut KeyRing) -> AuthResult<KeyMetadata> {
        if let Some(idx) = ring.successor() {
            return Err(AuthError::key_management(format!(
                "rotation already in progress (next key {})",
                ring.keys[idx].kid()
            )));
        }

        let now = self.clock.now();
        let mut next = ManagedKey::new(self.generate(now).await?, KeyStatus::Pending)?;
        next.status = KeyStatus::Next;
        next.not_before = Some(now + self.config.propagation_delay);
        let metadata = next.metadata();

        ring.keys.push(next);
        self.publish(ring, now);

        tracing::info!(
            kid = %metadata.kid,
            promote_after = ?metadata.not_before,
            "Published next signing key"
        );
        Ok(metadata)
    }

    /// Promotes the `next` key once its propagation delay has elapsed.
    ///
    /// Returns the newly active key, or `None` if nothing was due.
    pub async fn promote_due(&self) -> AuthResult<Option<KeyMetadata>> {
        let mut ring = self.ring.lock().await;
        let now = self.clock.now();
        let due = ring.keys.iter().position(|k| {
            k.status == KeyStatus::Next && k.not_before.is_some_and(|at| at <= now)
        });

        let Some(idx) = due else {
            return Ok(None);
        };
        let metadata = self.promote(&mut ring, idx, now);
        self.publish(&mut ring, now);
        Ok(Some(metadata))
    }

    /// Retires a key.
    ///
    /// Retiring the active key promotes the published `next` key, but only
    /// once its propagation delay has elapsed. Use [`Self::emergency_revoke`]
    /// to take a key out of service before that. A `next` key that never
    /// signed anything is dropped outright. Retiring a retired key is a
    /// no-op.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown kid and `KeyManagement` when the
    /// active key has no successor or the successor is still propagating.
    #[tracing::instrument(skip(self))]
    pub async fn retire(&self, kid: &str) -> AuthResult<KeyMetadata> {
        let mut ring = self.ring.lock().await;
        let now = self.clock.now();
        let idx = ring
            .position(kid)
            .ok_or_else(|| AuthError::not_found(format!("signing key {kid}")))?;

        let metadata = match ring.keys[idx].status {
            KeyStatus::Retired => return Ok(ring.keys[idx].metadata()),
            KeyStatus::Active => {
                let Some(next) = ring.successor() else {
                    return Err(AuthError::key_management(
                        "cannot retire the active key without a published successor; rotate first",
                    ));
                };
                if let Some(ready_at) = ring.keys[next].not_before
                    && ready_at > now
                {
                    return Err(AuthError::key_management(format!(
                        "next key {} is still propagating until {ready_at}; \
                         wait, or use the compromise path to remove the active key now",
                        ring.keys[next].kid()
                    )));
                }
                self.promote(&mut ring, next, now);
                ring.position(kid)
                    .map(|i| ring.keys[i].metadata())
                    .ok_or_else(|| AuthError::internal("retired key vanished"))?
            }
            KeyStatus::Next | KeyStatus::Pending => {
                let mut dropped = ring.keys.remove(idx);
                dropped.status = KeyStatus::Retired;
                dropped.not_after = Some(now);
                tracing::info!(kid = %kid, "Dropped unpromoted signing key");
                dropped.metadata()
            }
        };

        self.publish(&mut ring, now);
        Ok(metadata)
    }

    /// Removes retired keys whose verification window has closed.
    ///
    /// Returns the purged kids.
    pub async fn purge_expired(&self) -> Vec<String> {
        let mut ring = self.ring.lock().await;
        let now = self.clock.now();

        let mut purged = Vec::new();
        ring.keys.retain(|k| {
            let expired = k.status == KeyStatus::Retired && k.not_after.is_some_and(|at| at <= now);
            if expired {
                purged.push(k.kid().to_string());
            }
            !expired
        });

        if !purged.is_empty() {
            for kid in &purged {
                tracing::info!(kid = %kid, "Purged retired signing key");
            }
            self.publish(&mut ring, now);
        }
        purged
    }

    /// Compromise path: drops `kid` from the published set immediately.
    ///
    /// Tokens signed with the key stop verifying as soon as verifiers pick up
    /// the new set. If the key was active, the `next` key (or a freshly
    /// generated one) becomes active at once. Returns the active key after
    /// the operation.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown kid, or an error if a replacement
    /// key cannot be generated.
    #[tracing::instrument(skip(self))]
    pub async fn emergency_revoke(&self, kid: &str) -> AuthResult<KeyMetadata> {
        let mut ring = self.ring.lock().await;
        let now = self.clock.now();
        let idx = ring
            .position(kid)
            .ok_or_else(|| AuthError::not_found(format!("signing key {kid}")))?;

        let was_active = ring.keys[idx].status == KeyStatus::Active;
        let replacement = if was_active && ring.successor().is_none() {
            Some(ManagedKey::new(self.generate(now).await?, KeyStatus::Pending)?)
        } else {
            None
        };

        let removed = ring.keys.remove(idx);
        tracing::error!(
            kid = %kid,
            status = %removed.status,
            "Signing key revoked as compromised; dropped from the verification key set"
        );

        if was_active {
            if let Some(key) = replacement {
                ring.keys.push(key);
            }
            if let Some(next) = ring.successor() {
                self.promote(&mut ring, next, now);
            }
        }

        self.publish(&mut ring, now);
        ring.active()
            .map(ManagedKey::metadata)
            .ok_or_else(|| AuthError::internal("no active signing key"))
    }

    fn promote(&self, ring: &mut KeyRing, idx: usize, now: OffsetDateTime) -> KeyMetadata {
        let not_after = now + self.config.retirement_grace;
        for key in ring.keys.iter_mut().filter(|k| k.status == KeyStatus::Active) {
            key.status = KeyStatus::Retired;
            key.not_after = Some(not_after);
            tracing::info!(kid = %key.kid(), not_after = %not_after, "Retired signing key");
        }

        let next = &mut ring.keys[idx];
        next.status = KeyStatus::Active;
        next.not_before = Some(now);
        self.active.store(next.key.clone());
        tracing::info!(kid = %next.kid(), "Promoted signing key to active");
        next.metadata()
    }

    fn publish(&self, ring: &mut KeyRing, now: OffsetDateTime) {
        let set = Self::snapshot(ring, now);
        tracing::debug!(version = set.version(), keys = set.len(), "Published verification key set");
        self.published.store(Arc::new(set));
    }

    fn snapshot(ring: &mut KeyRing, now: OffsetDateTime) -> VerificationKeySet {
        ring.version += 1;
        let keys = ring
            .keys
            .iter()
            .filter(|k| k.is_published())
            .map(|k| k.verification.clone());
        VerificationKeySet::new(ring.version, now, keys)
    }

    async fn generate(&self, now: OffsetDateTime) -> AuthResult<SigningKey> {
        let algorithm = self.config.algorithm;
        tokio::task::spawn_blocking(move || SigningKey::generate(algorithm, now))
            .await
            .map_err(|e| AuthError::internal(format!("key generation task failed: {e}")))?
    }
}
