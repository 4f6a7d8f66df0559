//! Signing key lifecycle.
//!
//! Key pairs live in the shared store, one record per key, so every process
//! pointed at the same store signs with the same current key and accepts the
//! same verification set. Layout per algorithm:
//!
//! - `{ns}:{alg}:current` id of the current signing key
//! - `{ns}:{alg}:keys:{id}` key record (PKCS#8 PEM plus timestamps)
//! - `{ns}:{alg}:index` JSON list of known key ids
//!
//! The current pointer only ever moves by compare-and-swap. A superseded key
//! stays verifiable for the overlap window and its record then expires.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use voucher_core::SharedClock;
use voucher_core::config::KeyConfig;
use voucher_crypto::{Algorithm, JwkSet, KeyPair, PrivateKey, VerificationKey};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::KeyError;
use crate::store::SharedStore;

/// How many times an index update is retried under contention.
const INDEX_UPDATE_ATTEMPTS: usize = 8;

/// When keys are replaced and how long replaced keys keep verifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Age after which `ensure_signing_key` rotates the current key.
    pub max_age_secs: i64,
    /// How long a superseded key stays in the verification set.
    pub overlap_secs: i64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::from(&KeyConfig::default())
    }
}

impl From<&KeyConfig> for RotationPolicy {
    fn from(config: &KeyConfig) -> Self {
        Self {
            max_age_secs: config.max_age_secs,
            overlap_secs: config.overlap_secs,
        }
    }
}

/// Outcome of [`KeyManager::rotate_keys_from`].
#[derive(Debug)]
pub struct Rotation {
    /// The current signing key after the call.
    pub key: KeyPair,
    /// Whether this call moved the pointer. `false` means a concurrent
    /// rotator won and `key` is theirs.
    pub committed: bool,
}

/// Persisted form of a key pair.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredKeyPair {
    id: String,
    #[zeroize(skip)]
    algorithm: Algorithm,
    private_pem: String,
    created_at: i64,
    rotates_at: Option<i64>,
}

impl StoredKeyPair {
    fn from_key_pair(kp: &KeyPair) -> Result<Self, KeyError> {
        let pem = kp.private_key().to_pkcs8_pem()?;
        Ok(Self {
            id: kp.id.clone(),
            algorithm: kp.algorithm(),
            private_pem: pem.as_str().to_string(),
            created_at: kp.created_at,
            rotates_at: kp.rotates_at,
        })
    }

    fn to_key_pair(&self) -> Result<KeyPair, KeyError> {
        let private = PrivateKey::from_pkcs8_pem(&self.private_pem)?;
        if private.curve().algorithm() != self.algorithm {
            return Err(KeyError::Corrupt(format!(
                "key {} is labelled {} but holds a {} key",
                self.id,
                self.algorithm,
                private.curve().algorithm()
            )));
        }
        Ok(KeyPair::new(
            self.id.clone(),
            private,
            self.created_at,
            self.rotates_at,
        ))
    }
}

/// Manages signing keys per algorithm in a [`KeyValueStore`].
///
/// [`KeyValueStore`]: crate::store::KeyValueStore
#[derive(Clone)]
pub struct KeyManager {
    store: SharedStore,
    namespace: String,
    policy: RotationPolicy,
    clock: SharedClock,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("namespace", &self.namespace)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    pub fn new(
        store: SharedStore,
        namespace: impl Into<String>,
        policy: RotationPolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            policy,
            clock,
        }
    }

    pub fn from_config(store: SharedStore, config: &KeyConfig, clock: SharedClock) -> Self {
        Self::new(store, config.namespace.clone(), config.into(), clock)
    }

    pub const fn policy(&self) -> RotationPolicy {
        self.policy
    }

    fn current_key(&self, alg: Algorithm) -> String {
        format!("{}:{alg}:current", self.namespace)
    }

    fn record_key(&self, alg: Algorithm, id: &str) -> String {
        format!("{}:{alg}:keys:{id}", self.namespace)
    }

    fn index_key(&self, alg: Algorithm) -> String {
        format!("{}:{alg}:index", self.namespace)
    }

    /// Persist a key pair and list it in the index. Does not make it current.
    ///
    /// A pair with `rotates_at` set is written with the remaining overlap as
    /// its TTL.
    pub async fn store_key_pair(&self, key_pair: &KeyPair) -> Result<(), KeyError> {
        let ttl = key_pair
            .rotates_at
            .map(|at| (at + self.policy.overlap_secs - self.clock.now()).max(1));
        self.write_record(key_pair, ttl).await?;
        self.add_to_index(key_pair.algorithm(), &key_pair.id).await
    }

    async fn write_record(&self, key_pair: &KeyPair, ttl_secs: Option<i64>) -> Result<(), KeyError> {
        let record = StoredKeyPair::from_key_pair(key_pair)?;
        let bytes = Zeroizing::new(
            serde_json::to_vec(&record).map_err(|e| KeyError::Corrupt(e.to_string()))?,
        );
        self.store
            .set(
                &self.record_key(key_pair.algorithm(), &key_pair.id),
                &bytes,
                ttl_secs,
            )
            .await?;
        Ok(())
    }

    async fn load_key_pair(&self, alg: Algorithm, id: &str) -> Result<Option<KeyPair>, KeyError> {
        let Some(bytes) = self.store.get(&self.record_key(alg, id)).await? else {
            return Ok(None);
        };
        let bytes = Zeroizing::new(bytes);
        let record: StoredKeyPair = serde_json::from_slice(&bytes)
            .map_err(|e| KeyError::Corrupt(format!("key record {id}: {e}")))?;
        if record.algorithm != alg {
            return Err(KeyError::Corrupt(format!(
                "key record {id} stored under {alg} holds {}",
                record.algorithm
            )));
        }
        record.to_key_pair().map(Some)
    }

    async fn current_key_id(&self, alg: Algorithm) -> Result<Option<String>, KeyError> {
        self.store
            .get(&self.current_key(alg))
            .await?
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| KeyError::Corrupt(format!("current key pointer: {e}")))
            })
            .transpose()
    }

    async fn read_index(&self, alg: Algorithm) -> Result<(Option<Vec<u8>>, Vec<String>), KeyError> {
        let raw = self.store.get(&self.index_key(alg)).await?;
        let ids = match &raw {
            Some(bytes) => serde_json::from_slice(bytes)
                .map_err(|e| KeyError::Corrupt(format!("key index: {e}")))?,
            None => Vec::new(),
        };
        Ok((raw, ids))
    }

    /// Append `id` to the index, dropping ids whose records have expired.
    async fn add_to_index(&self, alg: Algorithm, id: &str) -> Result<(), KeyError> {
        let index_key = self.index_key(alg);
        for _ in 0..INDEX_UPDATE_ATTEMPTS {
            let (raw, ids) = self.read_index(alg).await?;

            let mut kept = Vec::with_capacity(ids.len() + 1);
            for known in ids {
                if known == id || self.store.get(&self.record_key(alg, &known)).await?.is_some() {
                    kept.push(known);
                }
            }
            if !kept.iter().any(|known| known == id) {
                kept.push(id.to_string());
            }

            let new = serde_json::to_vec(&kept).map_err(|e| KeyError::Corrupt(e.to_string()))?;
            if raw.as_deref() == Some(new.as_slice()) {
                return Ok(());
            }
            if self
                .store
                .compare_and_swap(&index_key, raw.as_deref(), &new)
                .await?
            {
                return Ok(());
            }
            debug!(%alg, "Key index changed concurrently, retrying");
        }
        Err(KeyError::RotationConflict(format!(
            "key index for {alg} kept changing"
        )))
    }

    /// The key new tokens are signed with.
    pub async fn current_signing_key(&self, alg: Algorithm) -> Result<KeyPair, KeyError> {
        let id = self
            .current_key_id(alg)
            .await?
            .ok_or(KeyError::NoActiveKey(alg))?;
        self.load_key_pair(alg, &id)
            .await?
            .ok_or_else(|| KeyError::Corrupt(format!("current key {id} has no record")))
    }

    /// Return the current key, provisioning one if none exists and rotating
    /// once it is older than `max_age_secs`.
    pub async fn ensure_signing_key(&self, alg: Algorithm) -> Result<KeyPair, KeyError> {
        match self.current_signing_key(alg).await {
            Ok(key) if self.clock.now() - key.created_at < self.policy.max_age_secs => Ok(key),
            Ok(key) => {
                info!(%alg, key_id = %key.id, "Signing key exceeded max age, rotating");
                Ok(self.rotate_keys_from(alg, Some(&key.id)).await?.key)
            }
            Err(KeyError::NoActiveKey(_)) => {
                info!(%alg, "No signing key yet, provisioning");
                Ok(self.rotate_keys_from(alg, None).await?.key)
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the current signing key with a fresh one.
    ///
    /// If another process rotates at the same moment, its key is returned
    /// instead and only one new key takes effect.
    pub async fn rotate_keys(&self, alg: Algorithm) -> Result<KeyPair, KeyError> {
        let expected = self.current_key_id(alg).await?;
        Ok(self.rotate_keys_from(alg, expected.as_deref()).await?.key)
    }

    /// Rotate only if the current key is still `expected` (`None`: no key).
    ///
    /// Retrying with the same `expected` after a timeout never rotates twice:
    /// the second attempt loses the swap and reports the key now current.
    pub async fn rotate_keys_from(
        &self,
        alg: Algorithm,
        expected: Option<&str>,
    ) -> Result<Rotation, KeyError> {
        let now = self.clock.now();
        let fresh = KeyPair::generate(alg.curve(), now);

        // Record and index entry exist before the pointer can reference them.
        self.write_record(&fresh, None).await?;
        self.add_to_index(alg, &fresh.id).await?;

        let swapped = self
            .store
            .compare_and_swap(
                &self.current_key(alg),
                expected.map(str::as_bytes),
                fresh.id.as_bytes(),
            )
            .await?;

        if !swapped {
            if let Err(e) = self.store.delete(&self.record_key(alg, &fresh.id)).await {
                warn!(%alg, key_id = %fresh.id, error = %e, "Failed to discard losing key");
            }
            let winner = self.current_signing_key(alg).await.map_err(|e| match e {
                KeyError::NoActiveKey(_) | KeyError::Corrupt(_) => KeyError::RotationConflict(
                    format!("lost rotation for {alg} but current key is unreadable: {e}"),
                ),
                other => other,
            })?;
            debug!(%alg, key_id = %winner.id, "Lost rotation race, using winner's key");
            return Ok(Rotation {
                key: winner,
                committed: false,
            });
        }

        let superseded_at = match expected {
            Some(old_id) => self.retire(alg, old_id, now).await?,
            None => None,
        };
        self.retire_stranded(alg, &fresh.id, expected, superseded_at.unwrap_or(now), now)
            .await?;

        info!(%alg, key_id = %fresh.id, previous = ?expected, "Signing key rotated");
        Ok(Rotation {
            key: fresh,
            committed: true,
        })
    }

    /// Stamp a superseded key and let its record expire after the overlap.
    /// Returns when the key had become current.
    async fn retire(&self, alg: Algorithm, id: &str, now: i64) -> Result<Option<i64>, KeyError> {
        let Some(mut old) = self.load_key_pair(alg, id).await? else {
            warn!(%alg, key_id = %id, "Superseded key has no record");
            return Ok(None);
        };
        old.rotates_at = Some(now);
        self.write_record(&old, Some(self.policy.overlap_secs.max(1)))
            .await?;
        Ok(Some(old.created_at))
    }

    /// Retire keys an interrupted rotation left unstamped and without a TTL.
    ///
    /// Such a key was superseded no later than `superseded_at`, when the key
    /// just retired became current, and verifies only until the overlap after
    /// that. Records already past it are deleted and leave the index.
    async fn retire_stranded(
        &self,
        alg: Algorithm,
        fresh_id: &str,
        retired_id: Option<&str>,
        superseded_at: i64,
        now: i64,
    ) -> Result<(), KeyError> {
        let (_, ids) = self.read_index(alg).await?;
        let mut removed = false;
        for id in ids {
            if id == fresh_id || retired_id == Some(id.as_str()) {
                continue;
            }
            let Some(mut stray) = self.load_key_pair(alg, &id).await? else {
                continue;
            };
            // Keys created since then belong to concurrent rotators.
            if stray.rotates_at.is_some() || stray.created_at >= superseded_at {
                continue;
            }
            let remaining = superseded_at + self.policy.overlap_secs - now;
            if remaining > 0 {
                stray.rotates_at = Some(superseded_at);
                self.write_record(&stray, Some(remaining)).await?;
            } else {
                self.store.delete(&self.record_key(alg, &id)).await?;
                removed = true;
            }
            warn!(%alg, key_id = %id, "Retired key left behind by an interrupted rotation");
        }
        if removed {
            // Re-adding the fresh id prunes ids whose records are gone.
            self.add_to_index(alg, fresh_id).await?;
        }
        Ok(())
    }

    /// Every key a token may currently verify against: the current key first,
    /// then superseded keys still inside the overlap window, newest first.
    pub async fn verification_key_set(&self, alg: Algorithm) -> Result<Vec<KeyPair>, KeyError> {
        let now = self.clock.now();
        let current_id = self.current_key_id(alg).await?;
        let (_, ids) = self.read_index(alg).await?;

        let mut current = None;
        let mut others = Vec::new();
        for id in ids {
            let Some(kp) = self.load_key_pair(alg, &id).await? else {
                continue;
            };
            if current_id.as_deref() == Some(id.as_str()) {
                current = Some(kp);
            } else {
                others.push(kp);
            }
        }

        // A non-current key without a rotation stamp was superseded no later
        // than the current key was created.
        let retired_fallback = current.as_ref().map_or(now, |c| c.created_at);
        others.retain(|kp| {
            kp.rotates_at.unwrap_or(retired_fallback) + self.policy.overlap_secs > now
        });
        others.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(current.into_iter().chain(others).collect())
    }

    /// Public halves of [`Self::verification_key_set`].
    pub async fn verification_keys(
        &self,
        alg: Algorithm,
    ) -> Result<Vec<VerificationKey>, KeyError> {
        Ok(self
            .verification_key_set(alg)
            .await?
            .iter()
            .map(KeyPair::verification_key)
            .collect())
    }

    /// The verification set as a JWK Set, for distribution to offline devices.
    pub async fn public_key_set(&self, alg: Algorithm) -> Result<JwkSet, KeyError> {
        Ok(JwkSet::from_keys(&self.verification_keys(alg).await?))
    }
}
