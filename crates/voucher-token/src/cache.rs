//! Issuance cache.
//!
//! Remembers what was issued under each `token_id`, token included, so a
//! client that lost the response can fetch the same token again. Also
//! tracks which batch codes are taken. Entries never outlive the token they
//! describe.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;
use voucher_core::SharedClock;
use voucher_core::config::IssuanceConfig;

use crate::claims::{SubjectType, VoucherClaims};
use crate::store::{SharedStore, StoreError};

/// What the cache knows about one issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedIssuance {
    pub token_id: String,
    /// The compact token exactly as issued.
    pub token: String,
    pub voucher_id: Uuid,
    pub subject_type: SubjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_code: Option<String>,
    pub key_id: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

pub struct IssuanceCache {
    store: SharedStore,
    namespace: String,
    ttl_secs: i64,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl std::fmt::Debug for IssuanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuanceCache")
            .field("namespace", &self.namespace)
            .field("ttl_secs", &self.ttl_secs)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl IssuanceCache {
    pub fn new(
        store: SharedStore,
        namespace: impl Into<String>,
        ttl_secs: i64,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            ttl_secs,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn from_config(store: SharedStore, config: &IssuanceConfig, clock: SharedClock) -> Self {
        Self::new(
            store,
            config.cache_namespace.clone(),
            config.cache_ttl_secs,
            clock,
        )
    }

    fn issued_key(&self, token_id: &str) -> String {
        format!("{}:issued:{token_id}", self.namespace)
    }

    fn batch_key(&self, code: &str) -> String {
        format!("{}:batch:{code}", self.namespace)
    }

    /// Seconds an entry for something expiring at `expires_at` may live.
    fn ttl_until(&self, expires_at: i64) -> i64 {
        self.ttl_secs.min(expires_at - self.clock.now())
    }

    /// Cache an issued token. Tokens without a `token_id`, or already
    /// expired, are not cached.
    pub async fn record(
        &self,
        claims: &VoucherClaims,
        token: &str,
        key_id: &str,
    ) -> Result<(), StoreError> {
        let Some(token_id) = claims.token_id.as_deref() else {
            return Ok(());
        };
        let ttl = self.ttl_until(claims.expires_at);
        if ttl <= 0 {
            return Ok(());
        }

        let entry = CachedIssuance {
            token_id: token_id.to_string(),
            token: token.to_string(),
            voucher_id: claims.voucher_id,
            subject_type: claims.subject_type,
            user_id: claims.user_id.clone(),
            batch_code: claims.batch_code.clone(),
            key_id: key_id.to_string(),
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
        };
        let bytes = serde_json::to_vec(&entry).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.store
            .set(&self.issued_key(token_id), &bytes, Some(ttl))
            .await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Look up an issued token. Unreadable entries count as misses.
    pub async fn get(&self, token_id: &str) -> Result<Option<CachedIssuance>, StoreError> {
        let entry: Option<CachedIssuance> = self
            .store
            .get(&self.issued_key(token_id))
            .await?
            .and_then(|bytes| match serde_json::from_slice(&bytes) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(token_id, error = %e, "Discarding unreadable issuance cache entry");
                    None
                }
            });

        let counter = if entry.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(entry)
    }

    /// Claim a batch code until `expires_at`. Returns `false` if it is taken.
    pub async fn reserve_batch_code(&self, code: &str, expires_at: i64) -> Result<bool, StoreError> {
        let ttl = (expires_at - self.clock.now()).max(1);
        self.store
            .set_if_absent(&self.batch_key(code), code.as_bytes(), Some(ttl))
            .await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}
