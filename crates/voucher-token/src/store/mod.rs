//! Key-value store used for key records, the current-key pointer, the
//! issuance cache and the short-code registry.
//!
//! All shared mutable state of the subsystem lives behind this trait so that
//! several processes can run against one store. Atomicity comes from the
//! store primitives (`set_if_absent`, `compare_and_swap`), never from
//! in-process locks.

mod memory;
mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use voucher_core::db::DatabaseError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Store operation errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(DatabaseError::from(e))
    }
}

/// Minimal key-value interface with TTLs and atomic primitives.
///
/// Expired entries behave exactly like absent ones.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Unconditional write. `ttl_secs = None` keeps the entry until deleted.
    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<i64>) -> Result<(), StoreError>;

    /// Write only if no live entry exists. Returns whether the write happened.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl_secs: Option<i64>,
    ) -> Result<bool, StoreError>;

    /// Replace the value only if the live entry currently equals `expected`
    /// (`None` meaning absent). The new entry has no TTL. Returns whether the
    /// swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError>;

    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Shared, type-erased store handle.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Decorator that bounds every call to the inner store with a timeout.
///
/// A stalled store then surfaces as [`StoreError::Timeout`] instead of
/// hanging issuance or validation.
#[derive(Debug, Clone)]
pub struct TimedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimedStore<S> {
    pub const fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for TimedStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.bounded(self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<i64>) -> Result<(), StoreError> {
        self.bounded(self.inner.set(key, value, ttl_secs)).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl_secs: Option<i64>,
    ) -> Result<bool, StoreError> {
        self.bounded(self.inner.set_if_absent(key, value, ttl_secs))
            .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError> {
        self.bounded(self.inner.compare_and_swap(key, expected, new))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.bounded(self.inner.delete(key)).await
    }
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<i64>) -> Result<(), StoreError> {
        (**self).set(key, value, ttl_secs).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl_secs: Option<i64>,
    ) -> Result<bool, StoreError> {
        (**self).set_if_absent(key, value, ttl_secs).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError> {
        (**self).compare_and_swap(key, expected, new).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key).await
    }
}

/// A store whose every call hangs, to exercise `TimedStore`.
#[cfg(test)]
pub(crate) struct StalledStore;

#[cfg(test)]
#[async_trait]
impl KeyValueStore for StalledStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        std::future::pending().await
    }
    async fn set(&self, _: &str, _: &[u8], _: Option<i64>) -> Result<(), StoreError> {
        std::future::pending().await
    }
    async fn set_if_absent(&self, _: &str, _: &[u8], _: Option<i64>) -> Result<bool, StoreError> {
        std::future::pending().await
    }
    async fn compare_and_swap(
        &self,
        _: &str,
        _: Option<&[u8]>,
        _: &[u8],
    ) -> Result<bool, StoreError> {
        std::future::pending().await
    }
    async fn delete(&self, _: &str) -> Result<bool, StoreError> {
        std::future::pending().await
    }
}
