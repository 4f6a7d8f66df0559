//! In-process key-value store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use voucher_core::SharedClock;

use super::{KeyValueStore, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<i64>,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// A `HashMap` behind a `RwLock`, with expiry judged against a [`Clock`].
///
/// Atomic primitives hold the write lock for their whole read-modify-write,
/// so they are linearizable within one process.
///
/// [`Clock`]: voucher_core::Clock
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    fn expiry(&self, ttl_secs: Option<i64>) -> Option<i64> {
        ttl_secs.map(|ttl| self.clock.now() + ttl)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<i64>) -> Result<(), StoreError> {
        let entry = Entry {
            value: value.to_vec(),
            expires_at: self.expiry(ttl_secs),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl_secs: Option<i64>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: self.expiry(ttl_secs),
            },
        );
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let current = entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.as_slice());
        if current != expected {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: new.to_vec(),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .write()
            .await
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use voucher_core::ManualClock;

    fn store() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (MemoryStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let (store, clock) = store();
        store.set("k", b"v", Some(10)).await.unwrap();
        clock.advance(9);
        assert!(store.get("k").await.unwrap().is_some());
        clock.advance(1);
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn set_if_absent_treats_expired_as_absent() {
        let (store, clock) = store();
        assert!(store.set_if_absent("k", b"a", Some(5)).await.unwrap());
        assert!(!store.set_if_absent("k", b"b", Some(5)).await.unwrap());
        clock.advance(5);
        assert!(store.set_if_absent("k", b"c", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"c"[..]));
    }

    #[tokio::test]
    async fn compare_and_swap_semantics() {
        let (store, _clock) = store();
        assert!(!store.compare_and_swap("k", Some(&b"x"[..]), b"y").await.unwrap());
        assert!(store.compare_and_swap("k", None, b"a").await.unwrap());
        assert!(!store.compare_and_swap("k", None, b"b").await.unwrap());
        assert!(!store.compare_and_swap("k", Some(&b"b"[..]), b"c").await.unwrap());
        assert!(store.compare_and_swap("k", Some(&b"a"[..]), b"c").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"c"[..]));
    }

    #[tokio::test]
    async fn compare_and_swap_sees_expired_as_absent() {
        let (store, clock) = store();
        store.set("k", b"old", Some(1)).await.unwrap();
        clock.advance(1);
        assert!(!store.compare_and_swap("k", Some(&b"old"[..]), b"new").await.unwrap());
        assert!(store.compare_and_swap("k", None, b"new").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_cas_has_single_winner() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new(clock));
        let mut handles = Vec::new();
        for i in 0..16u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.compare_and_swap("k", None, &[i]).await.unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn purge_and_len() {
        let (store, clock) = store();
        store.set("a", b"1", Some(1)).await.unwrap();
        store.set("b", b"2", None).await.unwrap();
        assert_eq!(store.len().await, 2);
        clock.advance(2);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.purge_expired().await, 1);
        assert!(!store.is_empty().await);
    }
}
