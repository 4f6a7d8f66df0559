//! SQLite-backed key-value store.
//!
//! One `kv_entries` table. Expired rows are invisible to every operation and
//! removed lazily (overwrite, delete) or in bulk by `purge_expired`. Each
//! primitive is a single statement, so atomicity holds across processes
//! sharing the database file.

use std::path::Path;

use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};
use voucher_core::SharedClock;
use voucher_core::db::{self, DatabaseError};

use super::{KeyValueStore, StoreError};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    clock: SharedClock,
}

impl SqliteStore {
    /// Open (or create) the store at `path` and run migrations.
    pub async fn open(path: &Path, clock: SharedClock) -> Result<Self, DatabaseError> {
        let pool = db::open_pool(path).await?;
        Self::from_pool(pool, clock).await
    }

    pub async fn open_in_memory(clock: SharedClock) -> Result<Self, DatabaseError> {
        let pool = db::open_pool_in_memory().await?;
        Self::from_pool(pool, clock).await
    }

    pub async fn from_pool(pool: Pool<Sqlite>, clock: SharedClock) -> Result<Self, DatabaseError> {
        let store = Self { pool, clock };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        info!("Key-value store migrations complete");
        Ok(())
    }

    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Delete expired rows. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(self.clock.now())
                .execute(&self.pool)
                .await?;
        let purged = result.rows_affected();
        if purged > 0 {
            debug!(purged, "Purged expired store entries");
        }
        Ok(purged)
    }

    fn expiry(&self, ttl_secs: Option<i64>) -> Option<i64> {
        ttl_secs.map(|ttl| self.clock.now() + ttl)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT value FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<i64>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(self.expiry(ttl_secs))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl_secs: Option<i64>,
    ) -> Result<bool, StoreError> {
        // An expired row counts as absent, so the upsert may only overwrite
        // rows whose expiry has passed.
        let result = sqlx::query(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at \
             WHERE kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= ?",
        )
        .bind(key)
        .bind(value)
        .bind(self.expiry(ttl_secs))
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError> {
        let Some(expected) = expected else {
            return self.set_if_absent(key, new, None).await;
        };

        let result = sqlx::query(
            "UPDATE kv_entries SET value = ?, expires_at = NULL \
             WHERE key = ? AND value = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(new)
        .bind(key)
        .bind(expected)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed: Option<(Option<i64>,)> =
            sqlx::query_as("DELETE FROM kv_entries WHERE key = ? RETURNING expires_at")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        let now = self.clock.now();
        Ok(removed.is_some_and(|(expires_at,)| expires_at.is_none_or(|exp| exp > now)))
    }
}
