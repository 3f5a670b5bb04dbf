//! Key/value cache with expiry
//!
//! The pipeline only talks to a [`CacheHandle`], which turns every store
//! failure into a miss (reads) or a no-op (writes). A handle without a store
//! behaves as an always-empty cache.

use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Ranked proxy list
pub const KEY_PROXIES: &str = "proxies";
/// Statistics of the last run
pub const KEY_TEST_STATS: &str = "test_stats";
/// Every probe result of the last run
pub const KEY_TEST_DETAILS: &str = "test_details";
/// Persisted geolocation cache
pub const KEY_GEO_CACHE: &str = "geo_cache";

/// Durable key/value storage with per-key expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a live value by key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value that expires after `ttl`
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// In-process store, expiry checked on read. A TTL too large to represent
/// never expires.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if expires.map_or(true, |at| at > Instant::now()) => {
                Ok(Some(value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now().checked_add(ttl)));
        Ok(())
    }
}

/// SQLite backed store
#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    /// Open (creating if needed) a database from a `sqlite:` URL or a file path
    pub async fn new(location: &str) -> Result<Self> {
        let options = if location.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(location)?
        } else {
            SqliteConnectOptions::new().filename(location)
        };
        let options = options.create_if_missing(true);

        // One long-lived connection so in-memory databases survive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Delete expired rows, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM cache WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp().saturating_add(ttl_secs);
        sqlx::query(
            "INSERT INTO cache (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Failure-tolerant access to an optional store
#[derive(Clone, Default)]
pub struct CacheHandle {
    store: Option<Arc<dyn CacheStore>>,
}

impl CacheHandle {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store: Some(store) }
    }

    /// A handle that never stores anything
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, value: &str, ttl: Duration) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(e) = store.put(key, value, ttl).await {
            warn!(key, "cache write failed, dropping: {}", e);
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, "cached value does not decode, ignoring: {}", e);
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.put(key, &raw, ttl).await,
            Err(e) => warn!(key, "cache value does not encode: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Config("store offline".to_string()))
        }

        async fn put(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            Err(Error::Config("store offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCacheStore::new();
        store.put("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_expiry() {
        let store = MemoryCacheStore::new();
        store.put("k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_store_roundtrip() {
        let store = SqliteCacheStore::new("sqlite::memory:").await.unwrap();
        store.put("k", "v1", Duration::from_secs(60)).await.unwrap();
        store.put("k", "v2", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v2".to_string()));
        assert_eq!(store.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_store_expiry() {
        let store = SqliteCacheStore::new("sqlite::memory:").await.unwrap();
        store.put("k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow() {
        let memory = MemoryCacheStore::new();
        memory.put("k", "v", Duration::MAX).await.unwrap();
        assert_eq!(memory.get("k").await.unwrap(), Some("v".to_string()));

        let sqlite = SqliteCacheStore::new("sqlite::memory:").await.unwrap();
        sqlite.put("k", "v", Duration::MAX).await.unwrap();
        assert_eq!(sqlite.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(sqlite.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handle_degrades_failures() {
        let handle = CacheHandle::new(Arc::new(BrokenStore));
        handle.put("k", "v", Duration::from_secs(1)).await;
        assert_eq!(handle.get("k").await, None);
    }

    #[tokio::test]
    async fn test_disabled_handle() {
        let handle = CacheHandle::disabled();
        assert!(!handle.is_enabled());
        handle.put("k", "v", Duration::from_secs(1)).await;
        assert_eq!(handle.get("k").await, None);
    }

    #[tokio::test]
    async fn test_handle_json() {
        let handle = CacheHandle::new(Arc::new(MemoryCacheStore::new()));
        handle.put_json("nums", &vec![1, 2, 3], Duration::from_secs(60)).await;
        let nums: Option<Vec<u32>> = handle.get_json("nums").await;
        assert_eq!(nums, Some(vec![1, 2, 3]));

        handle.put("bad", "{not json", Duration::from_secs(60)).await;
        let bad: Option<Vec<u32>> = handle.get_json("bad").await;
        assert!(bad.is_none());
    }
}
