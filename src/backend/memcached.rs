//! Memcached cache backend implementation.
//!
//! Items are stored as encoded [`CacheItem`] records under
//! `"{namespace}:{key}"`, with the Memcached expiration set from the record's
//! own expiry.

use super::{mutate, read_raw, CacheBackend, MultiGet, Step};
use crate::error::{Error, Result};
use crate::item::{CacheItem, Lookup, Payload};
use crate::key::CacheKeyBuilder;
use crate::serialization::Codec;
use async_memcached::AsciiProtocol;
use deadpool_memcached::{Manager, Pool};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Default registration name.
pub const NAME: &str = "memcache";

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "cache";

/// Default Memcached connection pool size.
/// Formula: (CPU cores × 2) + 1
/// For 8-core systems: 16 connections is optimal
/// Override with MEMCACHED_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: u32 = 16;

/// Largest expiration Memcached reads as relative seconds; larger values are
/// unix timestamps.
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

/// Configuration for Memcached backend.
#[derive(Clone, Debug)]
pub struct MemcachedConfig {
    pub servers: Vec<String>, // e.g., ["localhost:11211", "cache2:11211"]
    pub connection_timeout: Duration,
    pub pool_size: u32,
    /// Prefix of every key this store writes.
    pub namespace: String,
    pub codec: Codec,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        MemcachedConfig {
            servers: vec!["localhost:11211".to_string()],
            connection_timeout: Duration::from_secs(5),
            pool_size: DEFAULT_POOL_SIZE,
            namespace: DEFAULT_NAMESPACE.to_string(),
            codec: Codec::default(),
        }
    }
}

/// Whole seconds, rounded up so the server never drops a record early.
fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// Memcached expiration for a record: `None` never expires.
fn expiration(item: &CacheItem<Payload>) -> Option<i64> {
    let seconds = ceil_secs(item.remaining()?).max(1);
    if seconds <= MAX_RELATIVE_EXPIRATION {
        return Some(seconds as i64);
    }
    let deadline = item
        .expires_at()
        .duration_since(UNIX_EPOCH)
        .map_or(0, ceil_secs);
    Some(deadline as i64)
}

fn connection_error(e: impl std::fmt::Display) -> Error {
    Error::BackendError(format!("Failed to get Memcached connection: {}", e))
}

/// Memcached backend with connection pooling and async operations.
///
/// Provides distributed caching using Memcached protocol via async connection pool.
/// Increments are read-modify-write cycles serialized per process.
///
/// # Example
///
/// ```no_run
/// # use cache_mux::backend::{MemcachedBackend, MemcachedConfig, CacheBackend};
/// # use cache_mux::error::Result;
/// # use std::time::Duration;
/// # async fn example() -> Result<()> {
/// let config = MemcachedConfig {
///     servers: vec!["localhost:11211".to_string()],
///     ..Default::default()
/// };
///
/// let backend = MemcachedBackend::new(config).await?;
/// backend.set("key", &"value".to_string(), Duration::ZERO).await?;
/// let value: String = backend.get("key").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemcachedBackend {
    pool: Pool,
    namespace: Arc<str>,
    codec: Codec,
    write_lock: Arc<Mutex<()>>,
}

impl MemcachedBackend {
    /// Create new Memcached backend from configuration.
    ///
    /// # Errors
    /// Returns `Err` if connection pool creation fails
    pub async fn new(config: MemcachedConfig) -> Result<Self> {
        // deadpool-memcached Manager takes a single server address
        // Use the first server from the list
        let addr = config
            .servers
            .first()
            .ok_or_else(|| Error::ConfigError("No memcached servers specified".to_string()))?
            .clone();

        let manager = Manager::new(addr.clone());

        let pool = Pool::builder(manager)
            .max_size(config.pool_size as usize)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create connection pool: {}", e)))?;

        info!(
            "✓ Memcached backend initialized with server: {} (pool size: {}, namespace: {})",
            addr, config.pool_size, config.namespace
        );

        Ok(MemcachedBackend {
            pool,
            namespace: config.namespace.into(),
            codec: config.codec,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Create from server address directly.
    ///
    /// Pool size is determined by:
    /// 1. `MEMCACHED_POOL_SIZE` environment variable (if set)
    /// 2. `DEFAULT_POOL_SIZE` constant (16)
    ///
    /// # Errors
    /// Returns `Err` if connection pool creation fails
    pub async fn from_server(addr: String) -> Result<Self> {
        let pool_size = std::env::var("MEMCACHED_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let config = MemcachedConfig {
            servers: vec![addr],
            pool_size,
            ..Default::default()
        };
        Self::new(config).await
    }

    fn cache_key(&self, key: &str) -> String {
        CacheKeyBuilder::namespaced(&self.namespace, key)
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await.map_err(connection_error)?;
        match conn.get(self.cache_key(key)).await {
            Ok(Some(value)) => Ok(value.data),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::BackendError(format!(
                "Memcached GET failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn store(&self, key: &str, item: &CacheItem<Payload>) -> Result<()> {
        let bytes = item.encode(self.codec)?;
        let mut conn = self.pool.get().await.map_err(connection_error)?;

        // Correct parameter order: set(key, value, ttl, flags)
        conn.set(self.cache_key(key), bytes.as_slice(), expiration(item), None)
            .await
            .map_err(|e| {
                Error::BackendError(format!("Memcached SET failed for key {}: {}", key, e))
            })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(connection_error)?;
        match conn.delete(self.cache_key(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().to_lowercase().contains("not found") => Ok(()),
            Err(e) => Err(Error::BackendError(format!(
                "Memcached DELETE failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn read_item(&self, key: &str) -> Result<Lookup<Payload>> {
        read_raw(key, self.fetch(key).await?, self.codec)
    }

    async fn mutate(&self, key: &str, step: Step) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let current = match self.read_item(key).await {
            Ok(lookup) => Some(lookup.into_item()),
            Err(Error::KeyNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let next = mutate(current.as_ref(), step, self.codec)?;
        self.store(key, &next).await?;
        debug!("✓ Memcached {:?} {}", step, key);
        Ok(())
    }
}

impl CacheBackend for MemcachedBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Any + Sync,
    {
        let item = CacheItem::new(Payload::encode(value, self.codec)?, ttl);
        self.store(key, &item).await?;
        debug!("✓ Memcached SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        match self.read_item(key).await? {
            Lookup::Live(item) => {
                debug!("✓ Memcached GET {} -> HIT", key);
                item.data().decode(self.codec)
            }
            Lookup::Expired(_) => {
                self.remove(key).await?;
                debug!("✓ Memcached GET {} -> EXPIRED", key);
                Err(Error::KeyExpired(key.to_string()))
            }
        }
    }

    async fn get_multi<T: DeserializeOwned>(&self, keys: &[&str]) -> MultiGet<T> {
        let mut results = MultiGet::with_capacity(keys.len());
        if keys.is_empty() {
            return results;
        }

        let fetched: Result<HashMap<String, Vec<u8>>> = async {
            let mut conn = self.pool.get().await.map_err(connection_error)?;
            let cache_keys: Vec<String> = keys.iter().map(|k| self.cache_key(k)).collect();

            // Use native get_multi for batch retrieval - single round trip
            // Note: get_multi may return "not found" error if no keys exist
            let values = match conn.get_multi(&cache_keys).await {
                Ok(values) => values,
                Err(e) if e.to_string().contains("not found") => Vec::new(),
                Err(e) => {
                    return Err(Error::BackendError(format!("Memcached MGET failed: {}", e)))
                }
            };

            Ok(values
                .into_iter()
                .filter_map(|value| {
                    let key = String::from_utf8_lossy(&value.key).to_string();
                    value.data.map(|data| (key, data))
                })
                .collect())
        }
        .await;

        match fetched {
            Ok(mut found) => {
                for key in keys {
                    let raw = found.remove(&self.cache_key(key));
                    let result = read_raw(key, raw, self.codec).and_then(|lookup| {
                        lookup.live(key)?.data().decode(self.codec)
                    });
                    results.push(key, result);
                }
            }
            Err(e) => {
                for key in keys {
                    results.push(key, Err(e.clone()));
                }
            }
        }

        debug!("✓ Memcached MGET {} keys (batch operation)", keys.len());
        results
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.remove(key).await?;
        debug!("✓ Memcached DELETE {}", key);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        match self.read_item(key).await {
            Ok(lookup) => Ok(!lookup.is_expired()),
            Err(e) if e.is_miss() || e.is_corrupt() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn increment(&self, key: &str, step: i64) -> Result<()> {
        self.mutate(key, Step::Up(step)).await
    }

    async fn decrement(&self, key: &str, step: i64) -> Result<()> {
        self.mutate(key, Step::Down(step)).await
    }

    /// Flush the whole server.
    ///
    /// Memcached cannot enumerate keys, so this also drops keys of other
    /// namespaces on the same server.
    async fn clear(&self) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(connection_error)?;

        conn.flush_all()
            .await
            .map_err(|e| Error::BackendError(format!("Memcached FLUSH_ALL failed: {}", e)))?;

        warn!("⚠ Memcached FLUSH_ALL executed - all cache cleared!");
        Ok(())
    }
}
