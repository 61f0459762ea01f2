//! Redis cache backend implementation.
//!
//! Items are stored as encoded [`CacheItem`] records under
//! `"{namespace}:{key}"`. The record carries its own expiry; the Redis key
//! TTL is set alongside so the server reclaims expired records on its own.

use super::{mutate, read_raw, CacheBackend, MultiGet, Step};
use crate::error::{Error, Result};
use crate::item::{CacheItem, Lookup, Payload};
use crate::key::CacheKeyBuilder;
use crate::serialization::Codec;
use deadpool_redis::{redis::AsyncCommands, Config as PoolConfig, Connection, Pool, Runtime};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default registration name.
pub const NAME: &str = "redis";

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "cache";

/// Pool statistics information.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Default Redis connection pool size.
/// Formula: (CPU cores × 2) + 1
/// For 8-core systems: 16 connections is optimal
/// Override with REDIS_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: u32 = 16;

/// Keys fetched per SCAN round during `clear`.
const SCAN_BATCH: usize = 500;

/// Configuration for Redis backend.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
    pub pool_size: u32,
    pub connection_timeout: Duration,
    /// Prefix of every key this store writes.
    pub namespace: String,
    pub codec: Codec,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            pool_size: DEFAULT_POOL_SIZE,
            connection_timeout: Duration::from_secs(5),
            namespace: DEFAULT_NAMESPACE.to_string(),
            codec: Codec::default(),
        }
    }
}

impl RedisConfig {
    /// Build Redis connection string.
    pub fn connection_string(&self) -> String {
        if let Some(password) = &self.password {
            if let Some(username) = &self.username {
                format!(
                    "redis://{}:{}@{}:{}/{}",
                    username, password, self.host, self.port, self.database
                )
            } else {
                format!(
                    "redis://default:{}@{}:{}/{}",
                    password, self.host, self.port, self.database
                )
            }
        } else {
            format!("redis://{}:{}/{}", self.host, self.port, self.database)
        }
    }
}

/// Redis backend with connection pooling and async operations.
///
/// Uses deadpool for efficient async resource management and pooling.
/// Increments are read-modify-write cycles serialized per process; two
/// processes incrementing the same key can lose updates.
///
/// # Example
///
/// ```no_run
/// # use cache_mux::backend::{RedisBackend, RedisConfig, CacheBackend};
/// # use cache_mux::error::Result;
/// # use std::time::Duration;
/// # async fn example() -> Result<()> {
/// let config = RedisConfig::default();
/// let backend = RedisBackend::new(config).await?;
///
/// backend.set("key", &"value".to_string(), Duration::from_secs(60)).await?;
/// let value: String = backend.get("key").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    namespace: Arc<str>,
    codec: Codec,
    write_lock: Arc<Mutex<()>>,
}

impl RedisBackend {
    /// Create new Redis backend from configuration.
    ///
    /// # Errors
    /// Returns `Err` if pool creation fails.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let conn_str = config.connection_string();
        let mut cfg = PoolConfig::from_url(conn_str);
        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size as usize);
        pool_config.timeouts.wait = Some(config.connection_timeout);
        pool_config.timeouts.create = Some(config.connection_timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::BackendError(format!("Failed to create Redis pool: {}", e)))?;

        info!(
            "✓ Redis backend initialized: {}:{} (namespace: {})",
            config.host, config.port, config.namespace
        );

        Ok(RedisBackend {
            pool,
            namespace: config.namespace.into(),
            codec: config.codec,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Create from connection string directly.
    ///
    /// Pool size is determined by:
    /// 1. `REDIS_POOL_SIZE` environment variable (if set)
    /// 2. `DEFAULT_POOL_SIZE` constant (16)
    ///
    /// # Errors
    /// Returns `Err` if pool creation fails.
    pub async fn from_connection_string(conn_str: &str) -> Result<Self> {
        let pool_size = std::env::var("REDIS_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let mut cfg = PoolConfig::from_url(conn_str);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_size as usize));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::BackendError(format!("Failed to create Redis pool: {}", e)))?;

        info!(
            "✓ Redis backend initialized from connection string (pool size: {})",
            pool_size
        );

        Ok(RedisBackend {
            pool,
            namespace: DEFAULT_NAMESPACE.into(),
            codec: Codec::default(),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Get current pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            connections: status.size as u32,
            idle_connections: status.available as u32,
        }
    }

    fn cache_key(&self, key: &str) -> String {
        CacheKeyBuilder::namespaced(&self.namespace, key)
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::BackendError(format!("Failed to get Redis connection: {}", e)))
    }

    async fn read_item(&self, conn: &mut Connection, key: &str) -> Result<Lookup<Payload>> {
        let raw: Option<Vec<u8>> = conn
            .get(self.cache_key(key))
            .await
            .map_err(|e| Error::BackendError(format!("Redis GET failed for key {}: {}", key, e)))?;
        read_raw(key, raw, self.codec)
    }

    async fn write_item(
        &self,
        conn: &mut Connection,
        key: &str,
        item: &CacheItem<Payload>,
    ) -> Result<()> {
        let bytes = item.encode(self.codec)?;
        let cache_key = self.cache_key(key);

        match item.remaining() {
            Some(remaining) => {
                // round up: a record must not vanish before its own expiry
                let seconds = (remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)).max(1);
                conn.set_ex::<_, _, ()>(&cache_key, bytes, seconds)
                    .await
                    .map_err(|e| {
                        Error::BackendError(format!("Redis SET_EX failed for key {}: {}", key, e))
                    })?;
            }
            None => {
                conn.set::<_, _, ()>(&cache_key, bytes).await.map_err(|e| {
                    Error::BackendError(format!("Redis SET failed for key {}: {}", key, e))
                })?;
            }
        }
        Ok(())
    }

    async fn remove(&self, conn: &mut Connection, key: &str) -> Result<()> {
        conn.del::<_, ()>(self.cache_key(key))
            .await
            .map_err(|e| Error::BackendError(format!("Redis DEL failed for key {}: {}", key, e)))
    }

    async fn mutate(&self, key: &str, step: Step) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.connection().await?;

        let current = match self.read_item(&mut conn, key).await {
            Ok(lookup) => Some(lookup.into_item()),
            Err(Error::KeyNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let next = mutate(current.as_ref(), step, self.codec)?;
        self.write_item(&mut conn, key, &next).await?;
        debug!("✓ Redis {:?} {}", step, key);
        Ok(())
    }
}

impl CacheBackend for RedisBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Any + Sync,
    {
        let item = CacheItem::new(Payload::encode(value, self.codec)?, ttl);
        let mut conn = self.connection().await?;
        self.write_item(&mut conn, key, &item).await?;
        debug!("✓ Redis SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let mut conn = self.connection().await?;
        match self.read_item(&mut conn, key).await? {
            Lookup::Live(item) => {
                debug!("✓ Redis GET {} -> HIT", key);
                item.data().decode(self.codec)
            }
            Lookup::Expired(_) => {
                self.remove(&mut conn, key).await?;
                debug!("✓ Redis GET {} -> EXPIRED", key);
                Err(Error::KeyExpired(key.to_string()))
            }
        }
    }

    async fn get_multi<T: DeserializeOwned>(&self, keys: &[&str]) -> MultiGet<T> {
        let mut results = MultiGet::with_capacity(keys.len());
        if keys.is_empty() {
            return results;
        }

        let fetched = match self.connection().await {
            Ok(mut conn) => {
                let cache_keys: Vec<String> = keys.iter().map(|k| self.cache_key(k)).collect();
                deadpool_redis::redis::cmd("MGET")
                    .arg(&cache_keys)
                    .query_async::<Vec<Option<Vec<u8>>>>(&mut *conn)
                    .await
                    .map_err(|e| Error::BackendError(format!("Redis MGET failed: {}", e)))
            }
            Err(e) => Err(e),
        };

        match fetched {
            Ok(values) => {
                for (key, raw) in keys.iter().zip(values) {
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

        debug!("✓ Redis MGET {} keys", keys.len());
        results
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        self.remove(&mut conn, key).await?;
        debug!("✓ Redis DELETE {}", key);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        match self.read_item(&mut conn, key).await {
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

    /// Remove every key under this store's namespace.
    ///
    /// Walks the keyspace with SCAN so other namespaces sharing the database
    /// are left alone.
    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}:*", self.namespace);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys) = deadpool_redis::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async::<(u64, Vec<String>)>(&mut *conn)
                .await
                .map_err(|e| Error::BackendError(format!("Redis SCAN failed: {}", e)))?;

            if !keys.is_empty() {
                removed += keys.len();
                conn.del::<_, ()>(&keys)
                    .await
                    .map_err(|e| Error::BackendError(format!("Redis DEL (bulk) failed: {}", e)))?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        warn!(
            "⚠ Redis CLEAR executed - removed {} keys under {}:*",
            removed, self.namespace
        );
        Ok(())
    }
}
