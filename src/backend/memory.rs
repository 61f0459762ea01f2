//! In-memory cache backend (default, thread-safe, async).
//!
//! Items live in a map behind a single `RwLock`. Reads and liveness checks
//! share the read side; writes, increments and lazy deletion of expired items
//! take the write side. A background sweep owned by the store periodically
//! removes expired items so entries nobody reads again do not pile up.

use super::{mutate, CacheBackend, Step};
use crate::error::{Error, Result};
use crate::item::{CacheItem, Payload};
use crate::serialization::Codec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default registration name.
pub const NAME: &str = "memory";

/// Default interval between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the in-memory backend.
#[derive(Clone, Debug)]
pub struct MemoryConfig {
    /// Time between background sweeps. Zero disables the sweep.
    pub sweep_interval: Duration,
    /// Codec for stored values.
    pub codec: Codec,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            codec: Codec::default(),
        }
    }
}

impl MemoryConfig {
    /// Defaults, with `CACHE_SWEEP_INTERVAL_MS` overriding the sweep interval.
    pub fn from_env() -> Self {
        let mut config = MemoryConfig::default();
        if let Ok(value) = std::env::var("CACHE_SWEEP_INTERVAL_MS") {
            match value.parse::<u64>() {
                Ok(ms) => config.sweep_interval = Duration::from_millis(ms),
                Err(_) => warn!(
                    "Ignoring invalid CACHE_SWEEP_INTERVAL_MS={:?}, using {:?}",
                    value, config.sweep_interval
                ),
            }
        }
        config
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
}

type Items = HashMap<String, CacheItem<Payload>>;

struct Shared {
    /// `None` once the store is closed.
    items: RwLock<Option<Items>>,
    codec: Codec,
}

impl Shared {
    /// Remove items observed as expired.
    ///
    /// Candidates are collected under the read lock; each one is re-checked
    /// under the write lock before removal. Returns `None` once closed.
    async fn sweep(&self) -> Option<usize> {
        let now = SystemTime::now();
        let candidates: Vec<String> = {
            let guard = self.items.read().await;
            let items = guard.as_ref()?;
            items
                .iter()
                .filter(|(_, item)| item.is_expired_at(now))
                .map(|(key, _)| key.clone())
                .collect()
        };

        if candidates.is_empty() {
            return Some(0);
        }

        let mut guard = self.items.write().await;
        let items = guard.as_mut()?;
        let mut removed = 0;
        for key in candidates {
            // a set may have replaced the item since the scan
            if items.get(&key).is_some_and(|item| item.is_expired_at(now)) {
                items.remove(&key);
                removed += 1;
            }
        }
        Some(removed)
    }
}

/// Handle to the background sweep. Dropping it aborts the task.
struct Sweeper {
    stop: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        let handle = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

async fn sweep_loop(shared: Weak<Shared>, stop: Arc<Notify>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    ticker.tick().await;
    debug!("Memory sweep started (interval: {:?})", interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.notified() => break,
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        match shared.sweep().await {
            Some(0) => {}
            Some(removed) => debug!("✓ Memory SWEEP removed {} expired items", removed),
            None => break,
        }
    }

    debug!("Memory sweep stopped");
}

/// Thread-safe async in-memory cache backend.
///
/// Clones share the same map and the same sweep task. The sweep needs a
/// Tokio runtime; a store built outside one still works, but expired items
/// are then only reclaimed when read.
///
/// # Example
///
/// ```no_run
/// use cache_mux::backend::{CacheBackend, MemoryBackend};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = MemoryBackend::new();
///
///     backend.set("hits", &0i64, Duration::ZERO).await?;
///     backend.increment("hits", 1).await?;
///     assert_eq!(backend.get::<i64>("hits").await?, 1);
///
///     backend.set("token", &"abc".to_string(), Duration::from_secs(300)).await?;
///     assert!(backend.has("token").await?);
///
///     backend.close().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
    sweeper: Arc<Sweeper>,
}

impl MemoryBackend {
    /// Create a store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Create a store, starting its sweep if a Tokio runtime is available.
    pub fn with_config(config: MemoryConfig) -> Self {
        let shared = Arc::new(Shared {
            items: RwLock::new(Some(HashMap::new())),
            codec: config.codec,
        });
        let stop = Arc::new(Notify::new());
        let handle = Self::spawn_sweep(&shared, &stop, config.sweep_interval);

        MemoryBackend {
            shared,
            sweeper: Arc::new(Sweeper {
                stop,
                handle: Mutex::new(handle),
            }),
        }
    }

    fn spawn_sweep(
        shared: &Arc<Shared>,
        stop: &Arc<Notify>,
        interval: Duration,
    ) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            debug!("Memory sweep disabled");
            return None;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(sweep_loop(
                Arc::downgrade(shared),
                Arc::clone(stop),
                interval,
            ))),
            Err(_) => {
                warn!("⚠ No Tokio runtime: memory sweep not started, expired items are removed on read");
                None
            }
        }
    }

    pub fn codec(&self) -> Codec {
        self.shared.codec
    }

    /// Run one sweep now.
    ///
    /// Returns the number of expired items removed.
    pub async fn sweep(&self) -> Result<usize> {
        self.shared.sweep().await.ok_or_else(closed)
    }

    /// Stop the sweep and drop every item.
    ///
    /// Waits for the sweep task to finish. Later operations on this store (or
    /// any clone) fail with `Error::BackendError`. Closing twice is a no-op.
    pub async fn close(&self) {
        let previous = self.shared.items.write().await.take();
        self.sweeper.stop.notify_one();

        let handle = self
            .sweeper
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Memory sweep task failed: {}", e);
                }
            }
        }

        if previous.is_some() {
            info!("Memory store closed");
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.shared.items.read().await.is_none()
    }

    /// Number of stored items, expired ones included. Zero once closed.
    pub async fn len(&self) -> usize {
        self.shared
            .items
            .read()
            .await
            .as_ref()
            .map_or(0, HashMap::len)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get memory statistics.
    pub async fn stats(&self) -> CacheStats {
        let now = SystemTime::now();
        let guard = self.shared.items.read().await;
        let Some(items) = guard.as_ref() else {
            return CacheStats::default();
        };

        CacheStats {
            total_entries: items.len(),
            expired_entries: items.values().filter(|i| i.is_expired_at(now)).count(),
            total_bytes: items.values().map(|i| i.data().len()).sum(),
        }
    }

    /// Print cache statistics to debug log.
    pub async fn log_stats(&self) {
        let stats = self.stats().await;
        debug!(
            "Cache Stats: {} entries ({} expired), {} bytes",
            stats.total_entries, stats.expired_entries, stats.total_bytes
        );
    }

    /// Remove `key` if it is still expired under the write lock.
    async fn evict_expired(&self, key: &str) {
        let mut guard = self.shared.items.write().await;
        if let Some(items) = guard.as_mut() {
            if items.get(key).is_some_and(|item| item.is_expired()) {
                items.remove(key);
                debug!("✓ Memory EVICT {} (expired)", key);
            }
        }
    }

    async fn mutate(&self, key: &str, step: Step) -> Result<()> {
        let mut guard = self.shared.items.write().await;
        let items = guard.as_mut().ok_or_else(closed)?;
        let next = mutate(items.get(key), step, self.shared.codec)?;
        items.insert(key.to_string(), next);
        debug!("✓ Memory {:?} {}", step, key);
        Ok(())
    }

    #[cfg(test)]
    async fn insert_item(&self, key: &str, item: CacheItem<Payload>) {
        if let Some(items) = self.shared.items.write().await.as_mut() {
            items.insert(key.to_string(), item);
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn closed() -> Error {
    Error::BackendError("memory store is closed".to_string())
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Any + Sync,
    {
        let item = CacheItem::new(Payload::encode(value, self.shared.codec)?, ttl);

        let mut guard = self.shared.items.write().await;
        guard
            .as_mut()
            .ok_or_else(closed)?
            .insert(key.to_string(), item);

        if ttl.is_zero() {
            debug!("✓ Memory SET {}", key);
        } else {
            debug!("✓ Memory SET {} (TTL: {:?})", key, ttl);
        }
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        {
            let guard = self.shared.items.read().await;
            let items = guard.as_ref().ok_or_else(closed)?;
            match items.get(key) {
                None => {
                    debug!("✓ Memory GET {} -> MISS", key);
                    return Err(Error::KeyNotFound(key.to_string()));
                }
                Some(item) if !item.is_expired() => {
                    debug!("✓ Memory GET {} -> HIT", key);
                    return item.data().decode(self.shared.codec);
                }
                Some(_) => {}
            }
        }

        self.evict_expired(key).await;
        debug!("✓ Memory GET {} -> EXPIRED", key);
        Err(Error::KeyExpired(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut guard = self.shared.items.write().await;
        guard.as_mut().ok_or_else(closed)?.remove(key);
        debug!("✓ Memory DELETE {}", key);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let guard = self.shared.items.read().await;
        let items = guard.as_ref().ok_or_else(closed)?;
        Ok(items.get(key).is_some_and(|item| !item.is_expired()))
    }

    async fn increment(&self, key: &str, step: i64) -> Result<()> {
        self.mutate(key, Step::Up(step)).await
    }

    async fn decrement(&self, key: &str, step: i64) -> Result<()> {
        self.mutate(key, Step::Down(step)).await
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self.shared.items.write().await;
        guard.as_mut().ok_or_else(closed)?.clear();
        warn!("⚠ Memory CLEAR executed - all items removed!");
        Ok(())
    }
}

/// Cache statistics.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unswept() -> MemoryBackend {
        MemoryBackend::with_config(MemoryConfig::default().with_sweep_interval(Duration::ZERO))
    }

    #[tokio::test]
    async fn test_memory_backend_set_get() {
        let backend = MemoryBackend::new();

        backend
            .set("key1", &"value1".to_string(), Duration::ZERO)
            .await
            .expect("Failed to set");

        let result: String = backend.get("key1").await.expect("Failed to get");
        assert_eq!(result, "value1");
    }

    #[tokio::test]
    async fn test_memory_backend_miss() {
        let backend = MemoryBackend::new();

        let result = backend.get::<String>("nonexistent").await;
        assert!(matches!(result, Err(Error::KeyNotFound(key)) if key == "nonexistent"));
    }

    #[tokio::test]
    async fn test_memory_backend_wrong_type_is_corrupt() {
        let backend = MemoryBackend::new();
        backend
            .set("key1", &"text".to_string(), Duration::ZERO)
            .await
            .expect("Failed to set");

        let result = backend.get::<Vec<String>>("key1").await;
        assert!(result.unwrap_err().is_corrupt());
    }

    #[tokio::test]
    async fn test_memory_backend_delete() {
        let backend = MemoryBackend::new();

        backend
            .set("key1", &1u8, Duration::ZERO)
            .await
            .expect("Failed to set");
        assert!(backend.has("key1").await.expect("Failed to check has"));

        backend.delete("key1").await.expect("Failed to delete");
        assert!(!backend.has("key1").await.expect("Failed to check has"));

        // deleting an absent key is not an error
        backend.delete("key1").await.expect("Failed to delete twice");
    }

    #[tokio::test]
    async fn test_memory_backend_ttl_expiration() {
        let backend = unswept();

        backend
            .set("key1", &"value1".to_string(), Duration::from_millis(100))
            .await
            .expect("Failed to set");

        assert!(backend.get::<String>("key1").await.is_ok());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!backend.has("key1").await.expect("Failed to check has"));
        let result = backend.get::<String>("key1").await;
        assert!(matches!(result, Err(Error::KeyExpired(key)) if key == "key1"));

        // the expired read removed the item
        assert_eq!(backend.len().await, 0);
        assert!(matches!(
            backend.get::<String>("key1").await,
            Err(Error::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_backend_never_expires() {
        let backend = unswept();
        let long_ago = SystemTime::now() - Duration::from_secs(86_400 * 365 * 100);
        let payload = Payload::encode(&"kept".to_string(), backend.codec()).unwrap();
        backend
            .insert_item("forever", CacheItem::stamped(payload, Duration::ZERO, long_ago))
            .await;

        assert!(backend.has("forever").await.unwrap());
        assert_eq!(backend.get::<String>("forever").await.unwrap(), "kept");
        assert_eq!(backend.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_backend_get_multi() {
        let backend = MemoryBackend::new();

        backend
            .set("key1", &"value1".to_string(), Duration::ZERO)
            .await
            .expect("Failed to set");
        backend
            .set("key2", &"value2".to_string(), Duration::ZERO)
            .await
            .expect("Failed to set");

        let results = backend.get_multi::<String>(&["key1", "key2", "key3"]).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results.values()[0].as_deref(), Some("value1"));
        assert_eq!(results.values()[1].as_deref(), Some("value2"));
        assert_eq!(results.values()[2], None);
        assert_eq!(results.failures().len(), 1);
        assert_eq!(results.failures()[0].0, "key3");
    }

    #[tokio::test]
    async fn test_memory_backend_clear() {
        let backend = MemoryBackend::new();

        backend.set("key1", &1i32, Duration::ZERO).await.unwrap();
        backend.set("key2", &2i32, Duration::ZERO).await.unwrap();
        assert_eq!(backend.len().await, 2);

        backend.clear().await.expect("Failed to clear");

        assert_eq!(backend.len().await, 0);
        assert!(!backend.has("key1").await.unwrap());
        assert!(!backend.has("key2").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_backend_increment_decrement() {
        let backend = MemoryBackend::new();

        backend.set("n", &10u32, Duration::ZERO).await.unwrap();
        backend.increment("n", 5).await.unwrap();
        assert_eq!(backend.get::<u32>("n").await.unwrap(), 15);

        backend.decrement("n", 15).await.unwrap();
        assert_eq!(backend.get::<u32>("n").await.unwrap(), 0);

        assert!(matches!(
            backend.decrement("n", 1).await,
            Err(Error::Underflow)
        ));
        assert_eq!(backend.get::<u32>("n").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_backend_increment_overflow_leaves_value() {
        let backend = MemoryBackend::new();

        backend.set("max", &i32::MAX, Duration::ZERO).await.unwrap();
        assert!(matches!(
            backend.increment("max", 1).await,
            Err(Error::Overflow)
        ));
        assert_eq!(backend.get::<i32>("max").await.unwrap(), i32::MAX);
    }

    #[tokio::test]
    async fn test_memory_backend_increment_not_integer() {
        let backend = MemoryBackend::new();

        backend
            .set("s", &"10".to_string(), Duration::ZERO)
            .await
            .unwrap();
        assert!(matches!(
            backend.increment("s", 1).await,
            Err(Error::NotIntegerType)
        ));
        assert_eq!(backend.get::<String>("s").await.unwrap(), "10");

        backend.set("f", &1.5f64, Duration::ZERO).await.unwrap();
        assert!(matches!(
            backend.decrement("f", 1).await,
            Err(Error::NotIntegerType)
        ));
    }

    #[tokio::test]
    async fn test_memory_backend_increment_absent_key() {
        let backend = MemoryBackend::new();

        backend.increment("fresh", 3).await.unwrap();
        assert_eq!(backend.get::<i64>("fresh").await.unwrap(), 3);

        backend.decrement("negative", 3).await.unwrap();
        assert_eq!(backend.get::<i64>("negative").await.unwrap(), -3);
    }

    #[tokio::test]
    async fn test_memory_backend_increment_expired_key_restarts() {
        let backend = unswept();

        backend
            .set("n", &100i64, Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        backend.increment("n", 1).await.unwrap();
        assert_eq!(backend.get::<i64>("n").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_backend_increment_keeps_deadline() {
        let backend = unswept();

        backend
            .set("c", &0i64, Duration::from_millis(300))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        backend.increment("c", 1).await.unwrap();
        assert_eq!(backend.get::<i64>("c").await.unwrap(), 1);

        // past the original deadline, not the increment time plus ttl
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(
            backend.get::<i64>("c").await,
            Err(Error::KeyExpired(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_backend_concurrent_increments() {
        let backend = MemoryBackend::new();
        backend.set("counter", &0i64, Duration::ZERO).await.unwrap();

        let mut handles = vec![];
        for _ in 0..10 {
            let b = backend.clone();
            handles.push(tokio::spawn(async move {
                b.increment("counter", 1).await.expect("Failed to increment");
            }));
        }
        for handle in handles {
            handle.await.expect("Task failed");
        }

        assert_eq!(backend.get::<i64>("counter").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_memory_backend_sweep_removes_expired() {
        let backend = MemoryBackend::with_config(
            MemoryConfig::default().with_sweep_interval(Duration::from_millis(20)),
        );

        backend
            .set("short", &1i32, Duration::from_millis(10))
            .await
            .unwrap();
        backend.set("long", &2i32, Duration::ZERO).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        // removed without anyone reading it
        assert_eq!(backend.len().await, 1);
        assert_eq!(backend.get::<i32>("long").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_memory_backend_manual_sweep() {
        let backend = unswept();

        backend
            .set("a", &1i32, Duration::from_millis(10))
            .await
            .unwrap();
        backend
            .set("b", &2i32, Duration::from_millis(10))
            .await
            .unwrap();
        backend
            .set("c", &3i32, Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stats = backend.stats().await;
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.expired_entries, 2);

        assert_eq!(backend.sweep().await.unwrap(), 2);
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_backend_close() {
        let backend = MemoryBackend::with_config(
            MemoryConfig::default().with_sweep_interval(Duration::from_millis(10)),
        );
        let other = backend.clone();
        backend.set("key", &1i32, Duration::ZERO).await.unwrap();

        backend.close().await;

        assert!(other.is_closed().await);
        assert_eq!(other.len().await, 0);
        assert!(matches!(
            other.get::<i32>("key").await,
            Err(Error::BackendError(_))
        ));
        assert!(other.set("key", &1i32, Duration::ZERO).await.is_err());
        assert!(backend.sweep().await.is_err());

        // closing twice is harmless
        backend.close().await;
    }

    #[test]
    fn test_memory_backend_without_runtime() {
        let backend = MemoryBackend::new();

        futures::executor::block_on(async {
            backend.set("key", &7u64, Duration::ZERO).await.unwrap();
            backend.increment("key", 1).await.unwrap();
            assert_eq!(backend.get::<u64>("key").await.unwrap(), 8);
        });
    }

    #[tokio::test]
    async fn test_memory_backend_stats() {
        let backend = MemoryBackend::new();

        backend
            .set("key1", &"value_with_data".to_string(), Duration::ZERO)
            .await
            .unwrap();
        backend
            .set("key2", &"data".to_string(), Duration::ZERO)
            .await
            .unwrap();

        let stats = backend.stats().await;
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 0);
        assert!(stats.total_bytes > 0);
    }

    #[tokio::test]
    async fn test_memory_backend_clone_shares_store() {
        let backend1 = MemoryBackend::new();
        backend1
            .set("key", &"value".to_string(), Duration::ZERO)
            .await
            .unwrap();

        let backend2 = backend1.clone();
        assert_eq!(backend2.get::<String>("key").await.unwrap(), "value");
    }

    #[tokio::test]
    async fn test_memory_backend_json_codec() {
        let backend =
            MemoryBackend::with_config(MemoryConfig::default().with_codec(Codec::Json));
        backend.set("n", &41usize, Duration::ZERO).await.unwrap();
        backend.increment("n", 1).await.unwrap();
        assert_eq!(backend.get::<usize>("n").await.unwrap(), 42);
    }
}
