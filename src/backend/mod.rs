//! Cache backend implementations.

use crate::error::{Error, Result};
use crate::item::{CacheItem, Lookup, Payload};
use crate::numeric::{self, Numeric};
use crate::serialization::Codec;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::time::Duration;

#[cfg(feature = "file")]
pub mod file;
pub mod memory;
#[cfg(feature = "memcached")]
pub mod memcached;
#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "file")]
pub use file::{FileBackend, FileConfig};
#[cfg(feature = "memcached")]
pub use memcached::{MemcachedBackend, MemcachedConfig};
pub use memory::{CacheStats, MemoryBackend, MemoryConfig};
#[cfg(feature = "redis")]
pub use redis::{PoolStats, RedisBackend, RedisConfig};

/// Trait for cache backend implementations.
///
/// Every store, local or remote, exposes the same operations and the same
/// error vocabulary: `KeyNotFound`, `KeyExpired`, `CorruptEntry`, `Overflow`,
/// `Underflow`, `NotIntegerType`.
///
/// **IMPORTANT:** All methods use `&self` instead of `&mut self` to allow concurrent access.
/// Backend implementations use interior mutability (RwLock, Mutex, or external storage),
/// and clones share the same underlying store.
///
/// **ASYNC:** All methods are async and must be awaited.
#[allow(async_fn_in_trait)]
pub trait CacheBackend: Send + Sync + Clone {
    /// Name the registry uses when none is given at registration.
    fn name(&self) -> &str;

    /// Store `value` under `key`, replacing any previous item.
    ///
    /// A `ttl` of zero (or [`crate::INDEFINITE_TTL`]) stores a never-expiring item.
    async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Any + Sync;

    /// Retrieve the value under `key`.
    ///
    /// # Errors
    /// - `Error::KeyNotFound`: the key is absent
    /// - `Error::KeyExpired`: the item is past its expiry; it is removed
    /// - `Error::CorruptEntry`: stored bytes do not decode as `T`
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T>;

    /// Retrieve several keys, each independently.
    ///
    /// Default implementation runs `get()` for every key concurrently.
    /// Override for batch efficiency (e.g., Redis MGET).
    async fn get_multi<T: DeserializeOwned>(&self, keys: &[&str]) -> MultiGet<T> {
        let outcomes = join_all(keys.iter().map(|key| self.get::<T>(key))).await;
        let mut results = MultiGet::with_capacity(keys.len());
        for (key, outcome) in keys.iter().zip(outcomes) {
            results.push(key, outcome);
        }
        results
    }

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// `true` iff `get` would find a live item.
    async fn has(&self, key: &str) -> Result<bool>;

    /// Add `step` to the integer stored under `key`.
    ///
    /// An absent (or expired) key counts as zero: the result is written as a
    /// never-expiring `i64`. A present item keeps its requested ttl.
    ///
    /// # Errors
    /// - `Error::Overflow` / `Error::Underflow`: the stored kind cannot hold the result
    /// - `Error::NotIntegerType`: the stored value is not an integer
    ///
    /// Stored state is unchanged on error.
    async fn increment(&self, key: &str, step: i64) -> Result<()>;

    /// Subtract `step` from the integer stored under `key`.
    ///
    /// Same absent-key policy and errors as [`CacheBackend::increment`].
    async fn decrement(&self, key: &str, step: i64) -> Result<()>;

    /// Remove every item in this store.
    async fn clear(&self) -> Result<()>;
}

/// Result of a multi-key read.
///
/// `values` is positionally aligned with the requested keys; a slot is `None`
/// when its key failed. Failures are kept per key and folded into one
/// aggregate error by [`MultiGet::error`].
#[derive(Debug)]
pub struct MultiGet<T> {
    values: Vec<Option<T>>,
    failures: Vec<(String, Error)>,
}

impl<T> MultiGet<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        MultiGet {
            values: Vec::with_capacity(capacity),
            failures: Vec::new(),
        }
    }

    /// Append the outcome for the next key.
    pub fn push(&mut self, key: &str, result: Result<T>) {
        match result {
            Ok(value) => self.values.push(Some(value)),
            Err(e) => {
                self.values.push(None);
                self.failures.push((key.to_string(), e));
            }
        }
    }

    pub fn values(&self) -> &[Option<T>] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Option<T>> {
        self.values
    }

    /// Per-key failures, in request order.
    pub fn failures(&self) -> &[(String, Error)] {
        &self.failures
    }

    /// Aggregate of every per-key failure, `None` when all keys succeeded.
    pub fn error(&self) -> Option<Error> {
        if self.failures.is_empty() {
            return None;
        }
        let message = self
            .failures
            .iter()
            .map(|(key, e)| format!("key [{}] error: {}", key, e))
            .collect::<Vec<_>>()
            .join("; ");
        Some(Error::MultiKeyError(message))
    }

    /// Values and aggregate error together.
    pub fn into_parts(self) -> (Vec<Option<T>>, Option<Error>) {
        let error = self.error();
        (self.values, error)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Direction and size of a numeric mutation.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Step {
    Up(i64),
    Down(i64),
}

impl Step {
    fn apply(self, value: Numeric) -> Result<Numeric> {
        match self {
            Step::Up(step) => numeric::increment(value, step),
            Step::Down(step) => numeric::decrement(value, step),
        }
    }
}

/// Build the replacement item for an increment or decrement.
///
/// Shared by every backend so the absent-key policy is the same everywhere.
pub(crate) fn mutate(
    current: Option<&CacheItem<Payload>>,
    step: Step,
    codec: Codec,
) -> Result<CacheItem<Payload>> {
    match current.filter(|item| !item.is_expired()) {
        Some(item) => {
            let next = step.apply(item.data().numeric(codec)?)?;
            Ok(item.replaced(Payload::from_numeric(next, codec)?))
        }
        // absent counts as zero, written without expiry
        None => {
            let next = step.apply(Numeric::I64(0))?;
            Ok(CacheItem::new(
                Payload::from_numeric(next, codec)?,
                Duration::ZERO,
            ))
        }
    }
}

/// Decode raw bytes fetched from a byte-oriented store.
pub(crate) fn read_raw(
    key: &str,
    raw: Option<Vec<u8>>,
    codec: Codec,
) -> Result<Lookup<Payload>> {
    match raw {
        Some(bytes) => CacheItem::read(&bytes, codec),
        None => Err(Error::KeyNotFound(key.to_string())),
    }
}

/// Any of the built-in backends, selected at registration time.
///
/// This is the default store type of [`crate::Registry`], so stores of
/// different kinds can sit in one registry.
#[derive(Clone)]
pub enum Backend {
    Memory(MemoryBackend),
    #[cfg(feature = "file")]
    File(FileBackend),
    #[cfg(feature = "redis")]
    Redis(RedisBackend),
    #[cfg(feature = "memcached")]
    Memcached(MemcachedBackend),
}

macro_rules! dispatch {
    ($self:ident, $backend:ident => $call:expr) => {
        match $self {
            Backend::Memory($backend) => $call,
            #[cfg(feature = "file")]
            Backend::File($backend) => $call,
            #[cfg(feature = "redis")]
            Backend::Redis($backend) => $call,
            #[cfg(feature = "memcached")]
            Backend::Memcached($backend) => $call,
        }
    };
}

impl CacheBackend for Backend {
    fn name(&self) -> &str {
        dispatch!(self, b => b.name())
    }

    async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Any + Sync,
    {
        dispatch!(self, b => b.set(key, value, ttl).await)
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        dispatch!(self, b => b.get(key).await)
    }

    async fn get_multi<T: DeserializeOwned>(&self, keys: &[&str]) -> MultiGet<T> {
        dispatch!(self, b => b.get_multi(keys).await)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        dispatch!(self, b => b.delete(key).await)
    }

    async fn has(&self, key: &str) -> Result<bool> {
        dispatch!(self, b => b.has(key).await)
    }

    async fn increment(&self, key: &str, step: i64) -> Result<()> {
        dispatch!(self, b => b.increment(key, step).await)
    }

    async fn decrement(&self, key: &str, step: i64) -> Result<()> {
        dispatch!(self, b => b.decrement(key, step).await)
    }

    async fn clear(&self) -> Result<()> {
        dispatch!(self, b => b.clear().await)
    }
}

impl From<MemoryBackend> for Backend {
    fn from(backend: MemoryBackend) -> Self {
        Backend::Memory(backend)
    }
}

#[cfg(feature = "file")]
impl From<FileBackend> for Backend {
    fn from(backend: FileBackend) -> Self {
        Backend::File(backend)
    }
}

#[cfg(feature = "redis")]
impl From<RedisBackend> for Backend {
    fn from(backend: RedisBackend) -> Self {
        Backend::Redis(backend)
    }
}

#[cfg(feature = "memcached")]
impl From<MemcachedBackend> for Backend {
    fn from(backend: MemcachedBackend) -> Self {
        Backend::Memcached(backend)
    }
}
