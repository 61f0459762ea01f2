//! Registry of named cache stores.
//!
//! A [`Registry`] maps names to stores and resolves which store an
//! unqualified call targets: the store pinned by [`Registry::disk`], or else
//! the first one registered. Resolution walks the ordered name list, never
//! the map, so it is deterministic.
//!
//! On top of the plain store operations it adds `pull` (read then delete)
//! and `remember` (read, or compute and write). Both run under a per-key lock
//! shared by the registry and every view of it, so concurrent `remember`
//! calls on an absent key run the thunk once, even through aliased names.
//!
//! # Example
//!
//! ```no_run
//! use cache_mux::{MemoryBackend, Registry};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> cache_mux::Result<()> {
//!     let cache: Registry = Registry::new()
//!         .extend(MemoryBackend::new())
//!         .extend_as("sessions", MemoryBackend::new());
//!
//!     let greeting: String = cache
//!         .remember("greeting", Duration::from_secs(60), || "hello".to_string())
//!         .await?;
//!     assert_eq!(greeting, "hello");
//!
//!     let sessions = cache.disk("sessions");
//!     sessions.set("token", &"abc".to_string(), Duration::from_secs(300)).await?;
//!     let token: String = sessions.pull("token").await?;
//!     assert!(!sessions.has("token").await?);
//!     # let _ = token;
//!     Ok(())
//! }
//! ```

use crate::backend::{Backend, CacheBackend, MultiGet};
use crate::error::{Error, Result};
use crate::observability::{CacheMetrics, NoOpMetrics};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::{self, Future};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

type KeyLocks = DashMap<String, Arc<Mutex<()>>>;

struct Shared<B> {
    /// Names in registration order; the first one is the default.
    order: Vec<String>,
    stores: HashMap<String, B>,
    metrics: Arc<dyn CacheMetrics>,
    key_locks: KeyLocks,
}

impl<B: Clone> Clone for Shared<B> {
    fn clone(&self) -> Self {
        Shared {
            order: self.order.clone(),
            stores: self.stores.clone(),
            metrics: Arc::clone(&self.metrics),
            key_locks: DashMap::new(),
        }
    }
}

/// Named cache stores behind one handle.
///
/// Cloning is cheap and clones share every store. Stores are registered with
/// the builder methods [`Registry::extend`] and [`Registry::extend_as`]; do
/// this before handing out clones or views, since a registry that is already
/// shared gets its own copy of the name table when extended.
///
/// `B` defaults to [`Backend`], which holds any built-in store.
#[derive(Clone)]
pub struct Registry<B: CacheBackend = Backend> {
    shared: Arc<Shared<B>>,
    pinned: Option<String>,
}

#[derive(Clone, Copy)]
enum Op {
    Read,
    Write,
    Delete,
}

impl<B: CacheBackend> Registry<B> {
    /// An empty registry.
    pub fn new() -> Self {
        Registry {
            shared: Arc::new(Shared {
                order: Vec::new(),
                stores: HashMap::new(),
                metrics: Arc::new(NoOpMetrics),
                key_locks: DashMap::new(),
            }),
            pinned: None,
        }
    }

    /// A registry holding `stores`, each under its own name.
    pub fn from_stores<I>(stores: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<B>,
    {
        stores
            .into_iter()
            .fold(Self::new(), |registry, store| registry.extend(store))
    }

    /// Register a store under its own name.
    pub fn extend(self, store: impl Into<B>) -> Self {
        let store = store.into();
        let name = store.name().to_string();
        self.extend_as(name, store)
    }

    /// Register a store under `name`.
    ///
    /// Registering a name again replaces its store but keeps the name's
    /// position in resolution order.
    pub fn extend_as(mut self, name: impl Into<String>, store: impl Into<B>) -> Self {
        let name = name.into();
        let shared = Arc::make_mut(&mut self.shared);
        if shared.stores.insert(name.clone(), store.into()).is_some() {
            info!("✓ Registry replaced store {}", name);
        } else {
            info!("✓ Registry registered store {}", name);
            shared.order.push(name);
        }
        self
    }

    /// Report operations to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        Arc::make_mut(&mut self.shared).metrics = metrics;
        self
    }

    /// A view of the same stores whose unqualified calls target `name`.
    ///
    /// Never fails: an unknown name surfaces as `Error::NoSuchStore` on the
    /// view's first operation.
    pub fn disk(&self, name: impl Into<String>) -> Self {
        Registry {
            shared: Arc::clone(&self.shared),
            pinned: Some(name.into()),
        }
    }

    /// Registered names in resolution order.
    pub fn names(&self) -> &[String] {
        &self.shared.order
    }

    /// Name unqualified calls resolve to, if any.
    pub fn current_name(&self) -> Option<&str> {
        self.pinned
            .as_deref()
            .or_else(|| self.shared.order.first().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.shared.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.order.is_empty()
    }

    /// The store named `name`, or the current store when `None`.
    ///
    /// # Errors
    ///
    /// `Error::NoSuchStore` if nothing is registered under the name.
    pub fn resolve(&self, name: Option<&str>) -> Result<&B> {
        match name {
            Some(name) => self.lookup(name).map(|(_, store)| store),
            None => self.target().map(|(_, store)| store),
        }
    }

    /// The store named `name`.
    pub fn store(&self, name: &str) -> Result<&B> {
        self.resolve(Some(name))
    }

    fn lookup(&self, name: &str) -> Result<(&str, &B)> {
        self.shared
            .stores
            .get_key_value(name)
            .map(|(name, store)| (name.as_str(), store))
            .ok_or_else(|| Error::NoSuchStore(name.to_string()))
    }

    fn target(&self) -> Result<(&str, &B)> {
        match self.current_name() {
            Some(name) => self.lookup(name),
            None => Err(Error::NoSuchStore("<none registered>".to_string())),
        }
    }

    fn metrics(&self) -> &dyn CacheMetrics {
        self.shared.metrics.as_ref()
    }

    fn observe<R>(&self, op: Op, store: &str, key: &str, start: Instant, result: &Result<R>) {
        let elapsed = start.elapsed();
        match (op, result) {
            (Op::Read, Ok(_)) => self.metrics().record_hit(store, key, elapsed),
            (Op::Read, Err(e)) if e.is_miss() => self.metrics().record_miss(store, key, elapsed),
            (Op::Write, Ok(_)) => self.metrics().record_set(store, key, elapsed),
            (Op::Delete, Ok(_)) => self.metrics().record_delete(store, key, elapsed),
            (_, Err(e)) => self.metrics().record_error(store, key, &e.to_string()),
        }
    }

    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Any + Sync,
    {
        let (name, store) = self.target()?;
        let start = Instant::now();
        let result = store.set(key, value, ttl).await;
        self.observe(Op::Write, name, key, start, &result);
        result
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let (name, store) = self.target()?;
        let start = Instant::now();
        let result = store.get(key).await;
        self.observe(Op::Read, name, key, start, &result);
        result
    }

    /// Read several keys from the current store.
    ///
    /// Fails only when the store cannot be resolved; per-key failures are
    /// collected in the returned [`MultiGet`].
    pub async fn get_multi<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<MultiGet<T>> {
        let (name, store) = self.target()?;
        let results = store.get_multi(keys).await;
        debug!(
            "✓ Registry MGET {} keys from {} ({} failed)",
            keys.len(),
            name,
            results.failures().len()
        );
        Ok(results)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let (name, store) = self.target()?;
        let start = Instant::now();
        let result = store.delete(key).await;
        self.observe(Op::Delete, name, key, start, &result);
        result
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        let (_, store) = self.target()?;
        store.has(key).await
    }

    pub async fn increment(&self, key: &str, step: i64) -> Result<()> {
        let (name, store) = self.target()?;
        let start = Instant::now();
        let result = store.increment(key, step).await;
        self.observe(Op::Write, name, key, start, &result);
        result
    }

    pub async fn decrement(&self, key: &str, step: i64) -> Result<()> {
        let (name, store) = self.target()?;
        let start = Instant::now();
        let result = store.decrement(key, step).await;
        self.observe(Op::Write, name, key, start, &result);
        result
    }

    /// Clear the current store only.
    pub async fn clear(&self) -> Result<()> {
        let (_, store) = self.target()?;
        store.clear().await
    }

    /// Read `key` and delete it.
    ///
    /// When the read fails nothing is deleted and the error is returned.
    pub async fn pull<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let (name, store) = self.target()?;
        self.exclusive(key, self.take(name, store, key)).await
    }

    /// Return the live value under `key`, or compute it with `thunk`, store
    /// it for `ttl` and return it.
    ///
    /// On a hit `ttl` is ignored and `thunk` is not called. Concurrent calls
    /// for the same key, through this handle or any view of it, call `thunk`
    /// at most once between them.
    pub async fn remember<T, F>(&self, key: &str, ttl: Duration, thunk: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
        F: FnOnce() -> T,
    {
        self.remember_with(key, ttl, move || future::ready(Ok(thunk())))
            .await
    }

    /// [`Registry::remember`] with a ready value.
    pub async fn remember_value<T>(&self, key: &str, ttl: Duration, value: T) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        self.remember_with(key, ttl, move || future::ready(Ok(value)))
            .await
    }

    /// [`Registry::remember`] with an async, fallible thunk.
    ///
    /// A thunk error is returned as is and nothing is stored.
    pub async fn remember_with<T, F, Fut>(&self, key: &str, ttl: Duration, thunk: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (name, store) = self.target()?;

        let start = Instant::now();
        match store.get::<T>(key).await {
            Ok(value) => {
                self.metrics().record_hit(name, key, start.elapsed());
                return Ok(value);
            }
            Err(e) if e.is_miss() => {}
            Err(e) => {
                self.metrics().record_error(name, key, &e.to_string());
                return Err(e);
            }
        }

        self.exclusive(key, self.fill(name, store, key, ttl, thunk))
            .await
    }

    async fn take<T: DeserializeOwned>(&self, name: &str, store: &B, key: &str) -> Result<T> {
        let start = Instant::now();
        let value = store.get(key).await;
        self.observe(Op::Read, name, key, start, &value);
        let value = value?;

        let start = Instant::now();
        let deleted = store.delete(key).await;
        self.observe(Op::Delete, name, key, start, &deleted);
        deleted?;

        debug!("✓ Registry PULL {}/{}", name, key);
        Ok(value)
    }

    async fn fill<T, F, Fut>(
        &self,
        name: &str,
        store: &B,
        key: &str,
        ttl: Duration,
        thunk: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // another caller may have filled it while this one waited
        let start = Instant::now();
        let existing = store.get::<T>(key).await;
        self.observe(Op::Read, name, key, start, &existing);
        match existing {
            Ok(value) => return Ok(value),
            Err(e) if e.is_miss() => {}
            Err(e) => return Err(e),
        }

        let value = thunk().await?;

        let start = Instant::now();
        let written = store.set(key, &value, ttl).await;
        self.observe(Op::Write, name, key, start, &written);
        written?;

        debug!("✓ Registry REMEMBER {}/{} -> computed", name, key);
        Ok(value)
    }

    /// Run `work` holding the lock for `key`.
    ///
    /// Keyed by the cache key alone: names may alias one store, and stores
    /// cannot be compared, so every store shares the key's lock.
    async fn exclusive<R>(&self, key: &str, work: impl Future<Output = R>) -> R {
        let lock = self
            .shared
            .key_locks
            .entry(key.to_string())
            .or_insert_with(Default::default)
            .clone();

        let result = {
            let _guard = lock.lock().await;
            work.await
        };

        drop(lock);
        // only the map still holds it: nobody is waiting
        self.shared
            .key_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }
}

impl<B: CacheBackend> Default for Registry<B> {
    fn default() -> Self {
        Self::new()
    }
}
