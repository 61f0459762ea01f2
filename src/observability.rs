//! Observability and metrics collection for cache operations.
//!
//! Implement [`CacheMetrics`] to collect cache statistics for your monitoring
//! system and hand it to [`Registry::with_metrics`](crate::Registry::with_metrics):
//!
//! ```ignore
//! use cache_mux::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, _store: &str, _key: &str, _duration: Duration) {
//!         // counter!("cache_hits").inc();
//!         // histogram!("cache_latency").record(duration);
//!     }
//!     // ... implement other methods
//! }
//!
//! // let registry = Registry::new()
//! //     .extend(MemoryBackend::new())
//! //     .with_metrics(Arc::new(PrometheusMetrics));
//! ```
//!
//! The registry defaults to [`NoOpMetrics`]. [`LogMetrics`] keeps the default
//! trait methods, which report every event through the `log` crate.
//!
//! # Metrics Methods
//!
//! - `record_hit()` - Read served from the store
//! - `record_miss()` - Read of an absent or expired key
//! - `record_set()` - Write, including increments and remember fills
//! - `record_delete()` - Delete or pull
//! - `record_error()` - Any other failure
//!
//! All methods receive the store name and the cache key.

use std::time::Duration;

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Record a cache hit.
    fn record_hit(&self, store: &str, key: &str, duration: Duration) {
        debug!("Cache HIT: {}/{} took {:?}", store, key, duration);
    }

    /// Record a cache miss.
    fn record_miss(&self, store: &str, key: &str, duration: Duration) {
        debug!("Cache MISS: {}/{} took {:?}", store, key, duration);
    }

    /// Record a cache set operation.
    fn record_set(&self, store: &str, key: &str, duration: Duration) {
        debug!("Cache SET: {}/{} took {:?}", store, key, duration);
    }

    /// Record a cache delete operation.
    fn record_delete(&self, store: &str, key: &str, duration: Duration) {
        debug!("Cache DELETE: {}/{} took {:?}", store, key, duration);
    }

    /// Record an error.
    fn record_error(&self, store: &str, key: &str, error: &str) {
        warn!("Cache ERROR for {}/{}: {}", store, key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _store: &str, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _store: &str, _key: &str, _duration: Duration) {}
    fn record_set(&self, _store: &str, _key: &str, _duration: Duration) {}
    fn record_delete(&self, _store: &str, _key: &str, _duration: Duration) {}
    fn record_error(&self, _store: &str, _key: &str, _error: &str) {}
}

/// Metrics reported through the `log` crate.
#[derive(Clone, Default)]
pub struct LogMetrics;

impl CacheMetrics for LogMetrics {}
