//! # cache-mux
//!
//! A swappable key-value cache with per-item time-to-live.
//!
//! ## Features
//!
//! - **One contract, many stores:** in-memory, file, Redis and Memcached
//!   backends all implement [`CacheBackend`] with the same semantics
//! - **Explicit expiry:** every item records when it was written and when it
//!   expires; a zero ttl means never expires
//! - **Registry:** address several named stores through one [`Registry`]
//!   handle, with `pull` and `remember` on top
//! - **Safe counters:** `increment`/`decrement` keep the stored integer type
//!   and fail with `Overflow`/`Underflow` instead of wrapping
//!
//! ## Quick Start
//!
//! ```no_run
//! use cache_mux::{CacheBackend, MemoryBackend, Registry};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> cache_mux::Result<()> {
//!     let cache: Registry = Registry::new().extend(MemoryBackend::new());
//!
//!     cache.set("user:1", &"alice".to_string(), Duration::from_secs(300)).await?;
//!     let name: String = cache.get("user:1").await?;
//!
//!     cache.increment("visits", 1).await?;
//!     let visits: i64 = cache.get("visits").await?;
//!
//!     let report: Vec<u32> = cache
//!         .remember("report", Duration::from_secs(60), || vec![1, 2, 3])
//!         .await?;
//!     # let _ = (name, visits, report);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature flags
//!
//! - `memory` (default): in-memory store with background sweep
//! - `file` (default): one file per key under a directory
//! - `redis`: Redis store over a deadpool connection pool
//! - `memcached`: Memcached store over a deadpool connection pool

#[macro_use]
extern crate log;

pub mod backend;
pub mod error;
pub mod item;
pub mod key;
pub mod numeric;
pub mod observability;
pub mod registry;
pub mod serialization;

// Re-exports for convenience
pub use backend::{Backend, CacheBackend, MemoryBackend, MemoryConfig, MultiGet};
#[cfg(feature = "file")]
pub use backend::{FileBackend, FileConfig};
#[cfg(feature = "memcached")]
pub use backend::{MemcachedBackend, MemcachedConfig};
#[cfg(feature = "redis")]
pub use backend::{RedisBackend, RedisConfig};
pub use error::{Error, Result};
pub use item::{CacheItem, Lookup, INDEFINITE_TTL};
pub use numeric::Numeric;
pub use registry::Registry;
pub use serialization::Codec;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
