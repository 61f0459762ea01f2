//! File-backed cache backend.
//!
//! One file per key under a root directory:
//!
//! ```text
//! <path>/<digest[0..2]>/<digest><suffix>
//! ```
//!
//! where `digest` is the hex SHA-256 of the key. Each file holds one encoded
//! [`CacheItem`] record, so expiry survives process restarts. Writes go to a
//! temporary file renamed into place, so readers never observe a half-written
//! record.

use super::{mutate, CacheBackend, Step};
use crate::error::{Error, Result};
use crate::item::{CacheItem, Lookup, Payload};
use crate::key::CacheKeyBuilder;
use crate::serialization::Codec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;

/// Default registration name.
pub const NAME: &str = "file";

/// Default suffix of cache files.
pub const DEFAULT_SUFFIX: &str = ".bin";

/// Configuration for the file backend.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Root directory; created if missing.
    pub path: PathBuf,
    /// Suffix appended to every cache file name.
    pub suffix: String,
    /// Codec for stored records.
    pub codec: Codec,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileConfig {
            path: path.into(),
            suffix: DEFAULT_SUFFIX.to_string(),
            codec: Codec::default(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
}

impl Default for FileConfig {
    /// `cache-mux` under the system temp directory.
    fn default() -> Self {
        FileConfig::new(std::env::temp_dir().join("cache-mux"))
    }
}

/// Cache backend storing one file per key.
///
/// All operations of one store (and its clones) are serialized through an
/// async `RwLock`: reads share it, writes and increments hold it exclusively.
/// Two stores opened on the same directory do not coordinate.
///
/// # Example
///
/// ```no_run
/// use cache_mux::backend::{CacheBackend, FileBackend, FileConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = FileBackend::new(FileConfig::new("/var/cache/myapp")).await?;
///
///     backend.set("report", &vec![1u32, 2, 3], Duration::from_secs(3600)).await?;
///     let report: Vec<u32> = backend.get("report").await?;
///     assert_eq!(report, vec![1, 2, 3]);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct FileBackend {
    config: Arc<FileConfig>,
    lock: Arc<RwLock<()>>,
}

impl FileBackend {
    /// Open a store rooted at `config.path`, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the directory cannot be created.
    pub async fn new(config: FileConfig) -> Result<Self> {
        fs::create_dir_all(&config.path).await.map_err(|e| {
            Error::ConfigError(format!(
                "Cannot create cache directory {}: {}",
                config.path.display(),
                e
            ))
        })?;

        info!(
            "✓ File cache initialized at {} (suffix: {:?}, codec: {})",
            config.path.display(),
            config.suffix,
            config.codec
        );

        Ok(FileBackend {
            config: Arc::new(config),
            lock: Arc::new(RwLock::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.path
    }

    /// File that holds `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = CacheKeyBuilder::digest(key);
        self.config
            .path
            .join(&digest[..2])
            .join(format!("{}{}", digest, self.config.suffix))
    }

    async fn read_item(&self, key: &str) -> Result<Lookup<Payload>> {
        let path = self.path_for(key);
        let raw = match fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                error!("File cache read failed for {}: {}", path.display(), e);
                return Err(Error::BackendError(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        super::read_raw(key, raw, self.config.codec)
    }

    async fn write_item(&self, key: &str, item: &CacheItem<Payload>) -> Result<()> {
        let path = self.path_for(key);
        let bytes = item.encode(self.config.codec)?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        let staged = match fs::write(&staging, &bytes).await {
            Ok(()) => fs::rename(&staging, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = staged {
            error!("File cache write failed for {}: {}", path.display(), e);
            // the staging file must not outlive a failed write
            if let Err(cleanup) = fs::remove_file(&staging).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!("⚠ Failed to remove {}: {}", staging.display(), cleanup);
                }
            }
            return Err(Error::BackendError(format!(
                "Failed to write {}: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::BackendError(format!(
                "Failed to delete key {}: {}",
                key, e
            ))),
        }
    }

    async fn mutate(&self, key: &str, step: Step) -> Result<()> {
        let _guard = self.lock.write().await;
        let current = match self.read_item(key).await {
            Ok(lookup) => Some(lookup.into_item()),
            Err(Error::KeyNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let next = mutate(current.as_ref(), step, self.config.codec)?;
        self.write_item(key, &next).await?;
        debug!("✓ File {:?} {}", step, key);
        Ok(())
    }
}

impl CacheBackend for FileBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Any + Sync,
    {
        let item = CacheItem::new(Payload::encode(value, self.config.codec)?, ttl);

        let _guard = self.lock.write().await;
        self.write_item(key, &item).await?;
        debug!("✓ File SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        {
            let _guard = self.lock.read().await;
            match self.read_item(key).await {
                Ok(Lookup::Live(item)) => {
                    debug!("✓ File GET {} -> HIT", key);
                    return item.data().decode(self.config.codec);
                }
                Ok(Lookup::Expired(_)) => {}
                Err(e) => {
                    debug!("✓ File GET {} -> {}", key, e);
                    return Err(e);
                }
            }
        }

        let _guard = self.lock.write().await;
        // a set may have landed between the two locks
        if let Ok(Lookup::Expired(_)) = self.read_item(key).await {
            self.remove_item(key).await?;
        }
        debug!("✓ File GET {} -> EXPIRED", key);
        Err(Error::KeyExpired(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        self.remove_item(key).await?;
        debug!("✓ File DELETE {}", key);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.read().await;
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

    async fn clear(&self) -> Result<()> {
        let _guard = self.lock.write().await;
        match fs::remove_dir_all(&self.config.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.config.path).await?;
        warn!(
            "⚠ File CLEAR executed - removed all items under {}",
            self.config.path.display()
        );
        Ok(())
    }
}
