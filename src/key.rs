//! Cache key management utilities.

/// Builder for cache keys.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Prefix `key` with a namespace, as remote stores write it.
    pub fn namespaced(namespace: &str, key: &str) -> String {
        format!("{}:{}", namespace, key)
    }

    /// Hex SHA-256 of `key`, safe to use as a file name.
    #[cfg(feature = "file")]
    pub fn digest(key: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }
}
