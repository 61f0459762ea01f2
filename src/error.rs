//! Error types for cache stores and the registry.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations.
///
/// `KeyNotFound` and `KeyExpired` are ordinary outcomes a caller branches on
/// (see [`Error::is_miss`]). `NoSuchStore` is a registry misconfiguration and
/// should never be retried.
#[derive(Debug, Clone)]
pub enum Error {
    /// The key is absent from the store.
    KeyNotFound(String),

    /// The key is present but its item is past `expires_at` and not
    /// never-expiring.
    KeyExpired(String),

    /// Stored bytes are present but could not be decoded.
    ///
    /// Common causes:
    /// - Bad envelope magic (bytes were not written by this crate)
    /// - Truncated or otherwise malformed payload
    /// - Reading a value back as a type it was not written as
    ///
    /// **Recovery:** Delete the entry and recompute.
    CorruptEntry(String),

    /// The stored record was written with a different envelope version.
    ///
    /// **Recovery:** Delete the entry and recompute.
    VersionMismatch {
        /// Version this build writes and expects
        expected: u32,
        /// Version found in the stored record
        found: u32,
    },

    /// Encoding a value for storage failed.
    SerializationError(String),

    /// Numeric mutation would exceed the maximum of the stored integer kind.
    Overflow,

    /// Numeric mutation would go below the minimum of the stored integer kind
    /// (zero for unsigned kinds).
    Underflow,

    /// Numeric mutation target is not a supported integer kind.
    NotIntegerType,

    /// Registry resolution failed: no store is registered under this name.
    NoSuchStore(String),

    /// Aggregated per-key failures of a multi-key read.
    ///
    /// Message format: `key [k] error: <cause>` entries joined by `"; "`.
    MultiKeyError(String),

    /// Backend storage error (I/O, Redis, Memcached, closed store).
    ///
    /// **Recovery:** Retry the operation or fall back to the source of truth.
    BackendError(String),

    /// Invalid backend configuration.
    ConfigError(String),
}

impl Error {
    /// `true` for `KeyNotFound` and `KeyExpired`.
    pub fn is_miss(&self) -> bool {
        matches!(self, Error::KeyNotFound(_) | Error::KeyExpired(_))
    }

    /// `true` when stored bytes could not be decoded.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::CorruptEntry(_) | Error::VersionMismatch { .. })
    }

    /// `true` for programmer errors that must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::NoSuchStore(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::KeyNotFound(key) => write!(f, "Key not found: {}", key),
            Error::KeyExpired(key) => write!(f, "Key expired: {}", key),
            Error::CorruptEntry(msg) => write!(f, "Corrupt cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::Overflow => write!(f, "Numeric mutation would overflow"),
            Error::Underflow => write!(f, "Numeric mutation would underflow"),
            Error::NotIntegerType => {
                write!(f, "Stored value is not an integer (i32, i64, isize, u32, u64, usize)")
            }
            Error::NoSuchStore(name) => write!(f, "No such store: {}", name),
            Error::MultiKeyError(msg) => write!(f, "Multi-key error: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(format!("Redis error: {}", e))
    }
}
