//! Pluggable codecs with versioned envelopes.
//!
//! Every record a byte-oriented store persists goes through a [`Codec`]. The
//! codec is chosen once per store instance and wraps the payload in a
//! versioned envelope so foreign or stale bytes are rejected instead of being
//! misread.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  magic: [u8; 4] │ version: u32    │  payload: T              │
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "CMUX"              envelope version   codec-specific encoding
//! ```
//!
//! # Example
//!
//! ```rust
//! use cache_mux::serialization::Codec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! # fn main() -> cache_mux::Result<()> {
//! let user = User { id: 1, name: "Alice".to_string() };
//!
//! for codec in [Codec::Postcard, Codec::Json] {
//!     let bytes = codec.encode(&user)?;
//!     let decoded: User = codec.decode(&bytes)?;
//!     assert_eq!(user, decoded);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic header for records written by this crate: b"CMUX"
pub const CACHE_MAGIC: [u8; 4] = *b"CMUX";

/// Current envelope version.
///
/// Increment when the persisted item record changes shape. Records written
/// with another version fail with `Error::VersionMismatch`.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope around every encoded record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be b"CMUX"
    pub magic: [u8; 4],
    /// Envelope version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// The encoded record
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    /// Create a new envelope with current magic and version.
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }

    fn validate(self) -> Result<T> {
        if self.magic != CACHE_MAGIC {
            log::warn!(
                "Invalid cache entry: expected magic {:?}, got {:?}",
                CACHE_MAGIC,
                self.magic
            );
            return Err(Error::CorruptEntry(format!(
                "Invalid magic: expected {:?}, got {:?}",
                CACHE_MAGIC, self.magic
            )));
        }

        if self.version != CURRENT_SCHEMA_VERSION {
            log::warn!(
                "Cache version mismatch: expected {}, got {}",
                CURRENT_SCHEMA_VERSION,
                self.version
            );
            return Err(Error::VersionMismatch {
                expected: CURRENT_SCHEMA_VERSION,
                found: self.version,
            });
        }

        Ok(self.payload)
    }
}

/// Codec used by a store to turn records into bytes and back.
///
/// Fixed per store instance; records written by one codec are rejected as
/// corrupt by the other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Codec {
    /// Compact binary encoding (default).
    #[default]
    Postcard,

    /// Self-describing JSON, convenient when inspecting stored files by hand.
    Json,
}

impl Codec {
    /// Encode a value inside a versioned envelope.
    ///
    /// # Errors
    ///
    /// Returns `Error::SerializationError` if the value cannot be encoded.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let envelope = CacheEnvelope::new(value);
        let encoded = match self {
            Codec::Postcard => postcard::to_allocvec(&envelope).map_err(|e| e.to_string()),
            Codec::Json => serde_json::to_vec(&envelope).map_err(|e| e.to_string()),
        };
        encoded.map_err(|e| {
            log::error!("Cache serialization failed ({}): {}", self, e);
            Error::SerializationError(e)
        })
    }

    /// Decode and validate a value written by [`Codec::encode`].
    ///
    /// # Errors
    ///
    /// - `Error::CorruptEntry`: undecodable bytes or bad magic header
    /// - `Error::VersionMismatch`: envelope version mismatch
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let envelope: CacheEnvelope<T> = match self {
            Codec::Postcard => postcard::from_bytes(bytes).map_err(|e| e.to_string()),
            Codec::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
        }
        .map_err(|e| {
            log::error!("Cache deserialization failed ({}): {}", self, e);
            Error::CorruptEntry(e)
        })?;

        envelope.validate()
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::Postcard => write!(f, "postcard"),
            Codec::Json => write!(f, "json"),
        }
    }
}
