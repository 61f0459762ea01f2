//! Cache items: a value plus its TTL bookkeeping.
//!
//! An item is stamped once, when written. `expires_at` is computed at that
//! moment and persisted, so reading an item later never recomputes its
//! deadline from a fresh clock. A ttl of zero (or [`INDEFINITE_TTL`]) marks
//! the item never-expiring through an explicit flag; the numeric ttl is then
//! replaced by [`INDEFINITE_TTL`] so it stays meaningful when inspected.
//!
//! # Example
//!
//! ```rust
//! use cache_mux::item::{CacheItem, Lookup};
//! use cache_mux::serialization::Codec;
//! use std::time::Duration;
//!
//! # fn main() -> cache_mux::Result<()> {
//! let bytes = CacheItem::write("hello".to_string(), Duration::from_secs(60), Codec::Postcard)?;
//!
//! match CacheItem::<String>::read(&bytes, Codec::Postcard)? {
//!     Lookup::Live(item) => assert_eq!(item.data(), "hello"),
//!     Lookup::Expired(_) => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::numeric::{Kind, Numeric};
use crate::serialization::Codec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::time::{Duration, SystemTime};

/// Stand-in ttl recorded for never-expiring items (20 years).
pub const INDEFINITE_TTL: Duration = Duration::from_secs(86_400 * 365 * 20);

/// One stored value with its expiration bookkeeping.
///
/// Fields are private: an item is never patched, only replaced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheItem<T> {
    data: T,
    ttl: Duration,
    created_at: SystemTime,
    expires_at: SystemTime,
    never_expires: bool,
}

impl<T> CacheItem<T> {
    /// Stamp a new item at the current time.
    pub fn new(data: T, ttl: Duration) -> Self {
        Self::stamped(data, ttl, SystemTime::now())
    }

    /// Stamp a new item at an explicit creation time.
    pub fn stamped(data: T, ttl: Duration, created_at: SystemTime) -> Self {
        let never_expires = ttl.is_zero() || ttl == INDEFINITE_TTL;
        let ttl = if never_expires { INDEFINITE_TTL } else { ttl };

        match created_at.checked_add(ttl) {
            Some(expires_at) => CacheItem {
                data,
                ttl,
                created_at,
                expires_at,
                never_expires,
            },
            // ttl runs past the end of representable time
            None => CacheItem {
                data,
                ttl: INDEFINITE_TTL,
                created_at,
                expires_at: created_at
                    .checked_add(INDEFINITE_TTL)
                    .unwrap_or(created_at),
                never_expires: true,
            },
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Recorded ttl ([`INDEFINITE_TTL`] for never-expiring items).
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The ttl a caller would pass to `set` to get an equivalent item:
    /// zero for never-expiring items.
    pub fn requested_ttl(&self) -> Duration {
        if self.never_expires {
            Duration::ZERO
        } else {
            self.ttl
        }
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    pub fn never_expires(&self) -> bool {
        self.never_expires
    }

    /// Whether the item is expired at `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        !self.never_expires && self.expires_at < now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Time left before expiry; `None` for never-expiring items.
    pub fn remaining(&self) -> Option<Duration> {
        if self.never_expires {
            return None;
        }
        Some(
            self.expires_at
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO),
        )
    }

    /// A new item holding `data` with this item's ttl and deadline.
    ///
    /// The creation time carries over, so replacing the data never moves
    /// `expires_at`.
    pub fn replaced<U>(&self, data: U) -> CacheItem<U> {
        CacheItem::stamped(data, self.requested_ttl(), self.created_at)
    }

    /// Convert the data while keeping every timestamp.
    pub(crate) fn try_map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<CacheItem<U>> {
        Ok(CacheItem {
            data: f(self.data)?,
            ttl: self.ttl,
            created_at: self.created_at,
            expires_at: self.expires_at,
            never_expires: self.never_expires,
        })
    }
}

impl<T: Serialize> CacheItem<T> {
    /// Stamp `data` now and encode the full record.
    ///
    /// # Errors
    ///
    /// Returns `Error::SerializationError` if encoding fails.
    pub fn write(data: T, ttl: Duration, codec: Codec) -> Result<Vec<u8>> {
        CacheItem::new(data, ttl).encode(codec)
    }

    /// Encode this record as is.
    pub fn encode(&self, codec: Codec) -> Result<Vec<u8>> {
        codec.encode(self)
    }
}

impl<T: DeserializeOwned> CacheItem<T> {
    /// Decode a record and check it against the current time.
    ///
    /// The item is returned even when expired so the caller can decide to
    /// delete it and report the expiry.
    ///
    /// # Errors
    ///
    /// Returns `Error::CorruptEntry` or `Error::VersionMismatch` when the
    /// bytes do not decode.
    pub fn read(bytes: &[u8], codec: Codec) -> Result<Lookup<T>> {
        let item: CacheItem<T> = codec.decode(bytes)?;
        Ok(Lookup::check(item))
    }
}

/// Outcome of reading an item: live or expired, with the item either way.
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup<T> {
    Live(CacheItem<T>),
    Expired(CacheItem<T>),
}

impl<T> Lookup<T> {
    /// Classify an item against the current time.
    pub fn check(item: CacheItem<T>) -> Self {
        Self::check_at(item, SystemTime::now())
    }

    pub fn check_at(item: CacheItem<T>, now: SystemTime) -> Self {
        if item.is_expired_at(now) {
            Lookup::Expired(item)
        } else {
            Lookup::Live(item)
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Lookup::Expired(_))
    }

    pub fn item(&self) -> &CacheItem<T> {
        match self {
            Lookup::Live(item) | Lookup::Expired(item) => item,
        }
    }

    pub fn into_item(self) -> CacheItem<T> {
        match self {
            Lookup::Live(item) | Lookup::Expired(item) => item,
        }
    }

    /// The item if live, `Error::KeyExpired(key)` otherwise.
    pub fn live(self, key: &str) -> Result<CacheItem<T>> {
        match self {
            Lookup::Live(item) => Ok(item),
            Lookup::Expired(_) => Err(Error::KeyExpired(key.to_string())),
        }
    }
}

/// A stored value as the stores see it: codec-encoded bytes plus the integer
/// kind captured when the value was written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    kind: Kind,
    bytes: Vec<u8>,
}

impl Payload {
    /// Encode a caller value, recording its integer kind if it has one.
    pub fn encode<T: Serialize + Any>(value: &T, codec: Codec) -> Result<Self> {
        Ok(Payload {
            kind: Numeric::of(value).kind(),
            bytes: codec.encode(value)?,
        })
    }

    /// Encode an integer produced by the mutator.
    pub fn from_numeric(value: Numeric, codec: Codec) -> Result<Self> {
        match value {
            Numeric::I32(v) => Self::encode(&v, codec),
            Numeric::I64(v) => Self::encode(&v, codec),
            Numeric::Isize(v) => Self::encode(&v, codec),
            Numeric::U32(v) => Self::encode(&v, codec),
            Numeric::U64(v) => Self::encode(&v, codec),
            Numeric::Usize(v) => Self::encode(&v, codec),
            Numeric::Unsupported => Err(Error::NotIntegerType),
        }
    }

    /// Decode the value as `T`.
    pub fn decode<T: DeserializeOwned>(&self, codec: Codec) -> Result<T> {
        codec.decode(&self.bytes)
    }

    /// Rebuild the stored integer for the mutator.
    pub fn numeric(&self, codec: Codec) -> Result<Numeric> {
        Ok(match self.kind {
            Kind::I32 => Numeric::I32(self.decode(codec)?),
            Kind::I64 => Numeric::I64(self.decode(codec)?),
            Kind::Isize => Numeric::Isize(self.decode(codec)?),
            Kind::U32 => Numeric::U32(self.decode(codec)?),
            Kind::U64 => Numeric::U64(self.decode(codec)?),
            Kind::Usize => Numeric::Usize(self.decode(codec)?),
            Kind::Opaque => Numeric::Unsupported,
        })
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Size of the encoded value in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl CacheItem<Payload> {
    /// Decode the payload as `T`, keeping the item's timestamps.
    pub fn decode_data<T: DeserializeOwned>(self, codec: Codec) -> Result<CacheItem<T>> {
        self.try_map(|payload| payload.decode(codec))
    }
}
