//! Storage and Codec Traits
//!
//! This module defines the trait abstractions every storage engine and
//! serializer plugs into.
//!
//! # Architecture
//!
//! - `CacheCodec`: Byte encoding of entry headers and values
//! - `StorageAdapter`: Primitive byte-level operations against one storage engine
//! - `TagIndexKind`: Capability telling the tag index how to keep its reverse mapping
//!
//! # Example: Custom Storage Adapter
//!
//! ```rust,ignore
//! use tagged_cache::{StorageAdapter, TagIndexKind, CacheResult, async_trait};
//! use std::time::Duration;
//!
//! struct MyStore {
//!     // Your implementation
//! }
//!
//! #[async_trait]
//! impl StorageAdapter for MyStore {
//!     async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
//!         // Your implementation
//!     }
//!
//!     // ... set, set_if_absent, delete, expire, ttl, incr_by, flush_all
//!
//!     fn tag_index_kind(&self) -> TagIndexKind {
//!         TagIndexKind::SerializedList
//!     }
//!
//!     fn atomic_increment(&self) -> bool {
//!         false
//!     }
//! }
//! ```

use crate::error::{CacheError, CacheResult};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;

/// Byte encoding for entry headers and values
///
/// The driver encodes the header `{created_at, expires_at, tags}` and the
/// caller's value separately with the same codec, so a codec must handle any
/// `serde` type, not only the value types an application stores.
///
/// Codecs report failures through `anyhow`; the driver wraps them into
/// [`CacheError::Serialization`] / [`CacheError::Deserialization`].
///
/// ```rust,ignore
/// #[derive(Debug)]
/// struct CborCodec;
///
/// impl CacheCodec for CborCodec {
///     fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<Vec<u8>> {
///         let mut out = Vec::new();
///         ciborium::into_writer(value, &mut out)?;
///         Ok(out)
///     }
///
///     fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> anyhow::Result<T> {
///         Ok(ciborium::from_reader(bytes)?)
///     }
///
///     fn name(&self) -> &'static str {
///         "cbor"
///     }
/// }
/// ```
pub trait CacheCodec: Send + Sync + Debug {
    /// Encode `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented in this format.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode a `T` from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding of `T`.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Short codec name, logged when the driver starts.
    fn name(&self) -> &'static str;
}

/// How a backend keeps the tag → entry-keys reverse index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagIndexKind {
    /// Native unordered sets (`SADD`/`SREM`/`SMEMBERS`).
    NativeSet,
    /// One stored blob per tag holding a `|`-joined member list.
    SerializedList,
    /// A `(tag_name, entry_id)` join table written in the same
    /// transaction as the entry (`write_tagged`/`delete_tagged`).
    JoinTable,
}

/// Primitive operations required of any storage engine
///
/// Keys handed to an adapter are already prefixed. Values are opaque bytes;
/// counters written through `incr_by` are stored as ASCII decimal integers.
///
/// Optional primitives (`set_*`, `write_tagged`, `delete_tagged`) default to
/// [`CacheError::Unsupported`]; which of them a backend must provide follows
/// from its [`TagIndexKind`].
///
/// # Thread Safety
///
/// Adapters are shared as `Arc<dyn StorageAdapter>` across tasks.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Get raw bytes by key.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Get many keys at once. The result has one slot per input key, in order.
    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Store bytes, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool>;

    /// Store bytes only if the key does not exist. Returns `true` if stored.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool>;

    /// Delete a key. Returns `true` if something was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Reset the expiration of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remaining time to live. `None` for missing keys or keys without expiration.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Add `delta` to the integer stored at `key` (missing counts as 0).
    ///
    /// Atomic only when [`atomic_increment`](Self::atomic_increment) says so.
    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64>;

    /// Members of the set stored at `key`.
    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        let _ = key;
        Err(self.unsupported("set_members"))
    }

    /// Add `member` to the set stored at `key`.
    async fn set_add(&self, key: &str, member: &str) -> CacheResult<bool> {
        let _ = (key, member);
        Err(self.unsupported("set_add"))
    }

    /// Remove `member` from the set stored at `key`.
    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        let _ = (key, member);
        Err(self.unsupported("set_remove"))
    }

    /// Write an entry and its tag memberships in one transaction.
    async fn write_tagged(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
        tag_keys: &[String],
    ) -> CacheResult<bool> {
        let _ = (key, value, ttl, tag_keys);
        Err(self.unsupported("write_tagged"))
    }

    /// Delete an entry and its tag memberships in one transaction.
    async fn delete_tagged(&self, key: &str) -> CacheResult<bool> {
        let _ = key;
        Err(self.unsupported("delete_tagged"))
    }

    /// Drop everything this adapter can see.
    async fn flush_all(&self) -> CacheResult<bool>;

    /// Check if the storage engine is reachable and answering
    ///
    /// The default writes, reads back and deletes a probe key.
    async fn health_check(&self) -> bool {
        let test_key = "health_check_tagged_cache";
        let test_value = b"health_check_value";

        match self
            .set(test_key, test_value, Some(Duration::from_secs(10)))
            .await
        {
            Ok(_) => match self.get(test_key).await {
                Ok(Some(retrieved)) => {
                    let _ = self.delete(test_key).await;
                    retrieved == test_value
                }
                _ => false,
            },
            Err(_) => false,
        }
    }

    /// Reject keys this backend cannot store. Called before any I/O.
    fn validate_key(&self, key: &str) -> CacheResult<()> {
        let _ = key;
        Ok(())
    }

    /// Which tag index strategy this backend supports.
    fn tag_index_kind(&self) -> TagIndexKind;

    /// Whether `incr_by` is atomic against concurrent callers.
    fn atomic_increment(&self) -> bool;

    /// Get the name of this storage backend
    ///
    /// This is used for logging and debugging purposes.
    fn name(&self) -> &'static str {
        "unknown"
    }

    #[doc(hidden)]
    fn unsupported(&self, operation: &'static str) -> CacheError {
        CacheError::Unsupported {
            backend: self.name(),
            operation,
        }
    }
}
