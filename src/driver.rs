//! Driver - Tagged Cache Entry Protocol
//!
//! One protocol over every storage engine: load, save, remove, touch,
//! counters and tag invalidation, with a stampede lock on expired entries.
//!
//! # Entry states
//!
//! | state | stored record | `load` | `load_with_lock` |
//! |---|---|---|---|
//! | absent | none | miss | miss |
//! | fresh | `now < expires_at` or no expiry | data | data |
//! | stale, unlocked | `now >= expires_at` | miss | take lock, miss |
//! | stale, locked | `now >= expires_at` | miss | stale data |
//!
//! Unless `native_expires` is set, records are kept by the backend until the
//! lifetime ceiling, so a stale value stays readable while one caller
//! recomputes it.
//!
//! # Example
//!
//! ```rust
//! use tagged_cache::{Driver, DriverConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> tagged_cache::CacheResult<()> {
//! let driver = Driver::connect(DriverConfig::default()).await?;
//!
//! driver
//!     .save(&vec![1, 2, 3], "numbers", &["lists"], Some(Duration::from_secs(60)))
//!     .await?;
//! let numbers: Option<Vec<i32>> = driver.load("numbers").await?;
//! assert_eq!(numbers, Some(vec![1, 2, 3]));
//!
//! driver.remove_by_tags(&["lists"]).await?;
//! assert!(!driver.contains("numbers").await?);
//! # Ok(())
//! # }
//! ```

use crate::builder::DriverBuilder;
use crate::clock::{Clock, ttl_secs};
use crate::codecs::Serializer;
use crate::config::{DriverConfig, TagMatch};
use crate::entry::{EntryHeader, EntryState, Record, encode_record, is_record, parse_counter};
use crate::error::{CacheError, CacheResult};
use crate::tag_index::TagIndex;
use crate::traits::{CacheCodec, StorageAdapter, TagIndexKind};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Value written under a stampede lock key
const LOCK_VALUE: &[u8] = b"1";

/// Driver statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Fresh entries served
    pub hits: u64,
    /// Lookups answered with a miss (absent, stale, or lock won)
    pub misses: u64,
    /// Stale entries served because another caller holds the lock
    pub stale_served: u64,
    /// Stampede locks taken by this driver
    pub locks_acquired: u64,
    /// Successful `save` calls
    pub saves: u64,
    /// Entries removed, directly or by tag
    pub removals: u64,
    /// Errors swallowed because `throw_errors` is off
    pub degraded_errors: u64,
}

impl DriverStats {
    /// Share of lookups served with data (fresh or stale), in percent
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_served;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            (served as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
    locks_acquired: AtomicU64,
    saves: AtomicU64,
    removals: AtomicU64,
    degraded_errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// A stored entry classified against the current time
enum Lookup<'a> {
    Absent,
    Fresh(Record<'a>),
    Stale(Record<'a>),
}

/// Tagged cache driver over one storage adapter
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Driver {
    config: DriverConfig,
    storage: Arc<dyn StorageAdapter>,
    serializer: Serializer,
    tags: TagIndex,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl Driver {
    /// Assemble a driver over an existing adapter.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if the configuration is invalid or
    /// names a serializer whose feature is disabled.
    pub fn new(
        config: DriverConfig,
        storage: Arc<dyn StorageAdapter>,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        config.validate()?;
        let serializer = Serializer::from_kind(config.serializer)?;
        let tags = TagIndex::new(storage.tag_index_kind(), config.max_lifetime());

        info!(
            backend = storage.name(),
            serializer = serializer.name(),
            tag_index = ?tags.kind(),
            atomic_increment = storage.atomic_increment(),
            throw_errors = config.throw_errors,
            "Cache driver initialized"
        );

        Ok(Self {
            config,
            storage,
            serializer,
            tags,
            clock,
            counters: Counters::default(),
        })
    }

    /// Build the backend named by `config.backend` and a driver over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the backend
    /// cannot be reached.
    pub async fn connect(config: DriverConfig) -> CacheResult<Self> {
        DriverBuilder::new().config(config).build().await
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Underlying adapter
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> DriverStats {
        let c = &self.counters;
        DriverStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            stale_served: c.stale_served.load(Ordering::Relaxed),
            locks_acquired: c.locks_acquired.load(Ordering::Relaxed),
            saves: c.saves.load(Ordering::Relaxed),
            removals: c.removals.load(Ordering::Relaxed),
            degraded_errors: c.degraded_errors.load(Ordering::Relaxed),
        }
    }

    /// Whether the backend answers.
    pub async fn health_check(&self) -> bool {
        self.storage.health_check().await
    }

    // ===== Public protocol =====

    /// Load a fresh entry. Stale and absent entries are misses.
    ///
    /// # Errors
    ///
    /// Returns validation errors always; backend and decode errors only
    /// when `throw_errors` is on.
    pub async fn load<T: DeserializeOwned>(&self, id: &str) -> CacheResult<Option<T>> {
        let result = self.load_entry(id, None).await;
        self.degrade("load", id, result, None)
    }

    /// Load with stampede protection.
    ///
    /// On a stale entry the first caller takes a lock for `lock_timeout` and
    /// gets a miss, which means "recompute and `save`". Every other caller
    /// gets the stale data until the lock expires or `save` releases it. A
    /// zero timeout behaves like [`load`](Self::load).
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load). The lock key (id plus `lock_suffix`) is
    /// validated only when a lock is attempted, so an id that fits the
    /// backend's key limit but leaves no room for the suffix fails with a
    /// validation error on its first stale read.
    pub async fn load_with_lock<T: DeserializeOwned>(
        &self,
        id: &str,
        lock_timeout: Duration,
    ) -> CacheResult<Option<T>> {
        let result = self.load_entry(id, Some(lock_timeout)).await;
        self.degrade("load", id, result, None)
    }

    /// Load several entries at once, without stampede protection.
    ///
    /// The result has one `(id, value)` pair per input id, in input order,
    /// duplicates included; unknown ids map to `None`.
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load). With `throw_errors` off a failing batch
    /// yields all misses and a corrupt item yields a miss for that item.
    pub async fn load_many<T: DeserializeOwned>(
        &self,
        ids: &[&str],
    ) -> CacheResult<Vec<(String, Option<T>)>> {
        let result = self.load_many_entries(ids).await;
        let fallback = ids.iter().map(|id| ((*id).to_string(), None)).collect();
        self.degrade("load_many", "", result, fallback)
    }

    /// Store `data` under `id` with `tags`.
    ///
    /// `lifetime` of `None` or zero means no expiration; any lifetime is
    /// capped at the configured ceiling. Tag memberships are written before
    /// the entry, and the entry's stampede lock is released afterwards.
    ///
    /// # Errors
    ///
    /// Returns validation errors for bad ids or tags; backend and encode
    /// errors only when `throw_errors` is on.
    pub async fn save<T: Serialize + ?Sized>(
        &self,
        data: &T,
        id: &str,
        tags: &[&str],
        lifetime: Option<Duration>,
    ) -> CacheResult<bool> {
        let result = self.save_entry(data, id, tags, lifetime).await;
        self.degrade("save", id, result, false)
    }

    /// Remove an entry and its tag memberships.
    ///
    /// Succeeds without I/O for an empty id and as a no-op for absent ones.
    ///
    /// # Errors
    ///
    /// As [`save`](Self::save).
    pub async fn remove(&self, id: &str) -> CacheResult<bool> {
        if id.is_empty() {
            return Ok(true);
        }
        let result = match self.entry_key(id) {
            Ok(key) => self.remove_key(&key).await,
            Err(err) => Err(err),
        };
        self.degrade("remove", id, result, false)
    }

    /// Remove every entry carrying the given tags, then the tags themselves.
    ///
    /// Multiple tags combine as configured by `tag_match` (union by
    /// default). With intersection only the matched entries go; tag records
    /// keep their other members.
    ///
    /// # Errors
    ///
    /// As [`save`](Self::save).
    pub async fn remove_by_tags(&self, tags: &[&str]) -> CacheResult<bool> {
        let result = self.remove_tagged(tags).await;
        self.degrade("remove_by_tags", &tags.join(","), result, false)
    }

    /// Extend a fresh entry's expiration by `extra`.
    ///
    /// The new expiration never passes `created_at + max_lifetime`. Entries
    /// without expiration are left alone and report success. Absent and
    /// stale entries report `false`.
    ///
    /// # Errors
    ///
    /// As [`save`](Self::save).
    pub async fn touch(&self, id: &str, extra: Duration) -> CacheResult<bool> {
        let result = self.touch_entry(id, extra).await;
        self.degrade("touch", id, result, false)
    }

    /// Add `value` to the bare counter `id`, returning the new value.
    ///
    /// Missing or non-integer values count as 0. Counters carry no tags
    /// and no expiration. Atomic only where the adapter reports
    /// [`atomic_increment`](StorageAdapter::atomic_increment).
    ///
    /// # Errors
    ///
    /// As [`save`](Self::save). A degraded failure returns 0.
    pub async fn increment(&self, id: &str, value: i64) -> CacheResult<i64> {
        let result = self.add_to_counter(id, value).await;
        self.degrade("increment", id, result, 0)
    }

    /// Subtract `value` from the bare counter `id`, returning the new value.
    ///
    /// # Errors
    ///
    /// As [`increment`](Self::increment).
    pub async fn decrement(&self, id: &str, value: i64) -> CacheResult<i64> {
        let result = self.add_to_counter(id, value.saturating_neg()).await;
        self.degrade("decrement", id, result, 0)
    }

    /// Current value of the bare counter `id` (0 if missing).
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load).
    pub async fn counter(&self, id: &str) -> CacheResult<i64> {
        let result = match self.entry_key(id) {
            Ok(key) => self
                .storage
                .get(&key)
                .await
                .map(|bytes| bytes.map_or(0, |b| parse_counter(&b))),
            Err(err) => Err(err),
        };
        self.degrade("counter", id, result, 0)
    }

    /// Whether `load(id)` would return data.
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load).
    pub async fn contains(&self, id: &str) -> CacheResult<bool> {
        let result = self.contains_entry(id).await;
        self.degrade("contains", id, result, false)
    }

    /// Drop everything the backend holds.
    ///
    /// # Errors
    ///
    /// Backend errors only when `throw_errors` is on.
    pub async fn flush(&self) -> CacheResult<bool> {
        let result = self.storage.flush_all().await;
        if matches!(result, Ok(true)) {
            info!(backend = self.storage.name(), "Cache flushed");
        }
        self.degrade("flush", "", result, false)
    }

    /// Load `id`, computing and saving it when this caller should.
    ///
    /// Runs `compute` on a miss or when this caller wins the stampede lock
    /// on a stale entry, saves the result with `tags` and `lifetime`, and
    /// returns it. A caller losing the lock race gets the stale value.
    ///
    /// # Errors
    ///
    /// Returns `compute`'s error, or cache errors converted into `E`. A
    /// backend failure while saving the computed value is logged, not
    /// returned.
    pub async fn load_or_compute<T, E, F, Fut>(
        &self,
        id: &str,
        lock_timeout: Duration,
        tags: &[&str],
        lifetime: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.load_with_lock(id, lock_timeout).await? {
            return Ok(value);
        }

        debug!(id = %id, "Computing value");
        let value = compute().await?;

        match self.save(&value, id, tags, lifetime).await {
            Ok(_) => {}
            Err(err) if err.is_degradable() => {
                warn!(id = %id, error = %err, "Failed to cache computed value");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(value)
    }

    // ===== Protocol internals =====

    async fn load_entry<T: DeserializeOwned>(
        &self,
        id: &str,
        lock_timeout: Option<Duration>,
    ) -> CacheResult<Option<T>> {
        if id.is_empty() {
            return Ok(None);
        }
        let key = self.entry_key(id)?;
        let lock_timeout = lock_timeout.filter(|timeout| !timeout.is_zero());

        let Some(bytes) = self.storage.get(&key).await? else {
            bump(&self.counters.misses);
            return Ok(None);
        };

        match self.classify(&bytes)? {
            Lookup::Absent => {
                bump(&self.counters.misses);
                Ok(None)
            }
            Lookup::Fresh(record) => {
                bump(&self.counters.hits);
                Ok(Some(self.serializer.decode(record.data)?))
            }
            Lookup::Stale(record) => {
                let Some(timeout) = lock_timeout else {
                    bump(&self.counters.misses);
                    debug!(id = %id, "Entry expired");
                    return Ok(None);
                };
                let lock_key = self.lock_key(id)?;

                if self
                    .storage
                    .set_if_absent(&lock_key, LOCK_VALUE, timeout)
                    .await?
                {
                    bump(&self.counters.locks_acquired);
                    bump(&self.counters.misses);
                    debug!(id = %id, lock_secs = timeout.as_secs(), "Stampede lock acquired, caller recomputes");
                    Ok(None)
                } else {
                    bump(&self.counters.stale_served);
                    debug!(id = %id, "Entry locked by another caller, serving stale value");
                    Ok(Some(self.serializer.decode(record.data)?))
                }
            }
        }
    }

    async fn load_many_entries<T: DeserializeOwned>(
        &self,
        ids: &[&str],
    ) -> CacheResult<Vec<(String, Option<T>)>> {
        let mut keys = Vec::with_capacity(ids.len());
        let mut positions = Vec::with_capacity(ids.len());
        for (position, id) in ids.iter().enumerate() {
            if !id.is_empty() {
                keys.push(self.entry_key(id)?);
                positions.push(position);
            }
        }

        let found = if keys.is_empty() {
            Vec::new()
        } else {
            self.storage.get_many(&keys).await?
        };

        let mut results: Vec<(String, Option<T>)> =
            ids.iter().map(|id| ((*id).to_string(), None)).collect();
        for (position, bytes) in positions.into_iter().zip(found) {
            let value = match bytes {
                Some(bytes) => {
                    let decoded = match self.classify(&bytes) {
                        Ok(Lookup::Fresh(record)) => self.serializer.decode(record.data).map(Some),
                        Ok(Lookup::Absent | Lookup::Stale(_)) => Ok(None),
                        Err(err) => Err(err),
                    };
                    let id = ids.get(position).copied().unwrap_or_default();
                    self.degrade("load_many", id, decoded, None)?
                }
                None => None,
            };

            if value.is_some() {
                bump(&self.counters.hits);
            } else {
                bump(&self.counters.misses);
            }
            if let Some(slot) = results.get_mut(position) {
                slot.1 = value;
            }
        }

        debug!(requested = ids.len(), "Loaded batch");
        Ok(results)
    }

    async fn save_entry<T: Serialize + ?Sized>(
        &self,
        data: &T,
        id: &str,
        tags: &[&str],
        lifetime: Option<Duration>,
    ) -> CacheResult<bool> {
        let key = self.entry_key(id)?;
        let tag_keys = self.tag_keys(tags)?;
        if !tag_keys.is_empty() {
            self.tags.validate_member(&key)?;
        }

        let now = self.clock.now();
        let expires_at = self.lifetime_secs(lifetime).map(|secs| now.saturating_add(secs));
        let header = EntryHeader {
            created_at: now,
            expires_at,
            tags: tag_keys,
        };
        let payload = self.serializer.encode(data)?;
        let record = encode_record(&header, &payload, &self.serializer)?;
        let ttl = self.physical_ttl(expires_at, now);

        let stored = if self.tags.kind() == TagIndexKind::JoinTable {
            self.storage
                .write_tagged(&key, &record, Some(ttl), &header.tags)
                .await?
        } else {
            let previous = self.stored_tags(&key).await?;
            self.tags
                .add(self.storage.as_ref(), &header.tags, &key)
                .await?;
            let stored = self.storage.set(&key, &record, Some(ttl)).await?;

            let dropped: Vec<String> = previous
                .into_iter()
                .filter(|tag| !header.tags.contains(tag))
                .collect();
            if !dropped.is_empty() {
                self.tags
                    .remove(self.storage.as_ref(), &dropped, &key)
                    .await?;
            }
            stored
        };

        // No lock can exist under a key the backend rejects
        if let Ok(lock_key) = self.lock_key(id) {
            if let Err(err) = self.storage.delete(&lock_key).await {
                warn!(id = %id, error = %err, "Failed to release stampede lock");
            }
        }

        bump(&self.counters.saves);
        debug!(
            id = %id,
            tags = header.tags.len(),
            expires_at = ?expires_at,
            ttl_secs = ttl.as_secs(),
            "Saved entry"
        );
        Ok(stored)
    }

    /// Remove by full entry key. Absent entries count as removed.
    async fn remove_key(&self, key: &str) -> CacheResult<bool> {
        if self.tags.kind() == TagIndexKind::JoinTable {
            if self.storage.delete_tagged(key).await? {
                bump(&self.counters.removals);
            }
            return Ok(true);
        }

        let tags = self.stored_tags(key).await?;
        if self.storage.delete(key).await? {
            bump(&self.counters.removals);
        }
        self.tags.remove(self.storage.as_ref(), &tags, key).await?;
        debug!(key = %key, tags = tags.len(), "Removed entry");
        Ok(true)
    }

    async fn remove_tagged(&self, tags: &[&str]) -> CacheResult<bool> {
        let tag_keys = self.tag_keys(tags)?;
        if tag_keys.is_empty() {
            return Ok(true);
        }

        let keys = self
            .tags
            .resolve(self.storage.as_ref(), &tag_keys, self.config.tag_match)
            .await?;
        for key in &keys {
            self.remove_key(key).await?;
        }
        if self.config.tag_match == TagMatch::Any {
            self.tags.clear(self.storage.as_ref(), &tag_keys).await;
        }

        info!(tags = ?tags, removed = keys.len(), mode = ?self.config.tag_match, "Removed entries by tag");
        Ok(true)
    }

    async fn touch_entry(&self, id: &str, extra: Duration) -> CacheResult<bool> {
        let key = self.entry_key(id)?;
        let Some(bytes) = self.storage.get(&key).await? else {
            return Ok(false);
        };

        let record = match self.classify(&bytes)? {
            Lookup::Fresh(record) => record,
            Lookup::Absent | Lookup::Stale(_) => return Ok(false),
        };
        let Some(expires_at) = record.header.expires_at else {
            return Ok(true);
        };

        let now = self.clock.now();
        let ceiling = record.header.created_at.saturating_add(self.max_secs());
        let extended = expires_at.saturating_add(ttl_secs(extra)).min(ceiling);
        let header = EntryHeader {
            expires_at: Some(extended),
            ..record.header
        };
        let rewritten = encode_record(&header, record.data, &self.serializer)?;

        let ttl = if self.config.native_expires {
            self.physical_ttl(Some(extended), now)
        } else {
            self.storage
                .ttl(&key)
                .await?
                .unwrap_or_else(|| self.config.max_lifetime())
        };
        let stored = self.storage.set(&key, &rewritten, Some(ttl)).await?;

        debug!(id = %id, expires_at = extended, "Touched entry");
        Ok(stored)
    }

    async fn add_to_counter(&self, id: &str, delta: i64) -> CacheResult<i64> {
        let key = self.entry_key(id)?;
        if !self.storage.atomic_increment() {
            debug!(
                id = %id,
                backend = self.storage.name(),
                "Counter update is read-modify-write, concurrent updates may be lost"
            );
        }
        self.storage.incr_by(&key, delta).await
    }

    async fn contains_entry(&self, id: &str) -> CacheResult<bool> {
        if id.is_empty() {
            return Ok(false);
        }
        let key = self.entry_key(id)?;
        let Some(bytes) = self.storage.get(&key).await? else {
            return Ok(false);
        };
        Ok(matches!(self.classify(&bytes)?, Lookup::Fresh(_)))
    }

    // ===== Helpers =====

    fn classify<'a>(&self, bytes: &'a [u8]) -> CacheResult<Lookup<'a>> {
        if !is_record(bytes) {
            return Ok(Lookup::Absent);
        }
        let record = Record::parse(bytes, &self.serializer)?;
        Ok(match record.header.state(self.clock.now()) {
            EntryState::Fresh => Lookup::Fresh(record),
            EntryState::Stale => Lookup::Stale(record),
        })
    }

    /// Tags recorded in the entry currently stored at `key`
    async fn stored_tags(&self, key: &str) -> CacheResult<Vec<String>> {
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(Vec::new());
        };
        if !is_record(&bytes) {
            return Ok(Vec::new());
        }
        match Record::parse(&bytes, &self.serializer) {
            Ok(record) => Ok(record.header.tags),
            Err(err) => {
                warn!(key = %key, error = %err, "Unreadable entry header, tag memberships left as is");
                Ok(Vec::new())
            }
        }
    }

    fn entry_key(&self, id: &str) -> CacheResult<String> {
        if id.is_empty() {
            return Err(CacheError::validation(id, "id must not be empty"));
        }
        let key = self.config.entry_key(id);
        self.storage.validate_key(&key)?;
        Ok(key)
    }

    fn lock_key(&self, id: &str) -> CacheResult<String> {
        let key = self.config.lock_key(id);
        self.storage.validate_key(&key)?;
        Ok(key)
    }

    /// Prefixed, validated, de-duplicated tag keys
    fn tag_keys(&self, tags: &[&str]) -> CacheResult<Vec<String>> {
        let mut keys: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if tag.is_empty() {
                return Err(CacheError::validation(*tag, "tag must not be empty"));
            }
            let key = self.config.tag_key(tag);
            self.storage.validate_key(&key)?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn max_secs(&self) -> i64 {
        i64::try_from(self.config.max_lifetime_secs).unwrap_or(i64::MAX)
    }

    /// Logical lifetime in seconds, `None` for entries that never expire
    fn lifetime_secs(&self, lifetime: Option<Duration>) -> Option<i64> {
        lifetime
            .filter(|lifetime| !lifetime.is_zero())
            .map(|lifetime| ttl_secs(lifetime).min(self.max_secs()))
    }

    /// How long the backend keeps the record
    fn physical_ttl(&self, expires_at: Option<i64>, now: i64) -> Duration {
        match expires_at {
            Some(expires_at) if self.config.native_expires => {
                Duration::from_secs((expires_at - now).max(1).unsigned_abs())
            }
            _ => self.config.max_lifetime(),
        }
    }

    /// Apply the `throw_errors` policy to an operation result
    fn degrade<T>(
        &self,
        operation: &'static str,
        id: &str,
        result: CacheResult<T>,
        fallback: T,
    ) -> CacheResult<T> {
        match result {
            Err(err) if !self.config.throw_errors && err.is_degradable() => {
                bump(&self.counters.degraded_errors);
                warn!(
                    operation,
                    id = %id,
                    backend = self.storage.name(),
                    error = %err,
                    "Cache operation failed, degrading"
                );
                Ok(fallback)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryStorage;
    use crate::clock::ManualClock;
    use async_trait::async_trait;

    fn driver(config: DriverConfig) -> (Driver, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let storage = Arc::new(MemoryStorage::with_clock(Arc::new(clock.clone())));
        let driver = Driver::new(config, storage, Arc::new(clock.clone())).unwrap();
        (driver, clock)
    }

    /// Adapter whose every call fails like a dropped connection
    struct Unreachable;

    #[async_trait]
    impl StorageAdapter for Unreachable {
        async fn get(&self, _: &str) -> CacheResult<Option<Vec<u8>>> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn set(&self, _: &str, _: &[u8], _: Option<Duration>) -> CacheResult<bool> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn set_if_absent(&self, _: &str, _: &[u8], _: Duration) -> CacheResult<bool> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn delete(&self, _: &str) -> CacheResult<bool> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn expire(&self, _: &str, _: Duration) -> CacheResult<bool> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn ttl(&self, _: &str) -> CacheResult<Option<Duration>> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn incr_by(&self, _: &str, _: i64) -> CacheResult<i64> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn set_members(&self, _: &str) -> CacheResult<Vec<String>> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn flush_all(&self) -> CacheResult<bool> {
            Err(CacheError::Backend("connection refused".into()))
        }
        fn validate_key(&self, key: &str) -> CacheResult<()> {
            if key.contains(' ') {
                return Err(CacheError::validation(key, "whitespace"));
            }
            Ok(())
        }
        fn tag_index_kind(&self) -> TagIndexKind {
            TagIndexKind::NativeSet
        }
        fn atomic_increment(&self) -> bool {
            true
        }
    }

    fn unreachable(throw_errors: bool) -> Driver {
        let config = DriverConfig::default().with_throw_errors(throw_errors);
        Driver::new(config, Arc::new(Unreachable), Arc::new(ManualClock::new(0))).unwrap()
    }

    #[tokio::test]
    async fn test_lifetime_capped_at_ceiling() {
        let config = DriverConfig::default().with_max_lifetime(Duration::from_secs(100));
        let (driver, clock) = driver(config);
        driver
            .save("v", "long", &[], Some(Duration::from_secs(10_000)))
            .await
            .unwrap();

        clock.advance(99);
        assert!(driver.contains("long").await.unwrap());
        clock.advance(1);
        assert!(!driver.contains("long").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_lifetime_never_expires() {
        let (driver, clock) = driver(DriverConfig::default());
        driver
            .save(&1, "forever", &[], Some(Duration::ZERO))
            .await
            .unwrap();
        clock.advance(86_400);
        assert_eq!(driver.load::<i32>("forever").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_native_expires_drops_stale_records() {
        let (driver, clock) = driver(DriverConfig::default().with_native_expires(true));
        driver
            .save(&1, "short", &[], Some(Duration::from_secs(5)))
            .await
            .unwrap();
        clock.advance(5);
        // the backend already dropped it, so there is nothing stale to serve
        let value: Option<i32> = driver
            .load_with_lock("short", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(value, None);
        assert!(
            driver
                .storage()
                .get("short")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_save_releases_lock() {
        let (driver, clock) = driver(DriverConfig::default());
        driver
            .save(&1, "hot", &[], Some(Duration::from_secs(1)))
            .await
            .unwrap();
        clock.advance(2);

        let lock = Duration::from_secs(30);
        assert_eq!(driver.load_with_lock::<i32>("hot", lock).await.unwrap(), None);
        driver
            .save(&2, "hot", &[], Some(Duration::from_secs(1)))
            .await
            .unwrap();
        clock.advance(2);

        // lock was released by save, so the next stale read takes it again
        assert_eq!(driver.load_with_lock::<i32>("hot", lock).await.unwrap(), None);
        assert_eq!(driver.stats().locks_acquired, 2);
    }

    #[tokio::test]
    async fn test_resave_moves_tag_membership() {
        let (driver, _) = driver(DriverConfig::default());
        driver.save(&1, "e", &["old"], None).await.unwrap();
        driver.save(&2, "e", &["new"], None).await.unwrap();

        driver.remove_by_tags(&["old"]).await.unwrap();
        assert_eq!(driver.load::<i32>("e").await.unwrap(), Some(2));
        driver.remove_by_tags(&["new"]).await.unwrap();
        assert_eq!(driver.load::<i32>("e").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_touch_bounded_by_creation() {
        let config = DriverConfig::default().with_max_lifetime(Duration::from_secs(60));
        let (driver, clock) = driver(config);
        driver
            .save(&1, "t", &[], Some(Duration::from_secs(30)))
            .await
            .unwrap();

        assert!(driver.touch("t", Duration::from_secs(1_000)).await.unwrap());
        clock.advance(59);
        assert!(driver.contains("t").await.unwrap());
        clock.advance(1);
        assert!(!driver.contains("t").await.unwrap());
        assert!(!driver.touch("t", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_counter_is_not_an_entry() {
        let (driver, _) = driver(DriverConfig::default());
        driver.increment("views", 3).await.unwrap();
        assert_eq!(driver.counter("views").await.unwrap(), 3);
        assert_eq!(driver.load::<i64>("views").await.unwrap(), None);
        assert!(!driver.contains("views").await.unwrap());
        assert!(driver.remove("views").await.unwrap());
        assert_eq!(driver.counter("views").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_errors_propagate_when_throwing() {
        let driver = unreachable(true);
        let err = driver.load::<i32>("a").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Backend);
        assert!(driver.save(&1, "a", &[], None).await.is_err());
    }

    #[tokio::test]
    async fn test_errors_degrade_when_not_throwing() {
        let driver = unreachable(false);
        assert_eq!(driver.load::<i32>("a").await.unwrap(), None);
        assert!(!driver.save(&1, "a", &["t"], None).await.unwrap());
        assert!(!driver.remove("a").await.unwrap());
        assert!(!driver.remove_by_tags(&["t"]).await.unwrap());
        assert!(!driver.touch("a", Duration::from_secs(1)).await.unwrap());
        assert_eq!(driver.increment("n", 1).await.unwrap(), 0);
        assert!(!driver.contains("a").await.unwrap());
        assert!(!driver.flush().await.unwrap());

        let batch = driver.load_many::<i32>(&["a", "b"]).await.unwrap();
        assert_eq!(batch, vec![("a".to_string(), None), ("b".to_string(), None)]);
        assert_eq!(driver.stats().degraded_errors, 9);
    }

    #[tokio::test]
    async fn test_validation_errors_never_degrade() {
        let driver = unreachable(false);
        let err = driver.load::<i32>("has space").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
        let err = driver.save(&1, "ok", &["bad tag"], None).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
        let err = driver.save(&1, "", &[], None).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[test]
    fn test_hit_rate() {
        let stats = DriverStats {
            hits: 3,
            stale_served: 1,
            misses: 4,
            ..DriverStats::default()
        };
        assert!((stats.hit_rate() - 50.0).abs() < f64::EPSILON);
        assert!(DriverStats::default().hit_rate().abs() < f64::EPSILON);
    }
}
