//! Memory Storage - Concurrent `HashMap` Backend
//!
//! An in-process store using `DashMap` for concurrent access. Values are
//! either byte strings or native sets, so tags use the set-native strategy
//! and counters are atomic (each update holds the key's shard lock).
//!
//! Expiration is tracked in unix seconds read from the configured
//! [`Clock`]; expired keys are dropped lazily on access or by
//! [`MemoryStorage::cleanup_expired`].

use crate::backends::BackendStats;
use crate::clock::{Clock, SystemClock, ttl_secs};
use crate::entry::try_parse_counter;
use crate::error::{CacheError, CacheResult};
use crate::traits::{StorageAdapter, TagIndexKind};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Stored payload
#[derive(Debug, Clone)]
enum Slot {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
}

/// Value with expiration tracking
#[derive(Debug, Clone)]
struct StoredValue {
    slot: Slot,
    expires_at: Option<i64>,
}

impl StoredValue {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::Backend(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value"
    ))
}

/// Concurrent in-process storage using `DashMap`
///
/// **Use Case**: single-process deployments, tests, local development
///
/// **Features**:
/// - Lock-free concurrent reads, per-shard locked writes
/// - Native sets for the tag index
/// - Atomic `incr_by`
/// - Clock-driven TTL, so expiry can be tested without sleeping
///
/// **Limitations**:
/// - No eviction policy and no size limit
/// - Expired keys linger until touched or cleaned up
///
/// **Example**:
/// ```rust
/// use tagged_cache::backends::MemoryStorage;
/// use tagged_cache::StorageAdapter;
/// use std::time::Duration;
///
/// # async fn example() -> tagged_cache::CacheResult<()> {
/// let store = MemoryStorage::new();
/// store.set("user:1", b"alice", Some(Duration::from_secs(60))).await?;
/// assert_eq!(store.get("user:1").await?, Some(b"alice".to_vec()));
/// # Ok(())
/// # }
/// ```
pub struct MemoryStorage {
    /// Concurrent `HashMap`
    map: Arc<DashMap<String, StoredValue>>,
    /// Time source for expiry
    clock: Arc<dyn Clock>,
    /// Hit counter
    hits: Arc<AtomicU64>,
    /// Miss counter
    misses: Arc<AtomicU64>,
    /// Set counter
    sets: Arc<AtomicU64>,
}

impl MemoryStorage {
    /// Create new memory storage on the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create new memory storage reading time from `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        info!("Initializing Memory Storage (concurrent HashMap)");

        Self {
            map: Arc::new(DashMap::new()),
            clock,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
        }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| self.clock.now().saturating_add(ttl_secs(ttl)))
    }

    /// Remove expired keys, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.map.retain(|_, value| {
            if value.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(count = removed, "[Memory] Cleaned up expired keys");
        }
        removed
    }

    /// Number of stored keys, expired ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if storage is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Hit/miss/set counters
    #[must_use]
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = self.clock.now();
        let found = match self.map.get(key) {
            Some(value) if value.is_expired(now) => {
                drop(value); // release read lock before removing
                self.map.remove_if(key, |_, v| v.is_expired(now));
                None
            }
            Some(value) => match &value.slot {
                Slot::Bytes(bytes) => Some(bytes.clone()),
                Slot::Set(_) => return Err(wrong_type(key)),
            },
            None => None,
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        let stored = StoredValue {
            slot: Slot::Bytes(value.to_vec()),
            expires_at: self.expiry(ttl),
        };
        self.map.insert(key.to_string(), stored);
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl_secs = ?ttl.map(|t| t.as_secs()), "[Memory] Stored key");
        Ok(true)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        let now = self.clock.now();
        let stored = StoredValue {
            slot: Slot::Bytes(value.to_vec()),
            expires_at: self.expiry(Some(ttl)),
        };

        let inserted = match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(stored);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(stored);
                true
            }
        };
        if inserted {
            self.sets.fetch_add(1, Ordering::Relaxed);
        }
        Ok(inserted)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = self.clock.now();
        Ok(self
            .map
            .remove(key)
            .is_some_and(|(_, value)| !value.is_expired(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let now = self.clock.now();
        let expires_at = self.expiry(Some(ttl));
        match self.map.entry(key.to_string()) {
            Entry::Occupied(occupied) if occupied.get().is_expired(now) => {
                occupied.remove();
                Ok(false)
            }
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().expires_at = expires_at;
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = self.clock.now();
        Ok(self.map.get(key).and_then(|value| {
            value
                .expires_at
                .filter(|expires_at| *expires_at > now)
                .map(|expires_at| Duration::from_secs((expires_at - now).unsigned_abs()))
        }))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let now = self.clock.now();
        match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let value = occupied.get_mut();
                if value.is_expired(now) {
                    *value = StoredValue {
                        slot: Slot::Bytes(delta.to_string().into_bytes()),
                        expires_at: None,
                    };
                    return Ok(delta);
                }
                match &mut value.slot {
                    Slot::Bytes(bytes) => {
                        // A non-counter value is replaced by a counter without expiry
                        let next = match try_parse_counter(bytes) {
                            Some(current) => current.saturating_add(delta),
                            None => {
                                value.expires_at = None;
                                delta
                            }
                        };
                        *bytes = next.to_string().into_bytes();
                        Ok(next)
                    }
                    Slot::Set(_) => Err(wrong_type(key)),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue {
                    slot: Slot::Bytes(delta.to_string().into_bytes()),
                    expires_at: None,
                });
                Ok(delta)
            }
        }
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        let now = self.clock.now();
        match self.map.get(key) {
            Some(value) if value.is_expired(now) => Ok(Vec::new()),
            Some(value) => match &value.slot {
                Slot::Set(members) => Ok(members.iter().cloned().collect()),
                Slot::Bytes(_) => Err(wrong_type(key)),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<bool> {
        let now = self.clock.now();
        let fresh_set = || StoredValue {
            slot: Slot::Set(HashSet::from([member.to_string()])),
            expires_at: None,
        };

        match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh_set());
                    return Ok(true);
                }
                match &mut occupied.get_mut().slot {
                    Slot::Set(members) => Ok(members.insert(member.to_string())),
                    Slot::Bytes(_) => Err(wrong_type(key)),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh_set());
                Ok(true)
            }
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        let now = self.clock.now();
        match self.map.entry(key.to_string()) {
            Entry::Occupied(occupied) if occupied.get().is_expired(now) => {
                occupied.remove();
                Ok(false)
            }
            Entry::Occupied(mut occupied) => {
                let (removed, now_empty) = match &mut occupied.get_mut().slot {
                    Slot::Set(members) => (members.remove(member), members.is_empty()),
                    Slot::Bytes(_) => return Err(wrong_type(key)),
                };
                // Empty sets do not exist
                if now_empty {
                    occupied.remove();
                }
                Ok(removed)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn flush_all(&self) -> CacheResult<bool> {
        self.map.clear();
        info!("[Memory] Flushed all keys");
        Ok(true)
    }

    fn tag_index_kind(&self) -> TagIndexKind {
        TagIndexKind::NativeSet
    }

    fn atomic_increment(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
