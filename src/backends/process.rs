//! Process Storage - Bounded In-Memory Backend
//!
//! In-process storage on a Moka cache with a hard entry cap. Moka holds
//! plain values only, so tags use the serialized-list strategy.
//!
//! Compound operations (`set_if_absent`, `incr_by`, `expire`) run under a
//! process-wide async mutex: atomic against other callers in this process,
//! and nothing more.

use crate::backends::BackendStats;
use crate::clock::{Clock, SystemClock, ttl_secs};
use crate::entry::try_parse_counter;
use crate::error::{CacheError, CacheResult};
use crate::traits::{StorageAdapter, TagIndexKind};
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Value with clock-based expiration
#[derive(Debug, Clone)]
struct StoredValue {
    value: Arc<Vec<u8>>,
    expires_at: Option<i64>,
}

impl StoredValue {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Configuration for `ProcessStorage`
#[derive(Debug, Clone, Copy)]
pub struct ProcessStorageConfig {
    /// Max number of keys before Moka starts evicting
    pub max_capacity: u64,
}

impl Default for ProcessStorageConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
        }
    }
}

/// Moka-backed bounded process storage
///
/// Eviction under capacity pressure may drop entries or tag lists at any
/// time, so tag invalidation here is best effort like any evicting store.
pub struct ProcessStorage {
    /// Moka cache instance
    cache: Cache<String, StoredValue>,
    /// Serializes read-modify-write operations
    write_lock: Mutex<()>,
    /// Time source for expiry
    clock: Arc<dyn Clock>,
    /// Hit counter
    hits: Arc<AtomicU64>,
    /// Miss counter
    misses: Arc<AtomicU64>,
    /// Set counter
    sets: Arc<AtomicU64>,
}

impl ProcessStorage {
    /// Create new process storage on the system clock
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if `max_capacity` is zero.
    pub fn new(config: ProcessStorageConfig) -> CacheResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create new process storage reading time from `clock`
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if `max_capacity` is zero.
    pub fn with_clock(config: ProcessStorageConfig, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        if config.max_capacity == 0 {
            return Err(CacheError::Config(
                "process storage needs a positive max_capacity".into(),
            ));
        }

        info!("Initializing Process Storage (Moka)");
        let cache = Cache::builder().max_capacity(config.max_capacity).build();
        info!(capacity = config.max_capacity, "Process Storage initialized");

        Ok(Self {
            cache,
            write_lock: Mutex::new(()),
            clock,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
        })
    }

    fn stored(&self, value: &[u8], ttl: Option<Duration>) -> StoredValue {
        StoredValue {
            value: Arc::new(value.to_vec()),
            expires_at: ttl.map(|ttl| self.clock.now().saturating_add(ttl_secs(ttl))),
        }
    }

    /// Live value for `key`, dropping it if expired
    async fn live(&self, key: &str) -> Option<StoredValue> {
        let entry = self.cache.get(key).await?;
        if entry.is_expired(self.clock.now()) {
            self.cache.remove(key).await;
            None
        } else {
            Some(entry)
        }
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

#[async_trait]
impl StorageAdapter for ProcessStorage {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        if let Some(entry) = self.live(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Ok(Some(entry.value.as_ref().clone()))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        self.cache
            .insert(key.to_string(), self.stored(value, ttl))
            .await;
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl_secs = ?ttl.map(|t| t.as_secs()), "[Process] Stored key");
        Ok(true)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        let _guard = self.write_lock.lock().await;
        if self.live(key).await.is_some() {
            return Ok(false);
        }
        self.cache
            .insert(key.to_string(), self.stored(value, Some(ttl)))
            .await;
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = self.clock.now();
        Ok(self
            .cache
            .remove(key)
            .await
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut entry) = self.live(key).await else {
            return Ok(false);
        };
        entry.expires_at = Some(self.clock.now().saturating_add(ttl_secs(ttl)));
        self.cache.insert(key.to_string(), entry).await;
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = self.clock.now();
        Ok(self.live(key).await.and_then(|entry| {
            entry
                .expires_at
                .map(|expires_at| Duration::from_secs((expires_at - now).unsigned_abs()))
        }))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let _guard = self.write_lock.lock().await;
        let (current, expires_at) = match self.live(key).await {
            Some(entry) => match try_parse_counter(&entry.value) {
                Some(current) => (current, entry.expires_at),
                None => (0, None),
            },
            None => (0, None),
        };
        let next = current.saturating_add(delta);
        let entry = StoredValue {
            value: Arc::new(next.to_string().into_bytes()),
            expires_at,
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(next)
    }

    async fn flush_all(&self) -> CacheResult<bool> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        info!("[Process] Flushed all keys");
        Ok(true)
    }

    fn tag_index_kind(&self) -> TagIndexKind {
        TagIndexKind::SerializedList
    }

    fn atomic_increment(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Process"
    }
}
