//! Memcached Storage - Distributed Backend
//!
//! Memcached-based storage. Memcached has no sets, so tags use the
//! serialized-list strategy; `add` provides the stampede lock and native
//! `incr`/`decr` the counters.
//!
//! **Note**: Unlike Redis, Memcached does not support:
//! - TTL introspection (`ttl` always reports `None`)
//! - Negative counters (`decr` clamps at zero)
//! - Keys longer than 250 bytes or containing whitespace

use crate::backends::BackendStats;
use crate::clock::{Clock, SystemClock, ttl_secs};
use crate::error::{CacheError, CacheResult};
use crate::traits::{StorageAdapter, TagIndexKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default server when neither a URL nor `MEMCACHED_URL` is given
pub const DEFAULT_MEMCACHED_URL: &str = "memcache://127.0.0.1:11211";

/// Longest key memcached accepts
const MAX_KEY_LEN: usize = 250;

/// Relative expirations above this are read by memcached as unix timestamps
const MAX_RELATIVE_EXPIRATION: i64 = 2_592_000;

/// Memcached storage
///
/// Provides:
/// - `add`-based `set_if_absent`
/// - Native atomic `incr`/`decr` (unsigned)
/// - Multi-key `get_many`
/// - Key validation before any I/O
pub struct MemcachedStorage {
    /// Memcached client
    client: memcache::Client,
    /// Server-side clock reference for absolute expirations
    clock: Arc<dyn Clock>,
    /// Hit counter
    hits: Arc<AtomicU64>,
    /// Miss counter
    misses: Arc<AtomicU64>,
    /// Set counter
    sets: Arc<AtomicU64>,
}

impl MemcachedStorage {
    /// Connect using `MEMCACHED_URL`, falling back to [`DEFAULT_MEMCACHED_URL`]
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use tagged_cache::backends::MemcachedStorage;
    /// # fn example() -> tagged_cache::CacheResult<()> {
    /// let storage = MemcachedStorage::new()?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the Memcached client cannot be created.
    pub fn new() -> CacheResult<Self> {
        let memcached_url = std::env::var("MEMCACHED_URL")
            .unwrap_or_else(|_| DEFAULT_MEMCACHED_URL.to_string());
        Self::with_url(&memcached_url)
    }

    /// Connect to a specific server
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the server does
    /// not answer `version`.
    pub fn with_url(memcached_url: &str) -> CacheResult<Self> {
        info!(url = %memcached_url, "Initializing Memcached Storage");

        let client = memcache::connect(memcached_url)?;
        let versions = client.version()?;
        info!(
            url = %memcached_url,
            server_count = versions.len(),
            "Memcached Storage connected successfully"
        );

        Ok(Self {
            client,
            clock: Arc::new(SystemClock),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Get server statistics, one `(server_address, stats)` pair per server
    ///
    /// # Errors
    ///
    /// Returns an error if the `stats` command fails.
    pub fn server_stats(&self) -> CacheResult<Vec<(String, HashMap<String, String>)>> {
        Ok(self.client.stats()?)
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

    /// Memcached expiration for a TTL: relative up to 30 days, absolute beyond
    fn expiration(&self, ttl: Option<Duration>) -> u32 {
        let Some(ttl) = ttl else {
            return 0;
        };
        let secs = ttl_secs(ttl).max(1);
        let value = if secs > MAX_RELATIVE_EXPIRATION {
            self.clock.now().saturating_add(secs)
        } else {
            secs
        };
        u32::try_from(value).unwrap_or(u32::MAX)
    }
}

/// Whether an `add` failure means "key already exists"
fn not_stored(err: &memcache::MemcacheError) -> bool {
    matches!(err, memcache::MemcacheError::CommandError(_))
}

#[async_trait]
impl StorageAdapter for MemcachedStorage {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.validate_key(key)?;
        let value: Option<Vec<u8>> = self.client.get(key)?;
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        for key in keys {
            self.validate_key(key)?;
        }

        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let found: HashMap<String, Vec<u8>> = self.client.gets(&refs)?;
        let values: Vec<Option<Vec<u8>>> = keys.iter().map(|key| found.get(key).cloned()).collect();

        for value in &values {
            if value.is_some() {
                self.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        self.validate_key(key)?;
        self.client.set(key, value, self.expiration(ttl))?;
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl_secs = ?ttl.map(|t| t.as_secs()), "[Memcached] Stored key");
        Ok(true)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        self.validate_key(key)?;
        match self.client.add(key, value, self.expiration(Some(ttl))) {
            Ok(()) => Ok(true),
            Err(err) if not_stored(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.validate_key(key)?;
        Ok(self.client.delete(key)?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.validate_key(key)?;
        Ok(self.client.touch(key, self.expiration(Some(ttl)))?)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.validate_key(key)?;
        Ok(None)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.validate_key(key)?;
        let amount = delta.unsigned_abs();
        let applied = if delta >= 0 {
            self.client.increment(key, amount)
        } else {
            self.client.decrement(key, amount)
        };

        match applied {
            Ok(value) => Ok(i64::try_from(value).unwrap_or(i64::MAX)),
            Err(err) => {
                // Missing key, or a value incr cannot parse
                let current: Option<Vec<u8>> = self.client.get(key)?;
                if let Some(bytes) = &current {
                    if std::str::from_utf8(bytes).is_ok_and(|s| s.trim().parse::<u64>().is_ok()) {
                        return Err(err.into());
                    }
                    warn!(key = %key, "[Memcached] Overwriting non-integer value with counter");
                }

                let start = delta.max(0);
                let text = start.to_string();
                if current.is_some() {
                    self.client.set(key, text.as_bytes(), 0)?;
                    return Ok(start);
                }
                match self.client.add(key, text.as_bytes(), 0) {
                    Ok(()) => Ok(start),
                    // Lost the race to create it: the counter exists now
                    Err(add_err) if not_stored(&add_err) => {
                        let value = if delta >= 0 {
                            self.client.increment(key, amount)?
                        } else {
                            self.client.decrement(key, amount)?
                        };
                        Ok(i64::try_from(value).unwrap_or(i64::MAX))
                    }
                    Err(add_err) => Err(add_err.into()),
                }
            }
        }
    }

    async fn flush_all(&self) -> CacheResult<bool> {
        self.client.flush()?;
        info!("[Memcached] Flushed all servers");
        Ok(true)
    }

    fn validate_key(&self, key: &str) -> CacheResult<()> {
        if key.is_empty() {
            return Err(CacheError::validation(key, "key must not be empty"));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(CacheError::validation(
                key,
                format!("key exceeds {MAX_KEY_LEN} bytes"),
            ));
        }
        if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CacheError::validation(
                key,
                "key cannot contain whitespace or control characters",
            ));
        }
        Ok(())
    }

    fn tag_index_kind(&self) -> TagIndexKind {
        TagIndexKind::SerializedList
    }

    fn atomic_increment(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Memcached"
    }
}
