//! Redis Storage - Distributed Backend
//!
//! Redis-based storage with native sets for the tag index, `SET NX EX` for
//! stampede locks and `INCRBY` for atomic counters.

use crate::backends::BackendStats;
use crate::clock::ttl_secs;
use crate::error::CacheResult;
use crate::traits::{StorageAdapter, TagIndexKind};
use async_trait::async_trait;
use redis::{Client, IntoConnectionInfo};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default server when neither a URL nor `REDIS_URL` is given
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Redis storage with `ConnectionManager` for automatic reconnection
///
/// Provides:
/// - Atomic `set_if_absent` and `incr_by`
/// - Native sets (`SADD`/`SREM`/`SMEMBERS`) for the tag index
/// - Single round-trip `get_many` through `MGET`
/// - TTL introspection
pub struct RedisStorage {
    /// Redis connection manager - handles reconnection automatically
    conn_manager: ConnectionManager,
    /// Connection URL, used as the node id when sharding
    url: String,
    /// Hit counter
    hits: Arc<AtomicU64>,
    /// Miss counter
    misses: Arc<AtomicU64>,
    /// Set counter
    sets: Arc<AtomicU64>,
}

impl RedisStorage {
    /// Connect using `REDIS_URL`, falling back to [`DEFAULT_REDIS_URL`]
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn new() -> CacheResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        Self::with_url(&redis_url).await
    }

    /// Connect to a specific server
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection string (e.g., `<redis://localhost:6379>`)
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn with_url(redis_url: &str) -> CacheResult<Self> {
        info!(redis_url = %redis_url, "Initializing Redis Storage with ConnectionManager");

        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;

        // Test connection
        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!(redis_url = %redis_url, "Redis Storage connected successfully");

        Ok(Self {
            conn_manager,
            url: redis_url.to_string(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Connection URL this storage was opened with
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
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

    fn record_lookup(&self, found: bool) {
        if found {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Shard id for a Redis URL: `host:port/db` of the parsed connection info,
/// so different spellings of one endpoint share an id
///
/// # Errors
///
/// Returns [`CacheError::Redis`](crate::CacheError::Redis) if the URL does not parse.
pub fn node_id(redis_url: &str) -> CacheResult<String> {
    let info = redis_url.into_connection_info()?;
    Ok(format!("{}/{}", info.addr(), info.redis_settings().db()))
}

/// Redis rejects `EX 0`
fn expire_secs(ttl: Duration) -> i64 {
    ttl_secs(ttl).max(1)
}

#[async_trait]
impl StorageAdapter for RedisStorage {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn_manager.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        self.record_lookup(value.is_some());
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn_manager.clone();
        let values: Vec<Option<Vec<u8>>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        for value in &values {
            self.record_lookup(value.is_some());
        }
        debug!(count = keys.len(), "[Redis] MGET");
        Ok(values)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(expire_secs(ttl));
        }
        let () = cmd.query_async(&mut conn).await?;

        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl_secs = ?ttl.map(|t| t.as_secs()), "[Redis] Stored key");
        Ok(true)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(expire_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        let updated: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(expire_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut conn = self.conn_manager.clone();
        // -1 = no expiry, -2 = key doesn't exist
        let ttl_secs: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        Ok((ttl_secs > 0).then(|| Duration::from_secs(ttl_secs.unsigned_abs())))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut conn = self.conn_manager.clone();
        match redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async::<i64>(&mut conn)
            .await
        {
            Ok(value) => Ok(value),
            Err(err) => {
                // INCRBY refuses non-integer values; those count as 0
                let current: Option<Vec<u8>> =
                    redis::cmd("GET").arg(key).query_async(&mut conn).await?;
                let is_integer = current
                    .as_deref()
                    .and_then(|bytes| std::str::from_utf8(bytes).ok())
                    .is_some_and(|s| s.trim().parse::<i64>().is_ok());
                if is_integer || current.is_none() {
                    return Err(err.into());
                }

                warn!(key = %key, "[Redis] Overwriting non-integer value with counter");
                let () = redis::cmd("SET")
                    .arg(key)
                    .arg(delta)
                    .query_async(&mut conn)
                    .await?;
                Ok(delta)
            }
        }
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        Ok(redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await?)
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        let added: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn flush_all(&self) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        let () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        info!(redis_url = %self.url, "[Redis] Flushed database");
        Ok(true)
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok_and(|pong| pong == "PONG")
    }

    fn tag_index_kind(&self) -> TagIndexKind {
        TagIndexKind::NativeSet
    }

    fn atomic_increment(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_normalizes_url() {
        let id = node_id("redis://127.0.0.1:6379").unwrap();
        assert_eq!(id, "127.0.0.1:6379/0");
        assert_eq!(node_id("redis://127.0.0.1").unwrap(), id);
        assert_eq!(node_id("redis://127.0.0.1:6379/").unwrap(), id);
        assert_eq!(node_id("redis://127.0.0.1:6379/0").unwrap(), id);
        assert_eq!(node_id("redis://127.0.0.1:6379/2").unwrap(), "127.0.0.1:6379/2");
    }

    #[test]
    fn test_node_id_rejects_garbage() {
        assert!(node_id("not a url").is_err());
    }
}
