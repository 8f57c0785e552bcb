//! Null Storage - Caching Turned Off
//!
//! Accepts every write and forgets it. Through the driver, `save`, `remove`,
//! `remove_by_tags` and `flush` succeed, every load misses, `contains` is
//! false and counters return the delta they were given.
//!
//! Selected with [`BackendConfig::BlackHole`](crate::config::BackendConfig::BlackHole)
//! to disable caching through configuration without touching call sites.

use crate::error::CacheResult;
use crate::traits::{StorageAdapter, TagIndexKind};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Storage that stores nothing
///
/// **Example**:
/// ```rust
/// use tagged_cache::backends::NullStorage;
/// use tagged_cache::StorageAdapter;
///
/// # async fn example() -> tagged_cache::CacheResult<()> {
/// let store = NullStorage::new();
/// assert!(store.set("user:1", b"alice", None).await?);
/// assert_eq!(store.get("user:1").await?, None);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorage;

impl NullStorage {
    /// Create the null storage
    #[must_use]
    pub fn new() -> Self {
        info!("Initializing Null Storage, caching is disabled");
        Self
    }
}

#[async_trait]
impl StorageAdapter for NullStorage {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        Ok(vec![None; keys.len()])
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> CacheResult<bool> {
        Ok(true)
    }

    async fn set_if_absent(&self, _key: &str, _value: &[u8], _ttl: Duration) -> CacheResult<bool> {
        Ok(true)
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        Ok(false)
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<bool> {
        Ok(false)
    }

    async fn ttl(&self, _key: &str) -> CacheResult<Option<Duration>> {
        Ok(None)
    }

    async fn incr_by(&self, _key: &str, delta: i64) -> CacheResult<i64> {
        Ok(delta)
    }

    async fn set_members(&self, _key: &str) -> CacheResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn set_add(&self, _key: &str, _member: &str) -> CacheResult<bool> {
        Ok(true)
    }

    async fn set_remove(&self, _key: &str, _member: &str) -> CacheResult<bool> {
        Ok(false)
    }

    async fn flush_all(&self) -> CacheResult<bool> {
        Ok(true)
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn tag_index_kind(&self) -> TagIndexKind {
        TagIndexKind::NativeSet
    }

    fn atomic_increment(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_are_forgotten() {
        let store = NullStorage::new();
        assert!(store.set("k", b"v", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(
            store.get_many(&["k".to_string(), "j".to_string()]).await.unwrap(),
            vec![None, None]
        );
        assert!(store.set_add("tag", "k").await.unwrap());
        assert!(store.set_members("tag").await.unwrap().is_empty());
        assert_eq!(store.incr_by("n", 3).await.unwrap(), 3);
        assert_eq!(store.incr_by("n", 3).await.unwrap(), 3);
        assert!(store.health_check().await);
    }
}
