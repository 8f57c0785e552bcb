//! Sharded Storage - Consistent-Hash Distribution
//!
//! Spreads keys over several adapters with [`ShardRouter`]. Entry, lock,
//! counter and tag keys are each routed by their own key, so an entry and
//! the tag sets that list it may sit on different nodes. The tag index
//! only ever addresses tag keys directly and needs no co-location.
//!
//! All nodes must share one tag strategy. Join-table nodes are rejected:
//! their entry and tag rows must be written in one local transaction.

use crate::error::{CacheError, CacheResult};
use crate::shard_router::ShardRouter;
use crate::traits::{StorageAdapter, TagIndexKind};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One node handle on the ring
pub type ShardNode = Arc<dyn StorageAdapter>;

/// Storage adapter distributing keys over weighted nodes
///
/// # Example
///
/// ```rust
/// use tagged_cache::backends::{MemoryStorage, ShardedStorage};
/// use tagged_cache::StorageAdapter;
/// use std::sync::Arc;
///
/// # async fn example() -> tagged_cache::CacheResult<()> {
/// let sharded = ShardedStorage::new(256, 1024);
/// sharded.add_node("node-a", 2, Arc::new(MemoryStorage::new()))?;
/// sharded.add_node("node-b", 1, Arc::new(MemoryStorage::new()))?;
///
/// sharded.set("user:1", b"alice", None).await?;
/// assert_eq!(sharded.get("user:1").await?, Some(b"alice".to_vec()));
/// # Ok(())
/// # }
/// ```
pub struct ShardedStorage {
    router: ShardRouter<ShardNode>,
}

impl ShardedStorage {
    /// Create an empty sharded storage
    #[must_use]
    pub fn new(replicas: usize, lookup_cache_size: usize) -> Self {
        Self {
            router: ShardRouter::new(replicas, lookup_cache_size),
        }
    }

    /// Connect one [`RedisStorage`](crate::backends::RedisStorage) per
    /// configured node
    ///
    /// Node ids come from [`node_id`](crate::backends::redis_storage::node_id),
    /// so two URLs naming the same host, port and database are duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for a duplicate endpoint (checked before
    /// any connection is opened), or an error if any node fails to connect.
    #[cfg(feature = "redis")]
    pub async fn connect_redis(
        nodes: &[crate::config::ShardNodeConfig],
        replicas: usize,
        lookup_cache_size: usize,
    ) -> CacheResult<Self> {
        use crate::backends::redis_storage::node_id;

        let mut ids = Vec::with_capacity(nodes.len());
        for node in nodes {
            let id = node_id(&node.url)?;
            if ids.contains(&id) {
                return Err(CacheError::Config(format!(
                    "shard {} duplicates endpoint {id}",
                    node.url
                )));
            }
            ids.push(id);
        }

        let sharded = Self::new(replicas, lookup_cache_size);
        for (node, id) in nodes.iter().zip(ids) {
            let storage = crate::backends::RedisStorage::with_url(&node.url).await?;
            sharded.add_node(id, node.weight, Arc::new(storage))?;
        }
        Ok(sharded)
    }

    /// Register a node
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for a duplicate id, a zero weight, a
    /// join-table node, or a node whose tag strategy differs from the
    /// nodes already registered.
    pub fn add_node(&self, id: impl Into<String>, weight: u32, node: ShardNode) -> CacheResult<()> {
        let id = id.into();
        let kind = node.tag_index_kind();
        if kind == TagIndexKind::JoinTable {
            return Err(CacheError::Config(format!(
                "shard {id} ({}) keeps tags in a join table and cannot be sharded",
                node.name()
            )));
        }
        if let Some((other_id, other)) = self.router.nodes().first() {
            if other.tag_index_kind() != kind {
                return Err(CacheError::Config(format!(
                    "shard {id} uses {kind:?} tags but {other_id} uses {:?}",
                    other.tag_index_kind()
                )));
            }
        }

        info!(shard = %id, backend = node.name(), weight, "Adding storage shard");
        self.router.add_node(id, weight, node)
    }

    /// Unregister a node, returning it
    ///
    /// Keys it held are not migrated; they read as misses from now on.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if no node has that id.
    pub fn remove_node(&self, id: &str) -> CacheResult<ShardNode> {
        self.router.remove_node(id)
    }

    /// Id of the node owning `key`
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] when no node is registered.
    pub fn node_for(&self, key: &str) -> CacheResult<String> {
        self.router.route_id(key)
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.router.len()
    }

    /// Whether no node is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.router.is_empty()
    }

    fn node(&self, key: &str) -> CacheResult<ShardNode> {
        self.router.route(key)
    }
}

#[async_trait]
impl StorageAdapter for ShardedStorage {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.node(key)?.get(key).await
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let nodes: HashMap<String, ShardNode> = self.router.nodes().into_iter().collect();

        // node id -> positions in `keys`
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, key) in keys.iter().enumerate() {
            groups
                .entry(self.router.route_id(key)?)
                .or_default()
                .push(position);
        }
        debug!(keys = keys.len(), shards = groups.len(), "[Sharded] Fan-out get_many");

        let lookups = groups.into_iter().map(|(id, positions)| {
            let node = nodes.get(&id).cloned();
            let batch: Vec<String> = positions
                .iter()
                .filter_map(|position| keys.get(*position).cloned())
                .collect();
            async move {
                let node = node.ok_or_else(|| {
                    CacheError::Backend(format!("shard {id} left the ring during get_many"))
                })?;
                let values = node.get_many(&batch).await?;
                Ok::<_, CacheError>((positions, values))
            }
        });

        let mut values: Vec<Option<Vec<u8>>> = vec![None; keys.len()];
        for result in join_all(lookups).await {
            let (positions, found) = result?;
            for (position, value) in positions.into_iter().zip(found) {
                if let Some(slot) = values.get_mut(position) {
                    *slot = value;
                }
            }
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        self.node(key)?.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        self.node(key)?.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.node(key)?.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.node(key)?.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.node(key)?.ttl(key).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.node(key)?.incr_by(key, delta).await
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        self.node(key)?.set_members(key).await
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.node(key)?.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.node(key)?.set_remove(key, member).await
    }

    async fn flush_all(&self) -> CacheResult<bool> {
        let nodes = self.router.nodes();
        let results = join_all(nodes.iter().map(|(_, node)| node.flush_all())).await;
        let mut flushed = true;
        for result in results {
            flushed &= result?;
        }
        Ok(flushed)
    }

    async fn health_check(&self) -> bool {
        let nodes = self.router.nodes();
        if nodes.is_empty() {
            return false;
        }
        join_all(nodes.iter().map(|(_, node)| node.health_check()))
            .await
            .into_iter()
            .all(|healthy| healthy)
    }

    fn validate_key(&self, key: &str) -> CacheResult<()> {
        for (_, node) in self.router.nodes() {
            node.validate_key(key)?;
        }
        Ok(())
    }

    fn tag_index_kind(&self) -> TagIndexKind {
        self.router
            .nodes()
            .first()
            .map_or(TagIndexKind::NativeSet, |(_, node)| node.tag_index_kind())
    }

    fn atomic_increment(&self) -> bool {
        self.router
            .nodes()
            .iter()
            .all(|(_, node)| node.atomic_increment())
    }

    fn name(&self) -> &'static str {
        "Sharded"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryStorage, ProcessStorage, ProcessStorageConfig};

    fn sharded(nodes: &[(&str, Arc<MemoryStorage>)]) -> ShardedStorage {
        let sharded = ShardedStorage::new(128, 64);
        for (id, node) in nodes {
            sharded.add_node(*id, 1, node.clone()).unwrap();
        }
        sharded
    }

    #[cfg(feature = "redis")]
    #[tokio::test]
    async fn test_same_redis_endpoint_is_duplicate() {
        use crate::config::ShardNodeConfig;
        use crate::error::ErrorKind;

        let nodes = [
            ShardNodeConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                weight: 1,
            },
            ShardNodeConfig {
                url: "redis://127.0.0.1/".to_string(),
                weight: 1,
            },
        ];
        let err = ShardedStorage::connect_redis(&nodes, 16, 16)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_keys_land_on_routed_node() {
        let a = Arc::new(MemoryStorage::new());
        let b = Arc::new(MemoryStorage::new());
        let storage = sharded(&[("a", a.clone()), ("b", b.clone())]);

        for i in 0..40 {
            let key = format!("k{i}");
            storage.set(&key, b"v", None).await.unwrap();
            let owner = if storage.node_for(&key).unwrap() == "a" {
                &a
            } else {
                &b
            };
            assert!(owner.get(&key).await.unwrap().is_some());
        }
        assert_eq!(a.len() + b.len(), 40);
        assert!(!a.is_empty() && !b.is_empty());
    }

    #[tokio::test]
    async fn test_get_many_keeps_input_order() {
        let storage = sharded(&[
            ("a", Arc::new(MemoryStorage::new())),
            ("b", Arc::new(MemoryStorage::new())),
            ("c", Arc::new(MemoryStorage::new())),
        ]);
        for i in 0..20 {
            storage
                .set(&format!("k{i}"), i.to_string().as_bytes(), None)
                .await
                .unwrap();
        }

        let keys: Vec<String> = ["k3", "missing", "k17", "k3", "k0"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let values = storage.get_many(&keys).await.unwrap();
        assert_eq!(
            values,
            vec![
                Some(b"3".to_vec()),
                None,
                Some(b"17".to_vec()),
                Some(b"3".to_vec()),
                Some(b"0".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_flush_reaches_every_node() {
        let a = Arc::new(MemoryStorage::new());
        let b = Arc::new(MemoryStorage::new());
        let storage = sharded(&[("a", a.clone()), ("b", b.clone())]);
        for i in 0..10 {
            storage.set(&format!("k{i}"), b"v", None).await.unwrap();
        }
        assert!(storage.flush_all().await.unwrap());
        assert!(a.is_empty() && b.is_empty());
    }

    #[test]
    fn test_mixed_tag_strategies_rejected() {
        let storage = sharded(&[("a", Arc::new(MemoryStorage::new()))]);
        let process = ProcessStorage::new(ProcessStorageConfig::default()).unwrap();
        let err = storage.add_node("b", 1, Arc::new(process)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_empty_ring_is_config_error() {
        let storage = ShardedStorage::new(16, 16);
        let err = storage.get("k").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
        assert!(!storage.health_check().await);
    }
}
