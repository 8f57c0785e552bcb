//! Shard Router - Weighted Consistent Hashing
//!
//! Maps string keys to one of several storage nodes so that:
//! - a key always lands on the same node while the node set is unchanged
//! - adding or removing a node moves only about `1/N` of the keys
//! - nodes with a higher weight own proportionally more of the keyspace
//!
//! Each node gets `round(replicas * weight / average_weight)` points on a
//! 32-bit ring at `crc32("{node_id}:{i}")`. Lookup hashes the key and walks
//! clockwise to the first point at or after it, wrapping at the top.
//!
//! The ring is split into contiguous slices (`replicas * nodes / 8` of them)
//! so a lookup binary-searches one short sorted vector instead of the whole
//! ring. Ring and node list are rebuilt together and swapped in atomically;
//! readers never observe a partially built ring.

use crate::error::{CacheError, CacheResult};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// A registered ring member
#[derive(Debug, Clone)]
struct ShardNode<N> {
    id: String,
    weight: u32,
    handle: N,
}

/// Sorted ring points, segmented by position
#[derive(Debug, Default)]
struct Ring {
    /// `(position, node index)` pairs; slice `s` holds positions in
    /// `[s * 2^32 / len, (s + 1) * 2^32 / len)`, each slice sorted
    slices: Vec<Vec<(u32, usize)>>,
    points: usize,
}

#[allow(clippy::cast_possible_truncation)]
fn slice_of(position: u32, slice_count: usize) -> usize {
    ((u64::from(position) * slice_count as u64) >> 32) as usize
}

fn ring_hash(value: &str) -> u32 {
    crc32fast::hash(value.as_bytes())
}

impl Ring {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn build<N>(nodes: &[ShardNode<N>], replicas: usize) -> Self {
        if nodes.len() < 2 {
            return Self::default();
        }

        let slice_count = (replicas * nodes.len() / 8).max(1);
        let total_weight: u64 = nodes.iter().map(|n| u64::from(n.weight)).sum();
        let average = total_weight as f64 / nodes.len() as f64;

        let mut slices: Vec<Vec<(u32, usize)>> = vec![Vec::new(); slice_count];
        for (index, node) in nodes.iter().enumerate() {
            let points = ((f64::from(node.weight) / average) * replicas as f64).round() as usize;
            for replica in 0..points {
                let position = ring_hash(&format!("{}:{replica}", node.id));
                if let Some(slice) = slices.get_mut(slice_of(position, slice_count)) {
                    slice.push((position, index));
                }
            }
        }

        let mut total = 0;
        for slice in &mut slices {
            slice.sort_unstable();
            // crc32 collisions: first node (by registration order) keeps the point
            slice.dedup_by_key(|(position, _)| *position);
            total += slice.len();
        }

        Self {
            slices,
            points: total,
        }
    }

    /// Index of the node owning `hash`.
    fn locate(&self, hash: u32) -> Option<usize> {
        let start = slice_of(hash, self.slices.len());
        let first = self.slices.get(start)?;
        let at = first.partition_point(|(position, _)| *position < hash);
        if let Some((_, node)) = first.get(at) {
            return Some(*node);
        }

        // Nothing at or after `hash` in its slice: the successor is the first
        // point of the next non-empty slice, wrapping past the top.
        self.slices
            .iter()
            .skip(start + 1)
            .chain(self.slices.iter().take(start + 1))
            .find_map(|slice| slice.first())
            .map(|(_, node)| *node)
    }
}

/// Immutable snapshot swapped in on every membership change
#[derive(Debug)]
struct RingState<N> {
    generation: u64,
    nodes: Vec<ShardNode<N>>,
    ring: Ring,
}

/// Weighted consistent-hash router over node handles of type `N`
///
/// `N` is whatever the caller routes to, typically an
/// `Arc<dyn StorageAdapter>`.
///
/// # Example
///
/// ```rust
/// use tagged_cache::ShardRouter;
///
/// # fn main() -> tagged_cache::CacheResult<()> {
/// let router = ShardRouter::new(256, 1024);
/// router.add_node("redis://10.0.0.1:6379", 2, "big")?;
/// router.add_node("redis://10.0.0.2:6379", 1, "small")?;
///
/// let node = router.route("user:42")?;
/// assert_eq!(router.route("user:42")?, node);
/// # Ok(())
/// # }
/// ```
pub struct ShardRouter<N> {
    replicas: usize,
    lookup_cache_size: usize,
    state: RwLock<Arc<RingState<N>>>,
    /// key → (ring generation, node index)
    lookup_cache: DashMap<String, (u64, usize)>,
}

impl<N: Clone> ShardRouter<N> {
    /// Create an empty router.
    ///
    /// * `replicas` - ring points per unit of average weight
    /// * `lookup_cache_size` - memoized lookups kept before the cache is
    ///   cleared wholesale; 0 disables memoization
    pub fn new(replicas: usize, lookup_cache_size: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            lookup_cache_size,
            state: RwLock::new(Arc::new(RingState {
                generation: 0,
                nodes: Vec::new(),
                ring: Ring::default(),
            })),
            lookup_cache: DashMap::new(),
        }
    }

    /// Register a node.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if a node with the same id is already
    /// registered or `weight` is zero.
    pub fn add_node(&self, id: impl Into<String>, weight: u32, handle: N) -> CacheResult<()> {
        let id = id.into();
        if weight == 0 {
            return Err(CacheError::Config(format!("shard {id} has zero weight")));
        }

        let mut state = self.state.write();
        if state.nodes.iter().any(|n| n.id == id) {
            return Err(CacheError::Config(format!(
                "shard {id} is already registered"
            )));
        }

        let mut nodes = state.nodes.clone();
        nodes.push(ShardNode {
            id: id.clone(),
            weight,
            handle,
        });
        *state = self.rebuild(state.generation, nodes);
        self.lookup_cache.clear();

        info!(shard = %id, weight, nodes = state.nodes.len(), points = state.ring.points, "Shard added to ring");
        Ok(())
    }

    /// Unregister a node and return its handle.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if no node has that id.
    pub fn remove_node(&self, id: &str) -> CacheResult<N> {
        let mut state = self.state.write();
        let mut nodes = state.nodes.clone();
        let position = nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| CacheError::Config(format!("shard {id} is not registered")))?;
        let removed = nodes.remove(position);

        *state = self.rebuild(state.generation, nodes);
        self.lookup_cache.clear();

        info!(shard = %id, nodes = state.nodes.len(), "Shard removed from ring");
        Ok(removed.handle)
    }

    fn rebuild(&self, generation: u64, nodes: Vec<ShardNode<N>>) -> Arc<RingState<N>> {
        let ring = Ring::build(&nodes, self.replicas);
        Arc::new(RingState {
            generation: generation + 1,
            nodes,
            ring,
        })
    }

    /// Node handle owning `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] when no node is registered.
    pub fn route(&self, key: &str) -> CacheResult<N> {
        let state = Arc::clone(&self.state.read());
        let index = self.route_index(&state, key)?;
        state
            .nodes
            .get(index)
            .map(|node| node.handle.clone())
            .ok_or_else(|| CacheError::Config(format!("unable to determine shard for {key}")))
    }

    /// Id of the node owning `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] when no node is registered.
    pub fn route_id(&self, key: &str) -> CacheResult<String> {
        let state = Arc::clone(&self.state.read());
        let index = self.route_index(&state, key)?;
        state
            .nodes
            .get(index)
            .map(|node| node.id.clone())
            .ok_or_else(|| CacheError::Config(format!("unable to determine shard for {key}")))
    }

    fn route_index(&self, state: &RingState<N>, key: &str) -> CacheResult<usize> {
        match state.nodes.len() {
            0 => {
                return Err(CacheError::Config(
                    "at least one shard must be registered".into(),
                ));
            }
            1 => return Ok(0),
            _ => {}
        }

        if self.lookup_cache_size > 0 {
            if let Some(cached) = self.lookup_cache.get(key) {
                let (generation, index) = *cached;
                if generation == state.generation {
                    return Ok(index);
                }
            }
        }

        let index = state.ring.locate(ring_hash(key)).ok_or_else(|| {
            CacheError::Config(format!("hash ring has no points for {key}"))
        })?;

        if self.lookup_cache_size > 0 {
            self.lookup_cache
                .insert(key.to_string(), (state.generation, index));
            if self.lookup_cache.len() > self.lookup_cache_size {
                debug!(size = self.lookup_cache.len(), "Shard lookup cache full, clearing");
                self.lookup_cache.clear();
            }
        }

        Ok(index)
    }

    /// All registered `(id, handle)` pairs, in registration order.
    pub fn nodes(&self) -> Vec<(String, N)> {
        self.state
            .read()
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.handle.clone()))
            .collect()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Whether no node is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of memoized lookups.
    pub fn lookup_cache_len(&self) -> usize {
        self.lookup_cache.len()
    }
}
