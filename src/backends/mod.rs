//! Storage Backend Implementations
//!
//! Every backend implements [`StorageAdapter`](crate::traits::StorageAdapter);
//! the driver never branches on which one it holds.
//!
//! # Available Backends
//!
//! ## In-Process
//! - **Memory** - `DashMap` store with native sets (default)
//! - **Process** - Moka store with a capacity cap
//! - **Null** - stores nothing, turns caching off
//!
//! ## Distributed
//! - **Redis** - native sets, `SET NX`, `INCRBY` (feature: `redis`)
//! - **Memcached** - serialized tag lists, `add`, `incr` (feature: `memcached`)
//! - **Sharded** - any set of same-kind adapters behind the consistent-hash router
//!
//! ## Relational
//! - **SQL** - SQLite through `sqlx`, join-table tags (feature: `sqlite`)
//!
//! # Usage
//!
//! ```rust,no_run
//! use tagged_cache::backends::{MemoryStorage, RedisStorage};
//!
//! # async fn example() -> tagged_cache::CacheResult<()> {
//! let local = MemoryStorage::new();
//! let redis = RedisStorage::with_url("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

// Always available
pub mod memory;
pub mod null;
pub mod process;
pub mod sharded;

// Optional backends (feature-gated)
#[cfg(feature = "redis")]
pub mod redis_storage;

#[cfg(feature = "memcached")]
pub mod memcached_storage;

#[cfg(feature = "sqlite")]
pub mod sql_storage;

pub use memory::MemoryStorage;
pub use null::NullStorage;
pub use process::{ProcessStorage, ProcessStorageConfig};
pub use sharded::{ShardNode, ShardedStorage};

#[cfg(feature = "redis")]
pub use redis_storage::RedisStorage;

#[cfg(feature = "memcached")]
pub use memcached_storage::MemcachedStorage;

#[cfg(feature = "sqlite")]
pub use sql_storage::SqlStorage;

/// Per-adapter lookup counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Reads that found a value
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Successful writes
    pub sets: u64,
}
