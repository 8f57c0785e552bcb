//! Tagged Cache
//!
//! A multi-backend cache driver for Rust featuring:
//! - **One protocol, many engines**: Redis, Memcached, SQLite, sharded Redis
//!   and two in-process stores behind a single [`StorageAdapter`] trait
//! - **Tag invalidation**: drop every entry carrying a tag in one call
//! - **Stampede locks**: one caller recomputes an expired entry while the
//!   others keep reading the stale value
//! - **Consistent-hash sharding**: weighted ring with a lookup cache
//! - **Counters**: `increment`/`decrement`, atomic where the engine allows
//! - **Graceful degradation**: backend failures become misses when
//!   `throw_errors` is off
//!
//! # Quick Start
//!
//! ```rust
//! use tagged_cache::{Driver, DriverConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> tagged_cache::CacheResult<()> {
//!     let driver = Driver::connect(DriverConfig::default().with_prefix_id("app:")).await?;
//!
//!     // Store with tags and a lifetime
//!     driver
//!         .save(&"alice", "user:1:name", &["users", "user:1"], Some(Duration::from_secs(300)))
//!         .await?;
//!
//!     // Stale entries stay readable while one caller recomputes
//!     let name: Option<String> = driver
//!         .load_with_lock("user:1:name", Duration::from_secs(10))
//!         .await?;
//!     assert_eq!(name.as_deref(), Some("alice"));
//!
//!     // Invalidate everything about user 1
//!     driver.remove_by_tags(&["user:1"]).await?;
//!     assert!(!driver.contains("user:1:name").await?);
//!
//!     let stats = driver.stats();
//!     tracing::info!("Hit rate: {:.2}%", stats.hit_rate());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Driver ─ entry protocol, stampede lock, degradation
//!   ├─ TagIndex ─ native sets | serialized lists | join table
//!   └─ StorageAdapter
//!        ├─ MemoryStorage / ProcessStorage
//!        ├─ RedisStorage / MemcachedStorage / SqlStorage
//!        └─ ShardedStorage ─ ShardRouter ─ N adapters
//! ```

pub mod backends;
pub mod builder;
pub mod clock;
pub mod codecs;
pub mod config;
pub mod driver;
pub mod entry;
pub mod error;
pub mod shard_router;
pub mod tag_index;
pub mod traits;

pub use builder::DriverBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codecs::{GzipCodec, JsonCodec, Serializer, SerializerKind};
pub use config::{
    BackendConfig, DEFAULT_LOOKUP_CACHE_SIZE, DEFAULT_REPLICAS, DriverConfig, MAX_LIFETIME_SECS,
    ShardNodeConfig, TagMatch,
};
pub use driver::{Driver, DriverStats};
pub use error::{CacheError, CacheResult, ErrorKind};
pub use shard_router::ShardRouter;
pub use tag_index::TagIndex;
pub use traits::{CacheCodec, StorageAdapter, TagIndexKind};

#[cfg(feature = "bincode")]
pub use codecs::BincodeCodec;
#[cfg(feature = "msgpack")]
pub use codecs::MsgPackCodec;

// Re-export async_trait for user convenience
pub use async_trait::async_trait;
