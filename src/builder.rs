//! Driver Builder
//!
//! Builds a [`Driver`] from a [`DriverConfig`], connecting the backend the
//! configuration names, or over a storage adapter supplied by the caller.
//!
//! # Example: Backend From Configuration
//!
//! ```rust,no_run
//! use tagged_cache::{BackendConfig, DriverBuilder, DriverConfig};
//!
//! #[tokio::main]
//! async fn main() -> tagged_cache::CacheResult<()> {
//!     let config = DriverConfig::new(BackendConfig::Redis {
//!         url: Some("redis://127.0.0.1:6379".to_string()),
//!     })
//!     .with_prefix_id("shop:");
//!
//!     let driver = DriverBuilder::new().config(config).build().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Custom Adapter
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tagged_cache::DriverBuilder;
//!
//! let driver = DriverBuilder::new()
//!     .storage(Arc::new(MyStore::new()))
//!     .build()
//!     .await?;
//! ```

use crate::backends::{MemoryStorage, NullStorage, ProcessStorage, ProcessStorageConfig};
use crate::clock::{Clock, SystemClock};
use crate::config::{BackendConfig, DriverConfig};
use crate::driver::Driver;
use crate::error::{CacheError, CacheResult};
use crate::traits::StorageAdapter;
use std::sync::Arc;
use tracing::info;

/// Builder for [`Driver`]
///
/// Without an explicit [`storage`](Self::storage), `build` connects the
/// backend named by `config.backend`. Without an explicit
/// [`clock`](Self::clock), the wall clock is used.
#[derive(Default)]
pub struct DriverBuilder {
    config: DriverConfig,
    storage: Option<Arc<dyn StorageAdapter>>,
    clock: Option<Arc<dyn Clock>>,
}

impl DriverBuilder {
    /// Builder with the default configuration (in-process memory backend)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`
    #[must_use]
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an already constructed adapter; `config.backend` is then ignored.
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Read time from `clock`, both in the driver and in the in-process
    /// backends the builder creates
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Connect the backend (if needed) and assemble the driver.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for an invalid configuration or a
    /// backend whose cargo feature is disabled, and backend errors if the
    /// storage engine cannot be reached.
    pub async fn build(self) -> CacheResult<Driver> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let storage = match self.storage {
            Some(storage) => {
                info!(backend = storage.name(), "Using custom storage adapter");
                storage
            }
            None => connect_backend(&self.config.backend, Arc::clone(&clock)).await?,
        };

        Driver::new(self.config, storage, clock)
    }
}

async fn connect_backend(
    backend: &BackendConfig,
    clock: Arc<dyn Clock>,
) -> CacheResult<Arc<dyn StorageAdapter>> {
    match backend {
        BackendConfig::Memory => Ok(Arc::new(MemoryStorage::with_clock(clock))),
        BackendConfig::BlackHole => Ok(Arc::new(NullStorage::new())),
        BackendConfig::Process { max_capacity } => Ok(Arc::new(ProcessStorage::with_clock(
            ProcessStorageConfig {
                max_capacity: *max_capacity,
            },
            clock,
        )?)),
        #[cfg(feature = "redis")]
        BackendConfig::Redis { url } => {
            let storage = match url {
                Some(url) => crate::backends::RedisStorage::with_url(url).await?,
                None => crate::backends::RedisStorage::new().await?,
            };
            Ok(Arc::new(storage))
        }
        #[cfg(feature = "redis")]
        BackendConfig::ShardedRedis {
            nodes,
            replicas,
            lookup_cache_size,
        } => Ok(Arc::new(
            crate::backends::ShardedStorage::connect_redis(nodes, *replicas, *lookup_cache_size)
                .await?,
        )),
        #[cfg(feature = "memcached")]
        BackendConfig::Memcached { url } => {
            let storage = match url {
                Some(url) => crate::backends::MemcachedStorage::with_url(url)?,
                None => crate::backends::MemcachedStorage::new()?,
            };
            Ok(Arc::new(storage))
        }
        #[cfg(feature = "sqlite")]
        BackendConfig::Sqlite { url, table_prefix } => {
            let storage = crate::backends::SqlStorage::connect(url, table_prefix)
                .await?
                .with_clock(clock);
            storage.create_schema().await?;
            Ok(Arc::new(storage))
        }
        #[allow(unreachable_patterns)]
        other => Err(CacheError::Config(format!(
            "backend {other:?} requires its cargo feature to be enabled"
        ))),
    }
}
