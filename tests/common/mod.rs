//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - Drivers over the in-process and SQLite backends on a manual clock
//! - Redis/Memcached connection helpers for the ignored live-server tests
//! - Test data generators

#![allow(dead_code)]

use std::sync::Arc;
use tagged_cache::backends::{MemoryStorage, ProcessStorage, ProcessStorageConfig};
use tagged_cache::{Driver, DriverConfig, ManualClock, StorageAdapter};

/// Fixed start time for manual clocks
pub const START: i64 = 1_700_000_000;

/// Get Redis URL from environment or use default
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Get Memcached URL from environment or use default
pub fn memcached_url() -> String {
    std::env::var("MEMCACHED_URL").unwrap_or_else(|_| "memcache://127.0.0.1:11211".to_string())
}

/// Create a test key with a random suffix
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Driver over `storage`, reading time from `clock`
pub fn driver_over(
    config: DriverConfig,
    storage: Arc<dyn StorageAdapter>,
    clock: &ManualClock,
) -> Driver {
    Driver::new(config, storage, Arc::new(clock.clone()))
        .unwrap_or_else(|e| panic!("Failed to build driver: {e}"))
}

/// Driver over a `DashMap` memory store (native sets)
pub fn memory_driver(config: DriverConfig) -> (Driver, ManualClock) {
    let clock = ManualClock::new(START);
    let storage = Arc::new(MemoryStorage::with_clock(Arc::new(clock.clone())));
    (driver_over(config, storage, &clock), clock)
}

/// Driver over a Moka process store (serialized tag lists)
pub fn process_driver(config: DriverConfig) -> (Driver, ManualClock) {
    let clock = ManualClock::new(START);
    let storage = ProcessStorage::with_clock(ProcessStorageConfig::default(), Arc::new(clock.clone()))
        .unwrap_or_else(|e| panic!("Failed to build process storage: {e}"));
    (driver_over(config, Arc::new(storage), &clock), clock)
}

/// Driver over an in-memory SQLite database (join-table tags)
#[cfg(feature = "sqlite")]
pub async fn sqlite_driver(config: DriverConfig) -> (Driver, ManualClock) {
    use tagged_cache::backends::SqlStorage;

    let clock = ManualClock::new(START);
    let storage = SqlStorage::connect("sqlite::memory:", "cache_")
        .await
        .unwrap_or_else(|e| panic!("Failed to open SQLite: {e}"))
        .with_clock(Arc::new(clock.clone()));
    storage
        .create_schema()
        .await
        .unwrap_or_else(|e| panic!("Failed to create schema: {e}"));
    (driver_over(config, Arc::new(storage), &clock), clock)
}

/// One driver per in-process backend, for protocol tests that must hold
/// everywhere
pub fn local_drivers(config: &DriverConfig) -> Vec<(&'static str, Driver, ManualClock)> {
    let (memory, memory_clock) = memory_driver(config.clone());
    let (process, process_clock) = process_driver(config.clone());
    vec![
        ("memory", memory, memory_clock),
        ("process", process, process_clock),
    ]
}

/// Generate test data of various types
pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct User {
        pub id: u64,
        pub name: String,
        pub email: String,
    }

    impl User {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("User {id}"),
                email: format!("user{id}@example.com"),
            }
        }
    }

    /// Generate JSON test data
    pub fn json_user(id: u64) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": format!("User {id}"),
            "email": format!("user{id}@example.com"),
            "created_at": "2025-01-01T00:00:00Z"
        })
    }
}

/// Assert on a driver statistic
#[macro_export]
macro_rules! assert_driver_stats {
    ($driver:expr, $field:ident == $value:expr) => {
        let stats = $driver.stats();
        assert_eq!(
            stats.$field,
            $value,
            "Expected {} == {}, got {}",
            stringify!($field),
            $value,
            stats.$field
        );
    };
    ($driver:expr, $field:ident > $value:expr) => {
        let stats = $driver.stats();
        assert!(
            stats.$field > $value,
            "Expected {} > {}, got {}",
            stringify!($field),
            $value,
            stats.$field
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let key1 = test_key("user");
        let key2 = test_key("user");
        assert_ne!(key1, key2, "Keys should be unique");
        assert!(key1.starts_with("test_user_"));
    }
}
