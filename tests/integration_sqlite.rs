//! Integration tests for the SQLite backend
//!
//! Uses an in-memory database, so no server is needed.

#![cfg(feature = "sqlite")]

mod common;

use common::*;
use std::time::Duration;
use tagged_cache::backends::SqlStorage;
use tagged_cache::{BackendConfig, DriverBuilder, DriverConfig, ErrorKind};

/// Test the basic protocol against SQL storage
#[tokio::test]
async fn test_sqlite_protocol() {
    let (driver, clock) = sqlite_driver(DriverConfig::default()).await;

    let user = test_data::User::new(3);
    driver
        .save(&user, "user:3", &["users"], Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(driver.load::<test_data::User>("user:3").await.unwrap(), Some(user));

    clock.advance(30);
    assert_eq!(driver.load::<test_data::User>("user:3").await.unwrap(), None);
    assert!(driver.remove("user:3").await.unwrap());
}

/// Test the stampede lock through `INSERT ... ON CONFLICT DO NOTHING`
#[tokio::test]
async fn test_sqlite_stampede_lock() {
    let (driver, clock) = sqlite_driver(DriverConfig::default()).await;
    driver.save(&"v", "k", &[], Some(Duration::from_secs(5))).await.unwrap();
    clock.advance(6);

    let lock = Duration::from_secs(10);
    assert_eq!(driver.load_with_lock::<String>("k", lock).await.unwrap(), None);
    assert_eq!(
        driver.load_with_lock::<String>("k", lock).await.unwrap().as_deref(),
        Some("v")
    );

    // the lock row expires like any other row
    clock.advance(10);
    assert_eq!(driver.load_with_lock::<String>("k", lock).await.unwrap(), None);
}

/// Test counters use read-modify-write but stay correct sequentially
#[tokio::test]
async fn test_sqlite_counters() {
    let (driver, _) = sqlite_driver(DriverConfig::default()).await;
    assert!(!driver.storage().atomic_increment());
    assert_eq!(driver.increment("n", 5).await.unwrap(), 5);
    assert_eq!(driver.decrement("n", 7).await.unwrap(), -2);
    assert_eq!(driver.counter("n").await.unwrap(), -2);
}

/// Test a counter written over an entry row drops the row's expiry
#[tokio::test]
async fn test_sqlite_counter_over_entry_never_expires() {
    let config = DriverConfig::default().with_max_lifetime(Duration::from_secs(100));
    let (driver, clock) = sqlite_driver(config).await;
    driver
        .save(&"text", "mixed", &[], Some(Duration::from_secs(10)))
        .await
        .unwrap();
    assert_eq!(driver.increment("mixed", 5).await.unwrap(), 5);

    clock.advance(200);
    assert_eq!(driver.counter("mixed").await.unwrap(), 5);
}

/// Test batch loading and touch
#[tokio::test]
async fn test_sqlite_load_many_and_touch() {
    let (driver, clock) = sqlite_driver(DriverConfig::default()).await;
    driver.save(&1, "a", &[], Some(Duration::from_secs(10))).await.unwrap();
    driver.save(&2, "b", &[], None).await.unwrap();

    let loaded = driver.load_many::<i32>(&["b", "x", "a"]).await.unwrap();
    assert_eq!(
        loaded,
        vec![
            ("b".to_string(), Some(2)),
            ("x".to_string(), None),
            ("a".to_string(), Some(1)),
        ]
    );

    clock.advance(9);
    assert!(driver.touch("a", Duration::from_secs(10)).await.unwrap());
    clock.advance(9);
    assert_eq!(driver.load::<i32>("a").await.unwrap(), Some(1));
}

/// Test over-long identifiers are rejected before any query
#[tokio::test]
async fn test_sqlite_key_length_limit() {
    let (driver, _) = sqlite_driver(DriverConfig::default()).await;
    let long = "x".repeat(300);
    let err = driver.save(&1, &long, &[], None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

/// Test an id at the length limit works until a lock key is needed
#[tokio::test]
async fn test_sqlite_id_at_limit_without_room_for_lock() {
    let (driver, clock) = sqlite_driver(DriverConfig::default()).await;
    let id = "x".repeat(255);
    assert!(driver.save(&1, &id, &["t"], Some(Duration::from_secs(10))).await.unwrap());
    assert_eq!(driver.load::<i32>(&id).await.unwrap(), Some(1));
    assert_eq!(
        driver.load_with_lock::<i32>(&id, Duration::from_secs(5)).await.unwrap(),
        Some(1)
    );
    assert!(driver.touch(&id, Duration::from_secs(5)).await.unwrap());

    // A stale entry needs the lock key, which cannot be stored
    clock.advance(60);
    let err = driver
        .load_with_lock::<i32>(&id, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(driver.load::<i32>(&id).await.unwrap(), None);
    assert!(driver.remove(&id).await.unwrap());
}

/// Test flush empties both tables
#[tokio::test]
async fn test_sqlite_flush() {
    let (driver, _) = sqlite_driver(DriverConfig::default()).await;
    driver.save(&1, "a", &["t"], None).await.unwrap();
    assert!(driver.flush().await.unwrap());
    assert!(!driver.contains("a").await.unwrap());
    assert!(driver.storage().set_members("tag.t").await.unwrap().is_empty());
}

/// Test building a SQLite driver from configuration
#[tokio::test]
async fn test_sqlite_from_config() {
    let config = DriverConfig::new(BackendConfig::Sqlite {
        url: "sqlite::memory:".to_string(),
        table_prefix: "app_".to_string(),
    });
    let driver = DriverBuilder::new().config(config).build().await.unwrap();
    assert_eq!(driver.storage().name(), "Sql");
    driver.save(&"x", "k", &["t"], None).await.unwrap();
    assert!(driver.contains("k").await.unwrap());
    assert!(driver.health_check().await);
}

/// Test expired rows are purged on demand
#[tokio::test]
async fn test_sqlite_purge_expired() {
    let clock = tagged_cache::ManualClock::new(START);
    let storage = SqlStorage::connect("sqlite::memory:", "cache_")
        .await
        .unwrap()
        .with_clock(std::sync::Arc::new(clock.clone()));
    storage.create_schema().await.unwrap();

    use tagged_cache::StorageAdapter;
    storage.set("a", b"1", Some(Duration::from_secs(5))).await.unwrap();
    storage.set("b", b"2", None).await.unwrap();
    clock.advance(5);
    assert_eq!(storage.purge_expired().await.unwrap(), 1);
    assert_eq!(storage.get("b").await.unwrap(), Some(b"2".to_vec()));
}
