//! Integration tests for tag invalidation
//!
//! Covers union and intersection removal over native sets (memory),
//! serialized lists (process) and join tables (SQLite).

mod common;

use common::*;
use tagged_cache::{Driver, DriverConfig, TagMatch};

async fn seed(driver: &Driver) {
    driver.save(&1, "post:1", &["posts", "author:ann"], None).await.unwrap();
    driver.save(&2, "post:2", &["posts", "author:bob"], None).await.unwrap();
    driver.save(&3, "profile:ann", &["author:ann"], None).await.unwrap();
    driver.save(&4, "untagged", &[], None).await.unwrap();
}

async fn present(driver: &Driver) -> Vec<&'static str> {
    let mut found = Vec::new();
    for id in ["post:1", "post:2", "profile:ann", "untagged"] {
        if driver.contains(id).await.unwrap() {
            found.push(id);
        }
    }
    found
}

/// Test single-tag removal leaves other entries alone
#[tokio::test]
async fn test_remove_single_tag() {
    for (name, driver, _) in local_drivers(&DriverConfig::default()) {
        seed(&driver).await;
        assert!(driver.remove_by_tags(&["author:ann"]).await.unwrap(), "{name}");
        assert_eq!(present(&driver).await, vec!["post:2", "untagged"], "{name}");
    }
}

/// Test union semantics over several tags
#[tokio::test]
async fn test_remove_any_of_tags() {
    for (name, driver, _) in local_drivers(&DriverConfig::default()) {
        seed(&driver).await;
        driver.remove_by_tags(&["author:bob", "author:ann"]).await.unwrap();
        assert_eq!(present(&driver).await, vec!["untagged"], "{name}");
    }
}

/// Test intersection semantics and that non-matching members stay indexed
#[tokio::test]
async fn test_remove_all_of_tags() {
    let config = DriverConfig::default().with_tag_match(TagMatch::All);
    for (name, driver, _) in local_drivers(&config) {
        seed(&driver).await;
        driver.remove_by_tags(&["posts", "author:ann"]).await.unwrap();
        assert_eq!(
            present(&driver).await,
            vec!["post:2", "profile:ann", "untagged"],
            "{name}"
        );

        // the tag records still know their remaining members
        driver.remove_by_tags(&["author:ann"]).await.unwrap();
        assert_eq!(present(&driver).await, vec!["post:2", "untagged"], "{name}");
    }
}

/// Test unknown tags and empty tag lists are no-ops
#[tokio::test]
async fn test_remove_unknown_tag() {
    for (name, driver, _) in local_drivers(&DriverConfig::default()) {
        seed(&driver).await;
        assert!(driver.remove_by_tags(&["nothing"]).await.unwrap(), "{name}");
        assert!(driver.remove_by_tags(&[]).await.unwrap(), "{name}");
        assert_eq!(present(&driver).await.len(), 4, "{name}");
    }
}

/// Test that direct removal updates the tag index
#[tokio::test]
async fn test_remove_entry_cleans_membership() {
    for (name, driver, _) in local_drivers(&DriverConfig::default()) {
        seed(&driver).await;
        driver.remove("post:1").await.unwrap();
        // re-create the id without tags; the old membership must not reach it
        driver.save(&10, "post:1", &[], None).await.unwrap();
        driver.remove_by_tags(&["posts"]).await.unwrap();
        assert_eq!(
            present(&driver).await,
            vec!["post:1", "profile:ann", "untagged"],
            "{name}"
        );
    }
}

/// Test that tags removed on re-save no longer match
#[tokio::test]
async fn test_resave_with_different_tags() {
    for (name, driver, _) in local_drivers(&DriverConfig::default()) {
        seed(&driver).await;
        driver.save(&11, "post:1", &["archive"], None).await.unwrap();
        driver.remove_by_tags(&["posts"]).await.unwrap();
        assert!(driver.contains("post:1").await.unwrap(), "{name}");
        driver.remove_by_tags(&["archive"]).await.unwrap();
        assert!(!driver.contains("post:1").await.unwrap(), "{name}");
    }
}

/// Test expired entries are still reachable through their tags
#[tokio::test]
async fn test_stale_entries_are_removed_by_tag() {
    for (name, driver, clock) in local_drivers(&DriverConfig::default()) {
        driver
            .save(&1, "old", &["batch"], Some(std::time::Duration::from_secs(5)))
            .await
            .unwrap();
        clock.advance(10);
        driver.remove_by_tags(&["batch"]).await.unwrap();
        assert!(driver.storage().get("old").await.unwrap().is_none(), "{name}");
    }
}

/// Test empty tag names are rejected
#[tokio::test]
async fn test_empty_tag_rejected() {
    let (driver, _) = memory_driver(DriverConfig::default());
    let err = driver.save(&1, "a", &["ok", ""], None).await.unwrap_err();
    assert_eq!(err.kind(), tagged_cache::ErrorKind::Validation);
    assert!(!driver.contains("a").await.unwrap());
}

/// Test the same behaviour over the SQLite join table
#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_join_table_tags() {
    let (driver, _) = sqlite_driver(DriverConfig::default()).await;
    seed(&driver).await;
    driver.remove_by_tags(&["author:ann"]).await.unwrap();
    assert_eq!(present(&driver).await, vec!["post:2", "untagged"]);

    driver.save(&5, "post:2", &["drafts"], None).await.unwrap();
    driver.remove_by_tags(&["posts"]).await.unwrap();
    assert!(driver.contains("post:2").await.unwrap());
    driver.remove_by_tags(&["drafts"]).await.unwrap();
    assert_eq!(present(&driver).await, vec!["untagged"]);
}

/// Test intersection over the SQLite join table
#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_join_table_intersection() {
    let config = DriverConfig::default().with_tag_match(TagMatch::All);
    let (driver, _) = sqlite_driver(config).await;
    seed(&driver).await;
    driver.remove_by_tags(&["posts", "author:ann"]).await.unwrap();
    assert_eq!(present(&driver).await, vec!["post:2", "profile:ann", "untagged"]);
}
