//! Sharded Redis Example
//!
//! Spreads keys over several Redis databases with the weighted
//! consistent-hash router and shows where each key lands.
//!
//! Requires a Redis server. Run with:
//! REDIS_URL=redis://127.0.0.1:6379 cargo run --example sharded_redis

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tagged_cache::backends::ShardedStorage;
use tagged_cache::{
    DEFAULT_LOOKUP_CACHE_SIZE, DEFAULT_REPLICAS, Driver, DriverConfig, ShardNodeConfig, SystemClock,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tagged_cache=info".into()),
        )
        .init();

    println!("=== Tagged Cache: Sharded Redis ===\n");

    let base = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let nodes = vec![
        ShardNodeConfig {
            url: format!("{base}/1"),
            weight: 1,
        },
        ShardNodeConfig {
            url: format!("{base}/2"),
            weight: 1,
        },
        ShardNodeConfig {
            url: format!("{base}/3"),
            weight: 2,
        },
    ];

    let sharded = Arc::new(
        ShardedStorage::connect_redis(&nodes, DEFAULT_REPLICAS, DEFAULT_LOOKUP_CACHE_SIZE).await?,
    );
    let driver = Driver::new(
        DriverConfig::default().with_prefix_id("sharded-demo:"),
        sharded.clone(),
        Arc::new(SystemClock),
    )?;

    // Store 100 tagged entries
    let mut placement: BTreeMap<String, usize> = BTreeMap::new();
    for i in 0..100 {
        let id = format!("session:{i}");
        driver
            .save(&i, &id, &["sessions"], Some(Duration::from_secs(120)))
            .await?;
        let node = sharded.node_for(&driver.config().entry_key(&id))?;
        *placement.entry(node).or_default() += 1;
    }

    println!("Key placement (node weight 1:1:2):");
    for (node, count) in &placement {
        println!("   {node}: {count}");
    }

    // One tag invalidation reaches every shard
    driver.remove_by_tags(&["sessions"]).await?;
    let remaining = driver
        .load_many::<i32>(&["session:0", "session:50", "session:99"])
        .await?
        .into_iter()
        .filter(|(_, value)| value.is_some())
        .count();
    println!("\nAfter remove_by_tags: {remaining} of 3 sampled entries remain");

    Ok(())
}
