//! Stampede Protection Example
//!
//! Many concurrent readers hit an expired entry. One of them takes the lock
//! and recomputes; the others are served the stale value meanwhile.
//!
//! Run with: cargo run --example stampede_protection

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tagged_cache::{CacheError, Driver, DriverConfig};
use tokio::task::JoinSet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tagged_cache=info".into()),
        )
        .init();

    println!("=== Tagged Cache: Stampede Protection ===\n");

    let driver = Arc::new(Driver::connect(DriverConfig::default()).await?);
    let computations = Arc::new(AtomicU32::new(0));

    // Seed an entry that expires after one second
    driver
        .save(&"report v1", "daily_report", &["reports"], Some(Duration::from_secs(1)))
        .await?;
    tokio::time::sleep(Duration::from_millis(2100)).await;
    println!("Entry expired, spawning 20 concurrent readers...\n");

    let mut tasks = JoinSet::new();
    for reader in 0..20 {
        let driver = Arc::clone(&driver);
        let computations = Arc::clone(&computations);
        tasks.spawn(async move {
            let report: Result<String, CacheError> = driver
                .load_or_compute(
                    "daily_report",
                    Duration::from_secs(10),
                    &["reports"],
                    Some(Duration::from_secs(60)),
                    || async {
                        computations.fetch_add(1, Ordering::SeqCst);
                        // Simulate an expensive query
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok("report v2".to_string())
                    },
                )
                .await;
            (reader, report)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (reader, report) = joined?;
        println!("reader {reader:>2}: {}", report?);
    }

    let stats = driver.stats();
    println!("\n=== Results ===");
    println!("Computations: {}", computations.load(Ordering::SeqCst));
    println!("Locks acquired: {}", stats.locks_acquired);
    println!("Stale values served: {}", stats.stale_served);

    Ok(())
}
