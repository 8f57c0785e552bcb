//! Basic Usage Example
//!
//! Demonstrates simple cache operations: save, load, touch, counters and
//! statistics over the in-process memory backend.
//!
//! Run with: cargo run --example basic_usage

use std::time::Duration;
use tagged_cache::{Driver, DriverConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tagged_cache=info".into()),
        )
        .init();

    println!("=== Tagged Cache: Basic Usage ===\n");

    // 1. Initialize the driver (default: in-process memory backend)
    let driver = Driver::connect(DriverConfig::default().with_prefix_id("demo:")).await?;

    // 2. Health check
    if driver.health_check().await {
        println!("✅ Backend is healthy\n");
    }

    // 3. Store data with a five minute lifetime
    let user_data = serde_json::json!({
        "id": 1,
        "name": "Alice",
        "email": "alice@example.com",
        "role": "admin"
    });

    println!("Storing user data (5 min lifetime)...");
    driver
        .save(&user_data, "user:1", &["users"], Some(Duration::from_secs(300)))
        .await?;

    // 4. Retrieve data
    if let Some(cached) = driver.load::<serde_json::Value>("user:1").await? {
        println!("✅ Retrieved from cache: {cached}");
    }

    // 5. Batch load, missing ids come back as None
    for (id, value) in driver
        .load_many::<serde_json::Value>(&["user:1", "user:2"])
        .await?
    {
        println!("   {id}: {}", if value.is_some() { "hit" } else { "miss" });
    }

    // 6. Extend the lifetime
    driver.touch("user:1", Duration::from_secs(60)).await?;

    // 7. Counters
    driver.increment("page_views", 1).await?;
    let views = driver.increment("page_views", 4).await?;
    println!("\nPage views: {views}");

    // 8. Get statistics
    let stats = driver.stats();
    println!("\n=== Driver Statistics ===");
    println!("Hits: {}", stats.hits);
    println!("Misses: {}", stats.misses);
    println!("Saves: {}", stats.saves);
    println!("Hit rate: {:.2}%", stats.hit_rate());

    Ok(())
}
