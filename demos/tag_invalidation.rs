//! Tag Invalidation Example
//!
//! Stores product pages tagged by category and brand, then invalidates by
//! one tag (union) and by a tag pair (intersection). Uses SQLite when the
//! `sqlite` feature is on, the memory backend otherwise.
//!
//! Run with: cargo run --example tag_invalidation

use tagged_cache::{BackendConfig, Driver, DriverConfig, TagMatch};

const PRODUCTS: [(&str, &str, &str); 4] = [
    ("product:1", "category:phones", "brand:acme"),
    ("product:2", "category:phones", "brand:globex"),
    ("product:3", "category:laptops", "brand:acme"),
    ("product:4", "category:laptops", "brand:globex"),
];

fn backend() -> BackendConfig {
    if cfg!(feature = "sqlite") {
        BackendConfig::Sqlite {
            url: "sqlite::memory:".to_string(),
            table_prefix: "demo_".to_string(),
        }
    } else {
        BackendConfig::Memory
    }
}

async fn populate(driver: &Driver) -> anyhow::Result<()> {
    for (id, category, brand) in PRODUCTS {
        let page = serde_json::json!({ "id": id, "category": category, "brand": brand });
        driver.save(&page, id, &[category, brand], None).await?;
    }
    Ok(())
}

async fn report(driver: &Driver) -> anyhow::Result<()> {
    for (id, _, _) in PRODUCTS {
        let status = if driver.contains(id).await? { "cached" } else { "gone" };
        println!("   {id}: {status}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tagged_cache=info".into()),
        )
        .init();

    println!("=== Tagged Cache: Tag Invalidation ===\n");

    // Union: every entry carrying any of the tags
    let any = Driver::connect(DriverConfig::new(backend())).await?;
    println!("Backend: {}", any.storage().name());
    populate(&any).await?;
    println!("\nremove_by_tags([brand:acme]) with TagMatch::Any");
    any.remove_by_tags(&["brand:acme"]).await?;
    report(&any).await?;

    // Intersection: only entries carrying all of the tags
    let all = Driver::connect(DriverConfig::new(backend()).with_tag_match(TagMatch::All)).await?;
    populate(&all).await?;
    println!("\nremove_by_tags([category:phones, brand:globex]) with TagMatch::All");
    all.remove_by_tags(&["category:phones", "brand:globex"]).await?;
    report(&all).await?;

    Ok(())
}
