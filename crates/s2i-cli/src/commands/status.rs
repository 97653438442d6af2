//! Status command implementation.

use anyhow::{Context, Result};
use s2i_core::engine::build_catalog;
use s2i_core::iceberg::TableIdent;
use s2i_core::Config;

/// Show catalog connectivity, namespaces and the state of configured tables.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;
    let location = config.catalog.uri.as_deref().unwrap_or("in-memory");
    println!("Checking catalog at {}...\n", location);

    let catalog = build_catalog(&config.catalog)
        .await
        .context("Failed to connect to catalog")?;

    let health = catalog.health_check().await?;
    let status = if health.is_healthy { "[OK]" } else { "[FAIL]" };
    match &health.message {
        Some(msg) => println!(
            "{} {:?} catalog ({} ms): {}",
            status, health.catalog_type, health.response_time_ms, msg
        ),
        None => println!(
            "{} {:?} catalog ({} ms)",
            status, health.catalog_type, health.response_time_ms
        ),
    }
    if !health.is_healthy {
        catalog.close().await?;
        return Ok(());
    }

    let namespaces = catalog.list_namespaces().await?;
    println!("\nNamespaces:");
    if namespaces.is_empty() {
        println!("  (none)");
    }
    for namespace in &namespaces {
        println!("  {}", namespace);
    }

    if !config.tables.is_empty() {
        println!("\nTables:");
        for table in &config.tables {
            let ident = TableIdent::new(&table.namespace, &table.name);
            let state = if !namespaces.contains(&table.namespace) {
                "[FAIL] namespace missing"
            } else if catalog.table_exists(&ident).await? {
                "[OK] exists"
            } else {
                "[--] not created yet"
            };
            println!("  {:<40} {:<9} {}", ident.to_string(), table.write_mode, state);
        }
    }

    catalog.close().await?;
    Ok(())
}
