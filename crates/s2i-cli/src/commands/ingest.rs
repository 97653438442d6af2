//! Ingest command implementation.

use anyhow::Result;
use s2i_core::engine::IngestionJob;
use s2i_core::Config;
use tracing::info;

/// Run the selected table jobs, or all of them.
pub async fn run(config: Config, tables: &[String]) -> Result<()> {
    info!(
        tables = config.tables.len(),
        selected = ?tables,
        "Starting ingestion"
    );

    let job = IngestionJob::new(config).await?;
    let outcomes = job.run(tables).await;
    job.catalog().close().await?;
    let outcomes = outcomes?;

    for outcome in &outcomes {
        let action = match (outcome.created, outcome.recreated) {
            (true, _) => "created",
            (_, true) => "recreated",
            _ => "existing",
        };
        println!(
            "{:<40} {:<9} {:<9} rows={} snapshot={}",
            outcome.table.to_string(),
            outcome.mode.as_str(),
            action,
            outcome.rows_written,
            outcome
                .snapshot_id
                .map_or_else(|| "-".to_string(), |id| id.to_string())
        );
    }

    info!(tables = outcomes.len(), "Ingestion finished");
    Ok(())
}
