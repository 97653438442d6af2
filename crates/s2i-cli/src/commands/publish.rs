//! Publish command implementation.

use anyhow::Result;
use s2i_core::engine::PublishJob;
use s2i_core::Config;
use tracing::info;

/// Run the selected publications, or all of them.
pub async fn run(config: Config, publications: &[String]) -> Result<()> {
    info!(
        publications = config.publications.len(),
        selected = ?publications,
        "Starting publish"
    );

    let job = PublishJob::new(config).await?;
    let reports = job.run(publications).await?;

    for report in &reports {
        println!(
            "{:<40} rows={} pushed={} requests={}",
            report.publication, report.rows, report.pushed.records, report.pushed.requests
        );
    }

    Ok(())
}
