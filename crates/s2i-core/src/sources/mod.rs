//! Batch sources feeding the write orchestrator.

mod clickhouse;
mod sheets;

pub use clickhouse::ClickHouseSource;
pub use sheets::{SheetBatchShape, SheetSource};

use crate::config::{Config, SourceConfig, TableConfig};
use crate::error::{ConfigError, Result};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

/// Something that yields one batch per job run.
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Read the full batch.
    async fn read(&self) -> Result<RecordBatch>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Build the source declared for `table`.
pub fn source_for_table(config: &Config, table: &TableConfig) -> Result<Box<dyn BatchSource>> {
    let source = table.source.as_ref().ok_or_else(|| {
        ConfigError::Invalid(format!("Table {} declares no source", table.identifier()))
    })?;

    match source {
        SourceConfig::ClickHouse { query } => {
            let connection = config.clickhouse.as_ref().ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "Table {} reads from ClickHouse but [clickhouse] is not configured",
                    table.identifier()
                ))
            })?;
            Ok(Box::new(ClickHouseSource::new(connection, query.clone())?))
        }
        SourceConfig::Sheet {
            sheet_id,
            worksheet,
            skip_rows,
        } => {
            let connection = config.sheets.as_ref().ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "Table {} reads from a sheet but [sheets] is not configured",
                    table.identifier()
                ))
            })?;
            let shape = SheetBatchShape {
                columns: table.columns.iter().map(|c| c.name.clone()).collect(),
                skip_rows: *skip_rows,
            };
            Ok(Box::new(SheetSource::new(
                connection,
                sheet_id.clone(),
                worksheet.clone(),
                shape,
            )?))
        }
    }
}
