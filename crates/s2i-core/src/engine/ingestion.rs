//! Source to Iceberg ingestion.
//!
//! Tables run one after another; the first failure ends the run. Each table
//! is one read from its source followed by one orchestrated write.

use crate::config::{Config, TableConfig};
use crate::error::Result;
use crate::iceberg::{CatalogOperations, TableManager, WriteOutcome};
use crate::sources::source_for_table;
use arrow::record_batch::RecordBatch;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Runs the configured table jobs.
pub struct IngestionJob {
    config: Config,
    catalog: Arc<dyn CatalogOperations>,
}

impl IngestionJob {
    /// Create a job, connecting to the configured catalog.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let catalog = super::build_catalog(&config.catalog).await?;
        Ok(Self::with_catalog(config, catalog))
    }

    pub fn with_catalog(config: Config, catalog: Arc<dyn CatalogOperations>) -> Self {
        Self { config, catalog }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogOperations> {
        &self.catalog
    }

    /// Tables named in `selected`, or every table when empty.
    pub fn select_tables(&self, selected: &[String]) -> Result<Vec<&TableConfig>> {
        if selected.is_empty() {
            return Ok(self.config.tables.iter().collect());
        }
        selected.iter().map(|name| self.config.table(name)).collect()
    }

    /// Run the selected tables in order.
    pub async fn run(&self, selected: &[String]) -> Result<Vec<WriteOutcome>> {
        let tables = self.select_tables(selected)?;
        let mut outcomes = Vec::with_capacity(tables.len());
        for table in tables {
            outcomes.push(self.run_table(table).await?);
        }
        Ok(outcomes)
    }

    /// Read the table's source and write the batch.
    pub async fn run_table(&self, table: &TableConfig) -> Result<WriteOutcome> {
        let manager = TableManager::from_table_config(self.catalog.clone(), table)?;
        let source = source_for_table(&self.config, table)?;

        let start = Instant::now();
        info!(table = %manager.ident(), source = %source.describe(), "Reading source");
        let batch = source.read().await?;
        let outcome = manager.write(batch).await?;

        info!(
            table = %manager.ident(),
            rows = outcome.rows_written,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Table job finished"
        );
        Ok(outcome)
    }

    /// Write an already materialized batch for `table`.
    pub async fn write_batch(&self, table: &TableConfig, batch: RecordBatch) -> Result<WriteOutcome> {
        TableManager::from_table_config(self.catalog.clone(), table)?
            .write(batch)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, Error};
    use crate::iceberg::{MemoryCatalog, TableIdent};
    use arrow::array::StringArray;
    use arrow::datatypes::{DataType, Field, Schema};

    const CONFIG: &str = r#"
[catalog]
catalog_type = "memory"
namespaces = ["crm"]

[[tables]]
name = "customers"
namespace = "crm"
primary_key = ["customer_id"]
write_mode = "upsert"
columns = [
    { name = "customer_id", data_type = "string" },
    { name = "region", data_type = "string" },
]

[[tables]]
name = "bad_mode"
namespace = "crm"
write_mode = "merge"
columns = [{ name = "customer_id", data_type = "string" }]
"#;

    fn job(catalog: Arc<MemoryCatalog>) -> IngestionJob {
        let config: Config = toml::from_str(CONFIG).unwrap();
        IngestionJob::with_catalog(config, catalog)
    }

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("customer_id", DataType::Utf8, true),
            Field::new("region", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["c1", "c2"])),
                Arc::new(StringArray::from(vec!["north", "south"])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_select_tables() {
        let job = job(Arc::new(MemoryCatalog::new()));
        assert_eq!(job.select_tables(&[]).unwrap().len(), 2);
        assert_eq!(job.select_tables(&["crm.customers".into()]).unwrap()[0].name, "customers");
        assert!(job.select_tables(&["missing".into()]).is_err());
    }

    #[test]
    fn test_select_tables_rejects_ambiguous_bare_name() {
        let mut config: Config = toml::from_str(CONFIG).unwrap();
        let mut archived = config.tables[0].clone();
        archived.namespace = "archive".into();
        config.tables.push(archived);
        let job = IngestionJob::with_catalog(config, Arc::new(MemoryCatalog::new()));

        match job.select_tables(&["customers".into()]).unwrap_err() {
            Error::Config(ConfigError::Invalid(message)) => {
                assert!(message.contains("ambiguous"), "{}", message);
                assert!(message.contains("crm.customers"), "{}", message);
                assert!(message.contains("archive.customers"), "{}", message);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let selected = job.select_tables(&["archive.customers".into()]).unwrap();
        assert_eq!(selected[0].namespace, "archive");
    }

    #[tokio::test]
    async fn test_write_batch_creates_table() {
        let catalog = Arc::new(MemoryCatalog::new().with_namespace("crm"));
        let job = job(catalog.clone());
        let table = job.config.table("customers").unwrap().clone();

        let outcome = job.write_batch(&table, batch()).await.unwrap();
        assert!(outcome.created);
        assert_eq!(catalog.row_count(&TableIdent::new("crm", "customers")), Some(2));
    }

    #[tokio::test]
    async fn test_table_without_source_fails_before_catalog() {
        let catalog = Arc::new(MemoryCatalog::new().with_namespace("crm"));
        let job = job(catalog.clone());

        let err = job.run(&["customers".into()]).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Invalid(_))));
        assert!(catalog.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_mode_fails_before_catalog() {
        let catalog = Arc::new(MemoryCatalog::new().with_namespace("crm"));
        let job = job(catalog.clone());
        let table = job.config.table("bad_mode").unwrap().clone();

        let err = job.write_batch(&table, batch()).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::InvalidWriteMode(_))));
        assert!(catalog.calls().is_empty());
    }
}
