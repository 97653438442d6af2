//! Iceberg to CRM publishing.

use crate::config::{Config, PublicationConfig};
use crate::crm::{apply_field_mapping, records_from_batches, CrmClient, PushSummary, RecordSink};
use crate::error::{ConfigError, Result};
use crate::iceberg::{project_schema, CatalogOperations, TableManagerBuilder};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;
use tracing::info;

/// Result of one publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub publication: String,
    /// Rows read from the table
    pub rows: usize,
    pub pushed: PushSummary,
}

/// Reads tables and pushes their rows to the CRM.
pub struct PublishJob {
    config: Config,
    catalog: Arc<dyn CatalogOperations>,
    sink: Arc<dyn RecordSink>,
}

impl PublishJob {
    /// Create a job, connecting to the configured catalog and CRM.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let crm = config
            .crm
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("Publishing requires a [crm] section".into()))?;
        let sink = Arc::new(CrmClient::new(crm)?);
        let catalog = super::build_catalog(&config.catalog).await?;
        Ok(Self::with_parts(config, catalog, sink))
    }

    pub fn with_parts(
        config: Config,
        catalog: Arc<dyn CatalogOperations>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            config,
            catalog,
            sink,
        }
    }

    /// Run the named publications, or all of them when `selected` is empty.
    pub async fn run(&self, selected: &[String]) -> Result<Vec<PublishReport>> {
        let publications: Vec<&PublicationConfig> = if selected.is_empty() {
            self.config.publications.iter().collect()
        } else {
            selected
                .iter()
                .map(|name| {
                    self.config.publication(name).ok_or_else(|| {
                        ConfigError::Invalid(format!("Unknown publication '{}'", name))
                    })
                })
                .collect::<std::result::Result<_, _>>()?
        };

        let mut reports = Vec::with_capacity(publications.len());
        for publication in publications {
            reports.push(self.run_publication(publication).await?);
        }
        Ok(reports)
    }

    pub async fn run_publication(&self, publication: &PublicationConfig) -> Result<PublishReport> {
        let batches = TableManagerBuilder::new()
            .catalog(self.catalog.clone())
            .namespace(&publication.namespace)
            .table_name(&publication.table)
            .build()?
            .read()
            .await?;
        let batches = project(batches, &publication.columns)?;
        let rows = batches.iter().map(RecordBatch::num_rows).sum();

        let records = apply_field_mapping(records_from_batches(&batches)?, &publication.field_mapping);
        let pushed = self.sink.push(&records).await?;

        info!(
            publication = %publication.name,
            table = %format!("{}.{}", publication.namespace, publication.table),
            rows,
            pushed = pushed.records,
            "Publication finished"
        );
        Ok(PublishReport {
            publication: publication.name.clone(),
            rows,
            pushed,
        })
    }
}

/// Keep only `columns`, in that order. Empty keeps everything.
fn project(batches: Vec<RecordBatch>, columns: &[String]) -> Result<Vec<RecordBatch>> {
    if columns.is_empty() {
        return Ok(batches);
    }
    batches
        .iter()
        .map(|batch| {
            let indices = project_schema(&batch.schema(), columns)?;
            Ok(batch.project(&indices)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::Record;
    use crate::iceberg::{ColumnSpec, MemoryCatalog, TableIdent, TableLayout, TypeTag};
    use arrow::array::{Int64Array, StringArray};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<Record>>,
    }

    #[async_trait]
    impl RecordSink for CollectingSink {
        async fn push(&self, records: &[Record]) -> Result<PushSummary> {
            self.records.lock().extend_from_slice(records);
            Ok(PushSummary {
                records: records.len(),
                requests: 1,
            })
        }
    }

    const CONFIG: &str = r#"
[catalog]
catalog_type = "memory"

[[publications]]
name = "customers-to-crm"
namespace = "crm"
table = "customers"
columns = ["customer_id", "phone"]
field_mapping = { customer_id = "externalId", phone = "mobile" }
"#;

    async fn seeded_catalog() -> Arc<MemoryCatalog> {
        let catalog = Arc::new(MemoryCatalog::new().with_namespace("crm"));
        let specs = vec![
            ColumnSpec::new("customer_id", TypeTag::Int64).key(),
            ColumnSpec::new("phone", TypeTag::Utf8),
            ColumnSpec::new("region", TypeTag::Utf8),
        ];
        let layout = TableLayout::build(&["customer_id", "phone", "region"], &specs).unwrap();
        let ident = TableIdent::new("crm", "customers");
        let handle = catalog.create_table(&ident, &layout).await.unwrap();

        let batch = RecordBatch::try_new(
            Arc::new(layout.schema.to_arrow_schema()),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec!["0901", "0902"])),
                Arc::new(StringArray::from(vec!["north", "south"])),
            ],
        )
        .unwrap();
        catalog.append(&handle, batch).await.unwrap();
        catalog
    }

    #[tokio::test]
    async fn test_publication_projects_and_maps() {
        let catalog = seeded_catalog().await;
        let sink = Arc::new(CollectingSink::default());
        let config: Config = toml::from_str(CONFIG).unwrap();
        let job = PublishJob::with_parts(config, catalog, sink.clone());

        let reports = job.run(&[]).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].rows, 2);
        assert_eq!(reports[0].pushed.records, 2);

        let records = sink.records.lock();
        assert_eq!(records[0].len(), 2);
        assert_eq!(records[0]["externalId"], serde_json::json!(1));
        assert_eq!(records[1]["mobile"], serde_json::json!("0902"));
        assert!(records[0].get("region").is_none());
    }

    #[tokio::test]
    async fn test_unknown_publication() {
        let config: Config = toml::from_str(CONFIG).unwrap();
        let job = PublishJob::with_parts(
            config,
            Arc::new(MemoryCatalog::new()),
            Arc::new(CollectingSink::default()),
        );
        assert!(job.run(&["nope".into()]).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_table_is_reported() {
        let config: Config = toml::from_str(CONFIG).unwrap();
        let job = PublishJob::with_parts(
            config,
            Arc::new(MemoryCatalog::new().with_namespace("crm")),
            Arc::new(CollectingSink::default()),
        );
        assert!(matches!(
            job.run(&[]).await,
            Err(crate::Error::Iceberg(crate::IcebergError::TableNotFound(_)))
        ));
    }
}
