//! Table write orchestration.
//!
//! A [`TableManager`] owns one table identifier and its declared columns and
//! drives a single write through the catalog:
//!
//! ```text
//! NamespaceCheck -> TableExistenceCheck -+-> CreateTable ----------------+-> Dispatch -> Done
//!                                        +-> SchemaValidate -------------+
//!                                              (overwrite) -> Recreate --+
//! ```
//!
//! Everything that can be decided without the catalog (write mode, upsert
//! keys, column presence, casts) is checked before the first call. There are
//! no retries. Overwrite drops and recreates the table, so a failure between
//! the drop and the create leaves the table absent; callers must hold
//! exclusive access to the table for the duration of an overwrite.

use crate::config::TableConfig;
use crate::error::{ConfigError, Error, IcebergError, Result};
use crate::iceberg::batch::prepare_batch;
use crate::iceberg::factory::{CatalogOperations, SnapshotCommitResult, TableHandle, TableIdent};
use crate::iceberg::schema_builder::{key_columns, ColumnSpec, TableLayout};
use crate::iceberg::schema_reconciler::reconcile;
use arrow::record_batch::RecordBatch;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Write strategy for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// Add rows in a new snapshot
    Append,
    /// Replace rows with matching keys, insert the rest
    Upsert,
    /// Drop and recreate the table, then write the batch
    Overwrite,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Append => "append",
            WriteMode::Upsert => "upsert",
            WriteMode::Overwrite => "overwrite",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "append" => Ok(WriteMode::Append),
            "upsert" => Ok(WriteMode::Upsert),
            "overwrite" => Ok(WriteMode::Overwrite),
            other => Err(ConfigError::InvalidWriteMode(other.to_string()).into()),
        }
    }
}

/// A step of the write state machine, as recorded in [`WriteOutcome::stages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    NamespaceCheck,
    TableExistenceCheck,
    CreateTable,
    SchemaValidate,
    Recreate,
    DispatchAppend,
    DispatchUpsert,
    DispatchOverwrite,
    Done,
}

impl WriteStage {
    fn dispatch(mode: WriteMode) -> Self {
        match mode {
            WriteMode::Append => WriteStage::DispatchAppend,
            WriteMode::Upsert => WriteStage::DispatchUpsert,
            WriteMode::Overwrite => WriteStage::DispatchOverwrite,
        }
    }
}

enum WriteState {
    NamespaceCheck,
    TableExistenceCheck,
    CreateTable,
    SchemaValidate(TableHandle),
    Recreate(TableHandle),
    Dispatch(TableHandle),
    Done(SnapshotCommitResult),
}

impl WriteState {
    fn stage(&self, mode: WriteMode) -> WriteStage {
        match self {
            WriteState::NamespaceCheck => WriteStage::NamespaceCheck,
            WriteState::TableExistenceCheck => WriteStage::TableExistenceCheck,
            WriteState::CreateTable => WriteStage::CreateTable,
            WriteState::SchemaValidate(_) => WriteStage::SchemaValidate,
            WriteState::Recreate(_) => WriteStage::Recreate,
            WriteState::Dispatch(_) => WriteStage::dispatch(mode),
            WriteState::Done(_) => WriteStage::Done,
        }
    }
}

/// Result of a successful write.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub table: TableIdent,
    pub mode: WriteMode,
    /// The table did not exist and was created
    pub created: bool,
    /// The table was dropped and recreated for an overwrite
    pub recreated: bool,
    pub rows_written: usize,
    /// Rows removed or replaced by the write
    pub rows_deleted: usize,
    pub snapshot_id: Option<i64>,
    /// States visited, in order
    pub stages: Vec<WriteStage>,
}

/// Writes batches into one table.
pub struct TableManager {
    catalog: Arc<dyn CatalogOperations>,
    ident: TableIdent,
    columns: Vec<ColumnSpec>,
    mode: WriteMode,
}

impl TableManager {
    pub fn new(
        catalog: Arc<dyn CatalogOperations>,
        ident: TableIdent,
        columns: Vec<ColumnSpec>,
        mode: WriteMode,
    ) -> Self {
        Self {
            catalog,
            ident,
            columns,
            mode,
        }
    }

    /// Build a manager from a table declaration.
    ///
    /// Fails on an unknown write mode or unresolvable columns.
    pub fn from_table_config(catalog: Arc<dyn CatalogOperations>, config: &TableConfig) -> Result<Self> {
        let mode = config.write_mode()?;
        let columns = config.column_specs()?;
        Ok(Self::new(
            catalog,
            TableIdent::new(&config.namespace, &config.name),
            columns,
            mode,
        ))
    }

    pub fn ident(&self) -> &TableIdent {
        &self.ident
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Declared key columns, in declaration order.
    pub fn key_columns(&self) -> Vec<String> {
        key_columns(&self.columns)
    }

    /// Write `batch` with the configured mode.
    pub async fn write(&self, batch: RecordBatch) -> Result<WriteOutcome> {
        match self.execute(batch).await {
            Ok(outcome) => {
                info!(
                    table = %self.ident,
                    mode = %self.mode,
                    rows = outcome.rows_written,
                    deleted = outcome.rows_deleted,
                    snapshot_id = ?outcome.snapshot_id,
                    created = outcome.created,
                    recreated = outcome.recreated,
                    "Write committed"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(table = %self.ident, mode = %self.mode, error = %e, "Write failed");
                Err(e)
            }
        }
    }

    async fn execute(&self, batch: RecordBatch) -> Result<WriteOutcome> {
        let keys = self.key_columns();
        if self.mode == WriteMode::Upsert && keys.is_empty() {
            return Err(ConfigError::UpsertWithoutKeys {
                table: self.ident.to_string(),
            }
            .into());
        }
        if !self.catalog.supports_write(self.mode) {
            return Err(IcebergError::Unsupported {
                catalog: self.catalog.catalog_type().to_string(),
                operation: self.mode.as_str(),
            }
            .into());
        }

        let schema = batch.schema();
        let batch_columns: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        let layout = TableLayout::build(&batch_columns, &self.columns)?;
        let prepared = prepare_batch(&batch, &layout.schema)?;

        let mut outcome = WriteOutcome {
            table: self.ident.clone(),
            mode: self.mode,
            created: false,
            recreated: false,
            rows_written: 0,
            rows_deleted: 0,
            snapshot_id: None,
            stages: Vec::new(),
        };

        let mut state = WriteState::NamespaceCheck;
        loop {
            let stage = state.stage(self.mode);
            debug!(table = %self.ident, stage = ?stage, "Write state");
            outcome.stages.push(stage);

            state = match state {
                WriteState::NamespaceCheck => {
                    if !self.catalog.namespace_exists(&self.ident.namespace).await? {
                        return Err(IcebergError::NamespaceNotFound(self.ident.namespace.clone()).into());
                    }
                    WriteState::TableExistenceCheck
                }
                WriteState::TableExistenceCheck => {
                    if self.catalog.table_exists(&self.ident).await? {
                        WriteState::SchemaValidate(self.catalog.load_table(&self.ident).await?)
                    } else {
                        WriteState::CreateTable
                    }
                }
                WriteState::CreateTable => {
                    let handle = self.catalog.create_table(&self.ident, &layout).await?;
                    outcome.created = true;
                    WriteState::Dispatch(handle)
                }
                WriteState::SchemaValidate(handle) if self.mode == WriteMode::Overwrite => {
                    WriteState::Recreate(handle)
                }
                WriteState::SchemaValidate(handle) => {
                    let mismatches = reconcile(&layout.schema, &handle.schema);
                    if !mismatches.is_empty() {
                        for mismatch in &mismatches {
                            warn!(
                                table = %self.ident,
                                column = %mismatch.column,
                                expected = %mismatch.expected_display(),
                                actual = %mismatch.actual_display(),
                                "Schema mismatch"
                            );
                        }
                        return Err(IcebergError::SchemaMismatch {
                            table: self.ident.to_string(),
                            mismatches,
                        }
                        .into());
                    }
                    WriteState::Dispatch(handle)
                }
                WriteState::Recreate(handle) => {
                    self.catalog.drop_table(&handle.ident).await?;
                    let handle = self.catalog.create_table(&self.ident, &layout).await?;
                    outcome.recreated = true;
                    WriteState::Dispatch(handle)
                }
                WriteState::Dispatch(handle) => {
                    let result = self
                        .dispatch(&handle, prepared.clone(), &keys)
                        .await
                        .map_err(|e| IcebergError::Write {
                            table: self.ident.to_string(),
                            mode: self.mode.to_string(),
                            source: Box::new(e),
                        })?;
                    WriteState::Done(result)
                }
                WriteState::Done(result) => {
                    outcome.rows_written = result.added_records;
                    outcome.rows_deleted = result.deleted_records;
                    outcome.snapshot_id = result.snapshot_id;
                    return Ok(outcome);
                }
            };
        }
    }

    async fn dispatch(
        &self,
        handle: &TableHandle,
        batch: RecordBatch,
        keys: &[String],
    ) -> Result<SnapshotCommitResult> {
        match self.mode {
            WriteMode::Append => self.catalog.append(handle, batch).await,
            WriteMode::Upsert => self.catalog.upsert(handle, batch, keys).await,
            WriteMode::Overwrite => self.catalog.overwrite(handle, batch).await,
        }
    }

    /// Check whether the table currently exists.
    pub async fn exists(&self) -> Result<bool> {
        self.catalog.table_exists(&self.ident).await
    }

    /// Read the current table contents.
    pub async fn read(&self) -> Result<Vec<RecordBatch>> {
        let handle = self.catalog.load_table(&self.ident).await?;
        let batches = self.catalog.scan(&handle).await?;
        debug!(
            table = %self.ident,
            batches = batches.len(),
            rows = batches.iter().map(RecordBatch::num_rows).sum::<usize>(),
            "Scanned table"
        );
        Ok(batches)
    }
}

/// Builder for creating TableManager instances.
pub struct TableManagerBuilder {
    catalog: Option<Arc<dyn CatalogOperations>>,
    namespace: Option<String>,
    table_name: Option<String>,
    columns: Vec<ColumnSpec>,
    mode: WriteMode,
}

impl TableManagerBuilder {
    pub fn new() -> Self {
        Self {
            catalog: None,
            namespace: None,
            table_name: None,
            columns: Vec::new(),
            mode: WriteMode::Append,
        }
    }

    pub fn catalog(mut self, catalog: Arc<dyn CatalogOperations>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(mut self, columns: Vec<ColumnSpec>) -> Self {
        self.columns = columns;
        self
    }

    pub fn mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Build the TableManager.
    pub fn build(self) -> Result<TableManager> {
        let catalog = self
            .catalog
            .ok_or_else(|| ConfigError::Invalid("TableManager requires a catalog".into()))?;
        let namespace = self
            .namespace
            .ok_or_else(|| ConfigError::Invalid("TableManager requires a namespace".into()))?;
        let table_name = self
            .table_name
            .ok_or_else(|| ConfigError::Invalid("TableManager requires a table name".into()))?;

        Ok(TableManager::new(
            catalog,
            TableIdent::new(namespace, table_name),
            self.columns,
            self.mode,
        ))
    }
}

impl Default for TableManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iceberg::memory::{CatalogCall, CatalogOp, MemoryCatalog};
    use crate::iceberg::types::TypeTag;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    fn orders() -> TableIdent {
        TableIdent::new("sales", "orders")
    }

    fn batch(ids: Vec<i64>) -> RecordBatch {
        let statuses: Vec<String> = ids.iter().map(|i| format!("s{i}")).collect();
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("status", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(statuses)),
            ],
        )
        .unwrap()
    }

    fn manager(catalog: Arc<MemoryCatalog>, mode: WriteMode) -> TableManager {
        TableManagerBuilder::new()
            .catalog(catalog)
            .namespace("sales")
            .table_name("orders")
            .column(ColumnSpec::new("id", TypeTag::Int64).key())
            .column(ColumnSpec::new("status", TypeTag::Utf8))
            .mode(mode)
            .build()
            .unwrap()
    }

    #[test]
    fn test_write_mode_parse() {
        assert_eq!("append".parse::<WriteMode>().unwrap(), WriteMode::Append);
        assert_eq!("overwrite".parse::<WriteMode>().unwrap(), WriteMode::Overwrite);
        assert!(matches!(
            "merge".parse::<WriteMode>(),
            Err(Error::Config(ConfigError::InvalidWriteMode(mode))) if mode == "merge"
        ));
        assert_eq!(WriteMode::Upsert.to_string(), "upsert");
    }

    #[test]
    fn test_builder_missing_catalog() {
        let result = TableManagerBuilder::new()
            .namespace("sales")
            .table_name("orders")
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_new_table_visits_create_then_dispatch() {
        let catalog = Arc::new(MemoryCatalog::new().with_namespace("sales"));
        let outcome = manager(catalog.clone(), WriteMode::Append)
            .write(batch(vec![1, 2]))
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.rows_written, 2);
        assert_eq!(
            outcome.stages,
            vec![
                WriteStage::NamespaceCheck,
                WriteStage::TableExistenceCheck,
                WriteStage::CreateTable,
                WriteStage::DispatchAppend,
                WriteStage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_existing_table_is_validated() {
        let catalog = Arc::new(MemoryCatalog::new().with_namespace("sales"));
        let manager = manager(catalog.clone(), WriteMode::Append);
        manager.write(batch(vec![1])).await.unwrap();

        let outcome = manager.write(batch(vec![2])).await.unwrap();
        assert!(!outcome.created);
        assert!(outcome.stages.contains(&WriteStage::SchemaValidate));
        assert_eq!(catalog.row_count(&orders()), Some(2));
    }

    #[tokio::test]
    async fn test_missing_namespace_stops_early() {
        let catalog = Arc::new(MemoryCatalog::new());
        let err = manager(catalog.clone(), WriteMode::Append)
            .write(batch(vec![1]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Iceberg(IcebergError::NamespaceNotFound(_))));
        assert_eq!(catalog.calls(), vec![CatalogCall::NamespaceExists("sales".into())]);
    }

    #[tokio::test]
    async fn test_upsert_without_keys_makes_no_calls() {
        let catalog = Arc::new(MemoryCatalog::new().with_namespace("sales"));
        let manager = TableManagerBuilder::new()
            .catalog(catalog.clone())
            .namespace("sales")
            .table_name("orders")
            .column(ColumnSpec::new("id", TypeTag::Int64))
            .mode(WriteMode::Upsert)
            .build()
            .unwrap();

        let err = manager.write(batch(vec![1])).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::UpsertWithoutKeys { .. })));
        assert!(catalog.calls().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_becomes_write_error() {
        let catalog = Arc::new(MemoryCatalog::new().with_namespace("sales"));
        catalog.fail_next(CatalogOp::Append, "disk full");

        let err = manager(catalog.clone(), WriteMode::Append)
            .write(batch(vec![1]))
            .await
            .unwrap_err();

        match err {
            Error::Iceberg(IcebergError::Write { table, mode, source }) => {
                assert_eq!(table, "sales.orders");
                assert_eq!(mode, "append");
                assert!(source.to_string().contains("disk full"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Created table is not rolled back
        assert_eq!(catalog.row_count(&orders()), Some(0));
    }

    #[tokio::test]
    async fn test_read_returns_rows() {
        let catalog = Arc::new(MemoryCatalog::new().with_namespace("sales"));
        let manager = manager(catalog, WriteMode::Append);
        assert!(!manager.exists().await.unwrap());
        manager.write(batch(vec![1, 2, 3])).await.unwrap();

        let rows: usize = manager.read().await.unwrap().iter().map(RecordBatch::num_rows).sum();
        assert_eq!(rows, 3);
    }
}
