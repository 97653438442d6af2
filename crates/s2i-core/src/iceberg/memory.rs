//! In-process catalog.
//!
//! Keeps tables as Arrow batches behind a lock. Every call is recorded so
//! callers can assert on the exact sequence the orchestrator issued, and any
//! operation can be made to fail once with [`MemoryCatalog::fail_next`].

use crate::config::{CatalogConfig, CatalogType};
use crate::error::{ConfigError, IcebergError, Result};
use crate::iceberg::batch::{align_to_schema, merge_by_key, KeyedMerge};
use crate::iceberg::factory::{
    CatalogFactory, CatalogHealth, CatalogOperations, SnapshotCommitResult, TableHandle,
    TableIdent, TableSchema,
};
use crate::iceberg::schema_builder::TableLayout;
use crate::iceberg::table_manager::WriteMode;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Kind of catalog call, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogOp {
    ListNamespaces,
    NamespaceExists,
    TableExists,
    LoadTable,
    CreateTable,
    DropTable,
    Scan,
    Append,
    Upsert,
    Overwrite,
}

/// A recorded catalog call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogCall {
    ListNamespaces,
    NamespaceExists(String),
    TableExists(TableIdent),
    LoadTable(TableIdent),
    CreateTable(TableIdent),
    DropTable(TableIdent),
    Scan(TableIdent),
    Append { table: TableIdent, rows: usize },
    Upsert { table: TableIdent, rows: usize },
    Overwrite { table: TableIdent, rows: usize },
}

impl CatalogCall {
    pub fn op(&self) -> CatalogOp {
        match self {
            CatalogCall::ListNamespaces => CatalogOp::ListNamespaces,
            CatalogCall::NamespaceExists(_) => CatalogOp::NamespaceExists,
            CatalogCall::TableExists(_) => CatalogOp::TableExists,
            CatalogCall::LoadTable(_) => CatalogOp::LoadTable,
            CatalogCall::CreateTable(_) => CatalogOp::CreateTable,
            CatalogCall::DropTable(_) => CatalogOp::DropTable,
            CatalogCall::Scan(_) => CatalogOp::Scan,
            CatalogCall::Append { .. } => CatalogOp::Append,
            CatalogCall::Upsert { .. } => CatalogOp::Upsert,
            CatalogCall::Overwrite { .. } => CatalogOp::Overwrite,
        }
    }
}

#[derive(Debug)]
struct MemoryTable {
    handle: TableHandle,
    layout: Option<TableLayout>,
    batches: Vec<RecordBatch>,
}

impl MemoryTable {
    fn row_count(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }
}

/// Catalog holding tables in memory.
pub struct MemoryCatalog {
    namespaces: RwLock<BTreeSet<String>>,
    tables: RwLock<HashMap<TableIdent, MemoryTable>>,
    calls: Mutex<Vec<CatalogCall>>,
    faults: Mutex<HashMap<CatalogOp, String>>,
    next_snapshot_id: AtomicI64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(BTreeSet::new()),
            tables: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            next_snapshot_id: AtomicI64::new(1),
        }
    }

    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        self.create_namespace(namespace);
        self
    }

    pub fn create_namespace(&self, namespace: impl Into<String>) {
        self.namespaces.write().insert(namespace.into());
    }

    /// Register a table with an arbitrary stored schema and no data.
    pub fn register_table(&self, ident: TableIdent, schema: TableSchema) {
        let handle = new_handle(&ident, schema);
        self.tables.write().insert(
            ident,
            MemoryTable {
                handle,
                layout: None,
                batches: Vec::new(),
            },
        );
    }

    /// Make the next call of kind `op` fail with a connection error.
    pub fn fail_next(&self, op: CatalogOp, message: impl Into<String>) {
        self.faults.lock().insert(op, message.into());
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<CatalogCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Layout the table was created with, if it was created through the catalog.
    pub fn table_layout(&self, ident: &TableIdent) -> Option<TableLayout> {
        self.tables.read().get(ident).and_then(|t| t.layout.clone())
    }

    pub fn row_count(&self, ident: &TableIdent) -> Option<usize> {
        self.tables.read().get(ident).map(MemoryTable::row_count)
    }

    fn record(&self, call: CatalogCall) -> Result<()> {
        let op = call.op();
        self.calls.lock().push(call);
        match self.faults.lock().remove(&op) {
            Some(message) => Err(IcebergError::CatalogConnection(message).into()),
            None => Ok(()),
        }
    }

    fn commit(&self, table: &mut MemoryTable, operation: WriteMode, added: usize, deleted: usize) -> SnapshotCommitResult {
        let snapshot_id = self.next_snapshot_id.fetch_add(1, Ordering::SeqCst);
        table.handle.current_snapshot_id = Some(snapshot_id);
        debug!(
            table = %table.handle.ident,
            snapshot_id,
            operation = %operation,
            added,
            deleted,
            "Committed snapshot"
        );
        SnapshotCommitResult {
            snapshot_id: Some(snapshot_id),
            operation,
            added_records: added,
            deleted_records: deleted,
            committed_at: chrono::Utc::now(),
        }
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn new_handle(ident: &TableIdent, schema: TableSchema) -> TableHandle {
    TableHandle {
        ident: ident.clone(),
        location: format!("memory://{}/{}", ident.namespace.replace('.', "/"), ident.name),
        uuid: uuid::Uuid::new_v4().to_string(),
        current_snapshot_id: None,
        schema,
        properties: HashMap::from([("format-version".to_string(), "2".to_string())]),
    }
}

fn table_not_found(ident: &TableIdent) -> IcebergError {
    IcebergError::TableNotFound(ident.to_string())
}

#[async_trait]
impl CatalogOperations for MemoryCatalog {
    async fn health_check(&self) -> Result<CatalogHealth> {
        Ok(CatalogHealth {
            is_healthy: true,
            response_time_ms: 0,
            message: Some(format!("{} tables in memory", self.tables.read().len())),
            catalog_type: CatalogType::Memory,
        })
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        self.record(CatalogCall::ListNamespaces)?;
        Ok(self.namespaces.read().iter().cloned().collect())
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        self.record(CatalogCall::NamespaceExists(namespace.to_string()))?;
        Ok(self.namespaces.read().contains(namespace))
    }

    async fn table_exists(&self, ident: &TableIdent) -> Result<bool> {
        self.record(CatalogCall::TableExists(ident.clone()))?;
        Ok(self.tables.read().contains_key(ident))
    }

    async fn load_table(&self, ident: &TableIdent) -> Result<TableHandle> {
        self.record(CatalogCall::LoadTable(ident.clone()))?;
        self.tables
            .read()
            .get(ident)
            .map(|t| t.handle.clone())
            .ok_or_else(|| table_not_found(ident).into())
    }

    async fn create_table(&self, ident: &TableIdent, layout: &TableLayout) -> Result<TableHandle> {
        self.record(CatalogCall::CreateTable(ident.clone()))?;
        if !self.namespaces.read().contains(&ident.namespace) {
            return Err(IcebergError::NamespaceNotFound(ident.namespace.clone()).into());
        }

        let mut tables = self.tables.write();
        if tables.contains_key(ident) {
            return Err(IcebergError::TableAlreadyExists(ident.to_string()).into());
        }
        let handle = new_handle(ident, TableSchema::from_canonical(&layout.schema));
        tables.insert(
            ident.clone(),
            MemoryTable {
                handle: handle.clone(),
                layout: Some(layout.clone()),
                batches: Vec::new(),
            },
        );

        info!(table = %ident, location = %handle.location, "Created table");
        Ok(handle)
    }

    async fn drop_table(&self, ident: &TableIdent) -> Result<()> {
        self.record(CatalogCall::DropTable(ident.clone()))?;
        self.tables
            .write()
            .remove(ident)
            .ok_or_else(|| table_not_found(ident))?;

        info!(table = %ident, "Dropped table");
        Ok(())
    }

    async fn scan(&self, table: &TableHandle) -> Result<Vec<RecordBatch>> {
        self.record(CatalogCall::Scan(table.ident.clone()))?;
        self.tables
            .read()
            .get(&table.ident)
            .map(|t| t.batches.clone())
            .ok_or_else(|| table_not_found(&table.ident).into())
    }

    async fn append(&self, table: &TableHandle, batch: RecordBatch) -> Result<SnapshotCommitResult> {
        self.record(CatalogCall::Append {
            table: table.ident.clone(),
            rows: batch.num_rows(),
        })?;

        let mut tables = self.tables.write();
        let stored = tables
            .get_mut(&table.ident)
            .ok_or_else(|| table_not_found(&table.ident))?;
        let aligned = align_to_schema(&batch, &Arc::new(stored.handle.schema.to_arrow_schema()?))?;
        let added = aligned.num_rows();
        stored.batches.push(aligned);

        Ok(self.commit(stored, WriteMode::Append, added, 0))
    }

    async fn upsert(
        &self,
        table: &TableHandle,
        batch: RecordBatch,
        join_columns: &[String],
    ) -> Result<SnapshotCommitResult> {
        self.record(CatalogCall::Upsert {
            table: table.ident.clone(),
            rows: batch.num_rows(),
        })?;
        if join_columns.is_empty() {
            return Err(ConfigError::UpsertWithoutKeys {
                table: table.ident.to_string(),
            }
            .into());
        }

        let mut tables = self.tables.write();
        let stored = tables
            .get_mut(&table.ident)
            .ok_or_else(|| table_not_found(&table.ident))?;
        let schema = Arc::new(stored.handle.schema.to_arrow_schema()?);
        let incoming = align_to_schema(&batch, &schema)?;

        let KeyedMerge { mut kept, replaced } = merge_by_key(&stored.batches, &incoming, join_columns)?;
        let added = incoming.num_rows();
        kept.push(incoming);
        stored.batches = kept;

        Ok(self.commit(stored, WriteMode::Upsert, added, replaced))
    }

    async fn overwrite(&self, table: &TableHandle, batch: RecordBatch) -> Result<SnapshotCommitResult> {
        self.record(CatalogCall::Overwrite {
            table: table.ident.clone(),
            rows: batch.num_rows(),
        })?;

        let mut tables = self.tables.write();
        let stored = tables
            .get_mut(&table.ident)
            .ok_or_else(|| table_not_found(&table.ident))?;
        let aligned = align_to_schema(&batch, &Arc::new(stored.handle.schema.to_arrow_schema()?))?;
        let deleted = stored.row_count();
        let added = aligned.num_rows();
        stored.batches = vec![aligned];

        Ok(self.commit(stored, WriteMode::Overwrite, added, deleted))
    }

    fn catalog_type(&self) -> CatalogType {
        CatalogType::Memory
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory for the in-memory catalog.
pub struct MemoryCatalogFactory;

#[async_trait]
impl CatalogFactory for MemoryCatalogFactory {
    async fn create(&self, config: &CatalogConfig) -> Result<Arc<dyn CatalogOperations>> {
        let catalog = MemoryCatalog::new();
        for namespace in &config.namespaces {
            catalog.create_namespace(namespace.clone());
        }
        info!(namespaces = config.namespaces.len(), "Memory catalog initialized");
        Ok(Arc::new(catalog))
    }

    fn catalog_type(&self) -> CatalogType {
        CatalogType::Memory
    }
}
