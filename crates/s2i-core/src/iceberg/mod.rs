//! Iceberg table writes.
//!
//! This module turns declared table configurations into Iceberg tables and
//! drives writes into them:
//!
//! - Type mapping between config, Iceberg and Arrow type names
//! - Schema, partition spec and sort order construction
//! - One-directional reconciliation against a live table schema
//! - The append / upsert / overwrite write state machine
//! - Catalog factory pattern with REST and in-memory catalogs
//! - Parquet data files and snapshot commits for REST tables

mod batch;
mod factory;
mod memory;
pub mod rest_api;
mod schema_builder;
mod schema_reconciler;
mod table_manager;
mod types;
mod writer;

pub use batch::{align_to_schema, merge_by_key, prepare_batch, project_schema, KeyedMerge};
pub use factory::{
    CatalogFactory, CatalogFactoryRegistry, CatalogHealth, CatalogOperations, RestCatalogClient,
    RestCatalogFactory, SchemaFieldInfo, SnapshotCommitResult, TableHandle, TableIdent,
    TableSchema,
};
pub use memory::{CatalogCall, CatalogOp, MemoryCatalog, MemoryCatalogFactory};
pub use schema_builder::{
    key_columns, CanonicalField, CanonicalSchema, ColumnSpec, PartitionField, PartitionSpec,
    PartitionTransform, SortField, SortSpec, SortTransform, TableLayout, PARQUET_FIELD_ID_KEY,
};
pub use schema_reconciler::{reconcile, RemoteType, SchemaMismatch};
pub use table_manager::{TableManager, TableManagerBuilder, WriteMode, WriteOutcome, WriteStage};
pub use types::{from_canonical, to_canonical, TimeUnit, TypeTag, TypeVocabulary};
