//! S2I Core - source to Iceberg batch ingestion
//!
//! This library lands tabular batches from ClickHouse queries and Google
//! Sheets into Apache Iceberg tables, and republishes selected columns to a
//! CRM endpoint:
//!
//! - Declarative table layouts (keys, day partitions, sort order)
//! - Schema drift detection before any data is written
//! - Append, upsert and overwrite write strategies
//! - OAuth2-authenticated REST catalog client

pub mod circuit_breaker;
pub mod config;
pub mod crm;
pub mod engine;
pub mod error;
pub mod iceberg;
pub mod sources;

// Re-export commonly used types
pub use config::Config;
pub use error::{BatchError, ConfigError, CrmError, IcebergError, SourceError, TypeError};
pub use error::{Error, Result};
