//! Error types for s2i core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use crate::iceberg::SchemaMismatch;
use thiserror::Error;

/// Result type alias for s2i operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for s2i.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration authoring defect
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Type string could not be mapped onto a known type
    #[error("Type error: {0}")]
    Type(#[from] TypeError),

    /// Batch could not be shaped into the declared schema
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    /// Iceberg-related error
    #[error("Iceberg error: {0}")]
    Iceberg(#[from] IcebergError),

    /// Upstream source error
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// CRM publishing error
    #[error("CRM error: {0}")]
    Crm(#[from] CrmError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Configuration errors. Always fatal and raised before any network call.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Write mode string is not one of append, upsert, overwrite
    #[error("Invalid write mode '{0}': expected one of append, upsert, overwrite")]
    InvalidWriteMode(String),

    /// Upsert requested without key columns
    #[error("Upsert into {table} requires a non-empty primary_key")]
    UpsertWithoutKeys { table: String },

    /// Declared column absent from the incoming batch
    #[error("Column '{column}' is declared but not present in the batch")]
    ColumnNotInBatch { column: String },

    /// Key, partition, or sort column that is not a declared column
    #[error("{role} column '{column}' is not among the declared columns")]
    UndeclaredColumn { column: String, role: &'static str },

    /// Day partitioning on a non-temporal column
    #[error("Partition column '{column}' has type {data_type}; day partitioning needs a timestamp")]
    InvalidPartitionSource { column: String, data_type: String },

    /// Any other invalid setting
    #[error("{0}")]
    Invalid(String),
}

/// Type bridge errors.
#[derive(Error, Debug)]
pub enum TypeError {
    /// Raw type string does not match any known pattern
    #[error("Unrecognized {vocabulary} type '{raw}'")]
    Unrecognized { vocabulary: String, raw: String },
}

/// Errors shaping an Arrow batch into a declared or stored schema.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Column cast failed
    #[error("Cannot cast column '{column}' from {from} to {to}: {message}")]
    Cast {
        column: String,
        from: String,
        to: String,
        message: String,
    },

    /// Key column carries nulls
    #[error("Key column '{column}' contains {null_count} null value(s)")]
    NullKey { column: String, null_count: usize },

    /// Required store column absent from the batch
    #[error("Required column '{0}' is missing from the batch")]
    MissingRequired(String),

    /// Incoming batch repeats a join key
    #[error("Batch contains duplicate key values for columns [{0}]")]
    DuplicateKey(String),

    /// Arrow compute failure
    #[error("Arrow error: {0}")]
    Arrow(String),
}

/// Iceberg-specific errors.
#[derive(Error, Debug)]
pub enum IcebergError {
    /// Catalog connection failed
    #[error("Catalog connection failed: {0}")]
    CatalogConnection(String),

    /// Namespace does not exist in the catalog
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    /// Table not found
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Table already exists
    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    /// Declared schema is not satisfiable by the live table
    #[error("Schema mismatch for {table}:\n{}", render_mismatches(.mismatches))]
    SchemaMismatch {
        table: String,
        mismatches: Vec<SchemaMismatch>,
    },

    /// Store-level failure during a write primitive
    #[error("{mode} into {table} failed: {source}")]
    Write {
        table: String,
        mode: String,
        #[source]
        source: Box<Error>,
    },

    /// Operation not offered by this catalog
    #[error("Operation not supported by {catalog} catalog: {operation}")]
    Unsupported {
        catalog: String,
        operation: &'static str,
    },

    /// Generic Iceberg error
    #[error("Iceberg error: {0}")]
    Other(String),
}

/// Source reader errors.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Request to the source failed
    #[error("{source_name} request failed: {message}")]
    Request {
        source_name: &'static str,
        message: String,
    },

    /// Source answered with a non-success status
    #[error("{source_name} returned HTTP {status}: {body}")]
    Status {
        source_name: &'static str,
        status: u16,
        body: String,
    },

    /// Response could not be decoded
    #[error("{source_name} response could not be decoded: {message}")]
    Decode {
        source_name: &'static str,
        message: String,
    },
}

/// CRM client errors.
#[derive(Error, Debug)]
pub enum CrmError {
    /// Token request failed or returned no token
    #[error("CRM authentication failed: {0}")]
    Auth(String),

    /// Push request failed
    #[error("CRM push failed: {0}")]
    Push(String),

    /// Circuit breaker is open
    #[error("CRM circuit breaker is open")]
    CircuitOpen,
}

fn render_mismatches(mismatches: &[SchemaMismatch]) -> String {
    let width = mismatches
        .iter()
        .map(|m| m.column.len())
        .max()
        .unwrap_or(0)
        .max("Column".len());

    let mut out = format!("{:<width$}  {:<24}  {}", "Column", "Expected", "Actual");
    for mismatch in mismatches {
        out.push('\n');
        out.push_str(&format!(
            "{:<width$}  {:<24}  {}",
            mismatch.column,
            mismatch.expected_display(),
            mismatch.actual_display()
        ));
    }
    out
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(ConfigError::Invalid(format!("TOML parse error: {}", err)))
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(err: arrow::error::ArrowError) -> Self {
        Error::Batch(BatchError::Arrow(err.to_string()))
    }
}

impl Error {
    /// Whether this error stems from configuration authoring.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Type(_))
    }
}
