//! Configuration structures for s2i.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.
//! Nothing in the library reads the environment; every adapter receives the
//! section it needs from here.

use crate::error::ConfigError;
use crate::iceberg::{ColumnSpec, WriteMode};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Iceberg catalog configuration
    pub catalog: CatalogConfig,

    /// ClickHouse source connection
    #[serde(default)]
    pub clickhouse: Option<ClickHouseConfig>,

    /// Google Sheets source connection
    #[serde(default)]
    pub sheets: Option<SheetsConfig>,

    /// CRM publishing endpoint
    #[serde(default)]
    pub crm: Option<CrmConfig>,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Tables to ingest
    #[serde(default)]
    pub tables: Vec<TableConfig>,

    /// Table-to-CRM publications
    #[serde(default)]
    pub publications: Vec<PublicationConfig>,
}

/// Iceberg catalog configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Catalog type
    #[serde(default)]
    pub catalog_type: CatalogType,

    /// REST catalog base URI (e.g. `http://lakekeeper:8181/catalog`)
    #[serde(default)]
    pub uri: Option<String>,

    /// Warehouse name, sent to `/v1/config` to resolve the path prefix
    #[serde(default)]
    pub warehouse: Option<String>,

    /// Idle HTTP connections kept per host
    #[serde(default = "default_connection_pool_size")]
    pub connection_pool_size: usize,

    /// REST authentication and transport settings
    #[serde(default)]
    pub rest: RestCatalogConfig,

    /// Data file settings for REST catalog writes
    #[serde(default)]
    pub storage: StorageConfig,

    /// Namespaces the memory catalog starts with
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_type: CatalogType::default(),
            uri: None,
            warehouse: None,
            connection_pool_size: default_connection_pool_size(),
            rest: RestCatalogConfig::default(),
            storage: StorageConfig::default(),
            namespaces: Vec::new(),
        }
    }
}

/// Catalog type.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CatalogType {
    /// Iceberg REST catalog (Lakekeeper, Polaris, ...)
    #[default]
    Rest,
    /// In-process catalog for tests and dry runs
    Memory,
}

impl std::fmt::Display for CatalogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogType::Rest => write!(f, "rest"),
            CatalogType::Memory => write!(f, "memory"),
        }
    }
}

/// Credential type for REST catalog authentication.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    /// No authentication
    #[default]
    None,
    /// Bearer token authentication
    Bearer,
    /// OAuth2 client credentials
    OAuth2,
}

/// REST catalog authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestCatalogConfig {
    /// Credential type (none, bearer, oauth2)
    #[serde(default)]
    pub credential_type: CredentialType,

    /// Bearer token, or `client_id:client_secret` for OAuth2
    #[serde(default)]
    pub credential: Option<String>,

    /// OAuth2 token endpoint; defaults to `{uri}/v1/oauth/tokens`
    #[serde(default)]
    pub oauth2_server_uri: Option<String>,

    /// OAuth2 client ID, overrides the id half of `credential`
    #[serde(default)]
    pub oauth2_client_id: Option<String>,

    /// OAuth2 client secret, overrides the secret half of `credential`
    #[serde(default)]
    pub oauth2_client_secret: Option<String>,

    /// OAuth2 scope
    #[serde(default = "default_oauth2_scope")]
    pub oauth2_scope: Option<String>,

    /// Request timeout in seconds
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,

    /// Custom headers to send with requests
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

impl Default for RestCatalogConfig {
    fn default() -> Self {
        Self {
            credential_type: CredentialType::None,
            credential: None,
            oauth2_server_uri: None,
            oauth2_client_id: None,
            oauth2_client_secret: None,
            oauth2_scope: default_oauth2_scope(),
            request_timeout_seconds: Some(default_timeout_seconds()),
            custom_headers: HashMap::new(),
        }
    }
}

impl RestCatalogConfig {
    /// OAuth2 client id and secret, from the explicit fields or `credential`.
    pub fn client_credentials(&self) -> Option<(String, String)> {
        let (cred_id, cred_secret) = match self.credential.as_deref().and_then(|c| c.split_once(':')) {
            Some((id, secret)) => (Some(id.to_string()), Some(secret.to_string())),
            None => (None, None),
        };
        let id = self.oauth2_client_id.clone().or(cred_id)?;
        let secret = self.oauth2_client_secret.clone().or(cred_secret)?;
        Some((id, secret))
    }
}

/// Data file settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Parquet compression
    #[serde(default)]
    pub compression: ParquetCompression,

    /// FileIO properties such as `s3.endpoint`, `s3.access-key-id` or
    /// `s3.path-style-access`, applied on top of what the catalog returns
    /// when a table is loaded.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    /// Snappy compression (default, good balance)
    #[default]
    Snappy,
    /// Zstd compression (better ratio)
    Zstd,
    /// LZ4 compression (faster)
    Lz4,
    /// Gzip compression
    Gzip,
    /// No compression
    None,
}

/// ClickHouse HTTP interface connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClickHouseConfig {
    /// HTTP endpoint, e.g. `http://clickhouse:8123`
    pub url: String,

    #[serde(default = "default_clickhouse_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Default database for unqualified table names
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default = "default_query_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Google Sheets values API access.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SheetsConfig {
    #[serde(default = "default_sheets_base_uri")]
    pub base_uri: String,

    /// OAuth2 access token (takes precedence over `api_key`)
    #[serde(default)]
    pub access_token: Option<String>,

    /// API key for sheets shared by link
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// CRM push endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrmConfig {
    /// Token endpoint
    pub token_url: String,

    /// Data push endpoint
    pub push_url: String,

    pub client_id: String,

    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default = "default_grant_type")]
    pub grant_type: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Records per push request
    #[serde(default = "default_crm_batch_size")]
    pub batch_size: usize,
}

/// Declared column of a table.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ColumnConfig {
    pub name: String,
    /// Config-vocabulary type, e.g. `int64` or `timestamp[ms]`
    pub data_type: String,
}

/// Table ingestion configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableConfig {
    /// Table name
    pub name: String,

    /// Namespace the table lives in
    pub namespace: String,

    /// Declared columns, in field-id order
    pub columns: Vec<ColumnConfig>,

    /// Identifier columns, the upsert join key
    #[serde(default)]
    pub primary_key: Vec<String>,

    /// Columns partitioned by day
    #[serde(default)]
    pub partition_by: Vec<String>,

    /// Columns of the table sort order
    #[serde(default)]
    pub order_by: Vec<String>,

    /// append, upsert, or overwrite
    #[serde(default = "default_write_mode")]
    pub write_mode: String,

    /// Where rows come from
    #[serde(default)]
    pub source: Option<SourceConfig>,
}

impl TableConfig {
    /// Fully qualified `namespace.name`.
    pub fn identifier(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn write_mode(&self) -> crate::Result<WriteMode> {
        self.write_mode.parse()
    }

    /// Resolve declared columns into column specs.
    pub fn column_specs(&self) -> crate::Result<Vec<ColumnSpec>> {
        ColumnSpec::resolve(
            &self.columns,
            &self.primary_key,
            &self.partition_by,
            &self.order_by,
        )
    }

    /// Validate everything that can be checked without a catalog.
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.is_empty() || self.namespace.is_empty() {
            return Err(ConfigError::Invalid("Table name and namespace are required".into()).into());
        }
        if self.columns.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Table {} declares no columns",
                self.identifier()
            ))
            .into());
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.columns.iter().find(|c| !seen.insert(c.name.as_str())) {
            return Err(ConfigError::Invalid(format!(
                "Table {} declares column '{}' twice",
                self.identifier(),
                dup.name
            ))
            .into());
        }

        let mode = self.write_mode()?;
        if mode == WriteMode::Upsert && self.primary_key.is_empty() {
            return Err(ConfigError::UpsertWithoutKeys {
                table: self.identifier(),
            }
            .into());
        }
        self.column_specs()?;
        Ok(())
    }
}

/// Source of a table's rows.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Query result from ClickHouse
    ClickHouse { query: String },
    /// Worksheet of a Google spreadsheet
    Sheet {
        sheet_id: String,
        worksheet: String,
        /// Data rows to skip after the header
        #[serde(default)]
        skip_rows: usize,
    },
}

/// Table-to-CRM publication.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublicationConfig {
    /// Publication name used on the command line
    pub name: String,

    pub namespace: String,

    pub table: String,

    /// Columns to publish; empty publishes every column
    #[serde(default)]
    pub columns: Vec<String>,

    /// Table column to CRM field renames
    #[serde(default)]
    pub field_mapping: HashMap<String, String>,
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_connection_pool_size() -> usize {
    5
}
fn default_oauth2_scope() -> Option<String> {
    Some("lakekeeper".to_string())
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_query_timeout_seconds() -> u64 {
    300
}
fn default_clickhouse_user() -> String {
    "default".to_string()
}
fn default_sheets_base_uri() -> String {
    "https://sheets.googleapis.com".to_string()
}
fn default_grant_type() -> String {
    "client_credentials".to_string()
}
fn default_crm_batch_size() -> usize {
    500
}
fn default_write_mode() -> String {
    "append".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML configuration text.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a table by name or `namespace.name`.
    /// Look a table up by `namespace.table`, or by bare name when only one
    /// namespace has a table of that name.
    pub fn table(&self, name: &str) -> crate::Result<&TableConfig> {
        if let Some(table) = self.tables.iter().find(|t| t.identifier() == name) {
            return Ok(table);
        }

        let matches: Vec<&TableConfig> = self.tables.iter().filter(|t| t.name == name).collect();
        match matches.as_slice() {
            [table] => Ok(table),
            [] => Err(ConfigError::Invalid(format!("Unknown table '{}'", name)).into()),
            several => Err(ConfigError::Invalid(format!(
                "Table name '{}' is ambiguous, use one of: {}",
                name,
                several
                    .iter()
                    .map(|t| t.identifier())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
            .into()),
        }
    }

    pub fn publication(&self, name: &str) -> Option<&PublicationConfig> {
        self.publications.iter().find(|p| p.name == name)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.catalog.catalog_type == CatalogType::Rest {
            if self.catalog.uri.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::Invalid("REST catalog requires catalog.uri".into()).into());
            }
            if self.catalog.rest.credential_type == CredentialType::OAuth2
                && self.catalog.rest.client_credentials().is_none()
            {
                return Err(ConfigError::Invalid(
                    "OAuth2 requires credential = \"client_id:client_secret\" or oauth2_client_id/oauth2_client_secret".into(),
                )
                .into());
            }
            if self.catalog.rest.credential_type == CredentialType::Bearer
                && self.catalog.rest.credential.is_none()
            {
                return Err(ConfigError::Invalid("Bearer auth requires a credential".into()).into());
            }
        }

        let mut identifiers = HashSet::new();
        for table in &self.tables {
            table.validate()?;
            if !identifiers.insert(table.identifier()) {
                return Err(ConfigError::Invalid(format!(
                    "Table {} is configured twice",
                    table.identifier()
                ))
                .into());
            }
            match &table.source {
                Some(SourceConfig::ClickHouse { .. }) if self.clickhouse.is_none() => {
                    return Err(ConfigError::Invalid(format!(
                        "Table {} reads from ClickHouse but [clickhouse] is not configured",
                        table.identifier()
                    ))
                    .into());
                }
                Some(SourceConfig::Sheet { .. }) if self.sheets.is_none() => {
                    return Err(ConfigError::Invalid(format!(
                        "Table {} reads from a sheet but [sheets] is not configured",
                        table.identifier()
                    ))
                    .into());
                }
                _ => {}
            }
        }

        if let Some(sheets) = &self.sheets {
            if sheets.access_token.is_none() && sheets.api_key.is_none() {
                return Err(ConfigError::Invalid(
                    "[sheets] requires access_token or api_key".into(),
                )
                .into());
            }
        }

        let mut names = HashSet::new();
        for publication in &self.publications {
            if publication.namespace.is_empty() || publication.table.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Publication {} requires namespace and table",
                    publication.name
                ))
                .into());
            }
            if !names.insert(publication.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Publication {} is configured twice",
                    publication.name
                ))
                .into());
            }
        }
        if !self.publications.is_empty() {
            match &self.crm {
                None => {
                    return Err(
                        ConfigError::Invalid("Publications require a [crm] section".into()).into(),
                    )
                }
                Some(crm) if crm.batch_size == 0 => {
                    return Err(ConfigError::Invalid("crm.batch_size must be positive".into()).into())
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::io::Write;

    const SAMPLE: &str = r#"
[catalog]
catalog_type = "rest"
uri = "http://lakekeeper:8181/catalog"
warehouse = "analytics"

[catalog.rest]
credential_type = "oauth2"
credential = "etl-client:s3cr3t"
oauth2_server_uri = "http://keycloak:8080/realms/iceberg/protocol/openid-connect/token"

[catalog.storage]
compression = "zstd"
properties = { "s3.endpoint" = "http://minio:9000", "s3.path-style-access" = "true" }

[clickhouse]
url = "http://clickhouse:8123"
password = "pw"

[crm]
token_url = "https://crm.example.com/oauth/token"
push_url = "https://crm.example.com/api/customers"
client_id = "s2i"

[monitoring]
log_format = "text"

[[tables]]
name = "orders"
namespace = "sales"
primary_key = ["id"]
partition_by = ["ts"]
order_by = ["ts"]
write_mode = "upsert"
columns = [
    { name = "id", data_type = "int64" },
    { name = "ts", data_type = "timestamp[ms]" },
]
source = { type = "clickhouse", query = "SELECT id, ts FROM orders" }

[[publications]]
name = "orders-to-crm"
namespace = "sales"
table = "orders"
columns = ["id"]
field_mapping = { id = "external_id" }
"#;

    fn minimal() -> Config {
        Config::from_toml(
            r#"
[catalog]
catalog_type = "memory"
"#,
        )
        .unwrap()
    }

    fn orders_table() -> TableConfig {
        TableConfig {
            name: "orders".into(),
            namespace: "sales".into(),
            columns: vec![ColumnConfig {
                name: "id".into(),
                data_type: "int64".into(),
            }],
            primary_key: vec![],
            partition_by: vec![],
            order_by: vec![],
            write_mode: default_write_mode(),
            source: None,
        }
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(SAMPLE).unwrap();

        assert_eq!(config.catalog.catalog_type, CatalogType::Rest);
        assert_eq!(config.catalog.rest.credential_type, CredentialType::OAuth2);
        assert_eq!(
            config.catalog.rest.client_credentials(),
            Some(("etl-client".into(), "s3cr3t".into()))
        );
        assert_eq!(config.catalog.rest.oauth2_scope.as_deref(), Some("lakekeeper"));
        assert_eq!(config.monitoring.log_format, LogFormat::Text);
        assert_eq!(config.catalog.storage.compression, ParquetCompression::Zstd);
        assert_eq!(
            config.catalog.storage.properties["s3.endpoint"],
            "http://minio:9000"
        );

        let table = config.table("sales.orders").unwrap();
        assert_eq!(table.write_mode().unwrap(), WriteMode::Upsert);
        assert_eq!(
            table.source,
            Some(SourceConfig::ClickHouse {
                query: "SELECT id, ts FROM orders".into()
            })
        );
        assert_eq!(config.clickhouse.as_ref().unwrap().user, "default");

        let publication = config.publication("orders-to-crm").unwrap();
        assert_eq!(publication.field_mapping["id"], "external_id");
        assert_eq!(config.crm.as_ref().unwrap().batch_size, 500);
        assert_eq!(config.crm.as_ref().unwrap().grant_type, "client_credentials");
    }

    #[test]
    fn test_defaults() {
        let config = minimal();
        assert_eq!(config.catalog.connection_pool_size, 5);
        assert_eq!(config.catalog.rest.request_timeout_seconds, Some(30));
        assert_eq!(config.monitoring.log_level, LogLevel::Info);
        assert_eq!(config.monitoring.log_format, LogFormat::Json);
        assert_eq!(config.catalog.storage.compression, ParquetCompression::Snappy);
        assert!(config.tables.is_empty());
    }

    #[test]
    fn test_rest_requires_uri() {
        let err = Config::from_toml("[catalog]\ncatalog_type = \"rest\"\n").unwrap_err();
        assert!(err.to_string().contains("catalog.uri"));
    }

    #[test]
    fn test_explicit_client_fields_win() {
        let rest = RestCatalogConfig {
            credential: Some("a:b".into()),
            oauth2_client_secret: Some("override".into()),
            ..Default::default()
        };
        assert_eq!(rest.client_credentials(), Some(("a".into(), "override".into())));
        assert_eq!(RestCatalogConfig::default().client_credentials(), None);
    }

    #[test]
    fn test_invalid_write_mode() {
        let mut table = orders_table();
        table.write_mode = "merge".into();
        assert!(matches!(
            table.validate().unwrap_err(),
            Error::Config(ConfigError::InvalidWriteMode(mode)) if mode == "merge"
        ));
    }

    #[test]
    fn test_upsert_requires_keys() {
        let mut table = orders_table();
        table.write_mode = "upsert".into();
        assert!(matches!(
            table.validate().unwrap_err(),
            Error::Config(ConfigError::UpsertWithoutKeys { .. })
        ));

        table.primary_key = vec!["id".into()];
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_unrecognized_column_type() {
        let mut table = orders_table();
        table.columns[0].data_type = "timestamp[fortnight]".into();
        assert!(matches!(table.validate().unwrap_err(), Error::Type(_)));
    }

    #[test]
    fn test_duplicate_tables_rejected() {
        let mut config = minimal();
        config.tables = vec![orders_table(), orders_table()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_source_needs_connection_section() {
        let mut config = minimal();
        let mut table = orders_table();
        table.source = Some(SourceConfig::Sheet {
            sheet_id: "abc".into(),
            worksheet: "Leads".into(),
            skip_rows: 0,
        });
        config.tables = vec![table];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("[sheets]"));
    }

    #[test]
    fn test_publications_need_crm() {
        let mut config = minimal();
        config.publications = vec![PublicationConfig {
            name: "p".into(),
            namespace: "sales".into(),
            table: "orders".into(),
            columns: vec![],
            field_mapping: HashMap::new(),
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.tables.len(), 1);

        let missing = Config::from_file(std::path::Path::new("/nonexistent/s2i.toml"));
        assert!(matches!(missing.unwrap_err(), Error::Io(_)));
    }
}
