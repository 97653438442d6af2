//! Catalog factory and catalog operations.
//!
//! This module provides a factory pattern for creating Iceberg catalog
//! clients from configuration, and the [`CatalogOperations`] contract the
//! write orchestrator drives. Supported catalog types:
//!
//! - REST Catalog (Lakekeeper and other Iceberg REST servers)
//! - Memory Catalog (in-process, see [`super::memory`])

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::{CatalogConfig, CatalogType, CredentialType};
use crate::error::{ConfigError, IcebergError};
use crate::iceberg::batch::{align_to_schema, merge_by_key, KeyedMerge};
use crate::iceberg::rest_api;
use crate::iceberg::schema_builder::{CanonicalSchema, TableLayout};
use crate::iceberg::table_manager::WriteMode;
use crate::iceberg::types::{TypeTag, TypeVocabulary};
use crate::iceberg::writer::{partition_columns, TableWriter};
use crate::{Error, Result};
use arrow::compute::concat_batches;
use arrow::datatypes::{Field, Schema as ArrowSchema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Separator for multi-level namespaces in REST paths.
const NAMESPACE_SEPARATOR: &str = "\u{1f}";

/// Branch every write commits to.
const MAIN_BRANCH: &str = "main";

/// Trait for creating catalog instances.
#[async_trait]
pub trait CatalogFactory: Send + Sync {
    /// Create a new catalog instance.
    async fn create(&self, config: &CatalogConfig) -> Result<Arc<dyn CatalogOperations>>;

    /// Get the catalog type this factory creates.
    fn catalog_type(&self) -> CatalogType;

    /// Check if this factory supports the given configuration.
    fn supports(&self, config: &CatalogConfig) -> bool {
        self.catalog_type() == config.catalog_type
    }
}

/// Trait defining catalog operations.
///
/// Metadata calls (`namespace_exists`, `table_exists`, `load_table`,
/// `create_table`, `drop_table`) and the write primitives (`append`,
/// `upsert`, `overwrite`) are each a single call with no retry at this layer.
#[async_trait]
pub trait CatalogOperations: Send + Sync {
    /// Check if the catalog connection is healthy.
    async fn health_check(&self) -> Result<CatalogHealth>;

    /// List all namespaces in the catalog, dot-joined.
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Check if a namespace exists.
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        Ok(self.list_namespaces().await?.iter().any(|ns| ns == namespace))
    }

    /// Check if a table exists.
    async fn table_exists(&self, ident: &TableIdent) -> Result<bool>;

    /// Load a table handle, including its live schema.
    async fn load_table(&self, ident: &TableIdent) -> Result<TableHandle>;

    /// Create a table with the given schema, partition spec and sort order.
    async fn create_table(&self, ident: &TableIdent, layout: &TableLayout) -> Result<TableHandle>;

    /// Drop a table and its data.
    async fn drop_table(&self, ident: &TableIdent) -> Result<()>;

    /// Read the current contents of a table.
    async fn scan(&self, table: &TableHandle) -> Result<Vec<RecordBatch>>;

    /// Add rows in a new snapshot.
    async fn append(&self, table: &TableHandle, batch: RecordBatch)
        -> Result<SnapshotCommitResult>;

    /// Replace rows whose `join_columns` match, insert the rest.
    async fn upsert(
        &self,
        table: &TableHandle,
        batch: RecordBatch,
        join_columns: &[String],
    ) -> Result<SnapshotCommitResult>;

    /// Replace the whole table contents.
    async fn overwrite(
        &self,
        table: &TableHandle,
        batch: RecordBatch,
    ) -> Result<SnapshotCommitResult>;

    /// Whether this catalog can execute the given write primitive.
    fn supports_write(&self, _mode: WriteMode) -> bool {
        true
    }

    /// Get the catalog type.
    fn catalog_type(&self) -> CatalogType;

    /// Close the catalog connection gracefully.
    async fn close(&self) -> Result<()>;
}

/// Fully qualified table identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableIdent {
    /// Dot-separated namespace
    pub namespace: String,
    pub name: String,
}

impl TableIdent {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace.table`; the last segment is the table name.
    pub fn parse(qualified: &str) -> Result<Self> {
        match qualified.rsplit_once('.') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(Self::new(ns, name)),
            _ => Err(ConfigError::Invalid(format!(
                "Table identifier '{}' must be namespace.table",
                qualified
            ))
            .into()),
        }
    }

    pub fn namespace_parts(&self) -> Vec<String> {
        self.namespace.split('.').map(String::from).collect()
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Health status of a catalog connection.
#[derive(Debug, Clone)]
pub struct CatalogHealth {
    /// Whether the catalog is healthy
    pub is_healthy: bool,
    /// Response time in milliseconds
    pub response_time_ms: u64,
    /// Optional message with details
    pub message: Option<String>,
    /// Catalog type
    pub catalog_type: CatalogType,
}

/// A loaded table.
#[derive(Debug, Clone)]
pub struct TableHandle {
    pub ident: TableIdent,
    /// Table location in storage
    pub location: String,
    /// Table UUID assigned by the catalog
    pub uuid: String,
    /// Current snapshot ID (if any)
    pub current_snapshot_id: Option<i64>,
    /// Live table schema
    pub schema: TableSchema,
    /// Table properties
    pub properties: HashMap<String, String>,
}

/// Iceberg table schema as reported by the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    /// Schema ID
    pub schema_id: i32,
    /// Schema fields
    pub fields: Vec<SchemaFieldInfo>,
    /// Identifier (key) field ids
    pub identifier_field_ids: Vec<i32>,
}

/// Schema field information.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaFieldInfo {
    /// Field ID
    pub id: i32,
    /// Field name
    pub name: String,
    /// Iceberg field type (e.g., "string", "long", "timestamp")
    pub field_type: String,
    /// Whether the field is required
    pub required: bool,
    /// Optional documentation
    pub doc: Option<String>,
}

impl TableSchema {
    /// Render a canonical schema the way a catalog stores it.
    pub fn from_canonical(schema: &CanonicalSchema) -> Self {
        Self {
            schema_id: 0,
            fields: schema
                .fields
                .iter()
                .map(|f| SchemaFieldInfo {
                    id: f.field_id,
                    name: f.name.clone(),
                    field_type: f.field_type.render(TypeVocabulary::Iceberg),
                    required: f.required,
                    doc: None,
                })
                .collect(),
            identifier_field_ids: schema.identifier_field_ids.clone(),
        }
    }

    /// Names of the identifier fields, in schema order.
    pub fn identifier_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| self.identifier_field_ids.contains(&f.id))
            .map(|f| f.name.clone())
            .collect()
    }

    /// Arrow schema of rows stored in this table.
    pub fn to_arrow_schema(&self) -> Result<ArrowSchema> {
        let fields = self
            .fields
            .iter()
            .map(|f| {
                let tag = TypeTag::parse(TypeVocabulary::Iceberg, &f.field_type)?;
                Ok(Field::new(&f.name, tag.to_arrow(), !f.required))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ArrowSchema::new(fields))
    }
}

/// Result of a write primitive.
#[derive(Debug, Clone)]
pub struct SnapshotCommitResult {
    /// The new snapshot ID; none when there were no rows to commit
    pub snapshot_id: Option<i64>,
    /// Operation recorded in the snapshot summary
    pub operation: WriteMode,
    /// Rows added by the snapshot
    pub added_records: usize,
    /// Rows removed or replaced by the snapshot
    pub deleted_records: usize,
    /// Timestamp when the snapshot was created
    pub committed_at: chrono::DateTime<chrono::Utc>,
}

/// Registry of catalog factories.
///
/// Manages available catalog factory implementations and provides
/// a way to create catalogs based on configuration.
pub struct CatalogFactoryRegistry {
    factories: Vec<Box<dyn CatalogFactory>>,
}

impl CatalogFactoryRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Create a registry with default factories.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RestCatalogFactory));
        registry.register(Box::new(super::memory::MemoryCatalogFactory));
        registry
    }

    /// Register a new catalog factory.
    pub fn register(&mut self, factory: Box<dyn CatalogFactory>) {
        self.factories.push(factory);
    }

    /// Create a catalog instance based on configuration.
    pub async fn create(&self, config: &CatalogConfig) -> Result<Arc<dyn CatalogOperations>> {
        for factory in &self.factories {
            if factory.supports(config) {
                return factory.create(config).await;
            }
        }

        Err(ConfigError::Invalid(format!(
            "No catalog factory found for catalog type: {}",
            config.catalog_type
        ))
        .into())
    }

    /// Get the supported catalog types.
    pub fn supported_types(&self) -> Vec<CatalogType> {
        self.factories.iter().map(|f| f.catalog_type()).collect()
    }
}

impl Default for CatalogFactoryRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Factory for REST catalog.
pub struct RestCatalogFactory;

#[async_trait]
impl CatalogFactory for RestCatalogFactory {
    async fn create(&self, config: &CatalogConfig) -> Result<Arc<dyn CatalogOperations>> {
        let client = RestCatalogClient::new(config).await?;
        Ok(Arc::new(client))
    }

    fn catalog_type(&self) -> CatalogType {
        CatalogType::Rest
    }
}

/// REST catalog client configuration.
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// REST API base URI
    pub base_uri: String,
    /// Warehouse name for prefix discovery
    pub warehouse: Option<String>,
    /// Credential type
    pub credential_type: CredentialType,
    /// Bearer token (if using bearer auth)
    pub bearer_token: Option<String>,
    /// OAuth2 token endpoint
    pub oauth2_server_uri: String,
    /// OAuth2 client ID and secret
    pub oauth2_client: Option<(String, String)>,
    /// OAuth2 scope
    pub oauth2_scope: Option<String>,
    /// Extra headers sent with every request
    pub custom_headers: HashMap<String, String>,
}

/// REST catalog client implementation.
///
/// Table lifecycle calls (namespaces, create, load, drop, branch reset) go
/// straight to the Apache Iceberg REST Catalog API. Row data goes through
/// [`TableWriter`], which writes Parquet data files and commits them with
/// manifests.
///
/// Upsert without a key collision is a plain append. When incoming keys match
/// stored rows, the table's `main` branch is reset and the surviving rows are
/// committed again together with the incoming ones. Overwrite of a table with
/// data resets the branch the same way. The replaced snapshot stays in the
/// table history.
pub struct RestCatalogClient {
    /// HTTP client
    client: Client,
    /// Client configuration
    config: RestClientConfig,
    /// Path prefix from `/v1/config`, e.g. `/v1/{prefix}`
    path_base: String,
    /// Cached OAuth2 token
    oauth_token: RwLock<Option<CachedToken>>,
    /// Last health check result
    last_health_check: RwLock<Option<CatalogHealth>>,
    /// Circuit breaker for fault tolerance
    circuit_breaker: CircuitBreaker,
    /// Data file writer and scanner
    writer: TableWriter,
}

/// Cached OAuth2 token with expiry.
#[derive(Debug, Clone)]
struct CachedToken {
    /// The access token
    token: String,
    /// When the token expires
    expires_at: Instant,
}

impl RestCatalogClient {
    /// Create a new REST catalog client.
    ///
    /// With OAuth2 a token is fetched immediately; with a warehouse set the
    /// path prefix is resolved from `/v1/config`.
    pub async fn new(config: &CatalogConfig) -> Result<Self> {
        let base_uri = config
            .uri
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConfigError::Invalid("REST catalog requires catalog.uri".into()))?
            .trim_end_matches('/')
            .to_string();

        let timeout = Duration::from_secs(config.rest.request_timeout_seconds.unwrap_or(30));
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(config.connection_pool_size)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to create HTTP client: {}", e)))?;

        let writer = TableWriter::new(config, &base_uri);

        let client_config = RestClientConfig {
            oauth2_server_uri: config
                .rest
                .oauth2_server_uri
                .clone()
                .unwrap_or_else(|| format!("{}/v1/oauth/tokens", base_uri)),
            base_uri,
            warehouse: config.warehouse.clone(),
            credential_type: config.rest.credential_type.clone(),
            bearer_token: config.rest.credential.clone(),
            oauth2_client: config.rest.client_credentials(),
            oauth2_scope: config.rest.oauth2_scope.clone(),
            custom_headers: config.rest.custom_headers.clone(),
        };

        // Create circuit breaker for fault tolerance
        let circuit_breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new("rest-catalog")
                .with_failure_threshold(5)
                .with_reset_timeout(Duration::from_secs(30))
                .with_success_threshold(2),
        );

        let mut client = Self {
            client: http_client,
            config: client_config,
            path_base: "/v1".to_string(),
            oauth_token: RwLock::new(None),
            last_health_check: RwLock::new(None),
            circuit_breaker,
            writer,
        };

        if client.config.credential_type == CredentialType::OAuth2 {
            client.refresh_oauth_token().await?;
        }
        if client.config.warehouse.is_some() {
            let catalog_config = client.fetch_config().await?;
            if let Some(prefix) = catalog_config.prefix() {
                client.path_base = format!("/v1/{}", urlencoding::encode(prefix));
            }
        }

        info!(uri = %client.config.base_uri, base = %client.path_base, "REST catalog client initialized");
        Ok(client)
    }

    /// Result of the most recent health check, if any.
    pub fn last_health(&self) -> Option<CatalogHealth> {
        self.last_health_check.read().clone()
    }

    /// Get authorization header value.
    async fn get_auth_header(&self) -> Result<Option<String>> {
        match self.config.credential_type {
            CredentialType::None => Ok(None),
            CredentialType::Bearer => Ok(self
                .config
                .bearer_token
                .as_ref()
                .map(|t| format!("Bearer {}", t))),
            CredentialType::OAuth2 => {
                // Check if we have a valid cached token
                let needs_refresh = {
                    let token = self.oauth_token.read();
                    match token.as_ref() {
                        Some(cached) => Instant::now() >= cached.expires_at,
                        None => true,
                    }
                };

                if needs_refresh {
                    self.refresh_oauth_token().await?;
                }

                let token = self.oauth_token.read();
                Ok(token.as_ref().map(|t| format!("Bearer {}", t.token)))
            }
        }
    }

    /// Refresh OAuth2 token via the client-credentials grant.
    async fn refresh_oauth_token(&self) -> Result<()> {
        let (client_id, client_secret) = self
            .config
            .oauth2_client
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("OAuth2 requires client credentials".into()))?;

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ];
        if let Some(scope) = self.config.oauth2_scope.as_deref() {
            form.push(("scope", scope));
        }

        let response = self
            .client
            .post(&self.config.oauth2_server_uri)
            .form(&form)
            .send()
            .await
            .map_err(|e| IcebergError::CatalogConnection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IcebergError::CatalogConnection(format!(
                "OAuth2 token request failed: {}",
                response.status()
            ))
            .into());
        }

        let token_response: rest_api::OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| IcebergError::CatalogConnection(e.to_string()))?;

        // Refresh 60s early
        let expires_in = token_response.expires_in.unwrap_or(3600);
        let expires_at = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60).max(0) as u64);

        *self.oauth_token.write() = Some(CachedToken {
            token: token_response.access_token,
            expires_at,
        });

        debug!(expires_in, "OAuth2 token refreshed");
        Ok(())
    }

    /// Resolve the server's catalog configuration for our warehouse.
    async fn fetch_config(&self) -> Result<rest_api::CatalogConfig> {
        let path = match &self.config.warehouse {
            Some(warehouse) => format!("/v1/config?warehouse={}", urlencoding::encode(warehouse)),
            None => "/v1/config".to_string(),
        };
        let request = self.build_request(reqwest::Method::GET, &path).await?;
        let response = self.execute_request(request).await?;
        let response = self.check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| IcebergError::CatalogConnection(e.to_string()).into())
    }

    /// Build a request with authentication.
    async fn build_request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder> {
        let url = format!("{}{}", self.config.base_uri, path);
        let mut request = self.client.request(method, &url);

        if let Some(auth) = self.get_auth_header().await? {
            request = request.header("Authorization", auth);
        }
        for (name, value) in &self.config.custom_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        request = request.header("Content-Type", "application/json");
        request = request.header("Accept", "application/json");

        Ok(request)
    }

    /// Check if circuit breaker allows the request.
    fn check_circuit_breaker(&self) -> Result<()> {
        if !self.circuit_breaker.is_allowed() {
            warn!("Circuit breaker is open, rejecting request");
            return Err(IcebergError::CatalogConnection(
                "Circuit breaker is open - catalog operations temporarily blocked".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Execute a request with circuit breaker protection.
    async fn execute_request(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.check_circuit_breaker()?;

        match request.send().await {
            Ok(response) => {
                if response.status().is_server_error() {
                    self.circuit_breaker.record_failure();
                } else {
                    // 4xx answers are not retryable and say nothing about availability
                    self.circuit_breaker.record_success();
                }
                Ok(response)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                Err(IcebergError::CatalogConnection(e.to_string()).into())
            }
        }
    }

    /// Pass through successful responses, map the rest to errors.
    async fn check_response(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(handle_error_response(status, &body))
    }

    fn namespace_path(&self, namespace: &str) -> String {
        let joined = namespace.split('.').collect::<Vec<_>>().join(NAMESPACE_SEPARATOR);
        format!("{}/namespaces/{}", self.path_base, urlencoding::encode(&joined))
    }

    fn table_path(&self, ident: &TableIdent) -> String {
        format!(
            "{}/tables/{}",
            self.namespace_path(&ident.namespace),
            urlencoding::encode(&ident.name)
        )
    }

    async fn load_metadata(&self, ident: &TableIdent) -> Result<rest_api::TableMetadata> {
        let path = self.table_path(ident);
        let request = self.build_request(reqwest::Method::GET, &path).await?;
        let response = self.check_response(self.execute_request(request).await?).await?;

        let table_response: rest_api::LoadTableResponse = response
            .json()
            .await
            .map_err(|e| IcebergError::Other(e.to_string()))?;
        Ok(table_response.metadata)
    }

    /// Detach `main` from its current snapshot, leaving the table empty.
    ///
    /// The commit asserts the snapshot the caller read, so a concurrent
    /// writer makes it fail instead of being discarded.
    async fn reset_main_branch(
        &self,
        ident: &TableIdent,
        metadata: &rest_api::TableMetadata,
    ) -> Result<()> {
        let request = self
            .build_request(reqwest::Method::POST, &self.table_path(ident))
            .await?;
        self.check_response(
            self.execute_request(request.json(&reset_branch_request(metadata)))
                .await?,
        )
        .await?;

        info!(table = %ident, previous_snapshot = ?metadata.snapshot_id(), "Reset main branch");
        Ok(())
    }

    /// Append rows and report the commit.
    async fn commit_rows(
        &self,
        ident: &TableIdent,
        metadata: &rest_api::TableMetadata,
        batch: RecordBatch,
        operation: WriteMode,
        deleted_records: usize,
    ) -> Result<SnapshotCommitResult> {
        let partitions = partition_columns(ident, metadata)?;
        let added_records = batch.num_rows();
        let snapshot_id = self.writer.append(ident, &partitions, batch).await?;
        Ok(SnapshotCommitResult {
            snapshot_id,
            operation,
            added_records,
            deleted_records,
            committed_at: chrono::Utc::now(),
        })
    }

    fn to_handle(&self, ident: &TableIdent, metadata: &rest_api::TableMetadata) -> Result<TableHandle> {
        let schema = metadata.current_schema().ok_or_else(|| {
            IcebergError::Other(format!("Catalog returned no current schema for {}", ident))
        })?;
        Ok(TableHandle {
            ident: ident.clone(),
            location: metadata.location.clone(),
            uuid: metadata.table_uuid.clone(),
            current_snapshot_id: metadata.snapshot_id(),
            schema: convert_schema(schema),
            properties: metadata.properties.clone(),
        })
    }
}

/// Map an error response from the REST API.
fn handle_error_response(status: StatusCode, body: &str) -> Error {
    let Ok(response) = serde_json::from_str::<rest_api::ErrorResponse>(body) else {
        return IcebergError::Other(format!("{}: {}", status, body)).into();
    };
    let error = response.error;
    match status {
        StatusCode::NOT_FOUND if error.error_type.contains("NoSuchNamespace") => {
            IcebergError::NamespaceNotFound(error.message).into()
        }
        StatusCode::NOT_FOUND if error.error_type.contains("NoSuchTable") => {
            IcebergError::TableNotFound(error.message).into()
        }
        StatusCode::CONFLICT => IcebergError::TableAlreadyExists(error.message).into(),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => IcebergError::CatalogConnection(
            format!("Authentication failed: {}", error.message),
        )
        .into(),
        _ => IcebergError::Other(format!("{} {}: {}", status, error.error_type, error.message)).into(),
    }
}

/// Convert API schema to our TableSchema.
fn convert_schema(schema: &rest_api::Schema) -> TableSchema {
    TableSchema {
        schema_id: schema.schema_id,
        fields: schema
            .fields
            .iter()
            .map(|f| {
                let field_type = match &f.field_type {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                SchemaFieldInfo {
                    id: f.id,
                    name: f.name.clone(),
                    field_type,
                    required: f.required,
                    doc: f.doc.clone(),
                }
            })
            .collect(),
        identifier_field_ids: schema.identifier_field_ids.clone(),
    }
}

/// Build the commit that removes `main`, guarded by the table uuid and the
/// snapshot `main` pointed at when `metadata` was read.
fn reset_branch_request(metadata: &rest_api::TableMetadata) -> rest_api::CommitTableRequest {
    rest_api::CommitTableRequest {
        requirements: vec![
            rest_api::TableRequirement::AssertTableUuid {
                uuid: metadata.table_uuid.clone(),
            },
            rest_api::TableRequirement::AssertRefSnapshotId {
                ref_name: MAIN_BRANCH.to_string(),
                snapshot_id: metadata.snapshot_id(),
            },
        ],
        updates: vec![rest_api::TableUpdate::RemoveSnapshotRef {
            ref_name: MAIN_BRANCH.to_string(),
        }],
    }
}

/// Build the create-table request body for a layout.
fn create_table_request(name: &str, layout: &TableLayout) -> rest_api::CreateTableRequest {
    let schema = TableSchema::from_canonical(&layout.schema);
    rest_api::CreateTableRequest {
        name: name.to_string(),
        location: None,
        schema: rest_api::Schema {
            schema_id: schema.schema_id,
            r#type: "struct".to_string(),
            fields: schema
                .fields
                .into_iter()
                .map(|f| rest_api::SchemaField {
                    id: f.id,
                    name: f.name,
                    field_type: serde_json::Value::String(f.field_type),
                    required: f.required,
                    doc: f.doc,
                })
                .collect(),
            identifier_field_ids: schema.identifier_field_ids,
        },
        partition_spec: Some(rest_api::PartitionSpec {
            spec_id: 0,
            fields: layout
                .partition_spec
                .fields
                .iter()
                .map(|p| rest_api::PartitionField {
                    source_id: p.source_field_id,
                    field_id: p.field_id,
                    name: p.name.clone(),
                    transform: p.transform.to_string(),
                })
                .collect(),
        }),
        write_order: Some(rest_api::SortOrder {
            // Order id 0 is reserved for the unsorted order
            order_id: if layout.sort_spec.is_unsorted() { 0 } else { 1 },
            fields: layout
                .sort_spec
                .fields
                .iter()
                .map(|s| rest_api::SortField {
                    transform: s.transform.to_string(),
                    source_id: s.source_field_id,
                    direction: "asc".to_string(),
                    null_order: "nulls-first".to_string(),
                })
                .collect(),
        }),
        stage_create: None,
        properties: HashMap::from([("format-version".to_string(), "2".to_string())]),
    }
}

#[async_trait]
impl CatalogOperations for RestCatalogClient {
    async fn health_check(&self) -> Result<CatalogHealth> {
        let start = Instant::now();

        let health = match self.fetch_config().await {
            Ok(_) => CatalogHealth {
                is_healthy: true,
                response_time_ms: start.elapsed().as_millis() as u64,
                message: Some(format!("REST catalog at {} is healthy", self.config.base_uri)),
                catalog_type: CatalogType::Rest,
            },
            Err(e) => CatalogHealth {
                is_healthy: false,
                response_time_ms: start.elapsed().as_millis() as u64,
                message: Some(e.to_string()),
                catalog_type: CatalogType::Rest,
            },
        };

        *self.last_health_check.write() = Some(health.clone());
        Ok(health)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let mut namespaces = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let path = match &page_token {
                Some(token) => format!(
                    "{}/namespaces?pageToken={}",
                    self.path_base,
                    urlencoding::encode(token)
                ),
                None => format!("{}/namespaces", self.path_base),
            };
            let request = self.build_request(reqwest::Method::GET, &path).await?;
            let response = self.check_response(self.execute_request(request).await?).await?;
            let list: rest_api::ListNamespacesResponse = response
                .json()
                .await
                .map_err(|e| IcebergError::Other(e.to_string()))?;

            // Flatten namespace parts into dot-separated strings
            namespaces.extend(list.namespaces.into_iter().map(|ns| ns.join(".")));
            match list.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(namespaces)
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let path = self.namespace_path(namespace);
        let request = self.build_request(reqwest::Method::GET, &path).await?;
        let response = self.execute_request(request).await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(handle_error_response(status, &body))
            }
        }
    }

    async fn table_exists(&self, ident: &TableIdent) -> Result<bool> {
        let path = self.table_path(ident);
        let request = self.build_request(reqwest::Method::HEAD, &path).await?;
        let response = self.execute_request(request).await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(handle_error_response(status, &body))
            }
        }
    }

    async fn load_table(&self, ident: &TableIdent) -> Result<TableHandle> {
        let metadata = self.load_metadata(ident).await?;
        self.to_handle(ident, &metadata)
    }

    async fn create_table(&self, ident: &TableIdent, layout: &TableLayout) -> Result<TableHandle> {
        let path = format!("{}/tables", self.namespace_path(&ident.namespace));
        let request_body = create_table_request(&ident.name, layout);

        let request = self.build_request(reqwest::Method::POST, &path).await?;
        let response = self
            .check_response(self.execute_request(request.json(&request_body)).await?)
            .await?;

        let table_response: rest_api::LoadTableResponse = response
            .json()
            .await
            .map_err(|e| IcebergError::Other(e.to_string()))?;

        info!(table = %ident, "Created table");
        self.to_handle(ident, &table_response.metadata)
    }

    async fn drop_table(&self, ident: &TableIdent) -> Result<()> {
        let path = format!("{}?purgeRequested=true", self.table_path(ident));
        let request = self.build_request(reqwest::Method::DELETE, &path).await?;
        self.check_response(self.execute_request(request).await?).await?;

        info!(table = %ident, "Dropped table");
        Ok(())
    }

    async fn scan(&self, table: &TableHandle) -> Result<Vec<RecordBatch>> {
        let schema = Arc::new(table.schema.to_arrow_schema()?);
        self.writer
            .scan(&table.ident)
            .await?
            .iter()
            .map(|batch| align_to_schema(batch, &schema))
            .collect()
    }

    async fn append(&self, table: &TableHandle, batch: RecordBatch) -> Result<SnapshotCommitResult> {
        let metadata = self.load_metadata(&table.ident).await?;
        self.commit_rows(&table.ident, &metadata, batch, WriteMode::Append, 0)
            .await
    }

    async fn upsert(
        &self,
        table: &TableHandle,
        batch: RecordBatch,
        join_columns: &[String],
    ) -> Result<SnapshotCommitResult> {
        if join_columns.is_empty() {
            return Err(ConfigError::UpsertWithoutKeys {
                table: table.ident.to_string(),
            }
            .into());
        }

        let metadata = self.load_metadata(&table.ident).await?;
        let schema = Arc::new(table.schema.to_arrow_schema()?);
        let incoming = align_to_schema(&batch, &schema)?;
        let existing = self.scan(table).await?;
        let KeyedMerge { mut kept, replaced } = merge_by_key(&existing, &incoming, join_columns)?;

        if replaced == 0 {
            debug!(table = %table.ident, "No stored keys match, appending");
            return self
                .commit_rows(&table.ident, &metadata, incoming, WriteMode::Upsert, 0)
                .await;
        }

        debug!(
            table = %table.ident,
            replaced,
            kept = kept.iter().map(RecordBatch::num_rows).sum::<usize>(),
            "Rewriting table for upsert"
        );
        kept.push(incoming);
        let merged = concat_batches(&schema, &kept)?;
        self.reset_main_branch(&table.ident, &metadata).await?;
        let mut result = self
            .commit_rows(&table.ident, &metadata, merged, WriteMode::Upsert, replaced)
            .await?;
        result.added_records = batch.num_rows();
        Ok(result)
    }

    async fn overwrite(
        &self,
        table: &TableHandle,
        batch: RecordBatch,
    ) -> Result<SnapshotCommitResult> {
        let metadata = self.load_metadata(&table.ident).await?;
        let deleted = metadata.total_records();
        if metadata.snapshot_id().is_some() {
            self.reset_main_branch(&table.ident, &metadata).await?;
        }
        self.commit_rows(&table.ident, &metadata, batch, WriteMode::Overwrite, deleted)
            .await
    }

    fn catalog_type(&self) -> CatalogType {
        CatalogType::Rest
    }

    async fn close(&self) -> Result<()> {
        // Clear cached token
        *self.oauth_token.write() = None;
        info!("REST catalog client closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iceberg::schema_builder::ColumnSpec;
    use crate::iceberg::types::TimeUnit;

    fn rest_config(uri: Option<&str>) -> CatalogConfig {
        CatalogConfig {
            uri: uri.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_catalog_factory_registry_creation() {
        let registry = CatalogFactoryRegistry::new();
        assert!(registry.supported_types().is_empty());
    }

    #[test]
    fn test_catalog_factory_registry_with_defaults() {
        let registry = CatalogFactoryRegistry::with_defaults();
        let types = registry.supported_types();
        assert!(types.contains(&CatalogType::Rest));
        assert!(types.contains(&CatalogType::Memory));
    }

    #[tokio::test]
    async fn test_rest_catalog_factory_requires_uri() {
        let result = RestCatalogFactory.create(&rest_config(None)).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_rest_catalog_factory_creates_client() {
        // No OAuth2 and no warehouse: construction performs no requests
        let catalog = RestCatalogFactory
            .create(&rest_config(Some("http://localhost:8181/catalog/")))
            .await
            .unwrap();
        assert_eq!(catalog.catalog_type(), CatalogType::Rest);
        assert!(catalog.supports_write(WriteMode::Append));
        assert!(catalog.supports_write(WriteMode::Upsert));
        assert!(catalog.supports_write(WriteMode::Overwrite));
    }

    #[tokio::test]
    async fn test_rest_paths_encode_nested_namespaces() {
        let client = RestCatalogClient::new(&rest_config(Some("http://localhost:8181")))
            .await
            .unwrap();
        let ident = TableIdent::new("sales.emea", "order lines");
        assert_eq!(
            client.table_path(&ident),
            "/v1/namespaces/sales%1Femea/tables/order%20lines"
        );
    }

    #[test]
    fn test_table_ident_parse() {
        let ident = TableIdent::parse("sales.emea.orders").unwrap();
        assert_eq!(ident.namespace, "sales.emea");
        assert_eq!(ident.name, "orders");
        assert_eq!(ident.namespace_parts(), vec!["sales", "emea"]);
        assert_eq!(ident.to_string(), "sales.emea.orders");
        assert!(TableIdent::parse("orders").is_err());
    }

    #[test]
    fn test_create_table_request_carries_layout() {
        let specs = vec![
            ColumnSpec::new("id", TypeTag::Int64).key(),
            ColumnSpec::new(
                "ts",
                TypeTag::Timestamp {
                    unit: TimeUnit::Millisecond,
                    tz: None,
                },
            )
            .partition()
            .sort(),
        ];
        let layout = TableLayout::build(&["id", "ts"], &specs).unwrap();
        let body = serde_json::to_value(create_table_request("orders", &layout)).unwrap();

        assert_eq!(body["name"], "orders");
        assert_eq!(body["schema"]["identifier-field-ids"], serde_json::json!([1]));
        assert_eq!(body["schema"]["fields"][0]["type"], "long");
        assert_eq!(body["schema"]["fields"][0]["required"], true);
        assert_eq!(body["schema"]["fields"][1]["type"], "timestamp");
        assert_eq!(body["partition-spec"]["fields"][0]["transform"], "day");
        assert_eq!(body["partition-spec"]["fields"][0]["name"], "partition_ts");
        assert_eq!(body["partition-spec"]["fields"][0]["source-id"], 2);
        assert_eq!(body["write-order"]["order-id"], 1);
        assert_eq!(body["write-order"]["fields"][0]["transform"], "identity");
    }

    #[test]
    fn test_reset_branch_request_guards_snapshot() {
        let metadata: rest_api::TableMetadata = serde_json::from_str(
            r#"{
                "format-version": 2,
                "table-uuid": "2f0a0c6e-8f0e-4b8c-9a9b-9d8e7f6a5b4c",
                "location": "s3://warehouse/sales/orders",
                "current-snapshot-id": 42
            }"#,
        )
        .unwrap();

        let body = serde_json::to_value(reset_branch_request(&metadata)).unwrap();
        assert_eq!(body["requirements"][0]["type"], "assert-table-uuid");
        assert_eq!(body["requirements"][0]["uuid"], "2f0a0c6e-8f0e-4b8c-9a9b-9d8e7f6a5b4c");
        assert_eq!(body["requirements"][1]["type"], "assert-ref-snapshot-id");
        assert_eq!(body["requirements"][1]["ref"], "main");
        assert_eq!(body["requirements"][1]["snapshot-id"], 42);
        assert_eq!(body["updates"][0]["action"], "remove-snapshot-ref");
        assert_eq!(body["updates"], serde_json::json!([{"action": "remove-snapshot-ref", "ref-name": "main"}]));
    }

    #[test]
    fn test_error_response_mapping() {
        let body = r#"{"error": {"message": "Namespace does not exist: sales", "type": "NoSuchNamespaceException", "code": 404}}"#;
        assert!(matches!(
            handle_error_response(StatusCode::NOT_FOUND, body),
            Error::Iceberg(IcebergError::NamespaceNotFound(_))
        ));

        let body = r#"{"error": {"message": "exists", "type": "AlreadyExistsException", "code": 409}}"#;
        assert!(matches!(
            handle_error_response(StatusCode::CONFLICT, body),
            Error::Iceberg(IcebergError::TableAlreadyExists(_))
        ));

        assert!(matches!(
            handle_error_response(StatusCode::BAD_GATEWAY, "<html>"),
            Error::Iceberg(IcebergError::Other(_))
        ));
    }

    #[test]
    fn test_table_schema_to_arrow() {
        let schema = TableSchema {
            schema_id: 0,
            fields: vec![
                SchemaFieldInfo {
                    id: 1,
                    name: "id".into(),
                    field_type: "long".into(),
                    required: true,
                    doc: None,
                },
                SchemaFieldInfo {
                    id: 2,
                    name: "ts".into(),
                    field_type: "timestamptz".into(),
                    required: false,
                    doc: None,
                },
            ],
            identifier_field_ids: vec![1],
        };

        let arrow = schema.to_arrow_schema().unwrap();
        assert!(!arrow.field(0).is_nullable());
        assert_eq!(
            arrow.field(1).data_type(),
            &arrow::datatypes::DataType::Timestamp(
                arrow::datatypes::TimeUnit::Microsecond,
                Some("UTC".into())
            )
        );
        assert_eq!(schema.identifier_names(), vec!["id".to_string()]);
    }
}
