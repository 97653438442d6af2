//! Iceberg REST API types.
//!
//! Covers the slice of the Apache Iceberg REST Catalog API used for table
//! lifecycle: config discovery, namespaces, table create/load/drop, branch
//! resets, OAuth2. Snapshot commits that add data files go through the
//! `iceberg` crate, which also writes the manifests.
//! See: https://iceberg.apache.org/spec/#iceberg-rest-catalog-api

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Catalog configuration response (`GET /v1/config`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Default configuration values
    #[serde(default)]
    pub defaults: HashMap<String, String>,
    /// Override configuration values
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

impl CatalogConfig {
    /// Path prefix the server wants in front of every resource path.
    pub fn prefix(&self) -> Option<&str> {
        self.overrides
            .get("prefix")
            .or_else(|| self.defaults.get("prefix"))
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }
}

/// List namespaces response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListNamespacesResponse {
    /// List of namespace identifiers
    pub namespaces: Vec<Vec<String>>,
    /// Continuation token for pagination
    #[serde(default, rename = "next-page-token")]
    pub next_page_token: Option<String>,
}

/// Create table request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTableRequest {
    /// Table name
    pub name: String,
    /// Table location (optional, catalog assigns if not provided)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Table schema
    pub schema: Schema,
    /// Partition spec (optional)
    #[serde(skip_serializing_if = "Option::is_none", rename = "partition-spec")]
    pub partition_spec: Option<PartitionSpec>,
    /// Write order (optional)
    #[serde(skip_serializing_if = "Option::is_none", rename = "write-order")]
    pub write_order: Option<SortOrder>,
    /// Stage create (optional)
    #[serde(skip_serializing_if = "Option::is_none", rename = "stage-create")]
    pub stage_create: Option<bool>,
    /// Table properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Load table response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTableResponse {
    /// Metadata location
    #[serde(default, rename = "metadata-location")]
    pub metadata_location: Option<String>,
    /// Table metadata
    pub metadata: TableMetadata,
    /// Configuration overrides
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// Table metadata, the subset needed to describe a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Format version (1 or 2)
    #[serde(rename = "format-version")]
    pub format_version: i32,
    /// Table UUID
    #[serde(rename = "table-uuid")]
    pub table_uuid: String,
    /// Table location
    pub location: String,
    /// Current schema (format v1 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    /// All schemas
    #[serde(default)]
    pub schemas: Vec<Schema>,
    /// Current schema ID
    #[serde(default, rename = "current-schema-id")]
    pub current_schema_id: Option<i32>,
    /// Table properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Current snapshot ID
    #[serde(default, rename = "current-snapshot-id")]
    pub current_snapshot_id: Option<i64>,
    /// All partition specs
    #[serde(default, rename = "partition-specs")]
    pub partition_specs: Vec<PartitionSpec>,
    /// Default partition spec ID
    #[serde(default, rename = "default-spec-id")]
    pub default_spec_id: i32,
    /// Known snapshots
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

impl TableMetadata {
    /// The schema currently in force, for both v1 and v2 metadata.
    pub fn current_schema(&self) -> Option<&Schema> {
        match self.current_schema_id {
            Some(id) => self
                .schemas
                .iter()
                .find(|s| s.schema_id == id)
                .or(self.schema.as_ref()),
            None => self.schema.as_ref().or_else(|| self.schemas.last()),
        }
    }

    /// Current snapshot, treating the v1 sentinel `-1` as none.
    pub fn snapshot_id(&self) -> Option<i64> {
        self.current_snapshot_id.filter(|id| *id >= 0)
    }

    /// The partition spec new data files are written with.
    pub fn default_partition_spec(&self) -> Option<&PartitionSpec> {
        self.partition_specs
            .iter()
            .find(|spec| spec.spec_id == self.default_spec_id)
    }

    /// Row count of the current snapshot, from its summary.
    pub fn total_records(&self) -> usize {
        let Some(current) = self.snapshot_id() else {
            return 0;
        };
        self.snapshots
            .iter()
            .find(|s| s.snapshot_id == current)
            .and_then(|s| s.summary.get("total-records"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }
}

/// Snapshot entry in table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot ID
    #[serde(rename = "snapshot-id")]
    pub snapshot_id: i64,
    /// Parent snapshot ID
    #[serde(default, rename = "parent-snapshot-id")]
    pub parent_snapshot_id: Option<i64>,
    /// Timestamp (ms)
    #[serde(default, rename = "timestamp-ms")]
    pub timestamp_ms: i64,
    /// Summary (operation, added/total record counts)
    #[serde(default)]
    pub summary: HashMap<String, String>,
}

/// Iceberg schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Schema ID
    #[serde(default, rename = "schema-id")]
    pub schema_id: i32,
    /// Schema type (always "struct")
    #[serde(rename = "type", default = "default_struct_type")]
    pub r#type: String,
    /// Schema fields
    pub fields: Vec<SchemaField>,
    /// Identifier field IDs (for upsert support)
    #[serde(default, rename = "identifier-field-ids")]
    pub identifier_field_ids: Vec<i32>,
}

fn default_struct_type() -> String {
    "struct".to_string()
}

/// Schema field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    /// Field ID
    pub id: i32,
    /// Field name
    pub name: String,
    /// Field type (primitive or nested)
    #[serde(rename = "type")]
    pub field_type: serde_json::Value,
    /// Whether field is required
    pub required: bool,
    /// Documentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

/// Partition spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// Spec ID
    #[serde(rename = "spec-id")]
    pub spec_id: i32,
    /// Partition fields
    #[serde(default)]
    pub fields: Vec<PartitionField>,
}

/// Partition field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionField {
    /// Source field ID
    #[serde(rename = "source-id")]
    pub source_id: i32,
    /// Field ID in partition spec
    #[serde(rename = "field-id")]
    pub field_id: i32,
    /// Partition field name
    pub name: String,
    /// Transform (identity, bucket, truncate, year, month, day, hour)
    pub transform: String,
}

/// Sort order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortOrder {
    /// Sort order ID
    #[serde(rename = "order-id")]
    pub order_id: i32,
    /// Sort fields
    #[serde(default)]
    pub fields: Vec<SortField>,
}

/// Sort field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortField {
    /// Transform
    pub transform: String,
    /// Source field ID
    #[serde(rename = "source-id")]
    pub source_id: i32,
    /// Sort direction
    pub direction: String,
    /// Null ordering
    #[serde(rename = "null-order")]
    pub null_order: String,
}

/// Commit table request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitTableRequest {
    /// Requirements for optimistic concurrency
    pub requirements: Vec<TableRequirement>,
    /// Updates to apply
    pub updates: Vec<TableUpdate>,
}

/// Table requirement for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TableRequirement {
    /// Assert table UUID matches
    #[serde(rename = "assert-table-uuid")]
    AssertTableUuid { uuid: String },
    /// Assert ref snapshot ID (for branches/tags)
    #[serde(rename = "assert-ref-snapshot-id")]
    AssertRefSnapshotId {
        #[serde(rename = "ref")]
        ref_name: String,
        #[serde(rename = "snapshot-id")]
        snapshot_id: Option<i64>,
    },
}

/// Table update operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum TableUpdate {
    /// Remove snapshot ref
    #[serde(rename = "remove-snapshot-ref")]
    RemoveSnapshotRef {
        #[serde(rename = "ref-name")]
        ref_name: String,
    },
}

/// Commit table response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitTableResponse {
    /// Metadata location
    #[serde(rename = "metadata-location")]
    pub metadata_location: String,
    /// Updated metadata
    pub metadata: TableMetadata,
}

/// Error envelope returned by the REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorModel,
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorModel {
    /// Error message
    pub message: String,
    /// Error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// HTTP status code
    pub code: i32,
    /// Stack trace (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
}

/// OAuth token response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokenResponse {
    /// Access token
    pub access_token: String,
    /// Token type
    pub token_type: String,
    /// Expires in (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_request_serialization() {
        let request = CreateTableRequest {
            name: "orders".to_string(),
            location: None,
            schema: Schema {
                schema_id: 0,
                r#type: "struct".to_string(),
                fields: vec![SchemaField {
                    id: 1,
                    name: "id".to_string(),
                    field_type: serde_json::json!("long"),
                    required: true,
                    doc: None,
                }],
                identifier_field_ids: vec![1],
            },
            partition_spec: Some(PartitionSpec {
                spec_id: 0,
                fields: vec![],
            }),
            write_order: None,
            stage_create: None,
            properties: HashMap::new(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["schema"]["identifier-field-ids"], serde_json::json!([1]));
        assert_eq!(json["partition-spec"]["spec-id"], 0);
        assert!(json.get("write-order").is_none());
        assert!(json.get("location").is_none());
    }

    #[test]
    fn test_v2_metadata_current_schema() {
        let json = r#"{
            "metadata-location": "s3://bucket/orders/metadata/00001.metadata.json",
            "metadata": {
                "format-version": 2,
                "table-uuid": "2f0a0c6e-8f0e-4b8c-9a9b-9d8e7f6a5b4c",
                "location": "s3://bucket/orders",
                "current-schema-id": 1,
                "schemas": [
                    {"schema-id": 0, "type": "struct", "fields": []},
                    {"schema-id": 1, "type": "struct", "identifier-field-ids": [1], "fields": [
                        {"id": 1, "name": "id", "type": "long", "required": true}
                    ]}
                ],
                "current-snapshot-id": -1,
                "properties": {"owner": "etl"}
            }
        }"#;

        let response: LoadTableResponse = serde_json::from_str(json).unwrap();
        let schema = response.metadata.current_schema().unwrap();
        assert_eq!(schema.schema_id, 1);
        assert_eq!(schema.identifier_field_ids, vec![1]);
        assert_eq!(response.metadata.snapshot_id(), None);
    }

    #[test]
    fn test_metadata_partition_spec_and_record_count() {
        let json = r#"{
            "format-version": 2,
            "table-uuid": "2f0a0c6e-8f0e-4b8c-9a9b-9d8e7f6a5b4c",
            "location": "s3://bucket/orders",
            "current-schema-id": 0,
            "schemas": [{"schema-id": 0, "type": "struct", "fields": []}],
            "default-spec-id": 1,
            "partition-specs": [
                {"spec-id": 0, "fields": []},
                {"spec-id": 1, "fields": [
                    {"source-id": 2, "field-id": 1000, "name": "partition_ts", "transform": "day"}
                ]}
            ],
            "current-snapshot-id": 7,
            "snapshots": [
                {"snapshot-id": 6, "timestamp-ms": 1, "summary": {"operation": "append", "total-records": "3"}},
                {"snapshot-id": 7, "parent-snapshot-id": 6, "timestamp-ms": 2,
                 "summary": {"operation": "append", "total-records": "12"}}
            ]
        }"#;

        let metadata: TableMetadata = serde_json::from_str(json).unwrap();
        let spec = metadata.default_partition_spec().unwrap();
        assert_eq!(spec.fields[0].transform, "day");
        assert_eq!(metadata.total_records(), 12);
    }

    #[test]
    fn test_branch_reset_request_serialization() {
        let request = CommitTableRequest {
            requirements: vec![TableRequirement::AssertRefSnapshotId {
                ref_name: "main".to_string(),
                snapshot_id: Some(99),
            }],
            updates: vec![TableUpdate::RemoveSnapshotRef {
                ref_name: "main".to_string(),
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["requirements"][0]["type"], "assert-ref-snapshot-id");
        assert_eq!(json["requirements"][0]["ref"], "main");
        assert_eq!(json["requirements"][0]["snapshot-id"], 99);
        assert_eq!(json["updates"][0]["action"], "remove-snapshot-ref");
        assert_eq!(json["updates"][0]["ref-name"], "main");
    }

    #[test]
    fn test_config_prefix() {
        let config: CatalogConfig = serde_json::from_str(
            r#"{"defaults": {}, "overrides": {"prefix": "b7f3c2a1"}}"#,
        )
        .unwrap();
        assert_eq!(config.prefix(), Some("b7f3c2a1"));
        assert_eq!(CatalogConfig::default().prefix(), None);
    }

    #[test]
    fn test_error_response_deserialization() {
        let json = r#"{"error": {
            "message": "Table does not exist: sales.orders",
            "type": "NoSuchTableException",
            "code": 404
        }}"#;

        let response: ErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.error.code, 404);
        assert_eq!(response.error.error_type, "NoSuchTableException");
    }
}
