//! Data files and snapshot commits for REST catalog tables.
//!
//! Rows are aligned to the table's current schema, split by day partition,
//! written as Parquet data files through the table's FileIO and committed
//! with a fast-append snapshot. The commit writes the manifest and manifest
//! list, so any Iceberg reader sees the rows. Scans plan over the current
//! snapshot's manifests and read the data files back as Arrow batches.

use crate::config::{CatalogConfig, CredentialType, ParquetCompression};
use crate::error::{IcebergError, Result};
use crate::iceberg::batch::align_to_schema;
use crate::iceberg::factory::TableIdent;
use crate::iceberg::rest_api;
use ::iceberg::spec::{DataFile, DataFileFormat, Literal, Struct};
use ::iceberg::table::Table;
use ::iceberg::transaction::Transaction;
use ::iceberg::writer::base_writer::data_file_writer::DataFileWriterBuilder;
use ::iceberg::writer::file_writer::location_generator::{
    DefaultFileNameGenerator, DefaultLocationGenerator,
};
use ::iceberg::writer::file_writer::ParquetWriterBuilder;
use ::iceberg::writer::{IcebergWriter, IcebergWriterBuilder};
use ::iceberg::{Catalog, NamespaceIdent};
use arrow::array::{Array, Date32Array, UInt32Array};
use arrow::compute::{cast, take_record_batch};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use iceberg_catalog_rest::{RestCatalog, RestCatalogConfig};
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix of every data file name.
const FILE_NAME_PREFIX: &str = "s2i";

/// Writes and reads table data through the Iceberg REST catalog.
pub(crate) struct TableWriter {
    catalog: RestCatalog,
    writer_properties: WriterProperties,
}

impl TableWriter {
    pub fn new(config: &CatalogConfig, base_uri: &str) -> Self {
        let props = catalog_properties(config, base_uri);
        let rest_config = match config.warehouse.clone() {
            Some(warehouse) => RestCatalogConfig::builder()
                .uri(base_uri.to_string())
                .warehouse(warehouse)
                .props(props)
                .build(),
            None => RestCatalogConfig::builder()
                .uri(base_uri.to_string())
                .props(props)
                .build(),
        };

        Self {
            catalog: RestCatalog::new(rest_config),
            writer_properties: writer_properties(config.storage.compression),
        }
    }

    /// Write `batch` as new data files and commit them in one snapshot.
    ///
    /// Returns the new snapshot id, or none when `batch` is empty and there
    /// was nothing to commit.
    pub async fn append(
        &self,
        ident: &TableIdent,
        partition_columns: &[String],
        batch: RecordBatch,
    ) -> Result<Option<i64>> {
        if batch.num_rows() == 0 {
            debug!(table = %ident, "Empty batch, no data files written");
            return Ok(None);
        }

        let table = self.load(ident).await?;
        let schema = table.metadata().current_schema().clone();
        let arrow_schema = Arc::new(
            ::iceberg::arrow::schema_to_arrow_schema(&schema)
                .map_err(|e| iceberg_error("convert table schema", e))?,
        );
        let aligned = align_to_schema(&batch, &arrow_schema)?;

        let mut data_files = Vec::new();
        for (days, rows) in split_by_day(&aligned, partition_columns)? {
            let partition = if partition_columns.is_empty() {
                None
            } else {
                Some(days.into_iter().map(|d| d.map(Literal::date)).collect::<Struct>())
            };
            data_files.extend(self.write_data_files(&table, partition, rows).await?);
        }

        let files = data_files.len();
        let tx = Transaction::new(&table);
        let mut action = tx
            .fast_append(None, vec![])
            .map_err(|e| iceberg_error("start append", e))?;
        action
            .add_data_files(data_files)
            .map_err(|e| iceberg_error("add data files", e))?;
        let tx = action
            .apply()
            .await
            .map_err(|e| iceberg_error("write manifests", e))?;
        let committed = tx
            .commit(&self.catalog)
            .await
            .map_err(|e| iceberg_error("commit snapshot", e))?;

        let snapshot_id = committed
            .metadata()
            .current_snapshot()
            .map(|snapshot| snapshot.snapshot_id());
        info!(
            table = %ident,
            files,
            rows = aligned.num_rows(),
            snapshot_id = ?snapshot_id,
            "Committed data files"
        );
        Ok(snapshot_id)
    }

    /// Read every row of the table's current snapshot.
    pub async fn scan(&self, ident: &TableIdent) -> Result<Vec<RecordBatch>> {
        let table = self.load(ident).await?;
        if table.metadata().current_snapshot().is_none() {
            return Ok(Vec::new());
        }

        let stream = table
            .scan()
            .select_all()
            .build()
            .map_err(|e| iceberg_error("plan scan", e))?
            .to_arrow()
            .await
            .map_err(|e| iceberg_error("open scan", e))?;
        stream
            .try_collect()
            .await
            .map_err(|e| iceberg_error("read data files", e))
    }

    async fn load(&self, ident: &TableIdent) -> Result<Table> {
        let namespace = NamespaceIdent::from_vec(ident.namespace_parts())
            .map_err(|e| iceberg_error("build namespace", e))?;
        let table_ident = ::iceberg::TableIdent::new(namespace, ident.name.clone());
        self.catalog
            .load_table(&table_ident)
            .await
            .map_err(|e| iceberg_error("load table", e))
    }

    async fn write_data_files(
        &self,
        table: &Table,
        partition: Option<Struct>,
        batch: RecordBatch,
    ) -> Result<Vec<DataFile>> {
        let location_generator = DefaultLocationGenerator::new(table.metadata().clone())
            .map_err(|e| iceberg_error("resolve data location", e))?;
        // A fresh suffix per file keeps names unique across runs
        let file_name_generator = DefaultFileNameGenerator::new(
            FILE_NAME_PREFIX.to_string(),
            Some(uuid::Uuid::new_v4().to_string()),
            DataFileFormat::Parquet,
        );
        let parquet_writer_builder = ParquetWriterBuilder::new(
            self.writer_properties.clone(),
            table.metadata().current_schema().clone(),
            table.file_io().clone(),
            location_generator,
            file_name_generator,
        );

        let mut writer = DataFileWriterBuilder::new(parquet_writer_builder, partition)
            .build()
            .await
            .map_err(|e| iceberg_error("open data file", e))?;
        writer
            .write(batch)
            .await
            .map_err(|e| iceberg_error("write data file", e))?;
        writer
            .close()
            .await
            .map_err(|e| iceberg_error("close data file", e))
    }
}

fn iceberg_error(action: &str, error: ::iceberg::Error) -> crate::Error {
    IcebergError::Other(format!("Failed to {}: {}", action, error)).into()
}

/// Properties for the `iceberg` REST catalog client: auth, headers and
/// FileIO settings.
pub(crate) fn catalog_properties(config: &CatalogConfig, base_uri: &str) -> HashMap<String, String> {
    let mut props = HashMap::new();

    match config.rest.credential_type {
        CredentialType::None => {}
        CredentialType::Bearer => {
            if let Some(token) = &config.rest.credential {
                props.insert("token".to_string(), token.clone());
            }
        }
        CredentialType::OAuth2 => {
            if let Some((id, secret)) = config.rest.client_credentials() {
                props.insert("credential".to_string(), format!("{}:{}", id, secret));
            }
            props.insert(
                "oauth2-server-uri".to_string(),
                config
                    .rest
                    .oauth2_server_uri
                    .clone()
                    .unwrap_or_else(|| format!("{}/v1/oauth/tokens", base_uri)),
            );
            if let Some(scope) = &config.rest.oauth2_scope {
                props.insert("scope".to_string(), scope.clone());
            }
        }
    }

    for (name, value) in &config.rest.custom_headers {
        props.insert(format!("header.{}", name), value.clone());
    }
    props.extend(config.storage.properties.clone());

    props
}

/// Parquet writer settings for a compression codec.
pub(crate) fn writer_properties(compression: ParquetCompression) -> WriterProperties {
    let compression = match compression {
        ParquetCompression::Snappy => Compression::SNAPPY,
        ParquetCompression::Gzip => Compression::GZIP(Default::default()),
        ParquetCompression::Lz4 => Compression::LZ4,
        ParquetCompression::Zstd => Compression::ZSTD(Default::default()),
        ParquetCompression::None => Compression::UNCOMPRESSED,
    };

    WriterProperties::builder()
        .set_compression(compression)
        .set_max_row_group_size(128 * 1024)
        .build()
}

/// Source columns of the table's default partition spec, in spec order.
///
/// Only `day` partitions can be written, since data files must carry their
/// partition value and that is the only transform tables here are created
/// with.
pub(crate) fn partition_columns(
    ident: &TableIdent,
    metadata: &rest_api::TableMetadata,
) -> Result<Vec<String>> {
    let Some(spec) = metadata.default_partition_spec() else {
        return Ok(Vec::new());
    };
    let schema = metadata.current_schema().ok_or_else(|| {
        IcebergError::Other(format!("Catalog returned no current schema for {}", ident))
    })?;

    spec.fields
        .iter()
        .map(|field| {
            if field.transform != "day" {
                return Err(IcebergError::Other(format!(
                    "Table {} is partitioned by {}({}); only day partitions can be written",
                    ident, field.transform, field.source_id
                ))
                .into());
            }
            schema
                .fields
                .iter()
                .find(|f| f.id == field.source_id)
                .map(|f| f.name.clone())
                .ok_or_else(|| {
                    IcebergError::Other(format!(
                        "Partition field {} of {} has no source column {}",
                        field.name, ident, field.source_id
                    ))
                    .into()
                })
        })
        .collect()
}

/// Group rows by the day (days since epoch) of each partition column.
///
/// Groups come out in ascending day order; a null timestamp gives a null
/// partition value. With no partition columns the whole batch is one group.
pub(crate) fn split_by_day(
    batch: &RecordBatch,
    columns: &[String],
) -> Result<Vec<(Vec<Option<i32>>, RecordBatch)>> {
    if columns.is_empty() {
        return Ok(vec![(Vec::new(), batch.clone())]);
    }

    let days = columns
        .iter()
        .map(|name| {
            let column = batch.column_by_name(name).ok_or_else(|| {
                IcebergError::Other(format!("Partition column '{}' is not in the batch", name))
            })?;
            let dates = cast(column, &DataType::Date32)?;
            dates
                .as_any()
                .downcast_ref::<Date32Array>()
                .cloned()
                .ok_or_else(|| IcebergError::Other(format!("Column '{}' is not temporal", name)).into())
        })
        .collect::<Result<Vec<Date32Array>>>()?;

    let mut groups: BTreeMap<Vec<Option<i32>>, Vec<u32>> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let key = days
            .iter()
            .map(|d| (!d.is_null(row)).then(|| d.value(row)))
            .collect();
        groups.entry(key).or_default().push(row as u32);
    }

    groups
        .into_iter()
        .map(|(key, rows)| Ok((key, take_record_batch(batch, &UInt32Array::from(rows))?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestCatalogConfig;
    use arrow::array::{Int64Array, TimestampMicrosecondArray};
    use arrow::datatypes::{Field, Schema, TimeUnit};

    const DAY_US: i64 = 86_400_000_000;

    fn events(ts: Vec<Option<i64>>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("ts", DataType::Timestamp(TimeUnit::Microsecond, None), true),
        ]));
        let ids: Vec<i64> = (0..ts.len() as i64).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(TimestampMicrosecondArray::from(ts)),
            ],
        )
        .unwrap()
    }

    fn metadata(spec_fields: &str) -> rest_api::TableMetadata {
        serde_json::from_str(&format!(
            r#"{{
                "format-version": 2,
                "table-uuid": "2f0a0c6e-8f0e-4b8c-9a9b-9d8e7f6a5b4c",
                "location": "s3://warehouse/sales/orders",
                "current-schema-id": 0,
                "schemas": [{{"schema-id": 0, "type": "struct", "fields": [
                    {{"id": 1, "name": "id", "type": "long", "required": true}},
                    {{"id": 2, "name": "ts", "type": "timestamp", "required": false}}
                ]}}],
                "default-spec-id": 0,
                "partition-specs": [{{"spec-id": 0, "fields": [{}]}}]
            }}"#,
            spec_fields
        ))
        .unwrap()
    }

    #[test]
    fn test_split_by_day_groups_rows() {
        // Two rows on day 19000, one on day 19001, one null
        let base = 19_000 * DAY_US;
        let batch = events(vec![Some(base + 5), None, Some(base + DAY_US), Some(base + 10)]);

        let groups = split_by_day(&batch, &["ts".to_string()]).unwrap();
        let keys: Vec<_> = groups.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![vec![None], vec![Some(19_000)], vec![Some(19_001)]]);

        let ids = groups[1].1.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.values(), &[0, 3]);
    }

    #[test]
    fn test_split_unpartitioned_keeps_batch_whole() {
        let batch = events(vec![Some(1), Some(DAY_US * 3)]);
        let groups = split_by_day(&batch, &[]).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.num_rows(), 2);
    }

    #[test]
    fn test_partition_columns_from_default_spec() {
        let ident = TableIdent::new("sales", "orders");
        let day = metadata(
            r#"{"source-id": 2, "field-id": 1000, "name": "partition_ts", "transform": "day"}"#,
        );
        assert_eq!(partition_columns(&ident, &day).unwrap(), vec!["ts".to_string()]);

        assert!(partition_columns(&ident, &metadata("")).unwrap().is_empty());

        let bucket = metadata(
            r#"{"source-id": 1, "field-id": 1000, "name": "id_bucket", "transform": "bucket[16]"}"#,
        );
        let err = partition_columns(&ident, &bucket).unwrap_err();
        assert!(err.to_string().contains("bucket[16]"));
    }

    #[test]
    fn test_catalog_properties_carry_auth_headers_and_storage() {
        let mut config = CatalogConfig {
            uri: Some("http://lakekeeper:8181/catalog".into()),
            rest: RestCatalogConfig {
                credential_type: CredentialType::OAuth2,
                credential: Some("etl:s3cr3t".into()),
                custom_headers: HashMap::from([("X-Tenant".into(), "acme".into())]),
                ..Default::default()
            },
            ..Default::default()
        };
        config
            .storage
            .properties
            .insert("s3.endpoint".into(), "http://minio:9000".into());

        let props = catalog_properties(&config, "http://lakekeeper:8181/catalog");
        assert_eq!(props["credential"], "etl:s3cr3t");
        assert_eq!(
            props["oauth2-server-uri"],
            "http://lakekeeper:8181/catalog/v1/oauth/tokens"
        );
        assert_eq!(props["header.X-Tenant"], "acme");
        assert_eq!(props["s3.endpoint"], "http://minio:9000");
        assert!(!props.contains_key("token"));

        config.rest.credential_type = CredentialType::Bearer;
        config.rest.credential = Some("abc".into());
        let props = catalog_properties(&config, "http://lakekeeper:8181/catalog");
        assert_eq!(props["token"], "abc");
        assert!(!props.contains_key("credential"));
    }

    #[test]
    fn test_writer_properties_compression() {
        let props = writer_properties(ParquetCompression::Zstd);
        assert!(matches!(
            props.compression(&parquet::schema::types::ColumnPath::from("id")),
            Compression::ZSTD(_)
        ));
        assert_eq!(props.max_row_group_size(), 128 * 1024);
    }
}
