//! Shaping Arrow batches to declared and stored schemas.

use crate::error::{BatchError, ConfigError, Result};
use crate::iceberg::schema_builder::CanonicalSchema;
use crate::iceberg::types::{TypeTag, TypeVocabulary};
use arrow::array::{new_null_array, ArrayRef, BooleanArray};
use arrow::compute::{cast_with_options, filter_record_batch, CastOptions};
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::row::{OwnedRow, RowConverter, SortField};
use std::collections::HashSet;
use std::sync::Arc;

/// Project `batch` onto the declared schema.
///
/// Columns come out in declaration order, cast to their declared types, with
/// key columns non-nullable. Undeclared batch columns are dropped.
pub fn prepare_batch(batch: &RecordBatch, schema: &CanonicalSchema) -> Result<RecordBatch> {
    let target = Arc::new(schema.to_arrow_schema());
    let mut columns = Vec::with_capacity(schema.fields.len());

    for (field, declared) in target.fields().iter().zip(&schema.fields) {
        let column = batch
            .column_by_name(field.name())
            .ok_or_else(|| ConfigError::ColumnNotInBatch {
                column: field.name().clone(),
            })?;
        let column = cast_column(field.name(), column, field.data_type())?;
        if declared.required && column.null_count() > 0 {
            return Err(BatchError::NullKey {
                column: field.name().clone(),
                null_count: column.null_count(),
            }
            .into());
        }
        columns.push(column);
    }

    build_batch(target, columns, batch.num_rows())
}

/// Align a batch with a stored table schema, matching columns by name.
///
/// Stored columns absent from the batch are filled with nulls when optional.
pub fn align_to_schema(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch> {
    let rows = batch.num_rows();
    let mut columns = Vec::with_capacity(target.fields().len());

    for field in target.fields() {
        let column = match batch.column_by_name(field.name()) {
            Some(column) => cast_column(field.name(), column, field.data_type())?,
            None if field.is_nullable() => new_null_array(field.data_type(), rows),
            None => return Err(BatchError::MissingRequired(field.name().clone()).into()),
        };
        if !field.is_nullable() && column.null_count() > 0 {
            return Err(BatchError::NullKey {
                column: field.name().clone(),
                null_count: column.null_count(),
            }
            .into());
        }
        columns.push(column);
    }

    build_batch(target.clone(), columns, rows)
}

/// Cast strictly: values that do not convert are an error, not a null.
fn cast_column(name: &str, column: &ArrayRef, to: &DataType) -> Result<ArrayRef> {
    if column.data_type() == to {
        return Ok(column.clone());
    }
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    cast_with_options(column, to, &options).map_err(|e| {
        BatchError::Cast {
            column: name.to_string(),
            from: describe(column.data_type()),
            to: describe(to),
            message: e.to_string(),
        }
        .into()
    })
}

fn describe(data_type: &DataType) -> String {
    TypeTag::from_arrow(data_type)
        .map(|tag| tag.render(TypeVocabulary::Config))
        .unwrap_or_else(|_| format!("{:?}", data_type))
}

fn build_batch(schema: SchemaRef, columns: Vec<ArrayRef>, rows: usize) -> Result<RecordBatch> {
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}

/// Column indices of `names` within `schema`, in order.
pub fn project_schema(schema: &Schema, names: &[String]) -> Result<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            schema.index_of(name).map_err(|_| {
                ConfigError::Invalid(format!("Column '{}' does not exist in the table", name)).into()
            })
        })
        .collect()
}

/// Existing rows left after an upsert removed the ones it replaces.
#[derive(Debug)]
pub struct KeyedMerge {
    /// Existing rows whose key is not in the incoming batch
    pub kept: Vec<RecordBatch>,
    /// Existing rows replaced by an incoming row
    pub replaced: usize,
}

/// Drop the rows of `existing` whose `keys` match a row of `incoming`.
///
/// All batches must share `incoming`'s schema. A key repeated within
/// `incoming` is a [`BatchError::DuplicateKey`].
pub fn merge_by_key(
    existing: &[RecordBatch],
    incoming: &RecordBatch,
    keys: &[String],
) -> Result<KeyedMerge> {
    let schema = incoming.schema();
    let key_indices = project_schema(&schema, keys)?;
    let converter = RowConverter::new(
        key_indices
            .iter()
            .map(|i| SortField::new(schema.field(*i).data_type().clone()))
            .collect(),
    )?;

    let mut incoming_keys = HashSet::with_capacity(incoming.num_rows());
    for (row, key) in key_rows(&converter, incoming, &key_indices)?.into_iter().enumerate() {
        if !incoming_keys.insert(key) {
            return Err(BatchError::DuplicateKey(format!(
                "row {} repeats a key on ({})",
                row,
                keys.join(", ")
            ))
            .into());
        }
    }

    let mut kept = Vec::with_capacity(existing.len());
    let mut replaced = 0;
    for batch in existing {
        let keep: BooleanArray = key_rows(&converter, batch, &key_indices)?
            .iter()
            .map(|key| Some(!incoming_keys.contains(key)))
            .collect();
        let filtered = filter_record_batch(batch, &keep)?;
        replaced += batch.num_rows() - filtered.num_rows();
        if filtered.num_rows() > 0 {
            kept.push(filtered);
        }
    }

    Ok(KeyedMerge { kept, replaced })
}

/// Key rows of `batch` over the columns at `indices`.
fn key_rows(converter: &RowConverter, batch: &RecordBatch, indices: &[usize]) -> Result<Vec<OwnedRow>> {
    let columns: Vec<ArrayRef> = indices.iter().map(|i| batch.column(*i).clone()).collect();
    let rows = converter.convert_columns(&columns)?;
    Ok(rows.iter().map(|row| row.owned()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::iceberg::schema_builder::{ColumnSpec, TableLayout};
    use crate::iceberg::types::TimeUnit;
    use arrow::array::{Array, Int64Array, StringArray, TimestampMillisecondArray};
    use arrow::datatypes::Field;

    fn source_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("note", DataType::Utf8, true),
            Field::new("id", DataType::Utf8, true),
            Field::new("ts", DataType::Int64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["a", "b"])),
                Arc::new(StringArray::from(vec!["1", "2"])),
                Arc::new(Int64Array::from(vec![1_700_000_000_000, 1_700_000_060_000])),
            ],
        )
        .unwrap()
    }

    fn declared() -> CanonicalSchema {
        let specs = vec![
            ColumnSpec::new("id", TypeTag::Int64).key(),
            ColumnSpec::new(
                "ts",
                TypeTag::Timestamp {
                    unit: TimeUnit::Millisecond,
                    tz: None,
                },
            ),
        ];
        TableLayout::build(&["id", "ts", "note"], &specs).unwrap().schema
    }

    #[test]
    fn test_prepare_projects_and_casts() {
        let prepared = prepare_batch(&source_batch(), &declared()).unwrap();

        assert_eq!(prepared.num_columns(), 2);
        assert_eq!(prepared.schema().field(0).name(), "id");
        assert!(!prepared.schema().field(0).is_nullable());
        let ids = prepared.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.values(), &[1, 2]);
        let ts = prepared
            .column(1)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .unwrap();
        assert_eq!(ts.value(1), 1_700_000_060_000);
    }

    #[test]
    fn test_prepare_rejects_null_keys() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("ts", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(1), None])),
                Arc::new(Int64Array::from(vec![1, 2])),
            ],
        )
        .unwrap();

        match prepare_batch(&batch, &declared()).unwrap_err() {
            Error::Batch(BatchError::NullKey { column, null_count }) => {
                assert_eq!(column, "id");
                assert_eq!(null_count, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_prepare_rejects_uncastable_values() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, true),
            Field::new("ts", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["not-a-number"])),
                Arc::new(Int64Array::from(vec![1])),
            ],
        )
        .unwrap();

        match prepare_batch(&batch, &declared()).unwrap_err() {
            Error::Batch(BatchError::Cast { column, from, to, .. }) => {
                assert_eq!(column, "id");
                assert_eq!(from, "string");
                assert_eq!(to, "int64");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_align_fills_optional_columns() {
        let target: SchemaRef = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("legacy", DataType::Boolean, true),
        ]));
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(arrow::array::Int32Array::from(vec![7, 8]))],
        )
        .unwrap();

        let aligned = align_to_schema(&batch, &target).unwrap();
        assert_eq!(aligned.schema(), target);
        assert_eq!(aligned.column(1).null_count(), 2);
    }

    #[test]
    fn test_align_requires_required_columns() {
        let target: SchemaRef = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let schema = Arc::new(Schema::new(vec![Field::new("other", DataType::Int64, true)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1]))]).unwrap();

        assert!(matches!(
            align_to_schema(&batch, &target).unwrap_err(),
            Error::Batch(BatchError::MissingRequired(name)) if name == "id"
        ));
    }

    fn keyed(ids: Vec<i64>, names: Vec<&str>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_merge_by_key_drops_matched_rows() {
        let existing = vec![keyed(vec![1, 2], vec!["a", "b"]), keyed(vec![3], vec!["c"])];
        let incoming = keyed(vec![2, 3, 4], vec!["B", "C", "D"]);

        let merge = merge_by_key(&existing, &incoming, &["id".into()]).unwrap();
        assert_eq!(merge.replaced, 2);
        assert_eq!(merge.kept.len(), 1);
        let ids = merge.kept[0].column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.values(), &[1]);
    }

    #[test]
    fn test_merge_by_key_rejects_repeated_incoming_key() {
        let incoming = keyed(vec![5, 5], vec!["x", "y"]);
        assert!(matches!(
            merge_by_key(&[], &incoming, &["id".into()]).unwrap_err(),
            Error::Batch(BatchError::DuplicateKey(_))
        ));
    }

    #[test]
    fn test_project_schema() {
        let schema = source_batch().schema();
        assert_eq!(project_schema(&schema, &["ts".into(), "note".into()]).unwrap(), vec![2, 0]);
        assert!(project_schema(&schema, &["missing".into()]).is_err());
    }
}
