//! Canonical schema, partition spec, and sort order construction.
//!
//! Layouts are rebuilt from configuration for every write. Field ids follow
//! the declared column order starting at 1 and are not persisted.

use crate::config::ColumnConfig;
use crate::error::{ConfigError, Result};
use crate::iceberg::types::{TypeTag, TypeVocabulary};
use arrow::datatypes::{Field, Schema as ArrowSchema};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Arrow field metadata key carrying the Iceberg field id.
pub const PARQUET_FIELD_ID_KEY: &str = "PARQUET:field_id";

/// First partition field id, per Iceberg convention.
const PARTITION_FIELD_ID_START: i32 = 1000;

/// A declared column and the roles it plays in the table layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub logical_type: TypeTag,
    pub is_key: bool,
    pub is_partition: bool,
    pub is_sort: bool,
}

impl ColumnSpec {
    /// Plain, non-key, unpartitioned, unsorted column.
    pub fn new(name: impl Into<String>, logical_type: TypeTag) -> Self {
        Self {
            name: name.into(),
            logical_type,
            is_key: false,
            is_partition: false,
            is_sort: false,
        }
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn partition(mut self) -> Self {
        self.is_partition = true;
        self
    }

    pub fn sort(mut self) -> Self {
        self.is_sort = true;
        self
    }

    /// Resolve config declarations into column specs.
    ///
    /// Fails on unparseable types, on key/partition/sort names that are not
    /// declared columns, and on day partitioning of non-timestamp columns.
    pub fn resolve(
        columns: &[ColumnConfig],
        keys: &[String],
        partitions: &[String],
        sorts: &[String],
    ) -> Result<Vec<ColumnSpec>> {
        let declared: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        for (role, names) in [("Key", keys), ("Partition", partitions), ("Sort", sorts)] {
            if let Some(missing) = names.iter().find(|n| !declared.contains(n.as_str())) {
                return Err(ConfigError::UndeclaredColumn {
                    column: missing.clone(),
                    role,
                }
                .into());
            }
        }

        let mut specs = Vec::with_capacity(columns.len());
        for column in columns {
            let logical_type = TypeTag::parse(TypeVocabulary::Config, &column.data_type)?;
            let spec = ColumnSpec {
                is_key: keys.contains(&column.name),
                is_partition: partitions.contains(&column.name),
                is_sort: sorts.contains(&column.name),
                name: column.name.clone(),
                logical_type,
            };
            if spec.is_partition && !spec.logical_type.is_timestamp() {
                return Err(ConfigError::InvalidPartitionSource {
                    column: spec.name,
                    data_type: column.data_type.clone(),
                }
                .into());
            }
            specs.push(spec);
        }
        Ok(specs)
    }
}

/// Key column names in declaration order.
pub fn key_columns(specs: &[ColumnSpec]) -> Vec<String> {
    specs
        .iter()
        .filter(|s| s.is_key)
        .map(|s| s.name.clone())
        .collect()
}

/// A field of the canonical schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalField {
    pub field_id: i32,
    pub name: String,
    pub field_type: TypeTag,
    pub required: bool,
}

/// Store-agnostic table schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanonicalSchema {
    pub fields: Vec<CanonicalField>,
    pub identifier_field_ids: Vec<i32>,
}

impl CanonicalSchema {
    pub fn field(&self, name: &str) -> Option<&CanonicalField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_id(&self, id: i32) -> Option<&CanonicalField> {
        self.fields.iter().find(|f| f.field_id == id)
    }

    /// Arrow schema for batches written to a table with this schema.
    pub fn to_arrow_schema(&self) -> ArrowSchema {
        let fields: Vec<Field> = self
            .fields
            .iter()
            .map(|f| {
                Field::new(&f.name, f.field_type.to_arrow(), !f.required).with_metadata(
                    HashMap::from([(PARQUET_FIELD_ID_KEY.to_string(), f.field_id.to_string())]),
                )
            })
            .collect();
        ArrowSchema::new(fields)
    }
}

/// Partition transform. Only day bucketing is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTransform {
    Day,
}

impl fmt::Display for PartitionTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionTransform::Day => write!(f, "day"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionField {
    pub source_field_id: i32,
    pub field_id: i32,
    pub transform: PartitionTransform,
    pub name: String,
}

/// Partition specification. Empty means unpartitioned.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartitionSpec {
    pub fields: Vec<PartitionField>,
}

impl PartitionSpec {
    pub fn is_unpartitioned(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Sort transform. Only identity is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortTransform {
    Identity,
}

impl fmt::Display for SortTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortTransform::Identity => write!(f, "identity"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub source_field_id: i32,
    pub transform: SortTransform,
}

/// Sort order. Empty means unsorted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortSpec {
    pub fields: Vec<SortField>,
}

impl SortSpec {
    pub fn is_unsorted(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Everything needed to create a table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableLayout {
    pub schema: CanonicalSchema,
    pub partition_spec: PartitionSpec,
    pub sort_spec: SortSpec,
}

impl TableLayout {
    /// Build the layout for `specs`, checking every column against the batch first.
    pub fn build<S: AsRef<str>>(batch_columns: &[S], specs: &[ColumnSpec]) -> Result<Self> {
        let present: HashSet<&str> = batch_columns.iter().map(AsRef::as_ref).collect();
        if let Some(missing) = specs.iter().find(|s| !present.contains(s.name.as_str())) {
            return Err(ConfigError::ColumnNotInBatch {
                column: missing.name.clone(),
            }
            .into());
        }

        let mut layout = TableLayout::default();
        for (position, spec) in specs.iter().enumerate() {
            let field_id = position as i32 + 1;

            layout.schema.fields.push(CanonicalField {
                field_id,
                name: spec.name.clone(),
                field_type: spec.logical_type.clone(),
                required: spec.is_key,
            });
            if spec.is_key {
                layout.schema.identifier_field_ids.push(field_id);
            }
            if spec.is_partition {
                let partition_id =
                    PARTITION_FIELD_ID_START + layout.partition_spec.fields.len() as i32;
                layout.partition_spec.fields.push(PartitionField {
                    source_field_id: field_id,
                    field_id: partition_id,
                    transform: PartitionTransform::Day,
                    name: format!("partition_{}", spec.name),
                });
            }
            if spec.is_sort {
                layout.sort_spec.fields.push(SortField {
                    source_field_id: field_id,
                    transform: SortTransform::Identity,
                });
            }
        }

        Ok(layout)
    }
}
