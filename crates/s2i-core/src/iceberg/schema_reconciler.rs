//! Drift detection between a declared schema and a live table schema.
//!
//! Reconciliation is one-directional: every declared column must exist in the
//! table with a compatible type, while columns only the table has are ignored.

use crate::iceberg::factory::TableSchema;
use crate::iceberg::schema_builder::CanonicalSchema;
use crate::iceberg::types::{TypeTag, TypeVocabulary};
use std::collections::HashMap;
use std::fmt;

/// Type of a column as found in the live table.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteType {
    Known(TypeTag),
    /// Stored type outside the bridge's vocabulary (nested, decimal, ...)
    Unrecognized(String),
}

/// A declared column the live table cannot satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaMismatch {
    pub column: String,
    pub expected: TypeTag,
    /// `None` when the column is absent from the table
    pub actual: Option<RemoteType>,
}

impl SchemaMismatch {
    pub fn is_missing(&self) -> bool {
        self.actual.is_none()
    }

    pub fn expected_display(&self) -> String {
        self.expected.render(TypeVocabulary::Config)
    }

    pub fn actual_display(&self) -> String {
        match &self.actual {
            None => "<absent>".to_string(),
            Some(RemoteType::Known(tag)) => tag.render(TypeVocabulary::Config),
            Some(RemoteType::Unrecognized(raw)) => raw.clone(),
        }
    }
}

impl fmt::Display for SchemaMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, found {}",
            self.column,
            self.expected_display(),
            self.actual_display()
        )
    }
}

/// Compare the declared schema against the table's live schema.
pub fn reconcile(canonical: &CanonicalSchema, existing: &TableSchema) -> Vec<SchemaMismatch> {
    let remote: HashMap<&str, &str> = existing
        .fields
        .iter()
        .map(|f| (f.name.as_str(), f.field_type.as_str()))
        .collect();

    let mut mismatches = Vec::new();
    for field in &canonical.fields {
        let actual = match remote.get(field.name.as_str()) {
            None => None,
            Some(raw) => match TypeTag::parse(TypeVocabulary::Iceberg, raw) {
                Ok(tag) if field.field_type.compatible_with(&tag) => continue,
                Ok(tag) => Some(RemoteType::Known(tag)),
                Err(_) => Some(RemoteType::Unrecognized(raw.to_string())),
            },
        };
        mismatches.push(SchemaMismatch {
            column: field.name.clone(),
            expected: field.field_type.clone(),
            actual,
        });
    }
    mismatches
}
