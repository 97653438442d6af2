//! Type bridge between the config, Iceberg, and Arrow type vocabularies.
//!
//! Every type string entering the system is parsed into a [`TypeTag`], a closed
//! enum matched exhaustively everywhere it is consumed. Rendering goes the other
//! way. Comparison between a declared type and a stored type goes through
//! [`TypeTag::comparable`], which collapses timestamp units to milliseconds.

use crate::error::TypeError;
use arrow::datatypes::{DataType, TimeUnit as ArrowTimeUnit};
use std::fmt;
use std::sync::Arc;

/// Reference timezone for timezone-aware columns in the table store.
const UTC: &str = "UTC";

/// Named type vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeVocabulary {
    /// Human-authored table configuration (`int64`, `timestamp[ms]`)
    Config,
    /// Iceberg logical types (`long`, `timestamptz`)
    Iceberg,
    /// Arrow data type names (`Int64`, `Timestamp(Millisecond, None)`)
    Arrow,
}

impl fmt::Display for TypeVocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeVocabulary::Config => write!(f, "config"),
            TypeVocabulary::Iceberg => write!(f, "iceberg"),
            TypeVocabulary::Arrow => write!(f, "arrow"),
        }
    }
}

/// Timestamp precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl TimeUnit {
    fn config_suffix(self) -> &'static str {
        match self {
            TimeUnit::Second => "s",
            TimeUnit::Millisecond => "ms",
            TimeUnit::Microsecond => "us",
            TimeUnit::Nanosecond => "ns",
        }
    }

    fn from_config_suffix(s: &str) -> Option<Self> {
        match s {
            "s" => Some(TimeUnit::Second),
            "ms" => Some(TimeUnit::Millisecond),
            "us" => Some(TimeUnit::Microsecond),
            "ns" => Some(TimeUnit::Nanosecond),
            _ => None,
        }
    }

    fn to_arrow(self) -> ArrowTimeUnit {
        match self {
            TimeUnit::Second => ArrowTimeUnit::Second,
            TimeUnit::Millisecond => ArrowTimeUnit::Millisecond,
            TimeUnit::Microsecond => ArrowTimeUnit::Microsecond,
            TimeUnit::Nanosecond => ArrowTimeUnit::Nanosecond,
        }
    }

    fn from_arrow(unit: &ArrowTimeUnit) -> Self {
        match unit {
            ArrowTimeUnit::Second => TimeUnit::Second,
            ArrowTimeUnit::Millisecond => TimeUnit::Millisecond,
            ArrowTimeUnit::Microsecond => TimeUnit::Microsecond,
            ArrowTimeUnit::Nanosecond => TimeUnit::Nanosecond,
        }
    }

    fn from_arrow_name(s: &str) -> Option<Self> {
        match s {
            "Second" => Some(TimeUnit::Second),
            "Millisecond" => Some(TimeUnit::Millisecond),
            "Microsecond" => Some(TimeUnit::Microsecond),
            "Nanosecond" => Some(TimeUnit::Nanosecond),
            _ => None,
        }
    }
}

/// Canonical column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int8,
    Int16,
    Int32,
    Int64,
    Float16,
    Float32,
    Float64,
    Utf8,
    Binary,
    Boolean,
    /// `tz == None` is timezone-naive, distinct from any aware timestamp.
    Timestamp { unit: TimeUnit, tz: Option<String> },
}

impl TypeTag {
    /// Parse a raw type string from the given vocabulary.
    pub fn parse(vocabulary: TypeVocabulary, raw: &str) -> Result<Self, TypeError> {
        let parsed = match vocabulary {
            TypeVocabulary::Config => parse_config(raw.trim()),
            TypeVocabulary::Iceberg => parse_iceberg(raw.trim()),
            TypeVocabulary::Arrow => parse_arrow(raw.trim()),
        };
        parsed.ok_or_else(|| TypeError::Unrecognized {
            vocabulary: vocabulary.to_string(),
            raw: raw.to_string(),
        })
    }

    /// Render this type in the given vocabulary.
    pub fn render(&self, vocabulary: TypeVocabulary) -> String {
        match vocabulary {
            TypeVocabulary::Config => self.config_name(),
            TypeVocabulary::Iceberg => self.iceberg_name().to_string(),
            TypeVocabulary::Arrow => format!("{:?}", self.to_arrow()),
        }
    }

    /// Map an Arrow data type. Large string/binary collapse onto their plain forms.
    pub fn from_arrow(data_type: &DataType) -> Result<Self, TypeError> {
        let tag = match data_type {
            DataType::Int8 => TypeTag::Int8,
            DataType::Int16 => TypeTag::Int16,
            DataType::Int32 => TypeTag::Int32,
            DataType::Int64 => TypeTag::Int64,
            DataType::Float16 => TypeTag::Float16,
            DataType::Float32 => TypeTag::Float32,
            DataType::Float64 => TypeTag::Float64,
            DataType::Utf8 | DataType::LargeUtf8 => TypeTag::Utf8,
            DataType::Binary | DataType::LargeBinary => TypeTag::Binary,
            DataType::Boolean => TypeTag::Boolean,
            DataType::Timestamp(unit, tz) => TypeTag::Timestamp {
                unit: TimeUnit::from_arrow(unit),
                tz: tz.as_ref().map(|tz| tz.to_string()),
            },
            other => {
                return Err(TypeError::Unrecognized {
                    vocabulary: TypeVocabulary::Arrow.to_string(),
                    raw: format!("{:?}", other),
                })
            }
        };
        Ok(tag)
    }

    /// Arrow data type used for batches of this type.
    pub fn to_arrow(&self) -> DataType {
        match self {
            TypeTag::Int8 => DataType::Int8,
            TypeTag::Int16 => DataType::Int16,
            TypeTag::Int32 => DataType::Int32,
            TypeTag::Int64 => DataType::Int64,
            TypeTag::Float16 => DataType::Float16,
            TypeTag::Float32 => DataType::Float32,
            TypeTag::Float64 => DataType::Float64,
            TypeTag::Utf8 => DataType::Utf8,
            TypeTag::Binary => DataType::Binary,
            TypeTag::Boolean => DataType::Boolean,
            TypeTag::Timestamp { unit, tz } => {
                DataType::Timestamp(unit.to_arrow(), tz.as_deref().map(Arc::from))
            }
        }
    }

    /// The type as the table store holds it.
    ///
    /// Iceberg has no 8/16-bit integers or half floats, stores timestamps in
    /// micro- or nanoseconds, and keeps aware timestamps in UTC.
    pub fn storage_type(&self) -> TypeTag {
        match self {
            TypeTag::Int8 | TypeTag::Int16 | TypeTag::Int32 => TypeTag::Int32,
            TypeTag::Float16 | TypeTag::Float32 => TypeTag::Float32,
            TypeTag::Timestamp { unit, tz } => TypeTag::Timestamp {
                unit: match unit {
                    TimeUnit::Nanosecond => TimeUnit::Nanosecond,
                    _ => TimeUnit::Microsecond,
                },
                tz: tz.as_ref().map(|_| UTC.to_string()),
            },
            other => other.clone(),
        }
    }

    /// Comparison key used for drift detection only.
    ///
    /// Timestamps collapse to milliseconds and keep naive vs aware. Never
    /// apply this to data.
    pub fn comparable(&self) -> TypeTag {
        match self {
            TypeTag::Timestamp { tz, .. } => TypeTag::Timestamp {
                unit: TimeUnit::Millisecond,
                tz: tz.clone(),
            },
            other => other.clone(),
        }
    }

    /// Whether a declared type is satisfied by a stored type.
    pub fn compatible_with(&self, stored: &TypeTag) -> bool {
        self.storage_type().comparable() == stored.storage_type().comparable()
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, TypeTag::Timestamp { .. })
    }

    fn config_name(&self) -> String {
        match self {
            TypeTag::Int8 => "int8".into(),
            TypeTag::Int16 => "int16".into(),
            TypeTag::Int32 => "int32".into(),
            TypeTag::Int64 => "int64".into(),
            TypeTag::Float16 => "float16".into(),
            TypeTag::Float32 => "float32".into(),
            TypeTag::Float64 => "float64".into(),
            TypeTag::Utf8 => "string".into(),
            TypeTag::Binary => "binary".into(),
            TypeTag::Boolean => "bool".into(),
            TypeTag::Timestamp { unit, tz: None } => {
                format!("timestamp[{}]", unit.config_suffix())
            }
            TypeTag::Timestamp { unit, tz: Some(tz) } => {
                format!("timestamp[{}, tz={}]", unit.config_suffix(), tz)
            }
        }
    }

    fn iceberg_name(&self) -> &'static str {
        match self {
            TypeTag::Int8 | TypeTag::Int16 | TypeTag::Int32 => "int",
            TypeTag::Int64 => "long",
            TypeTag::Float16 | TypeTag::Float32 => "float",
            TypeTag::Float64 => "double",
            TypeTag::Utf8 => "string",
            TypeTag::Binary => "binary",
            TypeTag::Boolean => "boolean",
            TypeTag::Timestamp {
                unit: TimeUnit::Nanosecond,
                tz: None,
            } => "timestamp_ns",
            TypeTag::Timestamp {
                unit: TimeUnit::Nanosecond,
                tz: Some(_),
            } => "timestamptz_ns",
            TypeTag::Timestamp { tz: None, .. } => "timestamp",
            TypeTag::Timestamp { tz: Some(_), .. } => "timestamptz",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.config_name())
    }
}

/// Parse a raw type string. Free-function form of [`TypeTag::parse`].
pub fn to_canonical(vocabulary: TypeVocabulary, raw: &str) -> Result<TypeTag, TypeError> {
    TypeTag::parse(vocabulary, raw)
}

/// Render a type. Free-function form of [`TypeTag::render`].
pub fn from_canonical(vocabulary: TypeVocabulary, tag: &TypeTag) -> String {
    tag.render(vocabulary)
}

fn parse_config(raw: &str) -> Option<TypeTag> {
    let lower = raw.to_ascii_lowercase();
    let tag = match lower.as_str() {
        "int8" => TypeTag::Int8,
        "int16" => TypeTag::Int16,
        "int32" => TypeTag::Int32,
        "int64" => TypeTag::Int64,
        "float16" | "halffloat" => TypeTag::Float16,
        "float32" | "float" => TypeTag::Float32,
        "float64" | "double" => TypeTag::Float64,
        "string" | "str" | "utf8" | "large_string" | "large_utf8" => TypeTag::Utf8,
        "binary" | "large_binary" => TypeTag::Binary,
        "bool" | "boolean" => TypeTag::Boolean,
        _ if lower.starts_with("timestamp[") => return parse_config_timestamp(raw),
        _ => return None,
    };
    Some(tag)
}

/// `timestamp[<unit>]`, `timestamp[<unit>, tz=<zone>]` or `timestamp[<unit>, <zone>]`.
fn parse_config_timestamp(raw: &str) -> Option<TypeTag> {
    let inner = raw.get("timestamp[".len()..)?.strip_suffix(']')?;
    let (unit, tz) = match inner.split_once(',') {
        Some((unit, qualifier)) => {
            let qualifier = qualifier.trim();
            let zone = match qualifier.split_once('=') {
                Some((key, zone)) if key.trim().eq_ignore_ascii_case("tz") => zone.trim(),
                Some(_) => return None,
                None => qualifier,
            };
            if zone.is_empty() || zone.contains([',', '[', ']']) {
                return None;
            }
            (unit, Some(zone.to_string()))
        }
        None => (inner, None),
    };
    let unit = TimeUnit::from_config_suffix(&unit.trim().to_ascii_lowercase())?;
    Some(TypeTag::Timestamp { unit, tz })
}

fn parse_iceberg(raw: &str) -> Option<TypeTag> {
    let utc = || Some(UTC.to_string());
    let tag = match raw.to_ascii_lowercase().as_str() {
        "int" | "integer" => TypeTag::Int32,
        "long" => TypeTag::Int64,
        "float" => TypeTag::Float32,
        "double" => TypeTag::Float64,
        "string" => TypeTag::Utf8,
        "binary" => TypeTag::Binary,
        "boolean" => TypeTag::Boolean,
        "timestamp" => TypeTag::Timestamp {
            unit: TimeUnit::Microsecond,
            tz: None,
        },
        "timestamptz" => TypeTag::Timestamp {
            unit: TimeUnit::Microsecond,
            tz: utc(),
        },
        "timestamp_ns" => TypeTag::Timestamp {
            unit: TimeUnit::Nanosecond,
            tz: None,
        },
        "timestamptz_ns" => TypeTag::Timestamp {
            unit: TimeUnit::Nanosecond,
            tz: utc(),
        },
        _ => return None,
    };
    Some(tag)
}

fn parse_arrow(raw: &str) -> Option<TypeTag> {
    let tag = match raw {
        "Int8" => TypeTag::Int8,
        "Int16" => TypeTag::Int16,
        "Int32" => TypeTag::Int32,
        "Int64" => TypeTag::Int64,
        "Float16" => TypeTag::Float16,
        "Float32" => TypeTag::Float32,
        "Float64" => TypeTag::Float64,
        "Utf8" | "LargeUtf8" => TypeTag::Utf8,
        "Binary" | "LargeBinary" => TypeTag::Binary,
        "Boolean" => TypeTag::Boolean,
        _ => return parse_arrow_timestamp(raw),
    };
    Some(tag)
}

/// `Timestamp(<Unit>, None)` or `Timestamp(<Unit>, Some("<zone>"))`.
fn parse_arrow_timestamp(raw: &str) -> Option<TypeTag> {
    let inner = raw.strip_prefix("Timestamp(")?.strip_suffix(')')?;
    let (unit, tz) = inner.split_once(',')?;
    let unit = TimeUnit::from_arrow_name(unit.trim())?;
    let tz = match tz.trim() {
        "None" => None,
        quoted => {
            let zone = quoted
                .strip_prefix("Some(\"")?
                .strip_suffix("\")")?;
            if zone.is_empty() {
                return None;
            }
            Some(zone.to_string())
        }
    };
    Some(TypeTag::Timestamp { unit, tz })
}
