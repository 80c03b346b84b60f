//! Semantic type classification of a single sampled cell.
//!
//! Classification looks at one value per column (the first non-null sample),
//! not the whole column. Heterogeneous columns can therefore be misclassified;
//! consumers treat the inferred type as a hint.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::{Value, parse_timestamp};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Numeric,
    Boolean,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Numeric => "numeric",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
        }
    }

    pub fn variants() -> &'static [ColumnType] {
        &[
            ColumnType::Text,
            ColumnType::Integer,
            ColumnType::Numeric,
            ColumnType::Boolean,
            ColumnType::Timestamp,
        ]
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a sample. Rules are checked in order and the first match wins;
/// a missing sample falls back to text.
pub fn classify(sample: Option<&Value>) -> ColumnType {
    match sample {
        None => ColumnType::Text,
        Some(Value::Integer(_)) => ColumnType::Integer,
        Some(Value::Numeric(f)) if f.is_finite() && f.fract() == 0.0 => ColumnType::Integer,
        Some(Value::Numeric(_)) => ColumnType::Numeric,
        Some(Value::Boolean(_)) => ColumnType::Boolean,
        Some(Value::Timestamp(_)) => ColumnType::Timestamp,
        Some(Value::Text(text)) if parse_timestamp(text).is_some() => ColumnType::Timestamp,
        Some(Value::Text(_)) => ColumnType::Text,
    }
}
