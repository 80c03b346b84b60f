//! Column descriptor extraction from a header row and a bounded sample.
//!
//! ## Responsibilities
//!
//! - Header normalisation according to a [`HeaderPolicy`]
//! - One [`ColumnDescriptor`] per header position, in header order
//! - Null and unique counts over the sample rows only
//! - Pattern flags (email, URL, phone) matched against the sample value

use std::{collections::HashSet, sync::OnceLock};

use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, parse_timestamp},
    error::{IngestError, IngestResult},
    infer::{ColumnType, classify},
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HeaderPolicy {
    /// Empty names become `column_<n>`, duplicates get a numeric suffix.
    #[default]
    Rename,
    /// Empty or duplicate names fail extraction.
    Reject,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PatternFlags {
    pub email: bool,
    pub url: bool,
    pub phone: bool,
}

impl PatternFlags {
    pub fn detect(sample: Option<&Value>) -> Self {
        let Some(text) = sample.and_then(Value::as_text).map(str::trim) else {
            return Self::default();
        };
        Self {
            email: email_pattern().is_match(text),
            url: url_pattern().is_match(text),
            phone: phone_pattern().is_match(text) && parse_timestamp(text).is_none(),
        }
    }

    pub fn any(&self) -> bool {
        self.email || self.url || self.phone
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub sample: Option<Value>,
    pub null_count: usize,
    pub unique_count: usize,
    pub patterns: PatternFlags,
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
    })
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(https?://|www\.)[^\s/$.?#][^\s]*$").expect("url pattern compiles")
    })
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\+?[\d\s\-().]{7,20}$").expect("phone pattern compiles")
    })
}

/// Applies `policy` to raw header names.
pub fn normalize_headers(raw: &[String], policy: HeaderPolicy) -> IngestResult<Vec<String>> {
    if raw.is_empty() {
        return Err(IngestError::Schema("header row has no columns".to_string()));
    }
    let mut seen: HashSet<String> = HashSet::with_capacity(raw.len());
    let mut names = Vec::with_capacity(raw.len());
    for (idx, header) in raw.iter().enumerate() {
        let trimmed = header.trim();
        let base = if trimmed.is_empty() {
            if policy == HeaderPolicy::Reject {
                return Err(IngestError::Schema(format!(
                    "header at position {} is empty",
                    idx + 1
                )));
            }
            format!("column_{}", idx + 1)
        } else {
            trimmed.to_string()
        };
        let name = if seen.contains(&base) {
            if policy == HeaderPolicy::Reject {
                return Err(IngestError::Schema(format!(
                    "duplicate header '{base}' at position {}",
                    idx + 1
                )));
            }
            (2..)
                .map(|n| format!("{base}_{n}"))
                .find(|candidate| !seen.contains(candidate) && !raw.contains(candidate))
                .unwrap_or_else(|| format!("{base}_{}", idx + 1))
        } else {
            base
        };
        seen.insert(name.clone());
        names.push(name);
    }
    Ok(names)
}

/// Builds one descriptor per header, in header order.
///
/// `sample_rows` should already be bounded by the caller; every row passed in
/// contributes to the null and unique counts.
pub fn extract(
    header_row: &[String],
    sample_rows: &[Vec<Option<Value>>],
    policy: HeaderPolicy,
) -> IngestResult<Vec<ColumnDescriptor>> {
    let names = normalize_headers(header_row, policy)?;
    let descriptors = names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells = sample_rows
                .iter()
                .map(|row| row.get(idx).and_then(Option::as_ref))
                .collect::<Vec<_>>();
            let sample = cells.iter().copied().flatten().next().cloned();
            let null_count = cells.iter().filter(|cell| cell.is_none()).count();
            let unique_count = cells
                .iter()
                .copied()
                .flatten()
                .map(Value::as_display)
                .unique()
                .count();
            ColumnDescriptor {
                column_type: classify(sample.as_ref()),
                patterns: PatternFlags::detect(sample.as_ref()),
                name,
                sample,
                null_count,
                unique_count,
            }
        })
        .collect();
    Ok(descriptors)
}
