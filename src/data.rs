use std::fmt;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// A single decoded cell. Missing cells are represented as `None` by callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Text(String),
    Integer(i64),
    Numeric(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Numeric(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Timestamp(ts) => {
                if ts.time() == NaiveTime::MIN {
                    ts.format("%Y-%m-%d").to_string()
                } else {
                    ts.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Renders an optional cell, using an empty string for nulls.
pub fn display_cell(value: Option<&Value>) -> String {
    value.map(Value::as_display).unwrap_or_default()
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Parses a date or date-time string, normalising plain dates to midnight.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    parse_naive_datetime(trimmed)
        .ok()
        .or_else(|| parse_naive_date(trimmed).ok().map(|d| d.and_time(NaiveTime::MIN)))
}

/// Converts a raw text field into a scalar the way a dynamically typed
/// reader would: empty fields are null, booleans and numbers are recognised,
/// everything else (dates included) stays text.
pub fn coerce_text(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Some(Value::Boolean(true));
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Some(Value::Boolean(false));
    }
    if looks_numeric(trimmed) {
        if let Ok(parsed) = trimmed.parse::<i64>() {
            return Some(Value::Integer(parsed));
        }
        if let Ok(parsed) = trimmed.parse::<f64>()
            && parsed.is_finite()
        {
            return Some(Value::Numeric(parsed));
        }
    }
    Some(Value::Text(raw.to_string()))
}

// Rejects tokens Rust's float parser accepts but spreadsheets treat as text
// ("inf", "NaN", "1e5x" is already rejected by the parser itself).
fn looks_numeric(value: &str) -> bool {
    let body = value.strip_prefix(['-', '+']).unwrap_or(value);
    body.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        && body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+'))
}
