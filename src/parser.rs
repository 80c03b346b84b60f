//! Decoding of uploaded bytes into a rectangular table.
//!
//! Row 0 is always the header; there is no header detection. Every data row is
//! padded with nulls or truncated to the header width.

use std::{fmt, io::Cursor, path::Path};

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use encoding_rs::{Encoding, UTF_8};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    data::{Value, coerce_text},
    error::{IngestError, IngestResult},
    io_utils::{self, DEFAULT_CSV_DELIMITER},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Excel,
    Json,
    /// Accepted at upload time; decoding is not available.
    Access,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Csv => "csv",
            FileKind::Excel => "excel",
            FileKind::Json => "json",
            FileKind::Access => "access",
        }
    }

    pub fn from_filename(filename: &str) -> IngestResult<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "tsv" => Ok(FileKind::Csv),
            "xls" | "xlsx" | "xlsm" | "xlsb" | "ods" => Ok(FileKind::Excel),
            "json" => Ok(FileKind::Json),
            "mdb" | "accdb" => Ok(FileKind::Access),
            "" => Err(IngestError::UnsupportedFormat(format!(
                "'{filename}' has no file extension"
            ))),
            other => Err(IngestError::UnsupportedFormat(format!(
                "'.{other}' files are not supported"
            ))),
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileKind {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FileKind::Csv),
            "excel" | "xls" | "xlsx" => Ok(FileKind::Excel),
            "json" => Ok(FileKind::Json),
            "access" => Ok(FileKind::Access),
            other => Err(IngestError::UnsupportedFormat(format!(
                "unknown file kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_CSV_DELIMITER,
            encoding: UTF_8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Option<Value>>>,
}

impl ParsedTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.header.len()
    }

    /// The bounded prefix of data rows used for inference.
    pub fn sample(&self, limit: usize) -> &[Vec<Option<Value>>] {
        &self.rows[..limit.min(self.rows.len())]
    }
}

pub fn parse(bytes: &[u8], kind: FileKind, options: &ParseOptions) -> IngestResult<ParsedTable> {
    let (header, rows) = match kind {
        FileKind::Csv => parse_csv(bytes, options)?,
        FileKind::Excel => parse_excel(bytes)?,
        FileKind::Json => parse_json(bytes)?,
        FileKind::Access => {
            return Err(IngestError::UnsupportedFormat(
                "Access databases cannot be decoded yet".to_string(),
            ));
        }
    };
    let Some(header) = header else {
        return Err(IngestError::EmptyFile);
    };
    if rows.is_empty() {
        return Err(IngestError::EmptyFile);
    }
    let width = header.len();
    let rows = rows
        .into_iter()
        .map(|mut row| {
            row.resize(width, None);
            row
        })
        .collect::<Vec<_>>();
    debug!(
        "Decoded {} {} row(s) across {} column(s)",
        rows.len(),
        kind,
        width
    );
    Ok(ParsedTable { header, rows })
}

type RawTable = (Option<Vec<String>>, Vec<Vec<Option<Value>>>);

fn parse_csv(bytes: &[u8], options: &ParseOptions) -> IngestResult<RawTable> {
    let text = io_utils::decode_bytes(bytes, options.encoding)
        .map_err(|err| IngestError::MalformedFile(err.to_string()))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(options.delimiter)
        .double_quote(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut header = None;
    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record
            .map_err(|err| IngestError::MalformedFile(format!("row {}: {err}", idx + 1)))?;
        if header.is_none() {
            header = Some(record.iter().map(|field| field.trim().to_string()).collect());
            continue;
        }
        rows.push(record.iter().map(coerce_text).collect());
    }
    Ok((header, rows))
}

fn parse_excel(bytes: &[u8]) -> IngestResult<RawTable> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|err| IngestError::MalformedFile(err.to_string()))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => range,
        Some(Err(err)) => return Err(IngestError::MalformedFile(err.to_string())),
        None => return Ok((None, Vec::new())),
    };

    let mut rows_iter = range.rows();
    let header = rows_iter.next().map(|row| {
        row.iter()
            .map(|cell| match cell {
                Data::Empty => String::new(),
                other => other.to_string().trim().to_string(),
            })
            .collect::<Vec<_>>()
    });
    let rows = rows_iter
        .map(|row| row.iter().map(excel_cell).collect())
        .collect();
    Ok((header, rows))
}

fn excel_cell(cell: &Data) -> Option<Value> {
    match cell {
        Data::Int(i) => Some(Value::Integer(*i)),
        Data::Float(f) => Some(Value::Numeric(*f)),
        Data::Bool(b) => Some(Value::Boolean(*b)),
        Data::String(s) if s.trim().is_empty() => None,
        Data::String(s) => Some(Value::Text(s.clone())),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(Value::Timestamp)
            .or_else(|| Some(Value::Numeric(dt.as_f64()))),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(Value::Text(s.clone())),
        Data::Error(_) | Data::Empty => None,
    }
}

fn parse_json(bytes: &[u8]) -> IngestResult<RawTable> {
    let document: JsonValue = serde_json::from_slice(bytes)
        .map_err(|err| IngestError::MalformedFile(err.to_string()))?;
    let JsonValue::Array(items) = document else {
        return Err(IngestError::MalformedFile(
            "expected a top-level JSON array".to_string(),
        ));
    };
    let Some(first) = items.first() else {
        return Ok((None, Vec::new()));
    };

    match first {
        JsonValue::Object(_) => {
            let mut header: Vec<String> = Vec::new();
            for (idx, item) in items.iter().enumerate() {
                let JsonValue::Object(map) = item else {
                    return Err(IngestError::MalformedFile(format!(
                        "element {idx} is not an object"
                    )));
                };
                for key in map.keys() {
                    if !header.contains(key) {
                        header.push(key.clone());
                    }
                }
            }
            let rows = items
                .iter()
                .filter_map(JsonValue::as_object)
                .map(|map| header.iter().map(|key| map.get(key).and_then(json_cell)).collect())
                .collect();
            Ok((Some(header), rows))
        }
        JsonValue::Array(_) => {
            let mut arrays = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                let JsonValue::Array(cells) = item else {
                    return Err(IngestError::MalformedFile(format!(
                        "element {idx} is not an array"
                    )));
                };
                arrays.push(cells);
            }
            let mut arrays = arrays.into_iter();
            let header = arrays.next().map(|cells| {
                cells
                    .iter()
                    .map(|cell| match cell {
                        JsonValue::String(s) => s.trim().to_string(),
                        JsonValue::Null => String::new(),
                        other => other.to_string(),
                    })
                    .collect()
            });
            let rows = arrays
                .map(|cells| cells.iter().map(json_cell).collect())
                .collect();
            Ok((header, rows))
        }
        _ => Err(IngestError::MalformedFile(
            "expected an array of objects or an array of arrays".to_string(),
        )),
    }
}

fn json_cell(value: &JsonValue) -> Option<Value> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(Value::Boolean(*b)),
        JsonValue::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Numeric)),
        JsonValue::String(s) => Some(Value::Text(s.clone())),
        nested => Some(Value::Text(nested.to_string())),
    }
}
