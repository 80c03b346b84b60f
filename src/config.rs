//! Tunables for the ingestion pipeline, loadable from a YAML file.
//!
//! Batch sizes exist to bound the payload and duration of each store call so
//! a single analyze run stays within the deadline of whatever environment
//! invokes it. The analyze deadline itself is explicit so that every run ends
//! in a terminal status.

use std::{fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{
    io_utils,
    parser::ParseOptions,
    schema::HeaderPolicy,
};

pub const DEFAULT_COLUMN_BATCH_SIZE: usize = 25;
pub const DEFAULT_ROW_BATCH_SIZE: usize = 500;
pub const DEFAULT_SAMPLE_ROWS: usize = 5;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_ANALYZE_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Column descriptors written per record-store call.
    pub column_batch_size: usize,
    /// Data rows written per record-store call.
    pub row_batch_size: usize,
    /// Leading data rows used for type, null and unique inference.
    pub sample_rows: usize,
    pub default_page_size: usize,
    /// Wall-clock budget for one analyze run; `None` disables the deadline.
    pub analyze_timeout_secs: Option<u64>,
    pub header_policy: HeaderPolicy,
    /// Single-character CSV delimiter; inferred from the file extension when unset.
    pub csv_delimiter: Option<char>,
    /// `encoding_rs` label for CSV uploads; UTF-8 when unset.
    pub input_encoding: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            column_batch_size: DEFAULT_COLUMN_BATCH_SIZE,
            row_batch_size: DEFAULT_ROW_BATCH_SIZE,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            default_page_size: DEFAULT_PAGE_SIZE,
            analyze_timeout_secs: Some(DEFAULT_ANALYZE_TIMEOUT_SECS),
            header_policy: HeaderPolicy::default(),
            csv_delimiter: None,
            input_encoding: None,
        }
    }
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config: IngestConfig =
            serde_yaml::from_reader(reader).context("Parsing config YAML")?;
        config
            .validate()
            .with_context(|| format!("Validating config {path:?}"))?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.column_batch_size > 0, "column_batch_size must be positive");
        ensure!(self.row_batch_size > 0, "row_batch_size must be positive");
        ensure!(self.sample_rows > 0, "sample_rows must be positive");
        ensure!(self.default_page_size > 0, "default_page_size must be positive");
        if let Some(secs) = self.analyze_timeout_secs {
            ensure!(secs > 0, "analyze_timeout_secs must be positive when set");
        }
        if let Some(delimiter) = self.csv_delimiter {
            ensure!(delimiter.is_ascii(), "csv_delimiter must be ASCII");
        }
        self.encoding()?;
        Ok(())
    }

    pub fn analyze_timeout(&self) -> Option<Duration> {
        self.analyze_timeout_secs.map(Duration::from_secs)
    }

    pub fn encoding(&self) -> Result<&'static Encoding> {
        io_utils::resolve_encoding(self.input_encoding.as_deref())
    }

    /// Parser options for a file called `filename`.
    pub fn parse_options(&self, filename: &str) -> Result<ParseOptions> {
        let provided = self.csv_delimiter.map(|c| c as u8);
        Ok(ParseOptions {
            delimiter: io_utils::resolve_input_delimiter(filename, provided),
            encoding: self.encoding()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "column_batch_size: 10").unwrap();
        writeln!(file, "header_policy: reject").unwrap();
        writeln!(file, "analyze_timeout_secs: null").unwrap();

        let config = IngestConfig::load(file.path()).expect("load config");
        assert_eq!(config.column_batch_size, 10);
        assert_eq!(config.row_batch_size, DEFAULT_ROW_BATCH_SIZE);
        assert_eq!(config.sample_rows, DEFAULT_SAMPLE_ROWS);
        assert_eq!(config.header_policy, HeaderPolicy::Reject);
        assert_eq!(config.analyze_timeout(), None);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "row_batch_size: 0").unwrap();
        let err = IngestConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("row_batch_size must be positive"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "batch: 3").unwrap();
        assert!(IngestConfig::load(file.path()).is_err());
    }

    #[test]
    fn parse_options_follow_extension_and_override() {
        let config = IngestConfig::default();
        assert_eq!(config.parse_options("a.tsv").unwrap().delimiter, b'\t');

        let config = IngestConfig {
            csv_delimiter: Some(';'),
            ..IngestConfig::default()
        };
        assert_eq!(config.parse_options("a.tsv").unwrap().delimiter, b';');
    }

    #[test]
    fn unknown_encoding_fails_validation() {
        let config = IngestConfig {
            input_encoding: Some("klingon".to_string()),
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
