use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(author, version, about = "Ingest spreadsheets, infer their schema, and edit them page by page", long_about = None)]
pub struct Cli {
    /// Directory holding import records, rows, edit logs and uploaded files
    #[arg(long, global = true, default_value = ".sheet-ingest")]
    pub store: PathBuf,
    /// YAML file overriding batch sizes, sampling and parsing defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Organization the request acts on behalf of
    #[arg(long = "org", global = true, default_value = "local")]
    pub organization: String,
    /// User recorded as creator or editor
    #[arg(long, global = true, default_value = "local")]
    pub user: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Infer column descriptors from a local file without storing anything
    Probe(ProbeArgs),
    /// Upload a file and create its import record
    Upload(UploadArgs),
    /// Parse a stored upload, persist its columns and rows, and open it for editing
    Analyze(ImportArgs),
    /// Show an import record as JSON
    Status(ImportArgs),
    /// List imports of the organization, newest first
    List,
    /// Show one page of ingested rows
    Page(PageArgs),
    /// Overwrite a single cell, recording the change in the edit log
    Edit(EditArgs),
    /// Show the cell edit log of an import
    History(ImportArgs),
    /// Mark an import as completed
    Complete(ImportArgs),
    /// Delete an import with its columns, rows and stored file
    Delete(ImportArgs),
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input file to inspect (csv, tsv, xlsx, xls, ods, json)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Number of leading data rows used for inference
    #[arg(long)]
    pub sample_rows: Option<usize>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of CSV input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Emit descriptors as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// File to upload, or '-' to read from stdin
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// File name to record; required when reading from stdin
    #[arg(long)]
    pub filename: Option<String>,
    /// Display name (defaults to the file name)
    #[arg(long)]
    pub name: Option<String>,
    /// Run analysis immediately after the upload
    #[arg(long)]
    pub analyze: bool,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Import id
    #[arg(long = "import")]
    pub import: Uuid,
}

#[derive(Debug, Args)]
pub struct PageArgs {
    /// Import id
    #[arg(long = "import")]
    pub import: Uuid,
    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    /// Rows per page (defaults to the configured page size)
    #[arg(long)]
    pub page_size: Option<usize>,
    /// Emit the page as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    /// Import id
    #[arg(long = "import")]
    pub import: Uuid,
    /// 0-based data row index
    #[arg(long)]
    pub row: usize,
    /// Column name
    #[arg(long)]
    pub column: String,
    /// New value; numbers and true/false are stored typed
    #[arg(long, required_unless_present = "null", conflicts_with = "null")]
    pub value: Option<String>,
    /// Clear the cell instead of setting a value
    #[arg(long)]
    pub null: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
