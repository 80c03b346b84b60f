//! Byte-level helpers shared by the parser and the command line.
//!
//! - **Delimiter resolution**: extension-based (`.tsv` → tab, anything else →
//!   comma) with manual override support.
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//! - **Checksums**: SHA-256 fingerprints of stored blobs.
//! - **stdin**: the `-` path convention reads upload bytes from standard input.

use std::{
    fs,
    io::{self, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use sha2::{Digest, Sha256};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(filename: &str, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(
        || match Path::new(filename).extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
            _ => DEFAULT_CSV_DELIMITER,
        },
    )
}

/// Decodes `bytes`, stripping a leading BOM. Malformed sequences are an error.
pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    if is_dash(path) {
        let mut buffer = Vec::new();
        io::stdin()
            .lock()
            .read_to_end(&mut buffer)
            .context("Reading upload from stdin")?;
        Ok(buffer)
    } else {
        fs::read(path).with_context(|| format!("Opening input file {path:?}"))
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
