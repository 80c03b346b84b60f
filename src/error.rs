use std::time::Duration;

use thiserror::Error;

use crate::{model::ImportStatus, store::StoreError};

pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("File is empty: expected a header row and at least one data row")]
    EmptyFile,

    #[error("Malformed file: {0}")]
    MalformedFile(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: ImportStatus, to: ImportStatus },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Analysis exceeded its deadline of {}s", .0.as_secs())]
    Timeout(Duration),
}

impl IngestError {
    /// Maps a record-store failure, keeping lookup and version conflicts distinct.
    pub fn from_records(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => IngestError::NotFound(what),
            StoreError::Conflict(what) => IngestError::Conflict(what),
            other => IngestError::PersistenceFailure(other.to_string()),
        }
    }

    /// Maps a blob-store failure. Missing blobs are storage failures, not lookups.
    pub fn from_blobs(err: StoreError) -> Self {
        IngestError::StorageFailure(err.to_string())
    }
}
