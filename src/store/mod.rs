//! Storage collaborators consumed by the pipeline and the preview service.
//!
//! [`RecordStore`] holds typed records (imports, column descriptors, rows, cell
//! edits); [`BlobStore`] holds raw uploaded bytes. Both are synchronous and
//! shared behind `Arc<dyn ..>`, so implementations serialise access
//! internally.

mod fs;
mod memory;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    data::Value,
    model::{CellEdit, ImportRecord, Row},
    schema::ColumnDescriptor,
};

pub use fs::{FsBlobStore, FsRecordStore};
pub use memory::{MemoryBlobStore, MemoryRecordStore};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

pub trait RecordStore: Send + Sync {
    fn create_import(&self, record: &ImportRecord) -> StoreResult<()>;

    fn get_import(&self, id: Uuid) -> StoreResult<ImportRecord>;

    /// Replaces the stored record when its version still equals
    /// `record.version`, returning the stored copy with the version bumped.
    /// A stale version fails with [`StoreError::Conflict`].
    fn update_import(&self, record: &ImportRecord) -> StoreResult<ImportRecord>;

    /// Imports owned by `organization_id`, newest first.
    fn list_imports(&self, organization_id: &str) -> StoreResult<Vec<ImportRecord>>;

    /// Removes the record with its column descriptors and rows. Cell edits stay.
    fn delete_import(&self, id: Uuid) -> StoreResult<()>;

    fn insert_columns(&self, import_id: Uuid, columns: &[ColumnDescriptor]) -> StoreResult<()>;

    fn list_columns(&self, import_id: Uuid) -> StoreResult<Vec<ColumnDescriptor>>;

    fn insert_rows(&self, import_id: Uuid, rows: &[Row]) -> StoreResult<()>;

    fn count_rows(&self, import_id: Uuid) -> StoreResult<usize>;

    /// Rows ordered by index, skipping `offset` and returning at most `limit`.
    fn fetch_rows(&self, import_id: Uuid, offset: usize, limit: usize) -> StoreResult<Vec<Row>>;

    fn get_row(&self, import_id: Uuid, row_index: usize) -> StoreResult<Row>;

    /// Sets one cell, provided its current value still equals `expected`.
    fn update_cell(
        &self,
        import_id: Uuid,
        row_index: usize,
        column: usize,
        expected: Option<&Value>,
        value: Option<Value>,
    ) -> StoreResult<()>;

    fn append_edit(&self, edit: &CellEdit) -> StoreResult<()>;

    /// Edits for `import_id` in the order they were appended.
    fn list_edits(&self, import_id: Uuid) -> StoreResult<Vec<CellEdit>>;
}

pub trait BlobStore: Send + Sync {
    fn put(&self, path: &str, bytes: &[u8]) -> StoreResult<()>;

    fn get(&self, path: &str) -> StoreResult<Vec<u8>>;

    fn delete(&self, path: &str) -> StoreResult<()>;
}

pub(crate) fn version_conflict(record: &ImportRecord, stored: u64) -> StoreError {
    StoreError::Conflict(format!(
        "import {} was modified concurrently (expected version {}, found {stored})",
        record.id, record.version
    ))
}

pub(crate) fn cell_conflict(import_id: Uuid, row_index: usize, column: usize) -> StoreError {
    StoreError::Conflict(format!(
        "cell ({row_index}, {column}) of import {import_id} changed since it was read"
    ))
}

/// Applies a compare-and-swap cell write to an in-memory row.
pub(crate) fn swap_cell(
    row: &mut Row,
    import_id: Uuid,
    column: usize,
    expected: Option<&Value>,
    value: Option<Value>,
) -> StoreResult<()> {
    let index = row.index;
    let cell = row
        .cells
        .get_mut(column)
        .ok_or_else(|| StoreError::NotFound(format!("column {column} of row {index}")))?;
    if cell.as_ref() != expected {
        return Err(cell_conflict(import_id, index, column));
    }
    *cell = value;
    Ok(())
}
