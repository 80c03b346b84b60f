#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sheet_ingest::{
    config::IngestConfig,
    data::Value,
    model::{CellEdit, ImportRecord, NewImport, RequestContext, Row},
    pipeline::Ingestor,
    preview::PreviewService,
    schema::ColumnDescriptor,
    store::{
        BlobStore, MemoryBlobStore, MemoryRecordStore, RecordStore, StoreError, StoreResult,
    },
};
use tempfile::{TempDir, tempdir};
use uuid::Uuid;

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn fixture_bytes(name: &str) -> Vec<u8> {
    std::fs::read(fixture_path(name)).expect("read fixture")
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory handed to `--store` in CLI tests.
    pub fn store_dir(&self) -> PathBuf {
        self.temp_dir.path().join("store")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::new("acme", "alice").expect("valid context")
}

pub fn other_ctx() -> RequestContext {
    RequestContext::new("globex", "bob").expect("valid context")
}

/// A CSV with a header row and `rows` data rows: id, name, email.
pub fn contacts_csv(rows: usize) -> String {
    let mut csv = String::from("id,name,email\n");
    for idx in 1..=rows {
        csv.push_str(&format!("{idx},Person {idx},person{idx}@example.com\n"));
    }
    csv
}

/// Memory-backed services sharing one record store.
pub struct Harness {
    pub records: Arc<FlakyRecords>,
    pub blobs: Arc<FlakyBlobs>,
    pub ingestor: Ingestor,
    pub preview: PreviewService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(IngestConfig::default())
    }

    pub fn with_config(config: IngestConfig) -> Self {
        let records = Arc::new(FlakyRecords::default());
        let blobs = Arc::new(FlakyBlobs::default());
        Self {
            ingestor: Ingestor::new(records.clone(), blobs.clone(), config).expect("valid config"),
            preview: PreviewService::new(records.clone()),
            records,
            blobs,
        }
    }

    /// Uploads and analyzes `contents` under `filename`, returning the
    /// record in `editing`.
    pub fn ingest(&self, filename: &str, contents: &[u8]) -> ImportRecord {
        let record = self
            .ingestor
            .upload(&ctx(), &NewImport::new(filename), contents)
            .expect("upload");
        self.ingestor.analyze(&ctx(), record.id).expect("analyze")
    }
}

/// Record store whose individual operations can be made to fail.
#[derive(Default)]
pub struct FlakyRecords {
    inner: MemoryRecordStore,
    /// Number of `insert_columns` calls that succeed before every later one fails.
    pub column_batches_before_failure: AtomicUsize,
    pub fail_column_batches: AtomicBool,
    pub fail_append_edit: AtomicBool,
    pub fail_update_cell: AtomicBool,
    column_calls: AtomicUsize,
}

impl FlakyRecords {
    pub fn fail_columns_after(&self, batches: usize) {
        self.column_batches_before_failure
            .store(batches, Ordering::SeqCst);
        self.fail_column_batches.store(true, Ordering::SeqCst);
    }

    pub fn column_calls(&self) -> usize {
        self.column_calls.load(Ordering::SeqCst)
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Backend(format!("injected {what} failure"))
}

impl RecordStore for FlakyRecords {
    fn create_import(&self, record: &ImportRecord) -> StoreResult<()> {
        self.inner.create_import(record)
    }

    fn get_import(&self, id: Uuid) -> StoreResult<ImportRecord> {
        self.inner.get_import(id)
    }

    fn update_import(&self, record: &ImportRecord) -> StoreResult<ImportRecord> {
        self.inner.update_import(record)
    }

    fn list_imports(&self, organization_id: &str) -> StoreResult<Vec<ImportRecord>> {
        self.inner.list_imports(organization_id)
    }

    fn delete_import(&self, id: Uuid) -> StoreResult<()> {
        self.inner.delete_import(id)
    }

    fn insert_columns(&self, import_id: Uuid, columns: &[ColumnDescriptor]) -> StoreResult<()> {
        let call = self.column_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_column_batches.load(Ordering::SeqCst)
            && call >= self.column_batches_before_failure.load(Ordering::SeqCst)
        {
            return Err(injected("column batch"));
        }
        self.inner.insert_columns(import_id, columns)
    }

    fn list_columns(&self, import_id: Uuid) -> StoreResult<Vec<ColumnDescriptor>> {
        self.inner.list_columns(import_id)
    }

    fn insert_rows(&self, import_id: Uuid, rows: &[Row]) -> StoreResult<()> {
        self.inner.insert_rows(import_id, rows)
    }

    fn count_rows(&self, import_id: Uuid) -> StoreResult<usize> {
        self.inner.count_rows(import_id)
    }

    fn fetch_rows(&self, import_id: Uuid, offset: usize, limit: usize) -> StoreResult<Vec<Row>> {
        self.inner.fetch_rows(import_id, offset, limit)
    }

    fn get_row(&self, import_id: Uuid, row_index: usize) -> StoreResult<Row> {
        self.inner.get_row(import_id, row_index)
    }

    fn update_cell(
        &self,
        import_id: Uuid,
        row_index: usize,
        column: usize,
        expected: Option<&Value>,
        value: Option<Value>,
    ) -> StoreResult<()> {
        if self.fail_update_cell.load(Ordering::SeqCst) {
            return Err(injected("cell write"));
        }
        self.inner
            .update_cell(import_id, row_index, column, expected, value)
    }

    fn append_edit(&self, edit: &CellEdit) -> StoreResult<()> {
        if self.fail_append_edit.load(Ordering::SeqCst) {
            return Err(injected("edit log"));
        }
        self.inner.append_edit(edit)
    }

    fn list_edits(&self, import_id: Uuid) -> StoreResult<Vec<CellEdit>> {
        self.inner.list_edits(import_id)
    }
}

/// Blob store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyBlobs {
    inner: MemoryBlobStore,
    pub fail_put: AtomicBool,
}

impl BlobStore for FlakyBlobs {
    fn put(&self, path: &str, bytes: &[u8]) -> StoreResult<()> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(injected("blob write"));
        }
        self.inner.put(path, bytes)
    }

    fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.inner.get(path)
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        self.inner.delete(path)
    }
}
