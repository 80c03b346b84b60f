//! Directory-backed stores used by the command line.
//!
//! Layout under the root directory:
//!
//! ```text
//! imports/<id>/record.json    import record
//! imports/<id>/columns.json   column descriptors, header order
//! imports/<id>/rows/count.json       number of stored rows
//! imports/<id>/rows/<segment>.json   rows with index in [segment * 500, segment * 500 + 500)
//! edits/<id>.jsonl            append-only cell edit log
//! blobs/<org>/<id>/<file>     uploaded bytes
//! ```
//!
//! Rows are addressed by their index, so reading a page or a cell loads only
//! the segments it overlaps, and inserting a batch rewrites only the segments
//! the batch lands in. Access is serialised within one process only.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, ErrorKind, Write},
    path::{Component, Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use super::{
    BlobStore, RecordStore, StoreError, StoreResult, swap_cell, version_conflict,
};
use crate::{
    data::Value,
    model::{CellEdit, ImportRecord, Row},
    schema::ColumnDescriptor,
};

const RECORD_FILE: &str = "record.json";
const COLUMNS_FILE: &str = "columns.json";
const ROWS_DIR: &str = "rows";
const ROW_COUNT_FILE: &str = "count.json";
/// Rows per segment file.
pub(crate) const SEGMENT_ROWS: usize = 500;

#[derive(Debug)]
pub struct FsRecordStore {
    root: PathBuf,
    guard: Mutex<()>,
}

impl FsRecordStore {
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("imports"))?;
        fs::create_dir_all(root.join("edits"))?;
        Ok(Self {
            root,
            guard: Mutex::new(()),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.guard
            .lock()
            .map_err(|_| StoreError::Backend("record store lock poisoned".to_string()))
    }

    fn import_dir(&self, id: Uuid) -> PathBuf {
        self.root.join("imports").join(id.to_string())
    }

    fn edits_path(&self, id: Uuid) -> PathBuf {
        self.root.join("edits").join(format!("{id}.jsonl"))
    }

    fn load_record(&self, id: Uuid) -> StoreResult<ImportRecord> {
        read_json(&self.import_dir(id).join(RECORD_FILE))?
            .ok_or_else(|| StoreError::NotFound(format!("import {id}")))
    }

    fn ensure_import(&self, id: Uuid) -> StoreResult<()> {
        if self.import_dir(id).join(RECORD_FILE).is_file() {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("import {id}")))
        }
    }

    fn rows_dir(&self, id: Uuid) -> PathBuf {
        self.import_dir(id).join(ROWS_DIR)
    }

    fn segment_path(&self, id: Uuid, segment: usize) -> PathBuf {
        self.rows_dir(id).join(format!("{segment}.json"))
    }

    fn load_segment(&self, id: Uuid, segment: usize) -> StoreResult<Vec<Row>> {
        Ok(read_json(&self.segment_path(id, segment))?.unwrap_or_default())
    }

    fn load_row_count(&self, id: Uuid) -> StoreResult<usize> {
        Ok(read_json(&self.rows_dir(id).join(ROW_COUNT_FILE))?.unwrap_or_default())
    }
}

impl RecordStore for FsRecordStore {
    fn create_import(&self, record: &ImportRecord) -> StoreResult<()> {
        let _guard = self.lock()?;
        let dir = self.import_dir(record.id);
        if dir.join(RECORD_FILE).exists() {
            return Err(StoreError::Conflict(format!(
                "import {} already exists",
                record.id
            )));
        }
        fs::create_dir_all(&dir)?;
        write_json(&dir.join(RECORD_FILE), record)
    }

    fn get_import(&self, id: Uuid) -> StoreResult<ImportRecord> {
        let _guard = self.lock()?;
        self.load_record(id)
    }

    fn update_import(&self, record: &ImportRecord) -> StoreResult<ImportRecord> {
        let _guard = self.lock()?;
        let stored = self.load_record(record.id)?;
        if stored.version != record.version {
            return Err(version_conflict(record, stored.version));
        }
        let mut next = record.clone();
        next.version += 1;
        write_json(&self.import_dir(record.id).join(RECORD_FILE), &next)?;
        Ok(next)
    }

    fn list_imports(&self, organization_id: &str) -> StoreResult<Vec<ImportRecord>> {
        let _guard = self.lock()?;
        let mut records = Vec::new();
        for entry in fs::read_dir(self.root.join("imports"))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path().join(RECORD_FILE);
            if let Some(record) = read_json::<ImportRecord>(&path)?
                && record.organization_id == organization_id
            {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    fn delete_import(&self, id: Uuid) -> StoreResult<()> {
        let _guard = self.lock()?;
        self.ensure_import(id)?;
        fs::remove_dir_all(self.import_dir(id))?;
        Ok(())
    }

    fn insert_columns(&self, import_id: Uuid, columns: &[ColumnDescriptor]) -> StoreResult<()> {
        let _guard = self.lock()?;
        self.ensure_import(import_id)?;
        let path = self.import_dir(import_id).join(COLUMNS_FILE);
        let mut existing: Vec<ColumnDescriptor> = read_json(&path)?.unwrap_or_default();
        existing.extend_from_slice(columns);
        write_json(&path, &existing)
    }

    fn list_columns(&self, import_id: Uuid) -> StoreResult<Vec<ColumnDescriptor>> {
        let _guard = self.lock()?;
        Ok(read_json(&self.import_dir(import_id).join(COLUMNS_FILE))?.unwrap_or_default())
    }

    fn insert_rows(&self, import_id: Uuid, rows: &[Row]) -> StoreResult<()> {
        let _guard = self.lock()?;
        self.ensure_import(import_id)?;
        fs::create_dir_all(self.rows_dir(import_id))?;
        let mut by_segment: BTreeMap<usize, Vec<&Row>> = BTreeMap::new();
        for row in rows {
            by_segment
                .entry(row.index / SEGMENT_ROWS)
                .or_default()
                .push(row);
        }
        for (segment, incoming) in by_segment {
            let mut stored = self.load_segment(import_id, segment)?;
            stored.extend(incoming.into_iter().cloned());
            write_json(&self.segment_path(import_id, segment), &stored)?;
        }
        let count = self.load_row_count(import_id)? + rows.len();
        write_json(&self.rows_dir(import_id).join(ROW_COUNT_FILE), &count)
    }

    fn count_rows(&self, import_id: Uuid) -> StoreResult<usize> {
        let _guard = self.lock()?;
        self.load_row_count(import_id)
    }

    fn fetch_rows(&self, import_id: Uuid, offset: usize, limit: usize) -> StoreResult<Vec<Row>> {
        let _guard = self.lock()?;
        let end = offset.saturating_add(limit).min(self.load_row_count(import_id)?);
        if offset >= end {
            return Ok(Vec::new());
        }
        let mut rows = Vec::with_capacity(end - offset);
        for segment in offset / SEGMENT_ROWS..=(end - 1) / SEGMENT_ROWS {
            rows.extend(
                self.load_segment(import_id, segment)?
                    .into_iter()
                    .filter(|row| (offset..end).contains(&row.index)),
            );
        }
        rows.sort_by_key(|row| row.index);
        Ok(rows)
    }

    fn get_row(&self, import_id: Uuid, row_index: usize) -> StoreResult<Row> {
        let _guard = self.lock()?;
        self.load_segment(import_id, row_index / SEGMENT_ROWS)?
            .into_iter()
            .find(|row| row.index == row_index)
            .ok_or_else(|| StoreError::NotFound(format!("row {row_index} of import {import_id}")))
    }

    fn update_cell(
        &self,
        import_id: Uuid,
        row_index: usize,
        column: usize,
        expected: Option<&Value>,
        value: Option<Value>,
    ) -> StoreResult<()> {
        let _guard = self.lock()?;
        let segment = row_index / SEGMENT_ROWS;
        let mut rows = self.load_segment(import_id, segment)?;
        let row = rows
            .iter_mut()
            .find(|row| row.index == row_index)
            .ok_or_else(|| StoreError::NotFound(format!("row {row_index} of import {import_id}")))?;
        swap_cell(row, import_id, column, expected, value)?;
        write_json(&self.segment_path(import_id, segment), &rows)
    }

    fn append_edit(&self, edit: &CellEdit) -> StoreResult<()> {
        let _guard = self.lock()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.edits_path(edit.import_id))?;
        let mut line = serde_json::to_vec(edit)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    fn list_edits(&self, import_id: Uuid) -> StoreResult<Vec<CellEdit>> {
        let _guard = self.lock()?;
        let file = match File::open(self.edits_path(import_id)) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut edits = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            edits.push(serde_json::from_str(&line)?);
        }
        Ok(edits)
    }
}

#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into().join("blobs");
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !safe || path.is_empty() {
            return Err(StoreError::Backend(format!(
                "blob path '{path}' must be relative and free of '..'"
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, path: &str, bytes: &[u8]) -> StoreResult<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, bytes)?;
        Ok(())
    }

    fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        let target = self.resolve(path)?;
        fs::read(&target).map_err(|err| match err.kind() {
            ErrorKind::NotFound => StoreError::NotFound(format!("blob '{path}'")),
            _ => StoreError::Io(err),
        })
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    match File::open(path) {
        Ok(file) => Ok(Some(serde_json::from_reader(BufReader::new(file))?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Writes through a sibling temp file so readers never observe a torn file.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
