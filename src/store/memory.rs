use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use uuid::Uuid;

use super::{
    BlobStore, RecordStore, StoreError, StoreResult, swap_cell, version_conflict,
};
use crate::{
    data::Value,
    model::{CellEdit, ImportRecord, Row},
    schema::ColumnDescriptor,
};

#[derive(Debug, Default)]
struct Tables {
    imports: HashMap<Uuid, ImportRecord>,
    columns: HashMap<Uuid, Vec<ColumnDescriptor>>,
    rows: HashMap<Uuid, Vec<Row>>,
    edits: Vec<CellEdit>,
}

/// Process-local record store, used by tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: Mutex<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("record store lock poisoned".to_string()))
    }
}

fn missing_import(id: Uuid) -> StoreError {
    StoreError::NotFound(format!("import {id}"))
}

fn missing_row(import_id: Uuid, row_index: usize) -> StoreError {
    StoreError::NotFound(format!("row {row_index} of import {import_id}"))
}

impl RecordStore for MemoryRecordStore {
    fn create_import(&self, record: &ImportRecord) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if tables.imports.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!(
                "import {} already exists",
                record.id
            )));
        }
        tables.imports.insert(record.id, record.clone());
        Ok(())
    }

    fn get_import(&self, id: Uuid) -> StoreResult<ImportRecord> {
        self.lock()?
            .imports
            .get(&id)
            .cloned()
            .ok_or_else(|| missing_import(id))
    }

    fn update_import(&self, record: &ImportRecord) -> StoreResult<ImportRecord> {
        let mut tables = self.lock()?;
        let stored = tables
            .imports
            .get_mut(&record.id)
            .ok_or_else(|| missing_import(record.id))?;
        if stored.version != record.version {
            return Err(version_conflict(record, stored.version));
        }
        let mut next = record.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    fn list_imports(&self, organization_id: &str) -> StoreResult<Vec<ImportRecord>> {
        let tables = self.lock()?;
        let mut records = tables
            .imports
            .values()
            .filter(|record| record.organization_id == organization_id)
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    fn delete_import(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.lock()?;
        tables.imports.remove(&id).ok_or_else(|| missing_import(id))?;
        tables.columns.remove(&id);
        tables.rows.remove(&id);
        Ok(())
    }

    fn insert_columns(&self, import_id: Uuid, columns: &[ColumnDescriptor]) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if !tables.imports.contains_key(&import_id) {
            return Err(missing_import(import_id));
        }
        tables
            .columns
            .entry(import_id)
            .or_default()
            .extend_from_slice(columns);
        Ok(())
    }

    fn list_columns(&self, import_id: Uuid) -> StoreResult<Vec<ColumnDescriptor>> {
        Ok(self
            .lock()?
            .columns
            .get(&import_id)
            .cloned()
            .unwrap_or_default())
    }

    fn insert_rows(&self, import_id: Uuid, rows: &[Row]) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if !tables.imports.contains_key(&import_id) {
            return Err(missing_import(import_id));
        }
        tables
            .rows
            .entry(import_id)
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    fn count_rows(&self, import_id: Uuid) -> StoreResult<usize> {
        Ok(self.lock()?.rows.get(&import_id).map_or(0, Vec::len))
    }

    fn fetch_rows(&self, import_id: Uuid, offset: usize, limit: usize) -> StoreResult<Vec<Row>> {
        let tables = self.lock()?;
        let Some(rows) = tables.rows.get(&import_id) else {
            return Ok(Vec::new());
        };
        Ok(rows.iter().skip(offset).take(limit).cloned().collect())
    }

    fn get_row(&self, import_id: Uuid, row_index: usize) -> StoreResult<Row> {
        self.lock()?
            .rows
            .get(&import_id)
            .and_then(|rows| rows.iter().find(|row| row.index == row_index))
            .cloned()
            .ok_or_else(|| missing_row(import_id, row_index))
    }

    fn update_cell(
        &self,
        import_id: Uuid,
        row_index: usize,
        column: usize,
        expected: Option<&Value>,
        value: Option<Value>,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let row = tables
            .rows
            .get_mut(&import_id)
            .and_then(|rows| rows.iter_mut().find(|row| row.index == row_index))
            .ok_or_else(|| missing_row(import_id, row_index))?;
        swap_cell(row, import_id, column, expected, value)
    }

    fn append_edit(&self, edit: &CellEdit) -> StoreResult<()> {
        self.lock()?.edits.push(edit.clone());
        Ok(())
    }

    fn list_edits(&self, import_id: Uuid) -> StoreResult<Vec<CellEdit>> {
        Ok(self
            .lock()?
            .edits
            .iter()
            .filter(|edit| edit.import_id == import_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.blobs
            .lock()
            .map_err(|_| StoreError::Backend("blob store lock poisoned".to_string()))
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, path: &str, bytes: &[u8]) -> StoreResult<()> {
        self.lock()?.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.lock()?
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob '{path}'")))
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        self.lock()?.remove(path);
        Ok(())
    }
}
