//! Paginated browsing and audited single-cell editing of ingested rows.
//!
//! Every edit appends its audit entry before the cell is touched. If the audit
//! write fails nothing is applied; if the cell write fails the audit entry
//! stays and the caller sees the error.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    data::Value,
    error::{IngestError, IngestResult},
    model::{CellEdit, ImportStatus, RequestContext, Row},
    pipeline::load_owned,
    store::RecordStore,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Page {
    pub import_id: Uuid,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub page_number: usize,
    pub page_size: usize,
    pub total_rows: usize,
    pub total_pages: usize,
}

impl Page {
    /// Cell lookup by row position within the page and column name.
    /// The outer `None` means the row or column does not exist.
    pub fn get(&self, position: usize, column: &str) -> Option<Option<&Value>> {
        let idx = self.columns.iter().position(|name| name == column)?;
        let row = self.rows.get(position)?;
        Some(row.cells.get(idx).and_then(Option::as_ref))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct PreviewService {
    records: Arc<dyn RecordStore>,
}

impl PreviewService {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Returns page `page_number` (1-based). Pages past the end are empty.
    pub fn get_page(
        &self,
        ctx: &RequestContext,
        import_id: Uuid,
        page_number: usize,
        page_size: usize,
    ) -> IngestResult<Page> {
        if page_number == 0 {
            return Err(IngestError::InvalidArgument(
                "page numbers start at 1".to_string(),
            ));
        }
        if page_size == 0 {
            return Err(IngestError::InvalidArgument(
                "page size must be positive".to_string(),
            ));
        }
        let record = load_owned(self.records.as_ref(), ctx, import_id)?;
        let total_rows = self
            .records
            .count_rows(import_id)
            .map_err(IngestError::from_records)?;
        let total_pages = total_rows.div_ceil(page_size);

        let rows = if page_number > total_pages {
            Vec::new()
        } else {
            let offset = (page_number - 1) * page_size;
            self.records
                .fetch_rows(import_id, offset, page_size)
                .map_err(IngestError::from_records)?
        };

        Ok(Page {
            import_id,
            columns: record.columns().iter().map(|c| c.name.clone()).collect(),
            rows,
            page_number,
            page_size,
            total_rows,
            total_pages,
        })
    }

    /// Overwrites one cell. The value is not checked against the column's
    /// inferred type.
    pub fn edit_cell(
        &self,
        ctx: &RequestContext,
        import_id: Uuid,
        row_index: usize,
        column_name: &str,
        new_value: Option<Value>,
    ) -> IngestResult<CellEdit> {
        let record = load_owned(self.records.as_ref(), ctx, import_id)?;
        if record.status != ImportStatus::Editing {
            return Err(IngestError::Conflict(format!(
                "import {import_id} is {}; cells can only be edited while editing",
                record.status
            )));
        }
        let column = record.column_position(column_name).ok_or_else(|| {
            IngestError::NotFound(format!("column '{column_name}' in import {import_id}"))
        })?;
        let row = self
            .records
            .get_row(import_id, row_index)
            .map_err(IngestError::from_records)?;
        let old_value = row.cells.get(column).cloned().flatten();

        let edit = CellEdit {
            id: Uuid::new_v4(),
            import_id,
            row_index,
            column_name: column_name.to_string(),
            old_value,
            new_value,
            organization_id: ctx.organization_id.clone(),
            edited_by: ctx.user_id.clone(),
            edited_at: Utc::now(),
        };
        self.records
            .append_edit(&edit)
            .map_err(IngestError::from_records)?;

        if let Err(err) = self.records.update_cell(
            import_id,
            row_index,
            column,
            edit.old_value.as_ref(),
            edit.new_value.clone(),
        ) {
            warn!(
                "Edit {} was audited but not applied to row {row_index} '{column_name}': {err}",
                edit.id
            );
            return Err(IngestError::from_records(err));
        }
        info!(
            "Import {import_id}: row {row_index} '{column_name}' changed by '{}'",
            ctx.user_id
        );
        Ok(edit)
    }

    /// Audit entries for an import, oldest first.
    pub fn edit_history(&self, ctx: &RequestContext, import_id: Uuid) -> IngestResult<Vec<CellEdit>> {
        load_owned(self.records.as_ref(), ctx, import_id)?;
        self.records
            .list_edits(import_id)
            .map_err(IngestError::from_records)
    }
}
