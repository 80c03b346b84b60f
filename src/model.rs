//! Persisted entities: import records, their lifecycle, and the cell edit log.

use std::fmt;

use chrono::{DateTime, Utc};
use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    data::Value,
    error::{IngestError, IngestResult},
    parser::FileKind,
    schema::ColumnDescriptor,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Processing,
    Analyzing,
    Editing,
    Error,
    Completed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Analyzing => "analyzing",
            ImportStatus::Editing => "editing",
            ImportStatus::Error => "error",
            ImportStatus::Completed => "completed",
        }
    }

    pub fn can_transition_to(self, next: ImportStatus) -> bool {
        use ImportStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Analyzing)
                | (Analyzing, Editing)
                | (Editing, Completed)
                | (Processing | Analyzing, Error)
        )
    }

    /// No automatic transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportStatus::Editing | ImportStatus::Error | ImportStatus::Completed
        )
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller identity, passed explicitly into every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub organization_id: String,
    pub user_id: String,
}

impl RequestContext {
    pub fn new(organization_id: impl Into<String>, user_id: impl Into<String>) -> IngestResult<Self> {
        let organization_id = organization_id.into();
        let user_id = user_id.into();
        ensure_path_safe("organization id", &organization_id)?;
        ensure_path_safe("user id", &user_id)?;
        Ok(Self {
            organization_id,
            user_id,
        })
    }
}

pub(crate) fn ensure_path_safe(what: &str, value: &str) -> IngestResult<()> {
    if value.trim().is_empty() {
        return Err(IngestError::InvalidArgument(format!("{what} cannot be empty")));
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(IngestError::InvalidArgument(format!(
            "{what} '{value}' must not contain path separators"
        )));
    }
    Ok(())
}

/// Pass-through JSON the pipeline stores but never interprets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct OpaqueBlob(pub serde_json::Value);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ColumnsMetadata {
    pub columns: Vec<ColumnDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewImport {
    pub filename: String,
    pub name: Option<String>,
}

impl NewImport {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportRecord {
    pub id: Uuid,
    pub name: String,
    pub filename: String,
    pub storage_path: Option<String>,
    pub file_kind: FileKind,
    pub row_count: Option<u64>,
    pub status: ImportStatus,
    pub error_message: Option<String>,
    pub columns_metadata: Option<ColumnsMetadata>,
    pub column_analysis: Option<OpaqueBlob>,
    pub organization_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub table_name: String,
    pub data_quality: Option<OpaqueBlob>,
    pub data_validation: Option<OpaqueBlob>,
    pub checksum: Option<String>,
    pub version: u64,
}

impl ImportRecord {
    pub fn new(ctx: &RequestContext, filename: &str, name: &str, file_kind: FileKind) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            name: name.to_string(),
            filename: filename.to_string(),
            storage_path: None,
            file_kind,
            row_count: None,
            status: ImportStatus::Pending,
            error_message: None,
            columns_metadata: None,
            column_analysis: None,
            organization_id: ctx.organization_id.clone(),
            created_by: ctx.user_id.clone(),
            created_at: now,
            updated_at: now,
            table_name: derive_table_name(name, &id),
            data_quality: None,
            data_validation: None,
            checksum: None,
            version: 0,
        }
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        self.columns_metadata
            .as_ref()
            .map(|meta| meta.columns.as_slice())
            .unwrap_or_default()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns().iter().position(|c| c.name == name)
    }

    pub fn transition(&mut self, next: ImportStatus) -> IngestResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(IngestError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_processing(&mut self, storage_path: String, checksum: String) -> IngestResult<()> {
        self.transition(ImportStatus::Processing)?;
        self.storage_path = Some(storage_path);
        self.checksum = Some(checksum);
        Ok(())
    }

    pub fn mark_editing(
        &mut self,
        row_count: u64,
        columns: Vec<ColumnDescriptor>,
        analysis: OpaqueBlob,
    ) -> IngestResult<()> {
        self.transition(ImportStatus::Editing)?;
        self.row_count = Some(row_count);
        self.columns_metadata = Some(ColumnsMetadata { columns });
        self.column_analysis = Some(analysis);
        Ok(())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> IngestResult<()> {
        self.transition(ImportStatus::Error)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Checks the storage-path and error-message invariants.
    pub fn is_consistent(&self) -> bool {
        let stored = self.status != ImportStatus::Pending;
        let failed = self.status == ImportStatus::Error;
        self.storage_path.is_some() == stored && self.error_message.is_some() == failed
    }
}

fn derive_table_name(name: &str, id: &Uuid) -> String {
    let stem = name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(name)
        .to_snake_case();
    let short = id.simple().to_string();
    let short = &short[..8];
    if stem.is_empty() {
        format!("import_{short}")
    } else {
        format!("import_{stem}_{short}")
    }
}

/// A persisted data row, addressed by its 0-based position in the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    pub index: usize,
    pub cells: Vec<Option<Value>>,
}

/// One accepted cell change. Entries are appended, never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellEdit {
    pub id: Uuid,
    pub import_id: Uuid,
    pub row_index: usize,
    pub column_name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub organization_id: String,
    pub edited_by: String,
    pub edited_at: DateTime<Utc>,
}
