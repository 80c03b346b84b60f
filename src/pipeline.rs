//! Upload and analysis of import records.
//!
//! Lifecycle: `pending → processing → analyzing → editing`, with
//! `processing | analyzing → error` on failure. Uploading is a two-phase,
//! non-atomic write: the record is created first, the bytes are stored second.
//! A failed second phase leaves the record in `pending` without a storage path.
//!
//! Analysis claims the record with a versioned `processing → analyzing`
//! write, so two concurrent runs cannot both proceed. Once claimed, every exit
//! path ends in `editing` or `error`. Column descriptors and rows are written in
//! fixed-size batches, in header order, and are not rolled back on failure.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use itertools::Itertools;
use log::{debug, error, info, warn};
use serde_json::json;
use uuid::Uuid;

use crate::{
    config::IngestConfig,
    data::Value,
    error::{IngestError, IngestResult},
    io_utils,
    model::{
        ImportRecord, ImportStatus, NewImport, OpaqueBlob, RequestContext, Row, ensure_path_safe,
    },
    parser::{self, FileKind},
    schema::{self, ColumnDescriptor},
    store::{BlobStore, RecordStore},
};

pub struct Ingestor {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    config: IngestConfig,
    analyze_timeout: Option<Duration>,
}

struct Analysis {
    row_count: u64,
    columns: Vec<ColumnDescriptor>,
    summary: OpaqueBlob,
}

struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    fn start(budget: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    fn check(&self) -> IngestResult<()> {
        match self.budget {
            Some(budget) if self.started.elapsed() >= budget => Err(IngestError::Timeout(budget)),
            _ => Ok(()),
        }
    }
}

/// Loads an import, hiding records that belong to another organization.
pub(crate) fn load_owned(
    records: &dyn RecordStore,
    ctx: &RequestContext,
    import_id: Uuid,
) -> IngestResult<ImportRecord> {
    let record = records
        .get_import(import_id)
        .map_err(IngestError::from_records)?;
    if record.organization_id != ctx.organization_id {
        return Err(IngestError::NotFound(format!("import {import_id}")));
    }
    Ok(record)
}

impl Ingestor {
    /// Fails with `InvalidArgument` when `config` does not validate, so batch
    /// sizes are known to be positive before any import is claimed.
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        config: IngestConfig,
    ) -> IngestResult<Self> {
        config
            .validate()
            .map_err(|err| IngestError::InvalidArgument(format!("{err:#}")))?;
        let analyze_timeout = config.analyze_timeout();
        Ok(Self {
            records,
            blobs,
            config,
            analyze_timeout,
        })
    }

    /// Overrides the configured analysis deadline.
    pub fn with_analyze_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.analyze_timeout = timeout;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Creates the import record in `pending`. Unknown file kinds are rejected
    /// before anything is written.
    pub fn begin_upload(
        &self,
        ctx: &RequestContext,
        request: &NewImport,
    ) -> IngestResult<ImportRecord> {
        let filename = Path::new(&request.filename)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!(
                    "'{}' is not a valid file name",
                    request.filename
                ))
            })?;
        ensure_path_safe("file name", filename)?;
        let kind = FileKind::from_filename(filename)?;
        let name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(filename);

        let record = ImportRecord::new(ctx, filename, name, kind);
        self.records
            .create_import(&record)
            .map_err(IngestError::from_records)?;
        info!(
            "Created import {} for '{}' ({kind}) in organization '{}'",
            record.id, record.filename, record.organization_id
        );
        Ok(record)
    }

    /// Stores the raw bytes and moves the record to `processing`.
    pub fn store_bytes(
        &self,
        ctx: &RequestContext,
        import_id: Uuid,
        bytes: &[u8],
    ) -> IngestResult<ImportRecord> {
        let mut record = load_owned(self.records.as_ref(), ctx, import_id)?;
        if record.status != ImportStatus::Pending {
            return Err(IngestError::InvalidTransition {
                from: record.status,
                to: ImportStatus::Processing,
            });
        }

        let path = format!(
            "{}/{}/{}",
            record.organization_id, record.id, record.filename
        );
        if let Err(err) = self.blobs.put(&path, bytes) {
            warn!(
                "Storing bytes for import {} failed; record left pending: {err}",
                record.id
            );
            return Err(IngestError::from_blobs(err));
        }

        record.mark_processing(path, io_utils::sha256_hex(bytes))?;
        let record = self
            .records
            .update_import(&record)
            .map_err(IngestError::from_records)?;
        info!(
            "Stored {} byte(s) for import {} at '{}'",
            bytes.len(),
            record.id,
            record.storage_path.as_deref().unwrap_or_default()
        );
        Ok(record)
    }

    pub fn upload(
        &self,
        ctx: &RequestContext,
        request: &NewImport,
        bytes: &[u8],
    ) -> IngestResult<ImportRecord> {
        let record = self.begin_upload(ctx, request)?;
        self.store_bytes(ctx, record.id, bytes)
    }

    /// Parses the stored file, persists its columns and rows, and moves the
    /// record to `editing`. Failures after the claim are written back as
    /// `error` before being returned.
    pub fn analyze(&self, ctx: &RequestContext, import_id: Uuid) -> IngestResult<ImportRecord> {
        let record = load_owned(self.records.as_ref(), ctx, import_id)?;
        let claimed = self.claim_for_analysis(record)?;
        let deadline = Deadline::start(self.analyze_timeout);
        info!("Analyzing import {} ('{}')", claimed.id, claimed.filename);

        let result = self.run_analysis(&claimed, &deadline).and_then(|analysis| {
            let mut finished = claimed.clone();
            finished.mark_editing(analysis.row_count, analysis.columns, analysis.summary)?;
            self.records
                .update_import(&finished)
                .map_err(IngestError::from_records)
        });

        match result {
            Ok(record) => {
                info!(
                    "Import {} ready for editing: {} row(s), {} column(s)",
                    record.id,
                    record.row_count.unwrap_or_default(),
                    record.columns().len()
                );
                Ok(record)
            }
            Err(err) => {
                self.record_failure(claimed, &err);
                Err(err)
            }
        }
    }

    /// Moves an import out of `editing` once the user is done with it.
    pub fn complete(&self, ctx: &RequestContext, import_id: Uuid) -> IngestResult<ImportRecord> {
        let mut record = load_owned(self.records.as_ref(), ctx, import_id)?;
        record.transition(ImportStatus::Completed)?;
        let record = self
            .records
            .update_import(&record)
            .map_err(IngestError::from_records)?;
        info!("Import {} completed", record.id);
        Ok(record)
    }

    pub fn get_import(&self, ctx: &RequestContext, import_id: Uuid) -> IngestResult<ImportRecord> {
        load_owned(self.records.as_ref(), ctx, import_id)
    }

    pub fn list_imports(&self, ctx: &RequestContext) -> IngestResult<Vec<ImportRecord>> {
        self.records
            .list_imports(&ctx.organization_id)
            .map_err(IngestError::from_records)
    }

    /// Removes the record, its columns and rows, then the stored bytes.
    /// The cell edit log is kept.
    pub fn delete_import(&self, ctx: &RequestContext, import_id: Uuid) -> IngestResult<()> {
        let record = load_owned(self.records.as_ref(), ctx, import_id)?;
        if record.status == ImportStatus::Analyzing {
            return Err(IngestError::Conflict(format!(
                "import {import_id} is being analyzed"
            )));
        }
        self.records
            .delete_import(import_id)
            .map_err(IngestError::from_records)?;
        if let Some(path) = &record.storage_path
            && let Err(err) = self.blobs.delete(path)
        {
            warn!("Import {import_id} deleted but its file '{path}' remains: {err}");
        }
        info!("Deleted import {import_id}");
        Ok(())
    }

    fn claim_for_analysis(&self, mut record: ImportRecord) -> IngestResult<ImportRecord> {
        if record.status == ImportStatus::Analyzing {
            return Err(IngestError::Conflict(format!(
                "import {} is already being analyzed",
                record.id
            )));
        }
        record.transition(ImportStatus::Analyzing)?;
        self.records
            .update_import(&record)
            .map_err(IngestError::from_records)
    }

    fn run_analysis(&self, record: &ImportRecord, deadline: &Deadline) -> IngestResult<Analysis> {
        deadline.check()?;
        let path = record.storage_path.as_deref().ok_or_else(|| {
            IngestError::StorageFailure(format!("import {} has no stored file", record.id))
        })?;
        let bytes = self.blobs.get(path).map_err(IngestError::from_blobs)?;
        if let Some(expected) = &record.checksum
            && io_utils::sha256_hex(&bytes) != *expected
        {
            return Err(IngestError::StorageFailure(format!(
                "stored file '{path}' does not match its upload checksum"
            )));
        }

        deadline.check()?;
        let options = self
            .config
            .parse_options(&record.filename)
            .map_err(|err| IngestError::InvalidArgument(format!("{err:#}")))?;
        let table = parser::parse(&bytes, record.file_kind, &options)?;
        let sample = table.sample(self.config.sample_rows);
        let columns = schema::extract(&table.header, sample, self.config.header_policy)?;
        let summary = summarize(&columns, sample.len());
        let row_count = table.row_count() as u64;

        self.persist_columns(record.id, &columns, deadline)?;
        self.persist_rows(record.id, table.rows, deadline)?;

        Ok(Analysis {
            row_count,
            columns,
            summary,
        })
    }

    fn persist_columns(
        &self,
        import_id: Uuid,
        columns: &[ColumnDescriptor],
        deadline: &Deadline,
    ) -> IngestResult<()> {
        for (batch, chunk) in columns.chunks(self.config.column_batch_size).enumerate() {
            deadline.check()?;
            self.records
                .insert_columns(import_id, chunk)
                .map_err(IngestError::from_records)?;
            debug!(
                "Import {import_id}: stored column batch {} ({} descriptor(s))",
                batch + 1,
                chunk.len()
            );
        }
        Ok(())
    }

    fn persist_rows(
        &self,
        import_id: Uuid,
        rows: Vec<Vec<Option<Value>>>,
        deadline: &Deadline,
    ) -> IngestResult<()> {
        let batches = rows
            .into_iter()
            .enumerate()
            .map(|(index, cells)| Row { index, cells })
            .chunks(self.config.row_batch_size);
        for (batch, chunk) in (&batches).into_iter().enumerate() {
            deadline.check()?;
            let chunk = chunk.collect::<Vec<_>>();
            self.records
                .insert_rows(import_id, &chunk)
                .map_err(IngestError::from_records)?;
            debug!(
                "Import {import_id}: stored row batch {} ({} row(s))",
                batch + 1,
                chunk.len()
            );
        }
        Ok(())
    }

    fn record_failure(&self, mut record: ImportRecord, err: &IngestError) {
        let message = err.to_string();
        warn!("Analysis of import {} failed: {message}", record.id);
        if let Err(transition_err) = record.mark_failed(message) {
            error!(
                "Import {} could not be marked as failed: {transition_err}",
                record.id
            );
            return;
        }
        if let Err(write_err) = self.records.update_import(&record) {
            error!(
                "Import {} failed but its error status could not be saved: {write_err}",
                record.id
            );
        }
    }
}

fn summarize(columns: &[ColumnDescriptor], sampled_rows: usize) -> OpaqueBlob {
    let type_counts: BTreeMap<&str, usize> = columns
        .iter()
        .map(|column| column.column_type.as_str())
        .counts()
        .into_iter()
        .collect();
    let flagged = |pick: fn(&ColumnDescriptor) -> bool| {
        columns
            .iter()
            .filter(|column| pick(column))
            .map(|column| column.name.as_str())
            .collect::<Vec<_>>()
    };
    OpaqueBlob(json!({
        "sampled_rows": sampled_rows,
        "column_count": columns.len(),
        "flagged_column_count": columns.iter().filter(|c| c.patterns.any()).count(),
        "type_counts": type_counts,
        "pattern_columns": {
            "email": flagged(|c| c.patterns.email),
            "url": flagged(|c| c.patterns.url),
            "phone": flagged(|c| c.patterns.phone),
        },
    }))
}
