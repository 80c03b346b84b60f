mod common;

use std::{sync::atomic::Ordering, thread, time::Duration};

use chrono::NaiveDate;
use common::{Harness, contacts_csv, ctx, fixture_bytes, other_ctx};
use sheet_ingest::{
    config::IngestConfig,
    data::Value,
    error::IngestError,
    infer::ColumnType,
    model::{ImportStatus, NewImport},
    parser::FileKind,
    pipeline::Ingestor,
    store::{BlobStore, RecordStore},
};

#[test]
fn csv_upload_walks_pending_processing_editing() {
    let harness = Harness::new();
    let ctx = ctx();

    let pending = harness
        .ingestor
        .begin_upload(&ctx, &NewImport::new("contacts.csv"))
        .expect("begin upload");
    assert_eq!(pending.status, ImportStatus::Pending);
    assert!(pending.storage_path.is_none());
    assert!(pending.is_consistent());

    let processing = harness
        .ingestor
        .store_bytes(&ctx, pending.id, &fixture_bytes("contacts.csv"))
        .expect("store bytes");
    assert_eq!(processing.status, ImportStatus::Processing);
    assert_eq!(
        processing.storage_path.as_deref(),
        Some(format!("acme/{}/contacts.csv", pending.id).as_str())
    );
    assert!(processing.checksum.is_some());

    let editing = harness
        .ingestor
        .analyze(&ctx, pending.id)
        .expect("analyze");
    assert_eq!(editing.status, ImportStatus::Editing);
    assert_eq!(editing.row_count, Some(10));
    let names = editing
        .columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, ["id", "name", "email"]);
    assert_eq!(editing.columns()[0].column_type, ColumnType::Integer);
    assert!(editing.columns()[2].patterns.email);
    assert!(editing.column_analysis.is_some());
    assert!(editing.is_consistent());

    let stored_columns = harness.records.list_columns(pending.id).expect("columns");
    assert_eq!(stored_columns, editing.columns());
    assert_eq!(harness.records.count_rows(pending.id).expect("count"), 10);
}

#[test]
fn access_upload_ends_in_error_with_parser_message() {
    let harness = Harness::new();
    let ctx = ctx();
    let record = harness
        .ingestor
        .upload(&ctx, &NewImport::new("legacy.accdb"), b"\x00\x01\x00\x00")
        .expect("upload");
    assert_eq!(record.status, ImportStatus::Processing);

    let err = harness.ingestor.analyze(&ctx, record.id).unwrap_err();
    assert!(matches!(err, IngestError::UnsupportedFormat(_)));

    let stored = harness.ingestor.get_import(&ctx, record.id).expect("get");
    assert_eq!(stored.status, ImportStatus::Error);
    assert_eq!(stored.error_message.as_deref(), Some(err.to_string().as_str()));
    assert!(stored.is_consistent());
}

#[test]
fn unknown_extension_is_rejected_before_anything_is_stored() {
    let harness = Harness::new();
    let err = harness
        .ingestor
        .upload(&ctx(), &NewImport::new("notes.docx"), b"whatever")
        .unwrap_err();
    assert!(matches!(err, IngestError::UnsupportedFormat(_)));
    assert!(harness.ingestor.list_imports(&ctx()).unwrap().is_empty());
}

#[test]
fn failed_blob_write_leaves_record_pending() {
    let harness = Harness::new();
    harness.blobs.fail_put.store(true, Ordering::SeqCst);

    let pending = harness
        .ingestor
        .begin_upload(&ctx(), &NewImport::new("contacts.csv"))
        .expect("begin upload");
    let err = harness
        .ingestor
        .store_bytes(&ctx(), pending.id, b"id\n1\n")
        .unwrap_err();
    assert!(matches!(err, IngestError::StorageFailure(_)));

    let stored = harness.ingestor.get_import(&ctx(), pending.id).unwrap();
    assert_eq!(stored.status, ImportStatus::Pending);
    assert!(stored.storage_path.is_none());
    assert!(stored.is_consistent());
}

#[test]
fn analyze_requires_stored_bytes() {
    let harness = Harness::new();
    let pending = harness
        .ingestor
        .begin_upload(&ctx(), &NewImport::new("contacts.csv"))
        .unwrap();
    let err = harness.ingestor.analyze(&ctx(), pending.id).unwrap_err();
    assert!(matches!(
        err,
        IngestError::InvalidTransition {
            from: ImportStatus::Pending,
            to: ImportStatus::Analyzing
        }
    ));
}

#[test]
fn analyze_of_claimed_import_conflicts() {
    let harness = Harness::new();
    let record = harness
        .ingestor
        .upload(&ctx(), &NewImport::new("contacts.csv"), contacts_csv(3).as_bytes())
        .unwrap();

    let mut claimed = record.clone();
    claimed.transition(ImportStatus::Analyzing).unwrap();
    harness.records.update_import(&claimed).unwrap();

    let err = harness.ingestor.analyze(&ctx(), record.id).unwrap_err();
    assert!(matches!(err, IngestError::Conflict(_)));
    let stored = harness.ingestor.get_import(&ctx(), record.id).unwrap();
    assert_eq!(stored.status, ImportStatus::Analyzing);
}

#[test]
fn concurrent_analyze_has_exactly_one_winner() {
    let harness = Harness::new();
    let record = harness
        .ingestor
        .upload(&ctx(), &NewImport::new("contacts.csv"), contacts_csv(200).as_bytes())
        .unwrap();

    let results = thread::scope(|scope| {
        let handles = (0..2)
            .map(|_| scope.spawn(|| harness.ingestor.analyze(&ctx(), record.id)))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect::<Vec<_>>()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(Result::err).expect("one loser");
    assert!(matches!(
        loser,
        IngestError::Conflict(_) | IngestError::InvalidTransition { .. }
    ));
    let stored = harness.ingestor.get_import(&ctx(), record.id).unwrap();
    assert_eq!(stored.status, ImportStatus::Editing);
    assert_eq!(harness.records.count_rows(record.id).unwrap(), 200);
}

#[test]
fn expired_deadline_marks_import_failed() {
    let harness = Harness::new();
    let ingestor = Ingestor::new(
        harness.records.clone(),
        harness.blobs.clone(),
        IngestConfig::default(),
    )
    .expect("valid config")
    .with_analyze_timeout(Some(Duration::ZERO));
    let record = ingestor
        .upload(&ctx(), &NewImport::new("contacts.csv"), contacts_csv(5).as_bytes())
        .unwrap();

    let err = ingestor.analyze(&ctx(), record.id).unwrap_err();
    assert!(matches!(err, IngestError::Timeout(_)));
    let stored = ingestor.get_import(&ctx(), record.id).unwrap();
    assert_eq!(stored.status, ImportStatus::Error);
    assert!(stored.error_message.unwrap().contains("deadline"));
}

#[test]
fn failed_column_batch_marks_import_failed_and_keeps_earlier_batches() {
    let harness = Harness::with_config(IngestConfig {
        column_batch_size: 1,
        ..IngestConfig::default()
    });
    harness.records.fail_columns_after(1);
    let record = harness
        .ingestor
        .upload(&ctx(), &NewImport::new("contacts.csv"), contacts_csv(4).as_bytes())
        .unwrap();

    let err = harness.ingestor.analyze(&ctx(), record.id).unwrap_err();
    assert!(matches!(err, IngestError::PersistenceFailure(_)));
    assert_eq!(harness.records.column_calls(), 2);
    assert_eq!(harness.records.list_columns(record.id).unwrap().len(), 1);

    let stored = harness.ingestor.get_import(&ctx(), record.id).unwrap();
    assert_eq!(stored.status, ImportStatus::Error);
    assert!(stored.row_count.is_none());
}

#[test]
fn rows_are_persisted_in_batches_with_contiguous_indexes() {
    let harness = Harness::with_config(IngestConfig {
        row_batch_size: 7,
        ..IngestConfig::default()
    });
    let record = harness.ingest("contacts.csv", contacts_csv(30).as_bytes());
    assert_eq!(record.row_count, Some(30));

    let rows = harness.records.fetch_rows(record.id, 0, 100).unwrap();
    let indexes = rows.iter().map(|row| row.index).collect::<Vec<_>>();
    assert_eq!(indexes, (0..30).collect::<Vec<_>>());
}

#[test]
fn empty_file_fails_analysis() {
    let harness = Harness::new();
    let record = harness
        .ingestor
        .upload(&ctx(), &NewImport::new("empty.csv"), b"id,name\n")
        .unwrap();
    let err = harness.ingestor.analyze(&ctx(), record.id).unwrap_err();
    assert!(matches!(err, IngestError::EmptyFile));
    let stored = harness.ingestor.get_import(&ctx(), record.id).unwrap();
    assert_eq!(stored.status, ImportStatus::Error);
}

#[test]
fn json_upload_infers_types_from_first_values() {
    let harness = Harness::new();
    let record = harness.ingest("orders.json", &fixture_bytes("orders.json"));
    assert_eq!(record.row_count, Some(3));
    let types = record
        .columns()
        .iter()
        .map(|c| (c.name.as_str(), c.column_type))
        .collect::<Vec<_>>();
    assert_eq!(
        types,
        [
            ("order_id", ColumnType::Integer),
            ("customer", ColumnType::Text),
            ("total", ColumnType::Numeric),
            ("paid", ColumnType::Boolean),
            ("ordered_at", ColumnType::Timestamp),
            ("site", ColumnType::Text),
        ]
    );
    let site = &record.columns()[5];
    assert!(site.patterns.url);
    assert_eq!(site.null_count, 1);
}

#[test]
fn xlsx_upload_reads_typed_cells_from_first_sheet() {
    let harness = Harness::new();
    let record = harness.ingest("orders.xlsx", &fixture_bytes("orders.xlsx"));
    assert_eq!(record.file_kind, FileKind::Excel);
    assert_eq!(record.row_count, Some(3));
    let types = record
        .columns()
        .iter()
        .map(|c| (c.name.as_str(), c.column_type))
        .collect::<Vec<_>>();
    assert_eq!(
        types,
        [
            ("order_id", ColumnType::Integer),
            ("customer", ColumnType::Text),
            ("total", ColumnType::Numeric),
            ("paid", ColumnType::Boolean),
            ("ordered_at", ColumnType::Timestamp),
            ("note", ColumnType::Text),
        ]
    );
    assert_eq!(record.columns()[5].null_count, 1);

    let rows = harness.records.fetch_rows(record.id, 0, 10).unwrap();
    assert_eq!(rows.len(), 3);
    let ordered_at = NaiveDate::from_ymd_opt(2024, 1, 15)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap();
    assert_eq!(rows[0].cells[4], Some(Value::Timestamp(ordered_at)));
    assert_eq!(rows[0].cells[3], Some(Value::Boolean(true)));
    assert_eq!(rows[1].cells[1], Some(Value::Text("Grace".into())));
    assert_eq!(rows[1].cells[5], None);
}

#[test]
fn tsv_upload_uses_tab_delimiter() {
    let harness = Harness::new();
    let record = harness.ingest("stock.tsv", &fixture_bytes("stock.tsv"));
    let names = record
        .columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, ["sku", "qty", "note"]);
    assert_eq!(record.columns()[0].unique_count, 2);
    assert_eq!(record.columns()[1].null_count, 1);
}

#[test]
fn duplicate_headers_are_renamed() {
    let harness = Harness::new();
    let record = harness.ingest("dupes.csv", b"name,name,,x\na,b,c,d\n");
    let names = record
        .columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, ["name", "name_2", "column_3", "x"]);
}

#[test]
fn imports_are_scoped_to_their_organization() {
    let harness = Harness::new();
    let record = harness.ingest("contacts.csv", contacts_csv(2).as_bytes());

    let err = harness
        .ingestor
        .get_import(&other_ctx(), record.id)
        .unwrap_err();
    assert!(matches!(err, IngestError::NotFound(_)));
    assert!(harness.ingestor.list_imports(&other_ctx()).unwrap().is_empty());
    assert!(matches!(
        harness.ingestor.delete_import(&other_ctx(), record.id),
        Err(IngestError::NotFound(_))
    ));
    assert_eq!(harness.ingestor.list_imports(&ctx()).unwrap().len(), 1);
}

#[test]
fn complete_only_follows_editing() {
    let harness = Harness::new();
    let record = harness
        .ingestor
        .upload(&ctx(), &NewImport::new("contacts.csv"), contacts_csv(2).as_bytes())
        .unwrap();
    assert!(matches!(
        harness.ingestor.complete(&ctx(), record.id),
        Err(IngestError::InvalidTransition { .. })
    ));

    harness.ingestor.analyze(&ctx(), record.id).unwrap();
    let completed = harness.ingestor.complete(&ctx(), record.id).unwrap();
    assert_eq!(completed.status, ImportStatus::Completed);
    assert!(completed.is_consistent());
}

#[test]
fn delete_removes_record_rows_and_blob() {
    let harness = Harness::new();
    let record = harness.ingest("contacts.csv", contacts_csv(3).as_bytes());
    let path = record.storage_path.clone().unwrap();

    harness.ingestor.delete_import(&ctx(), record.id).unwrap();
    assert!(matches!(
        harness.ingestor.get_import(&ctx(), record.id),
        Err(IngestError::NotFound(_))
    ));
    assert_eq!(harness.records.count_rows(record.id).unwrap(), 0);
    assert!(harness.blobs.get(&path).is_err());
}

#[test]
fn display_name_defaults_to_file_name() {
    let harness = Harness::new();
    let named = harness
        .ingestor
        .begin_upload(&ctx(), &NewImport::new("Q1 Sales.csv").with_name("Quarter one"))
        .unwrap();
    assert_eq!(named.name, "Quarter one");
    assert!(named.table_name.starts_with("import_quarter_one_"));

    let unnamed = harness
        .ingestor
        .begin_upload(&ctx(), &NewImport::new("contacts.csv"))
        .unwrap();
    assert_eq!(unnamed.name, "contacts.csv");
    assert!(unnamed.table_name.starts_with("import_contacts_"));
}
