//! Behavior-driven tests for durable storage
//!
//! These tests verify that writes are verified on disk, that corrupted
//! documents never replace good ones, and that both backends hold the records
//! a job produces.

use std::sync::Arc;

use barvault_core::{RecordRepository, StorageStats};
use barvault_tests::*;
use barvault_warehouse::writer::temp_path;
use barvault_warehouse::{
    checksum, CrashSafeWriter, DuckDbStore, FsStore, WarehouseError, WriteError, WriterConfig,
};
use serde_json::json;

// =============================================================================
// Writer: Verification
// =============================================================================

#[tokio::test]
async fn when_a_document_is_written_its_checksum_matches_the_bytes_on_disk() {
    // Given: A writer and a nested destination that does not exist yet
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = CrashSafeWriter::new(WriterConfig::default());
    let path = dir.path().join("historical/daily/AAPL/2024/01/2024-01-02.json");

    // When: A record is written
    let receipt = writer
        .write(&path, &json!({"instrument": "AAPL", "close": 185.64}))
        .await
        .expect("write");

    // Then: The receipt checksum is the checksum of the file contents
    let on_disk = std::fs::read(&path).expect("read back");
    assert_eq!(receipt.checksum, checksum(&on_disk));
    assert_eq!(receipt.bytes, on_disk.len());
    assert_eq!(receipt.attempts, 1);
    assert!(!temp_path(&path).exists(), "temp file should be renamed away");
}

#[tokio::test]
async fn when_a_serialized_form_is_corrupt_the_previous_file_survives() {
    // Given: A good document already on disk
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = CrashSafeWriter::new(WriterConfig::default());
    let path = dir.path().join("record.json");
    writer
        .write_text(&path, "{\"close\": 101.25}")
        .await
        .expect("first write");

    // When: Two concatenated documents are offered for the same path
    let error = writer
        .write_text(&path, "{\"close\": 101.25}{\"close\": 99.0}")
        .await
        .expect_err("concatenated documents must be refused");

    // Then: The write is refused before touching the file
    assert!(matches!(error, WriteError::CorruptionPrevented { .. }));
    assert_eq!(error.code(), "write.corruption_prevented");
    let kept = std::fs::read_to_string(&path).expect("read");
    assert_eq!(kept, "{\"close\": 101.25}");

    let stats = writer.stats();
    assert_eq!(stats.total_writes, 2);
    assert_eq!(stats.corruption_prevented, 1);
    assert_eq!(stats.successful_writes, 1);
}

#[tokio::test]
async fn when_a_crash_left_a_temp_file_the_next_write_replaces_it_cleanly() {
    // Given: A good document and a half-written temp sibling from a crash
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FsStore::new(dir.path(), WriterConfig::default());
    store
        .put("jobs/j1/metadata.json", &json!({"job_id": "j1", "status": "running"}))
        .await
        .expect("put");
    let destination = dir.path().join("jobs/j1/metadata.json");
    std::fs::write(temp_path(&destination), b"{\"job_id\": \"j1\", \"sta").expect("temp");

    // When: The store is read and listed
    let value = store
        .get("jobs/j1/metadata.json")
        .await
        .expect("get")
        .expect("present");
    let listed = store.list("jobs").await.expect("list");

    // Then: The destination is intact and the temp file is not a document
    assert_eq!(value["status"], "running");
    assert_eq!(listed.len(), 1);

    // And: The next write replaces the leftover temp file
    store
        .put("jobs/j1/metadata.json", &json!({"job_id": "j1", "status": "completed"}))
        .await
        .expect("second put");
    assert!(!temp_path(&destination).exists());
    let value = store
        .get("jobs/j1/metadata.json")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(value["status"], "completed");
}

#[tokio::test]
async fn when_the_store_is_shut_down_new_writes_are_refused() {
    // Given: A store that has been shut down
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FsStore::new(dir.path(), WriterConfig::default());
    store.shutdown().await;

    // When: A write is attempted
    let error = store
        .put("jobs/late/metadata.json", &json!({"job_id": "late"}))
        .await
        .expect_err("shut down store must refuse writes");

    // Then: The failure says why and nothing was written
    assert!(matches!(error, WarehouseError::Write(WriteError::ShutDown)));
    assert!(store.writer().is_shut_down());
    assert!(!dir.path().join("jobs/late/metadata.json").exists());
}

#[tokio::test]
async fn when_a_batch_is_written_every_document_is_reported() {
    // Given: Twenty documents for one instrument
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FsStore::new(dir.path(), WriterConfig::default());
    let entries = (1..=20)
        .map(|day| {
            (
                format!("historical/daily/AAPL/2024/01/2024-01-{day:02}.json"),
                json!({"day": day}),
            )
        })
        .collect::<Vec<_>>();

    // When: They are written four at a time
    let report = store.put_batch(entries, 4).await.expect("batch");

    // Then: All succeed and all are listed
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.succeeded, 20);
    let listed = store.list("historical/daily/AAPL").await.expect("list");
    assert_eq!(listed.len(), 20);
}

// =============================================================================
// Backends: Job Output
// =============================================================================

#[tokio::test]
async fn when_a_job_writes_to_duckdb_its_records_load_back_in_order() {
    // Given: A DuckDB-backed store
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn KeyValueStore> = Arc::new(
        DuckDbStore::open(dir.path().join("barvault.duckdb"), 2).expect("open duckdb"),
    );
    let source = Arc::new(ScriptedSource::new(ProviderId::Alpaca, day("2023-01-01"), 260));
    let orchestrator = orchestrator(vec![source], store.clone(), default_engine());

    // When: Two weeks are ingested
    let job = orchestrator
        .ingest(
            vec![symbol("AAPL")],
            day("2023-09-04"),
            day("2023-09-17"),
            &CancellationHandle::new(),
        )
        .await
        .expect("ingest");

    // Then: The same records come back from the embedded database
    assert_eq!(job.counts.records_persisted, 14);
    let records = RecordRepository::new(store.clone())
        .load_range(&symbol("AAPL"), day("2023-09-04"), day("2023-09-17"))
        .await
        .expect("range");
    assert_eq!(records.len(), 14);
    assert_eq!(records[0].date(), day("2023-09-04"));
    assert_eq!(records[13].date(), day("2023-09-17"));

    let stored = orchestrator.job_status(&job.job_id).await.expect("job");
    assert_eq!(stored.counts.records_persisted, 14);
    store.shutdown().await;
}

#[tokio::test]
async fn when_a_job_quarantines_a_record_storage_stats_show_each_area() {
    // Given: A job where one day fails its price envelope
    let dir = tempfile::tempdir().expect("tempdir");
    let store = fs_store(&dir);
    let source = ScriptedSource::new(ProviderId::Alpaca, day("2023-01-01"), 260)
        .with_default(Behavior::HighBelowClose { index: 255 });
    let orchestrator = orchestrator(vec![Arc::new(source)], store.clone(), default_engine());
    orchestrator
        .ingest(
            vec![symbol("NVDA")],
            day("2023-09-01"),
            day("2023-09-17"),
            &CancellationHandle::new(),
        )
        .await
        .expect("ingest");

    // When: Storage is summarized
    let stats: StorageStats = RecordRepository::new(store)
        .storage_stats()
        .await
        .expect("stats");

    // Then: Records, the quarantined day, and the job are counted separately
    assert_eq!(stats.backend, "fs");
    assert_eq!(stats.areas["historical/daily"].keys, 16);
    assert_eq!(stats.areas["error_records/technical_validation"].keys, 1);
    assert_eq!(stats.areas["jobs"].keys, 1);
    assert_eq!(stats.total_keys, 18);
    let writer = stats.writer.expect("fs store reports writer stats");
    assert_eq!(writer.corruption_prevented, 0);
    assert!(writer.successful_writes >= 18);
}
