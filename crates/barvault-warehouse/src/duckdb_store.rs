//! Embedded `DuckDB` document store.
//!
//! All documents live in one `documents` table keyed by the same slash-separated
//! keys the filesystem store uses, so callers can switch backends freely.

use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use ::duckdb::params;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::{WarehouseError, WriteError};
use crate::integrity::{checksum, inspect_serialized};
use crate::pool::{DuckDbConnectionManager, PooledConnection};
use crate::store::{directory_prefix, key_segments, KeyValueStore, PutReceipt, StoreEntry, StoreFuture};
use crate::writer::{BatchFailure, BatchWriteReport};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
    key VARCHAR PRIMARY KEY,
    body VARCHAR NOT NULL,
    checksum VARCHAR NOT NULL,
    updated_at_ms BIGINT NOT NULL
);";

pub struct DuckDbStore {
    manager: DuckDbConnectionManager,
    closed: AtomicBool,
}

impl DuckDbStore {
    /// Opens (or creates) the database file and applies the schema.
    pub fn open(path: impl Into<PathBuf>, max_pool_size: usize) -> Result<Self, WarehouseError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(path, max_pool_size)?;
        manager.acquire()?.execute_batch(SCHEMA)?;
        info!(db_path = %manager.db_path().display(), "duckdb store ready");

        Ok(Self {
            manager,
            closed: AtomicBool::new(false),
        })
    }

    async fn blocking<T, F>(&self, task: F) -> Result<T, WarehouseError>
    where
        T: Send + 'static,
        F: FnOnce(PooledConnection) -> Result<T, WarehouseError> + Send + 'static,
    {
        let manager = self.manager.clone();
        tokio::task::spawn_blocking(move || task(manager.acquire()?))
            .await
            .map_err(|error| WarehouseError::Task(error.to_string()))?
    }

    fn ensure_open(&self) -> Result<(), WarehouseError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WriteError::ShutDown.into());
        }
        Ok(())
    }
}

/// Serializes and inspects a document ahead of an insert.
fn prepare_document(key: &str, value: &Value) -> Result<(String, String), WarehouseError> {
    key_segments(key)?;
    let text = serde_json::to_string_pretty(value)?;
    inspect_serialized(&text).map_err(|source| WriteError::CorruptionPrevented {
        path: PathBuf::from(key),
        source,
    })?;
    let digest = checksum(text.as_bytes());
    Ok((text, digest))
}

fn now_ms() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

fn from_ms(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

impl KeyValueStore for DuckDbStore {
    fn kind(&self) -> &'static str {
        "duckdb"
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>> {
        Box::pin(async move {
            key_segments(key)?;
            let key = key.to_owned();
            let body = self
                .blocking(move |connection| {
                    let mut statement =
                        connection.prepare("SELECT body FROM documents WHERE key = ?")?;
                    let mut rows = statement.query(params![key])?;
                    let found = match rows.next()? {
                        Some(row) => Some(row.get::<_, String>(0)?),
                        None => None,
                    };
                    Ok(found)
                })
                .await?;

            body.map(|text| serde_json::from_str(&text).map_err(WarehouseError::from))
                .transpose()
        })
    }

    fn put<'a>(&'a self, key: &'a str, value: &'a Value) -> StoreFuture<'a, PutReceipt> {
        Box::pin(async move {
            self.ensure_open()?;
            let (text, digest) = prepare_document(key, value)?;
            let bytes = text.len();
            let owned_key = key.to_owned();
            let expected = digest.clone();

            self.blocking(move |connection| {
                connection.execute(
                    "INSERT OR REPLACE INTO documents (key, body, checksum, updated_at_ms) VALUES (?, ?, ?, ?)",
                    params![owned_key, text, expected, now_ms()],
                )?;

                let mut statement = connection.prepare("SELECT body FROM documents WHERE key = ?")?;
                let mut rows = statement.query(params![owned_key])?;
                let stored = match rows.next()? {
                    Some(row) => row.get::<_, String>(0)?,
                    None => String::new(),
                };
                let actual = checksum(stored.as_bytes());
                if actual != expected {
                    return Err(WriteError::VerificationFailed {
                        path: PathBuf::from(owned_key),
                        expected,
                        actual,
                    }
                    .into());
                }
                Ok(())
            })
            .await?;

            Ok(PutReceipt {
                key: key.to_owned(),
                checksum: digest,
                bytes,
            })
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<StoreEntry>> {
        Box::pin(async move {
            let prefix = directory_prefix(prefix);
            self.blocking(move |connection| {
                let mut statement = connection.prepare(
                    "SELECT key, updated_at_ms, length(body) FROM documents WHERE starts_with(key, ?) ORDER BY key",
                )?;
                let mut rows = statement.query(params![prefix])?;
                let mut entries = Vec::new();
                while let Some(row) = rows.next()? {
                    let size: i64 = row.get(2)?;
                    entries.push(StoreEntry {
                        key: row.get(0)?,
                        modified: from_ms(row.get(1)?),
                        size: u64::try_from(size).unwrap_or(0),
                    });
                }
                Ok(entries)
            })
            .await
        })
    }

    fn put_batch<'a>(
        &'a self,
        entries: Vec<(String, Value)>,
        _max_concurrent: usize,
    ) -> StoreFuture<'a, BatchWriteReport> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut report = BatchWriteReport::default();
            let mut prepared = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                match prepare_document(&key, &value) {
                    Ok((text, digest)) => prepared.push((key, text, digest)),
                    Err(error) => {
                        report.failed += 1;
                        report.failures.push(BatchFailure {
                            target: key,
                            code: String::from("write.corruption_prevented"),
                            error: error.to_string(),
                        });
                    }
                }
            }

            let count = prepared.len();
            let committed = self
                .blocking(move |mut connection| {
                    let transaction = connection.transaction()?;
                    let written_at = now_ms();
                    for (key, text, digest) in &prepared {
                        transaction.execute(
                            "INSERT OR REPLACE INTO documents (key, body, checksum, updated_at_ms) VALUES (?, ?, ?, ?)",
                            params![key, text, digest, written_at],
                        )?;
                    }
                    transaction.commit()?;
                    Ok(prepared.into_iter().map(|(key, _, _)| key).collect::<Vec<_>>())
                })
                .await;

            match committed {
                Ok(keys) => report.succeeded += keys.len(),
                Err(error) => {
                    warn!(error = %error, documents = count, "duckdb batch rolled back");
                    report.failed += count;
                    report.failures.push(BatchFailure {
                        target: String::from("<transaction>"),
                        code: String::from("write.transaction"),
                        error: error.to_string(),
                    });
                }
            }
            Ok(report)
        })
    }

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            info!(db_path = %self.manager.db_path().display(), "duckdb store closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn round_trips_documents_and_lists_by_prefix() {
        let temp = tempdir().expect("tempdir");
        let store = DuckDbStore::open(temp.path().join("store.duckdb"), 2).expect("open");

        store
            .put("jobs/a/metadata.json", &json!({"job_id": "a"}))
            .await
            .expect("put");
        let report = store
            .put_batch(
                vec![
                    (String::from("historical/daily/X/2024/01/2024-01-02.json"), json!({"n": 1})),
                    (String::from("historical/daily/X/2024/01/2024-01-03.json"), json!({"n": 2})),
                ],
                4,
            )
            .await
            .expect("batch");
        assert_eq!(report.succeeded, 2);

        let value = store
            .get("jobs/a/metadata.json")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(value["job_id"], "a");

        let listed = store.list("historical/daily").await.expect("list");
        assert_eq!(listed.len(), 2);
        assert!(store.get("jobs/missing.json").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn rejects_writes_after_shutdown() {
        let temp = tempdir().expect("tempdir");
        let store = DuckDbStore::open(temp.path().join("store.duckdb"), 1).expect("open");
        store.shutdown().await;

        let err = store
            .put("jobs/a/metadata.json", &json!({}))
            .await
            .expect_err("closed store");
        assert!(matches!(err, WarehouseError::Write(WriteError::ShutDown)));
    }
}
