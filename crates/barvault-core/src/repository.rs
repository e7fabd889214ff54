//! Typed access to persisted records and jobs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use barvault_warehouse::layout::{instrument_prefix, job_key, parse_daily_record_key};
use barvault_warehouse::{BatchWriteReport, KeyValueStore, WriteStats};

use crate::error::CoreError;
use crate::{IngestionJob, ProcessingStatus, Record, Symbol, TradeDate};

/// Key count and bytes for one storage area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AreaStats {
    pub keys: usize,
    pub bytes: u64,
}

/// Outcome of [`RecordRepository::save_records`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSaveReport {
    pub writes: BatchWriteReport,
    /// Records the store refused, marked `error` with the write failure.
    pub failed: Vec<Record>,
}

impl RecordSaveReport {
    pub fn persisted(&self) -> usize {
        self.writes.succeeded
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub backend: &'static str,
    pub total_keys: usize,
    pub total_bytes: u64,
    pub areas: BTreeMap<String, AreaStats>,
    pub writer: Option<WriteStats>,
}

#[derive(Clone)]
pub struct RecordRepository {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for RecordRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordRepository")
            .field("store", &self.store.kind())
            .finish()
    }
}

impl RecordRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Marks each record persisted and writes them as one batch.
    ///
    /// Records the store refused come back in `failed` with status `error`
    /// and the write failure as their message. When the store cannot say
    /// which writes failed, each record is looked up again.
    pub async fn save_records(
        &self,
        records: Vec<Record>,
        max_concurrent: usize,
    ) -> Result<RecordSaveReport, CoreError> {
        let mut keyed = Vec::with_capacity(records.len());
        let mut entries = Vec::with_capacity(records.len());
        for mut record in records {
            record.set_status(ProcessingStatus::Persisted);
            let key = record.storage_key();
            entries.push((key.clone(), serde_json::to_value(&record)?));
            keyed.push((key, record));
        }

        let writes = match self.store.put_batch(entries, max_concurrent).await {
            Ok(writes) => writes,
            Err(err) => {
                let err = CoreError::from(err);
                let message = format!("{}: {err}", err.code());
                let failed = keyed
                    .into_iter()
                    .map(|(_, mut record)| {
                        record.mark_error(message.clone());
                        record
                    })
                    .collect::<Vec<_>>();
                return Ok(RecordSaveReport {
                    writes: BatchWriteReport {
                        succeeded: 0,
                        failed: failed.len(),
                        failures: Vec::new(),
                    },
                    failed,
                });
            }
        };
        if writes.is_clean() {
            return Ok(RecordSaveReport {
                writes,
                failed: Vec::new(),
            });
        }

        let mut failed = Vec::new();
        let mut pending = Vec::new();
        for (key, mut record) in keyed {
            let failure = writes
                .failures
                .iter()
                .find(|failure| Path::new(&failure.target).ends_with(&key));
            match failure {
                Some(failure) => {
                    record.mark_error(format!("{}: {}", failure.code, failure.error));
                    failed.push(record);
                }
                None => pending.push((key, record)),
            }
        }

        let unmatched = writes.failed.saturating_sub(failed.len());
        if unmatched > 0 {
            let reason = writes
                .failures
                .iter()
                .find(|failure| failure.target.starts_with('<'))
                .map(|failure| format!("{}: {}", failure.code, failure.error))
                .unwrap_or_else(|| String::from("write.unknown: batch write failed"));
            for (key, mut record) in pending {
                match self.store.get(&key).await {
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => {
                        record.mark_error(reason.clone());
                        failed.push(record);
                    }
                }
            }
        }

        Ok(RecordSaveReport { writes, failed })
    }

    pub async fn load(
        &self,
        instrument: &Symbol,
        date: TradeDate,
    ) -> Result<Option<Record>, CoreError> {
        let key = barvault_warehouse::layout::daily_record_key(
            instrument.as_str(),
            date.into_inner(),
        );
        match self.store.get(&key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Records for `instrument` dated in `[start, end]`, oldest first.
    pub async fn load_range(
        &self,
        instrument: &Symbol,
        start: TradeDate,
        end: TradeDate,
    ) -> Result<Vec<Record>, CoreError> {
        crate::ensure_range(start, end)?;

        let mut keyed = Vec::new();
        for entry in self.store.list(&instrument_prefix(instrument.as_str())).await? {
            let Some((_, date)) = parse_daily_record_key(&entry.key) else {
                debug!(key = %entry.key, "skipping non-record key");
                continue;
            };
            let date = TradeDate::new(date);
            if date >= start && date <= end {
                keyed.push((date, entry.key));
            }
        }
        keyed.sort();

        let mut records = Vec::with_capacity(keyed.len());
        for (_, key) in keyed {
            match self.store.get(&key).await? {
                Some(value) => records.push(serde_json::from_value(value)?),
                None => warn!(key = %key, "record disappeared while loading range"),
            }
        }
        Ok(records)
    }

    pub async fn save_job(&self, job: &IngestionJob) -> Result<(), CoreError> {
        let value = serde_json::to_value(job)?;
        self.store.put(&job_key(&job.job_id), &value).await?;
        Ok(())
    }

    pub async fn load_job(&self, job_id: &str) -> Result<Option<IngestionJob>, CoreError> {
        match self.store.get(&job_key(job_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Key count and bytes per area: `historical/daily`, each
    /// `error_records/{category}`, and `jobs`.
    pub async fn storage_stats(&self) -> Result<StorageStats, CoreError> {
        let mut areas: BTreeMap<String, AreaStats> = BTreeMap::new();
        let mut total_keys = 0;
        let mut total_bytes = 0;

        for entry in self.store.list("").await? {
            let stats = areas.entry(area_of(&entry.key)).or_default();
            stats.keys += 1;
            stats.bytes += entry.size;
            total_keys += 1;
            total_bytes += entry.size;
        }

        Ok(StorageStats {
            backend: self.store.kind(),
            total_keys,
            total_bytes,
            areas,
            writer: self.store.write_stats(),
        })
    }
}

fn area_of(key: &str) -> String {
    let mut segments = key.split('/');
    let first = segments.next().unwrap_or_default();
    match (first, segments.next()) {
        ("historical" | "error_records", Some(second)) => format!("{first}/{second}"),
        _ => first.to_owned(),
    }
}
