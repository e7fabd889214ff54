//! Durable storage for records that failed validation or could not be
//! written to the primary area.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use barvault_warehouse::layout::{quarantine_key, write_failure_key};
use barvault_warehouse::{KeyValueStore, PutReceipt};

use crate::error::CoreError;
use crate::validation::{QuarantineCandidate, QuarantineCategory, Violation};
use crate::{Record, Symbol, TradeDate, UtcDateTime};

/// Quarantine document wrapping the rejected record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub original_record: Record,
    pub violations: Vec<Violation>,
    pub reason: String,
    pub category: QuarantineCategory,
    pub job_id: Option<String>,
    pub moved_at: UtcDateTime,
}

impl QuarantineEntry {
    pub fn new(candidate: QuarantineCandidate, job_id: Option<String>) -> Self {
        Self {
            reason: candidate.category.reason().to_owned(),
            category: candidate.category,
            violations: candidate.violations,
            original_record: candidate.record,
            job_id,
            moved_at: UtcDateTime::now(),
        }
    }

    pub fn key(&self) -> String {
        quarantine_key(
            self.category.as_str(),
            self.original_record.instrument().as_str(),
            self.original_record.date().into_inner(),
        )
    }
}

/// Error document for a record the primary store refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteFailureEntry {
    pub original_record: Record,
    pub instrument: Symbol,
    pub error_type: String,
    pub error_message: String,
    pub job_id: Option<String>,
    pub error_timestamp: UtcDateTime,
}

impl WriteFailureEntry {
    pub const ERROR_TYPE: &'static str = "storage_write_failed";

    pub fn new(record: Record, job_id: Option<String>) -> Self {
        let error_message = record
            .metadata
            .error_message
            .clone()
            .unwrap_or_else(|| String::from("write failed"));
        Self {
            instrument: record.instrument().clone(),
            error_type: Self::ERROR_TYPE.to_owned(),
            error_message,
            original_record: record,
            job_id,
            error_timestamp: UtcDateTime::now(),
        }
    }

    pub fn key(&self) -> String {
        write_failure_key(
            self.instrument.as_str(),
            self.original_record.date().into_inner(),
        )
    }
}

/// Writes quarantine entries under `error_records/{category}/...`.
#[derive(Clone)]
pub struct QuarantineStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for QuarantineStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuarantineStore")
            .field("store", &self.store.kind())
            .finish()
    }
}

impl QuarantineStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn quarantine(&self, entry: &QuarantineEntry) -> Result<PutReceipt, CoreError> {
        let key = entry.key();
        let value = serde_json::to_value(entry)?;
        let receipt = self.store.put(&key, &value).await?;
        warn!(
            instrument = %entry.original_record.instrument(),
            date = %entry.original_record.date(),
            category = entry.category.as_str(),
            violations = entry.violations.len(),
            "record quarantined"
        );
        Ok(receipt)
    }

    /// Quarantines each candidate and returns how many were stored.
    ///
    /// A failed write is logged and skipped; the record never reaches the
    /// primary store either way.
    pub async fn quarantine_all(
        &self,
        candidates: Vec<QuarantineCandidate>,
        job_id: Option<&str>,
    ) -> usize {
        let mut stored = 0;
        for candidate in candidates {
            let entry = QuarantineEntry::new(candidate, job_id.map(str::to_owned));
            match self.quarantine(&entry).await {
                Ok(_) => stored += 1,
                Err(err) => error!(
                    key = %entry.key(),
                    code = err.code(),
                    error = %err,
                    "failed to write quarantine entry"
                ),
            }
        }
        stored
    }

    /// Stores an error entry for each record the primary store refused and
    /// returns how many were stored.
    pub async fn record_write_failures(
        &self,
        records: Vec<Record>,
        job_id: Option<&str>,
    ) -> usize {
        let mut stored = 0;
        for record in records {
            let entry = WriteFailureEntry::new(record, job_id.map(str::to_owned));
            let key = entry.key();
            let written = match serde_json::to_value(&entry) {
                Ok(value) => self.store.put(&key, &value).await.map_err(CoreError::from),
                Err(err) => Err(CoreError::from(err)),
            };
            match written {
                Ok(_) => {
                    warn!(
                        instrument = %entry.instrument,
                        date = %entry.original_record.date(),
                        error = %entry.error_message,
                        "write failure recorded"
                    );
                    stored += 1;
                }
                Err(err) => error!(
                    key = %key,
                    code = err.code(),
                    error = %err,
                    "failed to write error entry"
                ),
            }
        }
        stored
    }

    pub async fn load_write_failure(
        &self,
        instrument: &Symbol,
        date: TradeDate,
    ) -> Result<Option<WriteFailureEntry>, CoreError> {
        let key = write_failure_key(instrument.as_str(), date.into_inner());
        match self.store.get(&key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn load(
        &self,
        category: QuarantineCategory,
        instrument: &Symbol,
        date: TradeDate,
    ) -> Result<Option<QuarantineEntry>, CoreError> {
        let key = quarantine_key(category.as_str(), instrument.as_str(), date.into_inner());
        match self.store.get(&key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bar, Provenance, ProviderId};
    use barvault_warehouse::{FsStore, WriterConfig};

    fn candidate() -> QuarantineCandidate {
        let bar = Bar::new(
            Symbol::parse("TSLA").expect("symbol"),
            TradeDate::parse("2024-02-14").expect("date"),
            190.0,
            185.0,
            180.0,
            188.0,
            9_000,
            Provenance::now(ProviderId::Yahoo),
        )
        .expect("bar");
        QuarantineCandidate {
            record: Record::collected(bar, Some(String::from("job-9"))),
            violations: vec![Violation::PriceEnvelope {
                open: 190.0,
                high: 185.0,
                low: 180.0,
                close: 188.0,
            }],
            category: QuarantineCategory::TechnicalValidation,
        }
    }

    #[tokio::test]
    async fn writes_entry_under_category_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn KeyValueStore> =
            Arc::new(FsStore::new(dir.path(), WriterConfig::default()));
        let quarantine = QuarantineStore::new(store.clone());

        let stored = quarantine.quarantine_all(vec![candidate()], Some("job-9")).await;
        assert_eq!(stored, 1);

        let raw = store
            .get("error_records/technical_validation/TSLA/2024-02-14.json")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(raw["reason"], "technical_indicator_validation_failed");
        assert_eq!(raw["job_id"], "job-9");
        assert_eq!(raw["original_record"]["basic_data"]["high"], 185.0);
        assert_eq!(raw["violations"][0]["type"], "price_envelope");
        assert!(raw["moved_at"].is_string());

        let primary = store.list("historical").await.expect("list");
        assert!(primary.is_empty());
    }

    #[tokio::test]
    async fn write_failures_land_under_storage_category() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn KeyValueStore> =
            Arc::new(FsStore::new(dir.path(), WriterConfig::default()));
        let quarantine = QuarantineStore::new(store.clone());
        let mut record = candidate().record;
        record.mark_error("write.io: read-only file system");

        let stored = quarantine.record_write_failures(vec![record], Some("job-9")).await;
        assert_eq!(stored, 1);

        let raw = store
            .get("error_records/storage/TSLA/2024-02-14.json")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(raw["error_type"], "storage_write_failed");
        assert_eq!(raw["instrument"], "TSLA");
        assert_eq!(raw["error_message"], "write.io: read-only file system");
        assert_eq!(raw["original_record"]["metadata"]["status"], "error");
        assert!(raw["error_timestamp"].is_string());

        let loaded = quarantine
            .load_write_failure(
                &Symbol::parse("TSLA").expect("symbol"),
                TradeDate::parse("2024-02-14").expect("date"),
            )
            .await
            .expect("load")
            .expect("present");
        assert_eq!(loaded.job_id.as_deref(), Some("job-9"));
    }

    #[tokio::test]
    async fn load_reads_entry_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let quarantine = QuarantineStore::new(Arc::new(FsStore::new(
            dir.path(),
            WriterConfig::default(),
        )));
        let entry = QuarantineEntry::new(candidate(), None);
        quarantine.quarantine(&entry).await.expect("quarantine");

        let loaded = quarantine
            .load(
                QuarantineCategory::TechnicalValidation,
                &Symbol::parse("TSLA").expect("symbol"),
                TradeDate::parse("2024-02-14").expect("date"),
            )
            .await
            .expect("load")
            .expect("present");
        assert_eq!(loaded, entry);

        let absent = quarantine
            .load(
                QuarantineCategory::MissingIndicators,
                &Symbol::parse("TSLA").expect("symbol"),
                TradeDate::parse("2024-02-14").expect("date"),
            )
            .await
            .expect("load");
        assert!(absent.is_none());
    }
}
