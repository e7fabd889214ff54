//! Batch ingestion: acquire, compute, validate, quarantine, persist.
//!
//! One job visits its instruments strictly in order. The only parallel stage
//! is the batch write of an instrument's valid records.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use barvault_warehouse::{KeyValueStore, WriteStats};

use crate::completeness::CompletenessScorer;
use crate::error::CoreError;
use crate::indicators::{IndicatorEngine, Sma200Source};
use crate::monitor::{ErrorRateMonitor, MonitorConfig};
use crate::quarantine::QuarantineStore;
use crate::repository::RecordRepository;
use crate::routing::{Acquisition, ProbeResult, SourceFallbackCoordinator, SourceSnapshot};
use crate::validation::{
    QualityValidator, QuarantineCandidate, ValidationReport, ValidatorConfig,
};
use crate::{
    IngestionJob, InstrumentStatus, Outcome, ProcessingStatus, ProviderId, Record, Symbol,
    TradeDate,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Pause between instruments.
    pub politeness_delay: Duration,
    pub monitor_window_hours: u32,
    /// Concurrent file writes per instrument batch.
    pub max_concurrent_writes: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            politeness_delay: Duration::from_millis(100),
            monitor_window_hours: 24,
            max_concurrent_writes: 10,
        }
    }
}

/// Cooperative cancellation flag checked between instruments.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// What happened to one instrument that got past acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentReport {
    pub instrument: Symbol,
    pub source_used: ProviderId,
    pub records: usize,
    pub persisted: usize,
    pub quarantined: usize,
    pub write_failures: usize,
    pub indicators_calculated: bool,
    pub sma_200_fallback: Option<Sma200Source>,
    pub status: InstrumentStatus,
}

impl InstrumentReport {
    fn error_message(&self) -> Option<String> {
        match self.status {
            InstrumentStatus::Completed => None,
            _ => Some(format!(
                "{} of {} records persisted ({} quarantined, {} write failures)",
                self.persisted, self.records, self.quarantined, self.write_failures
            )),
        }
    }
}

pub struct IngestionOrchestrator {
    coordinator: Arc<SourceFallbackCoordinator>,
    engine: Arc<IndicatorEngine>,
    validator: Arc<QualityValidator>,
    scorer: CompletenessScorer,
    repository: RecordRepository,
    quarantine: QuarantineStore,
    monitor: Arc<ErrorRateMonitor>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for IngestionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionOrchestrator")
            .field("providers", &self.coordinator.provider_chain())
            .field("repository", &self.repository)
            .field("config", &self.config)
            .finish()
    }
}

impl IngestionOrchestrator {
    pub fn new(
        coordinator: Arc<SourceFallbackCoordinator>,
        engine: IndicatorEngine,
        store: Arc<dyn KeyValueStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            coordinator,
            engine: Arc::new(engine),
            validator: Arc::new(QualityValidator::default()),
            scorer: CompletenessScorer::default(),
            repository: RecordRepository::new(store.clone()),
            quarantine: QuarantineStore::new(store.clone()),
            monitor: Arc::new(ErrorRateMonitor::new(store, MonitorConfig::default())),
            config,
        }
    }

    pub fn with_validator(mut self, config: ValidatorConfig) -> Self {
        self.validator = Arc::new(QualityValidator::new(config));
        self
    }

    pub fn with_monitor(mut self, monitor: ErrorRateMonitor) -> Self {
        self.monitor = Arc::new(monitor);
        self
    }

    pub fn monitor(&self) -> &ErrorRateMonitor {
        &self.monitor
    }

    pub fn repository(&self) -> &RecordRepository {
        &self.repository
    }

    /// Creates and persists a pending job.
    pub async fn create_job(
        &self,
        instruments: Vec<Symbol>,
        start: TradeDate,
        end: TradeDate,
    ) -> Result<IngestionJob, CoreError> {
        let job = IngestionJob::new(instruments, start, end)?;
        self.repository.save_job(&job).await?;
        info!(job_id = %job.job_id, instruments = job.instruments.len(), %start, %end, "job created");
        Ok(job)
    }

    /// Creates a job and runs it to completion.
    pub async fn ingest(
        &self,
        instruments: Vec<Symbol>,
        start: TradeDate,
        end: TradeDate,
        cancel: &CancellationHandle,
    ) -> Result<IngestionJob, CoreError> {
        let job = self.create_job(instruments, start, end).await?;
        Ok(self.run_job(job, cancel).await)
    }

    /// Runs `job` over its instruments. Per-instrument failures never abort
    /// the batch; the returned job carries the counters and error map.
    pub async fn run_job(&self, mut job: IngestionJob, cancel: &CancellationHandle) -> IngestionJob {
        job.start();
        self.persist_job(&job).await;

        let instruments = job.instruments.clone();
        for (index, instrument) in instruments.iter().enumerate() {
            if index > 0 && !self.config.politeness_delay.is_zero() && !cancel.is_cancelled() {
                tokio::time::sleep(self.config.politeness_delay).await;
            }

            let outcome = self
                .process_instrument(&job.job_id, instrument, job.start_date, job.end_date, cancel)
                .await;
            match outcome {
                Outcome::Ok(report) => {
                    let error = report.error_message();
                    job.record_instrument(
                        instrument,
                        report.status,
                        report.persisted,
                        report.quarantined,
                        error,
                    );
                }
                Outcome::Skipped(reason) => {
                    info!(job_id = %job.job_id, instrument = %instrument, reason = %reason, "instrument skipped");
                    job.record_cancelled(instrument);
                }
                Outcome::Failed(message) => {
                    warn!(job_id = %job.job_id, instrument = %instrument, error = %message, "instrument failed");
                    job.record_instrument(instrument, InstrumentStatus::Failed, 0, 0, Some(message));
                }
            }
            self.persist_job(&job).await;
        }

        job.finish();
        match self
            .monitor
            .check_error_rate(Some(self.config.monitor_window_hours))
            .await
        {
            Ok(check) => job.monitor = Some(check),
            Err(err) => warn!(job_id = %job.job_id, error = %err, "error rate check failed"),
        }
        self.persist_job(&job).await;

        info!(
            job_id = %job.job_id,
            status = ?job.status,
            succeeded = job.counts.succeeded,
            failed = job.counts.failed,
            persisted = job.counts.records_persisted,
            quarantined = job.counts.records_quarantined,
            "job finished"
        );
        job
    }

    /// Full pipeline for one instrument.
    pub async fn process_instrument(
        &self,
        job_id: &str,
        instrument: &Symbol,
        start: TradeDate,
        end: TradeDate,
        cancel: &CancellationHandle,
    ) -> Outcome<InstrumentReport> {
        if cancel.is_cancelled() {
            return Outcome::skipped("cancelled");
        }

        let (series, source_used) = match self
            .coordinator
            .acquire_bars_for_job(instrument, start, end, Some(job_id))
            .await
        {
            Acquisition::Success { bars, source_used } => (bars, source_used),
            failed => {
                return Outcome::failed(
                    failed
                        .failure_message()
                        .unwrap_or_else(|| String::from("all sources failed")),
                )
            }
        };

        let mut frame = match self
            .engine
            .compute_with_history(&series, self.coordinator.as_ref())
            .await
        {
            Ok(frame) => frame,
            Err(err) => return Outcome::failed(err.to_string()),
        };
        let sma_200_fallback = self.engine.fill_missing_sma_200(&mut frame).await;
        let fundamentals = self.coordinator.acquire_fundamentals(instrument).await;

        let calculated = frame.calculated;
        let records: Vec<Record> = frame
            .rows
            .into_iter()
            .map(|row| {
                let mut record = Record::collected(row.bar, Some(job_id.to_owned()));
                record.indicators = row.indicators;
                record.metadata.sma_200_source = row.sma_200_source;
                record.metadata.indicators_calculated = calculated;
                if calculated {
                    record.set_status(ProcessingStatus::IndicatorsCalculated);
                }
                record.attach_fundamentals(fundamentals.clone());
                self.scorer.annotate(&mut record);
                record
            })
            .collect();
        let total = records.len();

        let batch = self.validator.validate_batch(records);
        let quarantined = self
            .quarantine
            .quarantine_all(batch.quarantined, Some(job_id))
            .await;

        let (persisted, write_failures) = if batch.valid.is_empty() {
            (0, 0)
        } else {
            match self
                .repository
                .save_records(batch.valid, self.config.max_concurrent_writes)
                .await
            {
                Ok(report) => {
                    for failure in &report.writes.failures {
                        error!(
                            instrument = %instrument,
                            target = %failure.target,
                            code = %failure.code,
                            error = %failure.error,
                            "record write failed"
                        );
                    }
                    let persisted = report.persisted();
                    let write_failures = report.failed.len();
                    if write_failures > 0 {
                        self.quarantine
                            .record_write_failures(report.failed, Some(job_id))
                            .await;
                    }
                    (persisted, write_failures)
                }
                Err(err) => return Outcome::failed(err.to_string()),
            }
        };

        let status = if total > 0 && persisted == total {
            InstrumentStatus::Completed
        } else if persisted > 0 {
            InstrumentStatus::Partial
        } else {
            InstrumentStatus::Failed
        };

        info!(
            instrument = %instrument,
            source = %source_used,
            records = total,
            persisted,
            quarantined,
            write_failures,
            status = ?status,
            "instrument processed"
        );

        Outcome::Ok(InstrumentReport {
            instrument: instrument.clone(),
            source_used,
            records: total,
            persisted,
            quarantined,
            write_failures,
            indicators_calculated: calculated,
            sma_200_fallback,
            status,
        })
    }

    async fn persist_job(&self, job: &IngestionJob) {
        if let Err(err) = self.repository.save_job(job).await {
            error!(job_id = %job.job_id, code = err.code(), error = %err, "failed to persist job");
        }
    }

    pub async fn job_status(&self, job_id: &str) -> Result<IngestionJob, CoreError> {
        self.repository
            .load_job(job_id)
            .await?
            .ok_or_else(|| CoreError::JobNotFound {
                job_id: job_id.to_owned(),
            })
    }

    pub async fn record(
        &self,
        instrument: &Symbol,
        date: TradeDate,
    ) -> Result<Option<Record>, CoreError> {
        self.repository.load(instrument, date).await
    }

    pub async fn records(
        &self,
        instrument: &Symbol,
        start: TradeDate,
        end: TradeDate,
    ) -> Result<Vec<Record>, CoreError> {
        self.repository.load_range(instrument, start, end).await
    }

    pub async fn source_health(&self) -> BTreeMap<ProviderId, ProbeResult> {
        self.coordinator.probe_health().await
    }

    pub fn sources(&self) -> Vec<SourceSnapshot> {
        self.coordinator.snapshots()
    }

    pub fn validation_report(&self) -> ValidationReport {
        self.validator.report()
    }

    /// Re-checks persisted records against the current validator config and
    /// returns the ones that would now be rejected.
    pub async fn revalidate(
        &self,
        instrument: &Symbol,
        start: TradeDate,
        end: TradeDate,
    ) -> Result<Vec<QuarantineCandidate>, CoreError> {
        let records = self.repository.load_range(instrument, start, end).await?;
        Ok(self.validator.validate_batch(records).quarantined)
    }

    pub fn writer_stats(&self) -> Option<WriteStats> {
        self.repository.store().write_stats()
    }

    /// Waits for in-flight writes and closes the store.
    pub async fn shutdown(&self) {
        self.repository.store().shutdown().await;
        info!("orchestrator shut down");
    }
}
