use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::monitor::ErrorRateCheck;
use crate::{ensure_range, Symbol, TradeDate, UtcDateTime, ValidationError};

/// Job lifecycle: `pending -> running -> completed | partial | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl JobStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }
}

/// How a single instrument fared within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentStatus {
    /// Every record persisted.
    Completed,
    /// Some records persisted, others quarantined or failed.
    Partial,
    /// Nothing persisted.
    Failed,
}

impl InstrumentStatus {
    pub const fn succeeded(self) -> bool {
        matches!(self, Self::Completed | Self::Partial)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records_persisted: usize,
    pub records_quarantined: usize,
}

/// One batch ingestion run. Persisted after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: String,
    pub instruments: Vec<Symbol>,
    pub start_date: TradeDate,
    pub end_date: TradeDate,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub outcomes: BTreeMap<Symbol, InstrumentStatus>,
    pub errors: BTreeMap<Symbol, String>,
    pub created_at: UtcDateTime,
    pub started_at: Option<UtcDateTime>,
    pub completed_at: Option<UtcDateTime>,
    pub monitor: Option<ErrorRateCheck>,
}

impl IngestionJob {
    pub fn new(
        instruments: Vec<Symbol>,
        start_date: TradeDate,
        end_date: TradeDate,
    ) -> Result<Self, ValidationError> {
        if instruments.is_empty() {
            return Err(ValidationError::EmptyInstrumentList);
        }
        ensure_range(start_date, end_date)?;

        let mut unique: Vec<Symbol> = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            if !unique.contains(&instrument) {
                unique.push(instrument);
            }
        }

        Ok(Self {
            job_id: Uuid::new_v4().to_string(),
            instruments: unique,
            start_date,
            end_date,
            status: JobStatus::Pending,
            counts: JobCounts::default(),
            outcomes: BTreeMap::new(),
            errors: BTreeMap::new(),
            created_at: UtcDateTime::now(),
            started_at: None,
            completed_at: None,
            monitor: None,
        })
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(UtcDateTime::now());
    }

    /// Folds one instrument's result into the counters.
    pub fn record_instrument(
        &mut self,
        instrument: &Symbol,
        status: InstrumentStatus,
        persisted: usize,
        quarantined: usize,
        error: Option<String>,
    ) {
        self.counts.attempted += 1;
        if status.succeeded() {
            self.counts.succeeded += 1;
        } else {
            self.counts.failed += 1;
        }
        self.counts.records_persisted += persisted;
        self.counts.records_quarantined += quarantined;
        self.outcomes.insert(instrument.clone(), status);
        if let Some(error) = error {
            self.errors.insert(instrument.clone(), error);
        }
    }

    /// Marks an instrument that was never started because the job was cancelled.
    pub fn record_cancelled(&mut self, instrument: &Symbol) {
        self.counts.attempted += 1;
        self.counts.failed += 1;
        self.outcomes
            .insert(instrument.clone(), InstrumentStatus::Failed);
        self.errors
            .insert(instrument.clone(), String::from("cancelled"));
    }

    /// Settles the terminal status from the counters.
    pub fn finish(&mut self) {
        self.status = if self.counts.failed == 0 {
            JobStatus::Completed
        } else if self.counts.succeeded > 0 {
            JobStatus::Partial
        } else {
            JobStatus::Failed
        };
        self.completed_at = Some(UtcDateTime::now());
    }

    /// Instruments not yet visited, in job order.
    pub fn remaining(&self) -> impl Iterator<Item = &Symbol> {
        self.instruments
            .iter()
            .filter(|instrument| !self.outcomes.contains_key(*instrument))
    }
}
