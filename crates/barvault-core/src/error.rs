use barvault_warehouse::WarehouseError;
use thiserror::Error;

use crate::indicators::IndicatorError;

/// Validation and contract errors for barvault inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid source '{value}', expected one of alpaca, yahoo")]
    InvalidSource { value: String },

    #[error("timestamp must be RFC3339: '{value}'")]
    InvalidTimestamp { value: String },
    #[error("trade date must be YYYY-MM-DD: '{value}'")]
    InvalidTradeDate { value: String },
    #[error("date range start {start} is after end {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },

    #[error("instrument list cannot be empty")]
    EmptyInstrumentList,
    #[error("series for {expected} contains a bar for {found}")]
    MixedInstruments { expected: String, found: String },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job '{job_id}' not found")]
    JobNotFound { job_id: String },

    #[error("invalid value '{value}' for {name}")]
    Config { name: &'static str, value: String },
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "core.validation",
            Self::Indicator(_) => "core.indicator",
            Self::Warehouse(WarehouseError::Write(error)) => error.code(),
            Self::Warehouse(_) => "core.storage",
            Self::Serialization(_) => "core.serialization",
            Self::JobNotFound { .. } => "core.job_not_found",
            Self::Config { .. } => "core.config",
        }
    }
}
