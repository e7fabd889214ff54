//! # Domain Models
//!
//! Canonical types flowing through the barvault pipeline.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated instrument identifier |
//! | [`TradeDate`] | Calendar trading day (`YYYY-MM-DD`) |
//! | [`UtcDateTime`] | UTC timestamp |
//! | [`Bar`] | Daily OHLCV observation with provenance |
//! | [`BarSeries`] | Bars for one instrument |
//! | [`FundamentalSnapshot`] | Optional point-in-time fundamentals |
//! | [`IndicatorSet`] | Derived indicators, each absent until computable |
//! | [`Record`] | Bar + indicators + fundamentals + metadata |
//! | [`IngestionJob`] | One batch run and its counters |
//! | [`Outcome`] | Tagged `Ok / Skipped / Failed` stage result |
//!
//! Bars only refuse non-finite prices at construction. Whether a bar is
//! internally consistent is decided downstream, so bad upstream data can be
//! counted and quarantined instead of vanishing.

mod job;
mod models;
mod outcome;
mod record;
mod symbol;
mod timestamp;
pub(crate) mod trade_date;

pub use job::{IngestionJob, InstrumentStatus, JobCounts, JobStatus};
pub use models::{Bar, BarSeries, FundamentalSnapshot, Provenance};
pub use outcome::Outcome;
pub use record::{IndicatorSet, ProcessingMetadata, ProcessingStatus, Record};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
pub use trade_date::{ensure_range, TradeDate};
