//! CLI argument definitions for barvault.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ingest` | Acquire, validate and persist daily bars |
//! | `job` | Show a persisted ingestion job |
//! | `record` | Show stored records for one instrument |
//! | `monitor` | Error-rate check and trend |
//! | `sources` | Registered providers and live health |
//! | `report` | Validation and storage reports |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--data-root` | `$BARVAULT_DATA_ROOT` or `~/.barvault` | Storage root |
//! | `--store` | `$BARVAULT_STORE` or `fs` | Storage backend |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-json` | `false` | Emit logs as JSON lines on stderr |
//!
//! # Examples
//!
//! ```bash
//! barvault ingest AAPL MSFT --start 2024-01-02 --end 2024-03-28
//! barvault record AAPL --date 2024-03-28 --pretty
//! barvault monitor check --window-hours 6
//! barvault report storage --store duckdb
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Upper bound for `ingest --days`, about a century.
pub const MAX_DAYS_BACK: i64 = 36_500;
/// Upper bound for `monitor check --window-hours`, ten years.
pub const MAX_WINDOW_HOURS: i64 = 87_600;
/// Upper bound for `monitor trend --days`.
pub const MAX_TREND_DAYS: i64 = 3_650;

/// Daily market-bar ingestion with validation, quarantine and monitoring.
#[derive(Debug, Parser)]
#[command(
    name = "barvault",
    author,
    version,
    about = "Daily market-bar ingestion pipeline",
    long_about = "barvault acquires daily OHLCV bars with provider fallback, computes technical \
indicators, quarantines records that fail validation, persists the rest, and tracks the \
rolling error rate.\n\
\n\
Configuration comes from BARVAULT_* environment variables; the global flags below override \
the storage settings."
)]
pub struct Cli {
    /// Storage root directory.
    #[arg(long, global = true)]
    pub data_root: Option<PathBuf>,

    /// Storage backend.
    #[arg(long, global = true, value_enum)]
    pub store: Option<StoreArg>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreArg {
    /// One JSON document per key under the data root.
    Fs,
    /// Single DuckDB file under the data root.
    Duckdb,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run an ingestion job over one or more instruments.
    ///
    /// # Examples
    ///
    ///   barvault ingest AAPL
    ///   barvault ingest AAPL,MSFT --start 2024-01-02 --end 2024-03-28
    ///   barvault ingest NVDA --days 30
    Ingest(IngestArgs),

    /// Show a persisted job by id.
    Job(JobArgs),

    /// Show stored records for an instrument.
    ///
    /// # Examples
    ///
    ///   barvault record AAPL --date 2024-03-28
    ///   barvault record AAPL --start 2024-03-01 --end 2024-03-28
    Record(RecordArgs),

    /// Error-rate monitoring.
    Monitor(MonitorArgs),

    /// Provider registration and health.
    Sources(SourcesArgs),

    /// Validation and storage reports.
    Report(ReportArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Instruments to ingest, space or comma separated.
    #[arg(required = true, num_args = 1..)]
    pub symbols: Vec<String>,

    /// First trading day (YYYY-MM-DD).
    #[arg(long)]
    pub start: Option<String>,

    /// Last trading day (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub end: Option<String>,

    /// Calendar days back from `--end` when `--start` is omitted.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(0..=MAX_DAYS_BACK))]
    pub days: u32,
}

#[derive(Debug, Args)]
pub struct JobArgs {
    pub job_id: String,
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    pub symbol: String,

    /// Single trading day.
    #[arg(long, conflicts_with_all = ["start", "end"])]
    pub date: Option<String>,

    #[arg(long, requires = "end")]
    pub start: Option<String>,

    #[arg(long, requires = "start")]
    pub end: Option<String>,
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    #[command(subcommand)]
    pub command: MonitorCommand,
}

#[derive(Debug, Subcommand)]
pub enum MonitorCommand {
    /// Error rate over the rolling window; exits 3 when above threshold.
    Check {
        /// Window length in hours.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=MAX_WINDOW_HOURS))]
        window_hours: Option<u32>,
    },
    /// Daily error rates and a trend label.
    Trend {
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=MAX_TREND_DAYS))]
        days: u32,
    },
}

#[derive(Debug, Args)]
pub struct SourcesArgs {
    #[command(subcommand)]
    pub command: SourcesCommand,
}

#[derive(Debug, Subcommand)]
pub enum SourcesCommand {
    /// Registered providers with circuit state.
    List,
    /// Probe every provider with a short fetch.
    Health,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[command(subcommand)]
    pub command: ReportCommand,
}

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// Re-validate stored records and summarize violations.
    Validation {
        symbol: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// Key counts and bytes per storage area.
    Storage,
}
