//! # Barvault Core
//!
//! Daily market-bar ingestion pipeline: acquisition with provider fallback,
//! technical indicators, quality validation with quarantine, crash-safe
//! persistence, and error-rate monitoring.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters (Alpaca, Yahoo) |
//! | [`circuit_breaker`] | Per-provider circuit breaker |
//! | [`completeness`] | Weighted field-completeness scoring |
//! | [`config`] | Environment-driven pipeline configuration |
//! | [`data_source`] | Source client traits and error types |
//! | [`domain`] | Bars, records, jobs and outcomes |
//! | [`error`] | Core error types |
//! | [`http_client`] | HTTP client abstraction |
//! | [`indicators`] | SMA, EMA, RSI, MACD, Bollinger and ATR |
//! | [`monitor`] | Rolling error-rate checks and trends |
//! | [`orchestrator`] | Per-instrument pipeline and job lifecycle |
//! | [`provider_policy`] | Retry and throttle settings per provider |
//! | [`quarantine`] | Storage of rejected records |
//! | [`repository`] | Typed access to persisted records and jobs |
//! | [`retry`] | Backoff and retry policy |
//! | [`routing`] | Ordered fallback acquisition |
//! | [`source`] | Provider identifiers |
//! | [`throttling`] | Rate limiting support |
//! | [`validation`] | Indicator bounds and quarantine decisions |
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ SourceFallback       │────▶│ Circuit Breaker  │
//! │ Coordinator          │     │ + Throttle       │
//! └──────────┬───────────┘     └──────────────────┘
//!            │ bars
//!            ▼
//! ┌──────────────────────┐
//! │ IndicatorEngine      │
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ QualityValidator     │────▶│ QuarantineStore  │
//! └──────────┬───────────┘     └──────────────────┘
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ RecordRepository     │────▶│ KeyValueStore    │
//! └──────────────────────┘     └────────┬─────────┘
//!                                       ▼
//!                              ┌──────────────────┐
//!                              │ ErrorRateMonitor │
//!                              └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use barvault_core::{CancellationHandle, PipelineConfig, Symbol, TradeDate};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::from_env()?;
//!     let orchestrator = config.build_orchestrator()?;
//!
//!     let job = orchestrator
//!         .ingest(
//!             vec![Symbol::parse("AAPL")?],
//!             TradeDate::parse("2024-01-02")?,
//!             TradeDate::parse("2024-01-31")?,
//!             &CancellationHandle::new(),
//!         )
//!         .await?;
//!     println!("{} persisted", job.counts.records_persisted);
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod circuit_breaker;
pub mod completeness;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod indicators;
pub mod monitor;
pub mod orchestrator;
pub mod provider_policy;
pub mod quarantine;
pub mod repository;
pub mod retry;
pub mod routing;
pub mod source;
pub mod throttling;
pub mod validation;

// Re-export commonly used types at crate root for convenience

pub use adapters::{AlpacaAdapter, AlpacaCredentials, YahooAdapter};

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState,
};

pub use completeness::{CompletenessLevel, CompletenessScore, CompletenessScorer};

pub use config::{PipelineConfig, StoreKind};

pub use data_source::{
    CapabilitySet, Endpoint, HealthState, HealthStatus, PrecomputedAverageSource, SourceClient,
    SourceError, SourceErrorKind,
};

pub use domain::{
    ensure_range, Bar, BarSeries, FundamentalSnapshot, IndicatorSet, IngestionJob,
    InstrumentStatus, JobCounts, JobStatus, Outcome, ProcessingMetadata, ProcessingStatus,
    Provenance, Record, Symbol, TradeDate, UtcDateTime,
};

pub use error::{CoreError, ValidationError};

pub use indicators::{IndicatorEngine, IndicatorParams, Sma200Source};

pub use monitor::{AlertSink, ErrorRateCheck, ErrorRateMonitor, MonitorConfig, TrendReport};

pub use orchestrator::{CancellationHandle, IngestionOrchestrator, OrchestratorConfig};

pub use provider_policy::ProviderPolicy;

pub use quarantine::{QuarantineEntry, QuarantineStore, WriteFailureEntry};

pub use repository::{RecordRepository, RecordSaveReport, StorageStats};

pub use retry::{Backoff, RetryPolicy};

pub use routing::{Acquisition, FallbackConfig, SourceFallbackCoordinator};

pub use source::ProviderId;

pub use validation::{QualityValidator, QuarantineCategory, ValidatorConfig, Violation};

pub use barvault_warehouse::{BatchWriteReport, KeyValueStore};
