//! Collaborator contracts for upstream market data.
//!
//! | Trait | Used by |
//! |-------|---------|
//! | [`SourceClient`] | [`SourceFallbackCoordinator`](crate::SourceFallbackCoordinator) for bars and fundamentals |
//! | [`PrecomputedAverageSource`] | the SMA-200 fallback chain in [`IndicatorEngine`](crate::IndicatorEngine) |
//!
//! Both return boxed futures so they can be held as `Arc<dyn ...>`.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::{BarSeries, FundamentalSnapshot, ProviderId, Symbol, TradeDate};

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Data endpoint type used for capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Bars,
    Fundamentals,
    Averages,
}

impl Endpoint {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bars => "bars",
            Self::Fundamentals => "fundamentals",
            Self::Averages => "averages",
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported endpoint matrix for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub bars: bool,
    pub fundamentals: bool,
    pub averages: bool,
}

impl CapabilitySet {
    pub const fn new(bars: bool, fundamentals: bool, averages: bool) -> Self {
        Self {
            bars,
            fundamentals,
            averages,
        }
    }

    pub const fn bars_only() -> Self {
        Self::new(true, false, false)
    }

    pub const fn supports(self, endpoint: Endpoint) -> bool {
        match endpoint {
            Endpoint::Bars => self.bars,
            Endpoint::Fundamentals => self.fundamentals,
            Endpoint::Averages => self.averages,
        }
    }
}

/// Health state reported by sources and the `sources health` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Runtime source health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub state: HealthState,
    pub rate_available: bool,
}

impl HealthStatus {
    pub const fn new(state: HealthState, rate_available: bool) -> Self {
        Self {
            state,
            rate_available,
        }
    }

    pub const fn healthy() -> Self {
        Self::new(HealthState::Healthy, true)
    }

    pub const fn degraded() -> Self {
        Self::new(HealthState::Degraded, true)
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Unsupported,
    Unavailable,
    RateLimited,
    InvalidRequest,
    Timeout,
    Internal,
}

/// Structured source error used by retry and fallback decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unsupported(endpoint: Endpoint) -> Self {
        Self {
            kind: SourceErrorKind::Unsupported,
            message: format!("endpoint '{endpoint}' is not supported by this source"),
            retryable: false,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self {
            kind: SourceErrorKind::Timeout,
            message: format!("request timed out after {}ms", after.as_millis()),
            retryable: true,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unsupported => "source.unsupported",
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// One upstream provider of daily bars and, optionally, fundamentals.
///
/// Implementations must be `Send + Sync`; the coordinator shares them across
/// jobs behind `Arc`.
pub trait SourceClient: Send + Sync {
    fn id(&self) -> ProviderId;

    fn capabilities(&self) -> CapabilitySet;

    /// Daily bars with dates in `[start, end]`. An empty series is a valid
    /// answer; the coordinator's gate decides what to do with it.
    fn get_bars<'a>(
        &'a self,
        instrument: &'a Symbol,
        start: TradeDate,
        end: TradeDate,
    ) -> SourceFuture<'a, BarSeries>;

    /// Current fundamentals. `Ok(None)` when the provider has nothing.
    fn get_fundamentals<'a>(
        &'a self,
        instrument: &'a Symbol,
    ) -> SourceFuture<'a, Option<FundamentalSnapshot>>;

    fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>>;
}

/// Provider-published moving averages, consulted when local history is short.
pub trait PrecomputedAverageSource: Send + Sync {
    fn get_average<'a>(&'a self, instrument: &'a Symbol, window: usize)
        -> SourceFuture<'a, Option<f64>>;
}
