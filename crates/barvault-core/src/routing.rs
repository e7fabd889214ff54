//! Multi-provider acquisition with a quality gate.
//!
//! The coordinator walks its providers in priority order. Every call goes
//! through the provider's process-wide throttle, its circuit breaker, a
//! bounded retry and a timeout. A fetched series is only accepted when enough
//! of its bars are plausible; otherwise the next provider is tried.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use barvault_warehouse::layout::acquisition_failure_key;
use barvault_warehouse::KeyValueStore;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::data_source::{
    CapabilitySet, Endpoint, HealthState, SourceClient, SourceError, SourceFuture,
};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::ProviderThrottle;
use crate::{BarSeries, FundamentalSnapshot, ProviderId, Symbol, TradeDate, UtcDateTime};

/// Error type tag written into acquisition failure logs.
pub const ALL_SOURCES_FAILED: &str = "all_sources_failed";

/// Coordinator knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackConfig {
    /// Share of plausible bars a series needs to be accepted.
    pub min_valid_ratio: f64,
    /// Attempts per provider call, overriding the provider policy default.
    pub max_attempts: u32,
    pub request_timeout: Duration,
    /// Instrument fetched by `probe_health`.
    pub probe_symbol: String,
    pub provider_order: Vec<ProviderId>,
    pub breaker: CircuitBreakerConfig,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            min_valid_ratio: 0.70,
            max_attempts: 3,
            request_timeout: Duration::from_secs(15),
            probe_symbol: String::from("AAPL"),
            provider_order: ProviderId::ALL.to_vec(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Result of a bar acquisition. Exhausting every provider is a value, not an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    Success {
        bars: BarSeries,
        source_used: ProviderId,
    },
    AllSourcesFailed {
        failed_sources: Vec<ProviderId>,
        reasons: BTreeMap<ProviderId, String>,
    },
}

impl Acquisition {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// One-line summary of why every provider failed.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::AllSourcesFailed { reasons, .. } if reasons.is_empty() => {
                Some(String::from("all sources failed: no providers configured"))
            }
            Self::AllSourcesFailed { reasons, .. } => Some(format!(
                "all sources failed: {}",
                reasons
                    .iter()
                    .map(|(provider, reason)| format!("{provider}: {reason}"))
                    .collect::<Vec<_>>()
                    .join("; ")
            )),
        }
    }
}

/// Entry appended to `error_records/daily/...` when acquisition fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionFailureRecord {
    pub error_id: Uuid,
    pub instrument: Symbol,
    pub requested_start_date: TradeDate,
    pub requested_end_date: TradeDate,
    pub error_timestamp: UtcDateTime,
    pub error_message: String,
    pub job_id: Option<String>,
    pub failed_sources: Vec<ProviderId>,
    pub error_type: String,
}

/// Per-provider result of `probe_health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub status: HealthState,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub circuit: CircuitState,
}

/// Registration view used by the `sources` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSnapshot {
    pub id: ProviderId,
    pub capabilities: CapabilitySet,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    pub circuit_trips: u64,
    pub last_error: Option<String>,
}

/// Fetches extra history for the indicator cold start.
pub trait HistoryFetcher: Send + Sync {
    fn fetch_history<'a>(
        &'a self,
        instrument: &'a Symbol,
        start: TradeDate,
        end: TradeDate,
    ) -> SourceFuture<'a, BarSeries>;
}

struct ProviderSlot {
    client: Arc<dyn SourceClient>,
    policy: ProviderPolicy,
    throttle: ProviderThrottle,
    breaker: CircuitBreaker,
}

/// Ordered provider fallback with throttling, retries and circuit breaking.
pub struct SourceFallbackCoordinator {
    config: FallbackConfig,
    slots: HashMap<ProviderId, ProviderSlot>,
    failure_store: Option<Arc<dyn KeyValueStore>>,
}

impl std::fmt::Debug for SourceFallbackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFallbackCoordinator")
            .field("config", &self.config)
            .field("providers", &self.provider_chain())
            .finish_non_exhaustive()
    }
}

impl SourceFallbackCoordinator {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config,
            slots: HashMap::new(),
            failure_store: None,
        }
    }

    /// Registers `client` with its provider's default policy. The attempt
    /// budget comes from [`FallbackConfig::max_attempts`].
    pub fn with_source(self, client: Arc<dyn SourceClient>) -> Self {
        let mut policy = ProviderPolicy::default_for(client.id());
        policy.retry.max_attempts = self.config.max_attempts.max(1);
        self.with_source_policy(client, policy)
    }

    pub fn with_source_policy(mut self, client: Arc<dyn SourceClient>, policy: ProviderPolicy) -> Self {
        let slot = ProviderSlot {
            throttle: ProviderThrottle::from_policy(&policy),
            breaker: CircuitBreaker::new(client.id().to_string(), self.config.breaker),
            client,
            policy,
        };
        self.slots.insert(slot.client.id(), slot);
        self
    }

    /// Where acquisition failures are logged. Without a store they are only
    /// traced.
    pub fn with_failure_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.failure_store = Some(store);
        self
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Registered providers in the order they are tried.
    pub fn provider_chain(&self) -> Vec<ProviderId> {
        let mut chain = Vec::with_capacity(self.slots.len());
        for provider in &self.config.provider_order {
            if self.slots.contains_key(provider) && !chain.contains(provider) {
                chain.push(*provider);
            }
        }
        for provider in ProviderId::ALL {
            if self.slots.contains_key(&provider) && !chain.contains(&provider) {
                chain.push(provider);
            }
        }
        chain
    }

    pub fn snapshots(&self) -> Vec<SourceSnapshot> {
        self.ordered_slots()
            .map(|slot| {
                let breaker = slot.breaker.snapshot();
                SourceSnapshot {
                    id: slot.client.id(),
                    capabilities: slot.client.capabilities(),
                    circuit: breaker.state,
                    consecutive_failures: breaker.consecutive_failures,
                    circuit_trips: breaker.trips,
                    last_error: breaker.last_error,
                }
            })
            .collect()
    }

    fn ordered_slots(&self) -> impl Iterator<Item = &ProviderSlot> {
        self.provider_chain()
            .into_iter()
            .filter_map(|provider| self.slots.get(&provider))
    }

    /// Acquires bars in `[start, end]` from the first provider whose series
    /// passes the quality gate.
    pub async fn acquire_bars(&self, instrument: &Symbol, start: TradeDate, end: TradeDate) -> Acquisition {
        self.acquire_bars_for_job(instrument, start, end, None).await
    }

    /// Same as [`Self::acquire_bars`], tagging any failure log with `job_id`.
    pub async fn acquire_bars_for_job(
        &self,
        instrument: &Symbol,
        start: TradeDate,
        end: TradeDate,
        job_id: Option<&str>,
    ) -> Acquisition {
        let acquisition = self.try_providers(instrument, start, end).await;
        if let Acquisition::AllSourcesFailed { failed_sources, .. } = &acquisition {
            let message = acquisition.failure_message().unwrap_or_default();
            warn!(instrument = %instrument, %start, %end, error = %message, "all sources failed");
            let record = AcquisitionFailureRecord {
                error_id: Uuid::new_v4(),
                instrument: instrument.clone(),
                requested_start_date: start,
                requested_end_date: end,
                error_timestamp: UtcDateTime::now(),
                error_message: message,
                job_id: job_id.map(str::to_owned),
                failed_sources: failed_sources.clone(),
                error_type: String::from(ALL_SOURCES_FAILED),
            };
            self.log_failure(&record).await;
        }
        acquisition
    }

    async fn try_providers(&self, instrument: &Symbol, start: TradeDate, end: TradeDate) -> Acquisition {
        let mut failed_sources = Vec::new();
        let mut reasons = BTreeMap::new();

        for slot in self.ordered_slots() {
            let provider = slot.client.id();
            if !slot.client.capabilities().supports(Endpoint::Bars) {
                continue;
            }

            let reason = match self.call_bars(slot, instrument, start, end).await {
                Ok(series) => {
                    let ratio = series.plausible_ratio();
                    if !series.is_empty() && ratio >= self.config.min_valid_ratio {
                        info!(
                            instrument = %instrument,
                            source = %provider,
                            bars = series.len(),
                            "bars acquired"
                        );
                        return Acquisition::Success {
                            bars: series,
                            source_used: provider,
                        };
                    }
                    if series.is_empty() {
                        String::from("no bars returned")
                    } else {
                        format!(
                            "quality gate failed: {:.0}% of {} bars plausible, {:.0}% required",
                            ratio * 100.0,
                            series.len(),
                            self.config.min_valid_ratio * 100.0
                        )
                    }
                }
                Err(error) => error.to_string(),
            };

            warn!(instrument = %instrument, source = %provider, reason = %reason, "falling back to next source");
            failed_sources.push(provider);
            reasons.insert(provider, reason);
        }

        Acquisition::AllSourcesFailed {
            failed_sources,
            reasons,
        }
    }

    async fn call_bars(
        &self,
        slot: &ProviderSlot,
        instrument: &Symbol,
        start: TradeDate,
        end: TradeDate,
    ) -> Result<BarSeries, SourceError> {
        if let Err(open) = slot.breaker.try_acquire() {
            return Err(SourceError::unavailable(format!("{}: {open}", slot.client.id())));
        }

        let timeout = self.config.request_timeout;
        let label = format!("{}.bars", slot.client.id());
        let outcome = slot
            .policy
            .retry
            .run(&label, |_| async move {
                slot.throttle.acquire().await;
                tokio::time::timeout(timeout, slot.client.get_bars(instrument, start, end))
                    .await
                    .unwrap_or_else(|_| Err(SourceError::timeout(timeout)))
            })
            .await;

        match outcome {
            Ok(series) => {
                slot.breaker.record_success();
                Ok(series)
            }
            Err((error, attempts)) => {
                slot.breaker.record_failure(&error.to_string());
                debug!(source = %slot.client.id(), attempts, error = %error, "bar request failed");
                Err(error)
            }
        }
    }

    /// Fundamentals from the first provider that supports them and has a
    /// snapshot. Failures are logged and yield `None`.
    pub async fn acquire_fundamentals(&self, instrument: &Symbol) -> Option<FundamentalSnapshot> {
        for slot in self.ordered_slots() {
            let provider = slot.client.id();
            if !slot.client.capabilities().supports(Endpoint::Fundamentals) {
                continue;
            }
            if let Err(open) = slot.breaker.try_acquire() {
                debug!(instrument = %instrument, source = %provider, reason = %open, "skipping fundamentals");
                continue;
            }

            let timeout = self.config.request_timeout;
            let label = format!("{provider}.fundamentals");
            let outcome = slot
                .policy
                .retry
                .run(&label, |_| async move {
                    slot.throttle.acquire().await;
                    tokio::time::timeout(timeout, slot.client.get_fundamentals(instrument))
                        .await
                        .unwrap_or_else(|_| Err(SourceError::timeout(timeout)))
                })
                .await;

            match outcome {
                Ok(Some(snapshot)) if !snapshot.is_empty() => {
                    slot.breaker.record_success();
                    debug!(instrument = %instrument, source = %provider, "fundamentals acquired");
                    return Some(snapshot);
                }
                Ok(_) => slot.breaker.record_success(),
                Err((error, _)) => {
                    slot.breaker.record_failure(&error.to_string());
                    warn!(instrument = %instrument, source = %provider, error = %error, "fundamentals request failed");
                }
            }
        }
        None
    }

    /// Fetches the probe instrument for the last five days from every
    /// provider, once, without retries.
    pub async fn probe_health(&self) -> BTreeMap<ProviderId, ProbeResult> {
        let end = TradeDate::today();
        let start = end.minus_days(5);
        let mut results = BTreeMap::new();

        let probe = match Symbol::parse(&self.config.probe_symbol) {
            Ok(symbol) => symbol,
            Err(error) => {
                for slot in self.ordered_slots() {
                    results.insert(
                        slot.client.id(),
                        ProbeResult {
                            status: HealthState::Unhealthy,
                            latency_ms: 0,
                            error: Some(error.to_string()),
                            circuit: slot.breaker.state(),
                        },
                    );
                }
                return results;
            }
        };

        for slot in self.ordered_slots() {
            let provider = slot.client.id();
            let circuit = slot.breaker.state();
            if circuit == CircuitState::Open {
                results.insert(
                    provider,
                    ProbeResult {
                        status: HealthState::Unhealthy,
                        latency_ms: 0,
                        error: Some(String::from("circuit open")),
                        circuit,
                    },
                );
                continue;
            }
            if !slot.throttle.try_acquire() {
                results.insert(
                    provider,
                    ProbeResult {
                        status: HealthState::Degraded,
                        latency_ms: 0,
                        error: Some(String::from("rate budget exhausted")),
                        circuit,
                    },
                );
                continue;
            }

            let started = Instant::now();
            let outcome = tokio::time::timeout(
                self.config.request_timeout,
                slot.client.get_bars(&probe, start, end),
            )
            .await
            .unwrap_or_else(|_| Err(SourceError::timeout(self.config.request_timeout)));
            let latency_ms = elapsed_ms(started);

            let (status, error) = match outcome {
                Ok(series) if series.is_empty() => {
                    (HealthState::Degraded, Some(String::from("no bars returned")))
                }
                Ok(_) => (HealthState::Healthy, None),
                Err(error) => (HealthState::Unhealthy, Some(error.to_string())),
            };
            results.insert(
                provider,
                ProbeResult {
                    status,
                    latency_ms,
                    error,
                    circuit: slot.breaker.state(),
                },
            );
        }
        results
    }

    async fn log_failure(&self, record: &AcquisitionFailureRecord) {
        let Some(store) = &self.failure_store else {
            return;
        };
        let key = acquisition_failure_key(
            record.instrument.as_str(),
            record.requested_end_date.into_inner(),
        );
        let entry = match serde_json::to_value(record) {
            Ok(entry) => entry,
            Err(error) => {
                warn!(key = %key, error = %error, "failed to serialize acquisition failure");
                return;
            }
        };

        let entries = match store.get(&key).await {
            Ok(Some(Value::Array(mut existing))) => {
                existing.push(entry);
                existing
            }
            Ok(Some(existing)) => vec![existing, entry],
            Ok(None) => vec![entry],
            Err(error) => {
                warn!(key = %key, error = %error, "failed to read acquisition failure log; starting a new one");
                vec![entry]
            }
        };

        if let Err(error) = store.put(&key, &Value::Array(entries)).await {
            warn!(key = %key, error = %error, "failed to persist acquisition failure");
        }
    }
}

impl HistoryFetcher for SourceFallbackCoordinator {
    fn fetch_history<'a>(
        &'a self,
        instrument: &'a Symbol,
        start: TradeDate,
        end: TradeDate,
    ) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            let acquisition = self.try_providers(instrument, start, end).await;
            match acquisition {
                Acquisition::Success { bars, .. } => Ok(bars),
                failed => Err(SourceError::unavailable(
                    failed.failure_message().unwrap_or_default(),
                )),
            }
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
