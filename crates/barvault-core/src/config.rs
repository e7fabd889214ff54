//! Pipeline configuration and wiring.
//!
//! Every knob has a default; `PipelineConfig::from_env` overrides them from
//! `BARVAULT_*` variables.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `BARVAULT_DATA_ROOT` / `BARVAULT_HOME` | data root (default `~/.barvault`) |
//! | `BARVAULT_STORE` | `fs` or `duckdb` |
//! | `BARVAULT_DUCKDB_POOL_SIZE` | DuckDB connection pool size |
//! | `BARVAULT_MIN_VALID_RATIO` | source quality gate, `0.0..=1.0` |
//! | `BARVAULT_MAX_ATTEMPTS` | attempts per provider call |
//! | `BARVAULT_REQUEST_TIMEOUT_SECS` | per-request timeout, clamped to 10-30s |
//! | `BARVAULT_PROVIDER_ORDER` | e.g. `alpaca,yahoo` |
//! | `BARVAULT_PROBE_SYMBOL` | instrument fetched by health probes |
//! | `BARVAULT_HISTORY_DAYS` / `BARVAULT_MIN_POINTS` | indicator cold start |
//! | `BARVAULT_WRITE_ATTEMPTS` / `BARVAULT_MAX_CONCURRENT_WRITES` | writer |
//! | `BARVAULT_ERROR_THRESHOLD` / `BARVAULT_MONITOR_WINDOW_HOURS` | monitor |
//! | `BARVAULT_POLITENESS_MS` | delay between instruments |
//! | `BARVAULT_ALPACA_API_KEY` / `ALPACA_API_KEY` | Alpaca key id |
//! | `BARVAULT_ALPACA_SECRET_KEY` / `ALPACA_SECRET_KEY` | Alpaca secret |
//! | `BARVAULT_YAHOO_COOKIE` / `YAHOO_COOKIE` | Yahoo session cookie |

use std::collections::BTreeMap;
use std::env;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use barvault_warehouse::{DuckDbStore, FsStore, KeyValueStore, WriterConfig};

use crate::adapters::{AlpacaAdapter, AlpacaCredentials, YahooAdapter};
use crate::error::CoreError;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::indicators::{IndicatorEngine, IndicatorParams};
use crate::monitor::{ErrorRateMonitor, MonitorConfig};
use crate::orchestrator::{IngestionOrchestrator, OrchestratorConfig};
use crate::provider_policy::ProviderPolicy;
use crate::routing::{FallbackConfig, SourceFallbackCoordinator};
use crate::source::parse_provider_order;
use crate::validation::ValidatorConfig;
use crate::ProviderId;

const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DUCKDB_FILE: &str = "barvault.duckdb";

/// Storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreKind {
    #[default]
    Fs,
    DuckDb,
}

impl StoreKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fs => "fs",
            Self::DuckDb => "duckdb",
        }
    }
}

impl Display for StoreKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fs" | "file" | "files" => Ok(Self::Fs),
            "duckdb" => Ok(Self::DuckDb),
            _ => Err(CoreError::Config {
                name: "BARVAULT_STORE",
                value: value.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub data_root: PathBuf,
    pub store: StoreKind,
    pub duckdb_pool_size: usize,
    pub fallback: FallbackConfig,
    pub providers: BTreeMap<ProviderId, ProviderPolicy>,
    pub indicators: IndicatorParams,
    pub validator: ValidatorConfig,
    pub writer: WriterConfig,
    pub monitor: MonitorConfig,
    pub orchestrator: OrchestratorConfig,
    pub alpaca: Option<AlpacaCredentials>,
    pub yahoo_cookie: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(|name| env::var(name).ok()),
            store: StoreKind::Fs,
            duckdb_pool_size: 4,
            fallback: FallbackConfig::default(),
            providers: ProviderId::ALL
                .into_iter()
                .map(|provider| (provider, ProviderPolicy::default_for(provider)))
                .collect(),
            indicators: IndicatorParams::default(),
            validator: ValidatorConfig::default(),
            writer: WriterConfig::default(),
            monitor: MonitorConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            alpaca: None,
            yahoo_cookie: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self {
            data_root: default_data_root(&var),
            ..Self::default()
        };

        if let Some(value) = var("BARVAULT_STORE") {
            config.store = value.parse()?;
        }
        if let Some(size) = parse_var::<usize>(&var, "BARVAULT_DUCKDB_POOL_SIZE")? {
            config.duckdb_pool_size = positive("BARVAULT_DUCKDB_POOL_SIZE", size)?;
        }

        if let Some(ratio) = parse_var::<f64>(&var, "BARVAULT_MIN_VALID_RATIO")? {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(invalid("BARVAULT_MIN_VALID_RATIO", ratio));
            }
            config.fallback.min_valid_ratio = ratio;
        }
        if let Some(attempts) = parse_var::<u32>(&var, "BARVAULT_MAX_ATTEMPTS")? {
            config.fallback.max_attempts = positive("BARVAULT_MAX_ATTEMPTS", attempts)?;
        }
        if let Some(seconds) = parse_var::<u64>(&var, "BARVAULT_REQUEST_TIMEOUT_SECS")? {
            config.fallback.request_timeout = Duration::from_secs(seconds);
        }
        config.fallback.request_timeout = config
            .fallback
            .request_timeout
            .clamp(MIN_REQUEST_TIMEOUT, MAX_REQUEST_TIMEOUT);
        if let Some(order) = var("BARVAULT_PROVIDER_ORDER") {
            config.fallback.provider_order = parse_provider_order(&order)?;
        }
        if let Some(symbol) = var("BARVAULT_PROBE_SYMBOL") {
            config.fallback.probe_symbol = symbol.trim().to_ascii_uppercase();
        }

        if let Some(days) = parse_var::<i64>(&var, "BARVAULT_HISTORY_DAYS")? {
            config.indicators.history_days = days;
        }
        if let Some(points) = parse_var::<usize>(&var, "BARVAULT_MIN_POINTS")? {
            config.indicators.min_points = points;
        }
        config.indicators.validate()?;

        if let Some(attempts) = parse_var::<u32>(&var, "BARVAULT_WRITE_ATTEMPTS")? {
            config.writer.max_attempts = positive("BARVAULT_WRITE_ATTEMPTS", attempts)?;
        }
        if let Some(limit) = parse_var::<usize>(&var, "BARVAULT_MAX_CONCURRENT_WRITES")? {
            config.writer.max_concurrent = positive("BARVAULT_MAX_CONCURRENT_WRITES", limit)?;
        }
        config.orchestrator.max_concurrent_writes = config.writer.max_concurrent;

        if let Some(threshold) = parse_var::<f64>(&var, "BARVAULT_ERROR_THRESHOLD")? {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(invalid("BARVAULT_ERROR_THRESHOLD", threshold));
            }
            config.monitor.critical_threshold = threshold;
        }
        if let Some(hours) = parse_var::<u32>(&var, "BARVAULT_MONITOR_WINDOW_HOURS")? {
            let hours = positive("BARVAULT_MONITOR_WINDOW_HOURS", hours)?;
            config.monitor.window_hours = hours;
            config.orchestrator.monitor_window_hours = hours;
        }
        if let Some(millis) = parse_var::<u64>(&var, "BARVAULT_POLITENESS_MS")? {
            config.orchestrator.politeness_delay = Duration::from_millis(millis);
        }

        let api_key = var("BARVAULT_ALPACA_API_KEY").or_else(|| var("ALPACA_API_KEY"));
        let secret_key = var("BARVAULT_ALPACA_SECRET_KEY").or_else(|| var("ALPACA_SECRET_KEY"));
        config.alpaca = match (api_key, secret_key) {
            (Some(api_key), Some(secret_key)) => Some(AlpacaCredentials {
                api_key,
                secret_key,
            }),
            _ => None,
        };
        config.yahoo_cookie = var("BARVAULT_YAHOO_COOKIE").or_else(|| var("YAHOO_COOKIE"));

        Ok(config)
    }

    /// Opens the configured store under `data_root`.
    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>, CoreError> {
        let store: Arc<dyn KeyValueStore> = match self.store {
            StoreKind::Fs => Arc::new(FsStore::new(&self.data_root, self.writer.clone())),
            StoreKind::DuckDb => {
                std::fs::create_dir_all(&self.data_root).map_err(|err| CoreError::Config {
                    name: "BARVAULT_DATA_ROOT",
                    value: format!("{}: {err}", self.data_root.display()),
                })?;
                Arc::new(DuckDbStore::open(
                    self.data_root.join(DUCKDB_FILE),
                    self.duckdb_pool_size,
                )?)
            }
        };
        info!(store = store.kind(), data_root = %self.data_root.display(), "store opened");
        Ok(store)
    }

    /// Coordinator over the production adapters. Alpaca is registered only
    /// when credentials are configured.
    pub fn build_coordinator(
        &self,
        store: Arc<dyn KeyValueStore>,
    ) -> (SourceFallbackCoordinator, Arc<YahooAdapter>) {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        let mut yahoo = YahooAdapter::new(http.clone());
        if let Some(cookie) = &self.yahoo_cookie {
            yahoo = yahoo.with_cookie(cookie.clone());
        }
        let yahoo = Arc::new(yahoo);

        let mut coordinator =
            SourceFallbackCoordinator::new(self.fallback.clone()).with_failure_store(store);
        if let Some(credentials) = &self.alpaca {
            let alpaca = AlpacaAdapter::new(http, Some(credentials.clone()));
            coordinator =
                coordinator.with_source_policy(Arc::new(alpaca), self.policy(ProviderId::Alpaca));
        } else {
            info!("alpaca credentials not configured; using yahoo only");
        }
        coordinator = coordinator.with_source_policy(yahoo.clone(), self.policy(ProviderId::Yahoo));
        (coordinator, yahoo)
    }

    pub fn build_orchestrator(&self) -> Result<IngestionOrchestrator, CoreError> {
        let store = self.open_store()?;
        let (coordinator, yahoo) = self.build_coordinator(store.clone());
        let engine = IndicatorEngine::new(self.indicators.clone())?.with_average_source(yahoo);
        let monitor = ErrorRateMonitor::new(store.clone(), self.monitor);

        Ok(IngestionOrchestrator::new(
            Arc::new(coordinator),
            engine,
            store,
            self.orchestrator.clone(),
        )
        .with_validator(self.validator)
        .with_monitor(monitor))
    }

    /// Provider policy with the configured attempt budget applied.
    pub fn policy(&self, provider: ProviderId) -> ProviderPolicy {
        let mut policy = self
            .providers
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| ProviderPolicy::default_for(provider));
        policy.retry.max_attempts = self.fallback.max_attempts.max(1);
        policy
    }
}

fn default_data_root<F>(var: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = var("BARVAULT_DATA_ROOT").or_else(|| var("BARVAULT_HOME")) {
        return PathBuf::from(path);
    }
    if let Some(home) = var("HOME") {
        return PathBuf::from(home).join(".barvault");
    }
    PathBuf::from(".barvault")
}

fn parse_var<T>(
    var: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, CoreError>
where
    T: FromStr,
{
    var(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| CoreError::Config {
                name,
                value: value.clone(),
            })
        })
        .transpose()
}

fn positive<T>(name: &'static str, value: T) -> Result<T, CoreError>
where
    T: PartialOrd + Default + Display,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(invalid(name, value))
    }
}

fn invalid(name: &'static str, value: impl Display) -> CoreError {
    CoreError::Config {
        name,
        value: value.to_string(),
    }
}
