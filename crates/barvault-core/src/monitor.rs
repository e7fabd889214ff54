//! Rolling error-rate monitoring over persisted output.
//!
//! Successes are primary record files whose modification time falls in the
//! window. Errors are quarantine entries, write failures and acquisition
//! failures under `error_records/` whose `error_timestamp` (or `moved_at`) falls in the
//! window. When the rate reaches the threshold an [`ErrorSummary`] goes to
//! the configured [`AlertSink`], once per check.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use barvault_warehouse::layout::{DAILY_RECORDS, ERROR_RECORDS};
use barvault_warehouse::KeyValueStore;

use crate::error::CoreError;
use crate::{TradeDate, UtcDateTime};

pub type AlertFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>>;

#[derive(Debug, Error)]
#[error("alert delivery failed: {message}")]
pub struct AlertError {
    pub message: String,
}

impl AlertError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Receives error-rate alerts.
pub trait AlertSink: Send + Sync {
    fn send<'a>(&'a self, summary: &'a ErrorSummary) -> AlertFuture<'a>;
}

/// Emits alerts as `warn!` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send<'a>(&'a self, summary: &'a ErrorSummary) -> AlertFuture<'a> {
        Box::pin(async move {
            warn!(
                rate = summary.error_rate,
                errors = summary.total_errors,
                attempted = summary.total_attempted,
                instruments = ?summary.affected_instruments,
                most_common = %summary.most_common_error,
                timeframe = %summary.timeframe,
                "error rate threshold exceeded"
            );
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    /// Rate at or above which an alert is sent.
    pub critical_threshold: f64,
    pub window_hours: u32,
    /// Days averaged as "recent" by the trend report.
    pub recent_days: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            critical_threshold: 0.02,
            window_hours: 24,
            recent_days: 3,
        }
    }
}

/// Alert payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub total_attempted: usize,
    pub error_rate: f64,
    pub affected_instruments: Vec<String>,
    pub error_types: BTreeMap<String, usize>,
    pub most_common_error: String,
    pub timeframe: String,
}

/// Result of one `check_error_rate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRateCheck {
    pub rate: f64,
    pub exceeded: bool,
    pub threshold: f64,
    pub errors: usize,
    pub successes: usize,
    pub window_start: UtcDateTime,
    pub window_end: UtcDateTime,
    /// Present when the threshold was reached.
    pub details: Option<ErrorSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendLabel {
    Worsening,
    Improving,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRate {
    pub date: TradeDate,
    pub error_rate: f64,
    pub errors: usize,
    pub attempted: usize,
    pub affected_instruments: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub days: usize,
    pub daily: Vec<DailyRate>,
    pub label: TrendLabel,
    pub recent_mean: f64,
    pub overall_mean: f64,
    pub max_daily_rate: f64,
    pub min_daily_rate: f64,
}

/// One error entry found under `error_records/`.
#[derive(Debug, Clone)]
struct ErrorObservation {
    at: OffsetDateTime,
    instrument: Option<String>,
    error_type: String,
    message: String,
}

#[derive(Debug, Default)]
struct WindowTally {
    successes: usize,
    errors: Vec<ErrorObservation>,
}

impl WindowTally {
    fn rate(&self) -> f64 {
        let attempted = self.successes + self.errors.len();
        if attempted == 0 {
            0.0
        } else {
            self.errors.len() as f64 / attempted as f64
        }
    }

    fn affected_instruments(&self) -> BTreeSet<&str> {
        self.errors
            .iter()
            .filter_map(|error| error.instrument.as_deref())
            .collect()
    }
}

pub struct ErrorRateMonitor {
    store: Arc<dyn KeyValueStore>,
    sink: Arc<dyn AlertSink>,
    config: MonitorConfig,
}

impl std::fmt::Debug for ErrorRateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRateMonitor")
            .field("store", &self.store.kind())
            .field("config", &self.config)
            .finish()
    }
}

impl ErrorRateMonitor {
    pub fn new(store: Arc<dyn KeyValueStore>, config: MonitorConfig) -> Self {
        Self {
            store,
            sink: Arc::new(LogAlertSink),
            config,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Error rate over the last `window_hours` (the configured window when
    /// `None`). Sends at most one alert.
    pub async fn check_error_rate(
        &self,
        window_hours: Option<u32>,
    ) -> Result<ErrorRateCheck, CoreError> {
        let hours = window_hours.unwrap_or(self.config.window_hours);
        let end = OffsetDateTime::now_utc();
        let start = window_start(end, Duration::hours(i64::from(hours))).ok_or_else(|| {
            CoreError::Config {
                name: "window_hours",
                value: hours.to_string(),
            }
        })?;

        let mut tallies = self.tally(start, end, 1).await?;
        let tally = tallies.pop().unwrap_or_default();
        let rate = tally.rate();
        let exceeded = rate >= self.config.critical_threshold;

        let details = if exceeded {
            let summary = summarize(&tally, start, end);
            if let Err(err) = self.sink.send(&summary).await {
                warn!(error = %err, "alert sink failed");
            }
            Some(summary)
        } else {
            info!(
                rate,
                threshold = self.config.critical_threshold,
                errors = tally.errors.len(),
                successes = tally.successes,
                "error rate within threshold"
            );
            None
        };

        Ok(ErrorRateCheck {
            rate,
            exceeded,
            threshold: self.config.critical_threshold,
            errors: tally.errors.len(),
            successes: tally.successes,
            window_start: UtcDateTime::from(start),
            window_end: UtcDateTime::from(end),
            details,
        })
    }

    /// Daily error rates for the last `days` days with a trend label.
    pub async fn trend(&self, days: usize) -> Result<TrendReport, CoreError> {
        let days = days.max(1);
        let end = OffsetDateTime::now_utc();
        let start = i64::try_from(days)
            .ok()
            .and_then(|days| days.checked_mul(86_400))
            .map(Duration::seconds)
            .and_then(|span| window_start(end, span))
            .ok_or_else(|| CoreError::Config {
                name: "days",
                value: days.to_string(),
            })?;
        let tallies = self.tally(start, end, days).await?;

        let daily: Vec<DailyRate> = tallies
            .iter()
            .enumerate()
            .map(|(index, tally)| DailyRate {
                date: TradeDate::of(UtcDateTime::from(start + Duration::days(index as i64))),
                error_rate: tally.rate(),
                errors: tally.errors.len(),
                attempted: tally.successes + tally.errors.len(),
                affected_instruments: tally.affected_instruments().len(),
            })
            .collect();

        let rates: Vec<f64> = daily.iter().map(|day| day.error_rate).collect();
        let recent = &rates[rates.len().saturating_sub(self.config.recent_days.max(1))..];
        let recent_mean = mean(recent);
        let overall_mean = mean(&rates);

        let label = if recent_mean > overall_mean * 1.5 {
            TrendLabel::Worsening
        } else if recent_mean < overall_mean * 0.5 {
            TrendLabel::Improving
        } else {
            TrendLabel::Stable
        };

        Ok(TrendReport {
            days,
            label,
            recent_mean,
            overall_mean,
            max_daily_rate: rates.iter().copied().fold(0.0, f64::max),
            min_daily_rate: rates.iter().copied().reduce(f64::min).unwrap_or(0.0),
            daily,
        })
    }

    /// Splits `[start, end]` into `buckets` equal slices and counts each.
    async fn tally(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        buckets: usize,
    ) -> Result<Vec<WindowTally>, CoreError> {
        let mut tallies: Vec<WindowTally> = (0..buckets).map(|_| WindowTally::default()).collect();
        let span = end - start;
        let bucket_of = |at: OffsetDateTime| -> Option<usize> {
            if at < start || at > end {
                return None;
            }
            let offset = (at - start).as_seconds_f64() / span.as_seconds_f64().max(f64::EPSILON);
            Some(((offset * buckets as f64) as usize).min(buckets - 1))
        };

        for entry in self.store.list(DAILY_RECORDS).await? {
            if let Some(index) = bucket_of(entry.modified) {
                tallies[index].successes += 1;
            }
        }

        for entry in self.store.list(ERROR_RECORDS).await? {
            let value = match self.store.get(&entry.key).await {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(err) => {
                    debug!(key = %entry.key, error = %err, "skipping unreadable error file");
                    continue;
                }
            };
            let items = match value {
                Value::Array(items) => items,
                single => vec![single],
            };
            for item in items {
                let Some(observation) = observe(&item) else {
                    continue;
                };
                if let Some(index) = bucket_of(observation.at) {
                    tallies[index].errors.push(observation);
                }
            }
        }

        Ok(tallies)
    }
}

/// `None` when the window reaches before the earliest representable instant.
fn window_start(end: OffsetDateTime, span: Duration) -> Option<OffsetDateTime> {
    end.checked_sub(span)
}

fn observe(item: &Value) -> Option<ErrorObservation> {
    let stamp = item
        .get("error_timestamp")
        .or_else(|| item.get("moved_at"))
        .and_then(Value::as_str)?;
    let at = UtcDateTime::parse(stamp).ok()?.into_inner();

    let text = |field: &str| item.get(field).and_then(Value::as_str).map(str::to_owned);
    let instrument = text("instrument").or_else(|| {
        item.pointer("/original_record/instrument")
            .and_then(Value::as_str)
            .map(str::to_owned)
    });
    let error_type = text("error_type")
        .or_else(|| text("category"))
        .unwrap_or_else(|| String::from("unknown"));
    let message = text("error_message")
        .or_else(|| text("reason"))
        .unwrap_or_default();

    Some(ErrorObservation {
        at,
        instrument,
        error_type,
        message,
    })
}

fn summarize(tally: &WindowTally, start: OffsetDateTime, end: OffsetDateTime) -> ErrorSummary {
    let mut error_types: BTreeMap<String, usize> = BTreeMap::new();
    let mut messages: HashMap<&str, usize> = HashMap::new();
    for error in &tally.errors {
        *error_types.entry(error.error_type.clone()).or_default() += 1;
        *messages.entry(error.message.as_str()).or_default() += 1;
    }
    let most_common_error = messages
        .into_iter()
        .max_by(|left, right| left.1.cmp(&right.1).then_with(|| right.0.cmp(left.0)))
        .map(|(message, _)| message.to_owned())
        .unwrap_or_else(|| String::from("multiple error types detected"));

    ErrorSummary {
        total_errors: tally.errors.len(),
        total_attempted: tally.successes + tally.errors.len(),
        error_rate: tally.rate(),
        affected_instruments: tally
            .affected_instruments()
            .into_iter()
            .map(str::to_owned)
            .collect(),
        error_types,
        most_common_error,
        timeframe: format!(
            "{} to {}",
            UtcDateTime::from(start),
            UtcDateTime::from(end)
        ),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use barvault_warehouse::{FsStore, WriterConfig};
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<ErrorSummary>>,
    }

    impl AlertSink for RecordingSink {
        fn send<'a>(&'a self, summary: &'a ErrorSummary) -> AlertFuture<'a> {
            Box::pin(async move {
                self.sent.lock().expect("sink lock").push(summary.clone());
                Ok(())
            })
        }
    }

    struct FailingSink;

    impl AlertSink for FailingSink {
        fn send<'a>(&'a self, _summary: &'a ErrorSummary) -> AlertFuture<'a> {
            Box::pin(async { Err(AlertError::new("webhook down")) })
        }
    }

    async fn seed(store: &FsStore, successes: usize, errors: usize) {
        for index in 0..successes {
            let key = format!("historical/daily/S{index}/2024/01/2024-01-02.json");
            store.put(&key, &json!({"index": index})).await.expect("put success");
        }
        let now = UtcDateTime::now().format_rfc3339();
        for index in 0..errors {
            let key = format!("error_records/daily/E{index}/2024/01/2024-01-02.json");
            let entry = json!([{
                "instrument": format!("E{index}"),
                "error_timestamp": now,
                "error_message": "all sources failed",
                "error_type": "data_collection_failure",
            }]);
            store.put(&key, &entry).await.expect("put error");
        }
    }

    fn store(dir: &tempfile::TempDir) -> FsStore {
        FsStore::new(dir.path(), WriterConfig::default())
    }

    #[tokio::test]
    async fn three_in_a_hundred_exceeds_threshold_and_alerts_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        seed(&store, 97, 3).await;
        let sink = Arc::new(RecordingSink::default());
        let monitor =
            ErrorRateMonitor::new(Arc::new(store), MonitorConfig::default()).with_sink(sink.clone());

        let check = monitor.check_error_rate(None).await.expect("check");

        assert!((check.rate - 0.03).abs() < 1e-12);
        assert!(check.exceeded);
        assert_eq!(check.errors, 3);
        assert_eq!(check.successes, 97);
        let sent = sink.sent.lock().expect("sink lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].affected_instruments, vec!["E0", "E1", "E2"]);
        assert_eq!(sent[0].error_types.get("data_collection_failure"), Some(&3));
        assert_eq!(sent[0].most_common_error, "all sources failed");
    }

    #[tokio::test]
    async fn one_in_a_hundred_stays_quiet() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        seed(&store, 99, 1).await;
        let sink = Arc::new(RecordingSink::default());
        let monitor =
            ErrorRateMonitor::new(Arc::new(store), MonitorConfig::default()).with_sink(sink.clone());

        let check = monitor.check_error_rate(Some(24)).await.expect("check");

        assert!((check.rate - 0.01).abs() < 1e-12);
        assert!(!check.exceeded);
        assert!(check.details.is_none());
        assert!(sink.sent.lock().expect("sink lock").is_empty());
    }

    #[tokio::test]
    async fn empty_store_reports_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let monitor = ErrorRateMonitor::new(Arc::new(store(&dir)), MonitorConfig::default());

        let check = monitor.check_error_rate(None).await.expect("check");
        assert_eq!(check.rate, 0.0);
        assert!(!check.exceeded);
    }

    #[tokio::test]
    async fn old_errors_and_quarantine_entries_are_windowed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        seed(&store, 1, 0).await;
        let old = UtcDateTime::now()
            .minus(std::time::Duration::from_secs(48 * 3600))
            .format_rfc3339();
        store
            .put(
                "error_records/daily/OLD/2024/01/2024-01-02.json",
                &json!({"instrument": "OLD", "error_timestamp": old, "error_message": "x"}),
            )
            .await
            .expect("put old");
        store
            .put(
                "error_records/technical_validation/NEW/2024-01-02.json",
                &json!({
                    "original_record": {"instrument": "NEW"},
                    "reason": "technical_indicator_validation_failed",
                    "category": "technical_validation",
                    "moved_at": UtcDateTime::now().format_rfc3339(),
                }),
            )
            .await
            .expect("put quarantine");
        let monitor = ErrorRateMonitor::new(Arc::new(store), MonitorConfig::default())
            .with_sink(Arc::new(FailingSink));

        let check = monitor.check_error_rate(None).await.expect("check");

        assert_eq!(check.errors, 1);
        assert_eq!(check.successes, 1);
        let details = check.details.expect("details");
        assert_eq!(details.affected_instruments, vec!["NEW"]);
        assert_eq!(details.error_types.get("technical_validation"), Some(&1));
    }

    #[tokio::test]
    async fn trend_puts_todays_errors_in_recent_days() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        seed(&store, 9, 1).await;
        let monitor = ErrorRateMonitor::new(Arc::new(store), MonitorConfig::default());

        let report = monitor.trend(7).await.expect("trend");

        assert_eq!(report.daily.len(), 7);
        assert!((report.daily[6].error_rate - 0.1).abs() < 1e-12);
        assert_eq!(report.label, TrendLabel::Worsening);
        assert!((report.max_daily_rate - 0.1).abs() < 1e-12);
        assert_eq!(report.min_daily_rate, 0.0);
    }

    #[tokio::test]
    async fn windows_past_the_calendar_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let monitor = ErrorRateMonitor::new(Arc::new(store(&dir)), MonitorConfig::default());

        let err = monitor
            .check_error_rate(Some(u32::MAX))
            .await
            .expect_err("window before year -9999");
        assert_eq!(err.code(), "core.config");

        let err = monitor.trend(5_000_000).await.expect_err("trend before year -9999");
        assert_eq!(err.code(), "core.config");
        assert!(err.to_string().contains("5000000"), "{err}");
    }

    #[tokio::test]
    async fn quiet_history_is_stable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let monitor = ErrorRateMonitor::new(Arc::new(store(&dir)), MonitorConfig::default());

        let report = monitor.trend(5).await.expect("trend");
        assert_eq!(report.label, TrendLabel::Stable);
        assert_eq!(report.overall_mean, 0.0);
    }
}
