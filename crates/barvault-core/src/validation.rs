//! Indicator bounds and consistency checks.
//!
//! [`QualityValidator::validate_batch`] splits records into a valid set and
//! quarantine candidates. Nothing is corrected automatically;
//! [`QualityValidator::clamp_to_bounds`] is an operator tool.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{ProcessingStatus, Record, Symbol, TradeDate, UtcDateTime};

const RECENT_LIMIT: usize = 10;

/// Inclusive range, optionally open at the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
    /// When set, `min` itself is outside the range.
    #[serde(default)]
    pub exclusive_min: bool,
}

impl Bound {
    pub const fn closed(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            exclusive_min: false,
        }
    }

    /// Strictly positive values.
    pub const fn positive() -> Self {
        Self {
            min: 0.0,
            max: f64::INFINITY,
            exclusive_min: true,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        let above = if self.exclusive_min {
            value > self.min
        } else {
            value >= self.min
        };
        above && value <= self.max
    }
}

/// Absolute bounds per indicator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorBounds {
    pub rsi_14: Bound,
    pub macd_line: Bound,
    pub macd_signal: Bound,
    pub macd_histogram: Bound,
    /// Averages, bands and ATR.
    pub price_level: Bound,
    pub volatility: Bound,
}

impl Default for IndicatorBounds {
    fn default() -> Self {
        Self {
            rsi_14: Bound::closed(0.0, 100.0),
            macd_line: Bound::closed(-50.0, 50.0),
            macd_signal: Bound::closed(-50.0, 50.0),
            macd_histogram: Bound::closed(-25.0, 25.0),
            price_level: Bound::positive(),
            volatility: Bound::closed(0.0, 100.0),
        }
    }
}

impl IndicatorBounds {
    pub fn for_indicator(&self, name: &str) -> Option<Bound> {
        match name {
            "rsi_14" => Some(self.rsi_14),
            "macd_line" => Some(self.macd_line),
            "macd_signal" => Some(self.macd_signal),
            "macd_histogram" => Some(self.macd_histogram),
            "sma_50" | "sma_200" | "ema_12" | "ema_26" | "bb_upper" | "bb_middle"
            | "bb_lower" | "atr_14" => Some(self.price_level),
            "volatility" => Some(self.volatility),
            _ => None,
        }
    }
}

/// Allowed `value / close` windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRelativeBounds {
    pub sma_50: Bound,
    pub sma_200: Bound,
    pub ema_12: Bound,
    pub ema_26: Bound,
    pub bb_upper: Bound,
    pub bb_middle: Bound,
    pub bb_lower: Bound,
}

impl Default for PriceRelativeBounds {
    fn default() -> Self {
        Self {
            sma_50: Bound::closed(0.4, 2.5),
            sma_200: Bound::closed(0.2, 4.0),
            ema_12: Bound::closed(0.7, 1.4),
            ema_26: Bound::closed(0.6, 1.5),
            bb_upper: Bound::closed(0.9, 2.0),
            bb_middle: Bound::closed(0.7, 1.4),
            bb_lower: Bound::closed(0.3, 1.2),
        }
    }
}

impl PriceRelativeBounds {
    pub fn for_indicator(&self, name: &str) -> Option<Bound> {
        match name {
            "sma_50" => Some(self.sma_50),
            "sma_200" => Some(self.sma_200),
            "ema_12" => Some(self.ema_12),
            "ema_26" => Some(self.ema_26),
            "bb_upper" => Some(self.bb_upper),
            "bb_middle" => Some(self.bb_middle),
            "bb_lower" => Some(self.bb_lower),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub indicator_bounds: IndicatorBounds,
    pub price_relative: PriceRelativeBounds,
    /// Treat an absent `sma_200` on a calculated record as a violation.
    pub require_sma_200: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            indicator_bounds: IndicatorBounds::default(),
            price_relative: PriceRelativeBounds::default(),
            require_sma_200: true,
        }
    }
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Violation {
    AbsoluteBounds {
        indicator: String,
        value: f64,
        min: f64,
        max: f64,
    },
    PriceRelative {
        indicator: String,
        value: f64,
        price: f64,
        ratio: f64,
        min_ratio: f64,
        max_ratio: f64,
    },
    NonFinite {
        field: String,
    },
    BandOrder {
        upper: f64,
        middle: f64,
        lower: f64,
    },
    /// `high` below the body or `low` above it.
    PriceEnvelope {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
    MissingCriticalIndicator {
        indicator: String,
    },
}

impl Violation {
    /// Name used for frequency counting.
    pub fn subject(&self) -> &str {
        match self {
            Self::AbsoluteBounds { indicator, .. }
            | Self::PriceRelative { indicator, .. }
            | Self::MissingCriticalIndicator { indicator } => indicator,
            Self::NonFinite { field } => field,
            Self::BandOrder { .. } => "bollinger_bands",
            Self::PriceEnvelope { .. } => "ohlc",
        }
    }

    /// Errors that point at a broken calculation rather than unusual data.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::NonFinite { .. } | Self::BandOrder { .. } | Self::PriceEnvelope { .. }
        )
    }
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AbsoluteBounds {
                indicator,
                value,
                min,
                max,
            } => write!(f, "{indicator}={value:.2} outside bounds [{min}, {max}]"),
            Self::PriceRelative {
                indicator,
                value,
                price,
                ratio,
                ..
            } => write!(
                f,
                "{indicator}={value:.2} unusual ratio {ratio:.2} to price {price:.2}"
            ),
            Self::NonFinite { field } => write!(f, "{field} is not finite"),
            Self::BandOrder {
                upper,
                middle,
                lower,
            } => write!(
                f,
                "bollinger band order violated: upper={upper:.2}, middle={middle:.2}, lower={lower:.2}"
            ),
            Self::PriceEnvelope {
                open,
                high,
                low,
                close,
            } => write!(
                f,
                "price envelope violated: open={open:.2}, high={high:.2}, low={low:.2}, close={close:.2}"
            ),
            Self::MissingCriticalIndicator { indicator } => {
                write!(f, "critical indicator {indicator} is missing")
            }
        }
    }
}

/// Where a rejected record is filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineCategory {
    TechnicalValidation,
    MissingIndicators,
}

impl QuarantineCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TechnicalValidation => "technical_validation",
            Self::MissingIndicators => "missing_indicators",
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            Self::TechnicalValidation => "technical_indicator_validation_failed",
            Self::MissingIndicators => "missing_sma_200",
        }
    }

    /// Missing-indicator quarantine only when nothing else is wrong.
    pub fn for_violations(violations: &[Violation]) -> Self {
        let only_missing = violations
            .iter()
            .all(|violation| matches!(violation, Violation::MissingCriticalIndicator { .. }));
        if only_missing && !violations.is_empty() {
            Self::MissingIndicators
        } else {
            Self::TechnicalValidation
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub violations: Vec<Violation>,
}

/// A record that failed validation, with what it failed.
#[derive(Debug, Clone, PartialEq)]
pub struct QuarantineCandidate {
    pub record: Record,
    pub violations: Vec<Violation>,
    pub category: QuarantineCategory,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchValidation {
    pub valid: Vec<Record>,
    pub quarantined: Vec<QuarantineCandidate>,
}

/// One value changed by [`QualityValidator::clamp_to_bounds`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub indicator: String,
    pub from: Option<f64>,
    pub to: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationLogEntry {
    pub timestamp: UtcDateTime,
    pub instrument: Symbol,
    pub date: TradeDate,
    pub violations: Vec<String>,
}

/// Validation activity since the validator was created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub records_checked: u64,
    pub records_rejected: u64,
    pub total_violations: u64,
    pub frequency: BTreeMap<String, u64>,
    pub recent_violations: Vec<ViolationLogEntry>,
    pub most_common_issue: Option<String>,
    pub generated_at: UtcDateTime,
}

#[derive(Debug, Default)]
struct ViolationLog {
    records_checked: u64,
    records_rejected: u64,
    total_violations: u64,
    frequency: BTreeMap<String, u64>,
    recent: VecDeque<ViolationLogEntry>,
}

/// Checks records against [`ValidatorConfig`] and keeps a violation log.
#[derive(Debug, Default)]
pub struct QualityValidator {
    config: ValidatorConfig,
    log: Mutex<ViolationLog>,
}

impl QualityValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            log: Mutex::new(ViolationLog::default()),
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ViolationLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs every check on `record` without touching it.
    pub fn check(&self, record: &Record) -> Vec<Violation> {
        let mut violations = Vec::new();
        let close = record.close();

        for (field, value) in [
            ("open", record.bar.open),
            ("high", record.bar.high),
            ("low", record.bar.low),
            ("close", close),
        ] {
            if !value.is_finite() {
                violations.push(Violation::NonFinite {
                    field: field.to_owned(),
                });
            }
        }
        let bar = &record.bar;
        if violations.is_empty() && !bar.is_plausible() {
            violations.push(Violation::PriceEnvelope {
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
            });
        }
        if let Some(fundamentals) = &record.fundamentals {
            for (field, value) in fundamentals.fields() {
                if value.is_some_and(|value| !value.is_finite()) {
                    violations.push(Violation::NonFinite {
                        field: field.to_owned(),
                    });
                }
            }
        }

        for (name, value) in record.indicators.fields() {
            let Some(value) = value else {
                continue;
            };
            if !value.is_finite() {
                violations.push(Violation::NonFinite {
                    field: name.to_owned(),
                });
                continue;
            }

            if let Some(bound) = self.config.indicator_bounds.for_indicator(name) {
                if !bound.contains(value) {
                    violations.push(Violation::AbsoluteBounds {
                        indicator: name.to_owned(),
                        value,
                        min: bound.min,
                        max: bound.max,
                    });
                }
            }

            if close.is_finite() && close > 0.0 {
                if let Some(window) = self.config.price_relative.for_indicator(name) {
                    let ratio = value / close;
                    if !window.contains(ratio) {
                        violations.push(Violation::PriceRelative {
                            indicator: name.to_owned(),
                            value,
                            price: close,
                            ratio,
                            min_ratio: window.min,
                            max_ratio: window.max,
                        });
                    }
                }
            }
        }

        let indicators = &record.indicators;
        if let (Some(upper), Some(middle), Some(lower)) =
            (indicators.bb_upper, indicators.bb_middle, indicators.bb_lower)
        {
            let finite = upper.is_finite() && middle.is_finite() && lower.is_finite();
            if finite && !(upper > middle && middle > lower) {
                violations.push(Violation::BandOrder {
                    upper,
                    middle,
                    lower,
                });
            }
        }

        if self.config.require_sma_200
            && record.metadata.indicators_calculated
            && indicators.sma_200.is_none()
        {
            violations.push(Violation::MissingCriticalIndicator {
                indicator: String::from("sma_200"),
            });
        }

        violations
    }

    /// Checks `record` and logs any violations.
    pub fn validate(&self, record: &Record) -> ValidationOutcome {
        let violations = self.check(record);
        self.note(record, &violations);
        ValidationOutcome {
            ok: violations.is_empty(),
            violations,
        }
    }

    /// Splits `records` into valid records and quarantine candidates.
    ///
    /// Valid records move to `validated`; rejected ones to `quarantined`
    /// with the violations as their error message.
    pub fn validate_batch(&self, records: Vec<Record>) -> BatchValidation {
        let total = records.len();
        let mut batch = BatchValidation::default();

        for mut record in records {
            let outcome = self.validate(&record);
            if outcome.ok {
                record.set_status(ProcessingStatus::Validated);
                batch.valid.push(record);
                continue;
            }

            let message = outcome
                .violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            record.metadata.error_message = Some(message);
            record.set_status(ProcessingStatus::Quarantined);
            batch.quarantined.push(QuarantineCandidate {
                category: QuarantineCategory::for_violations(&outcome.violations),
                violations: outcome.violations,
                record,
            });
        }

        info!(
            total,
            valid = batch.valid.len(),
            quarantined = batch.quarantined.len(),
            "batch validation completed"
        );
        batch
    }

    fn note(&self, record: &Record, violations: &[Violation]) {
        let mut log = self.lock();
        log.records_checked += 1;
        if violations.is_empty() {
            return;
        }

        warn!(
            instrument = %record.instrument(),
            date = %record.date(),
            violations = violations.len(),
            first = %violations[0],
            "indicator validation failed"
        );
        log.records_rejected += 1;
        log.total_violations += violations.len() as u64;
        for violation in violations {
            *log.frequency.entry(violation.subject().to_owned()).or_default() += 1;
        }
        if log.recent.len() == RECENT_LIMIT {
            log.recent.pop_front();
        }
        log.recent.push_back(ViolationLogEntry {
            timestamp: UtcDateTime::now(),
            instrument: record.instrument().clone(),
            date: record.date(),
            violations: violations.iter().map(ToString::to_string).collect(),
        });
    }

    /// Clamps each indicator into its absolute bound and rebuilds a broken
    /// band order around the middle band.
    ///
    /// A price-level value at or below zero has no valid clamp target and is
    /// cleared instead.
    pub fn clamp_to_bounds(&self, record: &Record) -> (Record, Vec<Correction>) {
        let mut clamped = record.clone();
        let mut corrections = Vec::new();

        for (name, slot) in clamped.indicators.fields_mut() {
            let Some(value) = *slot else {
                continue;
            };
            let Some(bound) = self.config.indicator_bounds.for_indicator(name) else {
                continue;
            };
            if bound.contains(value) {
                continue;
            }

            let replacement = if !value.is_finite() || (bound.exclusive_min && value <= bound.min) {
                None
            } else {
                Some(value.clamp(bound.min, bound.max))
            };
            corrections.push(Correction {
                indicator: name.to_owned(),
                from: Some(value),
                to: replacement,
            });
            *slot = replacement;
        }

        let indicators = &mut clamped.indicators;
        if let (Some(upper), Some(middle), Some(lower)) =
            (indicators.bb_upper, indicators.bb_middle, indicators.bb_lower)
        {
            if !(upper > middle && middle > lower) {
                let width = (upper - lower).abs() / 4.0;
                indicators.bb_upper = Some(middle + width);
                indicators.bb_lower = Some(middle - width);
                corrections.push(Correction {
                    indicator: String::from("bb_upper"),
                    from: Some(upper),
                    to: indicators.bb_upper,
                });
                corrections.push(Correction {
                    indicator: String::from("bb_lower"),
                    from: Some(lower),
                    to: indicators.bb_lower,
                });
            }
        }

        if !corrections.is_empty() {
            info!(
                instrument = %record.instrument(),
                date = %record.date(),
                corrections = corrections.len(),
                "indicators clamped"
            );
        }
        (clamped, corrections)
    }

    /// Strict mode rejects on any violation. Otherwise only non-finite
    /// values, broken band order or an RSI far outside `[0, 100]` reject.
    pub fn should_reject(violations: &[Violation], strict: bool) -> bool {
        if strict {
            return !violations.is_empty();
        }
        violations.iter().any(|violation| match violation {
            Violation::AbsoluteBounds {
                indicator, value, ..
            } if indicator == "rsi_14" => !(-10.0..=110.0).contains(value),
            other => other.is_critical(),
        })
    }

    pub fn report(&self) -> ValidationReport {
        let log = self.lock();
        let most_common_issue = log
            .frequency
            .iter()
            .max_by(|left, right| left.1.cmp(right.1).then_with(|| right.0.cmp(left.0)))
            .map(|(subject, _)| subject.clone());

        ValidationReport {
            records_checked: log.records_checked,
            records_rejected: log.records_rejected,
            total_violations: log.total_violations,
            frequency: log.frequency.clone(),
            recent_violations: log.recent.iter().cloned().collect(),
            most_common_issue,
            generated_at: UtcDateTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bar, IndicatorSet, Provenance, ProviderId};

    fn record(close: f64, indicators: IndicatorSet) -> Record {
        let bar = Bar::new(
            Symbol::parse("NVDA").expect("symbol"),
            TradeDate::parse("2024-03-01").expect("date"),
            close,
            close + 2.0,
            close - 2.0,
            close,
            5_000,
            Provenance::now(ProviderId::Alpaca),
        )
        .expect("bar");
        let mut record = Record::collected(bar, Some(String::from("job-1")));
        record.indicators = indicators;
        record.metadata.indicators_calculated = true;
        record
    }

    fn healthy(close: f64) -> IndicatorSet {
        IndicatorSet {
            rsi_14: Some(55.0),
            macd_line: Some(1.2),
            macd_signal: Some(0.9),
            macd_histogram: Some(0.3),
            sma_50: Some(close * 0.98),
            sma_200: Some(close * 0.9),
            ema_12: Some(close * 1.01),
            ema_26: Some(close),
            bb_upper: Some(close * 1.05),
            bb_middle: Some(close),
            bb_lower: Some(close * 0.95),
            atr_14: Some(2.5),
            volatility: Some(3.1),
        }
    }

    #[test]
    fn healthy_record_has_no_violations() {
        let validator = QualityValidator::default();
        let outcome = validator.validate(&record(100.0, healthy(100.0)));

        assert!(outcome.ok, "unexpected violations: {:?}", outcome.violations);
    }

    #[test]
    fn rsi_outside_range_is_flagged() {
        let validator = QualityValidator::default();
        let indicators = IndicatorSet {
            rsi_14: Some(104.0),
            ..healthy(100.0)
        };

        let outcome = validator.validate(&record(100.0, indicators));
        assert!(!outcome.ok);
        assert!(matches!(
            &outcome.violations[0],
            Violation::AbsoluteBounds { indicator, .. } if indicator == "rsi_14"
        ));
    }

    #[test]
    fn inverted_bands_are_a_logical_violation() {
        let validator = QualityValidator::default();
        let indicators = IndicatorSet {
            bb_upper: Some(99.0),
            bb_lower: Some(101.0),
            ..healthy(100.0)
        };

        let violations = validator.check(&record(100.0, indicators));
        assert!(violations
            .iter()
            .any(|violation| matches!(violation, Violation::BandOrder { .. })));
    }

    #[test]
    fn price_relative_windows_are_configurable() {
        let indicators = IndicatorSet {
            ema_12: Some(150.0),
            ..healthy(100.0)
        };
        let strict = QualityValidator::default();
        assert!(!strict.validate(&record(100.0, indicators)).ok);

        let relaxed = QualityValidator::new(ValidatorConfig {
            price_relative: PriceRelativeBounds {
                ema_12: Bound::closed(0.5, 2.0),
                ..PriceRelativeBounds::default()
            },
            ..ValidatorConfig::default()
        });
        assert!(relaxed.validate(&record(100.0, indicators)).ok);
    }

    #[test]
    fn non_finite_indicator_is_critical() {
        let indicators = IndicatorSet {
            atr_14: Some(f64::NAN),
            ..healthy(100.0)
        };
        let violations = QualityValidator::default().check(&record(100.0, indicators));

        assert_eq!(
            violations,
            vec![Violation::NonFinite {
                field: String::from("atr_14")
            }]
        );
        assert!(QualityValidator::should_reject(&violations, false));
    }

    #[test]
    fn high_below_close_is_quarantined_as_technical() {
        let validator = QualityValidator::default();
        let mut broken = record(100.0, healthy(100.0));
        broken.bar.high = 99.0;

        let batch = validator.validate_batch(vec![broken]);

        assert!(batch.valid.is_empty());
        let candidate = &batch.quarantined[0];
        assert_eq!(candidate.category, QuarantineCategory::TechnicalValidation);
        assert!(matches!(
            candidate.violations[0],
            Violation::PriceEnvelope { high, close, .. } if high < close
        ));
    }

    #[test]
    fn missing_sma_200_routes_to_missing_indicators() {
        let validator = QualityValidator::default();
        let indicators = IndicatorSet {
            sma_200: None,
            ..healthy(100.0)
        };

        let batch = validator.validate_batch(vec![
            record(100.0, healthy(100.0)),
            record(100.0, indicators),
        ]);

        assert_eq!(batch.valid.len(), 1);
        assert_eq!(batch.valid[0].metadata.status, ProcessingStatus::Validated);
        assert_eq!(batch.quarantined.len(), 1);
        let candidate = &batch.quarantined[0];
        assert_eq!(candidate.category, QuarantineCategory::MissingIndicators);
        assert_eq!(candidate.record.metadata.status, ProcessingStatus::Quarantined);
        assert!(candidate.record.metadata.error_message.is_some());
    }

    #[test]
    fn uncalculated_record_does_not_need_sma_200() {
        let mut record = record(100.0, IndicatorSet::default());
        record.metadata.indicators_calculated = false;

        assert!(QualityValidator::default().validate(&record).ok);
    }

    #[test]
    fn clamp_pulls_values_into_bounds_and_reorders_bands() {
        let validator = QualityValidator::default();
        let indicators = IndicatorSet {
            rsi_14: Some(120.0),
            sma_50: Some(-3.0),
            bb_upper: Some(96.0),
            bb_middle: Some(100.0),
            bb_lower: Some(104.0),
            ..healthy(100.0)
        };

        let (clamped, corrections) = validator.clamp_to_bounds(&record(100.0, indicators));

        assert_eq!(clamped.indicators.rsi_14, Some(100.0));
        assert_eq!(clamped.indicators.sma_50, None);
        assert_eq!(clamped.indicators.bb_upper, Some(102.0));
        assert_eq!(clamped.indicators.bb_lower, Some(98.0));
        assert_eq!(corrections.len(), 4);
    }

    #[test]
    fn lenient_rejection_ignores_unusual_ratios() {
        let ratio = vec![Violation::PriceRelative {
            indicator: String::from("sma_50"),
            value: 10.0,
            price: 100.0,
            ratio: 0.1,
            min_ratio: 0.4,
            max_ratio: 2.5,
        }];
        assert!(QualityValidator::should_reject(&ratio, true));
        assert!(!QualityValidator::should_reject(&ratio, false));

        let wild_rsi = vec![Violation::AbsoluteBounds {
            indicator: String::from("rsi_14"),
            value: 130.0,
            min: 0.0,
            max: 100.0,
        }];
        assert!(QualityValidator::should_reject(&wild_rsi, false));
    }

    #[test]
    fn report_tracks_frequency_and_recent_entries() {
        let validator = QualityValidator::default();
        for _ in 0..12 {
            let indicators = IndicatorSet {
                rsi_14: Some(-5.0),
                ..healthy(100.0)
            };
            validator.validate(&record(100.0, indicators));
        }
        validator.validate(&record(100.0, healthy(100.0)));

        let report = validator.report();
        assert_eq!(report.records_checked, 13);
        assert_eq!(report.records_rejected, 12);
        assert_eq!(report.frequency.get("rsi_14"), Some(&12));
        assert_eq!(report.recent_violations.len(), 10);
        assert_eq!(report.most_common_issue.as_deref(), Some("rsi_14"));
    }
}
