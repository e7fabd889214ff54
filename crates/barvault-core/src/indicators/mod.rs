//! Sliding-window technical indicators.
//!
//! | Module | Indicators |
//! |--------|------------|
//! | [`trend`] | SMA 50/200, EMA 12/26 |
//! | [`momentum`] | RSI 14, MACD 12/26/9 |
//! | [`volatility`] | Bollinger 20, ATR 14, rolling standard deviation |
//!
//! Every calculation returns one `Option<f64>` per input bar. A slot stays
//! `None` until its window is full; NaN and infinite results are dropped.

pub mod momentum;
pub mod trend;
pub mod volatility;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::data_source::PrecomputedAverageSource;
use crate::routing::HistoryFetcher;
use crate::{Bar, BarSeries, IndicatorSet, Symbol, TradeDate};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("bars out of chronological order at index {index}: {previous} followed by {current}")]
    ChronologicalOrder {
        index: usize,
        previous: TradeDate,
        current: TradeDate,
    },

    #[error("invalid indicator parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Indicator windows and cold-start settings.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorParams {
    pub rsi_window: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub sma_short: usize,
    pub sma_long: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub bollinger_window: usize,
    pub bollinger_std_devs: f64,
    pub atr_window: usize,
    pub volatility_window: usize,
    /// Fewer bars than this and nothing is computed.
    pub min_points: usize,
    /// Calendar days of history fetched before the earliest requested bar.
    pub history_days: i64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_window: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            sma_short: 50,
            sma_long: 200,
            ema_fast: 12,
            ema_slow: 26,
            bollinger_window: 20,
            bollinger_std_devs: 2.0,
            atr_window: 14,
            volatility_window: 20,
            min_points: 50,
            history_days: 250,
        }
    }
}

impl IndicatorParams {
    pub fn validate(&self) -> Result<(), IndicatorError> {
        let windows = [
            ("rsi_window", self.rsi_window),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("sma_short", self.sma_short),
            ("sma_long", self.sma_long),
            ("ema_fast", self.ema_fast),
            ("ema_slow", self.ema_slow),
            ("bollinger_window", self.bollinger_window),
            ("atr_window", self.atr_window),
        ];
        for (name, window) in windows {
            if window == 0 {
                return Err(IndicatorError::InvalidParameter {
                    name,
                    reason: String::from("window must be positive"),
                });
            }
        }
        if self.volatility_window < 2 {
            return Err(IndicatorError::InvalidParameter {
                name: "volatility_window",
                reason: String::from("sample deviation needs at least 2 points"),
            });
        }
        if self.macd_fast >= self.macd_slow {
            return Err(IndicatorError::InvalidParameter {
                name: "macd_fast",
                reason: format!("must be shorter than macd_slow ({})", self.macd_slow),
            });
        }
        if !self.bollinger_std_devs.is_finite() || self.bollinger_std_devs <= 0.0 {
            return Err(IndicatorError::InvalidParameter {
                name: "bollinger_std_devs",
                reason: format!("must be positive, got {}", self.bollinger_std_devs),
            });
        }
        if self.history_days < 0 {
            return Err(IndicatorError::InvalidParameter {
                name: "history_days",
                reason: String::from("must not be negative"),
            });
        }
        Ok(())
    }
}

/// One bar with its indicators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorRow {
    pub bar: Bar,
    pub indicators: IndicatorSet,
    /// Set whenever `indicators.sma_200` is.
    pub sma_200_source: Option<Sma200Source>,
}

/// A bar series with indicators attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorFrame {
    pub instrument: Symbol,
    pub rows: Vec<IndicatorRow>,
    /// `false` when the series was too short to compute anything.
    pub calculated: bool,
    /// Closes of the full series the indicators were computed over, history
    /// included. Feeds the SMA-200 fallback.
    #[serde(skip)]
    pub closes: Vec<f64>,
}

impl IndicatorFrame {
    fn uncalculated(series: &BarSeries) -> Self {
        Self {
            instrument: series.instrument.clone(),
            rows: series
                .bars
                .iter()
                .map(|bar| IndicatorRow {
                    bar: bar.clone(),
                    indicators: IndicatorSet::default(),
                    sma_200_source: None,
                })
                .collect(),
            calculated: false,
            closes: series.bars.iter().map(|bar| bar.close).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn missing_sma_200(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.indicators.sma_200.is_none())
            .count()
    }
}

/// Where a record's SMA-200 came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sma200Source {
    /// The rolling 200-bar window ending at the row.
    Rolling,
    /// Back-filled: mean of the trailing 200 closes, history included.
    TrailingMean,
    /// Back-filled: average published by a provider.
    Published,
}

/// Computes [`IndicatorSet`]s over chronologically ordered bars.
#[derive(Clone)]
pub struct IndicatorEngine {
    params: IndicatorParams,
    averages: Option<Arc<dyn PrecomputedAverageSource>>,
}

impl std::fmt::Debug for IndicatorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorEngine")
            .field("params", &self.params)
            .field("averages", &self.averages.is_some())
            .finish()
    }
}

impl IndicatorEngine {
    pub fn new(params: IndicatorParams) -> Result<Self, IndicatorError> {
        params.validate()?;
        Ok(Self {
            params,
            averages: None,
        })
    }

    /// Source consulted by [`Self::fill_missing_sma_200`] when local history
    /// is too short.
    pub fn with_average_source(mut self, averages: Arc<dyn PrecomputedAverageSource>) -> Self {
        self.averages = Some(averages);
        self
    }

    pub fn params(&self) -> &IndicatorParams {
        &self.params
    }

    /// Computes indicators for every bar of `series`.
    ///
    /// Dates must be strictly increasing; anything else is rejected before
    /// computation. Fewer than `min_points` bars returns the bars unchanged
    /// with `calculated = false`.
    pub fn compute(&self, series: &BarSeries) -> Result<IndicatorFrame, IndicatorError> {
        if let Some((index, previous, current)) = series.first_order_violation() {
            error!(
                instrument = %series.instrument,
                index,
                %previous,
                %current,
                "bars out of chronological order"
            );
            return Err(IndicatorError::ChronologicalOrder {
                index,
                previous,
                current,
            });
        }

        if series.len() < self.params.min_points {
            debug!(
                instrument = %series.instrument,
                bars = series.len(),
                required = self.params.min_points,
                "insufficient bars for indicators"
            );
            return Ok(IndicatorFrame::uncalculated(series));
        }

        let closes: Vec<f64> = series.bars.iter().map(|bar| bar.close).collect();
        let highs: Vec<f64> = series.bars.iter().map(|bar| bar.high).collect();
        let lows: Vec<f64> = series.bars.iter().map(|bar| bar.low).collect();
        let p = &self.params;

        let rsi = momentum::rsi(&closes, p.rsi_window);
        let macd = momentum::macd(&closes, p.macd_fast, p.macd_slow, p.macd_signal);
        let sma_short = trend::sma(&closes, p.sma_short);
        let sma_long = trend::sma(&closes, p.sma_long);
        let ema_fast = trend::ema(&closes, p.ema_fast);
        let ema_slow = trend::ema(&closes, p.ema_slow);
        let bands = volatility::bollinger(&closes, p.bollinger_window, p.bollinger_std_devs);
        let atr = volatility::atr(&highs, &lows, &closes, p.atr_window);
        let deviation = volatility::rolling_std(&closes, p.volatility_window, 1);

        let rows = series
            .bars
            .iter()
            .enumerate()
            .map(|(index, bar)| IndicatorRow {
                bar: bar.clone(),
                indicators: IndicatorSet {
                    rsi_14: rsi[index],
                    macd_line: macd.line[index],
                    macd_signal: macd.signal[index],
                    macd_histogram: macd.histogram[index],
                    sma_50: sma_short[index],
                    sma_200: sma_long[index],
                    ema_12: ema_fast[index],
                    ema_26: ema_slow[index],
                    bb_upper: bands.upper[index],
                    bb_middle: bands.middle[index],
                    bb_lower: bands.lower[index],
                    atr_14: atr[index],
                    volatility: deviation[index],
                },
                sma_200_source: sma_long[index].map(|_| Sma200Source::Rolling),
            })
            .collect();

        debug!(instrument = %series.instrument, bars = series.len(), "indicators computed");
        Ok(IndicatorFrame {
            instrument: series.instrument.clone(),
            rows,
            calculated: true,
            closes,
        })
    }

    /// Extends `series` with up to `history_days` of earlier bars, computes
    /// over the extended series and returns only the requested dates.
    ///
    /// A failed history fetch degrades to [`Self::compute`] on the current
    /// series alone.
    pub async fn compute_with_history(
        &self,
        series: &BarSeries,
        fetcher: &dyn HistoryFetcher,
    ) -> Result<IndicatorFrame, IndicatorError> {
        let Some(earliest) = series.earliest() else {
            return self.compute(series);
        };
        if let Some((index, previous, current)) = series.first_order_violation() {
            error!(instrument = %series.instrument, index, %previous, %current, "bars out of chronological order");
            return Err(IndicatorError::ChronologicalOrder {
                index,
                previous,
                current,
            });
        }

        let history_start = earliest.minus_days(self.params.history_days);
        let history = match fetcher
            .fetch_history(&series.instrument, history_start, earliest)
            .await
        {
            Ok(history) => history,
            Err(error) => {
                warn!(
                    instrument = %series.instrument,
                    error = %error,
                    "history fetch failed; computing over current bars only"
                );
                return self.compute(series);
            }
        };

        let earlier = history
            .bars
            .into_iter()
            .filter(|bar| bar.instrument == series.instrument && bar.date <= earliest)
            .collect::<Vec<_>>();
        let extended = series.merged_with_history(earlier);
        debug!(
            instrument = %series.instrument,
            requested = series.len(),
            extended = extended.len(),
            "history merged"
        );

        let requested: HashSet<TradeDate> = series.bars.iter().map(|bar| bar.date).collect();
        let mut frame = self.compute(&extended)?;
        frame.rows.retain(|row| requested.contains(&row.bar.date));
        Ok(frame)
    }

    /// Back-fills `sma_200` on calculated rows that lack it.
    ///
    /// Tries the mean of the trailing 200 computed closes, then the published
    /// average. Only positive values are accepted; otherwise the rows keep
    /// `None` for the validator to quarantine.
    pub async fn fill_missing_sma_200(&self, frame: &mut IndicatorFrame) -> Option<Sma200Source> {
        if !frame.calculated || frame.missing_sma_200() == 0 {
            return None;
        }

        let window = self.params.sma_long;
        let (value, source) = if let Some(value) = trailing_mean(frame, window) {
            (value, Sma200Source::TrailingMean)
        } else if let Some(value) = self.published_average(&frame.instrument, window).await {
            (value, Sma200Source::Published)
        } else {
            warn!(
                instrument = %frame.instrument,
                missing = frame.missing_sma_200(),
                "sma_200 unavailable after all fallbacks"
            );
            return None;
        };

        let mut filled = 0_usize;
        for row in frame.rows.iter_mut().filter(|row| row.indicators.sma_200.is_none()) {
            row.indicators.sma_200 = Some(value);
            row.sma_200_source = Some(source);
            filled += 1;
        }
        info!(instrument = %frame.instrument, sma_200 = value, ?source, filled, "sma_200 back-filled");
        Some(source)
    }

    async fn published_average(&self, instrument: &Symbol, window: usize) -> Option<f64> {
        let averages = self.averages.as_ref()?;
        match averages.get_average(instrument, window).await {
            Ok(value) => value.filter(|value| value.is_finite() && *value > 0.0),
            Err(error) => {
                warn!(instrument = %instrument, error = %error, "published average lookup failed");
                None
            }
        }
    }
}

fn trailing_mean(frame: &IndicatorFrame, window: usize) -> Option<f64> {
    let closes = &frame.closes;
    if window == 0 || closes.len() < window {
        return None;
    }
    let mean = closes[closes.len() - window..].iter().sum::<f64>() / window as f64;
    (mean.is_finite() && mean > 0.0).then_some(mean)
}

#[cfg(test)]
pub(crate) fn assert_approx(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "assert_approx failed: actual={actual}, expected={expected}"
    );
}
