use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ProviderId, Symbol, TradeDate, UtcDateTime, ValidationError};

/// Where and when a bar was fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: ProviderId,
    pub fetched_at: UtcDateTime,
}

impl Provenance {
    pub fn now(source: ProviderId) -> Self {
        Self {
            source,
            fetched_at: UtcDateTime::now(),
        }
    }
}

/// One daily OHLCV observation.
///
/// Construction only checks that prices are finite. OHLC consistency is a
/// data-quality question answered by the source gate and the validator, so an
/// inconsistent bar is representable and gets routed rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: Symbol,
    pub date: TradeDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub provenance: Provenance,
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instrument: Symbol,
        date: TradeDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
        provenance: Provenance,
    ) -> Result<Self, ValidationError> {
        validate_finite("open", open)?;
        validate_finite("high", high)?;
        validate_finite("low", low)?;
        validate_finite("close", close)?;

        Ok(Self {
            instrument,
            date,
            open,
            high,
            low,
            close,
            volume,
            provenance,
        })
    }

    /// At least one positive price and the high/low envelope holds.
    pub fn is_plausible(&self) -> bool {
        let any_positive = [self.open, self.high, self.low, self.close]
            .iter()
            .any(|price| *price > 0.0);
        any_positive
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
    }
}

/// Daily bars for one instrument, as returned by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    pub instrument: Symbol,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(instrument: Symbol, bars: Vec<Bar>) -> Self {
        Self { instrument, bars }
    }

    pub fn empty(instrument: Symbol) -> Self {
        Self::new(instrument, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn earliest(&self) -> Option<TradeDate> {
        self.bars.iter().map(|bar| bar.date).min()
    }

    pub fn latest(&self) -> Option<TradeDate> {
        self.bars.iter().map(|bar| bar.date).max()
    }

    /// Share of bars passing [`Bar::is_plausible`]; `0.0` for an empty series.
    pub fn plausible_ratio(&self) -> f64 {
        if self.bars.is_empty() {
            return 0.0;
        }
        let plausible = self.bars.iter().filter(|bar| bar.is_plausible()).count();
        plausible as f64 / self.bars.len() as f64
    }

    /// First index whose date does not strictly follow its predecessor.
    pub fn first_order_violation(&self) -> Option<(usize, TradeDate, TradeDate)> {
        self.bars
            .windows(2)
            .enumerate()
            .find(|(_, pair)| pair[1].date <= pair[0].date)
            .map(|(index, pair)| (index + 1, pair[0].date, pair[1].date))
    }

    /// Sorts by date and drops repeated dates, keeping the last occurrence.
    pub fn into_chronological(self) -> Self {
        let mut by_date = BTreeMap::new();
        for bar in self.bars {
            by_date.insert(bar.date, bar);
        }
        Self::new(self.instrument, by_date.into_values().collect())
    }

    /// Merges older history under the current bars. On a shared date the
    /// current bar wins. The result is sorted by date.
    pub fn merged_with_history(&self, history: Vec<Bar>) -> Self {
        let mut by_date = BTreeMap::new();
        for bar in history {
            by_date.insert(bar.date, bar);
        }
        for bar in &self.bars {
            by_date.insert(bar.date, bar.clone());
        }
        Self::new(self.instrument.clone(), by_date.into_values().collect())
    }

    /// Keeps bars whose date falls in `[start, end]`.
    pub fn within(&self, start: TradeDate, end: TradeDate) -> Self {
        Self::new(
            self.instrument.clone(),
            self.bars
                .iter()
                .filter(|bar| bar.date >= start && bar.date <= end)
                .cloned()
                .collect(),
        )
    }
}

/// Point-in-time fundamentals, attached to every bar of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundamentalSnapshot {
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub roe_percent: Option<f64>,
    pub current_ratio: Option<f64>,
    pub operating_margin_percent: Option<f64>,
    pub revenue_growth_percent: Option<f64>,
    pub profit_margin_percent: Option<f64>,
    pub dividend_yield_percent: Option<f64>,
    pub book_value: Option<f64>,
}

impl FundamentalSnapshot {
    /// Named fields in a stable order.
    pub fn fields(&self) -> [(&'static str, Option<f64>); 10] {
        [
            ("market_cap", self.market_cap),
            ("pe_ratio", self.pe_ratio),
            ("debt_to_equity", self.debt_to_equity),
            ("roe_percent", self.roe_percent),
            ("current_ratio", self.current_ratio),
            ("operating_margin_percent", self.operating_margin_percent),
            ("revenue_growth_percent", self.revenue_growth_percent),
            ("profit_margin_percent", self.profit_margin_percent),
            ("dividend_yield_percent", self.dividend_yield_percent),
            ("book_value", self.book_value),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, value)| value.is_none())
    }

    /// Drops NaN and infinite values.
    pub fn sanitized(mut self) -> Self {
        for slot in [
            &mut self.market_cap,
            &mut self.pe_ratio,
            &mut self.debt_to_equity,
            &mut self.roe_percent,
            &mut self.current_ratio,
            &mut self.operating_margin_percent,
            &mut self.revenue_growth_percent,
            &mut self.profit_margin_percent,
            &mut self.dividend_yield_percent,
            &mut self.book_value,
        ] {
            *slot = slot.filter(|value| value.is_finite());
        }
        self
    }
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn bar(day: time::Date, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(
            Symbol::parse("AAPL").expect("symbol"),
            TradeDate::new(day),
            open,
            high,
            low,
            close,
            1_000,
            Provenance::now(ProviderId::Alpaca),
        )
        .expect("finite bar")
    }

    #[test]
    fn inconsistent_bar_is_representable_but_implausible() {
        let bar = bar(date!(2024 - 01 - 02), 10.0, 11.0, 9.0, 12.0);
        assert!(!bar.is_plausible());
    }

    #[test]
    fn rejects_non_finite_prices() {
        let err = Bar::new(
            Symbol::parse("AAPL").expect("symbol"),
            TradeDate::new(date!(2024 - 01 - 02)),
            f64::NAN,
            1.0,
            1.0,
            1.0,
            0,
            Provenance::now(ProviderId::Yahoo),
        )
        .expect_err("must fail");
        assert_eq!(err, ValidationError::NonFiniteValue { field: "open" });
    }

    #[test]
    fn all_zero_prices_are_implausible() {
        assert!(!bar(date!(2024 - 01 - 02), 0.0, 0.0, 0.0, 0.0).is_plausible());
    }

    #[test]
    fn detects_duplicate_and_backwards_dates() {
        let series = BarSeries::new(
            Symbol::parse("AAPL").expect("symbol"),
            vec![
                bar(date!(2024 - 01 - 02), 10.0, 11.0, 9.0, 10.5),
                bar(date!(2024 - 01 - 03), 10.0, 11.0, 9.0, 10.5),
                bar(date!(2024 - 01 - 03), 10.0, 11.0, 9.0, 10.5),
            ],
        );
        let (index, previous, current) = series.first_order_violation().expect("violation");
        assert_eq!(index, 2);
        assert_eq!(previous, current);

        let fixed = series.into_chronological();
        assert_eq!(fixed.len(), 2);
        assert!(fixed.first_order_violation().is_none());
    }

    #[test]
    fn history_merge_prefers_current_bars() {
        let current = BarSeries::new(
            Symbol::parse("AAPL").expect("symbol"),
            vec![bar(date!(2024 - 01 - 03), 10.0, 11.0, 9.0, 10.5)],
        );
        let merged = current.merged_with_history(vec![
            bar(date!(2024 - 01 - 02), 1.0, 1.0, 1.0, 1.0),
            bar(date!(2024 - 01 - 03), 2.0, 2.0, 2.0, 2.0),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.bars[1].close, 10.5);
        assert_eq!(merged.earliest(), Some(TradeDate::new(date!(2024 - 01 - 02))));
    }

    #[test]
    fn snapshot_sanitizes_non_finite_fields() {
        let snapshot = FundamentalSnapshot {
            pe_ratio: Some(f64::INFINITY),
            book_value: Some(12.0),
            ..FundamentalSnapshot::default()
        }
        .sanitized();
        assert_eq!(snapshot.pe_ratio, None);
        assert_eq!(snapshot.book_value, Some(12.0));
        assert!(FundamentalSnapshot::default().is_empty());
    }
}
