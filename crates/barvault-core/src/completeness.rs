//! Weighted completeness scoring for records.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::Record;

const OHLCV_WEIGHTS: [(&str, f64); 5] = [
    ("open", 1.0),
    ("high", 1.0),
    ("low", 1.0),
    ("close", 1.0),
    ("volume", 0.8),
];

const TECHNICAL_WEIGHTS: [(&str, f64); 13] = [
    ("rsi_14", 1.0),
    ("macd_line", 0.9),
    ("macd_signal", 0.9),
    ("macd_histogram", 0.8),
    ("sma_50", 1.0),
    ("sma_200", 0.7),
    ("ema_12", 0.8),
    ("ema_26", 0.8),
    ("bb_upper", 0.7),
    ("bb_middle", 0.7),
    ("bb_lower", 0.7),
    ("atr_14", 0.8),
    ("volatility", 0.6),
];

const FUNDAMENTAL_WEIGHTS: [(&str, f64); 10] = [
    ("market_cap", 1.0),
    ("pe_ratio", 0.9),
    ("debt_to_equity", 0.7),
    ("roe_percent", 0.8),
    ("current_ratio", 0.7),
    ("operating_margin_percent", 0.6),
    ("revenue_growth_percent", 0.8),
    ("profit_margin_percent", 0.7),
    ("dividend_yield_percent", 0.5),
    ("book_value", 0.6),
];

const TOP_MISSING: usize = 10;

/// Share of the overall score each category carries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CategoryWeights {
    pub ohlcv: f64,
    pub technical: f64,
    pub fundamental: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            ohlcv: 0.40,
            technical: 0.35,
            fundamental: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl CompletenessLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 95.0 {
            Self::Excellent
        } else if score >= 85.0 {
            Self::Good
        } else if score >= 70.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletenessScore {
    pub overall: f64,
    pub ohlcv: f64,
    pub technical: f64,
    pub fundamental: f64,
    pub missing_fields: Vec<String>,
    pub level: CompletenessLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchCompleteness {
    pub total_records: usize,
    pub average_score: f64,
    pub average_ohlcv: f64,
    pub average_technical: f64,
    pub average_fundamental: f64,
    pub distribution: BTreeMap<CompletenessLevel, usize>,
    /// Most frequently missing fields, most frequent first.
    pub top_missing_fields: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Default)]
pub struct CompletenessScorer {
    weights: CategoryWeights,
}

impl CompletenessScorer {
    pub fn new(weights: CategoryWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, record: &Record) -> CompletenessScore {
        let bar = &record.bar;
        let (ohlcv, mut missing) = weighted(
            &OHLCV_WEIGHTS,
            // Volume is unsigned, so it is always present.
            [
                Some(bar.open).filter(|price| *price > 0.0),
                Some(bar.high).filter(|price| *price > 0.0),
                Some(bar.low).filter(|price| *price > 0.0),
                Some(bar.close).filter(|price| *price > 0.0),
                Some(bar.volume as f64),
            ],
        );

        let technical = if record.metadata.indicators_calculated {
            let values = record.indicators.fields().map(|(_, value)| value);
            let (score, absent) = weighted(&TECHNICAL_WEIGHTS, values);
            missing.extend(absent);
            score
        } else {
            missing.push(String::from("all_technical_indicators"));
            0.0
        };

        let fundamental = match &record.fundamentals {
            Some(snapshot) if !snapshot.is_empty() => {
                let values = snapshot.fields().map(|(_, value)| value);
                let (score, absent) = weighted(&FUNDAMENTAL_WEIGHTS, values);
                missing.extend(absent);
                score
            }
            _ => {
                missing.push(String::from("all_fundamental_data"));
                0.0
            }
        };

        let overall = ohlcv * self.weights.ohlcv
            + technical * self.weights.technical
            + fundamental * self.weights.fundamental;

        CompletenessScore {
            overall,
            ohlcv,
            technical,
            fundamental,
            missing_fields: missing,
            level: CompletenessLevel::from_score(overall),
        }
    }

    /// Scores `record` and stores the overall score in its metadata.
    pub fn annotate(&self, record: &mut Record) -> CompletenessScore {
        let score = self.score(record);
        record.metadata.completeness_score = round2(score.overall);
        score
    }

    pub fn score_batch(&self, records: &[Record]) -> BatchCompleteness {
        if records.is_empty() {
            return BatchCompleteness {
                total_records: 0,
                average_score: 0.0,
                average_ohlcv: 0.0,
                average_technical: 0.0,
                average_fundamental: 0.0,
                distribution: BTreeMap::new(),
                top_missing_fields: Vec::new(),
            };
        }

        let scores: Vec<CompletenessScore> =
            records.iter().map(|record| self.score(record)).collect();
        let count = scores.len() as f64;
        let mean = |pick: fn(&CompletenessScore) -> f64| {
            round2(scores.iter().map(pick).sum::<f64>() / count)
        };

        let mut distribution = BTreeMap::new();
        let mut missing: HashMap<&str, usize> = HashMap::new();
        for score in &scores {
            *distribution.entry(score.level).or_insert(0) += 1;
            for field in &score.missing_fields {
                *missing.entry(field.as_str()).or_insert(0) += 1;
            }
        }

        let mut top_missing_fields: Vec<(String, usize)> = missing
            .into_iter()
            .map(|(field, count)| (field.to_owned(), count))
            .collect();
        top_missing_fields
            .sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
        top_missing_fields.truncate(TOP_MISSING);

        BatchCompleteness {
            total_records: records.len(),
            average_score: mean(|score| score.overall),
            average_ohlcv: mean(|score| score.ohlcv),
            average_technical: mean(|score| score.technical),
            average_fundamental: mean(|score| score.fundamental),
            distribution,
            top_missing_fields,
        }
    }
}

fn weighted<const N: usize>(
    weights: &[(&str, f64); N],
    values: [Option<f64>; N],
) -> (f64, Vec<String>) {
    let total: f64 = weights.iter().map(|(_, weight)| weight).sum();
    let mut achieved = 0.0;
    let mut missing = Vec::new();

    for ((name, weight), value) in weights.iter().zip(values) {
        if value.is_some() {
            achieved += weight;
        } else {
            missing.push((*name).to_owned());
        }
    }
    (achieved / total * 100.0, missing)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Bar, FundamentalSnapshot, IndicatorSet, Provenance, ProviderId, Symbol, TradeDate,
    };

    fn record(open: f64) -> Record {
        let bar = Bar::new(
            Symbol::parse("IBM").expect("symbol"),
            TradeDate::parse("2024-05-02").expect("date"),
            open,
            190.0,
            180.0,
            185.0,
            1_000,
            Provenance::now(ProviderId::Yahoo),
        )
        .expect("bar");
        Record::collected(bar, None)
    }

    fn full_indicators() -> IndicatorSet {
        let mut indicators = IndicatorSet::default();
        for (_, slot) in indicators.fields_mut() {
            *slot = Some(1.0);
        }
        indicators
    }

    #[test]
    fn bare_bar_scores_only_price_data() {
        let score = CompletenessScorer::default().score(&record(182.0));

        assert_eq!(score.ohlcv, 100.0);
        assert_eq!(score.technical, 0.0);
        assert_eq!(score.fundamental, 0.0);
        assert!((score.overall - 40.0).abs() < 1e-9);
        assert_eq!(score.level, CompletenessLevel::Poor);
        assert_eq!(
            score.missing_fields,
            vec!["all_technical_indicators", "all_fundamental_data"]
        );
    }

    #[test]
    fn non_positive_price_counts_as_missing() {
        let score = CompletenessScorer::default().score(&record(0.0));

        assert!((score.ohlcv - 4.8 / 5.8 * 100.0).abs() < 1e-9);
        assert_eq!(score.missing_fields[0], "open");
    }

    #[test]
    fn missing_sma_200_costs_its_weight() {
        let mut record = record(182.0);
        record.metadata.indicators_calculated = true;
        record.indicators = IndicatorSet {
            sma_200: None,
            ..full_indicators()
        };
        record.attach_fundamentals(Some(FundamentalSnapshot {
            market_cap: Some(1.0),
            pe_ratio: Some(1.0),
            debt_to_equity: Some(1.0),
            roe_percent: Some(1.0),
            current_ratio: Some(1.0),
            operating_margin_percent: Some(1.0),
            revenue_growth_percent: Some(1.0),
            profit_margin_percent: Some(1.0),
            dividend_yield_percent: Some(1.0),
            book_value: Some(1.0),
        }));

        let score = CompletenessScorer::default().annotate(&mut record);

        let technical = (10.4 - 0.7) / 10.4 * 100.0;
        assert!((score.technical - technical).abs() < 1e-9);
        assert_eq!(score.missing_fields, vec!["sma_200"]);
        assert_eq!(score.level, CompletenessLevel::Excellent);
        assert_eq!(record.metadata.completeness_score, round2(score.overall));
    }

    #[test]
    fn batch_reports_distribution_and_top_missing() {
        let scorer = CompletenessScorer::default();
        let mut calculated = record(182.0);
        calculated.metadata.indicators_calculated = true;
        calculated.indicators = full_indicators();

        let batch = scorer.score_batch(&[record(182.0), record(182.0), calculated]);

        assert_eq!(batch.total_records, 3);
        assert_eq!(batch.distribution.get(&CompletenessLevel::Poor), Some(&2));
        assert_eq!(batch.distribution.get(&CompletenessLevel::Fair), Some(&1));
        assert_eq!(
            batch.top_missing_fields[0],
            (String::from("all_fundamental_data"), 3)
        );
        assert_eq!(
            batch.top_missing_fields[1],
            (String::from("all_technical_indicators"), 2)
        );
        assert!((batch.average_score - 51.67).abs() < 1e-9);
    }

    #[test]
    fn empty_batch_is_all_zero() {
        let batch = CompletenessScorer::default().score_batch(&[]);
        assert_eq!(batch.total_records, 0);
        assert!(batch.top_missing_fields.is_empty());
    }
}
