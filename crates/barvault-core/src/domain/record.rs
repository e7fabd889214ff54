use serde::{Deserialize, Serialize};
use uuid::Uuid;

use barvault_warehouse::layout;

use crate::indicators::Sma200Source;
use crate::{Bar, FundamentalSnapshot, Provenance, ProviderId, Symbol, TradeDate, UtcDateTime};

/// Indicator values for one bar. A field is `None` until enough history
/// exists to compute it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub rsi_14: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr_14: Option<f64>,
    pub volatility: Option<f64>,
}

impl IndicatorSet {
    pub const NAMES: [&'static str; 13] = [
        "rsi_14",
        "macd_line",
        "macd_signal",
        "macd_histogram",
        "sma_50",
        "sma_200",
        "ema_12",
        "ema_26",
        "bb_upper",
        "bb_middle",
        "bb_lower",
        "atr_14",
        "volatility",
    ];

    pub fn fields(&self) -> [(&'static str, Option<f64>); 13] {
        [
            ("rsi_14", self.rsi_14),
            ("macd_line", self.macd_line),
            ("macd_signal", self.macd_signal),
            ("macd_histogram", self.macd_histogram),
            ("sma_50", self.sma_50),
            ("sma_200", self.sma_200),
            ("ema_12", self.ema_12),
            ("ema_26", self.ema_26),
            ("bb_upper", self.bb_upper),
            ("bb_middle", self.bb_middle),
            ("bb_lower", self.bb_lower),
            ("atr_14", self.atr_14),
            ("volatility", self.volatility),
        ]
    }

    pub fn fields_mut(&mut self) -> [(&'static str, &mut Option<f64>); 13] {
        [
            ("rsi_14", &mut self.rsi_14),
            ("macd_line", &mut self.macd_line),
            ("macd_signal", &mut self.macd_signal),
            ("macd_histogram", &mut self.macd_histogram),
            ("sma_50", &mut self.sma_50),
            ("sma_200", &mut self.sma_200),
            ("ema_12", &mut self.ema_12),
            ("ema_26", &mut self.ema_26),
            ("bb_upper", &mut self.bb_upper),
            ("bb_middle", &mut self.bb_middle),
            ("bb_lower", &mut self.bb_lower),
            ("atr_14", &mut self.atr_14),
            ("volatility", &mut self.volatility),
        ]
    }

    pub fn present_count(&self) -> usize {
        self.fields().iter().filter(|(_, value)| value.is_some()).count()
    }
}

/// Lifecycle of a record through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Collected,
    IndicatorsCalculated,
    Validated,
    Persisted,
    Quarantined,
    Error,
}

impl ProcessingStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collected => "collected",
            Self::IndicatorsCalculated => "indicators_calculated",
            Self::Validated => "validated",
            Self::Persisted => "persisted",
            Self::Quarantined => "quarantined",
            Self::Error => "error",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Persisted | Self::Quarantined | Self::Error)
    }
}

/// Bookkeeping attached to every persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub record_id: Uuid,
    pub ingested_at: UtcDateTime,
    pub data_source: ProviderId,
    pub job_id: Option<String>,
    /// 0-100.
    pub completeness_score: f64,
    pub indicators_calculated: bool,
    pub fundamental_data_available: bool,
    /// How `sma_200` was obtained; `None` while it is absent.
    #[serde(default)]
    pub sma_200_source: Option<Sma200Source>,
    pub error_message: Option<String>,
    pub status: ProcessingStatus,
}

/// A bar with its derived indicators, optional fundamentals and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RecordDocument", try_from = "RecordDocument")]
pub struct Record {
    pub bar: Bar,
    pub indicators: IndicatorSet,
    pub fundamentals: Option<FundamentalSnapshot>,
    pub metadata: ProcessingMetadata,
}

impl Record {
    /// Fresh record in the `collected` state.
    pub fn collected(bar: Bar, job_id: Option<String>) -> Self {
        let data_source = bar.provenance.source;
        Self {
            bar,
            indicators: IndicatorSet::default(),
            fundamentals: None,
            metadata: ProcessingMetadata {
                record_id: Uuid::new_v4(),
                ingested_at: UtcDateTime::now(),
                data_source,
                job_id,
                completeness_score: 0.0,
                indicators_calculated: false,
                fundamental_data_available: false,
                sma_200_source: None,
                error_message: None,
                status: ProcessingStatus::Collected,
            },
        }
    }

    pub fn instrument(&self) -> &Symbol {
        &self.bar.instrument
    }

    pub fn date(&self) -> TradeDate {
        self.bar.date
    }

    pub fn close(&self) -> f64 {
        self.bar.close
    }

    pub fn attach_fundamentals(&mut self, snapshot: Option<FundamentalSnapshot>) {
        self.metadata.fundamental_data_available =
            snapshot.as_ref().is_some_and(|snapshot| !snapshot.is_empty());
        self.fundamentals = snapshot;
    }

    pub fn set_status(&mut self, status: ProcessingStatus) {
        self.metadata.status = status;
    }

    /// Terminal `error` state with the reason kept in the metadata.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.metadata.status = ProcessingStatus::Error;
        self.metadata.error_message = Some(message.into());
    }

    /// Primary storage key.
    pub fn storage_key(&self) -> String {
        layout::daily_record_key(self.instrument().as_str(), self.date().into_inner())
    }
}

/// Persisted layout of a [`Record`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordDocument {
    instrument: Symbol,
    date: TradeDate,
    basic_data: BasicData,
    technical_indicators: IndicatorSet,
    fundamental_data: Option<FundamentalSnapshot>,
    metadata: ProcessingMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BasicData {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    source: ProviderId,
    fetched_at: UtcDateTime,
}

impl From<Record> for RecordDocument {
    fn from(record: Record) -> Self {
        let Record {
            bar,
            indicators,
            fundamentals,
            metadata,
        } = record;
        Self {
            instrument: bar.instrument,
            date: bar.date,
            basic_data: BasicData {
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                source: bar.provenance.source,
                fetched_at: bar.provenance.fetched_at,
            },
            technical_indicators: indicators,
            fundamental_data: fundamentals,
            metadata,
        }
    }
}

impl TryFrom<RecordDocument> for Record {
    type Error = crate::ValidationError;

    fn try_from(document: RecordDocument) -> Result<Self, Self::Error> {
        let basic = document.basic_data;
        let bar = Bar::new(
            document.instrument,
            document.date,
            basic.open,
            basic.high,
            basic.low,
            basic.close,
            basic.volume,
            Provenance {
                source: basic.source,
                fetched_at: basic.fetched_at,
            },
        )?;
        Ok(Self {
            bar,
            indicators: document.technical_indicators,
            fundamentals: document.fundamental_data,
            metadata: document.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use time::macros::date;

    fn sample() -> Record {
        let bar = Bar::new(
            Symbol::parse("MSFT").expect("symbol"),
            TradeDate::new(date!(2024 - 03 - 07)),
            400.0,
            405.0,
            398.0,
            402.5,
            21_000_000,
            Provenance::now(ProviderId::Alpaca),
        )
        .expect("bar");
        let mut record = Record::collected(bar, Some(String::from("job-1")));
        record.indicators.rsi_14 = Some(55.5);
        record
    }

    #[test]
    fn serializes_into_sectioned_document() {
        let value = serde_json::to_value(sample()).expect("serialize");
        assert_eq!(value["instrument"], "MSFT");
        assert_eq!(value["date"], "2024-03-07");
        assert_eq!(value["basic_data"]["close"], 402.5);
        assert_eq!(value["basic_data"]["source"], "alpaca");
        assert_eq!(value["technical_indicators"]["rsi_14"], 55.5);
        assert_eq!(value["technical_indicators"]["sma_200"], Value::Null);
        assert_eq!(value["fundamental_data"], Value::Null);
        assert_eq!(value["metadata"]["status"], "collected");
        assert_eq!(value["metadata"]["job_id"], "job-1");
    }

    #[test]
    fn document_reads_back_into_record() {
        let record = sample();
        let text = serde_json::to_string(&record).expect("serialize");
        let back: Record = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn sma_200_source_and_error_survive_the_document() {
        let mut record = sample();
        record.indicators.sma_200 = Some(380.0);
        record.metadata.sma_200_source = Some(Sma200Source::Published);
        record.mark_error("write.io: disk full");

        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["metadata"]["sma_200_source"], "published");
        assert_eq!(value["metadata"]["status"], "error");

        let back: Record = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back.metadata.sma_200_source, Some(Sma200Source::Published));
        assert_eq!(back.metadata.error_message.as_deref(), Some("write.io: disk full"));
    }

    #[test]
    fn storage_key_follows_layout() {
        assert_eq!(
            sample().storage_key(),
            "historical/daily/MSFT/2024/03/2024-03-07.json"
        );
    }

    #[test]
    fn empty_snapshot_does_not_count_as_available() {
        let mut record = sample();
        record.attach_fundamentals(Some(FundamentalSnapshot::default()));
        assert!(!record.metadata.fundamental_data_available);
        record.attach_fundamentals(Some(FundamentalSnapshot {
            market_cap: Some(1.0e12),
            ..FundamentalSnapshot::default()
        }));
        assert!(record.metadata.fundamental_data_available);
    }
}
