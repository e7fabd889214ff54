use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use barvault_warehouse::layout::{format_date, parse_date};

use crate::{UtcDateTime, ValidationError};

/// Calendar trading day, serialized as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TradeDate(Date);

impl TradeDate {
    pub fn new(date: Date) -> Self {
        Self(date)
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        parse_date(input.trim())
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidTradeDate {
                value: input.to_owned(),
            })
    }

    /// UTC calendar day of a timestamp.
    pub fn of(timestamp: UtcDateTime) -> Self {
        Self(timestamp.into_inner().date())
    }

    pub fn today() -> Self {
        Self::of(UtcDateTime::now())
    }

    pub fn into_inner(self) -> Date {
        self.0
    }

    /// Saturates at the calendar bounds.
    pub fn minus_days(self, days: i64) -> Self {
        self.plus_days(days.saturating_neg())
    }

    /// Saturates at the calendar bounds.
    pub fn plus_days(self, days: i64) -> Self {
        let moved = days
            .checked_mul(86_400)
            .map(Duration::seconds)
            .and_then(|span| self.0.checked_add(span));
        match moved {
            Some(date) => Self(date),
            None if days < 0 => Self(Date::MIN),
            None => Self(Date::MAX),
        }
    }

    /// Midnight UTC as unix seconds.
    pub fn unix_start(self) -> i64 {
        self.0.midnight().assume_utc().unix_timestamp()
    }
}

/// Checks `start <= end`.
pub fn ensure_range(start: TradeDate, end: TradeDate) -> Result<(), ValidationError> {
    if start > end {
        return Err(ValidationError::InvalidDateRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok(())
}

impl Display for TradeDate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_date(self.0))
    }
}

impl FromStr for TradeDate {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl From<Date> for TradeDate {
    fn from(value: Date) -> Self {
        Self(value)
    }
}

impl TryFrom<String> for TradeDate {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TradeDate> for String {
    fn from(value: TradeDate) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn parses_and_formats_iso_dates() {
        let day = TradeDate::parse("2024-02-29").expect("leap day");
        assert_eq!(day.into_inner(), date!(2024 - 02 - 29));
        assert_eq!(day.to_string(), "2024-02-29");

        let err = TradeDate::parse("2023-02-29").expect_err("not a leap year");
        assert!(matches!(err, ValidationError::InvalidTradeDate { .. }));
    }

    #[test]
    fn day_arithmetic_crosses_years() {
        let day = TradeDate::new(date!(2024 - 01 - 05));
        assert_eq!(day.minus_days(250).to_string(), "2023-04-30");
        assert_eq!(day.plus_days(-5).to_string(), "2023-12-31");
    }

    #[test]
    fn huge_shifts_stop_at_the_calendar_edges() {
        let day = TradeDate::new(date!(2024 - 01 - 05));
        assert_eq!(day.minus_days(i64::MAX).into_inner(), Date::MIN);
        assert_eq!(day.minus_days(i64::MIN).into_inner(), Date::MAX);
        assert_eq!(day.plus_days(50_000_000).into_inner(), Date::MAX);
        assert_eq!(day.plus_days(-50_000_000).into_inner(), Date::MIN);
    }

    #[test]
    fn range_must_be_ordered() {
        let start = TradeDate::new(date!(2024 - 01 - 05));
        let end = TradeDate::new(date!(2024 - 01 - 04));
        assert!(ensure_range(end, start).is_ok());
        assert!(matches!(
            ensure_range(start, end),
            Err(ValidationError::InvalidDateRange { .. })
        ));
    }

    #[test]
    fn serde_uses_iso_strings() {
        let day = TradeDate::new(date!(2024 - 03 - 07));
        let json = serde_json::to_string(&day).expect("serialize");
        assert_eq!(json, "\"2024-03-07\"");
        let back: TradeDate = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, day);
    }
}
