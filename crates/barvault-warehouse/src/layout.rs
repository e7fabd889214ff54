//! Key layout shared by every store backend.
//!
//! | Area | Key |
//! |------|-----|
//! | Primary records | `historical/daily/{INSTRUMENT}/{YYYY}/{MM}/{YYYY-MM-DD}.json` |
//! | Quarantine | `error_records/{category}/{INSTRUMENT}/{YYYY-MM-DD}.json` |
//! | Acquisition failures | `error_records/daily/{INSTRUMENT}/{YYYY}/{MM}/{YYYY-MM-DD}.json` |
//! | Write failures | `error_records/storage/{INSTRUMENT}/{YYYY-MM-DD}.json` |
//! | Jobs | `jobs/{job_id}/metadata.json` |

use time::macros::format_description;
use time::Date;

pub const DAILY_RECORDS: &str = "historical/daily";
pub const ERROR_RECORDS: &str = "error_records";
pub const ACQUISITION_FAILURES: &str = "error_records/daily";
pub const JOBS: &str = "jobs";

/// Category directory used for acquisition failure logs.
pub const ACQUISITION_FAILURE_CATEGORY: &str = "daily";

/// Category directory for records the primary store refused.
pub const WRITE_FAILURE_CATEGORY: &str = "storage";

pub fn daily_record_key(instrument: &str, date: Date) -> String {
    format!(
        "{DAILY_RECORDS}/{instrument}/{:04}/{:02}/{}.json",
        date.year(),
        u8::from(date.month()),
        format_date(date)
    )
}

pub fn instrument_prefix(instrument: &str) -> String {
    format!("{DAILY_RECORDS}/{instrument}")
}

pub fn quarantine_key(category: &str, instrument: &str, date: Date) -> String {
    format!("{ERROR_RECORDS}/{category}/{instrument}/{}.json", format_date(date))
}

pub fn acquisition_failure_key(instrument: &str, date: Date) -> String {
    format!(
        "{ACQUISITION_FAILURES}/{instrument}/{:04}/{:02}/{}.json",
        date.year(),
        u8::from(date.month()),
        format_date(date)
    )
}

pub fn write_failure_key(instrument: &str, date: Date) -> String {
    quarantine_key(WRITE_FAILURE_CATEGORY, instrument, date)
}

pub fn job_key(job_id: &str) -> String {
    format!("{JOBS}/{job_id}/metadata.json")
}

/// Splits a primary record key back into instrument and date.
pub fn parse_daily_record_key(key: &str) -> Option<(String, Date)> {
    let rest = key.strip_prefix(DAILY_RECORDS)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let instrument = parts.next()?;
    let _year = parts.next()?;
    let _month = parts.next()?;
    let file = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let date = parse_date(file.strip_suffix(".json")?)?;
    Some((instrument.to_owned(), date))
}

/// `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn parse_date(value: &str) -> Option<Date> {
    Date::parse(value, format_description!("[year]-[month]-[day]")).ok()
}
