use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::OnceLock;

use crate::error::ArchiveError;

static DAY_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn day_name_re() -> &'static Regex {
    DAY_NAME_RE.get_or_init(|| {
        Regex::new(r"[0-9]{4}-[0-9]{2}-[0-9]{2}").expect("day pattern")
    })
}

pub fn ts_str(message: &Value) -> Option<&str> {
    message.get("ts").and_then(Value::as_str)
}

/// Whole seconds of a `"<seconds>.<fraction>"` timestamp. Anything else is a
/// format error.
pub fn parse_seconds(ts: &str) -> Result<i64, ArchiveError> {
    let invalid = || ArchiveError::InvalidTimestamp(ts.to_string());
    let mut parts = ts.split('.');
    let (Some(secs), Some(_frac), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    secs.parse::<i64>().map_err(|_| invalid())
}

/// UTC calendar day a message timestamp falls on.
pub fn day_of(ts: &str) -> Result<NaiveDate, ArchiveError> {
    let secs = parse_seconds(ts)?;
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| ArchiveError::InvalidTimestamp(ts.to_string()))
}

pub fn day_file_name(day: NaiveDate) -> String {
    format!("{}.json", day.format("%Y-%m-%d"))
}

/// First `YYYY-MM-DD` found in an entry name.
pub fn date_from_name(name: &str) -> Option<NaiveDate> {
    let found = day_name_re().find(name)?;
    NaiveDate::parse_from_str(found.as_str(), "%Y-%m-%d").ok()
}

pub fn epoch_of_date(day: NaiveDate) -> f64 {
    day.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp() as f64)
        .unwrap_or(0.0)
}

/// Ordering key for merging day files. Lenient: `"1"` and `"1.5"` are both
/// keys; only an absent or non-numeric `ts` has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeKey {
    secs: i128,
    frac: String,
}

impl MergeKey {
    pub fn of(message: &Value) -> Option<Self> {
        let ts = ts_str(message)?;
        let (secs, frac) = ts.split_once('.').unwrap_or((ts, ""));
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let secs = secs.parse::<i128>().ok()?;
        Some(Self {
            secs,
            frac: frac.trim_end_matches('0').to_string(),
        })
    }
}

impl Ord for MergeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Trailing zeros are trimmed, so digit strings compare as fractions.
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.frac.as_str().cmp(other.frac.as_str()))
    }
}

impl PartialOrd for MergeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
