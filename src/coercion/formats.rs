//! Known textual date formats
//!
//! Wall-clock forms without an offset are read as UTC.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A textual date layout, named by its pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    /// RFC 3339 timestamps, offset-free ISO datetimes, and bare ISO dates
    #[serde(rename = "ISO")]
    Iso,
    #[serde(rename = "YYYY-MM-DD")]
    YearMonthDayDash,
    #[serde(rename = "YYYY/MM/DD")]
    YearMonthDaySlash,
    #[serde(rename = "MM/DD/YYYY")]
    MonthDayYear,
    #[serde(rename = "DD/MM/YYYY")]
    DayMonthYear,
    #[serde(rename = "YYYY-MM-DDTHH:mm:ssZ")]
    UtcSeconds,
    #[serde(rename = "YYYY-MM-DDTHH:mm:ss.SSSZ")]
    UtcMillis,
    #[serde(rename = "DD-MMM-YYYY")]
    DayMonthNameYear,
    #[serde(rename = "MMM DD, YYYY")]
    MonthNameDayYear,
    #[serde(rename = "DD.MM.YYYY")]
    DottedDayMonthYear,
}

/// Tried in this order when no list is configured
pub const DEFAULT_FORMATS: &[DateFormat] = &[
    DateFormat::Iso,
    DateFormat::YearMonthDayDash,
    DateFormat::YearMonthDaySlash,
    DateFormat::MonthDayYear,
    DateFormat::DayMonthYear,
    DateFormat::UtcSeconds,
    DateFormat::UtcMillis,
    DateFormat::DayMonthNameYear,
    DateFormat::MonthNameDayYear,
    DateFormat::DottedDayMonthYear,
];

impl DateFormat {
    pub fn pattern(&self) -> &'static str {
        match self {
            DateFormat::Iso => "ISO",
            DateFormat::YearMonthDayDash => "YYYY-MM-DD",
            DateFormat::YearMonthDaySlash => "YYYY/MM/DD",
            DateFormat::MonthDayYear => "MM/DD/YYYY",
            DateFormat::DayMonthYear => "DD/MM/YYYY",
            DateFormat::UtcSeconds => "YYYY-MM-DDTHH:mm:ssZ",
            DateFormat::UtcMillis => "YYYY-MM-DDTHH:mm:ss.SSSZ",
            DateFormat::DayMonthNameYear => "DD-MMM-YYYY",
            DateFormat::MonthNameDayYear => "MMM DD, YYYY",
            DateFormat::DottedDayMonthYear => "DD.MM.YYYY",
        }
    }

    /// Parse `text` in this layout
    pub fn parse(&self, text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        match self {
            DateFormat::Iso => parse_iso(text),
            DateFormat::YearMonthDayDash | DateFormat::YearMonthDaySlash => {
                date(text, "%Y-%m-%d").or_else(|| date(text, "%Y/%m/%d"))
            }
            DateFormat::MonthDayYear => date(text, "%m/%d/%Y"),
            DateFormat::DayMonthYear => date(text, "%d/%m/%Y"),
            DateFormat::UtcSeconds => datetime(text, "%Y-%m-%dT%H:%M:%SZ"),
            DateFormat::UtcMillis => datetime(text, "%Y-%m-%dT%H:%M:%S%.3fZ"),
            DateFormat::DayMonthNameYear => date(text, "%d-%b-%Y"),
            DateFormat::MonthNameDayYear => date(text, "%b %d, %Y"),
            DateFormat::DottedDayMonthYear => date(text, "%d.%m.%Y"),
        }
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pattern())
    }
}

/// First format in `formats` that accepts `text`
pub fn parse_with_formats(text: &str, formats: &[DateFormat]) -> Option<DateTime<Utc>> {
    formats.iter().find_map(|format| format.parse(text))
}

fn parse_iso(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| datetime(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|| datetime(text, "%Y-%m-%dT%H:%M"))
        .or_else(|| date(text, "%Y-%m-%d"))
}

fn date(text: &str, format: &str) -> Option<DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(text, format).ok()?;
    day.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt))
}

fn datetime(text: &str, format: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, format)
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}
