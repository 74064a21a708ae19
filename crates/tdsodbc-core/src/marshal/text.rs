//! Canonical text rendering and parsing of values

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Timelike};
use uuid::Uuid;

use crate::error::{OdbcError, Result};
use crate::value::Value;

/// Render a value the way it is returned to character buffers.
///
/// Fractional seconds are truncated to milliseconds; decimal and money keep
/// their scale; GUIDs are uppercase; binary is lowercase hex.
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bit(v) => if *v { "1" } else { "0" }.to_string(),
        Value::TinyInt(v) => v.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Real(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Decimal(d) => d.to_string(),
        Value::Money(m) => m.to_string(),
        Value::Text(units) => String::from_utf16_lossy(units),
        Value::Binary(bytes) => hex::encode(bytes),
        Value::Date(d) => render_date(d),
        Value::Time(t) => render_time(t),
        Value::Timestamp(ts) => render_timestamp(ts),
        Value::TimestampOffset(ts) => render_offset_timestamp(ts),
        Value::Guid(g) => g.hyphenated().to_string().to_uppercase(),
    }
}

fn millis(nanos: u32) -> u32 {
    (nanos % 1_000_000_000) / 1_000_000
}

fn render_date(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn render_time(t: &NaiveTime) -> String {
    format!("{}.{:03}", t.format("%H:%M:%S"), millis(t.nanosecond()))
}

fn render_timestamp(ts: &NaiveDateTime) -> String {
    format!("{} {}", render_date(&ts.date()), render_time(&ts.time()))
}

/// UTC wall clock followed by the stored offset
fn render_offset_timestamp(ts: &DateTime<FixedOffset>) -> String {
    let offset = ts.offset().fix().local_minus_utc() / 60;
    let sign = if offset < 0 { '-' } else { '+' };
    let offset = offset.unsigned_abs();
    format!(
        "{} {}{:02}:{:02}",
        render_timestamp(&ts.naive_utc()),
        sign,
        offset / 60,
        offset % 60
    )
}

pub fn parse_bool(text: &str) -> Result<bool> {
    match text.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        t if t.eq_ignore_ascii_case("true") => Ok(true),
        t if t.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(OdbcError::InvalidCharacterValue(format!(
            "'{other}' is not a bit value"
        ))),
    }
}

pub fn parse_date(text: &str) -> Result<NaiveDate> {
    let t = text.trim();
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .or_else(|_| parse_timestamp(t).map(|ts| ts.date()))
        .map_err(|_| OdbcError::InvalidDatetime(format!("'{t}' is not a date")))
}

pub fn parse_time(text: &str) -> Result<NaiveTime> {
    let t = text.trim();
    NaiveTime::parse_from_str(t, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
        .map_err(|_| OdbcError::InvalidDatetime(format!("'{t}' is not a time")))
}

pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    let t = text.trim();
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(t, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|_| OdbcError::InvalidDatetime(format!("'{t}' is not a timestamp")))
}

/// Local wall clock plus offset, e.g. `2024-01-15 13:45:30 +05:30`.
/// Text without an offset is taken as UTC.
pub fn parse_offset_timestamp(text: &str) -> Result<DateTime<FixedOffset>> {
    let t = text.trim();
    for format in [
        "%Y-%m-%d %H:%M:%S%.f %:z",
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%dT%H:%M:%S%.f%:z",
    ] {
        if let Ok(ts) = DateTime::parse_from_str(t, format) {
            return Ok(ts);
        }
    }
    let utc = FixedOffset::east_opt(0)
        .ok_or_else(|| OdbcError::General("zero UTC offset rejected".to_string()))?;
    parse_timestamp(t)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, utc))
        .map_err(|_| OdbcError::InvalidDatetime(format!("'{t}' is not a timestamp with offset")))
}

pub fn parse_guid(text: &str) -> Result<Uuid> {
    let t = text.trim().trim_start_matches('{').trim_end_matches('}');
    Uuid::parse_str(t)
        .map_err(|_| OdbcError::InvalidCharacterValue(format!("'{t}' is not a uniqueidentifier")))
}
