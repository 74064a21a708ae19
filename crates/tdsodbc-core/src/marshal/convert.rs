//! Conversions between value kinds, shared by both marshaling directions

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use super::text;
use crate::error::{OdbcError, Result};
use crate::value::{Decimal, Money, Value, MAX_PRECISION};

fn restricted(value: &Value, target: &str) -> OdbcError {
    OdbcError::RestrictedDataType(format!("cannot convert {} to {target}", value.kind()))
}

pub(crate) fn to_i64(value: &Value) -> Result<i64> {
    match value {
        Value::Bit(v) => Ok(*v as i64),
        Value::TinyInt(v) => Ok(*v as i64),
        Value::SmallInt(v) => Ok(*v as i64),
        Value::Int(v) => Ok(*v as i64),
        Value::BigInt(v) => Ok(*v),
        Value::Real(v) => float_to_i64(*v as f64),
        Value::Double(v) => float_to_i64(*v),
        Value::Decimal(d) => i64::try_from(d.trunc())
            .map_err(|_| OdbcError::NumericOutOfRange(d.to_string())),
        Value::Money(m) => Ok(m.units / Money::UNITS_PER_WHOLE),
        Value::Text(_) => {
            let s = text::render(value);
            let t = s.trim();
            match t.parse::<i64>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    let d = to_natural_decimal(value)?;
                    i64::try_from(d.trunc())
                        .map_err(|_| OdbcError::NumericOutOfRange(t.to_string()))
                }
            }
        }
        other => Err(restricted(other, "an integer")),
    }
}

/// Whether the integer conversion of `value` drops a nonzero fraction.
///
/// Integer conversions truncate toward zero for every source kind.
pub(crate) fn has_fraction(value: &Value) -> bool {
    match value {
        Value::Real(v) => v.is_finite() && v.fract() != 0.0,
        Value::Double(v) => v.is_finite() && v.fract() != 0.0,
        Value::Decimal(d) => d.has_fraction(),
        Value::Money(m) => m.units % Money::UNITS_PER_WHOLE != 0,
        Value::Text(_) => {
            let s = text::render(value);
            s.trim().parse::<i64>().is_err()
                && to_natural_decimal(value).is_ok_and(|d| d.has_fraction())
        }
        _ => false,
    }
}

fn float_to_i64(v: f64) -> Result<i64> {
    if !v.is_finite() || v >= 9.223_372_036_854_775_807e18 || v < -9.223_372_036_854_775_808e18 {
        return Err(OdbcError::NumericOutOfRange(v.to_string()));
    }
    Ok(v.trunc() as i64)
}

/// Integer narrowed to `T`, reporting overflow as out of range
pub(crate) fn to_int<T: TryFrom<i64>>(value: &Value) -> Result<T> {
    let wide = to_i64(value)?;
    T::try_from(wide).map_err(|_| OdbcError::NumericOutOfRange(wide.to_string()))
}

pub(crate) fn to_f64(value: &Value) -> Result<f64> {
    match value {
        Value::Bit(v) => Ok(if *v { 1.0 } else { 0.0 }),
        Value::TinyInt(v) => Ok(*v as f64),
        Value::SmallInt(v) => Ok(*v as f64),
        Value::Int(v) => Ok(*v as f64),
        Value::BigInt(v) => Ok(*v as f64),
        Value::Real(v) => Ok(*v as f64),
        Value::Double(v) => Ok(*v),
        Value::Decimal(d) => Ok(d.to_f64()),
        Value::Money(m) => Ok(m.to_decimal().to_f64()),
        Value::Text(_) => {
            let s = text::render(value);
            s.trim()
                .parse::<f64>()
                .map_err(|_| OdbcError::InvalidCharacterValue(format!("'{}' is not a number", s.trim())))
        }
        other => Err(restricted(other, "a float")),
    }
}

pub(crate) fn to_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bit(v) => Ok(*v),
        Value::Text(_) => text::parse_bool(&text::render(value)),
        Value::Real(_) | Value::Double(_) | Value::Decimal(_) | Value::Money(_) => {
            let v = to_f64(value)?;
            if (0.0..2.0).contains(&v) {
                Ok(v >= 1.0)
            } else {
                Err(OdbcError::NumericOutOfRange(v.to_string()))
            }
        }
        _ => match to_i64(value)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(OdbcError::NumericOutOfRange(other.to_string())),
        },
    }
}

/// Exact decimal at the given precision and scale
pub(crate) fn to_decimal(value: &Value, precision: u8, scale: u8) -> Result<Decimal> {
    match value {
        Value::Decimal(d) => {
            if d.scale() == scale {
                Decimal::new(d.mantissa(), precision, scale)
            } else {
                Decimal::parse(&d.to_string(), precision, scale)
            }
        }
        Value::Money(m) => Decimal::parse(&m.to_decimal().to_string(), precision, scale),
        Value::Real(_) | Value::Double(_) => {
            let v = to_f64(value)?;
            if !v.is_finite() {
                return Err(OdbcError::NumericOutOfRange(v.to_string()));
            }
            Decimal::parse(&v.to_string(), precision, scale)
        }
        Value::Text(_) => Decimal::parse(&text::render(value), precision, scale),
        Value::Bit(_) | Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
            Decimal::parse(&to_i64(value)?.to_string(), precision, scale)
        }
        other => Err(restricted(other, "a decimal")),
    }
}

/// Decimal keeping the value's own scale where it has one
pub(crate) fn to_natural_decimal(value: &Value) -> Result<Decimal> {
    match value {
        Value::Decimal(d) => Ok(*d),
        Value::Money(m) => Ok(m.to_decimal()),
        Value::Text(_) => {
            let s = text::render(value);
            let scale = s
                .trim()
                .split_once('.')
                .map(|(_, frac)| frac.len().min(MAX_PRECISION as usize))
                .unwrap_or(0) as u8;
            Decimal::parse(&s, MAX_PRECISION, scale)
        }
        Value::Real(_) | Value::Double(_) => {
            let s = to_f64(value)?.to_string();
            let scale = s.split_once('.').map(|(_, f)| f.len()).unwrap_or(0) as u8;
            Decimal::parse(&s, MAX_PRECISION, scale.min(MAX_PRECISION))
        }
        other => to_decimal(other, MAX_PRECISION, 0),
    }
}

pub(crate) fn to_date(value: &Value) -> Result<NaiveDate> {
    match value {
        Value::Date(d) => Ok(*d),
        Value::Timestamp(ts) => Ok(ts.date()),
        Value::TimestampOffset(ts) => Ok(ts.naive_local().date()),
        Value::Text(_) => text::parse_date(&text::render(value)),
        other => Err(restricted(other, "a date")),
    }
}

pub(crate) fn to_time(value: &Value) -> Result<NaiveTime> {
    match value {
        Value::Time(t) => Ok(*t),
        Value::Timestamp(ts) => Ok(ts.time()),
        Value::TimestampOffset(ts) => Ok(ts.naive_local().time()),
        Value::Text(_) => {
            let s = text::render(value);
            text::parse_time(&s).or_else(|_| text::parse_timestamp(&s).map(|ts| ts.time()))
        }
        other => Err(restricted(other, "a time")),
    }
}

pub(crate) fn to_timestamp(value: &Value) -> Result<NaiveDateTime> {
    match value {
        Value::Timestamp(ts) => Ok(*ts),
        Value::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
        Value::TimestampOffset(ts) => Ok(ts.naive_local()),
        Value::Text(_) => text::parse_timestamp(&text::render(value)),
        other => Err(restricted(other, "a timestamp")),
    }
}

pub(crate) fn to_offset_timestamp(value: &Value) -> Result<DateTime<FixedOffset>> {
    match value {
        Value::TimestampOffset(ts) => Ok(*ts),
        Value::Timestamp(_) | Value::Date(_) => {
            let naive = to_timestamp(value)?;
            let utc = FixedOffset::east_opt(0)
                .ok_or_else(|| OdbcError::General("zero UTC offset rejected".to_string()))?;
            Ok(DateTime::from_naive_utc_and_offset(naive, utc))
        }
        Value::Text(_) => text::parse_offset_timestamp(&text::render(value)),
        other => Err(restricted(other, "a timestamp with offset")),
    }
}

pub(crate) fn to_guid(value: &Value) -> Result<Uuid> {
    match value {
        Value::Guid(g) => Ok(*g),
        Value::Text(_) => text::parse_guid(&text::render(value)),
        Value::Binary(bytes) => Uuid::from_slice(bytes)
            .map_err(|_| OdbcError::InvalidCharacterValue(format!("{} bytes is not a uniqueidentifier", bytes.len()))),
        other => Err(restricted(other, "a uniqueidentifier")),
    }
}

/// Raw bytes of a value for binary targets
pub(crate) fn to_bytes(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Binary(bytes) => Ok(bytes.clone()),
        Value::Guid(g) => Ok(g.as_bytes().to_vec()),
        Value::Text(_) => {
            let s = text::render(value);
            let hex_digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
            hex::decode(hex_digits).map_err(|_| {
                OdbcError::InvalidCharacterValue(format!("'{s}' is not a hexadecimal binary literal"))
            })
        }
        other => Err(restricted(other, "binary")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_conversions() {
        assert_eq!(to_i64(&Value::text(" 42 ")).unwrap(), 42);
        assert_eq!(to_i64(&Value::text("42.9")).unwrap(), 42);
        assert_eq!(to_i64(&Value::text("-42.9")).unwrap(), -42);
        assert_eq!(to_i64(&Value::Double(-3.7)).unwrap(), -3);
        assert!(matches!(to_int::<i16>(&Value::Int(70_000)), Err(OdbcError::NumericOutOfRange(_))));
        assert!(matches!(to_i64(&Value::text("abc")), Err(OdbcError::InvalidCharacterValue(_))));
        assert!(matches!(to_i64(&Value::Binary(vec![1])), Err(OdbcError::RestrictedDataType(_))));
    }

    #[test]
    fn test_fraction_detection() {
        assert!(has_fraction(&Value::text("42.9")));
        assert!(!has_fraction(&Value::text("42.000")));
        assert!(!has_fraction(&Value::text(" 42 ")));
        assert!(!has_fraction(&Value::text("abc")));
        assert!(has_fraction(&Value::Double(2.5)));
        assert!(!has_fraction(&Value::Real(3.0)));
        assert!(has_fraction(&Value::Decimal(Decimal::new(1250, 10, 2).unwrap())));
        assert!(!has_fraction(&Value::Decimal(Decimal::new(1200, 10, 2).unwrap())));
        assert!(!has_fraction(&Value::Int(7)));
    }

    #[test]
    fn test_bit_conversions() {
        assert!(to_bool(&Value::Int(1)).unwrap());
        assert!(!to_bool(&Value::text("false")).unwrap());
        assert!(to_bool(&Value::Int(2)).is_err());
    }

    #[test]
    fn test_decimal_conversions() {
        assert_eq!(to_decimal(&Value::Int(5), 10, 2).unwrap().to_string(), "5.00");
        assert_eq!(to_decimal(&Value::Double(1.25), 10, 1).unwrap().to_string(), "1.3");
        assert_eq!(to_natural_decimal(&Value::text("12.50")).unwrap().scale(), 2);
    }

    #[test]
    fn test_binary_from_hex_text() {
        assert_eq!(to_bytes(&Value::text("0xDEADBEEF")).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(to_bytes(&Value::text("xyz")).is_err());
    }
}
