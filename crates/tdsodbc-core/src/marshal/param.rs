use chrono::{DateTime, NaiveDate, NaiveTime};
use uuid::Uuid;

use super::convert;
use super::decode::{days_from_date, increments_from_time};
use crate::error::{OdbcError, Result};
use crate::types::{CStruct, CType, SqlDate, SqlGuid, SqlNumeric, SqlTime, SqlTimestamp};
use crate::value::{Decimal, Money, MoneyKind, Value, MAX_PRECISION};
use crate::wire::{TypeFamily, WireType, WireValue};

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or(OdbcError::InvalidBufferLength(bytes.len()))
}

fn structure<T: CStruct>(bytes: &[u8]) -> Result<T> {
    T::from_bytes(bytes).ok_or(OdbcError::InvalidBufferLength(bytes.len()))
}

/// Interpret the bytes of a caller buffer as a value of C type `c_type`.
///
/// `None` means the caller supplied NULL.
pub fn read_parameter(c_type: CType, bytes: Option<&[u8]>) -> Result<Value> {
    let Some(bytes) = bytes else {
        return Ok(Value::Null);
    };
    Ok(match c_type {
        CType::Char | CType::Default => match std::str::from_utf8(bytes) {
            Ok(s) => Value::text(s),
            Err(_) => {
                return Err(OdbcError::InvalidCharacterValue(
                    "character data is not valid UTF-8".to_string(),
                ));
            }
        },
        CType::WChar => {
            if bytes.len() % 2 != 0 {
                return Err(OdbcError::InvalidBufferLength(bytes.len()));
            }
            Value::Text(
                bytes
                    .chunks_exact(2)
                    .map(|unit| u16::from_ne_bytes([unit[0], unit[1]]))
                    .collect(),
            )
        }
        CType::SLong => Value::Int(i32::from_ne_bytes(fixed(bytes)?)),
        CType::SShort => Value::SmallInt(i16::from_ne_bytes(fixed(bytes)?)),
        CType::SBigInt => Value::BigInt(i64::from_ne_bytes(fixed(bytes)?)),
        CType::UTinyInt => Value::TinyInt(fixed::<1>(bytes)?[0]),
        CType::STinyInt => Value::SmallInt(i8::from_ne_bytes(fixed(bytes)?) as i16),
        CType::Bit => Value::Bit(fixed::<1>(bytes)?[0] != 0),
        CType::Double => Value::Double(f64::from_ne_bytes(fixed(bytes)?)),
        CType::Float => Value::Real(f32::from_ne_bytes(fixed(bytes)?)),
        CType::Binary => Value::Binary(bytes.to_vec()),
        CType::TypeDate => {
            let d: SqlDate = structure(bytes)?;
            Value::Date(date(d.year, d.month, d.day)?)
        }
        CType::TypeTime => {
            let t: SqlTime = structure(bytes)?;
            Value::Time(time(t.hour, t.minute, t.second, 0)?)
        }
        CType::TypeTimestamp => {
            let ts: SqlTimestamp = structure(bytes)?;
            Value::Timestamp(
                date(ts.year, ts.month, ts.day)?
                    .and_time(time(ts.hour, ts.minute, ts.second, ts.fraction)?),
            )
        }
        CType::Guid => {
            let g: SqlGuid = structure(bytes)?;
            Value::Guid(Uuid::from_fields(g.data1, g.data2, g.data3, &g.data4))
        }
        CType::Numeric => {
            let n: SqlNumeric = structure(bytes)?;
            let magnitude = i128::try_from(u128::from_le_bytes(n.val))
                .map_err(|_| OdbcError::NumericOutOfRange("numeric magnitude".to_string()))?;
            let scale = u8::try_from(n.scale)
                .ok()
                .filter(|scale| *scale <= MAX_PRECISION)
                .ok_or_else(|| OdbcError::NumericOutOfRange(format!("scale {}", n.scale)))?;
            let mantissa = if n.sign == 0 { -magnitude } else { magnitude };
            let precision = n.precision.clamp(scale.max(1), MAX_PRECISION);
            Value::Decimal(Decimal::new(mantissa, precision, scale)?)
        }
    })
}

fn date(year: i16, month: u16, day: u16) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .ok_or_else(|| OdbcError::InvalidDatetime(format!("{year}-{month}-{day}")))
}

fn time(hour: u16, minute: u16, second: u16, nanos: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_nano_opt(hour as u32, minute as u32, second as u32, nanos)
        .ok_or_else(|| OdbcError::InvalidDatetime(format!("{hour}:{minute}:{second}")))
}

/// Convert a parameter value to the wire representation of its declared type
pub fn to_wire(value: &Value, ty: &WireType) -> Result<WireValue> {
    if value.is_null() {
        return Ok(WireValue::Null);
    }
    Ok(match ty.family {
        TypeFamily::Bit => WireValue::Bit(convert::to_bool(value)?),
        TypeFamily::TinyInt => WireValue::U8(convert::to_int(value)?),
        TypeFamily::SmallInt => WireValue::I16(convert::to_int(value)?),
        TypeFamily::Int => WireValue::I32(convert::to_int(value)?),
        TypeFamily::BigInt => WireValue::I64(convert::to_i64(value)?),
        TypeFamily::Real => {
            let v = convert::to_f64(value)?;
            if v.is_finite() && v.abs() > f32::MAX as f64 {
                return Err(OdbcError::NumericOutOfRange(v.to_string()));
            }
            WireValue::F32(v as f32)
        }
        TypeFamily::Float => WireValue::F64(convert::to_f64(value)?),
        TypeFamily::Decimal | TypeFamily::Numeric => {
            let precision = if ty.precision == 0 {
                MAX_PRECISION
            } else {
                ty.precision
            };
            let d = convert::to_decimal(value, precision, ty.scale.min(precision))?;
            WireValue::Decimal {
                value: d.mantissa(),
                precision: d.precision(),
                scale: d.scale(),
            }
        }
        TypeFamily::Money | TypeFamily::SmallMoney => {
            let kind = if ty.family == TypeFamily::SmallMoney {
                MoneyKind::SmallMoney
            } else {
                MoneyKind::Money
            };
            let amount = convert::to_natural_decimal(value)?;
            WireValue::Money(Money::from_decimal(&amount, kind)?.units)
        }
        TypeFamily::Char
        | TypeFamily::VarChar
        | TypeFamily::Text
        | TypeFamily::NChar
        | TypeFamily::NVarChar
        | TypeFamily::NText
        | TypeFamily::Xml => match value {
            Value::Text(units) => WireValue::Text(units.clone()),
            other => WireValue::Text(super::text::render(other).encode_utf16().collect()),
        },
        TypeFamily::Binary | TypeFamily::VarBinary | TypeFamily::Image => {
            WireValue::Bytes(convert::to_bytes(value)?)
        }
        TypeFamily::Date => WireValue::Date(days_from_date(convert::to_date(value)?)?),
        TypeFamily::Time => WireValue::Time(increments_from_time(convert::to_time(value)?)),
        TypeFamily::DateTime | TypeFamily::SmallDateTime | TypeFamily::DateTime2 => {
            let ts = convert::to_timestamp(value)?;
            WireValue::DateTime {
                days: days_from_date(ts.date())?,
                increments: increments_from_time(ts.time()),
            }
        }
        TypeFamily::DateTimeOffset => {
            let ts: DateTime<_> = convert::to_offset_timestamp(value)?;
            let utc = ts.naive_utc();
            WireValue::DateTimeOffset {
                days: days_from_date(utc.date())?,
                increments: increments_from_time(utc.time()),
                offset_minutes: (ts.offset().local_minus_utc() / 60) as i16,
            }
        }
        TypeFamily::Guid => WireValue::Guid(convert::to_guid(value)?.into_bytes()),
    })
}

/// Whether [`to_wire`] drops a nonzero fraction of `value` for this type
pub fn drops_fraction(value: &Value, ty: &WireType) -> bool {
    matches!(
        ty.family,
        TypeFamily::TinyInt | TypeFamily::SmallInt | TypeFamily::Int | TypeFamily::BigInt
    ) && convert::has_fraction(value)
}
