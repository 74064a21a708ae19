use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::error::{OdbcError, Result};
use crate::value::{Decimal, Money, MoneyKind, Value};
use crate::wire::{TypeFamily, WireType, WireValue};

const INCREMENTS_PER_SECOND: u64 = 10_000_000;
const SECONDS_PER_DAY: u64 = 86_400;

pub(crate) fn date_from_days(days: u32) -> Result<NaiveDate> {
    i32::try_from(days)
        .ok()
        .and_then(|days| days.checked_add(1))
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| OdbcError::InvalidDatetime(format!("day number {days} out of range")))
}

pub(crate) fn days_from_date(date: NaiveDate) -> Result<u32> {
    u32::try_from(date.num_days_from_ce() - 1)
        .map_err(|_| OdbcError::InvalidDatetime(format!("{date} precedes 0001-01-01")))
}

pub(crate) fn time_from_increments(increments: u64) -> Result<NaiveTime> {
    let seconds = increments / INCREMENTS_PER_SECOND;
    let nanos = (increments % INCREMENTS_PER_SECOND) * 100;
    if seconds >= SECONDS_PER_DAY {
        return Err(OdbcError::InvalidDatetime(format!(
            "{increments} increments exceed one day"
        )));
    }
    NaiveTime::from_num_seconds_from_midnight_opt(seconds as u32, nanos as u32)
        .ok_or_else(|| OdbcError::InvalidDatetime(format!("{increments} increments")))
}

pub(crate) fn increments_from_time(time: NaiveTime) -> u64 {
    use chrono::Timelike;
    let nanos = time.nanosecond().min(999_999_999) as u64;
    time.num_seconds_from_midnight() as u64 * INCREMENTS_PER_SECOND + nanos / 100
}

fn timestamp(days: u32, increments: u64) -> Result<NaiveDateTime> {
    Ok(date_from_days(days)?.and_time(time_from_increments(increments)?))
}

/// Turn a raw wire value into a [`Value`] shaped by the declared column type.
///
/// Fixed-width text is space-padded to its declared length and exact
/// numerics take the declared scale.
pub fn decode(raw: &WireValue, ty: &WireType) -> Result<Value> {
    Ok(match raw {
        WireValue::Null => Value::Null,
        WireValue::Bit(v) => Value::Bit(*v),
        WireValue::U8(v) => Value::TinyInt(*v),
        WireValue::I16(v) => Value::SmallInt(*v),
        WireValue::I32(v) => Value::Int(*v),
        WireValue::I64(v) => Value::BigInt(*v),
        WireValue::F32(v) => Value::Real(*v),
        WireValue::F64(v) => Value::Double(*v),
        WireValue::Decimal {
            value,
            precision,
            scale,
        } => {
            let decimal = Decimal::new(*value, (*precision).max(1), *scale)?;
            match ty.family {
                TypeFamily::Money | TypeFamily::SmallMoney => {
                    Value::Money(Money::from_decimal(&decimal, money_kind(ty.family))?)
                }
                TypeFamily::Decimal | TypeFamily::Numeric if ty.precision > 0 => {
                    Value::Decimal(decimal.rescale(ty.precision, ty.scale)?)
                }
                _ => Value::Decimal(decimal),
            }
        }
        WireValue::Money(units) => Value::Money(Money {
            units: *units,
            kind: money_kind(ty.family),
        }),
        WireValue::Text(units) => Value::Text(pad_fixed_width(units, ty)),
        WireValue::Bytes(bytes) => Value::Binary(bytes.clone()),
        WireValue::Date(days) => Value::Date(date_from_days(*days)?),
        WireValue::Time(increments) => Value::Time(time_from_increments(*increments)?),
        WireValue::DateTime { days, increments } => Value::Timestamp(timestamp(*days, *increments)?),
        WireValue::DateTimeOffset {
            days,
            increments,
            offset_minutes,
        } => {
            let offset = FixedOffset::east_opt(*offset_minutes as i32 * 60).ok_or_else(|| {
                OdbcError::InvalidDatetime(format!("offset of {offset_minutes} minutes"))
            })?;
            Value::TimestampOffset(DateTime::from_naive_utc_and_offset(
                timestamp(*days, *increments)?,
                offset,
            ))
        }
        WireValue::Guid(bytes) => Value::Guid(Uuid::from_bytes(*bytes)),
    })
}

fn money_kind(family: TypeFamily) -> MoneyKind {
    if family == TypeFamily::SmallMoney {
        MoneyKind::SmallMoney
    } else {
        MoneyKind::Money
    }
}

fn pad_fixed_width(units: &[u16], ty: &WireType) -> Vec<u16> {
    let fixed = matches!(ty.family, TypeFamily::Char | TypeFamily::NChar);
    let width = ty.length as usize;
    if !fixed || ty.is_max() || units.len() >= width {
        return units.to_vec();
    }
    let mut padded = Vec::with_capacity(width);
    padded.extend_from_slice(units);
    padded.resize(width, u16::from(b' '));
    padded
}
