use chrono::{Datelike, Timelike};

use super::{convert, text};
use crate::error::{OdbcError, Result};
use crate::types::{
    CStruct, CType, Indicator, SqlDate, SqlGuid, SqlNumeric, SqlTime, SqlTimestamp, SqlType,
};
use crate::value::Value;

/// Outcome of writing (part of) a value into a caller buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    /// Indicator to report: NULL, or the bytes remaining from the requested offset
    pub indicator: Indicator,
    /// Bytes written into the buffer, excluding any terminator
    pub written: usize,
    /// The buffer could not hold everything that remained
    pub truncated: bool,
    /// Offset to resume from on the next call; `None` once the value is exhausted
    pub next_offset: Option<usize>,
    /// An integer target received the value without its nonzero fraction
    pub fraction_dropped: bool,
}

impl Encoded {
    fn null() -> Self {
        Self {
            indicator: Indicator::Null,
            written: 0,
            truncated: false,
            next_offset: None,
            fraction_dropped: false,
        }
    }

    fn complete(len: usize) -> Self {
        Self {
            indicator: Indicator::Length(len),
            written: len,
            truncated: false,
            next_offset: None,
            fraction_dropped: false,
        }
    }
}

/// Concrete C type for a request that may say `Default`
pub fn resolve_c_type(target: CType, sql_type: SqlType) -> CType {
    match target {
        CType::Default => sql_type.default_c_type(),
        other => other,
    }
}

/// Write `value` into `buf` as `target`, starting `offset` bytes into the
/// converted representation.
///
/// Variable-length targets may be read in pieces: a truncated call reports
/// the full remaining length and the offset to continue from. Character
/// targets always get a NUL terminator; a wide chunk never ends on half
/// of a surrogate pair.
pub fn encode(value: &Value, target: CType, buf: &mut [u8], offset: usize) -> Result<Encoded> {
    if value.is_null() {
        return Ok(Encoded::null());
    }
    match target {
        CType::Char => Ok(encode_char(&text::render(value), buf, offset)),
        CType::WChar => {
            let units = match value {
                Value::Text(units) => units.clone(),
                other => text::render(other).encode_utf16().collect(),
            };
            Ok(encode_wide(&units, buf, offset))
        }
        CType::Binary => {
            let bytes = match value {
                Value::Text(_) => text::render(value).into_bytes(),
                other => convert::to_bytes(other)?,
            };
            Ok(encode_binary(&bytes, buf, offset))
        }
        CType::Default => Err(OdbcError::RestrictedDataType(
            "default C type must be resolved against the column type".to_string(),
        )),
        fixed => encode_fixed(value, fixed, buf),
    }
}

fn encode_char(rendered: &str, buf: &mut [u8], offset: usize) -> Encoded {
    let remaining = rendered.get(offset..).unwrap_or_default();
    let total = remaining.len();
    let Some(capacity) = buf.len().checked_sub(1) else {
        return Encoded {
            indicator: Indicator::Length(total),
            written: 0,
            truncated: total > 0,
            next_offset: Some(offset),
            fraction_dropped: false,
        };
    };
    if total <= capacity {
        buf[..total].copy_from_slice(remaining.as_bytes());
        buf[total] = 0;
        return Encoded::complete(total);
    }
    let mut take = capacity;
    while take > 0 && !remaining.is_char_boundary(take) {
        take -= 1;
    }
    buf[..take].copy_from_slice(&remaining.as_bytes()[..take]);
    buf[take] = 0;
    Encoded {
        indicator: Indicator::Length(total),
        written: take,
        truncated: true,
        next_offset: Some(offset + take),
        fraction_dropped: false,
    }
}

fn encode_wide(units: &[u16], buf: &mut [u8], offset: usize) -> Encoded {
    const WIDTH: usize = 2;
    let remaining = units.get(offset / WIDTH..).unwrap_or_default();
    let total = remaining.len() * WIDTH;
    let Some(capacity) = (buf.len() / WIDTH).checked_sub(1) else {
        return Encoded {
            indicator: Indicator::Length(total),
            written: 0,
            truncated: total > 0,
            next_offset: Some(offset),
            fraction_dropped: false,
        };
    };
    let fits = remaining.len() <= capacity;
    let mut take = remaining.len().min(capacity);
    if !fits && take > 0 && is_high_surrogate(remaining[take - 1]) {
        take -= 1;
    }
    for (i, unit) in remaining[..take].iter().enumerate() {
        buf[i * WIDTH..(i + 1) * WIDTH].copy_from_slice(&unit.to_ne_bytes());
    }
    buf[take * WIDTH..(take + 1) * WIDTH].copy_from_slice(&0u16.to_ne_bytes());
    if fits {
        return Encoded::complete(total);
    }
    Encoded {
        indicator: Indicator::Length(total),
        written: take * WIDTH,
        truncated: true,
        next_offset: Some(offset + take * WIDTH),
        fraction_dropped: false,
    }
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xD800..=0xDBFF).contains(&unit)
}

fn encode_binary(bytes: &[u8], buf: &mut [u8], offset: usize) -> Encoded {
    let remaining = bytes.get(offset..).unwrap_or_default();
    let total = remaining.len();
    if total <= buf.len() {
        buf[..total].copy_from_slice(remaining);
        return Encoded::complete(total);
    }
    let take = buf.len();
    buf.copy_from_slice(&remaining[..take]);
    Encoded {
        indicator: Indicator::Length(total),
        written: take,
        truncated: true,
        next_offset: Some(offset + take),
        fraction_dropped: false,
    }
}

fn encode_fixed(value: &Value, target: CType, buf: &mut [u8]) -> Result<Encoded> {
    let bytes: Vec<u8> = match target {
        CType::SLong => convert::to_int::<i32>(value)?.to_ne_bytes().to_vec(),
        CType::SShort => convert::to_int::<i16>(value)?.to_ne_bytes().to_vec(),
        CType::SBigInt => convert::to_i64(value)?.to_ne_bytes().to_vec(),
        CType::UTinyInt => vec![convert::to_int::<u8>(value)?],
        CType::STinyInt => convert::to_int::<i8>(value)?.to_ne_bytes().to_vec(),
        CType::Bit => vec![convert::to_bool(value)? as u8],
        CType::Double => convert::to_f64(value)?.to_ne_bytes().to_vec(),
        CType::Float => {
            let v = convert::to_f64(value)?;
            if v.is_finite() && v.abs() > f32::MAX as f64 {
                return Err(OdbcError::NumericOutOfRange(v.to_string()));
            }
            (v as f32).to_ne_bytes().to_vec()
        }
        CType::TypeDate => {
            let d = convert::to_date(value)?;
            SqlDate {
                year: year_of(d.year())?,
                month: d.month() as u16,
                day: d.day() as u16,
            }
            .to_bytes()
        }
        CType::TypeTime => {
            let t = convert::to_time(value)?;
            SqlTime {
                hour: t.hour() as u16,
                minute: t.minute() as u16,
                second: t.second() as u16,
            }
            .to_bytes()
        }
        CType::TypeTimestamp => {
            let ts = convert::to_timestamp(value)?;
            SqlTimestamp {
                year: year_of(ts.year())?,
                month: ts.month() as u16,
                day: ts.day() as u16,
                hour: ts.hour() as u16,
                minute: ts.minute() as u16,
                second: ts.second() as u16,
                fraction: ts.nanosecond().min(999_999_999),
            }
            .to_bytes()
        }
        CType::Guid => {
            let guid = convert::to_guid(value)?;
            let (data1, data2, data3, data4) = guid.as_fields();
            SqlGuid {
                data1,
                data2,
                data3,
                data4: *data4,
            }
            .to_bytes()
        }
        CType::Numeric => {
            let d = convert::to_natural_decimal(value)?;
            SqlNumeric {
                precision: d.precision(),
                scale: d.scale() as i8,
                sign: u8::from(d.mantissa() >= 0),
                val: d.mantissa().unsigned_abs().to_le_bytes(),
            }
            .to_bytes()
        }
        CType::Char | CType::WChar | CType::Binary | CType::Default => {
            return Err(OdbcError::General(format!("{target:?} is not a fixed-size type")));
        }
    };
    if buf.len() < bytes.len() {
        return Err(OdbcError::InvalidBufferLength(buf.len()));
    }
    buf[..bytes.len()].copy_from_slice(&bytes);
    Ok(Encoded {
        fraction_dropped: target.is_integer() && convert::has_fraction(value),
        ..Encoded::complete(bytes.len())
    })
}

fn year_of(year: i32) -> Result<i16> {
    i16::try_from(year).map_err(|_| OdbcError::InvalidDatetime(format!("year {year}")))
}
