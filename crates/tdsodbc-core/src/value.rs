//! Abstract SQL values passed between the wire and caller buffers

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::error::{OdbcError, Result};

/// Largest precision an exact decimal may declare
pub const MAX_PRECISION: u8 = 38;

/// A database value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL of any type
    Null,
    /// Bit
    Bit(bool),
    /// Unsigned 8-bit integer
    TinyInt(u8),
    /// 16-bit integer
    SmallInt(i16),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    BigInt(i64),
    /// Single precision float
    Real(f32),
    /// Double precision float
    Double(f64),
    /// Exact decimal with declared precision and scale
    Decimal(Decimal),
    /// Money family value
    Money(Money),
    /// Text as UTF-16 code units
    Text(Vec<u16>),
    /// Raw bytes
    Binary(Vec<u8>),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Date and time without offset
    Timestamp(NaiveDateTime),
    /// Date and time with a UTC offset
    TimestampOffset(DateTime<FixedOffset>),
    /// 128-bit unique identifier
    Guid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn text(s: &str) -> Self {
        Value::Text(s.encode_utf16().collect())
    }

    /// Lossy UTF-8 view of a text value
    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Text(units) => Some(String::from_utf16_lossy(units)),
            _ => None,
        }
    }

    /// Human-readable name of the variant, for conversion errors
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bit(_) => "bit",
            Value::TinyInt(_) => "tinyint",
            Value::SmallInt(_) => "smallint",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Real(_) => "real",
            Value::Double(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Money(_) => "money",
            Value::Text(_) => "text",
            Value::Binary(_) => "binary",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "datetime",
            Value::TimestampOffset(_) => "datetimeoffset",
            Value::Guid(_) => "uniqueidentifier",
        }
    }
}

/// Exact decimal: `mantissa * 10^-scale`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal {
    mantissa: i128,
    precision: u8,
    scale: u8,
}

impl Decimal {
    pub fn new(mantissa: i128, precision: u8, scale: u8) -> Result<Self> {
        if precision == 0 || precision > MAX_PRECISION || scale > precision {
            return Err(OdbcError::NumericOutOfRange(format!(
                "invalid decimal precision/scale ({precision}, {scale})"
            )));
        }
        let decimal = Self {
            mantissa,
            precision,
            scale,
        };
        if decimal.digits() > precision as usize {
            return Err(OdbcError::NumericOutOfRange(format!(
                "{decimal} exceeds precision {precision}"
            )));
        }
        Ok(decimal)
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    fn digits(&self) -> usize {
        let magnitude = self.mantissa.unsigned_abs();
        if magnitude == 0 {
            1
        } else {
            magnitude.to_string().len()
        }
    }

    /// Parse decimal text and fit it to `precision`/`scale`.
    ///
    /// Extra fractional digits are rounded half away from zero.
    pub fn parse(text: &str, precision: u8, scale: u8) -> Result<Self> {
        let invalid = || OdbcError::InvalidCharacterValue(format!("'{text}' is not a decimal"));
        let trimmed = text.trim();
        let (negative, body) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let overflow = || OdbcError::NumericOutOfRange(format!("'{text}' does not fit"));
        let scale_usize = scale as usize;
        let mut mantissa: i128 = 0;
        for b in int_part.bytes() {
            mantissa = push_digit(mantissa, b).ok_or_else(overflow)?;
        }
        let mut frac = frac_part.bytes();
        for _ in 0..scale_usize {
            let b = frac.next().unwrap_or(b'0');
            mantissa = push_digit(mantissa, b).ok_or_else(overflow)?;
        }
        if frac.next().is_some_and(|b| b >= b'5') {
            mantissa = mantissa.checked_add(1).ok_or_else(overflow)?;
        }
        if negative {
            mantissa = -mantissa;
        }
        Self::new(mantissa, precision, scale)
    }

    /// Same value at another scale; digits below the new scale are dropped
    pub fn rescale(&self, precision: u8, scale: u8) -> Result<Self> {
        let mantissa = if scale >= self.scale {
            10i128
                .checked_pow((scale - self.scale) as u32)
                .and_then(|factor| self.mantissa.checked_mul(factor))
                .ok_or_else(|| OdbcError::NumericOutOfRange(self.to_string()))?
        } else {
            self.mantissa / 10i128.pow((self.scale - scale) as u32)
        };
        Self::new(mantissa, precision, scale)
    }

    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 10f64.powi(self.scale as i32)
    }

    /// Whole part, truncated toward zero
    pub fn trunc(&self) -> i128 {
        self.mantissa / 10i128.pow(self.scale as u32)
    }

    /// Nonzero digits after the decimal point
    pub fn has_fraction(&self) -> bool {
        self.mantissa % 10i128.pow(self.scale as u32) != 0
    }
}

fn push_digit(acc: i128, digit: u8) -> Option<i128> {
    acc.checked_mul(10)?.checked_add((digit - b'0') as i128)
}

/// Renders with exactly `scale` fractional digits, keeping trailing zeros
impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_scaled(f, self.mantissa, self.scale)
    }
}

fn write_scaled(f: &mut fmt::Formatter<'_>, mantissa: i128, scale: u8) -> fmt::Result {
    let digits = mantissa.unsigned_abs().to_string();
    let scale = scale as usize;
    if mantissa < 0 {
        f.write_str("-")?;
    }
    if scale == 0 {
        return f.write_str(&digits);
    }
    if digits.len() <= scale {
        write!(f, "0.{}{}", "0".repeat(scale - digits.len()), digits)
    } else {
        let (int_part, frac_part) = digits.split_at(digits.len() - scale);
        write!(f, "{int_part}.{frac_part}")
    }
}

/// Money sub-types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoneyKind {
    Money,
    SmallMoney,
}

impl MoneyKind {
    /// Fixed rendering scale of the sub-type
    pub fn scale(self) -> u8 {
        match self {
            MoneyKind::Money | MoneyKind::SmallMoney => 4,
        }
    }

    pub fn precision(self) -> u8 {
        match self {
            MoneyKind::Money => 19,
            MoneyKind::SmallMoney => 10,
        }
    }
}

/// Currency amount stored in ten-thousandths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Money {
    pub units: i64,
    pub kind: MoneyKind,
}

impl Money {
    pub const UNITS_PER_WHOLE: i64 = 10_000;

    pub fn to_decimal(&self) -> Decimal {
        Decimal {
            mantissa: self.units as i128,
            precision: self.kind.precision(),
            scale: 4,
        }
    }

    pub fn from_decimal(value: &Decimal, kind: MoneyKind) -> Result<Self> {
        let rescaled = value.rescale(MAX_PRECISION, 4)?;
        let units = i64::try_from(rescaled.mantissa())
            .map_err(|_| OdbcError::NumericOutOfRange(format!("{value} is not a valid money")))?;
        if kind == MoneyKind::SmallMoney && i32::try_from(units).is_err() {
            return Err(OdbcError::NumericOutOfRange(format!(
                "{value} is not a valid smallmoney"
            )));
        }
        Ok(Self { units, kind })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = self.kind.scale();
        let mantissa = self.units as i128 / 10i128.pow(4 - scale as u32);
        write_scaled(f, mantissa, scale)
    }
}
