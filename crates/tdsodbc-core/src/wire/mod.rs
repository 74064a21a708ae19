//! Binary tabular wire codec
//!
//! Requests and responses are little-endian, length-prefixed frames. A
//! response is a sequence of tokens (`ColMetadata`, `Row`, `Done`, ...)
//! split across one or more packets; [`TokenReader`] reassembles them.

mod reader;
mod request;
mod token;

pub use reader::TokenReader;
pub use request::{Request, WireParam};
pub use token::{ColumnDef, DoneStatus, EnvChange, ParamDef, Token};

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Declared length of `(MAX)` types
pub const MAX_LENGTH: u32 = u32::MAX;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Frame truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Unknown token type 0x{0:02x}")]
    UnknownToken(u8),

    #[error("Unknown request type 0x{0:02x}")]
    UnknownRequest(u8),

    #[error("Unknown type family 0x{0:02x}")]
    UnknownType(u8),

    #[error("Unknown value tag 0x{0:02x}")]
    UnknownValue(u8),

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

pub type WireResult<T> = std::result::Result<T, WireError>;

/// Backend type families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeFamily {
    Bit = 0x01,
    TinyInt = 0x02,
    SmallInt = 0x03,
    Int = 0x04,
    BigInt = 0x05,
    Real = 0x06,
    Float = 0x07,
    Decimal = 0x08,
    Numeric = 0x09,
    Money = 0x0a,
    SmallMoney = 0x0b,
    Char = 0x10,
    VarChar = 0x11,
    Text = 0x12,
    NChar = 0x13,
    NVarChar = 0x14,
    NText = 0x15,
    Xml = 0x16,
    Binary = 0x20,
    VarBinary = 0x21,
    Image = 0x22,
    Date = 0x30,
    Time = 0x31,
    DateTime = 0x32,
    SmallDateTime = 0x33,
    DateTime2 = 0x34,
    DateTimeOffset = 0x35,
    Guid = 0x40,
}

impl TypeFamily {
    pub fn from_u8(tag: u8) -> WireResult<Self> {
        use TypeFamily::*;
        Ok(match tag {
            0x01 => Bit,
            0x02 => TinyInt,
            0x03 => SmallInt,
            0x04 => Int,
            0x05 => BigInt,
            0x06 => Real,
            0x07 => Float,
            0x08 => Decimal,
            0x09 => Numeric,
            0x0a => Money,
            0x0b => SmallMoney,
            0x10 => Char,
            0x11 => VarChar,
            0x12 => Text,
            0x13 => NChar,
            0x14 => NVarChar,
            0x15 => NText,
            0x16 => Xml,
            0x20 => Binary,
            0x21 => VarBinary,
            0x22 => Image,
            0x30 => Date,
            0x31 => Time,
            0x32 => DateTime,
            0x33 => SmallDateTime,
            0x34 => DateTime2,
            0x35 => DateTimeOffset,
            0x40 => Guid,
            other => return Err(WireError::UnknownType(other)),
        })
    }
}

/// Type information of a column or parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireType {
    pub family: TypeFamily,
    /// Declared length: bytes for single-byte text and binary, characters
    /// for UTF-16 text, [`MAX_LENGTH`] for unbounded types, 0 if unknown
    pub length: u32,
    pub precision: u8,
    pub scale: u8,
}

impl WireType {
    pub fn new(family: TypeFamily) -> Self {
        Self {
            family,
            length: 0,
            precision: 0,
            scale: 0,
        }
    }

    pub fn sized(family: TypeFamily, length: u32) -> Self {
        Self {
            length,
            ..Self::new(family)
        }
    }

    pub fn decimal(family: TypeFamily, precision: u8, scale: u8) -> Self {
        Self {
            precision,
            scale,
            ..Self::new(family)
        }
    }

    /// Temporal types with a fractional-second precision
    pub fn temporal(family: TypeFamily, scale: u8) -> Self {
        Self {
            scale,
            ..Self::new(family)
        }
    }

    pub fn is_max(&self) -> bool {
        self.length == MAX_LENGTH
    }

    /// Parse a declared type such as `nvarchar(50)`, `decimal(10,2)` or
    /// `varbinary(max)`; `None` for names outside the known families.
    ///
    /// Variable-length types without a length are unbounded; fixed-length
    /// ones default to a single unit.
    pub fn parse(declared: &str) -> Option<Self> {
        let declared = declared.trim().to_ascii_lowercase();
        let (name, args) = match declared.split_once('(') {
            Some((name, rest)) => (name.trim(), rest.trim_end_matches(')').trim()),
            None => (declared.as_str(), ""),
        };
        let mut parts = args.split(',').map(str::trim).filter(|part| !part.is_empty());
        let first = parts.next();
        let second = parts.next();
        let length = |fixed: bool| match first {
            Some("max") => MAX_LENGTH,
            Some(n) => n.parse().unwrap_or(MAX_LENGTH),
            None if fixed => 1,
            None => MAX_LENGTH,
        };
        let scale = |default: u8| first.and_then(|s| s.parse().ok()).unwrap_or(default);

        use TypeFamily::*;
        Some(match name {
            "bit" | "boolean" | "bool" => Self::new(Bit),
            "tinyint" => Self::new(TinyInt),
            "smallint" => Self::new(SmallInt),
            "int" | "integer" => Self::new(Int),
            "bigint" => Self::new(BigInt),
            "real" => Self::new(Real),
            "float" | "double" | "double precision" => match first.and_then(|p| p.parse::<u8>().ok()) {
                Some(bits) if bits <= 24 => Self::new(Real),
                _ => Self::new(Float),
            },
            "decimal" | "numeric" => {
                let family = if name == "decimal" { Decimal } else { Numeric };
                let precision = first.and_then(|p| p.parse().ok()).unwrap_or(18);
                let scale = second.and_then(|s| s.parse().ok()).unwrap_or(0);
                Self::decimal(family, precision, scale)
            }
            "money" => Self::decimal(Money, 19, 4),
            "smallmoney" => Self::decimal(SmallMoney, 10, 4),
            "char" | "character" => Self::sized(Char, length(true)),
            "varchar" | "character varying" => Self::sized(VarChar, length(false)),
            "text" => Self::sized(Text, MAX_LENGTH),
            "nchar" => Self::sized(NChar, length(true)),
            "nvarchar" => Self::sized(NVarChar, length(false)),
            "ntext" => Self::sized(NText, MAX_LENGTH),
            "xml" => Self::sized(Xml, MAX_LENGTH),
            "binary" => Self::sized(Binary, length(true)),
            "varbinary" => Self::sized(VarBinary, length(false)),
            "image" | "blob" => Self::sized(Image, MAX_LENGTH),
            "date" => Self::new(Date),
            "time" => Self::temporal(Time, scale(7)),
            "datetime" => Self::temporal(DateTime, 3),
            "smalldatetime" => Self::temporal(SmallDateTime, 0),
            "datetime2" | "timestamp" => Self::temporal(DateTime2, scale(7)),
            "datetimeoffset" => Self::temporal(DateTimeOffset, scale(7)),
            "uniqueidentifier" | "uuid" => Self::new(Guid),
            _ => return None,
        })
    }

    pub(crate) fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.family as u8);
        dst.put_u32_le(self.length);
        dst.put_u8(self.precision);
        dst.put_u8(self.scale);
    }

    pub(crate) fn decode(src: &mut &[u8]) -> WireResult<Self> {
        need(src, 7)?;
        let family = TypeFamily::from_u8(src.get_u8())?;
        Ok(Self {
            family,
            length: src.get_u32_le(),
            precision: src.get_u8(),
            scale: src.get_u8(),
        })
    }
}

/// Raw value as carried on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Null,
    Bit(bool),
    U8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal { value: i128, precision: u8, scale: u8 },
    /// Ten-thousandths of a currency unit
    Money(i64),
    /// UTF-16 code units
    Text(Vec<u16>),
    Bytes(Vec<u8>),
    /// Days since 0001-01-01
    Date(u32),
    /// 100ns increments since midnight
    Time(u64),
    DateTime { days: u32, increments: u64 },
    /// UTC date and time plus the original offset in minutes
    DateTimeOffset { days: u32, increments: u64, offset_minutes: i16 },
    /// RFC 4122 byte order
    Guid([u8; 16]),
}

impl WireValue {
    fn tag(&self) -> u8 {
        match self {
            WireValue::Null => 0x00,
            WireValue::Bit(_) => 0x01,
            WireValue::U8(_) => 0x02,
            WireValue::I16(_) => 0x03,
            WireValue::I32(_) => 0x04,
            WireValue::I64(_) => 0x05,
            WireValue::F32(_) => 0x06,
            WireValue::F64(_) => 0x07,
            WireValue::Decimal { .. } => 0x08,
            WireValue::Money(_) => 0x09,
            WireValue::Text(_) => 0x10,
            WireValue::Bytes(_) => 0x20,
            WireValue::Date(_) => 0x30,
            WireValue::Time(_) => 0x31,
            WireValue::DateTime { .. } => 0x32,
            WireValue::DateTimeOffset { .. } => 0x33,
            WireValue::Guid(_) => 0x40,
        }
    }

    pub(crate) fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.tag());
        match self {
            WireValue::Null => {}
            WireValue::Bit(v) => dst.put_u8(*v as u8),
            WireValue::U8(v) => dst.put_u8(*v),
            WireValue::I16(v) => dst.put_i16_le(*v),
            WireValue::I32(v) => dst.put_i32_le(*v),
            WireValue::I64(v) => dst.put_i64_le(*v),
            WireValue::F32(v) => dst.put_f32_le(*v),
            WireValue::F64(v) => dst.put_f64_le(*v),
            WireValue::Decimal {
                value,
                precision,
                scale,
            } => {
                dst.put_u8(*precision);
                dst.put_u8(*scale);
                dst.put_i128_le(*value);
            }
            WireValue::Money(v) => dst.put_i64_le(*v),
            WireValue::Text(units) => put_utf16(dst, units),
            WireValue::Bytes(bytes) => {
                dst.put_u32_le(bytes.len() as u32);
                dst.put_slice(bytes);
            }
            WireValue::Date(days) => dst.put_u32_le(*days),
            WireValue::Time(increments) => dst.put_u64_le(*increments),
            WireValue::DateTime { days, increments } => {
                dst.put_u32_le(*days);
                dst.put_u64_le(*increments);
            }
            WireValue::DateTimeOffset {
                days,
                increments,
                offset_minutes,
            } => {
                dst.put_u32_le(*days);
                dst.put_u64_le(*increments);
                dst.put_i16_le(*offset_minutes);
            }
            WireValue::Guid(bytes) => dst.put_slice(bytes),
        }
    }

    pub(crate) fn decode(src: &mut &[u8]) -> WireResult<Self> {
        need(src, 1)?;
        let tag = src.get_u8();
        Ok(match tag {
            0x00 => WireValue::Null,
            0x01 => {
                need(src, 1)?;
                WireValue::Bit(src.get_u8() != 0)
            }
            0x02 => {
                need(src, 1)?;
                WireValue::U8(src.get_u8())
            }
            0x03 => {
                need(src, 2)?;
                WireValue::I16(src.get_i16_le())
            }
            0x04 => {
                need(src, 4)?;
                WireValue::I32(src.get_i32_le())
            }
            0x05 => {
                need(src, 8)?;
                WireValue::I64(src.get_i64_le())
            }
            0x06 => {
                need(src, 4)?;
                WireValue::F32(src.get_f32_le())
            }
            0x07 => {
                need(src, 8)?;
                WireValue::F64(src.get_f64_le())
            }
            0x08 => {
                need(src, 18)?;
                let precision = src.get_u8();
                let scale = src.get_u8();
                WireValue::Decimal {
                    value: src.get_i128_le(),
                    precision,
                    scale,
                }
            }
            0x09 => {
                need(src, 8)?;
                WireValue::Money(src.get_i64_le())
            }
            0x10 => WireValue::Text(get_utf16(src)?),
            0x20 => {
                need(src, 4)?;
                let len = src.get_u32_le() as usize;
                need(src, len)?;
                let bytes = src[..len].to_vec();
                src.advance(len);
                WireValue::Bytes(bytes)
            }
            0x30 => {
                need(src, 4)?;
                WireValue::Date(src.get_u32_le())
            }
            0x31 => {
                need(src, 8)?;
                WireValue::Time(src.get_u64_le())
            }
            0x32 => {
                need(src, 12)?;
                WireValue::DateTime {
                    days: src.get_u32_le(),
                    increments: src.get_u64_le(),
                }
            }
            0x33 => {
                need(src, 14)?;
                WireValue::DateTimeOffset {
                    days: src.get_u32_le(),
                    increments: src.get_u64_le(),
                    offset_minutes: src.get_i16_le(),
                }
            }
            0x40 => {
                need(src, 16)?;
                let mut bytes = [0u8; 16];
                src.copy_to_slice(&mut bytes);
                WireValue::Guid(bytes)
            }
            other => return Err(WireError::UnknownValue(other)),
        })
    }
}

pub(crate) fn need(src: &[u8], needed: usize) -> WireResult<()> {
    if src.len() < needed {
        Err(WireError::Truncated {
            needed,
            available: src.len(),
        })
    } else {
        Ok(())
    }
}

pub(crate) fn put_utf16(dst: &mut BytesMut, units: &[u16]) {
    dst.put_u32_le(units.len() as u32);
    for unit in units {
        dst.put_u16_le(*unit);
    }
}

pub(crate) fn get_utf16(src: &mut &[u8]) -> WireResult<Vec<u16>> {
    need(src, 4)?;
    let len = src.get_u32_le() as usize;
    let bytes = len
        .checked_mul(2)
        .ok_or_else(|| WireError::Malformed(format!("string length {len} overflows")))?;
    need(src, bytes)?;
    Ok((0..len).map(|_| src.get_u16_le()).collect())
}

pub(crate) fn put_str(dst: &mut BytesMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    put_utf16(dst, &units);
}

pub(crate) fn get_str(src: &mut &[u8]) -> WireResult<String> {
    let units = get_utf16(src)?;
    String::from_utf16(&units).map_err(|e| WireError::Malformed(e.to_string()))
}
