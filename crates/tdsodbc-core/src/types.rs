//! SQL types, C buffer types and the fixed-layout structures exchanged with callers

use std::mem::size_of;

/// SQL data types as reported to and accepted from callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Char,
    VarChar,
    LongVarChar,
    WChar,
    WVarChar,
    WLongVarChar,
    Decimal,
    Numeric,
    SmallInt,
    Integer,
    Real,
    Float,
    Double,
    Bit,
    TinyInt,
    BigInt,
    Binary,
    VarBinary,
    LongVarBinary,
    Date,
    Time,
    Timestamp,
    /// Timestamp carrying a UTC offset
    TimestampOffset,
    Guid,
}

impl SqlType {
    pub fn code(self) -> i16 {
        match self {
            SqlType::Char => 1,
            SqlType::Numeric => 2,
            SqlType::Decimal => 3,
            SqlType::Integer => 4,
            SqlType::SmallInt => 5,
            SqlType::Float => 6,
            SqlType::Real => 7,
            SqlType::Double => 8,
            SqlType::VarChar => 12,
            SqlType::LongVarChar => -1,
            SqlType::Binary => -2,
            SqlType::VarBinary => -3,
            SqlType::LongVarBinary => -4,
            SqlType::BigInt => -5,
            SqlType::TinyInt => -6,
            SqlType::Bit => -7,
            SqlType::WChar => -8,
            SqlType::WVarChar => -9,
            SqlType::WLongVarChar => -10,
            SqlType::Guid => -11,
            SqlType::Date => 91,
            SqlType::Time => 92,
            SqlType::Timestamp => 93,
            SqlType::TimestampOffset => -155,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Some(match code {
            1 => SqlType::Char,
            2 => SqlType::Numeric,
            3 => SqlType::Decimal,
            4 => SqlType::Integer,
            5 => SqlType::SmallInt,
            6 => SqlType::Float,
            7 => SqlType::Real,
            8 => SqlType::Double,
            12 => SqlType::VarChar,
            -1 => SqlType::LongVarChar,
            -2 => SqlType::Binary,
            -3 => SqlType::VarBinary,
            -4 => SqlType::LongVarBinary,
            -5 => SqlType::BigInt,
            -6 => SqlType::TinyInt,
            -7 => SqlType::Bit,
            -8 => SqlType::WChar,
            -9 => SqlType::WVarChar,
            -10 => SqlType::WLongVarChar,
            -11 => SqlType::Guid,
            9 | 91 => SqlType::Date,
            10 | 92 => SqlType::Time,
            11 | 93 => SqlType::Timestamp,
            -155 => SqlType::TimestampOffset,
            _ => return None,
        })
    }

    /// C type used when a caller asks for `CType::Default`
    pub fn default_c_type(self) -> CType {
        match self {
            SqlType::Integer => CType::SLong,
            SqlType::SmallInt => CType::SShort,
            SqlType::BigInt => CType::SBigInt,
            SqlType::TinyInt => CType::UTinyInt,
            SqlType::Double | SqlType::Float => CType::Double,
            SqlType::Real => CType::Float,
            SqlType::Bit => CType::Bit,
            SqlType::Date => CType::TypeDate,
            SqlType::Time => CType::TypeTime,
            SqlType::Timestamp => CType::TypeTimestamp,
            SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary => CType::Binary,
            SqlType::Guid => CType::Guid,
            SqlType::WChar | SqlType::WVarChar | SqlType::WLongVarChar => CType::WChar,
            SqlType::Char
            | SqlType::VarChar
            | SqlType::LongVarChar
            | SqlType::Decimal
            | SqlType::Numeric
            | SqlType::TimestampOffset => CType::Char,
        }
    }

    pub fn is_character(self) -> bool {
        matches!(
            self,
            SqlType::Char
                | SqlType::VarChar
                | SqlType::LongVarChar
                | SqlType::WChar
                | SqlType::WVarChar
                | SqlType::WLongVarChar
        )
    }

    pub fn is_wide(self) -> bool {
        matches!(
            self,
            SqlType::WChar | SqlType::WVarChar | SqlType::WLongVarChar
        )
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary
        )
    }

    pub fn is_exact_numeric(self) -> bool {
        matches!(
            self,
            SqlType::Decimal
                | SqlType::Numeric
                | SqlType::SmallInt
                | SqlType::Integer
                | SqlType::TinyInt
                | SqlType::BigInt
        )
    }

    pub fn is_approximate_numeric(self) -> bool {
        matches!(self, SqlType::Real | SqlType::Float | SqlType::Double)
    }

    /// Fixed-width text types are space-padded to their declared length
    pub fn is_fixed_width(self) -> bool {
        matches!(self, SqlType::Char | SqlType::WChar)
    }

    /// Name used in catalog results
    pub fn type_name(self) -> &'static str {
        match self {
            SqlType::Char => "char",
            SqlType::VarChar => "varchar",
            SqlType::LongVarChar => "text",
            SqlType::WChar => "nchar",
            SqlType::WVarChar => "nvarchar",
            SqlType::WLongVarChar => "ntext",
            SqlType::Decimal => "decimal",
            SqlType::Numeric => "numeric",
            SqlType::SmallInt => "smallint",
            SqlType::Integer => "int",
            SqlType::Real => "real",
            SqlType::Float | SqlType::Double => "float",
            SqlType::Bit => "bit",
            SqlType::TinyInt => "tinyint",
            SqlType::BigInt => "bigint",
            SqlType::Binary => "binary",
            SqlType::VarBinary => "varbinary",
            SqlType::LongVarBinary => "image",
            SqlType::Date => "date",
            SqlType::Time => "time",
            SqlType::Timestamp => "datetime2",
            SqlType::TimestampOffset => "datetimeoffset",
            SqlType::Guid => "uniqueidentifier",
        }
    }
}

/// C buffer types a caller may bind or fetch into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CType {
    Char,
    WChar,
    SLong,
    SShort,
    SBigInt,
    UTinyInt,
    STinyInt,
    Bit,
    Double,
    Float,
    Binary,
    TypeDate,
    TypeTime,
    TypeTimestamp,
    Guid,
    Numeric,
    Default,
}

impl CType {
    pub fn code(self) -> i16 {
        match self {
            CType::Char => 1,
            CType::WChar => -8,
            CType::SLong => -16,
            CType::SShort => -15,
            CType::SBigInt => -25,
            CType::UTinyInt => -28,
            CType::STinyInt => -26,
            CType::Bit => -7,
            CType::Double => 8,
            CType::Float => 7,
            CType::Binary => -2,
            CType::TypeDate => 91,
            CType::TypeTime => 92,
            CType::TypeTimestamp => 93,
            CType::Guid => -11,
            CType::Numeric => 2,
            CType::Default => 99,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Some(match code {
            1 => CType::Char,
            -8 => CType::WChar,
            4 | -16 => CType::SLong,
            5 | -15 => CType::SShort,
            -25 => CType::SBigInt,
            -28 => CType::UTinyInt,
            -6 | -26 => CType::STinyInt,
            -7 => CType::Bit,
            8 => CType::Double,
            7 => CType::Float,
            -2 => CType::Binary,
            9 | 91 => CType::TypeDate,
            10 | 92 => CType::TypeTime,
            11 | 93 => CType::TypeTimestamp,
            -11 => CType::Guid,
            2 => CType::Numeric,
            99 => CType::Default,
            _ => return None,
        })
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            CType::SLong | CType::SShort | CType::SBigInt | CType::UTinyInt | CType::STinyInt
        )
    }

    /// Size of the C representation; `None` for variable-length targets
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            CType::SLong => Some(size_of::<i32>()),
            CType::SShort => Some(size_of::<i16>()),
            CType::SBigInt => Some(size_of::<i64>()),
            CType::UTinyInt | CType::STinyInt | CType::Bit => Some(1),
            CType::Double => Some(size_of::<f64>()),
            CType::Float => Some(size_of::<f32>()),
            CType::TypeDate => Some(SqlDate::SIZE),
            CType::TypeTime => Some(SqlTime::SIZE),
            CType::TypeTimestamp => Some(SqlTimestamp::SIZE),
            CType::Guid => Some(SqlGuid::SIZE),
            CType::Numeric => Some(SqlNumeric::SIZE),
            CType::Char | CType::WChar | CType::Binary | CType::Default => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Nullability {
    NoNulls,
    Nullable,
    #[default]
    Unknown,
}

impl Nullability {
    pub fn code(self) -> i16 {
        match self {
            Nullability::NoNulls => 0,
            Nullability::Nullable => 1,
            Nullability::Unknown => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamDirection {
    #[default]
    Input,
    Output,
    InputOutput,
}

/// Out-of-band length or NULL signal accompanying a value transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indicator {
    /// The value is NULL
    Null,
    /// Byte length of the value
    Length(usize),
    /// Input text terminated by a NUL character
    NullTerminated,
    /// Total length could not be determined
    NoTotal,
}

impl Indicator {
    pub const NULL_DATA: isize = -1;
    pub const DATA_AT_EXEC: isize = -2;
    pub const NTS: isize = -3;
    pub const NO_TOTAL: isize = -4;

    pub fn raw(self) -> isize {
        match self {
            Indicator::Null => Self::NULL_DATA,
            Indicator::Length(n) => isize::try_from(n).unwrap_or(isize::MAX),
            Indicator::NullTerminated => Self::NTS,
            Indicator::NoTotal => Self::NO_TOTAL,
        }
    }

    pub fn from_raw(raw: isize) -> Option<Self> {
        match raw {
            Self::NULL_DATA => Some(Indicator::Null),
            Self::NTS => Some(Indicator::NullTerminated),
            Self::NO_TOTAL => Some(Indicator::NoTotal),
            n if n >= 0 => Some(Indicator::Length(n as usize)),
            _ => None,
        }
    }

    pub fn is_null(self) -> bool {
        matches!(self, Indicator::Null)
    }
}

/// `DATE_STRUCT`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SqlDate {
    pub year: i16,
    pub month: u16,
    pub day: u16,
}

/// `TIME_STRUCT`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SqlTime {
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
}

/// `TIMESTAMP_STRUCT`; `fraction` is in nanoseconds
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SqlTimestamp {
    pub year: i16,
    pub month: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub fraction: u32,
}

/// `SQLGUID`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SqlGuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

/// `SQL_NUMERIC_STRUCT`; `val` is the little-endian magnitude
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SqlNumeric {
    pub precision: u8,
    pub scale: i8,
    /// 1 for positive, 0 for negative
    pub sign: u8,
    pub val: [u8; 16],
}

/// Byte image of a C structure, in native byte order and C field layout
pub trait CStruct: Sized {
    const SIZE: usize;

    fn to_bytes(&self) -> Vec<u8>;

    fn from_bytes(bytes: &[u8]) -> Option<Self>;
}

fn take<const N: usize>(bytes: &[u8], at: usize) -> Option<[u8; N]> {
    bytes.get(at..at + N)?.try_into().ok()
}

impl CStruct for SqlDate {
    const SIZE: usize = 6;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.year.to_ne_bytes());
        out.extend_from_slice(&self.month.to_ne_bytes());
        out.extend_from_slice(&self.day.to_ne_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            year: i16::from_ne_bytes(take(bytes, 0)?),
            month: u16::from_ne_bytes(take(bytes, 2)?),
            day: u16::from_ne_bytes(take(bytes, 4)?),
        })
    }
}

impl CStruct for SqlTime {
    const SIZE: usize = 6;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.hour.to_ne_bytes());
        out.extend_from_slice(&self.minute.to_ne_bytes());
        out.extend_from_slice(&self.second.to_ne_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            hour: u16::from_ne_bytes(take(bytes, 0)?),
            minute: u16::from_ne_bytes(take(bytes, 2)?),
            second: u16::from_ne_bytes(take(bytes, 4)?),
        })
    }
}

impl CStruct for SqlTimestamp {
    const SIZE: usize = 16;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.year.to_ne_bytes());
        out.extend_from_slice(&self.month.to_ne_bytes());
        out.extend_from_slice(&self.day.to_ne_bytes());
        out.extend_from_slice(&self.hour.to_ne_bytes());
        out.extend_from_slice(&self.minute.to_ne_bytes());
        out.extend_from_slice(&self.second.to_ne_bytes());
        out.extend_from_slice(&self.fraction.to_ne_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            year: i16::from_ne_bytes(take(bytes, 0)?),
            month: u16::from_ne_bytes(take(bytes, 2)?),
            day: u16::from_ne_bytes(take(bytes, 4)?),
            hour: u16::from_ne_bytes(take(bytes, 6)?),
            minute: u16::from_ne_bytes(take(bytes, 8)?),
            second: u16::from_ne_bytes(take(bytes, 10)?),
            fraction: u32::from_ne_bytes(take(bytes, 12)?),
        })
    }
}

impl CStruct for SqlGuid {
    const SIZE: usize = 16;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.data1.to_ne_bytes());
        out.extend_from_slice(&self.data2.to_ne_bytes());
        out.extend_from_slice(&self.data3.to_ne_bytes());
        out.extend_from_slice(&self.data4);
        out
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            data1: u32::from_ne_bytes(take(bytes, 0)?),
            data2: u16::from_ne_bytes(take(bytes, 4)?),
            data3: u16::from_ne_bytes(take(bytes, 6)?),
            data4: take(bytes, 8)?,
        })
    }
}

impl CStruct for SqlNumeric {
    const SIZE: usize = 19;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.push(self.precision);
        out.push(self.scale as u8);
        out.push(self.sign);
        out.extend_from_slice(&self.val);
        out
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            precision: *bytes.first()?,
            scale: *bytes.get(1)? as i8,
            sign: *bytes.get(2)?,
            val: take(bytes, 3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_codes_round_trip() {
        for ty in [
            SqlType::Char,
            SqlType::WVarChar,
            SqlType::Decimal,
            SqlType::BigInt,
            SqlType::Guid,
            SqlType::Timestamp,
            SqlType::TimestampOffset,
        ] {
            assert_eq!(SqlType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(SqlType::from_code(11), Some(SqlType::Timestamp));
        assert_eq!(SqlType::from_code(1234), None);
    }

    #[test]
    fn test_default_c_types() {
        assert_eq!(SqlType::Integer.default_c_type(), CType::SLong);
        assert_eq!(SqlType::Decimal.default_c_type(), CType::Char);
        assert_eq!(SqlType::WVarChar.default_c_type(), CType::WChar);
        assert_eq!(SqlType::VarBinary.default_c_type(), CType::Binary);
    }

    #[test]
    fn test_indicator_sentinels() {
        assert_eq!(Indicator::Null.raw(), -1);
        assert_eq!(Indicator::from_raw(-1), Some(Indicator::Null));
        assert_eq!(Indicator::from_raw(0), Some(Indicator::Length(0)));
        assert_eq!(Indicator::from_raw(-3), Some(Indicator::NullTerminated));
        assert_eq!(Indicator::from_raw(-99), None);
        assert_ne!(Indicator::Null, Indicator::Length(0));
    }

    #[test]
    fn test_struct_layouts_match_c_sizes() {
        assert_eq!(size_of::<SqlDate>(), SqlDate::SIZE);
        assert_eq!(size_of::<SqlTime>(), SqlTime::SIZE);
        assert_eq!(size_of::<SqlTimestamp>(), SqlTimestamp::SIZE);
        assert_eq!(size_of::<SqlGuid>(), SqlGuid::SIZE);
        assert_eq!(size_of::<SqlNumeric>(), SqlNumeric::SIZE);
    }

    #[test]
    fn test_timestamp_bytes() {
        let ts = SqlTimestamp {
            year: 2024,
            month: 1,
            day: 15,
            hour: 13,
            minute: 45,
            second: 30,
            fraction: 123_000_000,
        };
        let bytes = ts.to_bytes();
        assert_eq!(bytes.len(), SqlTimestamp::SIZE);
        assert_eq!(SqlTimestamp::from_bytes(&bytes), Some(ts));
        assert_eq!(SqlTimestamp::from_bytes(&bytes[..10]), None);
    }
}
