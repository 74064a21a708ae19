//! Parameter and result descriptors, and caller-owned bound buffers

use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{CType, Indicator, Nullability, ParamDirection, SqlType};
use crate::wire::{ColumnDef, TypeFamily, WireType};

#[derive(Debug)]
struct Cell {
    data: Vec<u8>,
    indicator: Indicator,
}

/// A caller-owned buffer plus its length/indicator cell.
///
/// Clones share storage: the driver keeps one clone and the caller keeps
/// another, so the caller can change the contents after binding and the
/// driver sees them at execute (parameters) or fetch (columns) time.
#[derive(Debug, Clone)]
pub struct BoundBuffer {
    cell: Arc<Mutex<Cell>>,
}

impl BoundBuffer {
    /// Output buffer of `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_bytes(vec![0; capacity], Indicator::Length(0))
    }

    pub fn from_bytes(data: Vec<u8>, indicator: Indicator) -> Self {
        Self {
            cell: Arc::new(Mutex::new(Cell { data, indicator })),
        }
    }

    /// 8-bit text, length in the indicator
    pub fn text(s: &str) -> Self {
        let data = s.as_bytes().to_vec();
        let len = data.len();
        Self::from_bytes(data, Indicator::Length(len))
    }

    /// UTF-16 text in native byte order, length in bytes in the indicator
    pub fn wide(s: &str) -> Self {
        let data: Vec<u8> = s.encode_utf16().flat_map(u16::to_ne_bytes).collect();
        let len = data.len();
        Self::from_bytes(data, Indicator::Length(len))
    }

    pub fn null() -> Self {
        Self::from_bytes(Vec::new(), Indicator::Null)
    }

    pub fn set(&self, data: &[u8], indicator: Indicator) {
        let mut cell = self.cell.lock();
        cell.data.clear();
        cell.data.extend_from_slice(data);
        cell.indicator = indicator;
    }

    pub fn set_indicator(&self, indicator: Indicator) {
        self.cell.lock().indicator = indicator;
    }

    pub fn indicator(&self) -> Indicator {
        self.cell.lock().indicator
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.cell.lock().data.clone()
    }

    pub fn capacity(&self) -> usize {
        self.cell.lock().data.len()
    }

    /// Valid bytes, honoring the indicator: `None` for NULL
    pub fn value_bytes(&self) -> Option<Vec<u8>> {
        self.value_units(1)
    }

    /// Like [`value_bytes`](Self::value_bytes), with a NUL terminator made of
    /// `width` zero bytes aligned to the character width
    pub fn value_units(&self, width: usize) -> Option<Vec<u8>> {
        let width = width.max(1);
        let cell = self.cell.lock();
        match cell.indicator {
            Indicator::Null => None,
            Indicator::Length(n) => Some(cell.data[..n.min(cell.data.len())].to_vec()),
            Indicator::NullTerminated | Indicator::NoTotal => {
                let end = cell
                    .data
                    .chunks_exact(width)
                    .position(|unit| unit.iter().all(|b| *b == 0))
                    .map(|units| units * width)
                    .unwrap_or(cell.data.len() - cell.data.len() % width);
                Some(cell.data[..end].to_vec())
            }
        }
    }

    /// Overwrite in place, keeping capacity; used when filling bound columns.
    /// The indicator is left untouched when `write` fails.
    pub(crate) fn fill<E>(
        &self,
        write: impl FnOnce(&mut [u8]) -> std::result::Result<Indicator, E>,
    ) -> std::result::Result<(), E> {
        let mut cell = self.cell.lock();
        let indicator = write(&mut cell.data)?;
        cell.indicator = indicator;
        Ok(())
    }
}

/// Caller-chosen token identifying a deferred parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeferredToken(pub u64);

/// Where a parameter's value comes from
#[derive(Debug, Clone)]
pub enum ParamSource {
    /// Read from the buffer at execute time
    Bound(BoundBuffer),
    /// Supplied in chunks after execute returns need-data
    Deferred(DeferredToken),
}

/// Shape of a parameter as bound by the caller
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    pub ordinal: u16,
    pub c_type: CType,
    pub sql_type: SqlType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub nullable: Nullability,
    pub direction: ParamDirection,
    pub source: ParamSource,
}

impl ParameterDescriptor {
    pub fn bound(ordinal: u16, c_type: CType, sql_type: SqlType, buffer: BoundBuffer) -> Self {
        Self {
            ordinal,
            c_type,
            sql_type,
            column_size: 0,
            decimal_digits: 0,
            nullable: Nullability::Nullable,
            direction: ParamDirection::Input,
            source: ParamSource::Bound(buffer),
        }
    }

    pub fn deferred(ordinal: u16, c_type: CType, sql_type: SqlType, token: DeferredToken) -> Self {
        Self {
            source: ParamSource::Deferred(token),
            ..Self::bound(ordinal, c_type, sql_type, BoundBuffer::null())
        }
    }

    pub fn with_size(mut self, column_size: usize, decimal_digits: i16) -> Self {
        self.column_size = column_size;
        self.decimal_digits = decimal_digits;
        self
    }

    pub fn token(&self) -> Option<DeferredToken> {
        match self.source {
            ParamSource::Deferred(token) => Some(token),
            ParamSource::Bound(_) => None,
        }
    }
}

/// Parameter shape as described by the backend at prepare time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescription {
    pub sql_type: SqlType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub nullable: Nullability,
}

/// Result column descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    pub ordinal: u16,
    pub name: String,
    pub sql_type: SqlType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub nullable: Nullability,
    pub wire_type: WireType,
}

impl ColumnDesc {
    pub fn from_def(ordinal: u16, def: &ColumnDef) -> Self {
        let (sql_type, column_size, decimal_digits) = describe_wire_type(&def.ty);
        Self {
            ordinal,
            name: def.name.clone(),
            sql_type,
            column_size,
            decimal_digits,
            nullable: if def.nullable {
                Nullability::Nullable
            } else {
                Nullability::NoNulls
            },
            wire_type: def.ty,
        }
    }

    /// Length in characters of a fixed-width text column, if any
    pub fn fixed_width(&self) -> Option<usize> {
        (self.sql_type.is_fixed_width() && !self.wire_type.is_max() && self.column_size > 0)
            .then_some(self.column_size)
    }
}

/// Column attribute read by `Driver::col_attribute`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnField {
    /// Number of result columns; the column number is ignored
    Count,
    Name,
    Label,
    BaseColumnName,
    TableName,
    TypeName,
    LocalTypeName,
    ConciseType,
    /// Verbose type: datetime types report the datetime class code
    Type,
    Length,
    OctetLength,
    DisplaySize,
    Precision,
    Scale,
    NumPrecRadix,
    Nullable,
    Unnamed,
    AutoUniqueValue,
    CaseSensitive,
    FixedPrecScale,
    Searchable,
    Unsigned,
    Updatable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnAttribute {
    Integer(i64),
    Text(String),
}

/// Verbose type code shared by date, time and timestamp columns
const DATETIME_CLASS: i16 = 9;

/// Predicates a column supports in a WHERE clause
const PRED_NONE: i64 = 0;
const PRED_CHAR: i64 = 1;
const SEARCHABLE: i64 = 3;

/// The driver cannot tell whether a result column is writable
const READ_WRITE_UNKNOWN: i64 = 2;

impl ColumnDesc {
    /// Value of `field` for this column. `ColumnField::Count` is answered by
    /// the statement, not the column, and reports zero here.
    pub fn attribute(&self, field: ColumnField) -> ColumnAttribute {
        use ColumnAttribute::{Integer, Text};
        let flag = |on: bool| Integer(i64::from(on));
        match field {
            ColumnField::Count => Integer(0),
            ColumnField::Name | ColumnField::Label | ColumnField::BaseColumnName => {
                Text(self.name.clone())
            }
            ColumnField::TableName => Text(String::new()),
            ColumnField::TypeName | ColumnField::LocalTypeName => {
                Text(backend_type_name(self.wire_type.family).to_string())
            }
            ColumnField::ConciseType => Integer(self.sql_type.code().into()),
            ColumnField::Type => Integer(match self.sql_type {
                SqlType::Date | SqlType::Time | SqlType::Timestamp => DATETIME_CLASS,
                other => other.code(),
            }
            .into()),
            ColumnField::Length => Integer(self.column_size as i64),
            ColumnField::OctetLength => Integer(self.octet_length() as i64),
            ColumnField::DisplaySize => Integer(self.display_size() as i64),
            ColumnField::Precision => Integer(match self.sql_type {
                SqlType::Time | SqlType::Timestamp | SqlType::TimestampOffset => {
                    self.decimal_digits.into()
                }
                _ => self.column_size as i64,
            }),
            ColumnField::Scale => Integer(self.decimal_digits.into()),
            ColumnField::NumPrecRadix => Integer(match self.sql_type {
                SqlType::Real | SqlType::Float | SqlType::Double => 2,
                other if other.is_exact_numeric() => 10,
                _ => 0,
            }),
            ColumnField::Nullable => Integer(self.nullable.code().into()),
            ColumnField::Unnamed => flag(self.name.is_empty()),
            ColumnField::AutoUniqueValue | ColumnField::CaseSensitive => flag(false),
            ColumnField::FixedPrecScale => flag(matches!(
                self.wire_type.family,
                TypeFamily::Money | TypeFamily::SmallMoney
            )),
            ColumnField::Searchable => Integer(match self.sql_type {
                SqlType::LongVarBinary => PRED_NONE,
                SqlType::LongVarChar | SqlType::WLongVarChar => PRED_CHAR,
                _ => SEARCHABLE,
            }),
            ColumnField::Unsigned => flag(match self.sql_type {
                SqlType::TinyInt | SqlType::Bit => true,
                other => !other.is_exact_numeric() && !other.is_approximate_numeric(),
            }),
            ColumnField::Updatable => Integer(READ_WRITE_UNKNOWN),
        }
    }

    /// Bytes transferred into the column's default C type
    fn octet_length(&self) -> usize {
        if let Some(size) = self.sql_type.default_c_type().fixed_size() {
            return size;
        }
        match self.sql_type {
            SqlType::Decimal | SqlType::Numeric => self.column_size + 2,
            wide if wide.is_wide() => self.column_size * 2,
            _ => self.column_size,
        }
    }

    /// Characters needed to show any value of the column as text
    fn display_size(&self) -> usize {
        let fraction = match self.decimal_digits {
            0 => 0,
            digits => digits as usize + 1,
        };
        match self.sql_type {
            SqlType::Bit => 1,
            SqlType::TinyInt => 3,
            SqlType::SmallInt => 6,
            SqlType::Integer => 11,
            SqlType::BigInt => 20,
            SqlType::Real => 14,
            SqlType::Float | SqlType::Double => 24,
            SqlType::Decimal | SqlType::Numeric => self.column_size + 2,
            SqlType::Date => 10,
            SqlType::Time => 8 + fraction,
            SqlType::Timestamp => 19 + fraction,
            SqlType::TimestampOffset => 26 + fraction,
            SqlType::Guid => 36,
            binary if binary.is_binary() => self.column_size * 2,
            _ => self.column_size,
        }
    }
}

/// Backend name of a wire type family
pub fn backend_type_name(family: TypeFamily) -> &'static str {
    match family {
        TypeFamily::Bit => "bit",
        TypeFamily::TinyInt => "tinyint",
        TypeFamily::SmallInt => "smallint",
        TypeFamily::Int => "int",
        TypeFamily::BigInt => "bigint",
        TypeFamily::Real => "real",
        TypeFamily::Float => "float",
        TypeFamily::Decimal => "decimal",
        TypeFamily::Numeric => "numeric",
        TypeFamily::Money => "money",
        TypeFamily::SmallMoney => "smallmoney",
        TypeFamily::Char => "char",
        TypeFamily::VarChar => "varchar",
        TypeFamily::Text => "text",
        TypeFamily::NChar => "nchar",
        TypeFamily::NVarChar => "nvarchar",
        TypeFamily::NText => "ntext",
        TypeFamily::Xml => "xml",
        TypeFamily::Binary => "binary",
        TypeFamily::VarBinary => "varbinary",
        TypeFamily::Image => "image",
        TypeFamily::Date => "date",
        TypeFamily::Time => "time",
        TypeFamily::DateTime => "datetime",
        TypeFamily::SmallDateTime => "smalldatetime",
        TypeFamily::DateTime2 => "datetime2",
        TypeFamily::DateTimeOffset => "datetimeoffset",
        TypeFamily::Guid => "uniqueidentifier",
    }
}

/// SQL type, column size and decimal digits reported for a wire type
pub fn describe_wire_type(ty: &WireType) -> (SqlType, usize, i16) {
    let declared = if ty.is_max() { 0 } else { ty.length as usize };
    let fraction = ty.scale.min(7) as i16;
    match ty.family {
        TypeFamily::Bit => (SqlType::Bit, 1, 0),
        TypeFamily::TinyInt => (SqlType::TinyInt, 3, 0),
        TypeFamily::SmallInt => (SqlType::SmallInt, 5, 0),
        TypeFamily::Int => (SqlType::Integer, 10, 0),
        TypeFamily::BigInt => (SqlType::BigInt, 19, 0),
        TypeFamily::Real => (SqlType::Real, 24, 0),
        TypeFamily::Float => (SqlType::Double, 53, 0),
        TypeFamily::Decimal | TypeFamily::Numeric => {
            let precision = if ty.precision == 0 { 38 } else { ty.precision };
            let sql_type = if ty.family == TypeFamily::Numeric {
                SqlType::Numeric
            } else {
                SqlType::Decimal
            };
            (sql_type, precision as usize, ty.scale as i16)
        }
        TypeFamily::Money => (SqlType::Decimal, 19, 4),
        TypeFamily::SmallMoney => (SqlType::Decimal, 10, 4),
        TypeFamily::Char => (SqlType::Char, declared, 0),
        TypeFamily::VarChar => (SqlType::VarChar, declared, 0),
        TypeFamily::Text => (SqlType::LongVarChar, 0, 0),
        TypeFamily::NChar => (SqlType::WChar, declared, 0),
        TypeFamily::NVarChar => (SqlType::WVarChar, declared, 0),
        TypeFamily::NText | TypeFamily::Xml => (SqlType::WLongVarChar, 0, 0),
        TypeFamily::Binary => (SqlType::Binary, declared, 0),
        TypeFamily::VarBinary => (SqlType::VarBinary, declared, 0),
        TypeFamily::Image => (SqlType::LongVarBinary, 0, 0),
        TypeFamily::Date => (SqlType::Date, 10, 0),
        TypeFamily::Time => (SqlType::Time, 16, fraction),
        TypeFamily::DateTime | TypeFamily::SmallDateTime | TypeFamily::DateTime2 => {
            (SqlType::Timestamp, 23, 3)
        }
        TypeFamily::DateTimeOffset => (SqlType::TimestampOffset, 30, 3),
        TypeFamily::Guid => (SqlType::Guid, 36, 0),
    }
}

/// Wire type used to send a parameter declared as `sql_type`
pub fn wire_type_for(sql_type: SqlType, column_size: usize, decimal_digits: i16) -> WireType {
    let length = |default: u32| {
        if column_size == 0 {
            default
        } else {
            u32::try_from(column_size).unwrap_or(crate::wire::MAX_LENGTH)
        }
    };
    let scale = decimal_digits.clamp(0, 38) as u8;
    match sql_type {
        SqlType::Bit => WireType::new(TypeFamily::Bit),
        SqlType::TinyInt => WireType::new(TypeFamily::TinyInt),
        SqlType::SmallInt => WireType::new(TypeFamily::SmallInt),
        SqlType::Integer => WireType::new(TypeFamily::Int),
        SqlType::BigInt => WireType::new(TypeFamily::BigInt),
        SqlType::Real => WireType::new(TypeFamily::Real),
        SqlType::Float | SqlType::Double => WireType::new(TypeFamily::Float),
        SqlType::Decimal | SqlType::Numeric => {
            let precision = if column_size == 0 {
                38
            } else {
                column_size.min(38) as u8
            };
            let family = if sql_type == SqlType::Numeric {
                TypeFamily::Numeric
            } else {
                TypeFamily::Decimal
            };
            WireType::decimal(family, precision, scale.min(precision))
        }
        SqlType::Char => WireType::sized(TypeFamily::Char, length(1)),
        SqlType::VarChar => WireType::sized(TypeFamily::VarChar, length(crate::wire::MAX_LENGTH)),
        SqlType::LongVarChar => WireType::sized(TypeFamily::VarChar, crate::wire::MAX_LENGTH),
        SqlType::WChar => WireType::sized(TypeFamily::NChar, length(1)),
        SqlType::WVarChar => WireType::sized(TypeFamily::NVarChar, length(crate::wire::MAX_LENGTH)),
        SqlType::WLongVarChar => WireType::sized(TypeFamily::NVarChar, crate::wire::MAX_LENGTH),
        SqlType::Binary => WireType::sized(TypeFamily::Binary, length(1)),
        SqlType::VarBinary => WireType::sized(TypeFamily::VarBinary, length(crate::wire::MAX_LENGTH)),
        SqlType::LongVarBinary => WireType::sized(TypeFamily::VarBinary, crate::wire::MAX_LENGTH),
        SqlType::Date => WireType::new(TypeFamily::Date),
        SqlType::Time => WireType::temporal(TypeFamily::Time, scale.min(7)),
        SqlType::Timestamp => WireType::temporal(TypeFamily::DateTime2, scale.min(7)),
        SqlType::TimestampOffset => WireType::temporal(TypeFamily::DateTimeOffset, scale.min(7)),
        SqlType::Guid => WireType::new(TypeFamily::Guid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MAX_LENGTH;
    use pretty_assertions::assert_eq;

    fn described(name: &str, ty: WireType) -> ColumnDesc {
        ColumnDesc::from_def(
            1,
            &ColumnDef {
                name: name.to_string(),
                ty,
                nullable: false,
            },
        )
    }

    #[test]
    fn test_column_attributes() {
        use ColumnAttribute::{Integer, Text};
        let price = described("price", WireType::decimal(TypeFamily::Decimal, 10, 2));
        assert_eq!(price.attribute(ColumnField::Name), Text("price".into()));
        assert_eq!(price.attribute(ColumnField::TypeName), Text("decimal".into()));
        assert_eq!(price.attribute(ColumnField::ConciseType), Integer(3));
        assert_eq!(price.attribute(ColumnField::Precision), Integer(10));
        assert_eq!(price.attribute(ColumnField::Scale), Integer(2));
        assert_eq!(price.attribute(ColumnField::DisplaySize), Integer(12));
        assert_eq!(price.attribute(ColumnField::NumPrecRadix), Integer(10));
        assert_eq!(price.attribute(ColumnField::Nullable), Integer(0));
        assert_eq!(price.attribute(ColumnField::Unsigned), Integer(0));

        let note = described("note", WireType::sized(TypeFamily::NVarChar, 40));
        assert_eq!(note.attribute(ColumnField::OctetLength), Integer(80));
        assert_eq!(note.attribute(ColumnField::DisplaySize), Integer(40));
        assert_eq!(note.attribute(ColumnField::Unsigned), Integer(1));
        assert_eq!(note.attribute(ColumnField::NumPrecRadix), Integer(0));

        let stamp = described("", WireType::temporal(TypeFamily::DateTime2, 3));
        assert_eq!(stamp.attribute(ColumnField::Type), Integer(9));
        assert_eq!(stamp.attribute(ColumnField::ConciseType), Integer(93));
        assert_eq!(stamp.attribute(ColumnField::DisplaySize), Integer(23));
        assert_eq!(stamp.attribute(ColumnField::Unnamed), Integer(1));

        let cash = described("cash", WireType::new(TypeFamily::Money));
        assert_eq!(cash.attribute(ColumnField::FixedPrecScale), Integer(1));
        assert_eq!(cash.attribute(ColumnField::TypeName), Text("money".into()));
    }

    #[test]
    fn test_column_sizes() {
        let cases = [
            (WireType::new(TypeFamily::Int), SqlType::Integer, 10, 0),
            (WireType::new(TypeFamily::TinyInt), SqlType::TinyInt, 3, 0),
            (WireType::new(TypeFamily::Float), SqlType::Double, 53, 0),
            (WireType::decimal(TypeFamily::Decimal, 18, 4), SqlType::Decimal, 18, 4),
            (WireType::new(TypeFamily::SmallMoney), SqlType::Decimal, 10, 4),
            (WireType::sized(TypeFamily::NVarChar, 50), SqlType::WVarChar, 50, 0),
            (WireType::sized(TypeFamily::NVarChar, MAX_LENGTH), SqlType::WVarChar, 0, 0),
            (WireType::sized(TypeFamily::Binary, 4), SqlType::Binary, 4, 0),
            (WireType::new(TypeFamily::DateTime), SqlType::Timestamp, 23, 3),
            (WireType::new(TypeFamily::Guid), SqlType::Guid, 36, 0),
        ];
        for (ty, sql_type, size, digits) in cases {
            assert_eq!(describe_wire_type(&ty), (sql_type, size, digits), "{ty:?}");
        }
    }

    #[test]
    fn test_fixed_width_only_for_sized_char_types() {
        let def = ColumnDef {
            name: "c".into(),
            ty: WireType::sized(TypeFamily::NChar, 10),
            nullable: true,
        };
        assert_eq!(ColumnDesc::from_def(1, &def).fixed_width(), Some(10));

        let def = ColumnDef {
            ty: WireType::sized(TypeFamily::NVarChar, 10),
            ..def
        };
        assert_eq!(ColumnDesc::from_def(1, &def).fixed_width(), None);
    }

    #[test]
    fn test_bound_buffer_is_shared() {
        let caller = BoundBuffer::text("abc");
        let driver = caller.clone();
        caller.set(b"xyz!", Indicator::Length(4));
        assert_eq!(driver.value_bytes(), Some(b"xyz!".to_vec()));
        caller.set_indicator(Indicator::Null);
        assert_eq!(driver.value_bytes(), None);
    }

    #[test]
    fn test_null_terminated_input() {
        let buffer = BoundBuffer::from_bytes(b"hi\0junk".to_vec(), Indicator::NullTerminated);
        assert_eq!(buffer.value_bytes(), Some(b"hi".to_vec()));

        let mut wide: Vec<u8> = "hi".encode_utf16().flat_map(u16::to_ne_bytes).collect();
        wide.extend_from_slice(&[0, 0, 0x41, 0]);
        let buffer = BoundBuffer::from_bytes(wide, Indicator::NullTerminated);
        assert_eq!(buffer.value_units(2).map(|b| b.len()), Some(4));
    }

    #[test]
    fn test_wire_type_for_parameters() {
        assert_eq!(
            wire_type_for(SqlType::WVarChar, 50, 0),
            WireType::sized(TypeFamily::NVarChar, 50)
        );
        assert_eq!(
            wire_type_for(SqlType::Decimal, 10, 2),
            WireType::decimal(TypeFamily::Decimal, 10, 2)
        );
        assert!(wire_type_for(SqlType::VarBinary, 0, 0).is_max());
    }
}
