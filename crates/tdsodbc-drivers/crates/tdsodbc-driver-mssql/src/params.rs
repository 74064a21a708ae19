//! Parameter binding: marker rewriting and wire values as tiberius parameters

use std::borrow::Cow;

use tdsodbc_core::sqltext;
use tdsodbc_core::wire::{TypeFamily, WireParam, WireType, WireValue};
use tiberius::numeric::Numeric;
use tiberius::time::{Date, DateTime2, DateTimeOffset, Time};
use tiberius::{ColumnData, ToSql};
use uuid::Uuid;

/// Money travels as a four-digit scaled numeric
const MONEY_SCALE: u8 = 4;

/// Replace `?` markers with the `@P1..@Pn` names tiberius binds positionally
pub fn rewrite_placeholders(sql: &str) -> String {
    let markers = sqltext::placeholders(sql);
    if markers.is_empty() {
        return sql.to_string();
    }
    let mut rewritten = String::with_capacity(sql.len() + markers.len() * 3);
    let mut last = 0;
    for (index, offset) in markers.iter().enumerate() {
        rewritten.push_str(&sql[last..*offset]);
        rewritten.push_str(&format!("@P{}", index + 1));
        last = offset + 1;
    }
    rewritten.push_str(&sql[last..]);
    rewritten
}

/// Owned parameter value handed to tiberius
#[derive(Debug, Clone)]
pub(crate) struct SqlParam(ColumnData<'static>);

impl SqlParam {
    pub(crate) fn text(value: &str) -> Self {
        SqlParam(ColumnData::String(Some(Cow::Owned(value.to_string()))))
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> ColumnData<'_> {
        self.0.clone()
    }
}

impl From<&WireParam> for SqlParam {
    fn from(param: &WireParam) -> Self {
        SqlParam(match &param.value {
            WireValue::Null => typed_null(&param.ty),
            WireValue::Bit(v) => ColumnData::Bit(Some(*v)),
            WireValue::U8(v) => ColumnData::U8(Some(*v)),
            WireValue::I16(v) => ColumnData::I16(Some(*v)),
            WireValue::I32(v) => ColumnData::I32(Some(*v)),
            WireValue::I64(v) => ColumnData::I64(Some(*v)),
            WireValue::F32(v) => ColumnData::F32(Some(*v)),
            WireValue::F64(v) => ColumnData::F64(Some(*v)),
            WireValue::Decimal { value, scale, .. } => {
                ColumnData::Numeric(Some(Numeric::new_with_scale(*value, *scale)))
            }
            WireValue::Money(units) => {
                ColumnData::Numeric(Some(Numeric::new_with_scale(*units as i128, MONEY_SCALE)))
            }
            WireValue::Text(units) => {
                ColumnData::String(Some(Cow::Owned(String::from_utf16_lossy(units))))
            }
            WireValue::Bytes(bytes) => ColumnData::Binary(Some(Cow::Owned(bytes.clone()))),
            WireValue::Date(days) => ColumnData::Date(Some(Date::new(*days))),
            WireValue::Time(increments) => ColumnData::Time(Some(Time::new(*increments, 7))),
            WireValue::DateTime { days, increments } => ColumnData::DateTime2(Some(DateTime2::new(
                Date::new(*days),
                Time::new(*increments, 7),
            ))),
            WireValue::DateTimeOffset {
                days,
                increments,
                offset_minutes,
            } => ColumnData::DateTimeOffset(Some(DateTimeOffset::new(
                DateTime2::new(Date::new(*days), Time::new(*increments, 7)),
                *offset_minutes,
            ))),
            WireValue::Guid(bytes) => ColumnData::Guid(Some(Uuid::from_bytes(*bytes))),
        })
    }
}

/// NULL carrying the declared type so the server can resolve overloads
fn typed_null(ty: &WireType) -> ColumnData<'static> {
    match ty.family {
        TypeFamily::Bit => ColumnData::Bit(None),
        TypeFamily::TinyInt => ColumnData::U8(None),
        TypeFamily::SmallInt => ColumnData::I16(None),
        TypeFamily::Int => ColumnData::I32(None),
        TypeFamily::BigInt => ColumnData::I64(None),
        TypeFamily::Real => ColumnData::F32(None),
        TypeFamily::Float => ColumnData::F64(None),
        TypeFamily::Decimal | TypeFamily::Numeric | TypeFamily::Money | TypeFamily::SmallMoney => {
            ColumnData::Numeric(None)
        }
        TypeFamily::Binary | TypeFamily::VarBinary | TypeFamily::Image => ColumnData::Binary(None),
        TypeFamily::Date => ColumnData::Date(None),
        TypeFamily::Time => ColumnData::Time(None),
        TypeFamily::DateTime | TypeFamily::SmallDateTime | TypeFamily::DateTime2 => {
            ColumnData::DateTime2(None)
        }
        TypeFamily::DateTimeOffset => ColumnData::DateTimeOffset(None),
        TypeFamily::Guid => ColumnData::Guid(None),
        TypeFamily::Char
        | TypeFamily::VarChar
        | TypeFamily::Text
        | TypeFamily::NChar
        | TypeFamily::NVarChar
        | TypeFamily::NText
        | TypeFamily::Xml => ColumnData::String(None),
    }
}
