//! Conversions between SQLite storage values and the wire

use rusqlite::types::{Value as SqliteValue, ValueRef};
use tdsodbc_core::marshal::{self, text::render};
use tdsodbc_core::wire::{MAX_LENGTH, TypeFamily, WireParam, WireType, WireValue};
use tdsodbc_core::{Result, Value};

/// Wire type of a column declared as `declared`, if the declaration names a
/// known type
pub(crate) fn declared_type(declared: Option<&str>) -> Option<WireType> {
    declared.and_then(WireType::parse)
}

/// Wire type for an undeclared column, from a value it holds
pub(crate) fn inferred_type(value: ValueRef<'_>) -> Option<WireType> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(_) => Some(WireType::new(TypeFamily::BigInt)),
        ValueRef::Real(_) => Some(WireType::new(TypeFamily::Float)),
        ValueRef::Text(_) => Some(WireType::sized(TypeFamily::NVarChar, MAX_LENGTH)),
        ValueRef::Blob(_) => Some(WireType::sized(TypeFamily::VarBinary, MAX_LENGTH)),
    }
}

/// Type of columns with neither a declaration nor a non-null value
pub(crate) fn untyped() -> WireType {
    WireType::sized(TypeFamily::NVarChar, MAX_LENGTH)
}

fn stored(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::BigInt(i),
        ValueRef::Real(f) => Value::Double(f),
        ValueRef::Text(bytes) => Value::text(&String::from_utf8_lossy(bytes)),
        ValueRef::Blob(bytes) => Value::Binary(bytes.to_vec()),
    }
}

/// Stored value in the wire form of its column type.
///
/// SQLite does not enforce declared types; a value that does not convert is
/// sent as text.
pub(crate) fn to_wire(value: ValueRef<'_>, ty: &WireType) -> WireValue {
    let value = stored(value);
    marshal::to_wire(&value, ty).unwrap_or_else(|error| {
        tracing::debug!(%error, "stored value does not match its declared type");
        WireValue::Text(render(&value).encode_utf16().collect())
    })
}

/// Parameter value as SQLite stores it.
///
/// Temporal values keep their full fractional precision as text.
pub(crate) fn to_sqlite(param: &WireParam) -> Result<SqliteValue> {
    let value = marshal::decode(&param.value, &param.ty)?;
    Ok(match value {
        Value::Null => SqliteValue::Null,
        Value::Bit(v) => SqliteValue::Integer(v as i64),
        Value::TinyInt(v) => SqliteValue::Integer(v as i64),
        Value::SmallInt(v) => SqliteValue::Integer(v as i64),
        Value::Int(v) => SqliteValue::Integer(v as i64),
        Value::BigInt(v) => SqliteValue::Integer(v),
        Value::Real(v) => SqliteValue::Real(v as f64),
        Value::Double(v) => SqliteValue::Real(v),
        Value::Text(units) => SqliteValue::Text(String::from_utf16_lossy(&units)),
        Value::Binary(bytes) => SqliteValue::Blob(bytes),
        Value::Date(d) => SqliteValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => SqliteValue::Text(t.format("%H:%M:%S%.f").to_string()),
        Value::Timestamp(ts) => SqliteValue::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::TimestampOffset(ts) => {
            SqliteValue::Text(ts.format("%Y-%m-%d %H:%M:%S%.f %:z").to_string())
        }
        other @ (Value::Decimal(_) | Value::Money(_) | Value::Guid(_)) => {
            SqliteValue::Text(render(&other))
        }
    })
}
