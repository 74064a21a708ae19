//! Result columns: tiberius metadata and values in wire form

use tdsodbc_core::wire::{ColumnDef, DoneStatus, MAX_LENGTH, Token, TypeFamily, WireType, WireValue};
use tiberius::{Column, ColumnData, ColumnType};

/// Days from 0001-01-01 to 1900-01-01, the epoch of the legacy datetime types
const DAYS_TO_1900: u32 = 693_595;
const INCREMENTS_PER_SECOND: u64 = 10_000_000;

/// Wire type for a column as far as the metadata tells.
///
/// Nullable variants (`Intn`, `Floatn`, ...) do not carry their width; the
/// flag returned is set when the first value should settle the type.
pub(crate) fn wire_type(column_type: ColumnType) -> (WireType, bool) {
    use TypeFamily as F;

    let ty = match column_type {
        ColumnType::Bit | ColumnType::Bitn => WireType::new(F::Bit),
        ColumnType::Int1 => WireType::new(F::TinyInt),
        ColumnType::Int2 => WireType::new(F::SmallInt),
        ColumnType::Int4 => WireType::new(F::Int),
        ColumnType::Int8 => WireType::new(F::BigInt),
        ColumnType::Intn => return (WireType::new(F::Int), true),
        ColumnType::Float4 => WireType::new(F::Real),
        ColumnType::Float8 => WireType::new(F::Float),
        ColumnType::Floatn => return (WireType::new(F::Float), true),
        ColumnType::Money => WireType::decimal(F::Money, 19, 4),
        ColumnType::Money4 => WireType::decimal(F::SmallMoney, 10, 4),
        ColumnType::Decimaln => return (WireType::decimal(F::Decimal, 38, 0), true),
        ColumnType::Numericn => return (WireType::decimal(F::Numeric, 38, 0), true),
        ColumnType::Datetime => WireType::temporal(F::DateTime, 3),
        ColumnType::Datetime4 => WireType::temporal(F::SmallDateTime, 0),
        ColumnType::Datetimen => return (WireType::temporal(F::DateTime, 3), true),
        ColumnType::Daten => WireType::new(F::Date),
        ColumnType::Timen => return (WireType::temporal(F::Time, 7), true),
        ColumnType::Datetime2 => return (WireType::temporal(F::DateTime2, 7), true),
        ColumnType::DatetimeOffsetn => return (WireType::temporal(F::DateTimeOffset, 7), true),
        ColumnType::Guid => WireType::new(F::Guid),
        ColumnType::BigChar => WireType::sized(F::Char, 0),
        ColumnType::BigVarChar => WireType::sized(F::VarChar, 0),
        ColumnType::Text => WireType::sized(F::Text, MAX_LENGTH),
        ColumnType::NChar => WireType::sized(F::NChar, 0),
        ColumnType::NVarchar => WireType::sized(F::NVarChar, 0),
        ColumnType::NText => WireType::sized(F::NText, MAX_LENGTH),
        ColumnType::Xml => WireType::sized(F::Xml, MAX_LENGTH),
        ColumnType::BigBinary => WireType::sized(F::Binary, 0),
        ColumnType::BigVarBin => WireType::sized(F::VarBinary, 0),
        ColumnType::Image => WireType::sized(F::Image, MAX_LENGTH),
        _ => WireType::sized(F::NVarChar, MAX_LENGTH),
    };
    (ty, false)
}

/// Exact type of a non-null value, for settling nullable column variants
pub(crate) fn value_type(data: &ColumnData<'_>) -> Option<WireType> {
    use TypeFamily as F;

    Some(match data {
        ColumnData::U8(Some(_)) => WireType::new(F::TinyInt),
        ColumnData::I16(Some(_)) => WireType::new(F::SmallInt),
        ColumnData::I32(Some(_)) => WireType::new(F::Int),
        ColumnData::I64(Some(_)) => WireType::new(F::BigInt),
        ColumnData::F32(Some(_)) => WireType::new(F::Real),
        ColumnData::F64(Some(_)) => WireType::new(F::Float),
        ColumnData::Numeric(Some(n)) => WireType::decimal(F::Decimal, n.precision(), n.scale()),
        ColumnData::DateTime(Some(_)) => WireType::temporal(F::DateTime, 3),
        ColumnData::SmallDateTime(Some(_)) => WireType::temporal(F::SmallDateTime, 0),
        ColumnData::DateTime2(Some(v)) => WireType::temporal(F::DateTime2, v.time().scale()),
        ColumnData::Time(Some(v)) => WireType::temporal(F::Time, v.scale()),
        ColumnData::DateTimeOffset(Some(v)) => {
            WireType::temporal(F::DateTimeOffset, v.datetime2().time().scale())
        }
        _ => return None,
    })
}

/// Settle a nullable column variant from a value, keeping money and
/// numeric families as declared
fn settle(declared: WireType, observed: WireType) -> WireType {
    match declared.family {
        TypeFamily::Money | TypeFamily::SmallMoney => declared,
        TypeFamily::Numeric if observed.family == TypeFamily::Decimal => WireType {
            family: TypeFamily::Numeric,
            ..observed
        },
        _ => observed,
    }
}

fn increments(increments: u64, scale: u8) -> u64 {
    increments * 10u64.pow(7u32.saturating_sub(scale as u32))
}

/// Convert a tiberius value to its wire form
pub(crate) fn wire_value(data: ColumnData<'static>) -> WireValue {
    match data {
        ColumnData::Bit(Some(v)) => WireValue::Bit(v),
        ColumnData::U8(Some(v)) => WireValue::U8(v),
        ColumnData::I16(Some(v)) => WireValue::I16(v),
        ColumnData::I32(Some(v)) => WireValue::I32(v),
        ColumnData::I64(Some(v)) => WireValue::I64(v),
        ColumnData::F32(Some(v)) => WireValue::F32(v),
        ColumnData::F64(Some(v)) => WireValue::F64(v),
        ColumnData::Numeric(Some(n)) => WireValue::Decimal {
            value: n.value(),
            precision: n.precision(),
            scale: n.scale(),
        },
        ColumnData::String(Some(s)) => WireValue::Text(s.encode_utf16().collect()),
        ColumnData::Xml(Some(xml)) => {
            WireValue::Text(xml.into_owned().into_string().encode_utf16().collect())
        }
        ColumnData::Binary(Some(bytes)) => WireValue::Bytes(bytes.into_owned()),
        ColumnData::Guid(Some(v)) => WireValue::Guid(*v.as_bytes()),
        ColumnData::Date(Some(v)) => WireValue::Date(v.days()),
        ColumnData::Time(Some(v)) => WireValue::Time(increments(v.increments(), v.scale())),
        ColumnData::DateTime(Some(v)) => WireValue::DateTime {
            days: (DAYS_TO_1900 as i64 + v.days() as i64) as u32,
            increments: v.seconds_fragments() as u64 * INCREMENTS_PER_SECOND / 300,
        },
        ColumnData::SmallDateTime(Some(v)) => WireValue::DateTime {
            days: DAYS_TO_1900 + v.days() as u32,
            increments: v.seconds_fragments() as u64 * 60 * INCREMENTS_PER_SECOND,
        },
        ColumnData::DateTime2(Some(v)) => WireValue::DateTime {
            days: v.date().days(),
            increments: increments(v.time().increments(), v.time().scale()),
        },
        ColumnData::DateTimeOffset(Some(v)) => {
            let utc = v.datetime2();
            WireValue::DateTimeOffset {
                days: utc.date().days(),
                increments: increments(utc.time().increments(), utc.time().scale()),
                offset_minutes: v.offset(),
            }
        }
        _ => WireValue::Null,
    }
}

/// Rows of one result set, buffered until its column types are settled
#[derive(Debug)]
pub(crate) struct PendingSet {
    columns: Vec<ColumnDef>,
    unsettled: Vec<bool>,
    rows: Vec<Vec<WireValue>>,
}

impl PendingSet {
    pub(crate) fn new(columns: &[Column]) -> Self {
        let (columns, unsettled) = columns
            .iter()
            .map(|column| {
                let (ty, unsettled) = wire_type(column.column_type());
                let def = ColumnDef {
                    name: column.name().to_string(),
                    ty,
                    nullable: true,
                };
                (def, unsettled)
            })
            .unzip();
        Self {
            columns,
            unsettled,
            rows: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, values: impl IntoIterator<Item = ColumnData<'static>>) {
        let mut row = Vec::with_capacity(self.columns.len());
        for (index, data) in values.into_iter().enumerate() {
            if self.unsettled.get(index).copied().unwrap_or(false) {
                if let Some(observed) = value_type(&data) {
                    self.columns[index].ty = settle(self.columns[index].ty, observed);
                    self.unsettled[index] = false;
                }
            }
            row.push(wire_value(data));
        }
        self.rows.push(row);
    }

    /// Emit the result set as tokens; `more` marks a following result
    pub(crate) fn finish(self, tokens: &mut Vec<Token>, more: bool) {
        let count = self.rows.len() as u64;
        tokens.push(Token::ColMetadata(self.columns));
        tokens.extend(self.rows.into_iter().map(Token::Row));
        tokens.push(Token::Done(DoneStatus {
            more,
            error: false,
            row_count: Some(count),
        }));
    }
}
