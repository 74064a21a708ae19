//! Diagnostic records, SQLSTATE classing and call-level return codes

use std::fmt;

use crate::error::{OdbcError, ServerMessage};

/// Prefix carried by every message the driver produces
pub const VENDOR_PREFIX: &str = "[tdsodbc]";

/// Prefix appended to messages relayed from the backend
pub const BACKEND_PREFIX: &str = "[SQL Server]";

const ISO_ORIGIN: &str = "ISO 9075";
const ODBC_ORIGIN: &str = "ODBC 3.0";

/// A 5-character SQLSTATE class code
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SqlState([u8; 5]);

impl SqlState {
    pub const GENERAL_WARNING: SqlState = SqlState(*b"01000");
    pub const STRING_TRUNCATED: SqlState = SqlState(*b"01004");
    pub const OPTION_VALUE_CHANGED: SqlState = SqlState(*b"01S02");
    pub const FRACTION_TRUNCATED: SqlState = SqlState(*b"01S07");
    pub const COUNT_FIELD_INCORRECT: SqlState = SqlState(*b"07002");
    pub const RESTRICTED_DATA_TYPE: SqlState = SqlState(*b"07006");
    pub const INVALID_DESCRIPTOR_INDEX: SqlState = SqlState(*b"07009");
    pub const UNABLE_TO_CONNECT: SqlState = SqlState(*b"08001");
    pub const CONNECTION_IN_USE: SqlState = SqlState(*b"08002");
    pub const CONNECTION_NOT_OPEN: SqlState = SqlState(*b"08003");
    pub const LINK_FAILURE: SqlState = SqlState(*b"08S01");
    pub const STRING_RIGHT_TRUNCATED: SqlState = SqlState(*b"22001");
    pub const NUMERIC_OUT_OF_RANGE: SqlState = SqlState(*b"22003");
    pub const INVALID_DATETIME_FORMAT: SqlState = SqlState(*b"22007");
    pub const DIVISION_BY_ZERO: SqlState = SqlState(*b"22012");
    pub const INVALID_CHARACTER_VALUE: SqlState = SqlState(*b"22018");
    pub const INTEGRITY_CONSTRAINT: SqlState = SqlState(*b"23000");
    pub const INVALID_CURSOR_STATE: SqlState = SqlState(*b"24000");
    pub const INVALID_TRANSACTION_STATE: SqlState = SqlState(*b"25000");
    pub const INVALID_AUTHORIZATION: SqlState = SqlState(*b"28000");
    pub const SERIALIZATION_FAILURE: SqlState = SqlState(*b"40001");
    pub const SYNTAX_ERROR: SqlState = SqlState(*b"42000");
    pub const TABLE_EXISTS: SqlState = SqlState(*b"42S01");
    pub const TABLE_NOT_FOUND: SqlState = SqlState(*b"42S02");
    pub const COLUMN_NOT_FOUND: SqlState = SqlState(*b"42S22");
    pub const GENERAL_ERROR: SqlState = SqlState(*b"HY000");
    pub const MEMORY_ALLOCATION: SqlState = SqlState(*b"HY001");
    pub const OPERATION_CANCELED: SqlState = SqlState(*b"HY008");
    pub const INVALID_USE_OF_NULL: SqlState = SqlState(*b"HY009");
    pub const SEQUENCE_ERROR: SqlState = SqlState(*b"HY010");
    pub const ATTRIBUTE_CANNOT_BE_SET_NOW: SqlState = SqlState(*b"HY011");
    pub const INVALID_ATTRIBUTE_VALUE: SqlState = SqlState(*b"HY024");
    pub const INVALID_BUFFER_LENGTH: SqlState = SqlState(*b"HY090");
    pub const INVALID_ATTRIBUTE_IDENTIFIER: SqlState = SqlState(*b"HY092");
    pub const FETCH_TYPE_OUT_OF_RANGE: SqlState = SqlState(*b"HY106");
    pub const NOT_IMPLEMENTED: SqlState = SqlState(*b"HYC00");

    /// Parse a code; `None` unless it is exactly five ASCII alphanumerics
    pub fn new(code: &str) -> Option<Self> {
        let bytes: [u8; 5] = code.as_bytes().try_into().ok()?;
        bytes
            .iter()
            .all(u8::is_ascii_alphanumeric)
            .then_some(SqlState(bytes))
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("HY000")
    }

    /// The two-character class, e.g. `42` for `42S02`
    pub fn class(&self) -> &str {
        &self.as_str()[..2]
    }

    /// Classes `01` are warnings, never failures
    pub fn is_warning(&self) -> bool {
        self.class() == "01"
    }

    /// Standard that defines the class: `ODBC 3.0` for `HY` and `IM`,
    /// `ISO 9075` otherwise
    pub fn class_origin(&self) -> &'static str {
        if matches!(self.class(), "HY" | "IM") {
            ODBC_ORIGIN
        } else {
            ISO_ORIGIN
        }
    }

    /// Standard that defines the subclass; `S` subclasses are ODBC additions
    pub fn subclass_origin(&self) -> &'static str {
        if self.class_origin() == ODBC_ORIGIN || self.0[2] == b'S' {
            ODBC_ORIGIN
        } else {
            ISO_ORIGIN
        }
    }

    /// Classify a backend-native error number.
    ///
    /// Unknown numbers fall back on the severity class: class 15 is a parse
    /// failure, everything else is a general error.
    pub fn from_native(number: i32, class: u8) -> SqlState {
        match number {
            102 | 103 | 105 | 156 | 170 | 229 | 230 | 262 | 1038 => SqlState::SYNTAX_ERROR,
            207 => SqlState::COLUMN_NOT_FOUND,
            208 => SqlState::TABLE_NOT_FOUND,
            2714 => SqlState::TABLE_EXISTS,
            515 | 547 | 2601 | 2627 => SqlState::INTEGRITY_CONSTRAINT,
            245 | 8114 | 8169 => SqlState::INVALID_CHARACTER_VALUE,
            220 | 232 | 8115 => SqlState::NUMERIC_OUT_OF_RANGE,
            241 | 242 => SqlState::INVALID_DATETIME_FORMAT,
            2628 | 8152 => SqlState::STRING_RIGHT_TRUNCATED,
            8134 => SqlState::DIVISION_BY_ZERO,
            1205 => SqlState::SERIALIZATION_FAILURE,
            3902 | 3903 | 266 => SqlState::INVALID_TRANSACTION_STATE,
            4060 | 18456 => SqlState::INVALID_AUTHORIZATION,
            _ if class == 15 => SqlState::SYNTAX_ERROR,
            _ => SqlState::GENERAL_ERROR,
        }
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SqlState({})", self.as_str())
    }
}

/// One diagnostic record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagRecord {
    pub state: SqlState,
    pub native_error: i32,
    pub message: String,
}

impl DiagRecord {
    pub fn new(state: SqlState, native_error: i32, message: impl Into<String>) -> Self {
        Self {
            state,
            native_error,
            message: message.into(),
        }
    }

    fn from_server(message: &ServerMessage) -> Self {
        if message.is_info() {
            return Self::info(message.number, &message.message);
        }
        Self::new(
            SqlState::from_native(message.number, message.class),
            message.number,
            format!("{VENDOR_PREFIX}{BACKEND_PREFIX}{}", message.message),
        )
    }

    /// Backend informational message, surfaced as a general warning
    pub fn info(number: i32, message: &str) -> Self {
        Self::new(
            SqlState::GENERAL_WARNING,
            number,
            format!("{VENDOR_PREFIX}{BACKEND_PREFIX}{message}"),
        )
    }

    pub fn truncated() -> Self {
        Self::new(
            SqlState::STRING_TRUNCATED,
            0,
            format!("{VENDOR_PREFIX}String data, right truncated"),
        )
    }

    /// A requested attribute value was replaced by a supported one
    pub fn option_changed(detail: &str) -> Self {
        Self::new(
            SqlState::OPTION_VALUE_CHANGED,
            0,
            format!("{VENDOR_PREFIX}Option value changed: {detail}"),
        )
    }

    pub fn fraction_truncated() -> Self {
        Self::new(
            SqlState::FRACTION_TRUNCATED,
            0,
            format!("{VENDOR_PREFIX}Fractional truncation"),
        )
    }
}

/// Field of the diagnostic area read by `Driver::diag_field`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagField {
    /// Header: number of records
    Number,
    /// Header: rows affected by the last statement operation
    RowCount,
    SqlState,
    NativeError,
    MessageText,
    ClassOrigin,
    SubclassOrigin,
    /// Server the handle's connection is attached to
    ServerName,
}

impl DiagField {
    pub fn is_header(self) -> bool {
        matches!(self, DiagField::Number | DiagField::RowCount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagValue {
    Integer(i64),
    Text(String),
}

impl DiagRecord {
    /// Value of a per-record field held by the record itself
    pub fn field(&self, field: DiagField) -> Option<DiagValue> {
        Some(match field {
            DiagField::SqlState => DiagValue::Text(self.state.as_str().to_string()),
            DiagField::NativeError => DiagValue::Integer(self.native_error.into()),
            DiagField::MessageText => DiagValue::Text(self.message.clone()),
            DiagField::ClassOrigin => DiagValue::Text(self.state.class_origin().to_string()),
            DiagField::SubclassOrigin => DiagValue::Text(self.state.subclass_origin().to_string()),
            DiagField::Number | DiagField::RowCount | DiagField::ServerName => return None,
        })
    }
}

/// Ordered diagnostic records of a single handle
#[derive(Debug, Clone)]
pub struct Diagnostics {
    records: Vec<DiagRecord>,
    limit: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::with_limit(usize::MAX)
    }
}

impl Diagnostics {
    /// Records past `limit` are dropped; the first ones detected are kept.
    ///
    /// An error arriving at the limit takes the place of the latest warning so
    /// a failed operation always reports at least one error record.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            records: Vec::new(),
            limit: limit.max(1),
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn push(&mut self, record: DiagRecord) {
        if self.records.len() < self.limit {
            self.records.push(record);
            return;
        }
        if record.state.is_warning() {
            return;
        }
        if let Some(at) = self.records.iter().rposition(|r| r.state.is_warning()) {
            self.records.remove(at);
            self.records.push(record);
        }
    }

    pub fn record(&mut self, state: SqlState, native_error: i32, message: impl Into<String>) {
        self.push(DiagRecord::new(state, native_error, message));
    }

    /// Append the record(s) describing `error`.
    ///
    /// Backend failures produce one record per server message, in arrival order.
    pub fn push_error(&mut self, error: &OdbcError) {
        match error {
            OdbcError::Backend(messages) if !messages.is_empty() => {
                for message in messages {
                    self.push(DiagRecord::from_server(message));
                }
            }
            other => self.push(DiagRecord::new(
                other.sql_state(),
                other.native_error(),
                format!("{VENDOR_PREFIX}{other}"),
            )),
        }
    }

    pub fn records(&self) -> &[DiagRecord] {
        &self.records
    }

    /// 1-based access, as the call-level interface numbers records
    pub fn get(&self, number: usize) -> Option<&DiagRecord> {
        number.checked_sub(1).and_then(|i| self.records.get(i))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        self.records.iter().any(|r| r.state.is_warning())
    }
}

/// Return code of a call-level operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlReturn {
    Success,
    SuccessWithInfo,
    NeedData,
    NoData,
    Error,
    InvalidHandle,
}

impl SqlReturn {
    /// Numeric code as defined by the call-level interface
    pub fn raw(self) -> i16 {
        match self {
            SqlReturn::Success => 0,
            SqlReturn::SuccessWithInfo => 1,
            SqlReturn::NeedData => 99,
            SqlReturn::NoData => 100,
            SqlReturn::Error => -1,
            SqlReturn::InvalidHandle => -2,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, SqlReturn::Success | SqlReturn::SuccessWithInfo)
    }
}
