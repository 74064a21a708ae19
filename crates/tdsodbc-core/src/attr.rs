//! Connection and statement attributes

use crate::error::{OdbcError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectAttr {
    Autocommit,
    /// Seconds to wait for a login; 0 waits indefinitely
    LoginTimeout,
    PacketSize,
    /// Read-only hint; the backend is not told
    AccessMode,
    /// Database of the session; before connecting it overrides `Database=`
    CurrentCatalog,
    /// Read-only
    ConnectionDead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StmtAttr {
    /// Recorded and reported; requests are not timed out
    QueryTimeout,
    /// Rows a result set delivers before fetch reports no data; 0 is unlimited
    MaxRows,
    RowArraySize,
    CursorType,
    Concurrency,
    /// Pass text to the backend without rewriting escape clauses
    NoScan,
    /// Read-only: 1-based number of the current row, 0 off a row
    RowNumber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Bool(bool),
    UInt(u64),
    Text(String),
}

pub const CURSOR_FORWARD_ONLY: u64 = 0;
pub const CONCUR_READ_ONLY: u64 = 1;

impl AttrValue {
    pub(crate) fn as_bool(&self, attr: impl std::fmt::Debug) -> Result<bool> {
        match self {
            AttrValue::Bool(on) => Ok(*on),
            other => Err(wrong_kind(attr, other)),
        }
    }

    pub(crate) fn as_uint(&self, attr: impl std::fmt::Debug) -> Result<u64> {
        match self {
            AttrValue::UInt(n) => Ok(*n),
            other => Err(wrong_kind(attr, other)),
        }
    }

    pub(crate) fn as_text(&self, attr: impl std::fmt::Debug) -> Result<&str> {
        match self {
            AttrValue::Text(text) => Ok(text),
            other => Err(wrong_kind(attr, other)),
        }
    }
}

fn wrong_kind(attr: impl std::fmt::Debug, value: &AttrValue) -> OdbcError {
    OdbcError::InvalidAttributeValue(format!("{value:?} for {attr:?}"))
}

/// Per-statement settings that survive re-execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct StatementOptions {
    pub(crate) query_timeout_secs: u64,
    pub(crate) max_rows: u64,
    pub(crate) no_scan: bool,
}
