//! Driver and data-source information reported through `get_info` and
//! `get_functions`

use crate::error::{OdbcError, Result};

/// What an open connection is attached to, recorded at connect time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub data_source: String,
    pub server: String,
    pub database: String,
    pub user: String,
    pub dbms_name: &'static str,
    pub dbms_version: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoType {
    MaxDriverConnections,
    DataSourceName,
    DriverName,
    DriverVer,
    DriverOdbcVer,
    ServerName,
    SearchPatternEscape,
    DatabaseName,
    DbmsName,
    DbmsVer,
    AccessibleTables,
    AccessibleProcedures,
    Procedures,
    ConcatNullBehavior,
    CursorCommitBehavior,
    CursorRollbackBehavior,
    DataSourceReadOnly,
    DefaultTxnIsolation,
    ExpressionsInOrderBy,
    IdentifierQuoteChar,
    MaxColumnNameLen,
    MaxSchemaNameLen,
    MaxCatalogNameLen,
    MaxTableNameLen,
    MultResultSets,
    MultipleActiveTxn,
    OuterJoins,
    SchemaTerm,
    ProcedureTerm,
    CatalogNameSeparator,
    CatalogTerm,
    TableTerm,
    TxnCapable,
    UserName,
    TxnIsolationOption,
    CorrelationName,
    NonNullableColumns,
    GetDataExtensions,
    NullCollation,
    ColumnAlias,
    GroupBy,
    OrderByColumnsInSelect,
    QuotedIdentifierCase,
    SpecialCharacters,
    Subqueries,
    Union,
    MaxColumnsInGroupBy,
    MaxColumnsInOrderBy,
    MaxColumnsInSelect,
    NeedLongDataLen,
    DescribeParameter,
    MaxIdentifierLen,
}

/// Call-level codes of each information type
const INFO_CODES: &[(InfoType, u16)] = &[
    (InfoType::MaxDriverConnections, 0),
    (InfoType::DataSourceName, 2),
    (InfoType::DriverName, 6),
    (InfoType::DriverVer, 7),
    (InfoType::ServerName, 13),
    (InfoType::SearchPatternEscape, 14),
    (InfoType::DatabaseName, 16),
    (InfoType::DbmsName, 17),
    (InfoType::DbmsVer, 18),
    (InfoType::AccessibleTables, 19),
    (InfoType::AccessibleProcedures, 20),
    (InfoType::Procedures, 21),
    (InfoType::ConcatNullBehavior, 22),
    (InfoType::CursorCommitBehavior, 23),
    (InfoType::CursorRollbackBehavior, 24),
    (InfoType::DataSourceReadOnly, 25),
    (InfoType::DefaultTxnIsolation, 26),
    (InfoType::ExpressionsInOrderBy, 27),
    (InfoType::IdentifierQuoteChar, 29),
    (InfoType::MaxColumnNameLen, 30),
    (InfoType::MaxSchemaNameLen, 32),
    (InfoType::MaxCatalogNameLen, 34),
    (InfoType::MaxTableNameLen, 35),
    (InfoType::MultResultSets, 36),
    (InfoType::MultipleActiveTxn, 37),
    (InfoType::OuterJoins, 38),
    (InfoType::SchemaTerm, 39),
    (InfoType::ProcedureTerm, 40),
    (InfoType::CatalogNameSeparator, 41),
    (InfoType::CatalogTerm, 42),
    (InfoType::TableTerm, 45),
    (InfoType::TxnCapable, 46),
    (InfoType::UserName, 47),
    (InfoType::TxnIsolationOption, 72),
    (InfoType::CorrelationName, 74),
    (InfoType::NonNullableColumns, 75),
    (InfoType::DriverOdbcVer, 77),
    (InfoType::GetDataExtensions, 81),
    (InfoType::NullCollation, 85),
    (InfoType::ColumnAlias, 87),
    (InfoType::GroupBy, 88),
    (InfoType::OrderByColumnsInSelect, 90),
    (InfoType::QuotedIdentifierCase, 93),
    (InfoType::SpecialCharacters, 94),
    (InfoType::Subqueries, 95),
    (InfoType::Union, 96),
    (InfoType::MaxColumnsInGroupBy, 97),
    (InfoType::MaxColumnsInOrderBy, 99),
    (InfoType::MaxColumnsInSelect, 100),
    (InfoType::NeedLongDataLen, 111),
    (InfoType::DescribeParameter, 10002),
    (InfoType::MaxIdentifierLen, 10005),
];

impl InfoType {
    pub fn code(self) -> u16 {
        INFO_CODES
            .iter()
            .find(|(info, _)| *info == self)
            .map_or(u16::MAX, |(_, code)| *code)
    }

    pub fn from_code(code: u16) -> Option<Self> {
        INFO_CODES
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(info, _)| *info)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue {
    Text(String),
    U16(u16),
    U32(u32),
}

const IDENTIFIER_LIMIT: u16 = 128;

const TXN_READ_UNCOMMITTED: u32 = 0x1;
const TXN_READ_COMMITTED: u32 = 0x2;
const TXN_REPEATABLE_READ: u32 = 0x4;
const TXN_SERIALIZABLE: u32 = 0x8;

/// Transactions may hold both data and schema statements
const TC_ALL: u16 = 2;
/// Cursors and prepared statements are closed by commit and rollback
const CB_DELETE: u16 = 0;
/// GetData may read any column, in any order
const GD_ANY_COLUMN_ANY_ORDER: u32 = 0x1 | 0x2;
/// Comparison, EXISTS, IN and quantified subqueries, correlated or not
const SQ_ALL: u32 = 0x1F;
/// UNION and UNION ALL
const U_UNION_ALL: u32 = 0x1 | 0x2;

fn yes(on: bool) -> InfoValue {
    InfoValue::Text(if on { "Y" } else { "N" }.to_string())
}

fn text(value: &str) -> InfoValue {
    InfoValue::Text(value.to_string())
}

/// Driver version as `MM.mm.pppp`
pub fn driver_version() -> String {
    format!(
        "{:0>2}.{:0>2}.{:0>4}",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH")
    )
}

/// Answer `info`; data-source facts need the connection to be open
pub(crate) fn info_value(info: InfoType, session: Option<&SessionInfo>, read_only: bool) -> Result<InfoValue> {
    let session = || session.ok_or(OdbcError::NotConnected);
    Ok(match info {
        InfoType::DriverName => text("tdsodbc"),
        InfoType::DriverVer => InfoValue::Text(driver_version()),
        InfoType::DriverOdbcVer => text("03.80"),
        InfoType::DataSourceName => text(&session()?.data_source),
        InfoType::ServerName => text(&session()?.server),
        InfoType::DatabaseName => text(&session()?.database),
        InfoType::UserName => text(&session()?.user),
        InfoType::DbmsName => text(session()?.dbms_name),
        InfoType::DbmsVer => text(session()?.dbms_version),
        InfoType::DataSourceReadOnly => yes(read_only),
        InfoType::SearchPatternEscape => text("\\"),
        InfoType::IdentifierQuoteChar => text("\""),
        InfoType::CatalogNameSeparator => text("."),
        InfoType::CatalogTerm => text("database"),
        InfoType::SchemaTerm => text("owner"),
        InfoType::ProcedureTerm => text("stored procedure"),
        InfoType::TableTerm => text("table"),
        InfoType::SpecialCharacters => text("_@#$"),
        InfoType::NeedLongDataLen => yes(false),
        InfoType::AccessibleTables
        | InfoType::AccessibleProcedures
        | InfoType::Procedures
        | InfoType::ExpressionsInOrderBy
        | InfoType::MultResultSets
        | InfoType::MultipleActiveTxn
        | InfoType::OuterJoins
        | InfoType::ColumnAlias
        | InfoType::DescribeParameter => yes(true),
        InfoType::OrderByColumnsInSelect => yes(false),
        InfoType::MaxDriverConnections
        | InfoType::MaxColumnsInGroupBy
        | InfoType::MaxColumnsInOrderBy
        | InfoType::MaxColumnsInSelect => InfoValue::U16(0),
        InfoType::MaxColumnNameLen
        | InfoType::MaxSchemaNameLen
        | InfoType::MaxCatalogNameLen
        | InfoType::MaxTableNameLen
        | InfoType::MaxIdentifierLen => InfoValue::U16(IDENTIFIER_LIMIT),
        InfoType::CursorCommitBehavior | InfoType::CursorRollbackBehavior => InfoValue::U16(CB_DELETE),
        InfoType::TxnCapable => InfoValue::U16(TC_ALL),
        InfoType::ConcatNullBehavior => InfoValue::U16(0),
        InfoType::CorrelationName => InfoValue::U16(2),
        InfoType::GroupBy => InfoValue::U16(2),
        InfoType::QuotedIdentifierCase => InfoValue::U16(3),
        InfoType::NonNullableColumns => InfoValue::U16(1),
        InfoType::NullCollation => InfoValue::U16(0),
        InfoType::GetDataExtensions => InfoValue::U32(GD_ANY_COLUMN_ANY_ORDER),
        InfoType::TxnIsolationOption => InfoValue::U32(
            TXN_READ_UNCOMMITTED | TXN_READ_COMMITTED | TXN_REPEATABLE_READ | TXN_SERIALIZABLE,
        ),
        InfoType::DefaultTxnIsolation => InfoValue::U32(TXN_READ_COMMITTED),
        InfoType::Subqueries => InfoValue::U32(SQ_ALL),
        InfoType::Union => InfoValue::U32(U_UNION_ALL),
    })
}

/// Call-level functions the driver implements, by their API code
const SUPPORTED_FUNCTIONS: &[u16] = &[
    4,    // BindCol
    5,    // Cancel
    6,    // ColAttribute
    7,    // Connect
    8,    // DescribeCol
    9,    // Disconnect
    11,   // ExecDirect
    12,   // Execute
    13,   // Fetch
    16,   // FreeStmt
    18,   // NumResultCols
    19,   // Prepare
    20,   // RowCount
    40,   // Columns
    41,   // DriverConnect
    43,   // GetData
    44,   // GetFunctions
    45,   // GetInfo
    47,   // GetTypeInfo
    48,   // ParamData
    49,   // PutData
    52,   // SpecialColumns
    53,   // Statistics
    54,   // Tables
    58,   // DescribeParam
    60,   // ForeignKeys
    61,   // MoreResults
    62,   // NativeSql
    63,   // NumParams
    65,   // PrimaryKeys
    67,   // Procedures
    72,   // BindParameter
    1001, // AllocHandle
    1003, // CloseCursor
    1005, // EndTran
    1006, // FreeHandle
    1007, // GetConnectAttr
    1010, // GetDiagField
    1011, // GetDiagRec
    1014, // GetStmtAttr
    1016, // SetConnectAttr
    1020, // SetStmtAttr
    1021, // FetchScroll
];

/// Words in the bitmap answering "all functions" queries
pub const FUNCTION_BITMAP_WORDS: usize = 250;

pub fn is_function_supported(function: u16) -> bool {
    SUPPORTED_FUNCTIONS.contains(&function)
}

/// One bit per API code: word `code >> 4`, bit `code & 0xF`
pub fn function_bitmap() -> [u16; FUNCTION_BITMAP_WORDS] {
    let mut words = [0u16; FUNCTION_BITMAP_WORDS];
    for code in SUPPORTED_FUNCTIONS {
        if let Some(word) = words.get_mut(usize::from(code >> 4)) {
            *word |= 1 << (code & 0xF);
        }
    }
    words
}
