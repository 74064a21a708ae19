//! Catalog functions as generated queries over INFORMATION_SCHEMA

use crate::error::{OdbcError, Result};
use crate::types::SqlType;
use crate::wire::{ColumnDef, TypeFamily, WireType, WireValue};

/// Query text plus the values for its `?` markers, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CatalogQuery {
    pub(crate) text: String,
    pub(crate) args: Vec<String>,
}

/// Backend type names and the SQL types they report as
const TYPE_CODES: &[(&str, SqlType)] = &[
    ("bit", SqlType::Bit),
    ("tinyint", SqlType::TinyInt),
    ("smallint", SqlType::SmallInt),
    ("int", SqlType::Integer),
    ("bigint", SqlType::BigInt),
    ("real", SqlType::Real),
    ("float", SqlType::Double),
    ("decimal", SqlType::Decimal),
    ("numeric", SqlType::Numeric),
    ("money", SqlType::Decimal),
    ("smallmoney", SqlType::Decimal),
    ("char", SqlType::Char),
    ("varchar", SqlType::VarChar),
    ("text", SqlType::LongVarChar),
    ("nchar", SqlType::WChar),
    ("nvarchar", SqlType::WVarChar),
    ("ntext", SqlType::WLongVarChar),
    ("xml", SqlType::WLongVarChar),
    ("binary", SqlType::Binary),
    ("varbinary", SqlType::VarBinary),
    ("image", SqlType::LongVarBinary),
    ("date", SqlType::Date),
    ("time", SqlType::Time),
    ("datetime", SqlType::Timestamp),
    ("smalldatetime", SqlType::Timestamp),
    ("datetime2", SqlType::Timestamp),
    ("datetimeoffset", SqlType::TimestampOffset),
    ("uniqueidentifier", SqlType::Guid),
];

fn pattern(value: Option<&str>) -> String {
    value.filter(|v| !v.is_empty()).unwrap_or("%").to_string()
}

/// `CASE` mapping a type-name column to its SQL type code
fn type_code_expr(column: &str) -> String {
    let arms: String = TYPE_CODES
        .iter()
        .map(|(name, sql_type)| format!(" WHEN '{name}' THEN {}", sql_type.code()))
        .collect();
    format!(
        "CASE LOWER({column}){arms} ELSE {} END",
        SqlType::VarChar.code()
    )
}

/// Tables and views matching the schema and table name patterns
pub(crate) fn tables(schema: Option<&str>, table: Option<&str>, table_type: Option<&str>) -> CatalogQuery {
    let mut text = String::from(
        "SELECT t.TABLE_CATALOG AS TABLE_CAT, t.TABLE_SCHEMA AS TABLE_SCHEM, t.TABLE_NAME, \
         CASE t.TABLE_TYPE WHEN 'BASE TABLE' THEN 'TABLE' ELSE t.TABLE_TYPE END AS TABLE_TYPE, \
         CAST(NULL AS NVARCHAR(254)) AS REMARKS \
         FROM INFORMATION_SCHEMA.TABLES t \
         WHERE t.TABLE_SCHEMA LIKE ? AND t.TABLE_NAME LIKE ?",
    );
    let mut args = vec![pattern(schema), pattern(table)];
    if let Some(kind) = table_type.filter(|k| !k.is_empty() && *k != "%") {
        text.push_str(" AND t.TABLE_TYPE = ?");
        let kind = kind.trim_matches('\'').to_ascii_uppercase();
        args.push(if kind == "TABLE" {
            "BASE TABLE".to_string()
        } else {
            kind
        });
    }
    text.push_str(" ORDER BY 4, 1, 2, 3");
    CatalogQuery { text, args }
}

/// Columns of matching tables, in ordinal order
pub(crate) fn columns(schema: Option<&str>, table: Option<&str>, column: Option<&str>) -> CatalogQuery {
    let text = format!(
        "SELECT c.TABLE_CATALOG AS TABLE_CAT, c.TABLE_SCHEMA AS TABLE_SCHEM, c.TABLE_NAME, \
         c.COLUMN_NAME, {} AS DATA_TYPE, c.DATA_TYPE AS TYPE_NAME, \
         COALESCE(c.CHARACTER_MAXIMUM_LENGTH, c.NUMERIC_PRECISION) AS COLUMN_SIZE, \
         c.NUMERIC_SCALE AS DECIMAL_DIGITS, \
         CASE c.IS_NULLABLE WHEN 'YES' THEN 1 ELSE 0 END AS NULLABLE, \
         c.COLUMN_DEFAULT AS COLUMN_DEF, c.ORDINAL_POSITION, c.IS_NULLABLE \
         FROM INFORMATION_SCHEMA.COLUMNS c \
         WHERE c.TABLE_SCHEMA LIKE ? AND c.TABLE_NAME LIKE ? AND c.COLUMN_NAME LIKE ? \
         ORDER BY 1, 2, 3, 11",
        type_code_expr("c.DATA_TYPE")
    );
    CatalogQuery {
        text,
        args: vec![pattern(schema), pattern(table), pattern(column)],
    }
}

/// Primary-key columns of one table, in key order
pub(crate) fn primary_keys(schema: Option<&str>, table: &str) -> CatalogQuery {
    let text = "SELECT k.TABLE_CATALOG AS TABLE_CAT, k.TABLE_SCHEMA AS TABLE_SCHEM, k.TABLE_NAME, \
         k.COLUMN_NAME, k.ORDINAL_POSITION AS KEY_SEQ, k.CONSTRAINT_NAME AS PK_NAME \
         FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
         JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE k \
         ON k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME AND k.TABLE_SCHEMA = tc.TABLE_SCHEMA \
         AND k.TABLE_NAME = tc.TABLE_NAME \
         WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND k.TABLE_SCHEMA LIKE ? AND k.TABLE_NAME = ? \
         ORDER BY 1, 2, 3, 5"
        .to_string();
    CatalogQuery {
        text,
        args: vec![pattern(schema), table.to_string()],
    }
}

/// Join of key columns to the constraints they belong to
const KEY_COLUMNS: &str = "FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
     JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE k \
     ON k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME AND k.TABLE_SCHEMA = tc.TABLE_SCHEMA \
     AND k.TABLE_NAME = tc.TABLE_NAME";

/// `CASE` mapping a referential action to its rule code
fn rule_expr(column: &str) -> String {
    format!(
        "CASE {column} WHEN 'CASCADE' THEN 0 WHEN 'SET NULL' THEN 2 \
         WHEN 'SET DEFAULT' THEN 4 ELSE 1 END"
    )
}

/// Foreign keys referencing the primary-key table, declared on the
/// foreign-key table, or linking the two; at least one table is required
pub(crate) fn foreign_keys(
    pk_schema: Option<&str>,
    pk_table: Option<&str>,
    fk_schema: Option<&str>,
    fk_table: Option<&str>,
) -> Result<CatalogQuery> {
    let given = |name: Option<&str>| name.filter(|n| !n.is_empty()).map(str::to_string);
    let (pk_table, fk_table) = (given(pk_table), given(fk_table));
    if pk_table.is_none() && fk_table.is_none() {
        return Err(OdbcError::MissingArgument(
            "a primary-key or foreign-key table name is required".to_string(),
        ));
    }
    let mut text = format!(
        "SELECT pk.TABLE_CATALOG AS PKTABLE_CAT, pk.TABLE_SCHEMA AS PKTABLE_SCHEM, \
         pk.TABLE_NAME AS PKTABLE_NAME, pk.COLUMN_NAME AS PKCOLUMN_NAME, \
         fk.TABLE_CATALOG AS FKTABLE_CAT, fk.TABLE_SCHEMA AS FKTABLE_SCHEM, \
         fk.TABLE_NAME AS FKTABLE_NAME, fk.COLUMN_NAME AS FKCOLUMN_NAME, \
         fk.ORDINAL_POSITION AS KEY_SEQ, {} AS UPDATE_RULE, {} AS DELETE_RULE, \
         rc.CONSTRAINT_NAME AS FK_NAME, rc.UNIQUE_CONSTRAINT_NAME AS PK_NAME, \
         7 AS DEFERRABILITY \
         FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc \
         JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE fk \
         ON fk.CONSTRAINT_SCHEMA = rc.CONSTRAINT_SCHEMA AND fk.CONSTRAINT_NAME = rc.CONSTRAINT_NAME \
         JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE pk \
         ON pk.CONSTRAINT_SCHEMA = rc.UNIQUE_CONSTRAINT_SCHEMA \
         AND pk.CONSTRAINT_NAME = rc.UNIQUE_CONSTRAINT_NAME \
         AND pk.ORDINAL_POSITION = fk.ORDINAL_POSITION \
         WHERE pk.TABLE_SCHEMA LIKE ? AND fk.TABLE_SCHEMA LIKE ?",
        rule_expr("rc.UPDATE_RULE"),
        rule_expr("rc.DELETE_RULE")
    );
    let mut args = vec![pattern(pk_schema), pattern(fk_schema)];
    if let Some(table) = &pk_table {
        text.push_str(" AND pk.TABLE_NAME = ?");
        args.push(table.clone());
    }
    if let Some(table) = &fk_table {
        text.push_str(" AND fk.TABLE_NAME = ?");
        args.push(table.clone());
    }
    text.push_str(if pk_table.is_some() {
        " ORDER BY 5, 6, 7, 9"
    } else {
        " ORDER BY 1, 2, 3, 9"
    });
    Ok(CatalogQuery { text, args })
}

/// Indexes of one table as far as INFORMATION_SCHEMA exposes them: the
/// primary-key and unique constraints. Every reported index is unique, so
/// `unique_only` narrows nothing.
pub(crate) fn statistics(schema: Option<&str>, table: &str, unique_only: bool) -> CatalogQuery {
    tracing::trace!(unique_only, "index statistics from key constraints");
    let text = format!(
        "SELECT k.TABLE_CATALOG AS TABLE_CAT, k.TABLE_SCHEMA AS TABLE_SCHEM, k.TABLE_NAME, \
         0 AS NON_UNIQUE, k.TABLE_NAME AS INDEX_QUALIFIER, k.CONSTRAINT_NAME AS INDEX_NAME, \
         3 AS TYPE, k.ORDINAL_POSITION, k.COLUMN_NAME, 'A' AS ASC_OR_DESC, \
         CAST(NULL AS INT) AS CARDINALITY, CAST(NULL AS INT) AS PAGES, \
         CAST(NULL AS NVARCHAR(128)) AS FILTER_CONDITION \
         {KEY_COLUMNS} \
         WHERE tc.CONSTRAINT_TYPE IN ('PRIMARY KEY', 'UNIQUE') \
         AND k.TABLE_SCHEMA LIKE ? AND k.TABLE_NAME = ? \
         ORDER BY 4, 7, 6, 8"
    );
    CatalogQuery {
        text,
        args: vec![pattern(schema), table.to_string()],
    }
}

/// Which special columns to report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowIdentifier {
    /// Columns that uniquely identify a row
    BestRowId,
    /// Columns the backend updates whenever the row changes
    RowVersion,
}

/// Row-identifying or row-versioning columns of one table
pub(crate) fn special_columns(kind: RowIdentifier, schema: Option<&str>, table: &str) -> CatalogQuery {
    let text = match kind {
        RowIdentifier::BestRowId => format!(
            "SELECT 2 AS SCOPE, c.COLUMN_NAME, {} AS DATA_TYPE, c.DATA_TYPE AS TYPE_NAME, \
             COALESCE(c.CHARACTER_MAXIMUM_LENGTH, c.NUMERIC_PRECISION) AS COLUMN_SIZE, \
             COALESCE(c.CHARACTER_MAXIMUM_LENGTH, c.NUMERIC_PRECISION) AS BUFFER_LENGTH, \
             c.NUMERIC_SCALE AS DECIMAL_DIGITS, 1 AS PSEUDO_COLUMN \
             {KEY_COLUMNS} \
             JOIN INFORMATION_SCHEMA.COLUMNS c ON c.TABLE_SCHEMA = k.TABLE_SCHEMA \
             AND c.TABLE_NAME = k.TABLE_NAME AND c.COLUMN_NAME = k.COLUMN_NAME \
             WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND k.TABLE_SCHEMA LIKE ? AND k.TABLE_NAME = ? \
             ORDER BY k.ORDINAL_POSITION",
            type_code_expr("c.DATA_TYPE")
        ),
        RowIdentifier::RowVersion => format!(
            "SELECT CAST(NULL AS SMALLINT) AS SCOPE, c.COLUMN_NAME, {} AS DATA_TYPE, \
             c.DATA_TYPE AS TYPE_NAME, 8 AS COLUMN_SIZE, 8 AS BUFFER_LENGTH, \
             CAST(NULL AS SMALLINT) AS DECIMAL_DIGITS, 1 AS PSEUDO_COLUMN \
             FROM INFORMATION_SCHEMA.COLUMNS c \
             WHERE LOWER(c.DATA_TYPE) IN ('timestamp', 'rowversion') \
             AND c.TABLE_SCHEMA LIKE ? AND c.TABLE_NAME = ? \
             ORDER BY c.ORDINAL_POSITION",
            SqlType::Binary.code()
        ),
    };
    CatalogQuery {
        text,
        args: vec![pattern(schema), table.to_string()],
    }
}

/// Stored procedures and functions matching the schema and name patterns
pub(crate) fn procedures(schema: Option<&str>, procedure: Option<&str>) -> CatalogQuery {
    let text = "SELECT r.ROUTINE_CATALOG AS PROCEDURE_CAT, r.ROUTINE_SCHEMA AS PROCEDURE_SCHEM, \
         r.ROUTINE_NAME AS PROCEDURE_NAME, CAST(NULL AS INT) AS NUM_INPUT_PARAMS, \
         CAST(NULL AS INT) AS NUM_OUTPUT_PARAMS, CAST(NULL AS INT) AS NUM_RESULT_SETS, \
         CAST(NULL AS NVARCHAR(254)) AS REMARKS, \
         CASE r.ROUTINE_TYPE WHEN 'FUNCTION' THEN 2 ELSE 1 END AS PROCEDURE_TYPE \
         FROM INFORMATION_SCHEMA.ROUTINES r \
         WHERE r.ROUTINE_SCHEMA LIKE ? AND r.ROUTINE_NAME LIKE ? \
         ORDER BY 1, 2, 3"
        .to_string();
    CatalogQuery {
        text,
        args: vec![pattern(schema), pattern(procedure)],
    }
}

struct TypeRow {
    name: &'static str,
    sql_type: SqlType,
    column_size: i32,
    prefix: Option<&'static str>,
    suffix: Option<&'static str>,
    scale: Option<(i16, i16)>,
}

const fn row(name: &'static str, sql_type: SqlType, column_size: i32) -> TypeRow {
    TypeRow {
        name,
        sql_type,
        column_size,
        prefix: None,
        suffix: None,
        scale: None,
    }
}

const fn quoted(mut row: TypeRow, prefix: &'static str, suffix: &'static str) -> TypeRow {
    row.prefix = Some(prefix);
    row.suffix = Some(suffix);
    row
}

const fn scaled(mut row: TypeRow, min: i16, max: i16) -> TypeRow {
    row.scale = Some((min, max));
    row
}

const TYPE_INFO: &[TypeRow] = &[
    row("bit", SqlType::Bit, 1),
    row("tinyint", SqlType::TinyInt, 3),
    row("smallint", SqlType::SmallInt, 5),
    row("int", SqlType::Integer, 10),
    row("bigint", SqlType::BigInt, 19),
    row("real", SqlType::Real, 24),
    row("float", SqlType::Double, 53),
    scaled(row("decimal", SqlType::Decimal, 38), 0, 38),
    scaled(row("numeric", SqlType::Numeric, 38), 0, 38),
    scaled(row("money", SqlType::Decimal, 19), 4, 4),
    scaled(row("smallmoney", SqlType::Decimal, 10), 4, 4),
    quoted(row("char", SqlType::Char, 8000), "'", "'"),
    quoted(row("varchar", SqlType::VarChar, 8000), "'", "'"),
    quoted(row("text", SqlType::LongVarChar, i32::MAX), "'", "'"),
    quoted(row("nchar", SqlType::WChar, 4000), "N'", "'"),
    quoted(row("nvarchar", SqlType::WVarChar, 4000), "N'", "'"),
    quoted(row("ntext", SqlType::WLongVarChar, 1_073_741_823), "N'", "'"),
    quoted(row("binary", SqlType::Binary, 8000), "0x", ""),
    quoted(row("varbinary", SqlType::VarBinary, 8000), "0x", ""),
    quoted(row("image", SqlType::LongVarBinary, i32::MAX), "0x", ""),
    quoted(row("date", SqlType::Date, 10), "'", "'"),
    scaled(quoted(row("time", SqlType::Time, 16), "'", "'"), 0, 7),
    scaled(quoted(row("datetime", SqlType::Timestamp, 23), "'", "'"), 3, 3),
    scaled(quoted(row("datetime2", SqlType::Timestamp, 27), "'", "'"), 0, 7),
    scaled(quoted(row("datetimeoffset", SqlType::TimestampOffset, 34), "'", "'"), 0, 7),
    quoted(row("uniqueidentifier", SqlType::Guid, 36), "'", "'"),
];

fn text(s: &str) -> WireValue {
    WireValue::Text(s.encode_utf16().collect())
}

fn opt_text(s: Option<&str>) -> WireValue {
    s.map(text).unwrap_or(WireValue::Null)
}

/// Result set describing the supported types; `None` lists every type
pub(crate) fn type_info(filter: Option<SqlType>) -> (Vec<ColumnDef>, Vec<Vec<WireValue>>) {
    let column = |name: &str, ty: WireType| ColumnDef {
        name: name.to_string(),
        ty,
        nullable: true,
    };
    let columns = vec![
        column("TYPE_NAME", WireType::sized(TypeFamily::NVarChar, 128)),
        column("DATA_TYPE", WireType::new(TypeFamily::SmallInt)),
        column("COLUMN_SIZE", WireType::new(TypeFamily::Int)),
        column("LITERAL_PREFIX", WireType::sized(TypeFamily::NVarChar, 128)),
        column("LITERAL_SUFFIX", WireType::sized(TypeFamily::NVarChar, 128)),
        column("NULLABLE", WireType::new(TypeFamily::SmallInt)),
        column("MINIMUM_SCALE", WireType::new(TypeFamily::SmallInt)),
        column("MAXIMUM_SCALE", WireType::new(TypeFamily::SmallInt)),
    ];
    let rows = TYPE_INFO
        .iter()
        .filter(|t| filter.is_none_or(|wanted| wanted == t.sql_type))
        .map(|t| {
            vec![
                text(t.name),
                WireValue::I16(t.sql_type.code()),
                WireValue::I32(t.column_size),
                opt_text(t.prefix),
                opt_text(t.suffix),
                WireValue::I16(1),
                t.scale.map_or(WireValue::Null, |(min, _)| WireValue::I16(min)),
                t.scale.map_or(WireValue::Null, |(_, max)| WireValue::I16(max)),
            ]
        })
        .collect();
    (columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqltext::placeholders;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_argument_count_matches_markers() {
        for query in [
            tables(None, Some("orders"), None),
            tables(Some("dbo"), None, Some("TABLE")),
            columns(None, Some("orders"), None),
            primary_keys(None, "orders"),
            foreign_keys(None, Some("customers"), None, None).unwrap(),
            foreign_keys(Some("dbo"), Some("customers"), None, Some("orders")).unwrap(),
            statistics(None, "orders", true),
            special_columns(RowIdentifier::BestRowId, None, "orders"),
            special_columns(RowIdentifier::RowVersion, Some("dbo"), "orders"),
            procedures(None, Some("nightly%")),
        ] {
            assert_eq!(placeholders(&query.text).len(), query.args.len(), "{}", query.text);
        }
    }

    #[test]
    fn test_missing_patterns_match_everything() {
        let query = tables(None, Some(""), Some("TABLE"));
        assert_eq!(query.args, vec!["%", "%", "BASE TABLE"]);
    }

    #[test]
    fn test_type_code_expression_covers_known_names() {
        let expr = type_code_expr("c.DATA_TYPE");
        assert!(expr.contains("WHEN 'nvarchar' THEN -9"));
        assert!(expr.ends_with("ELSE 12 END"));
    }

    #[test]
    fn test_type_info_filters_by_sql_type() {
        let (columns, rows) = type_info(Some(SqlType::Integer));
        assert_eq!(columns.len(), 8);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], text("int"));
        assert_eq!(rows[0][1], WireValue::I16(4));

        let (_, all) = type_info(None);
        assert_eq!(all.len(), TYPE_INFO.len());
        assert!(all.iter().all(|r| r.len() == columns.len()));
    }

    #[test]
    fn test_foreign_keys_needs_a_table() {
        let err = foreign_keys(Some("dbo"), None, None, Some("")).unwrap_err();
        assert_eq!(err.sql_state().as_str(), "HY009");

        let by_parent = foreign_keys(None, Some("customers"), None, None).unwrap();
        assert_eq!(by_parent.args, vec!["%", "%", "customers"]);
        assert!(by_parent.text.ends_with("ORDER BY 5, 6, 7, 9"));

        let by_child = foreign_keys(None, None, None, Some("orders")).unwrap();
        assert!(by_child.text.contains("fk.TABLE_NAME = ?"));
        assert!(by_child.text.ends_with("ORDER BY 1, 2, 3, 9"));
    }

    #[test]
    fn test_rule_codes() {
        let expr = rule_expr("rc.DELETE_RULE");
        assert!(expr.contains("WHEN 'CASCADE' THEN 0"));
        assert!(expr.ends_with("ELSE 1 END"));
    }
}
