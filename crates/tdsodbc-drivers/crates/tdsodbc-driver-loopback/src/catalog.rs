//! `INFORMATION_SCHEMA` views rebuilt over `sqlite_master` and the table pragmas

/// Schema every loopback object reports
pub(crate) const SCHEMA: &str = "dbo";

/// User tables and views with their declared columns split into base type
/// name and the text after the opening parenthesis
const DECLARED_COLUMNS: &str = "SELECT m.name AS tbl, p.cid AS cid, p.name AS col, \
     p.dflt_value AS dflt, p.\"notnull\" AS nn, p.pk AS pk, \
     CASE lower(trim(CASE WHEN instr(p.type, '(') > 0 \
         THEN substr(p.type, 1, instr(p.type, '(') - 1) ELSE p.type END)) \
       WHEN '' THEN 'nvarchar' WHEN 'integer' THEN 'int' WHEN 'boolean' THEN 'bit' \
       WHEN 'double' THEN 'float' \
       ELSE lower(trim(CASE WHEN instr(p.type, '(') > 0 \
         THEN substr(p.type, 1, instr(p.type, '(') - 1) ELSE p.type END)) END AS dt, \
     CASE WHEN instr(p.type, '(') > 0 THEN substr(p.type, instr(p.type, '(') + 1) END AS args \
     FROM sqlite_master m JOIN pragma_table_info(m.name) p \
     WHERE m.type IN ('table', 'view') AND m.name NOT LIKE 'sqlite_%'";

/// Name given to the foreign key numbered `f.id` of table `m`
const FOREIGN_KEY_NAME: &str = "'FK_' || m.name || '_' || f.id";

fn quoted(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Derived-table body for `INFORMATION_SCHEMA.<view>`, or `None` for views
/// the loopback does not provide
pub(crate) fn view(name: &str, catalog: &str) -> Option<String> {
    let catalog = quoted(catalog);
    let schema = quoted(SCHEMA);
    let body = match name.to_ascii_uppercase().as_str() {
        "TABLES" => format!(
            "SELECT {catalog} AS TABLE_CATALOG, {schema} AS TABLE_SCHEMA, m.name AS TABLE_NAME, \
             CASE m.type WHEN 'view' THEN 'VIEW' ELSE 'BASE TABLE' END AS TABLE_TYPE \
             FROM sqlite_master m \
             WHERE m.type IN ('table', 'view') AND m.name NOT LIKE 'sqlite_%'"
        ),
        "COLUMNS" => format!(
            "SELECT {catalog} AS TABLE_CATALOG, {schema} AS TABLE_SCHEMA, c.tbl AS TABLE_NAME, \
             c.col AS COLUMN_NAME, c.cid + 1 AS ORDINAL_POSITION, c.dflt AS COLUMN_DEFAULT, \
             CASE WHEN c.nn = 1 OR c.pk > 0 THEN 'NO' ELSE 'YES' END AS IS_NULLABLE, \
             c.dt AS DATA_TYPE, \
             CASE WHEN c.dt IN ('char', 'nchar', 'binary') \
                 THEN COALESCE(CAST(c.args AS INTEGER), 1) \
               WHEN c.dt IN ('varchar', 'nvarchar', 'varbinary') \
                 THEN COALESCE(CAST(c.args AS INTEGER), -1) \
               WHEN c.dt IN ('text', 'ntext', 'image', 'xml') THEN 2147483647 \
               END AS CHARACTER_MAXIMUM_LENGTH, \
             CASE c.dt WHEN 'bit' THEN 1 WHEN 'tinyint' THEN 3 WHEN 'smallint' THEN 5 \
               WHEN 'int' THEN 10 WHEN 'bigint' THEN 19 WHEN 'real' THEN 24 WHEN 'float' THEN 53 \
               WHEN 'money' THEN 19 WHEN 'smallmoney' THEN 10 \
               WHEN 'decimal' THEN COALESCE(CAST(c.args AS INTEGER), 18) \
               WHEN 'numeric' THEN COALESCE(CAST(c.args AS INTEGER), 18) \
               END AS NUMERIC_PRECISION, \
             CASE WHEN c.dt IN ('bit', 'tinyint', 'smallint', 'int', 'bigint') THEN 0 \
               WHEN c.dt IN ('money', 'smallmoney') THEN 4 \
               WHEN c.dt IN ('decimal', 'numeric') THEN \
                 CASE WHEN instr(c.args, ',') > 0 \
                   THEN CAST(substr(c.args, instr(c.args, ',') + 1) AS INTEGER) ELSE 0 END \
               END AS NUMERIC_SCALE \
             FROM ({DECLARED_COLUMNS}) c"
        ),
        "TABLE_CONSTRAINTS" => format!(
            "SELECT DISTINCT 'PK_' || m.name AS CONSTRAINT_NAME, {catalog} AS TABLE_CATALOG, \
             {schema} AS TABLE_SCHEMA, m.name AS TABLE_NAME, 'PRIMARY KEY' AS CONSTRAINT_TYPE \
             FROM sqlite_master m JOIN pragma_table_info(m.name) p \
             WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' AND p.pk > 0 \
             UNION ALL \
             SELECT il.name, {catalog}, {schema}, m.name, 'UNIQUE' \
             FROM sqlite_master m JOIN pragma_index_list(m.name) il \
             WHERE m.type = 'table' AND il.origin = 'u' \
             UNION ALL \
             SELECT DISTINCT {FOREIGN_KEY_NAME}, {catalog}, {schema}, m.name, 'FOREIGN KEY' \
             FROM sqlite_master m JOIN pragma_foreign_key_list(m.name) f \
             WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'"
        ),
        "KEY_COLUMN_USAGE" => format!(
            "SELECT {schema} AS CONSTRAINT_SCHEMA, 'PK_' || m.name AS CONSTRAINT_NAME, \
             {catalog} AS TABLE_CATALOG, {schema} AS TABLE_SCHEMA, m.name AS TABLE_NAME, \
             p.name AS COLUMN_NAME, p.pk AS ORDINAL_POSITION \
             FROM sqlite_master m JOIN pragma_table_info(m.name) p \
             WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' AND p.pk > 0 \
             UNION ALL \
             SELECT {schema}, il.name, {catalog}, {schema}, m.name, ii.name, ii.seqno + 1 \
             FROM sqlite_master m JOIN pragma_index_list(m.name) il \
             JOIN pragma_index_info(il.name) ii \
             WHERE m.type = 'table' AND il.origin = 'u' \
             UNION ALL \
             SELECT {schema}, {FOREIGN_KEY_NAME}, {catalog}, {schema}, m.name, f.\"from\", f.seq + 1 \
             FROM sqlite_master m JOIN pragma_foreign_key_list(m.name) f \
             WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'"
        ),
        "REFERENTIAL_CONSTRAINTS" => format!(
            "SELECT {catalog} AS CONSTRAINT_CATALOG, {schema} AS CONSTRAINT_SCHEMA, \
             {FOREIGN_KEY_NAME} AS CONSTRAINT_NAME, {catalog} AS UNIQUE_CONSTRAINT_CATALOG, \
             {schema} AS UNIQUE_CONSTRAINT_SCHEMA, \
             COALESCE((SELECT il.name FROM pragma_index_list(f.\"table\") il \
                 JOIN pragma_index_info(il.name) ii \
                 WHERE il.origin = 'u' AND ii.name = f.\"to\" LIMIT 1), \
               'PK_' || f.\"table\") AS UNIQUE_CONSTRAINT_NAME, \
             upper(f.on_update) AS UPDATE_RULE, upper(f.on_delete) AS DELETE_RULE \
             FROM sqlite_master m JOIN pragma_foreign_key_list(m.name) f \
             WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' AND f.seq = 0"
        ),
        "ROUTINES" => format!(
            "SELECT {catalog} AS ROUTINE_CATALOG, {schema} AS ROUTINE_SCHEMA, \
             NULL AS ROUTINE_NAME, NULL AS ROUTINE_TYPE WHERE 0"
        ),
        _ => return None,
    };
    Some(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rusqlite::Connection;

    fn database() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE orders (id INT PRIMARY KEY, code NVARCHAR(20) NOT NULL UNIQUE, \
             total DECIMAL(10,2), note NVARCHAR, flag CHAR);
             CREATE VIEW big_orders AS SELECT id FROM orders WHERE total > 100;",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_tables_view() {
        let conn = database();
        let sql = format!("SELECT TABLE_NAME, TABLE_TYPE, TABLE_CATALOG FROM ({}) ORDER BY 1", view("tables", "sales").unwrap());
        let rows: Vec<(String, String, String)> = conn
            .prepare(&sql)
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                ("big_orders".to_string(), "VIEW".to_string(), "sales".to_string()),
                ("orders".to_string(), "BASE TABLE".to_string(), "sales".to_string()),
            ]
        );
    }

    #[test]
    fn test_columns_view_reports_sizes() {
        let conn = database();
        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, \
             NUMERIC_SCALE, IS_NULLABLE FROM ({}) WHERE TABLE_NAME = 'orders' \
             ORDER BY ORDINAL_POSITION",
            view("COLUMNS", "main").unwrap()
        );
        type Row = (String, String, Option<i64>, Option<i64>, Option<i64>, String);
        let rows: Vec<Row> = conn
            .prepare(&sql)
            .unwrap()
            .query_map([], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                ("id".into(), "int".into(), None, Some(10), Some(0), "NO".into()),
                ("code".into(), "nvarchar".into(), Some(20), None, None, "NO".into()),
                ("total".into(), "decimal".into(), None, Some(10), Some(2), "YES".into()),
                ("note".into(), "nvarchar".into(), Some(-1), None, None, "YES".into()),
                ("flag".into(), "char".into(), Some(1), None, None, "YES".into()),
            ]
        );
    }

    #[test]
    fn test_key_views_cover_primary_and_unique_keys() {
        let conn = database();
        let sql = format!(
            "SELECT tc.CONSTRAINT_TYPE, k.COLUMN_NAME, k.ORDINAL_POSITION \
             FROM ({}) tc JOIN ({}) k ON k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
             ORDER BY 1, 2",
            view("TABLE_CONSTRAINTS", "main").unwrap(),
            view("KEY_COLUMN_USAGE", "main").unwrap()
        );
        let rows: Vec<(String, String, i64)> = conn
            .prepare(&sql)
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                ("PRIMARY KEY".to_string(), "id".to_string(), 1),
                ("UNIQUE".to_string(), "code".to_string(), 1),
            ]
        );
        assert_eq!(view("SEQUENCES", "main"), None);
    }

    #[test]
    fn test_referential_constraints_name_both_keys() {
        let conn = database();
        conn.execute_batch(
            "CREATE TABLE lines (order_id INT REFERENCES orders ON DELETE CASCADE, \
             order_code NVARCHAR(20) REFERENCES orders(code), qty INT);",
        )
        .unwrap();
        let sql = format!(
            "SELECT rc.CONSTRAINT_NAME, rc.UNIQUE_CONSTRAINT_NAME, rc.DELETE_RULE, k.COLUMN_NAME \
             FROM ({}) rc JOIN ({}) k ON k.CONSTRAINT_NAME = rc.CONSTRAINT_NAME ORDER BY 1",
            view("REFERENTIAL_CONSTRAINTS", "main").unwrap(),
            view("KEY_COLUMN_USAGE", "main").unwrap()
        );
        let rows: Vec<(String, String, String, String)> = conn
            .prepare(&sql)
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let unique_index: String = conn
            .query_row(
                "SELECT name FROM pragma_index_list('orders') WHERE origin = 'u'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        let by_column = |column: &str| rows.iter().find(|r| r.3 == column).cloned().unwrap();
        let (_, target, rule, _) = by_column("order_id");
        assert_eq!((target.as_str(), rule.as_str()), ("PK_orders", "CASCADE"));
        let (_, target, rule, _) = by_column("order_code");
        assert_eq!((target, rule.as_str()), (unique_index, "NO ACTION"));
    }
}
