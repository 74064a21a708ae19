//! Schema Tests
//!
//! Catalog functions: tables, columns, keys, statistics, special columns,
//! procedures and type information.

use crate::fixtures::{TestBackend, TestConnection, test_connection};
use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use rstest::rstest;
use tdsodbc_core::{RowIdentifier, SqlReturn, SqlType};

const SCHEMA: &str = indoc! {"
    CREATE TABLE customers (id INT PRIMARY KEY, name NVARCHAR(50) NOT NULL, credit DECIMAL(12,2));
    CREATE TABLE order_lines (order_id INT, line INT, sku VARCHAR(16), PRIMARY KEY (order_id, line));
    CREATE VIEW named_customers AS SELECT id, name FROM customers
"};

fn catalog_rows(
    conn: &TestConnection,
    run: impl FnOnce(&TestConnection, tdsodbc_core::StmtHandle) -> SqlReturn,
) -> Result<Vec<Vec<Option<String>>>> {
    let stmt = conn.statement()?;
    let code = run(conn, stmt);
    conn.check(stmt, code)?;
    let rows = conn.rows(stmt);
    conn.driver.free_statement(stmt);
    rows
}

fn text(value: &str) -> Option<String> {
    Some(value.to_string())
}

/// Test table listing with name patterns and type filters
#[rstest]
#[case::memory(TestBackend::Memory)]
#[case::file(TestBackend::File)]
fn test_tables(#[case] backend: TestBackend) -> Result<()> {
    let conn = test_connection(backend)?;
    conn.execute_all(SCHEMA)?;

    let all = catalog_rows(&conn, |c, stmt| c.driver.tables(stmt, None, None, None))?;
    let listed: Vec<_> = all.iter().map(|r| (r[1].clone(), r[2].clone(), r[3].clone())).collect();
    assert_eq!(
        listed,
        vec![
            (text("dbo"), text("customers"), text("TABLE")),
            (text("dbo"), text("order_lines"), text("TABLE")),
            (text("dbo"), text("named_customers"), text("VIEW")),
        ]
    );
    assert!(all.iter().all(|r| r.len() == 5 && r[4].is_none()));

    let views = catalog_rows(&conn, |c, stmt| c.driver.tables(stmt, None, None, Some("VIEW")))?;
    assert_eq!(views.len(), 1);

    let pattern = catalog_rows(&conn, |c, stmt| c.driver.tables(stmt, Some("dbo"), Some("order%"), None))?;
    assert_eq!(pattern.len(), 1);
    assert_eq!(pattern[0][2], text("order_lines"));
    Ok(())
}

/// Test column metadata of one table
#[test]
fn test_columns() -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    conn.execute_all(SCHEMA)?;

    let rows = catalog_rows(&conn, |c, stmt| c.driver.columns(stmt, None, Some("customers"), None))?;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.len() == 12));

    let described: Vec<_> = rows
        .iter()
        .map(|r| (r[3].clone(), r[5].clone(), r[6].clone(), r[10].clone(), r[11].clone()))
        .collect();
    assert_eq!(
        described,
        vec![
            (text("id"), text("int"), text("10"), text("1"), text("NO")),
            (text("name"), text("nvarchar"), text("50"), text("2"), text("NO")),
            (text("credit"), text("decimal"), text("12"), text("3"), text("YES")),
        ]
    );
    assert_eq!(rows[0][4], text(&SqlType::Integer.code().to_string()));
    assert_eq!(rows[1][4], text(&SqlType::WVarChar.code().to_string()));
    assert_eq!(rows[2][7], text("2"));
    assert_eq!(rows[1][8], text("0"));

    let one = catalog_rows(&conn, |c, stmt| c.driver.columns(stmt, None, Some("order_lines"), Some("sku")))?;
    assert_eq!(one.len(), 1);
    assert_eq!(one[0][6], text("16"));
    Ok(())
}

/// Test primary key columns in key order
#[rstest]
#[case::single("customers", &["id"])]
#[case::composite("order_lines", &["order_id", "line"])]
#[case::none("named_customers", &[])]
fn test_primary_keys(#[case] table: &str, #[case] expected: &[&str]) -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    conn.execute_all(SCHEMA)?;

    let rows = catalog_rows(&conn, |c, stmt| c.driver.primary_keys(stmt, None, table))?;
    let columns: Vec<_> = rows.iter().filter_map(|r| r[3].clone()).collect();
    assert_eq!(columns, expected.iter().map(|c| c.to_string()).collect::<Vec<_>>());
    let sequence: Vec<_> = rows.iter().filter_map(|r| r[4].clone()).collect();
    let positions: Vec<String> = (1..=expected.len()).map(|n| n.to_string()).collect();
    assert_eq!(sequence, positions);
    Ok(())
}

/// Test the type information result set
#[test]
fn test_type_info() -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;

    let stmt = conn.statement()?;
    conn.check(stmt, conn.driver.type_info(stmt, None))?;
    assert_eq!(conn.driver.num_result_cols(stmt), Ok(8));
    let first = conn
        .driver
        .describe_col(stmt, 1)
        .map_err(|code| anyhow::anyhow!("describe_col returned {code:?}"))?;
    assert_eq!(first.name, "TYPE_NAME");
    let all = conn.rows(stmt)?;
    assert_eq!(all.len(), 26);

    let timestamps = catalog_rows(&conn, |c, stmt| c.driver.type_info(stmt, Some(SqlType::Timestamp)))?;
    let names: Vec<_> = timestamps.iter().filter_map(|r| r[0].clone()).collect();
    assert_eq!(names, vec!["datetime", "datetime2"]);
    Ok(())
}

const REFERENCES: &str = indoc! {"
    CREATE TABLE customers (id INT PRIMARY KEY, email NVARCHAR(80) UNIQUE);
    CREATE TABLE invoices (
        id INT PRIMARY KEY,
        customer_id INT NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
        customer_email NVARCHAR(80) REFERENCES customers(email)
    )
"};

/// Test foreign keys seen from the referenced and the referencing table
#[rstest]
#[case::by_primary_key_table(Some("customers"), None)]
#[case::by_foreign_key_table(None, Some("invoices"))]
#[case::by_both(Some("customers"), Some("invoices"))]
fn test_foreign_keys(#[case] pk_table: Option<&str>, #[case] fk_table: Option<&str>) -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    conn.execute_all(REFERENCES)?;

    let rows = catalog_rows(&conn, |c, stmt| c.driver.foreign_keys(stmt, None, pk_table, None, fk_table))?;
    assert!(rows.iter().all(|r| r.len() == 14));
    let mut links: Vec<_> = rows
        .iter()
        .map(|r| {
            (
                r[7].clone(),
                r[2].clone(),
                r[3].clone(),
                r[6].clone(),
                r[8].clone(),
                r[9].clone(),
                r[10].clone(),
            )
        })
        .collect();
    links.sort();
    assert_eq!(
        links,
        vec![
            (
                text("customer_email"),
                text("customers"),
                text("email"),
                text("invoices"),
                text("1"),
                text("1"),
                text("1"),
            ),
            (
                text("customer_id"),
                text("customers"),
                text("id"),
                text("invoices"),
                text("1"),
                text("1"),
                text("0"),
            ),
        ]
    );
    let by_id = rows
        .iter()
        .find(|r| r[7] == text("customer_id"))
        .ok_or_else(|| anyhow::anyhow!("no key on customer_id"))?;
    assert_eq!(by_id[12], text("PK_customers"));
    assert!(by_id[11].as_deref().is_some_and(|name| name.starts_with("FK_invoices_")));
    Ok(())
}

/// Test that a foreign-key lookup names at least one table
#[test]
fn test_foreign_keys_without_a_table() -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    let stmt = conn.statement()?;
    assert_eq!(conn.driver.foreign_keys(stmt, None, None, Some("dbo"), None), SqlReturn::Error);
    assert_eq!(conn.states(stmt), vec!["HY009"]);
    conn.driver.free_statement(stmt);
    Ok(())
}

/// Test index statistics built from key constraints
#[rstest]
#[case::memory(TestBackend::Memory)]
#[case::file(TestBackend::File)]
fn test_statistics(#[case] backend: TestBackend) -> Result<()> {
    let conn = test_connection(backend)?;
    conn.execute_all(REFERENCES)?;

    let rows = catalog_rows(&conn, |c, stmt| c.driver.statistics(stmt, None, "customers", false))?;
    assert!(rows.iter().all(|r| r.len() == 13));
    let columns: Vec<_> = rows.iter().map(|r| r[8].clone()).collect();
    assert_eq!(columns, vec![text("id"), text("email")]);
    assert!(rows.iter().all(|r| r[3] == text("0") && r[6] == text("3")));
    assert_eq!(rows[0][5], text("PK_customers"));
    assert!(rows[1][5].as_deref().is_some_and(|name| name.starts_with("sqlite_autoindex_customers")));

    let unique = catalog_rows(&conn, |c, stmt| c.driver.statistics(stmt, None, "customers", true))?;
    assert_eq!(unique, rows);
    Ok(())
}

/// Test row-identifying columns
#[test]
fn test_special_columns() -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    conn.execute_all(SCHEMA)?;

    let best = catalog_rows(&conn, |c, stmt| {
        c.driver.special_columns(stmt, RowIdentifier::BestRowId, None, "order_lines")
    })?;
    let described: Vec<_> = best
        .iter()
        .map(|r| (r[0].clone(), r[1].clone(), r[2].clone(), r[3].clone(), r[7].clone()))
        .collect();
    let integer = SqlType::Integer.code().to_string();
    assert_eq!(
        described,
        vec![
            (text("2"), text("order_id"), text(&integer), text("int"), text("1")),
            (text("2"), text("line"), text(&integer), text("int"), text("1")),
        ]
    );

    let versions = catalog_rows(&conn, |c, stmt| {
        c.driver.special_columns(stmt, RowIdentifier::RowVersion, None, "order_lines")
    })?;
    assert!(versions.is_empty());
    Ok(())
}

/// Test that procedure listing answers with an empty, fully shaped result
#[test]
fn test_procedures() -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    conn.execute_all(SCHEMA)?;

    let stmt = conn.statement()?;
    conn.check(stmt, conn.driver.procedures(stmt, None, Some("%")))?;
    assert_eq!(conn.driver.num_result_cols(stmt), Ok(8));
    assert!(conn.rows(stmt)?.is_empty());
    conn.driver.free_statement(stmt);
    Ok(())
}
