//! Data Type Tests
//!
//! Values read back through character and native buffers: padding,
//! precision, NULLs, truncation in chunks and binary renderings.

use crate::fixtures::{TestBackend, test_connection};
use anyhow::Result;
use pretty_assertions::assert_eq;
use rstest::rstest;
use tdsodbc_core::{CType, Indicator, SqlReturn};

/// Test the text rendering of stored values by declared column type
#[rstest]
#[case::char_padded("CHAR(10)", "'abc'", "abc       ")]
#[case::varchar_unpadded("VARCHAR(10)", "'abc'", "abc")]
#[case::nchar_padded("NCHAR(5)", "N'ab'", "ab   ")]
#[case::datetime2_millis("DATETIME2", "'2024-01-02 03:04:05.1234567'", "2024-01-02 03:04:05.123")]
#[case::datetimeoffset_utc(
    "DATETIMEOFFSET",
    "'2024-01-15 13:45:30 +05:30'",
    "2024-01-15 08:15:30.000 +05:30"
)]
#[case::date("DATE", "'2024-02-29'", "2024-02-29")]
#[case::decimal_scale("DECIMAL(10,2)", "12.5", "12.50")]
#[case::money_scale("MONEY", "3.5", "3.5000")]
#[case::bit("BIT", "1", "1")]
#[case::bigint("BIGINT", "9007199254740993", "9007199254740993")]
#[case::varbinary_hex("VARBINARY(8)", "0xDEADBEEF", "deadbeef")]
#[case::guid_upper(
    "UNIQUEIDENTIFIER",
    "'6f9619ff-8b86-d011-b42d-00c04fc964ff'",
    "6F9619FF-8B86-D011-B42D-00C04FC964FF"
)]
fn test_text_rendering(
    #[case] column_type: &str,
    #[case] literal: &str,
    #[case] expected: &str,
) -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    conn.execute(&format!("CREATE TABLE t (v {column_type})"))?;
    conn.execute(&format!("INSERT INTO t VALUES ({literal})"))?;

    assert_eq!(conn.scalar("SELECT v FROM t")?, Some(expected.to_string()));
    Ok(())
}

/// Test that NULL reads back as NULL whatever the column type
#[rstest]
#[case::int("INT")]
#[case::nvarchar("NVARCHAR(20)")]
#[case::datetime2("DATETIME2")]
#[case::decimal("DECIMAL(10,2)")]
#[case::varbinary("VARBINARY(16)")]
fn test_null_values(#[case] column_type: &str) -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    conn.execute(&format!("CREATE TABLE t (v {column_type})"))?;
    conn.execute("INSERT INTO t VALUES (NULL)")?;

    let stmt = conn.statement()?;
    conn.check(stmt, conn.driver.exec_direct(stmt, "SELECT v FROM t").code())?;
    assert_eq!(conn.driver.fetch(stmt), SqlReturn::Success);
    let mut buf = [0u8; 32];
    let got = conn.driver.get_data(stmt, 1, CType::Char, &mut buf);
    assert_eq!(got.code, SqlReturn::Success);
    assert_eq!(got.indicator, Some(Indicator::Null));
    Ok(())
}

/// Test that a long value is delivered in chunks with truncation warnings
#[rstest]
#[case::memory(TestBackend::Memory)]
#[case::file(TestBackend::File)]
fn test_chunked_get_data(#[case] backend: TestBackend) -> Result<()> {
    let conn = test_connection(backend)?;
    conn.execute("CREATE TABLE t (v VARCHAR(20))")?;
    conn.execute("INSERT INTO t VALUES ('abcdefghij')")?;

    let stmt = conn.statement()?;
    conn.check(stmt, conn.driver.exec_direct(stmt, "SELECT v FROM t").code())?;
    assert_eq!(conn.driver.fetch(stmt), SqlReturn::Success);

    let mut buf = [0u8; 5];
    let got = conn.driver.get_data(stmt, 1, CType::Char, &mut buf);
    assert_eq!(got.code, SqlReturn::SuccessWithInfo);
    assert_eq!(got.indicator, Some(Indicator::Length(10)));
    assert_eq!(&buf, b"abcd\0");
    assert_eq!(conn.states(stmt), vec!["01004"]);

    let got = conn.driver.get_data(stmt, 1, CType::Char, &mut buf);
    assert_eq!(got.code, SqlReturn::SuccessWithInfo);
    assert_eq!(got.indicator, Some(Indicator::Length(6)));
    assert_eq!(&buf, b"efgh\0");

    let got = conn.driver.get_data(stmt, 1, CType::Char, &mut buf);
    assert_eq!(got.code, SqlReturn::Success);
    assert_eq!(got.indicator, Some(Indicator::Length(2)));
    assert_eq!(&buf[..3], b"ij\0");

    let got = conn.driver.get_data(stmt, 1, CType::Char, &mut buf);
    assert_eq!(got.code, SqlReturn::NoData);
    Ok(())
}

/// Test reads into native integer, float and wide-character buffers
#[test]
fn test_native_targets() -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    conn.execute("CREATE TABLE t (n INT, x FLOAT, s NVARCHAR(10))")?;
    conn.execute("INSERT INTO t VALUES (42, 2.5, N'hé')")?;

    let stmt = conn.statement()?;
    conn.check(stmt, conn.driver.exec_direct(stmt, "SELECT n, x, s FROM t").code())?;
    assert_eq!(conn.driver.fetch(stmt), SqlReturn::Success);

    let mut n = [0u8; 4];
    let got = conn.driver.get_data(stmt, 1, CType::SLong, &mut n);
    assert_eq!(got.code, SqlReturn::Success);
    assert_eq!(i32::from_ne_bytes(n), 42);

    let mut x = [0u8; 8];
    let got = conn.driver.get_data(stmt, 2, CType::Double, &mut x);
    assert_eq!(got.code, SqlReturn::Success);
    assert_eq!(f64::from_ne_bytes(x), 2.5);

    let mut s = [0u8; 16];
    let got = conn.driver.get_data(stmt, 3, CType::WChar, &mut s);
    assert_eq!(got.code, SqlReturn::Success);
    assert_eq!(got.indicator, Some(Indicator::Length(4)));
    let units: Vec<u16> = s[..4]
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .collect();
    assert_eq!(String::from_utf16_lossy(&units), "hé");
    Ok(())
}

/// Test that numbers stored in a text column convert to integer buffers
#[test]
fn test_text_to_integer_conversion() -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    conn.execute("CREATE TABLE t (v VARCHAR(10))")?;
    conn.execute("INSERT INTO t VALUES (' 17 ')")?;

    let stmt = conn.statement()?;
    conn.check(stmt, conn.driver.exec_direct(stmt, "SELECT v FROM t").code())?;
    assert_eq!(conn.driver.fetch(stmt), SqlReturn::Success);
    let mut buf = [0u8; 4];
    let got = conn.driver.get_data(stmt, 1, CType::SLong, &mut buf);
    assert_eq!(got.code, SqlReturn::Success);
    assert_eq!(i32::from_ne_bytes(buf), 17);
    Ok(())
}

/// Test that integer buffers truncate fractions toward zero and warn about it
#[rstest]
#[case::float("FLOAT", "2.75", 2, true)]
#[case::negative_decimal("DECIMAL(5,2)", "-2.75", -2, true)]
#[case::text("VARCHAR(10)", "'9.9'", 9, true)]
#[case::whole_decimal("DECIMAL(5,2)", "4.00", 4, false)]
fn test_fractions_truncate_into_integers(
    #[case] column_type: &str,
    #[case] literal: &str,
    #[case] expected: i32,
    #[case] warned: bool,
) -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    conn.execute(&format!("CREATE TABLE t (v {column_type})"))?;
    conn.execute(&format!("INSERT INTO t VALUES ({literal})"))?;

    let stmt = conn.statement()?;
    conn.check(stmt, conn.driver.exec_direct(stmt, "SELECT v FROM t").code())?;
    assert_eq!(conn.driver.fetch(stmt), SqlReturn::Success);
    let mut buf = [0u8; 4];
    let got = conn.driver.get_data(stmt, 1, CType::SLong, &mut buf);
    assert_eq!(i32::from_ne_bytes(buf), expected);
    if warned {
        assert_eq!(got.code, SqlReturn::SuccessWithInfo);
        assert_eq!(conn.states(stmt), vec!["01S07"]);
    } else {
        assert_eq!(got.code, SqlReturn::Success);
    }
    Ok(())
}
