//! Connection Tests
//!
//! Connect, disconnect and handle lifetimes through the registry-backed driver.

use std::sync::Arc;

use crate::fixtures::{TestBackend, init_tracing, loopback_connection_string, test_connection};
use anyhow::{Context, Result};
use indoc::indoc;
use pretty_assertions::assert_eq;
use rstest::rstest;
use tdsodbc_core::{Driver, DriverConfig, SqlReturn};
use tdsodbc_driver_loopback::LoopbackTransport;

/// Test that a connection opens, serves a query and closes
#[rstest]
#[case::memory(TestBackend::Memory)]
#[case::file(TestBackend::File)]
fn test_connect_and_disconnect(#[case] backend: TestBackend) -> Result<()> {
    let conn = test_connection(backend)?;
    assert_eq!(conn.driver.is_connected(conn.conn), Ok(true));
    assert_eq!(conn.scalar("SELECT 1")?, Some("1".to_string()));

    assert_eq!(conn.driver.disconnect(conn.conn), SqlReturn::Success);
    assert_eq!(conn.driver.is_connected(conn.conn), Ok(false));
    assert_eq!(conn.driver.disconnect(conn.conn), SqlReturn::Error);
    assert_eq!(conn.states(conn.conn), vec!["08003"]);
    Ok(())
}

/// Test that connecting twice on one handle is rejected
#[test]
fn test_connection_in_use() -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    let code = conn
        .driver
        .connect(conn.conn, &loopback_connection_string(":memory:"));
    assert_eq!(code, SqlReturn::Error);
    assert_eq!(conn.states(conn.conn), vec!["08002"]);
    Ok(())
}

/// Test that unreachable servers and unknown drivers fail with 08001
#[rstest]
#[case::remote_server("Driver={Loopback};Server=db.example.com;Database=:memory:")]
#[case::unknown_driver("Driver={No Such Driver};Server=localhost")]
fn test_connect_failure_is_08001(#[case] connection_string: &str) -> Result<()> {
    init_tracing();
    let driver = tdsodbc_drivers::driver();
    let env = driver
        .alloc_environment()
        .map_err(|code| anyhow::anyhow!("alloc_environment returned {code:?}"))?;
    let conn = driver
        .alloc_connection(env)
        .map_err(|code| anyhow::anyhow!("alloc_connection returned {code:?}"))?;

    assert_eq!(driver.connect(conn, connection_string), SqlReturn::Error);
    let record = driver
        .diag_record(conn, 1)
        .map_err(|code| anyhow::anyhow!("no diagnostic record: {code:?}"))?;
    assert_eq!(record.state.as_str(), "08001");
    assert_eq!(driver.is_connected(conn), Ok(false));
    Ok(())
}

/// Test that rejected credentials fail with 28000
#[test]
fn test_login_failure_is_28000() -> Result<()> {
    init_tracing();
    let driver = Driver::with_transport(Arc::new(LoopbackTransport::with_login("app", "secret")));
    let env = driver
        .alloc_environment()
        .map_err(|code| anyhow::anyhow!("alloc_environment returned {code:?}"))?;
    let conn = driver
        .alloc_connection(env)
        .map_err(|code| anyhow::anyhow!("alloc_connection returned {code:?}"))?;

    let code = driver.connect(conn, "Server=localhost;Database=:memory:;UID=app;PWD=wrong");
    assert_eq!(code, SqlReturn::Error);
    let record = driver
        .diag_record(conn, 1)
        .map_err(|code| anyhow::anyhow!("no diagnostic record: {code:?}"))?;
    assert_eq!(record.state.as_str(), "28000");

    let code = driver.connect(conn, "Server=localhost;Database=:memory:;UID=app;PWD=secret");
    assert_eq!(code, SqlReturn::Success);
    Ok(())
}

/// Test that freeing the environment invalidates everything beneath it
#[test]
fn test_free_environment_cascades() -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    let stmt = conn.statement()?;
    assert_eq!(conn.driver.free_environment(conn.env), SqlReturn::Success);

    assert_eq!(conn.driver.is_connected(conn.conn), Err(SqlReturn::InvalidHandle));
    assert_eq!(conn.driver.exec_direct(stmt, "SELECT 1").code(), SqlReturn::InvalidHandle);
    assert_eq!(conn.driver.free_statement(stmt), SqlReturn::InvalidHandle);
    Ok(())
}

/// Test that a freed statement handle is never reused as valid
#[test]
fn test_freed_statement_is_invalid() -> Result<()> {
    let conn = test_connection(TestBackend::Memory)?;
    let stmt = conn.statement()?;
    assert_eq!(conn.driver.free_statement(stmt), SqlReturn::Success);
    let replacement = conn.statement()?;

    assert_ne!(stmt, replacement);
    assert_eq!(conn.driver.fetch(stmt), SqlReturn::InvalidHandle);
    assert_eq!(conn.driver.exec_direct(replacement, "SELECT 1").code(), SqlReturn::Success);
    Ok(())
}

/// Test that environment settings loaded from TOML reach new connections
#[test]
fn test_config_from_toml() -> Result<()> {
    init_tracing();
    let config = DriverConfig::from_toml_str(indoc! {r#"
        autocommit = false
        packet_size = 512
        application_name = "conformance"
    "#})
    .context("failed to parse driver config")?;

    let driver = tdsodbc_drivers::driver();
    let env = driver
        .alloc_environment_with(config)
        .map_err(|code| anyhow::anyhow!("alloc_environment_with returned {code:?}"))?;
    let conn = driver
        .alloc_connection(env)
        .map_err(|code| anyhow::anyhow!("alloc_connection returned {code:?}"))?;
    assert_eq!(
        driver.connect(conn, &loopback_connection_string(":memory:")),
        SqlReturn::Success
    );
    assert_eq!(driver.autocommit(conn), Ok(false));
    Ok(())
}
