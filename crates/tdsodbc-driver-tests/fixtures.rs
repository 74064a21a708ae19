//! Shared fixtures for the conformance suite.
//!
//! Each test asks for a [`TestConnection`] on one [`TestBackend`]; the
//! connection owns its driver, environment and connection handles and frees
//! them when dropped. File-backed databases live in a temporary directory
//! removed with the connection.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tdsodbc_driver_tests::fixtures::{TestBackend, test_connection};
//! use rstest::rstest;
//!
//! #[rstest]
//! #[case::memory(TestBackend::Memory)]
//! #[case::file(TestBackend::File)]
//! fn test_select_one(#[case] backend: TestBackend) -> anyhow::Result<()> {
//!     let conn = test_connection(backend)?;
//!     assert_eq!(conn.query("SELECT 1")?, vec![vec![Some("1".to_string())]]);
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result, bail};
use once_cell::sync::Lazy;
use tdsodbc_core::{CType, ConnHandle, Driver, EnvHandle, Handle, Indicator, SqlReturn, StmtHandle};
use tempfile::TempDir;

/// Buffer size used when reading values as text
const TEXT_BUFFER: usize = 4096;

/// Where the loopback database of a test lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestBackend {
    /// Private in-memory database
    Memory,
    /// SQLite file in a temporary directory
    File,
}

impl TestBackend {
    /// Get the backend name as a string
    pub fn name(&self) -> &'static str {
        match self {
            TestBackend::Memory => "memory",
            TestBackend::File => "file",
        }
    }
}

static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

/// Install the test subscriber once per process
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// An open connection plus the handles owning it
pub struct TestConnection {
    /// Driver the handles belong to
    pub driver: Driver,
    /// Environment handle
    pub env: EnvHandle,
    /// Connected connection handle
    pub conn: ConnHandle,
    _dir: Option<TempDir>,
}

impl std::fmt::Debug for TestConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestConnection")
            .field("env", &self.env)
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

/// Connection string reaching `database` through the loopback transport
pub fn loopback_connection_string(database: &str) -> String {
    format!("Driver={{Loopback}};Server=localhost;Database={database}")
}

/// Connect a fresh driver to an empty database on `backend`
pub fn test_connection(backend: TestBackend) -> Result<TestConnection> {
    init_tracing();
    let (database, dir) = match backend {
        TestBackend::Memory => (":memory:".to_string(), None),
        TestBackend::File => {
            let dir = tempfile::tempdir().context("failed to create database directory")?;
            let path = dir.path().join("conformance.db");
            (path.to_string_lossy().into_owned(), Some(dir))
        }
    };

    let driver = tdsodbc_drivers::driver();
    let env = driver
        .alloc_environment()
        .map_err(|code| anyhow::anyhow!("alloc_environment returned {code:?}"))?;
    let conn = driver
        .alloc_connection(env)
        .map_err(|code| anyhow::anyhow!("alloc_connection returned {code:?}"))?;
    let connected = TestConnection {
        driver,
        env,
        conn,
        _dir: dir,
    };
    let code = connected
        .driver
        .connect(conn, &loopback_connection_string(&database));
    connected
        .check(conn, code)
        .with_context(|| format!("failed to connect to {} database", backend.name()))?;
    Ok(connected)
}

impl TestConnection {
    /// SQLSTATEs recorded on `handle` by its last operation
    pub fn states(&self, handle: impl Into<Handle>) -> Vec<String> {
        self.driver
            .diag_records(handle)
            .map(|records| records.iter().map(|r| r.state.as_str().to_string()).collect())
            .unwrap_or_default()
    }

    /// Turn a return code into an error carrying the handle's diagnostics
    pub fn check(&self, handle: impl Into<Handle> + Copy, code: SqlReturn) -> Result<SqlReturn> {
        if code.is_success() || code == SqlReturn::NoData {
            return Ok(code);
        }
        let records = self.driver.diag_records(handle).unwrap_or_default();
        let detail: Vec<String> = records
            .iter()
            .map(|r| format!("{} ({}): {}", r.state.as_str(), r.native_error, r.message))
            .collect();
        bail!("call returned {code:?}: {}", detail.join("; "))
    }

    /// Allocate a statement on the connection
    pub fn statement(&self) -> Result<StmtHandle> {
        self.driver
            .alloc_statement(self.conn)
            .map_err(|code| anyhow::anyhow!("alloc_statement returned {code:?}: {:?}", self.states(self.conn)))
    }

    /// Run `sql` on a new statement and free it
    pub fn execute(&self, sql: &str) -> Result<()> {
        let stmt = self.statement()?;
        let code = self.driver.exec_direct(stmt, sql).code();
        let result = self.check(stmt, code).with_context(|| format!("failed to execute: {sql}"));
        self.driver.free_statement(stmt);
        result.map(|_| ())
    }

    /// Run a batch of statements one by one
    pub fn execute_all(&self, batch: &str) -> Result<()> {
        for sql in batch.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            self.execute(sql)?;
        }
        Ok(())
    }

    /// Value of `column` on the current row as text; `None` for NULL
    pub fn text(&self, stmt: StmtHandle, column: u16) -> Result<Option<String>> {
        let mut buf = vec![0u8; TEXT_BUFFER];
        let got = self.driver.get_data(stmt, column, CType::Char, &mut buf);
        self.check(stmt, got.code)
            .with_context(|| format!("failed to read column {column}"))?;
        match got.indicator {
            Some(Indicator::Null) => Ok(None),
            Some(Indicator::Length(len)) => {
                let len = len.min(TEXT_BUFFER - 1);
                Ok(Some(String::from_utf8_lossy(&buf[..len]).into_owned()))
            }
            other => bail!("unexpected indicator {other:?} for column {column}"),
        }
    }

    /// Every remaining row of the current result set, as text
    pub fn rows(&self, stmt: StmtHandle) -> Result<Vec<Vec<Option<String>>>> {
        let columns = self
            .driver
            .num_result_cols(stmt)
            .map_err(|code| anyhow::anyhow!("num_result_cols returned {code:?}"))?;
        let mut rows = Vec::new();
        while self.check(stmt, self.driver.fetch(stmt))? != SqlReturn::NoData {
            let row = (1..=columns)
                .map(|column| self.text(stmt, column))
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Run a query on a new statement and collect its rows as text
    pub fn query(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let stmt = self.statement()?;
        let code = self.driver.exec_direct(stmt, sql).code();
        self.check(stmt, code).with_context(|| format!("failed to query: {sql}"))?;
        let rows = self.rows(stmt);
        self.driver.free_statement(stmt);
        rows
    }

    /// Single value of a one-row, one-column query
    pub fn scalar(&self, sql: &str) -> Result<Option<String>> {
        let rows = self.query(sql)?;
        match rows.as_slice() {
            [row] if row.len() == 1 => Ok(row[0].clone()),
            _ => bail!("expected one value from {sql}, got {rows:?}"),
        }
    }
}

impl Drop for TestConnection {
    fn drop(&mut self) {
        if self.driver.is_connected(self.conn) == Ok(true) {
            self.driver.disconnect(self.conn);
        }
        self.driver.free_environment(self.env);
    }
}

/// Shorthand for a row of non-NULL text values
pub fn row(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}
