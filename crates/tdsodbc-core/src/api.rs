//! The call-level surface: handles in, return codes out, diagnostics per handle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::attr::{AttrValue, ConnectAttr, StmtAttr};
use crate::catalog::{self, CatalogQuery, RowIdentifier};
use crate::config::{ConnectionString, DriverConfig, MIN_PACKET_SIZE};
use crate::connection::{Connection, WireLink};
use crate::descriptor::{
    BoundBuffer, ColumnAttribute, ColumnDesc, ColumnField, DeferredToken, ParamDescription,
    ParameterDescriptor,
};
use crate::diagnostics::{DiagField, DiagRecord, DiagValue, Diagnostics, SqlReturn};
use crate::error::{OdbcError, Result};
use crate::handle::{
    conn_handle, env_handle, stmt_handle, ConnHandle, EnvHandle, Handle, HandleTable, StmtHandle,
};
use crate::info::{self, InfoType, InfoValue, SessionInfo, FUNCTION_BITMAP_WORDS};
use crate::sqltext;
use crate::statement::{NeedData, Statement, StatementState, Step};
use crate::transaction::Completion;
use crate::transport::{SingleTransport, TransportDriver, TransportResolver};
use crate::types::{CType, Indicator, SqlType};

/// Slots per handle kind
const MAX_HANDLES: usize = 1 << 16;

/// How `fetch_scroll` moves the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchOrientation {
    Next,
    Prior,
    First,
    Last,
    Absolute(i64),
    Relative(i64),
}

/// Result of an operation that may suspend for deferred parameter data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Completed(SqlReturn),
    /// Supply data for this parameter with `put_data`/`put_null`, then call `param_data`
    NeedData(NeedData),
}

impl Execution {
    pub fn code(&self) -> SqlReturn {
        match self {
            Execution::Completed(code) => *code,
            Execution::NeedData(_) => SqlReturn::NeedData,
        }
    }

    pub fn need_data(&self) -> Option<NeedData> {
        match self {
            Execution::NeedData(need) => Some(*need),
            Execution::Completed(_) => None,
        }
    }
}

/// What one `get_data` call delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retrieved {
    pub code: SqlReturn,
    /// Length or NULL signal; `None` with `SqlReturn::NoData`
    pub indicator: Option<Indicator>,
}

struct Environment {
    config: DriverConfig,
    connections: Mutex<Vec<ConnHandle>>,
    diagnostics: Mutex<Diagnostics>,
}

struct StatementEntry {
    conn: ConnHandle,
    link: Arc<WireLink>,
    cancel: Arc<AtomicBool>,
    engine: Mutex<Statement>,
    diagnostics: Mutex<Diagnostics>,
}

fn success(diagnostics: &Diagnostics) -> SqlReturn {
    if diagnostics.has_warnings() {
        SqlReturn::SuccessWithInfo
    } else {
        SqlReturn::Success
    }
}

/// Record the outcome of an operation on its handle's diagnostics
fn settle<T>(diagnostics: &mut Diagnostics, result: Result<T>) -> std::result::Result<T, SqlReturn> {
    result.map_err(|error| {
        tracing::debug!(%error, sql_state = %error.sql_state().as_str(), "operation failed");
        diagnostics.push_error(&error);
        SqlReturn::Error
    })
}

fn code_of(result: std::result::Result<SqlReturn, SqlReturn>) -> SqlReturn {
    result.unwrap_or_else(|code| code)
}

fn apply_autocommit(connection: &Connection, on: bool) -> Result<()> {
    let mut state = connection.state.lock();
    if let Some(link) = &state.link {
        link.set_autocommit(on)?;
    }
    state.autocommit = on;
    Ok(())
}

fn apply_connect_attr(connection: &Connection, attr: ConnectAttr, value: &AttrValue) -> Result<()> {
    let fixed_once_connected = |connected: bool| {
        if connected {
            Err(OdbcError::AttributeCannotBeSetNow(format!(
                "{attr:?} cannot change while connected"
            )))
        } else {
            Ok(())
        }
    };
    match attr {
        ConnectAttr::Autocommit => apply_autocommit(connection, value.as_bool(attr)?),
        ConnectAttr::LoginTimeout => {
            connection.state.lock().login_timeout_secs = value.as_uint(attr)?;
            Ok(())
        }
        ConnectAttr::AccessMode => {
            connection.state.lock().read_only = value.as_bool(attr)?;
            Ok(())
        }
        ConnectAttr::PacketSize => {
            let requested = value.as_uint(attr)?;
            let size = usize::try_from(requested)
                .ok()
                .filter(|size| *size >= MIN_PACKET_SIZE)
                .ok_or_else(|| OdbcError::InvalidAttributeValue(format!("packet size {requested}")))?;
            let mut state = connection.state.lock();
            fixed_once_connected(state.link.is_some())?;
            state.packet_size = size;
            Ok(())
        }
        ConnectAttr::CurrentCatalog => {
            let database = value.as_text(attr)?;
            let mut state = connection.state.lock();
            fixed_once_connected(state.link.is_some())?;
            state.catalog = Some(database.to_string());
            Ok(())
        }
        ConnectAttr::ConnectionDead => {
            Err(OdbcError::InvalidAttribute(format!("{attr:?} is read-only")))
        }
    }
}

/// Driver instance owning every handle it hands out
pub struct Driver {
    transports: Arc<dyn TransportResolver>,
    environments: HandleTable<Environment>,
    connections: HandleTable<Connection>,
    statements: HandleTable<StatementEntry>,
}

impl Driver {
    pub fn new(transports: Arc<dyn TransportResolver>) -> Self {
        Self {
            transports,
            environments: HandleTable::new(MAX_HANDLES),
            connections: HandleTable::new(MAX_HANDLES),
            statements: HandleTable::new(MAX_HANDLES),
        }
    }

    /// Driver that connects every connection string through `transport`
    pub fn with_transport(transport: Arc<dyn TransportDriver>) -> Self {
        Self::new(Arc::new(SingleTransport(transport)))
    }

    // Handles

    pub fn alloc_environment(&self) -> std::result::Result<EnvHandle, SqlReturn> {
        self.alloc_environment_with(DriverConfig::default())
    }

    /// Environment whose connections start from `config`
    pub fn alloc_environment_with(&self, config: DriverConfig) -> std::result::Result<EnvHandle, SqlReturn> {
        let diagnostics = Diagnostics::with_limit(config.max_diag_records);
        let env = Environment {
            config,
            connections: Mutex::new(Vec::new()),
            diagnostics: Mutex::new(diagnostics),
        };
        let id = self.environments.insert(env).ok_or(SqlReturn::Error)?;
        tracing::debug!(handle = ?id, "environment allocated");
        Ok(env_handle(id))
    }

    pub fn alloc_connection(&self, env: EnvHandle) -> std::result::Result<ConnHandle, SqlReturn> {
        let environment = self.environments.get(env.id()).ok_or(SqlReturn::InvalidHandle)?;
        let mut diagnostics = environment.diagnostics.lock();
        diagnostics.clear();
        // Registered under the list lock so a concurrent free sees the child.
        let mut registered = environment.connections.lock();
        if self.environments.get(env.id()).is_none() {
            return Err(SqlReturn::InvalidHandle);
        }
        let connection = Connection::new(env, environment.config.clone());
        let id = self
            .connections
            .insert(connection)
            .ok_or_else(|| OdbcError::ResourceExhausted("connection handles".to_string()));
        let id = settle(&mut diagnostics, id)?;
        let handle = conn_handle(id);
        registered.push(handle);
        tracing::debug!(handle = ?id, "connection allocated");
        Ok(handle)
    }

    pub fn alloc_statement(&self, conn: ConnHandle) -> std::result::Result<StmtHandle, SqlReturn> {
        let connection = self.connections.get(conn.id()).ok_or(SqlReturn::InvalidHandle)?;
        let mut diagnostics = connection.diagnostics.lock();
        diagnostics.clear();
        // A disconnect or free takes the link under this lock, so the new
        // statement is either refused or listed for it to release.
        let mut state = connection.state.lock();
        let link = state.link.clone().ok_or(OdbcError::NotConnected);
        let link = settle(&mut diagnostics, link)?;
        let cancel = Arc::new(AtomicBool::new(false));
        let entry = StatementEntry {
            conn,
            link: Arc::clone(&link),
            cancel: Arc::clone(&cancel),
            engine: Mutex::new(Statement::new(link, cancel)),
            diagnostics: Mutex::new(Diagnostics::with_limit(connection.config.max_diag_records)),
        };
        let id = self
            .statements
            .insert(entry)
            .ok_or_else(|| OdbcError::ResourceExhausted("statement handles".to_string()));
        let handle = stmt_handle(settle(&mut diagnostics, id)?);
        state.statements.push(handle);
        tracing::debug!(handle = ?handle.id(), "statement allocated");
        Ok(handle)
    }

    pub fn free_statement(&self, stmt: StmtHandle) -> SqlReturn {
        let Some(entry) = self.statements.remove(stmt.id()) else {
            return SqlReturn::InvalidHandle;
        };
        entry.engine.lock().close_cursor();
        if let Some(connection) = self.connections.get(entry.conn.id()) {
            connection.state.lock().statements.retain(|s| *s != stmt);
        }
        tracing::debug!(handle = ?stmt.id(), "statement freed");
        SqlReturn::Success
    }

    /// Free a connection, its statements, and close its session if open
    pub fn free_connection(&self, conn: ConnHandle) -> SqlReturn {
        let Some(connection) = self.connections.remove(conn.id()) else {
            return SqlReturn::InvalidHandle;
        };
        let (statements, link) = {
            let mut state = connection.state.lock();
            state.session = None;
            (std::mem::take(&mut state.statements), state.link.take())
        };
        for stmt in statements {
            self.statements.remove(stmt.id());
        }
        if let Some(link) = link {
            link.close();
        }
        if let Some(environment) = self.environments.get(connection.env.id()) {
            environment.connections.lock().retain(|c| *c != conn);
        }
        tracing::debug!(handle = ?conn.id(), "connection freed");
        SqlReturn::Success
    }

    pub fn free_environment(&self, env: EnvHandle) -> SqlReturn {
        let Some(environment) = self.environments.remove(env.id()) else {
            return SqlReturn::InvalidHandle;
        };
        let connections = std::mem::take(&mut *environment.connections.lock());
        for conn in connections {
            self.free_connection(conn);
        }
        tracing::debug!(handle = ?env.id(), "environment freed");
        SqlReturn::Success
    }

    // Connections

    #[tracing::instrument(skip(self, connection_string))]
    pub fn connect(&self, conn: ConnHandle, connection_string: &str) -> SqlReturn {
        let Some(connection) = self.connections.get(conn.id()) else {
            return SqlReturn::InvalidHandle;
        };
        let mut diagnostics = connection.diagnostics.lock();
        diagnostics.clear();
        let result = self.open_link(&connection, connection_string);
        code_of(settle(&mut diagnostics, result).map(|()| success(&diagnostics)))
    }

    fn open_link(&self, connection: &Connection, connection_string: &str) -> Result<()> {
        let mut state = connection.state.lock();
        if state.link.as_ref().is_some_and(|link| !link.is_dead()) {
            return Err(OdbcError::AlreadyConnected);
        }
        let mut target = ConnectionString::parse(connection_string)?;
        if let Some(database) = &state.catalog {
            target = target.with_database(database);
        }
        let transport = self.transports.resolve(target.driver()).ok_or_else(|| {
            OdbcError::ConnectFailed(format!(
                "no transport registered for driver '{}'",
                target.driver().unwrap_or_default()
            ))
        })?;
        let config = DriverConfig {
            login_timeout_secs: state.login_timeout_secs,
            packet_size: state.packet_size,
            ..connection.config.clone()
        };
        let session = transport.connect(&target, &config)?;
        let (host, port) = target.server();
        tracing::info!(
            transport = transport.name(),
            host = %host,
            port,
            database = %target.database(),
            "connected"
        );
        state.link = Some(Arc::new(WireLink::new(session, state.autocommit)));
        state.session = Some(SessionInfo {
            data_source: target.get("dsn").unwrap_or_default().to_string(),
            server: host,
            database: target.database(),
            user: target.user().unwrap_or_default().to_string(),
            dbms_name: transport.dbms_name(),
            dbms_version: transport.dbms_version(),
        });
        Ok(())
    }

    /// Close the session and free the connection's statements; the handle stays allocated
    pub fn disconnect(&self, conn: ConnHandle) -> SqlReturn {
        let Some(connection) = self.connections.get(conn.id()) else {
            return SqlReturn::InvalidHandle;
        };
        let mut diagnostics = connection.diagnostics.lock();
        diagnostics.clear();
        let (statements, link) = {
            let mut state = connection.state.lock();
            state.session = None;
            (std::mem::take(&mut state.statements), state.link.take())
        };
        let Some(link) = link else {
            return code_of(settle(&mut diagnostics, Err(OdbcError::NotConnected)));
        };
        for stmt in statements {
            self.statements.remove(stmt.id());
        }
        link.close();
        tracing::info!(handle = ?conn.id(), "disconnected");
        SqlReturn::Success
    }

    /// Connected and the link has not failed
    pub fn is_connected(&self, conn: ConnHandle) -> std::result::Result<bool, SqlReturn> {
        let connection = self.connections.get(conn.id()).ok_or(SqlReturn::InvalidHandle)?;
        let state = connection.state.lock();
        Ok(state.link.as_ref().is_some_and(|link| !link.is_dead()))
    }

    pub fn get_connect_attr(&self, conn: ConnHandle, attr: ConnectAttr) -> std::result::Result<AttrValue, SqlReturn> {
        let connection = self.connections.get(conn.id()).ok_or(SqlReturn::InvalidHandle)?;
        connection.diagnostics.lock().clear();
        let state = connection.state.lock();
        Ok(match attr {
            ConnectAttr::Autocommit => AttrValue::Bool(
                state
                    .link
                    .as_ref()
                    .map_or(state.autocommit, |link| link.autocommit()),
            ),
            ConnectAttr::LoginTimeout => AttrValue::UInt(state.login_timeout_secs),
            ConnectAttr::PacketSize => AttrValue::UInt(state.packet_size as u64),
            ConnectAttr::AccessMode => AttrValue::Bool(state.read_only),
            ConnectAttr::CurrentCatalog => AttrValue::Text(match (&state.session, &state.catalog) {
                (Some(session), _) => session.database.clone(),
                (None, Some(database)) => database.clone(),
                (None, None) => String::new(),
            }),
            ConnectAttr::ConnectionDead => {
                AttrValue::Bool(state.link.as_ref().is_none_or(|link| link.is_dead()))
            }
        })
    }

    /// Packet size and current catalog are fixed once connected
    pub fn set_connect_attr(&self, conn: ConnHandle, attr: ConnectAttr, value: AttrValue) -> SqlReturn {
        let Some(connection) = self.connections.get(conn.id()) else {
            return SqlReturn::InvalidHandle;
        };
        let mut diagnostics = connection.diagnostics.lock();
        diagnostics.clear();
        let result = apply_connect_attr(&connection, attr, &value);
        code_of(settle(&mut diagnostics, result).map(|()| success(&diagnostics)))
    }

    /// Driver or data-source fact; data-source facts need an open connection
    pub fn get_info(&self, conn: ConnHandle, info: InfoType) -> std::result::Result<InfoValue, SqlReturn> {
        let connection = self.connections.get(conn.id()).ok_or(SqlReturn::InvalidHandle)?;
        let mut diagnostics = connection.diagnostics.lock();
        diagnostics.clear();
        let value = {
            let state = connection.state.lock();
            info::info_value(info, state.session.as_ref(), state.read_only)
        };
        settle(&mut diagnostics, value)
    }

    /// Whether the function with API code `function` is implemented
    pub fn get_functions(&self, conn: ConnHandle, function: u16) -> std::result::Result<bool, SqlReturn> {
        let connection = self.connections.get(conn.id()).ok_or(SqlReturn::InvalidHandle)?;
        connection.diagnostics.lock().clear();
        Ok(info::is_function_supported(function))
    }

    /// Every implemented function, one bit per API code
    pub fn supported_functions(&self, conn: ConnHandle) -> std::result::Result<[u16; FUNCTION_BITMAP_WORDS], SqlReturn> {
        let connection = self.connections.get(conn.id()).ok_or(SqlReturn::InvalidHandle)?;
        connection.diagnostics.lock().clear();
        Ok(info::function_bitmap())
    }

    /// `text` as it would be sent, with escape clauses rewritten
    pub fn native_sql(&self, conn: ConnHandle, text: &str) -> std::result::Result<String, SqlReturn> {
        let connection = self.connections.get(conn.id()).ok_or(SqlReturn::InvalidHandle)?;
        let mut diagnostics = connection.diagnostics.lock();
        diagnostics.clear();
        settle(&mut diagnostics, sqltext::native_sql(text))
    }

    // Statements

    fn with_statement<T>(
        &self,
        stmt: StmtHandle,
        op: impl FnOnce(&mut Statement, &mut Diagnostics) -> Result<T>,
    ) -> std::result::Result<(T, SqlReturn), SqlReturn> {
        let entry = self.statements.get(stmt.id()).ok_or(SqlReturn::InvalidHandle)?;
        let mut engine = entry.engine.lock();
        let mut diagnostics = entry.diagnostics.lock();
        diagnostics.clear();
        let result = op(&mut *engine, &mut *diagnostics);
        engine.discard_late_cancel();
        let value = settle(&mut diagnostics, result)?;
        Ok((value, success(&diagnostics)))
    }

    fn run_statement(
        &self,
        stmt: StmtHandle,
        op: impl FnOnce(&mut Statement, &mut Diagnostics) -> Result<()>,
    ) -> SqlReturn {
        code_of(self.with_statement(stmt, op).map(|((), code)| code))
    }

    fn step(
        &self,
        stmt: StmtHandle,
        op: impl FnOnce(&mut Statement, &mut Diagnostics) -> Result<Step>,
    ) -> Execution {
        match self.with_statement(stmt, op) {
            Ok((Step::NeedData(need), _)) => Execution::NeedData(need),
            Ok((Step::Done, code)) => Execution::Completed(code),
            Err(code) => Execution::Completed(code),
        }
    }

    pub fn prepare(&self, stmt: StmtHandle, text: &str) -> SqlReturn {
        self.run_statement(stmt, |engine, diag| engine.prepare(text, diag))
    }

    pub fn exec_direct(&self, stmt: StmtHandle, text: &str) -> Execution {
        self.step(stmt, |engine, diag| engine.exec_direct(text, diag))
    }

    pub fn execute(&self, stmt: StmtHandle) -> Execution {
        self.step(stmt, |engine, diag| engine.execute(diag))
    }

    /// Finish the current deferred parameter and move to the next, or run
    /// the statement once every deferred parameter has data
    pub fn param_data(&self, stmt: StmtHandle) -> Execution {
        self.step(stmt, |engine, diag| engine.param_data(diag))
    }

    /// Append a chunk to the pending deferred parameter
    pub fn put_data(&self, stmt: StmtHandle, token: DeferredToken, chunk: &[u8]) -> SqlReturn {
        self.run_statement(stmt, |engine, _| engine.put_data(token, chunk))
    }

    pub fn put_null(&self, stmt: StmtHandle, token: DeferredToken) -> SqlReturn {
        self.run_statement(stmt, |engine, _| engine.put_null(token))
    }

    pub fn bind_parameter(&self, stmt: StmtHandle, param: ParameterDescriptor) -> SqlReturn {
        self.run_statement(stmt, |engine, _| engine.bind_parameter(param))
    }

    pub fn reset_params(&self, stmt: StmtHandle) -> SqlReturn {
        self.run_statement(stmt, |engine, _| engine.reset_params())
    }

    pub fn num_params(&self, stmt: StmtHandle) -> std::result::Result<u16, SqlReturn> {
        self.with_statement(stmt, |engine, _| engine.num_params())
            .map(|(count, _)| count)
    }

    pub fn describe_param(&self, stmt: StmtHandle, ordinal: u16) -> std::result::Result<ParamDescription, SqlReturn> {
        self.with_statement(stmt, |engine, _| engine.describe_param(ordinal))
            .map(|(description, _)| description)
    }

    /// `NoData` once the row set is exhausted
    pub fn fetch(&self, stmt: StmtHandle) -> SqlReturn {
        match self.with_statement(stmt, |engine, diag| engine.fetch(diag)) {
            Ok((true, code)) => code,
            Ok((false, _)) => SqlReturn::NoData,
            Err(code) => code,
        }
    }

    /// Copy (part of) a column of the current row into `buf`
    pub fn get_data(&self, stmt: StmtHandle, column: u16, target: CType, buf: &mut [u8]) -> Retrieved {
        match self.with_statement(stmt, |engine, diag| engine.get_data(column, target, buf, diag)) {
            Ok((Some(indicator), code)) => Retrieved {
                code,
                indicator: Some(indicator),
            },
            Ok((None, _)) => Retrieved {
                code: SqlReturn::NoData,
                indicator: None,
            },
            Err(code) => Retrieved {
                code,
                indicator: None,
            },
        }
    }

    /// Bind `buffer` to a result column; it is filled on every fetch
    pub fn bind_col(&self, stmt: StmtHandle, column: u16, target: CType, buffer: BoundBuffer) -> SqlReturn {
        self.run_statement(stmt, |engine, _| engine.bind_col(column, target, buffer))
    }

    pub fn unbind_cols(&self, stmt: StmtHandle) -> SqlReturn {
        self.run_statement(stmt, |engine, _| {
            engine.unbind_cols();
            Ok(())
        })
    }

    pub fn num_result_cols(&self, stmt: StmtHandle) -> std::result::Result<u16, SqlReturn> {
        self.with_statement(stmt, |engine, _| engine.num_result_cols())
            .map(|(count, _)| count)
    }

    pub fn describe_col(&self, stmt: StmtHandle, column: u16) -> std::result::Result<ColumnDesc, SqlReturn> {
        self.with_statement(stmt, |engine, _| engine.describe_col(column))
            .map(|(desc, _)| desc)
    }

    /// Rows affected by the last statement; -1 when unknown
    pub fn row_count(&self, stmt: StmtHandle) -> std::result::Result<i64, SqlReturn> {
        self.with_statement(stmt, |engine, _| engine.row_count())
            .map(|(count, _)| count)
    }

    /// `NoData` when the response has no further results
    pub fn more_results(&self, stmt: StmtHandle) -> SqlReturn {
        match self.with_statement(stmt, |engine, diag| engine.more_results(diag)) {
            Ok((true, code)) => code,
            Ok((false, _)) => SqlReturn::NoData,
            Err(code) => code,
        }
    }

    pub fn close_cursor(&self, stmt: StmtHandle) -> SqlReturn {
        self.run_statement(stmt, |engine, _| {
            engine.close_cursor();
            Ok(())
        })
    }

    /// Only `FetchOrientation::Next` is available on a forward-only cursor
    pub fn fetch_scroll(&self, stmt: StmtHandle, orientation: FetchOrientation) -> SqlReturn {
        match orientation {
            FetchOrientation::Next => self.fetch(stmt),
            other => self.run_statement(stmt, |_, _| {
                Err(OdbcError::FetchTypeOutOfRange(format!(
                    "{other:?} on a forward-only cursor"
                )))
            }),
        }
    }

    pub fn col_attribute(
        &self,
        stmt: StmtHandle,
        column: u16,
        field: ColumnField,
    ) -> std::result::Result<ColumnAttribute, SqlReturn> {
        self.with_statement(stmt, |engine, _| engine.col_attribute(column, field))
            .map(|(value, _)| value)
    }

    pub fn get_stmt_attr(&self, stmt: StmtHandle, attr: StmtAttr) -> std::result::Result<AttrValue, SqlReturn> {
        self.with_statement(stmt, |engine, _| Ok(engine.attr(attr)))
            .map(|(value, _)| value)
    }

    /// Unsupported cursor settings are replaced, with an 01S02 warning
    pub fn set_stmt_attr(&self, stmt: StmtHandle, attr: StmtAttr, value: AttrValue) -> SqlReturn {
        self.run_statement(stmt, |engine, diag| engine.set_attr(attr, &value, diag))
    }

    pub fn statement_state(&self, stmt: StmtHandle) -> std::result::Result<StatementState, SqlReturn> {
        let entry = self.statements.get(stmt.id()).ok_or(SqlReturn::InvalidHandle)?;
        let state = entry.engine.lock().state();
        Ok(state)
    }

    /// Cancel the statement's current operation. Safe to call from another
    /// thread while an execute or fetch is in flight; the interrupted call
    /// fails with HY008 and leaves the statement prepared. A statement doing
    /// nothing is left as it is.
    pub fn cancel(&self, stmt: StmtHandle) -> SqlReturn {
        let Some(entry) = self.statements.get(stmt.id()) else {
            return SqlReturn::InvalidHandle;
        };
        entry.cancel.store(true, Ordering::Release);
        match entry.engine.try_lock() {
            Some(mut engine) => {
                if engine.cancel_pending() {
                    let mut diagnostics = entry.diagnostics.lock();
                    diagnostics.clear();
                    diagnostics.push_error(&OdbcError::Cancelled);
                } else {
                    entry.cancel.store(false, Ordering::Release);
                }
            }
            None => {
                tracing::warn!(handle = ?stmt.id(), "canceling in-flight request");
                entry.link.cancel();
            }
        }
        SqlReturn::Success
    }

    // Transactions

    pub fn set_autocommit(&self, conn: ConnHandle, on: bool) -> SqlReturn {
        let Some(connection) = self.connections.get(conn.id()) else {
            return SqlReturn::InvalidHandle;
        };
        let mut diagnostics = connection.diagnostics.lock();
        diagnostics.clear();
        let result = apply_autocommit(&connection, on);
        code_of(settle(&mut diagnostics, result).map(|()| success(&diagnostics)))
    }

    pub fn autocommit(&self, conn: ConnHandle) -> std::result::Result<bool, SqlReturn> {
        let connection = self.connections.get(conn.id()).ok_or(SqlReturn::InvalidHandle)?;
        let state = connection.state.lock();
        Ok(state
            .link
            .as_ref()
            .map_or(state.autocommit, |link| link.autocommit()))
    }

    /// Commit or roll back on one connection, or on every connected
    /// connection of an environment
    pub fn end_transaction(&self, handle: impl Into<Handle>, completion: Completion) -> SqlReturn {
        match handle.into() {
            Handle::Connection(conn) => self.end_connection_transaction(conn, completion),
            Handle::Environment(env) => {
                let Some(environment) = self.environments.get(env.id()) else {
                    return SqlReturn::InvalidHandle;
                };
                let mut diagnostics = environment.diagnostics.lock();
                diagnostics.clear();
                let connections = environment.connections.lock().clone();
                let mut code = SqlReturn::Success;
                for conn in connections {
                    let connected = self.is_connected(conn).unwrap_or(false);
                    if connected && self.end_connection_transaction(conn, completion) == SqlReturn::Error {
                        code = SqlReturn::Error;
                    }
                }
                if code == SqlReturn::Error {
                    diagnostics.push_error(&OdbcError::General(format!(
                        "{completion:?} failed on at least one connection"
                    )));
                }
                code
            }
            Handle::Statement(_) => SqlReturn::InvalidHandle,
        }
    }

    fn end_connection_transaction(&self, conn: ConnHandle, completion: Completion) -> SqlReturn {
        let Some(connection) = self.connections.get(conn.id()) else {
            return SqlReturn::InvalidHandle;
        };
        let mut diagnostics = connection.diagnostics.lock();
        diagnostics.clear();
        let result = connection
            .link()
            .and_then(|link| link.end_transaction(completion));
        code_of(settle(&mut diagnostics, result).map(|()| success(&diagnostics)))
    }

    // Diagnostics

    /// Records left by the last operation on `handle`
    pub fn diag_records(&self, handle: impl Into<Handle>) -> std::result::Result<Vec<DiagRecord>, SqlReturn> {
        let records = match handle.into() {
            Handle::Environment(env) => {
                let environment = self.environments.get(env.id()).ok_or(SqlReturn::InvalidHandle)?;
                environment.diagnostics.lock().records().to_vec()
            }
            Handle::Connection(conn) => {
                let connection = self.connections.get(conn.id()).ok_or(SqlReturn::InvalidHandle)?;
                connection.diagnostics.lock().records().to_vec()
            }
            Handle::Statement(stmt) => {
                let entry = self.statements.get(stmt.id()).ok_or(SqlReturn::InvalidHandle)?;
                entry.diagnostics.lock().records().to_vec()
            }
        };
        Ok(records)
    }

    /// Record `number` (1-based); `NoData` past the last record
    pub fn diag_record(&self, handle: impl Into<Handle>, number: usize) -> std::result::Result<DiagRecord, SqlReturn> {
        let records = self.diag_records(handle)?;
        number
            .checked_sub(1)
            .and_then(|index| records.get(index).cloned())
            .ok_or(SqlReturn::NoData)
    }

    /// One field of the diagnostics left on `handle`. Header fields ignore
    /// `record`; record fields are numbered from 1. Reading does not disturb
    /// the records.
    pub fn diag_field(
        &self,
        handle: impl Into<Handle>,
        record: usize,
        field: DiagField,
    ) -> std::result::Result<DiagValue, SqlReturn> {
        let handle = handle.into();
        match field {
            DiagField::Number => {
                let count = self.diag_records(handle)?.len();
                return Ok(DiagValue::Integer(count as i64));
            }
            DiagField::RowCount => {
                let Handle::Statement(stmt) = handle else {
                    return Err(SqlReturn::Error);
                };
                let entry = self.statements.get(stmt.id()).ok_or(SqlReturn::InvalidHandle)?;
                let count = entry.engine.lock().row_count().unwrap_or(-1);
                return Ok(DiagValue::Integer(count));
            }
            _ => {}
        }
        if record == 0 {
            return Err(SqlReturn::Error);
        }
        let diag = self.diag_record(handle, record)?;
        if field == DiagField::ServerName {
            return Ok(DiagValue::Text(self.server_name(handle)));
        }
        diag.field(field).ok_or(SqlReturn::Error)
    }

    fn server_name(&self, handle: Handle) -> String {
        let conn = match handle {
            Handle::Connection(conn) => conn,
            Handle::Statement(stmt) => match self.statements.get(stmt.id()) {
                Some(entry) => entry.conn,
                None => return String::new(),
            },
            Handle::Environment(_) => return String::new(),
        };
        self.connections
            .get(conn.id())
            .and_then(|connection| connection.state.lock().session.as_ref().map(|s| s.server.clone()))
            .unwrap_or_default()
    }

    // Catalog

    fn catalog(&self, stmt: StmtHandle, query: CatalogQuery) -> SqlReturn {
        self.run_statement(stmt, |engine, diag| {
            engine.exec_internal(&query.text, &query.args, diag)
        })
    }

    /// Tables matching the schema and name patterns (`%` and `_` wildcards)
    pub fn tables(
        &self,
        stmt: StmtHandle,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> SqlReturn {
        self.catalog(stmt, catalog::tables(schema, table, table_type))
    }

    pub fn columns(
        &self,
        stmt: StmtHandle,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> SqlReturn {
        self.catalog(stmt, catalog::columns(schema, table, column))
    }

    pub fn primary_keys(&self, stmt: StmtHandle, schema: Option<&str>, table: &str) -> SqlReturn {
        self.catalog(stmt, catalog::primary_keys(schema, table))
    }

    /// Foreign keys pointing at `pk_table`, declared on `fk_table`, or both
    pub fn foreign_keys(
        &self,
        stmt: StmtHandle,
        pk_schema: Option<&str>,
        pk_table: Option<&str>,
        fk_schema: Option<&str>,
        fk_table: Option<&str>,
    ) -> SqlReturn {
        self.run_statement(stmt, |engine, diag| {
            let query = catalog::foreign_keys(pk_schema, pk_table, fk_schema, fk_table)?;
            engine.exec_internal(&query.text, &query.args, diag)
        })
    }

    pub fn statistics(&self, stmt: StmtHandle, schema: Option<&str>, table: &str, unique_only: bool) -> SqlReturn {
        self.catalog(stmt, catalog::statistics(schema, table, unique_only))
    }

    pub fn special_columns(
        &self,
        stmt: StmtHandle,
        kind: RowIdentifier,
        schema: Option<&str>,
        table: &str,
    ) -> SqlReturn {
        self.catalog(stmt, catalog::special_columns(kind, schema, table))
    }

    pub fn procedures(&self, stmt: StmtHandle, schema: Option<&str>, procedure: Option<&str>) -> SqlReturn {
        self.catalog(stmt, catalog::procedures(schema, procedure))
    }

    /// Supported types, or only those reporting as `sql_type`
    pub fn type_info(&self, stmt: StmtHandle, sql_type: Option<SqlType>) -> SqlReturn {
        self.run_statement(stmt, |engine, diag| {
            let (columns, rows) = catalog::type_info(sql_type);
            engine.load_rows(columns, rows, diag)
        })
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
