//! Loopback sessions over an embedded SQLite database

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{Connection, InterruptHandle, OpenFlags, params_from_iter};
use tdsodbc_core::sqltext;
use tdsodbc_core::wire::{
    ColumnDef, DoneStatus, EnvChange, ParamDef, Request, Token, WireParam, WireType,
};
use tdsodbc_core::{
    CancelHandle, ConnectionString, DriverConfig, ResponseStream, Result, ServerMessage, Session,
    TransportDriver, TransportError,
};

use crate::dialect::{insert_target, transaction_change, translate};
use crate::error::{LoopbackError, is_interrupt, server_message, termination_notice};
use crate::values;

/// Server names that reach the loopback
const LOCAL_HOSTS: &[&str] = &["", "localhost", "(local)", ".", "loopback", "127.0.0.1"];

/// Parameter values that could not be read
const CONVERSION_FAILED: i32 = 8114;

/// Native number of a `PRINT` message
const PRINT_MESSAGE: i32 = 0;

/// Transport registered as `loopback`.
///
/// Accepts any login unless built with [`LoopbackTransport::with_login`].
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    login: Option<(String, String)>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that only accepts `user` with `password`
    pub fn with_login(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: Some((user.into(), password.into())),
        }
    }

    fn check_login(&self, target: &ConnectionString) -> std::result::Result<(), LoopbackError> {
        let Some((user, password)) = &self.login else {
            return Ok(());
        };
        let given = target.user().unwrap_or_default();
        if given == user.as_str() && target.password().unwrap_or_default() == password.as_str() {
            Ok(())
        } else {
            Err(LoopbackError::LoginFailed(given.to_string()))
        }
    }
}

impl TransportDriver for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn display_name(&self) -> &'static str {
        "Loopback"
    }

    fn dbms_name(&self) -> &'static str {
        "SQLite"
    }

    fn dbms_version(&self) -> &'static str {
        rusqlite::version()
    }

    fn connect(&self, target: &ConnectionString, config: &DriverConfig) -> Result<Box<dyn Session>> {
        let (host, _) = target.server();
        if !LOCAL_HOSTS.iter().any(|local| host.eq_ignore_ascii_case(local)) {
            return Err(LoopbackError::Unreachable(host).into());
        }
        self.check_login(target)?;
        let session = LoopbackSession::open(&target.database(), config.packet_size)?;
        Ok(Box::new(session))
    }
}

/// Where a database name points
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    /// `:memory:`, private to the session
    Private,
    /// In-memory database shared by every session naming it
    Shared(String),
    File(PathBuf),
}

impl Location {
    fn of(database: &str) -> Self {
        if database == ":memory:" {
            Location::Private
        } else if database.contains(['/', '\\', '.']) {
            Location::File(PathBuf::from(database))
        } else {
            Location::Shared(database.to_string())
        }
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            Location::Private => Connection::open_in_memory(),
            Location::Shared(name) => {
                Connection::open_with_flags(format!("file:{name}?mode=memory&cache=shared"), flags)
            }
            Location::File(path) => Connection::open_with_flags(path, flags),
        }
    }
}

/// Interrupts the statement running on the session's connection
struct Interrupter(InterruptHandle);

impl CancelHandle for Interrupter {
    fn cancel(&self) {
        self.0.interrupt();
    }
}

/// A session serving requests from SQLite
pub struct LoopbackSession {
    conn: Option<Connection>,
    catalog: String,
    packet_size: usize,
    interrupter: Arc<Interrupter>,
}

impl std::fmt::Debug for LoopbackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackSession")
            .field("catalog", &self.catalog)
            .field("open", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl LoopbackSession {
    #[tracing::instrument]
    pub fn open(database: &str, packet_size: usize) -> std::result::Result<Self, LoopbackError> {
        let location = Location::of(database);
        let conn = location.open()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        tracing::debug!(?location, "loopback session opened");
        Ok(Self {
            interrupter: Arc::new(Interrupter(conn.get_interrupt_handle())),
            conn: Some(conn),
            catalog: database.to_string(),
            packet_size,
        })
    }

    fn respond(&self, tokens: &[Token]) -> ResponseStream {
        ResponseStream::from_tokens(tokens, self.packet_size)
    }
}

impl Session for LoopbackSession {
    fn send_request(&mut self, request: Bytes) -> std::result::Result<ResponseStream, TransportError> {
        let request = Request::decode(&request).map_err(|e| TransportError::Link(e.to_string()))?;
        let Some(conn) = self.conn.as_ref() else {
            return Err(TransportError::Closed);
        };
        let tokens = match &request {
            Request::Batch { text } => run_batch(conn, &self.catalog, text),
            Request::Execute { text, params } => run_execute(conn, &self.catalog, text, params),
            Request::Prepare { text } => describe(conn, &self.catalog, text),
        };
        Ok(self.respond(&tokens))
    }

    fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        Some(Arc::clone(&self.interrupter) as Arc<dyn CancelHandle>)
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            match conn.close() {
                Ok(()) => tracing::debug!(catalog = %self.catalog, "loopback session closed"),
                Err((_, error)) => tracing::warn!(%error, "failed to close loopback session"),
            }
        }
    }
}

fn failed(message: ServerMessage) -> Vec<Token> {
    tracing::debug!(number = message.number, message = %message.message, "statement failed");
    let notice = termination_notice(&message);
    let mut tokens = vec![Token::Error(message)];
    tokens.extend(notice.map(Token::Info));
    tokens.push(Token::Done(DoneStatus {
        error: true,
        ..DoneStatus::default()
    }));
    tokens
}

/// Tokens for a statement that raised `error`; an interrupted statement ends
/// the response quietly
fn statement_error(error: &rusqlite::Error) -> Vec<Token> {
    if is_interrupt(error) {
        tracing::debug!("statement interrupted");
        return vec![Token::Done(DoneStatus::default())];
    }
    failed(server_message(error))
}

/// Flag every `Done` but the last as followed by another result
fn chain_results(tokens: &mut [Token]) {
    let last = tokens.iter().rposition(|t| matches!(t, Token::Done(_)));
    for (index, token) in tokens.iter_mut().enumerate() {
        if let Token::Done(status) = token {
            status.more = Some(index) != last;
        }
    }
}

#[tracing::instrument(skip(conn, catalog))]
fn run_batch(conn: &Connection, catalog: &str, text: &str) -> Vec<Token> {
    let statements = sqltext::split_statements(text);
    if statements.is_empty() {
        return vec![Token::Done(DoneStatus::default())];
    }
    let mut tokens = Vec::new();
    for sql in statements {
        match run_statement(conn, catalog, sql, &[]) {
            Ok(mut produced) => tokens.append(&mut produced),
            Err(error) => {
                tokens.extend(statement_error(&error));
                break;
            }
        }
    }
    if !matches!(tokens.last(), Some(Token::Done(_))) {
        tokens.push(Token::Done(DoneStatus::default()));
    }
    chain_results(&mut tokens);
    tokens
}

#[tracing::instrument(skip(conn, catalog, params), fields(params = params.len()))]
fn run_execute(conn: &Connection, catalog: &str, text: &str, params: &[WireParam]) -> Vec<Token> {
    let values = match params.iter().map(values::to_sqlite).collect::<Result<Vec<_>>>() {
        Ok(values) => values,
        Err(error) => {
            return failed(ServerMessage {
                number: CONVERSION_FAILED,
                state: 1,
                class: 16,
                message: error.to_string(),
            });
        }
    };
    let mut tokens =
        run_statement(conn, catalog, text, &values).unwrap_or_else(|error| statement_error(&error));
    if !matches!(tokens.last(), Some(Token::Done(_))) {
        tokens.push(Token::Done(DoneStatus::default()));
    }
    tokens
}

fn transaction_statement(change: EnvChange) -> &'static str {
    match change {
        EnvChange::BeginTransaction => "BEGIN",
        EnvChange::CommitTransaction => "COMMIT",
        EnvChange::RollbackTransaction => "ROLLBACK",
    }
}

/// Whether a statement reports the number of rows it changed
fn counts_rows(sql: &str) -> bool {
    matches!(
        sqltext::leading_keyword(sql).as_str(),
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "MERGE"
    )
}

fn run_statement(
    conn: &Connection,
    catalog: &str,
    sql: &str,
    params: &[SqliteValue],
) -> rusqlite::Result<Vec<Token>> {
    if sqltext::leading_keyword(sql) == "PRINT" {
        return print(conn, catalog, sql, params);
    }
    if let Some(change) = transaction_change(sql) {
        conn.execute_batch(transaction_statement(change))?;
        return Ok(vec![Token::EnvChange(change), Token::Done(DoneStatus::default())]);
    }

    let mut stmt = conn.prepare(&translate(sql, catalog))?;
    if stmt.column_count() == 0 {
        stmt.execute(params_from_iter(params))?;
        let row_count = counts_rows(sql).then(|| conn.changes() as u64);
        return Ok(vec![Token::Done(DoneStatus {
            row_count,
            ..DoneStatus::default()
        })]);
    }

    let declared: Vec<Option<WireType>> = stmt
        .columns()
        .iter()
        .map(|column| values::declared_type(column.decl_type()))
        .collect();
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut stored: Vec<Vec<SqliteValue>> = Vec::new();
    let mut rows = stmt.query(params_from_iter(params))?;
    while let Some(row) = rows.next()? {
        let values = (0..names.len())
            .map(|i| row.get::<_, SqliteValue>(i))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        stored.push(values);
    }

    let types: Vec<WireType> = declared
        .into_iter()
        .enumerate()
        .map(|(i, ty)| {
            ty.or_else(|| {
                stored
                    .iter()
                    .find_map(|row| values::inferred_type(ValueRef::from(&row[i])))
            })
            .unwrap_or_else(values::untyped)
        })
        .collect();

    let mut tokens = Vec::with_capacity(stored.len() + 2);
    tokens.push(Token::ColMetadata(
        names
            .into_iter()
            .zip(&types)
            .map(|(name, ty)| ColumnDef {
                name,
                ty: *ty,
                nullable: true,
            })
            .collect(),
    ));
    let row_count = stored.len() as u64;
    for row in stored {
        tokens.push(Token::Row(
            row.iter()
                .zip(&types)
                .map(|(value, ty)| values::to_wire(ValueRef::from(value), ty))
                .collect(),
        ));
    }
    tokens.push(Token::Done(DoneStatus {
        row_count: Some(row_count),
        ..DoneStatus::default()
    }));
    Ok(tokens)
}

/// `PRINT expr` raises the value as an informational message and produces
/// no result of its own
fn print(
    conn: &Connection,
    catalog: &str,
    sql: &str,
    params: &[SqliteValue],
) -> rusqlite::Result<Vec<Token>> {
    let expr = sql.trim_start().get("PRINT".len()..).unwrap_or_default();
    let query = format!("SELECT CAST(({}) AS TEXT)", translate(expr, catalog));
    let text: Option<String> =
        conn.query_row(&query, params_from_iter(params), |row| row.get(0))?;
    Ok(vec![Token::Info(ServerMessage {
        number: PRINT_MESSAGE,
        state: 1,
        class: 0,
        message: text.unwrap_or_default(),
    })])
}

/// Declared type and nullability of each column of `table`, in order
fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<(String, ParamDef)>> {
    let mut stmt = conn.prepare("SELECT name, type, \"notnull\" FROM pragma_table_info(?1)")?;
    let rows = stmt.query_map([table], |row| {
        let name: String = row.get(0)?;
        let declared: String = row.get(1)?;
        let not_null: bool = row.get(2)?;
        Ok((
            name,
            ParamDef {
                ty: values::declared_type(Some(&declared)).unwrap_or_else(values::untyped),
                nullable: !not_null,
            },
        ))
    })?;
    rows.collect()
}

/// Parameter types of an `INSERT ... VALUES (?, ...)` taken from the target
/// columns, or `None` when they cannot be told
fn insert_params(conn: &Connection, sql: &str, markers: usize) -> Option<Vec<ParamDef>> {
    let target = insert_target(sql)?;
    if target.markers != markers {
        return None;
    }
    let columns = table_columns(conn, &target.table).ok()?;
    let params: Vec<ParamDef> = match &target.columns {
        None => columns.into_iter().map(|(_, def)| def).collect(),
        Some(names) => names
            .iter()
            .map(|name| {
                columns
                    .iter()
                    .find(|(column, _)| column.eq_ignore_ascii_case(name))
                    .map(|(_, def)| def.clone())
            })
            .collect::<Option<_>>()?,
    };
    (params.len() == markers).then_some(params)
}

#[tracing::instrument(skip(conn, catalog))]
fn describe(conn: &Connection, catalog: &str, text: &str) -> Vec<Token> {
    let stmt = match conn.prepare(&translate(text, catalog)) {
        Ok(stmt) => stmt,
        Err(error) => return statement_error(&error),
    };

    let mut tokens = Vec::new();
    let markers = stmt.parameter_count();
    if markers == 0 {
        tokens.push(Token::ParamMetadata(Vec::new()));
    } else if let Some(params) = insert_params(conn, text, markers) {
        tokens.push(Token::ParamMetadata(params));
    }

    if stmt.column_count() > 0 {
        tokens.push(Token::ColMetadata(
            stmt.columns()
                .iter()
                .map(|column| ColumnDef {
                    name: column.name().to_string(),
                    ty: values::declared_type(column.decl_type()).unwrap_or_else(values::untyped),
                    nullable: true,
                })
                .collect(),
        ));
    }
    tokens.push(Token::Done(DoneStatus::default()));
    tokens
}
