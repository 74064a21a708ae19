//! SQL Server sessions over tiberius

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use parking_lot::Mutex;
use tdsodbc_core::sqltext;
use tdsodbc_core::wire::{
    ColumnDef, DoneStatus, EnvChange, ParamDef, Request, Token, TypeFamily, WireType,
};
use tdsodbc_core::{
    CancelHandle, ConnectionString, DriverConfig, ResponseStream, Result, Session, TransportDriver,
    TransportError,
};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, QueryItem, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tokio_util::sync::CancellationToken;

use crate::columns::PendingSet;
use crate::error::{Failure, MssqlError};
use crate::params::{SqlParam, rewrite_placeholders};
use crate::runtime::block_on_tokio;

type TdsClient = Client<Compat<TcpStream>>;

/// Parameter type the server could not deduce
const FALLBACK_PARAM_TYPE: &str = "nvarchar(4000)";

/// Server errors meaning `sp_describe_undeclared_parameters` could not
/// deduce a type, as opposed to the statement itself being invalid
const UNDEDUCIBLE_PARAMETERS: std::ops::RangeInclusive<i32> = 11_500..=11_599;

/// Transport registered as `mssql`
#[derive(Debug, Default)]
pub struct MssqlTransport;

impl MssqlTransport {
    pub fn new() -> Self {
        Self
    }
}

impl TransportDriver for MssqlTransport {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn display_name(&self) -> &'static str {
        "ODBC Driver 18 for SQL Server"
    }

    fn default_port(&self) -> Option<u16> {
        Some(1433)
    }

    fn connect(&self, target: &ConnectionString, config: &DriverConfig) -> Result<Box<dyn Session>> {
        let session = MssqlSession::open(Login::new(target, config), config.packet_size)?;
        Ok(Box::new(session))
    }
}

/// What is needed to (re)open the tiberius client
struct Login {
    host: String,
    port: u16,
    database: String,
    user: Option<String>,
    password: Option<String>,
    trust_cert: bool,
    application_name: String,
    timeout: Duration,
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Login {
    fn new(target: &ConnectionString, config: &DriverConfig) -> Self {
        let (host, port) = target.server();
        Self {
            host,
            port,
            database: target.database(),
            user: target.user().map(String::from),
            password: target.password().map(String::from),
            trust_cert: target.trust_server_certificate(),
            application_name: config.application_name.clone(),
            timeout: Duration::from_secs(config.login_timeout_secs),
        }
    }

    fn config(&self) -> std::result::Result<Config, MssqlError> {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.application_name(&self.application_name);
        if self.trust_cert {
            config.trust_cert();
        }
        config.encryption(EncryptionLevel::Required);

        match &self.user {
            Some(user) => {
                config.authentication(AuthMethod::sql_server(
                    user,
                    self.password.as_deref().unwrap_or_default(),
                ));
            }
            None => {
                #[cfg(windows)]
                {
                    config.authentication(AuthMethod::Integrated);
                }
                #[cfg(not(windows))]
                {
                    return Err(MssqlError::AuthenticationFailed(
                        "integrated authentication is only supported on Windows".to_string(),
                    ));
                }
            }
        }
        Ok(config)
    }

    #[tracing::instrument(skip(self), fields(host = %self.host, port = self.port))]
    async fn connect(&self) -> std::result::Result<TdsClient, MssqlError> {
        let config = self.config()?;
        let open = async {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| MssqlError::ConnectionFailed(e.to_string()))?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(MssqlError::from_login)
        };
        let client = if self.timeout.is_zero() {
            open.await?
        } else {
            tokio::time::timeout(self.timeout, open)
                .await
                .map_err(|_| MssqlError::Timeout(self.timeout.as_secs()))??
        };
        tracing::debug!("SQL Server session established");
        Ok(client)
    }
}

/// Interrupts the request in flight by cancelling its token
#[derive(Debug, Default)]
struct Canceller {
    current: Mutex<CancellationToken>,
}

impl Canceller {
    /// Fresh token for the next request
    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.current.lock() = token.clone();
        token
    }
}

impl CancelHandle for Canceller {
    fn cancel(&self) {
        self.current.lock().cancel();
    }
}

/// A SQL Server session.
///
/// tiberius cannot abandon a request midway and keep the connection, so a
/// cancelled request drops the client and the next request logs in again.
pub struct MssqlSession {
    client: Option<TdsClient>,
    login: Login,
    packet_size: usize,
    canceller: Arc<Canceller>,
}

impl std::fmt::Debug for MssqlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlSession")
            .field("login", &self.login)
            .field("open", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

impl MssqlSession {
    fn open(login: Login, packet_size: usize) -> std::result::Result<Self, MssqlError> {
        let client = block_on_tokio(login.connect())??;
        Ok(Self {
            client: Some(client),
            login,
            packet_size,
            canceller: Arc::new(Canceller::default()),
        })
    }

    fn respond(&self, tokens: &[Token]) -> ResponseStream {
        ResponseStream::from_tokens(tokens, self.packet_size)
    }
}

impl Session for MssqlSession {
    fn send_request(&mut self, request: Bytes) -> std::result::Result<ResponseStream, TransportError> {
        let request = Request::decode(&request).map_err(|e| TransportError::Link(e.to_string()))?;
        let token = self.canceller.arm();

        if self.client.is_none() {
            tracing::warn!("reopening SQL Server session after a cancelled request");
            let client = block_on_tokio(self.login.connect())
                .map_err(|e| TransportError::Link(e.to_string()))?
                .map_err(|e| TransportError::Link(e.to_string()))?;
            self.client = Some(client);
        }
        let Some(client) = self.client.as_mut() else {
            return Err(TransportError::Closed);
        };

        let outcome = block_on_tokio(async {
            tokio::select! {
                result = run(client, &request) => Some(result),
                _ = token.cancelled() => None,
            }
        })
        .map_err(|e| TransportError::Link(e.to_string()))?;

        match outcome {
            Some(Ok(tokens)) => Ok(self.respond(&tokens)),
            Some(Err(Failure::Server(message))) => {
                tracing::debug!(number = message.number, message = %message.message, "server error");
                Ok(self.respond(&[
                    Token::Error(message),
                    Token::Done(DoneStatus {
                        error: true,
                        ..DoneStatus::default()
                    }),
                ]))
            }
            Some(Err(Failure::Link(message))) => {
                self.client = None;
                Err(TransportError::Link(message))
            }
            None => {
                tracing::debug!("request cancelled");
                self.client = None;
                Ok(self.respond(&[Token::Done(DoneStatus::default())]))
            }
        }
    }

    fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        Some(Arc::clone(&self.canceller) as Arc<dyn CancelHandle>)
    }

    fn close(&mut self) {
        if let Some(client) = self.client.take() {
            match block_on_tokio(client.close()) {
                Ok(Ok(())) => tracing::debug!("SQL Server session closed"),
                Ok(Err(error)) => tracing::warn!(%error, "failed to close SQL Server session"),
                Err(error) => tracing::warn!(%error, "failed to close SQL Server session"),
            }
        }
    }
}

async fn run(client: &mut TdsClient, request: &Request) -> std::result::Result<Vec<Token>, Failure> {
    match request {
        Request::Batch { text } => run_batch(client, text, &[]).await,
        Request::Execute { text, params } => {
            let params: Vec<SqlParam> = params.iter().map(SqlParam::from).collect();
            run_batch(client, &rewrite_placeholders(text), &params).await
        }
        Request::Prepare { text } => describe(client, text).await,
    }
}

/// Transaction boundary a batch sets, reported back as an environment change
pub(crate) fn transaction_change(sql: &str) -> Option<EnvChange> {
    let upper = sql.trim_start().to_ascii_uppercase();
    match sqltext::leading_keyword(sql).as_str() {
        "BEGIN" if upper.starts_with("BEGIN TRAN") => Some(EnvChange::BeginTransaction),
        "COMMIT" => Some(EnvChange::CommitTransaction),
        "ROLLBACK" => Some(EnvChange::RollbackTransaction),
        _ => None,
    }
}

/// Whether a batch is run for its row counts rather than its rows
fn returns_counts(sql: &str) -> bool {
    matches!(
        sqltext::leading_keyword(sql).as_str(),
        "INSERT"
            | "UPDATE"
            | "DELETE"
            | "MERGE"
            | "CREATE"
            | "ALTER"
            | "DROP"
            | "TRUNCATE"
            | "BEGIN"
            | "COMMIT"
            | "ROLLBACK"
            | "SET"
            | "USE"
            | "GRANT"
            | "REVOKE"
    )
}

#[tracing::instrument(skip(client, params), fields(params = params.len()))]
async fn run_batch(
    client: &mut TdsClient,
    sql: &str,
    params: &[SqlParam],
) -> std::result::Result<Vec<Token>, Failure> {
    let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
    let mut tokens = Vec::new();

    if returns_counts(sql) {
        let result = client.execute(sql, &refs).await?;
        if let Some(change) = transaction_change(sql) {
            tokens.push(Token::EnvChange(change));
        }
        let counts = result.rows_affected();
        if counts.is_empty() {
            tokens.push(Token::Done(DoneStatus::default()));
        }
        for (index, count) in counts.iter().enumerate() {
            tokens.push(Token::Done(DoneStatus {
                more: index + 1 < counts.len(),
                error: false,
                row_count: Some(*count),
            }));
        }
        return Ok(tokens);
    }

    let mut stream = client.query(sql, &refs).await?;
    let mut current: Option<PendingSet> = None;
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                if let Some(set) = current.take() {
                    set.finish(&mut tokens, true);
                }
                current = Some(PendingSet::new(meta.columns()));
            }
            QueryItem::Row(row) => {
                let set = current.get_or_insert_with(|| PendingSet::new(row.columns()));
                set.push(row);
            }
        }
    }
    match current {
        Some(set) => set.finish(&mut tokens, false),
        None => tokens.push(Token::Done(DoneStatus::default())),
    }
    Ok(tokens)
}

/// Describe parameters and result columns without executing
#[tracing::instrument(skip(client, sql))]
async fn describe(client: &mut TdsClient, sql: &str) -> std::result::Result<Vec<Token>, Failure> {
    let tsql = SqlParam::text(&rewrite_placeholders(sql));
    let markers = sqltext::placeholders(sql).len();

    let mut declared: Vec<String> = (1..=markers)
        .map(|n| format!("@P{n} {FALLBACK_PARAM_TYPE}"))
        .collect();
    let mut params = None;
    if markers > 0 {
        match describe_params(client, &tsql, markers).await {
            Ok(types) => {
                declared = types
                    .iter()
                    .zip(1..)
                    .map(|(name, n)| format!("@P{n} {name}"))
                    .collect();
                params = Some(
                    types
                        .iter()
                        .map(|name| ParamDef {
                            ty: WireType::parse(name).unwrap_or_else(fallback_type),
                            nullable: true,
                        })
                        .collect::<Vec<_>>(),
                );
            }
            Err(Failure::Server(message)) if UNDEDUCIBLE_PARAMETERS.contains(&message.number) => {
                tracing::debug!(message = %message.message, "parameter types not deducible");
            }
            Err(failure) => return Err(failure),
        }
    } else {
        params = Some(Vec::new());
    }

    let columns = describe_columns(client, &tsql, &declared.join(", ")).await?;

    let mut tokens = Vec::new();
    if let Some(params) = params {
        tokens.push(Token::ParamMetadata(params));
    }
    if !columns.is_empty() {
        tokens.push(Token::ColMetadata(columns));
    }
    tokens.push(Token::Done(DoneStatus::default()));
    Ok(tokens)
}

fn fallback_type() -> WireType {
    WireType::sized(TypeFamily::NVarChar, 4000)
}

async fn describe_params(
    client: &mut TdsClient,
    tsql: &SqlParam,
    markers: usize,
) -> std::result::Result<Vec<String>, Failure> {
    let rows = client
        .query("EXEC sp_describe_undeclared_parameters @tsql = @P1", &[tsql])
        .await?
        .into_first_result()
        .await?;

    let mut types = vec![FALLBACK_PARAM_TYPE.to_string(); markers];
    for row in &rows {
        let ordinal = row.try_get::<i32, _>("parameter_ordinal")?.unwrap_or(0) as usize;
        let name = row.try_get::<&str, _>("suggested_system_type_name")?;
        if let (Some(slot), Some(name)) = (types.get_mut(ordinal.wrapping_sub(1)), name) {
            *slot = name.to_string();
        }
    }
    Ok(types)
}

async fn describe_columns(
    client: &mut TdsClient,
    tsql: &SqlParam,
    declared: &str,
) -> std::result::Result<Vec<ColumnDef>, Failure> {
    let rows = if declared.is_empty() {
        client
            .query("EXEC sp_describe_first_result_set @tsql = @P1", &[tsql])
            .await?
            .into_first_result()
            .await?
    } else {
        let declared = SqlParam::text(declared);
        client
            .query(
                "EXEC sp_describe_first_result_set @tsql = @P1, @params = @P2",
                &[tsql, &declared],
            )
            .await?
            .into_first_result()
            .await?
    };

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        if row.try_get::<bool, _>("is_hidden")?.unwrap_or(false) {
            continue;
        }
        let type_name = row.try_get::<&str, _>("system_type_name")?.unwrap_or(FALLBACK_PARAM_TYPE);
        columns.push(ColumnDef {
            name: row.try_get::<&str, _>("name")?.unwrap_or_default().to_string(),
            ty: WireType::parse(type_name).unwrap_or_else(fallback_type),
            nullable: row.try_get::<bool, _>("is_nullable")?.unwrap_or(true),
        });
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transaction_batches_report_env_changes() {
        assert_eq!(
            transaction_change("BEGIN TRANSACTION"),
            Some(EnvChange::BeginTransaction)
        );
        assert_eq!(transaction_change("  commit tran"), Some(EnvChange::CommitTransaction));
        assert_eq!(
            transaction_change("ROLLBACK TRANSACTION"),
            Some(EnvChange::RollbackTransaction)
        );
        assert_eq!(transaction_change("BEGIN TRY SELECT 1 END TRY"), None);
        assert_eq!(transaction_change("SELECT 1"), None);
    }

    #[test]
    fn test_dml_runs_for_counts() {
        assert!(returns_counts("insert into t values (1)"));
        assert!(returns_counts("  UPDATE t SET a = 1"));
        assert!(!returns_counts("SELECT * FROM t"));
        assert!(!returns_counts("WITH x AS (SELECT 1 AS a) SELECT a FROM x"));
        assert!(!returns_counts("EXEC sp_who"));
    }

    #[test]
    fn test_login_reads_connection_string() {
        let target = ConnectionString::parse(
            "Driver={ODBC Driver 18 for SQL Server};Server=tcp:db,14330;Database=sales;UID=app;PWD=secret",
        )
        .unwrap();
        let login = Login::new(&target, &DriverConfig::default());
        assert_eq!(login.host, "db");
        assert_eq!(login.port, 14330);
        assert_eq!(login.database, "sales");
        assert_eq!(login.user.as_deref(), Some("app"));
        assert_eq!(login.timeout, Duration::from_secs(15));
        assert!(!format!("{login:?}").contains("secret"));
    }

    #[test]
    fn test_cancel_fires_the_armed_token() {
        let canceller = Canceller::default();
        let token = canceller.arm();
        assert!(!token.is_cancelled());
        canceller.cancel();
        assert!(token.is_cancelled());
        assert!(!canceller.arm().is_cancelled());
    }
}
