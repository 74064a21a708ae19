//! Connection objects and the serialized wire link shared by their statements

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::DriverConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{OdbcError, Result, ServerMessage};
use crate::handle::{EnvHandle, StmtHandle};
use crate::info::SessionInfo;
use crate::session::{CancelHandle, Session, TransportError};
use crate::transaction::{Completion, TransactionController, BEGIN_TRANSACTION};
use crate::wire::{EnvChange, Request, Token, TokenReader};

struct LinkState {
    session: Box<dyn Session>,
    transaction: TransactionController,
}

/// The one wire session of a connection.
///
/// Every request goes through the state mutex, so statements sharing the
/// connection never interleave on the wire. Once a transport failure is seen
/// the link is dead for good.
pub struct WireLink {
    state: Mutex<LinkState>,
    cancel: Option<Arc<dyn CancelHandle>>,
    dead: AtomicBool,
}

impl WireLink {
    pub fn new(session: Box<dyn Session>, autocommit: bool) -> Self {
        let cancel = session.cancel_handle();
        Self {
            state: Mutex::new(LinkState {
                session,
                transaction: TransactionController::new(autocommit),
            }),
            cancel,
            dead: AtomicBool::new(false),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn ensure_alive(&self) -> Result<()> {
        if self.is_dead() {
            Err(OdbcError::Transport(TransportError::Closed))
        } else {
            Ok(())
        }
    }

    /// Mark the link unusable after a transport or protocol failure
    pub fn fail(&self, error: &OdbcError) {
        if !self.dead.swap(true, Ordering::AcqRel) {
            tracing::warn!(%error, "communication link failure, connection is now dead");
        }
    }

    fn guard<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if error.is_link_failure() {
                self.fail(error);
            }
        }
        result
    }

    /// Send a request and hand back its response.
    ///
    /// With autocommit off the first executing request after a transaction
    /// boundary is preceded by `BEGIN TRANSACTION`.
    pub fn exchange(&self, request: &Request) -> Result<TokenReader> {
        self.ensure_alive()?;
        let mut state = self.state.lock();
        let opens_work = !matches!(request, Request::Prepare { .. });
        if opens_work && state.transaction.needs_begin() {
            self.guard(run_control(&mut state, BEGIN_TRANSACTION))?;
            state.transaction.begun();
        }
        let stream = state.session.send_request(request.encode());
        let stream = self.guard(stream.map_err(OdbcError::from))?;
        Ok(TokenReader::new(stream))
    }

    pub fn autocommit(&self) -> bool {
        self.state.lock().transaction.autocommit()
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().transaction.in_transaction()
    }

    pub fn apply_env_change(&self, change: EnvChange) {
        self.state.lock().transaction.apply(change);
    }

    pub fn set_autocommit(&self, on: bool) -> Result<()> {
        self.ensure_alive()?;
        let mut state = self.state.lock();
        if state.transaction.set_autocommit(on) {
            self.guard(run_control(&mut state, Completion::Commit.statement()))?;
            state.transaction.ended();
        }
        Ok(())
    }

    /// Commit or roll back the open transaction; a no-op when none is open
    pub fn end_transaction(&self, completion: Completion) -> Result<()> {
        self.ensure_alive()?;
        let mut state = self.state.lock();
        if !state.transaction.in_transaction() {
            tracing::debug!(?completion, "no open transaction");
            return Ok(());
        }
        self.guard(run_control(&mut state, completion.statement()))?;
        state.transaction.ended();
        Ok(())
    }

    /// Interrupt the request in flight, if the transport supports it
    pub fn cancel(&self) {
        if let Some(handle) = &self.cancel {
            handle.cancel();
        }
    }

    pub fn close(&self) {
        self.dead.store(true, Ordering::Release);
        self.state.lock().session.close();
    }
}

impl std::fmt::Debug for WireLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireLink")
            .field("dead", &self.is_dead())
            .finish_non_exhaustive()
    }
}

/// Run a transaction-control batch to completion inside the link lock
fn run_control(state: &mut LinkState, text: &str) -> Result<()> {
    tracing::debug!(statement = text, "transaction control");
    let request = Request::Batch {
        text: text.to_string(),
    };
    let mut reader = TokenReader::new(state.session.send_request(request.encode())?);
    let mut errors: Vec<ServerMessage> = Vec::new();
    while let Some(token) = reader.next_token()? {
        match token {
            Token::Error(message) => errors.push(message),
            Token::EnvChange(change) => state.transaction.apply(change),
            Token::Info(message) => tracing::debug!(message = %message.message, "server info"),
            _ => {}
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(OdbcError::Backend(errors))
    }
}

/// A connection handle's object
pub(crate) struct Connection {
    pub(crate) env: EnvHandle,
    pub(crate) config: DriverConfig,
    pub(crate) state: Mutex<ConnectionState>,
    pub(crate) diagnostics: Mutex<Diagnostics>,
}

pub(crate) struct ConnectionState {
    /// Autocommit to apply when the link opens
    pub(crate) autocommit: bool,
    pub(crate) link: Option<Arc<WireLink>>,
    pub(crate) statements: Vec<StmtHandle>,
    /// Set while connected
    pub(crate) session: Option<SessionInfo>,
    pub(crate) login_timeout_secs: u64,
    pub(crate) packet_size: usize,
    pub(crate) read_only: bool,
    /// Database requested before connecting
    pub(crate) catalog: Option<String>,
}

impl Connection {
    pub(crate) fn new(env: EnvHandle, config: DriverConfig) -> Self {
        let diagnostics = Diagnostics::with_limit(config.max_diag_records);
        Self {
            env,
            state: Mutex::new(ConnectionState {
                autocommit: config.autocommit,
                link: None,
                statements: Vec::new(),
                session: None,
                login_timeout_secs: config.login_timeout_secs,
                packet_size: config.packet_size,
                read_only: false,
                catalog: None,
            }),
            config,
            diagnostics: Mutex::new(diagnostics),
        }
    }

    pub(crate) fn link(&self) -> Result<Arc<WireLink>> {
        self.state.lock().link.clone().ok_or(OdbcError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ResponseStream;
    use crate::wire::DoneStatus;
    use bytes::{Bytes, BytesMut};

    #[derive(Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Session for Recorder {
        fn send_request(&mut self, request: Bytes) -> std::result::Result<ResponseStream, TransportError> {
            let request = Request::decode(&request).map_err(|e| TransportError::Link(e.to_string()))?;
            let text = request.text().to_string();
            let mut buf = BytesMut::new();
            match text.as_str() {
                BEGIN_TRANSACTION => Token::EnvChange(EnvChange::BeginTransaction).encode(&mut buf),
                "COMMIT TRANSACTION" => Token::EnvChange(EnvChange::CommitTransaction).encode(&mut buf),
                "ROLLBACK TRANSACTION" => Token::EnvChange(EnvChange::RollbackTransaction).encode(&mut buf),
                _ => {}
            }
            Token::Done(DoneStatus::default()).encode(&mut buf);
            self.sent.lock().push(text);
            Ok(ResponseStream::from_packets([buf.freeze()]))
        }
    }

    fn link(autocommit: bool) -> (WireLink, Arc<Mutex<Vec<String>>>) {
        let recorder = Recorder::default();
        let sent = Arc::clone(&recorder.sent);
        (WireLink::new(Box::new(recorder), autocommit), sent)
    }

    fn batch(text: &str) -> Request {
        Request::Batch {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_manual_commit_opens_transaction_before_first_request() {
        let (link, sent) = link(false);
        link.exchange(&batch("INSERT 1")).unwrap().drain().unwrap();
        link.exchange(&batch("INSERT 2")).unwrap().drain().unwrap();
        assert!(link.in_transaction());
        link.end_transaction(Completion::Rollback).unwrap();
        assert!(!link.in_transaction());
        assert_eq!(
            *sent.lock(),
            vec!["BEGIN TRANSACTION", "INSERT 1", "INSERT 2", "ROLLBACK TRANSACTION"]
        );
    }

    #[test]
    fn test_end_transaction_without_open_transaction_is_noop() {
        let (link, sent) = link(true);
        link.exchange(&batch("SELECT 1")).unwrap().drain().unwrap();
        link.end_transaction(Completion::Commit).unwrap();
        assert_eq!(*sent.lock(), vec!["SELECT 1"]);
    }

    #[test]
    fn test_enabling_autocommit_commits() {
        let (link, sent) = link(false);
        link.exchange(&batch("DELETE")).unwrap().drain().unwrap();
        link.set_autocommit(true).unwrap();
        assert!(link.autocommit());
        assert_eq!(sent.lock().last().map(String::as_str), Some("COMMIT TRANSACTION"));
    }

    #[test]
    fn test_dead_link_rejects_requests() {
        let (link, _) = link(true);
        link.fail(&OdbcError::Transport(TransportError::Closed));
        let err = link.exchange(&batch("SELECT 1")).unwrap_err();
        assert_eq!(err.sql_state().as_str(), "08S01");
    }
}
