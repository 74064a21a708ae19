use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use super::*;
use crate::error::ServerMessage;
use crate::session::{Session, TransportError};
use crate::wire::{ParamDef, TypeFamily, WireType};

type Script = Box<dyn FnMut(&Request) -> Vec<Token> + Send>;

/// Session answering each request with tokens chosen by a closure
struct Scripted {
    script: Script,
    sent: Arc<Mutex<Vec<Request>>>,
}

impl Session for Scripted {
    fn send_request(&mut self, request: Bytes) -> std::result::Result<ResponseStream, TransportError> {
        let request = Request::decode(&request).map_err(|e| TransportError::Link(e.to_string()))?;
        let tokens = (self.script)(&request);
        self.sent.lock().push(request);
        let mut buf = BytesMut::new();
        for token in tokens {
            token.encode(&mut buf);
        }
        Ok(ResponseStream::from_packets([buf.freeze()]))
    }
}

fn statement(
    script: impl FnMut(&Request) -> Vec<Token> + Send + 'static,
) -> (Statement, Arc<Mutex<Vec<Request>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let session = Scripted {
        script: Box::new(script),
        sent: Arc::clone(&sent),
    };
    let link = Arc::new(WireLink::new(Box::new(session), true));
    (Statement::new(link, Arc::new(AtomicBool::new(false))), sent)
}

fn done(row_count: Option<u64>) -> Token {
    Token::Done(DoneStatus {
        row_count,
        ..DoneStatus::default()
    })
}

fn column(name: &str, ty: WireType) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        ty,
        nullable: true,
    }
}

fn text(s: &str) -> WireValue {
    WireValue::Text(s.encode_utf16().collect())
}

fn two_rows(_: &Request) -> Vec<Token> {
    vec![
        Token::ColMetadata(vec![
            column("id", WireType::new(TypeFamily::Int)),
            column("name", WireType::sized(TypeFamily::NVarChar, 20)),
        ]),
        Token::Row(vec![WireValue::I32(1), text("alpha")]),
        Token::Row(vec![WireValue::I32(2), text("beta")]),
        done(Some(2)),
    ]
}

fn affected(count: u64) -> impl FnMut(&Request) -> Vec<Token> + Send + 'static {
    move |_| vec![done(Some(count))]
}

#[test]
fn test_fetch_fills_bound_columns() {
    let (mut stmt, _) = statement(two_rows);
    let mut diag = Diagnostics::default();
    let id = BoundBuffer::with_capacity(4);
    let name = BoundBuffer::with_capacity(16);
    stmt.bind_col(1, CType::SLong, id.clone()).unwrap();
    stmt.bind_col(2, CType::Char, name.clone()).unwrap();

    assert_eq!(stmt.exec_direct("SELECT id, name FROM t", &mut diag).unwrap(), Step::Done);
    assert_eq!(stmt.state(), StatementState::ResultsAvailable);
    assert_eq!(stmt.num_result_cols().unwrap(), 2);

    assert!(stmt.fetch(&mut diag).unwrap());
    assert_eq!(stmt.state(), StatementState::Fetching);
    assert_eq!(id.bytes(), 1i32.to_ne_bytes().to_vec());
    assert_eq!(name.indicator(), Indicator::Length(5));
    assert_eq!(&name.bytes()[..6], b"alpha\0");

    assert!(stmt.fetch(&mut diag).unwrap());
    assert_eq!(id.bytes(), 2i32.to_ne_bytes().to_vec());
    assert!(!stmt.fetch(&mut diag).unwrap());
    assert!(!stmt.fetch(&mut diag).unwrap());
    assert_eq!(stmt.row_count().unwrap(), 2);
    assert!(diag.is_empty());
}

#[test]
fn test_get_data_reads_long_text_in_pieces() {
    let (mut stmt, _) = statement(|_| {
        vec![
            Token::ColMetadata(vec![column("body", WireType::sized(TypeFamily::NVarChar, 100))]),
            Token::Row(vec![text("abcdef")]),
            done(Some(1)),
        ]
    });
    let mut diag = Diagnostics::default();
    stmt.exec_direct("SELECT body FROM t", &mut diag).unwrap();
    assert!(stmt.fetch(&mut diag).unwrap());

    let mut buf = [0u8; 4];
    let first = stmt.get_data(1, CType::Char, &mut buf, &mut diag).unwrap();
    assert_eq!(first, Some(Indicator::Length(6)));
    assert_eq!(&buf, b"abc\0");
    assert_eq!(diag.get(1).map(|r| r.state.as_str()), Some("01004"));

    let second = stmt.get_data(1, CType::Char, &mut buf, &mut diag).unwrap();
    assert_eq!(second, Some(Indicator::Length(3)));
    assert_eq!(&buf, b"def\0");
    assert_eq!(stmt.get_data(1, CType::Char, &mut buf, &mut diag).unwrap(), None);

    let err = stmt.get_data(2, CType::Char, &mut buf, &mut diag).unwrap_err();
    assert_eq!(err.sql_state().as_str(), "07009");
}

#[test]
fn test_integer_reads_drop_fractions_with_a_warning() {
    let (mut stmt, _) = statement(|_| {
        vec![
            Token::ColMetadata(vec![column("ratio", WireType::new(TypeFamily::Float))]),
            Token::Row(vec![WireValue::F64(2.75)]),
            Token::Row(vec![WireValue::F64(3.0)]),
            done(Some(2)),
        ]
    });
    let mut diag = Diagnostics::default();
    stmt.exec_direct("SELECT ratio FROM t", &mut diag).unwrap();
    assert!(stmt.fetch(&mut diag).unwrap());

    let mut buf = [0u8; 4];
    let read = stmt.get_data(1, CType::SLong, &mut buf, &mut diag).unwrap();
    assert_eq!(read, Some(Indicator::Length(4)));
    assert_eq!(i32::from_ne_bytes(buf), 2);
    assert_eq!(diag.get(1).map(|r| r.state.as_str()), Some("01S07"));

    diag.clear();
    assert!(stmt.fetch(&mut diag).unwrap());
    stmt.get_data(1, CType::SLong, &mut buf, &mut diag).unwrap();
    assert_eq!(i32::from_ne_bytes(buf), 3);
    assert!(diag.is_empty());
}

#[test]
fn test_integer_parameters_drop_fractions_with_a_warning() {
    let (mut stmt, sent) = statement(affected(1));
    let mut diag = Diagnostics::default();
    stmt.bind_parameter(ParameterDescriptor::bound(
        1,
        CType::Char,
        SqlType::Integer,
        BoundBuffer::from_bytes(b"3.5".to_vec(), Indicator::Length(3)),
    ))
    .unwrap();
    stmt.exec_direct("INSERT INTO t VALUES (?)", &mut diag).unwrap();
    assert_eq!(diag.get(1).map(|r| r.state.as_str()), Some("01S07"));

    let sent = sent.lock();
    let Some(Request::Execute { params, .. }) = sent.first() else {
        panic!("expected an execute request, got {sent:?}");
    };
    assert_eq!(params[0].value, WireValue::I32(3));
}

#[test]
fn test_get_data_before_fetch_is_invalid_cursor_state() {
    let (mut stmt, _) = statement(two_rows);
    let mut diag = Diagnostics::default();
    stmt.exec_direct("SELECT id, name FROM t", &mut diag).unwrap();
    let mut buf = [0u8; 8];
    let err = stmt.get_data(1, CType::Char, &mut buf, &mut diag).unwrap_err();
    assert_eq!(err.sql_state().as_str(), "24000");
}

#[test]
fn test_unbound_parameter_is_reported_before_sending() {
    let (mut stmt, sent) = statement(affected(1));
    let mut diag = Diagnostics::default();
    stmt.bind_parameter(ParameterDescriptor::bound(
        1,
        CType::SLong,
        SqlType::Integer,
        BoundBuffer::from_bytes(7i32.to_ne_bytes().to_vec(), Indicator::Length(4)),
    ))
    .unwrap();
    let err = stmt
        .exec_direct("INSERT INTO t VALUES (?, ?)", &mut diag)
        .unwrap_err();
    assert_eq!(err.sql_state().as_str(), "07002");
    assert!(sent.lock().is_empty());
    assert_eq!(stmt.state(), StatementState::Prepared);
}

#[test]
fn test_bound_parameters_are_sent_with_declared_types() {
    let (mut stmt, sent) = statement(affected(1));
    let mut diag = Diagnostics::default();
    stmt.bind_parameter(ParameterDescriptor::bound(
        1,
        CType::SLong,
        SqlType::Integer,
        BoundBuffer::from_bytes(7i32.to_ne_bytes().to_vec(), Indicator::Length(4)),
    ))
    .unwrap();
    stmt.bind_parameter(ParameterDescriptor::bound(
        2,
        CType::Char,
        SqlType::VarChar,
        BoundBuffer::from_bytes(b"seven\0junk".to_vec(), Indicator::NullTerminated),
    ))
    .unwrap();
    stmt.exec_direct("INSERT INTO t VALUES (?, ?)", &mut diag).unwrap();
    assert_eq!(stmt.state(), StatementState::RowCount);
    assert_eq!(stmt.row_count().unwrap(), 1);

    let sent = sent.lock();
    let Some(Request::Execute { params, .. }) = sent.first() else {
        panic!("expected an execute request, got {sent:?}");
    };
    assert_eq!(params[0].value, WireValue::I32(7));
    assert_eq!(params[1].value, text("seven"));
}

#[test]
fn test_deferred_parameters_are_collected_before_sending() {
    let (mut stmt, sent) = statement(affected(1));
    let mut diag = Diagnostics::default();
    stmt.bind_parameter(ParameterDescriptor::deferred(
        1,
        CType::Char,
        SqlType::VarChar,
        DeferredToken(5),
    ))
    .unwrap();

    let step = stmt.exec_direct("INSERT INTO t VALUES (?)", &mut diag).unwrap();
    assert_eq!(
        step,
        Step::NeedData(NeedData {
            token: DeferredToken(5),
            ordinal: 1
        })
    );
    assert_eq!(stmt.state(), StatementState::NeedData);
    assert!(sent.lock().is_empty());

    // other operations are out of sequence while data is pending
    let err = stmt.fetch(&mut diag).unwrap_err();
    assert_eq!(err.sql_state().as_str(), "HY010");

    stmt.put_data(DeferredToken(5), b"hel").unwrap();
    stmt.put_data(DeferredToken(5), b"lo").unwrap();
    assert_eq!(stmt.param_data(&mut diag).unwrap(), Step::Done);
    assert_eq!(stmt.row_count().unwrap(), 1);

    let sent = sent.lock();
    let Some(Request::Execute { params, .. }) = sent.first() else {
        panic!("expected an execute request, got {sent:?}");
    };
    assert_eq!(params[0].value, text("hello"));
}

#[test]
fn test_put_data_outside_need_data_is_sequence_error() {
    let (mut stmt, _) = statement(affected(0));
    let err = stmt.put_data(DeferredToken(1), b"x").unwrap_err();
    assert_eq!(err.sql_state().as_str(), "HY010");
}

#[test]
fn test_cancel_while_pending_discards_the_execution() {
    let (mut stmt, sent) = statement(affected(1));
    let mut diag = Diagnostics::default();
    stmt.bind_parameter(ParameterDescriptor::deferred(
        1,
        CType::Binary,
        SqlType::VarBinary,
        DeferredToken(9),
    ))
    .unwrap();
    stmt.exec_direct("INSERT INTO t VALUES (?)", &mut diag).unwrap();

    assert!(stmt.cancel_pending());
    assert_eq!(stmt.state(), StatementState::Prepared);
    assert!(!stmt.cancel_pending());
    let err = stmt.put_data(DeferredToken(9), b"x").unwrap_err();
    assert_eq!(err.sql_state().as_str(), "HY010");
    assert!(sent.lock().is_empty());
}

#[test]
fn test_cancel_flag_is_seen_by_the_next_need_data_call() {
    let cancel = Arc::new(AtomicBool::new(false));
    let (stmt, _) = statement(affected(1));
    let mut stmt = Statement::new(Arc::clone(&stmt.link), Arc::clone(&cancel));
    let mut diag = Diagnostics::default();
    stmt.bind_parameter(ParameterDescriptor::deferred(
        1,
        CType::Char,
        SqlType::VarChar,
        DeferredToken(1),
    ))
    .unwrap();
    stmt.exec_direct("INSERT INTO t VALUES (?)", &mut diag).unwrap();

    cancel.store(true, Ordering::Release);
    let err = stmt.put_data(DeferredToken(1), b"x").unwrap_err();
    assert_eq!(err.sql_state().as_str(), "HY008");
    assert_eq!(stmt.state(), StatementState::Prepared);
}

#[test]
fn test_cancel_raised_during_execute_is_honoured() {
    let cancel = Arc::new(AtomicBool::new(false));
    let (stmt, sent) = statement(two_rows);
    let mut stmt = Statement::new(Arc::clone(&stmt.link), Arc::clone(&cancel));
    let mut diag = Diagnostics::default();

    cancel.store(true, Ordering::Release);
    let err = stmt.exec_direct("SELECT id, name FROM t", &mut diag).unwrap_err();
    assert_eq!(err.sql_state().as_str(), "HY008");
    assert_eq!(stmt.state(), StatementState::Prepared);
    assert!(sent.lock().is_empty());

    assert_eq!(stmt.execute(&mut diag).unwrap(), Step::Done);
    assert!(stmt.fetch(&mut diag).unwrap());
}

#[test]
fn test_cancel_raised_during_fetch_closes_the_cursor() {
    let cancel = Arc::new(AtomicBool::new(false));
    let (stmt, _) = statement(two_rows);
    let mut stmt = Statement::new(Arc::clone(&stmt.link), Arc::clone(&cancel));
    let mut diag = Diagnostics::default();
    stmt.exec_direct("SELECT id, name FROM t", &mut diag).unwrap();
    assert!(stmt.fetch(&mut diag).unwrap());

    cancel.store(true, Ordering::Release);
    let err = stmt.fetch(&mut diag).unwrap_err();
    assert_eq!(err.sql_state().as_str(), "HY008");
    assert_eq!(stmt.state(), StatementState::Prepared);
    assert!(!cancel.load(Ordering::Acquire));

    let err = stmt.fetch(&mut diag).unwrap_err();
    assert_eq!(err.sql_state().as_str(), "24000");
}

#[test]
fn test_late_cancel_is_forgotten_unless_data_is_pending() {
    let cancel = Arc::new(AtomicBool::new(false));
    let (stmt, _) = statement(affected(1));
    let mut stmt = Statement::new(Arc::clone(&stmt.link), Arc::clone(&cancel));
    let mut diag = Diagnostics::default();

    cancel.store(true, Ordering::Release);
    stmt.discard_late_cancel();
    assert!(!cancel.load(Ordering::Acquire));

    stmt.bind_parameter(ParameterDescriptor::deferred(
        1,
        CType::Char,
        SqlType::VarChar,
        DeferredToken(1),
    ))
    .unwrap();
    stmt.exec_direct("INSERT INTO t VALUES (?)", &mut diag).unwrap();
    cancel.store(true, Ordering::Release);
    stmt.discard_late_cancel();
    assert!(cancel.load(Ordering::Acquire));
}

#[test]
fn test_prepare_describes_parameters_and_columns() {
    let (mut stmt, sent) = statement(|request| match request {
        Request::Prepare { .. } => vec![
            Token::ParamMetadata(vec![ParamDef {
                ty: WireType::new(TypeFamily::Int),
                nullable: false,
            }]),
            Token::ColMetadata(vec![column("name", WireType::sized(TypeFamily::NVarChar, 50))]),
            done(None),
        ],
        _ => vec![done(None)],
    });
    let mut diag = Diagnostics::default();
    stmt.prepare("SELECT name FROM t WHERE id = ?", &mut diag).unwrap();
    assert_eq!(stmt.state(), StatementState::Prepared);
    assert_eq!(stmt.num_params().unwrap(), 1);

    let param = stmt.describe_param(1).unwrap();
    assert_eq!(param.sql_type, SqlType::Integer);
    assert_eq!(param.nullable, Nullability::NoNulls);
    assert_eq!(stmt.describe_param(2).unwrap_err().sql_state().as_str(), "07009");

    assert_eq!(stmt.num_result_cols().unwrap(), 1);
    let name = stmt.describe_col(1).unwrap();
    assert_eq!(name.name, "name");
    assert_eq!(name.sql_type, SqlType::WVarChar);
    assert_eq!(name.column_size, 50);
    assert_eq!(sent.lock().len(), 1);
}

#[test]
fn test_unprepared_statement_has_no_parameter_count() {
    let (stmt, _) = statement(affected(0));
    assert_eq!(stmt.num_params().unwrap_err().sql_state().as_str(), "HY010");
    assert_eq!(stmt.row_count().unwrap_err().sql_state().as_str(), "HY010");
}

#[test]
fn test_backend_error_leaves_statement_reusable() {
    let (mut stmt, _) = statement(|_| {
        vec![
            Token::Error(ServerMessage {
                number: 208,
                state: 1,
                class: 16,
                message: "Invalid object name 'missing'.".to_string(),
            }),
            Token::Done(DoneStatus {
                error: true,
                ..DoneStatus::default()
            }),
        ]
    });
    let mut diag = Diagnostics::default();
    let err = stmt.exec_direct("SELECT * FROM missing", &mut diag).unwrap_err();
    assert_eq!(err.sql_state().as_str(), "42S02");
    assert_eq!(err.native_error(), 208);
    assert_eq!(stmt.state(), StatementState::Prepared);
}

#[test]
fn test_more_results_walks_every_result() {
    let (mut stmt, _) = statement(|_| {
        vec![
            Token::ColMetadata(vec![column("n", WireType::new(TypeFamily::Int))]),
            Token::Row(vec![WireValue::I32(1)]),
            Token::Row(vec![WireValue::I32(2)]),
            done(Some(2)),
            done(Some(3)),
        ]
    });
    let mut diag = Diagnostics::default();
    stmt.exec_direct("SELECT n FROM t; UPDATE t SET n = n + 1", &mut diag)
        .unwrap();
    assert!(stmt.fetch(&mut diag).unwrap());

    assert!(stmt.more_results(&mut diag).unwrap());
    assert_eq!(stmt.state(), StatementState::RowCount);
    assert_eq!(stmt.row_count().unwrap(), 3);
    assert_eq!(stmt.num_result_cols().unwrap(), 0);

    assert!(!stmt.more_results(&mut diag).unwrap());
    assert_eq!(stmt.state(), StatementState::Prepared);
}

#[test]
fn test_close_cursor_keeps_statement_text() {
    let (mut stmt, sent) = statement(two_rows);
    let mut diag = Diagnostics::default();
    stmt.exec_direct("SELECT id, name FROM t", &mut diag).unwrap();
    stmt.close_cursor();
    assert_eq!(stmt.state(), StatementState::Prepared);
    let err = stmt.fetch(&mut diag).unwrap_err();
    assert_eq!(err.sql_state().as_str(), "24000");

    stmt.execute(&mut diag).unwrap();
    assert!(stmt.fetch(&mut diag).unwrap());
    assert_eq!(sent.lock().len(), 2);
}

#[test]
fn test_info_messages_become_warnings() {
    let (mut stmt, _) = statement(|_| {
        vec![
            Token::Info(ServerMessage {
                number: 5701,
                state: 2,
                class: 0,
                message: "Changed database context to 'demo'.".to_string(),
            }),
            done(None),
        ]
    });
    let mut diag = Diagnostics::default();
    stmt.exec_direct("USE demo", &mut diag).unwrap();
    assert!(diag.has_warnings());
    assert_eq!(diag.get(1).map(|r| r.state.as_str()), Some("01000"));
    assert_eq!(stmt.row_count().unwrap(), -1);
}

fn message(number: i32, class: u8, text: &str) -> ServerMessage {
    ServerMessage {
        number,
        state: 1,
        class,
        message: text.to_string(),
    }
}

fn failed_done() -> Token {
    Token::Done(DoneStatus {
        error: true,
        ..DoneStatus::default()
    })
}

#[test]
fn test_server_messages_keep_arrival_order() {
    let (mut stmt, _) = statement(|_| {
        vec![
            Token::Info(message(5701, 0, "Changed database context to 'demo'.")),
            Token::Error(message(2627, 14, "Violation of PRIMARY KEY constraint 'PK_t'.")),
            Token::Info(message(3621, 0, "The statement has been terminated.")),
            failed_done(),
        ]
    });
    let mut diag = Diagnostics::default();
    let err = stmt.exec_direct("INSERT INTO t VALUES (1)", &mut diag).unwrap_err();
    assert_eq!(err.sql_state().as_str(), "23000");
    assert_eq!(err.native_error(), 2627);
    diag.push_error(&err);

    let records: Vec<(&str, i32)> = diag
        .records()
        .iter()
        .map(|r| (r.state.as_str(), r.native_error))
        .collect();
    assert_eq!(records, vec![("01000", 5701), ("23000", 2627), ("01000", 3621)]);
    assert_eq!(stmt.state(), StatementState::Prepared);
}

#[test]
fn test_error_survives_a_full_record_list() {
    let (mut stmt, _) = statement(|_| {
        let mut tokens: Vec<Token> = (0..64)
            .map(|_| Token::Info(message(5701, 0, "Changed database context to 'demo'.")))
            .collect();
        tokens.push(Token::Error(message(208, 16, "Invalid object name 'nowhere'.")));
        tokens.push(failed_done());
        tokens
    });
    let mut diag = Diagnostics::with_limit(64);
    let err = stmt.exec_direct("SELECT * FROM nowhere", &mut diag).unwrap_err();
    diag.push_error(&err);

    assert_eq!(diag.len(), 64);
    let errors: Vec<i32> = diag
        .records()
        .iter()
        .filter(|r| !r.state.is_warning())
        .map(|r| r.native_error)
        .collect();
    assert_eq!(errors, vec![208]);
    assert_eq!(diag.get(64).map(|r| r.state.as_str()), Some("42S02"));
}

#[test]
fn test_load_rows_opens_a_local_result_set() {
    let (mut stmt, sent) = statement(affected(0));
    let mut diag = Diagnostics::default();
    stmt.load_rows(
        vec![column("TYPE_NAME", WireType::sized(TypeFamily::NVarChar, 128))],
        vec![vec![text("int")], vec![text("bigint")]],
        &mut diag,
    )
    .unwrap();
    let mut buf = [0u8; 16];
    assert!(stmt.fetch(&mut diag).unwrap());
    stmt.get_data(1, CType::Char, &mut buf, &mut diag).unwrap();
    assert_eq!(&buf[..4], b"int\0");
    assert!(stmt.fetch(&mut diag).unwrap());
    assert!(!stmt.fetch(&mut diag).unwrap());
    assert!(sent.lock().is_empty());
}

#[test]
fn test_max_rows_ends_the_row_set_early() {
    let (mut stmt, _) = statement(two_rows);
    let mut diag = Diagnostics::default();
    stmt.set_attr(StmtAttr::MaxRows, &AttrValue::UInt(1), &mut diag).unwrap();
    stmt.exec_direct("SELECT id, name FROM t", &mut diag).unwrap();
    assert!(stmt.fetch(&mut diag).unwrap());
    assert_eq!(stmt.attr(StmtAttr::RowNumber), AttrValue::UInt(1));
    assert!(!stmt.fetch(&mut diag).unwrap());
    assert_eq!(stmt.attr(StmtAttr::RowNumber), AttrValue::UInt(0));
    assert_eq!(stmt.row_count().unwrap(), 2);
    assert!(!stmt.more_results(&mut diag).unwrap());
    assert!(diag.is_empty());
}

#[test]
fn test_prepare_sends_rewritten_escapes() {
    let (mut stmt, sent) = statement(|_| vec![done(None)]);
    let mut diag = Diagnostics::default();
    stmt.prepare("SELECT * FROM t WHERE d > {d '2024-01-01'} AND n = ?", &mut diag).unwrap();
    assert_eq!(
        sent.lock()[0].text(),
        "SELECT * FROM t WHERE d > '2024-01-01' AND n = ?"
    );
    assert_eq!(stmt.num_params().unwrap(), 1);
    assert_eq!(
        stmt.col_attribute(0, ColumnField::Count).unwrap(),
        ColumnAttribute::Integer(0)
    );
}
