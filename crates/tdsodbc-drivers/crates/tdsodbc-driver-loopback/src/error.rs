use rusqlite::ErrorCode;
use tdsodbc_core::{OdbcError, ServerMessage};

/// Invalid object name
const INVALID_OBJECT: i32 = 208;
/// Invalid column name
const INVALID_COLUMN: i32 = 207;
/// There is already an object named ... in the database
const OBJECT_EXISTS: i32 = 2714;
/// Violation of PRIMARY KEY or UNIQUE constraint
const DUPLICATE_KEY: i32 = 2627;
/// Cannot insert the value NULL into column
const NULL_VIOLATION: i32 = 515;
/// Statement conflicted with a FOREIGN KEY or CHECK constraint
const CONSTRAINT_CONFLICT: i32 = 547;
/// Incorrect syntax near ...
const SYNTAX_ERROR: i32 = 102;
/// COMMIT or ROLLBACK without a matching BEGIN TRANSACTION
const NO_TRANSACTION: i32 = 3902;
/// Anything SQLite reports without a closer match
const GENERAL: i32 = 50000;
/// The statement has been terminated
const STATEMENT_TERMINATED: i32 = 3621;

/// Loopback transport errors
#[derive(Debug, thiserror::Error)]
pub enum LoopbackError {
    #[error("Server '{0}' is not reachable through the loopback transport")]
    Unreachable(String),

    #[error("Login failed for user '{0}'")]
    LoginFailed(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<LoopbackError> for OdbcError {
    fn from(err: LoopbackError) -> Self {
        match err {
            LoopbackError::Unreachable(_) | LoopbackError::Sqlite(_) => {
                OdbcError::ConnectFailed(err.to_string())
            }
            LoopbackError::LoginFailed(_) => OdbcError::Authentication(err.to_string()),
        }
    }
}

/// Whether `error` is SQLite reporting an interrupted statement
pub(crate) fn is_interrupt(error: &rusqlite::Error) -> bool {
    error.sqlite_error_code() == Some(ErrorCode::OperationInterrupted)
}

/// Report a SQLite failure the way SQL Server reports the same condition
pub(crate) fn server_message(error: &rusqlite::Error) -> ServerMessage {
    let message = error.to_string();
    let lower = message.to_lowercase();
    let (number, class) = if lower.contains("no such table") {
        (INVALID_OBJECT, 16)
    } else if lower.contains("no such column") {
        (INVALID_COLUMN, 16)
    } else if lower.contains("already exists") {
        (OBJECT_EXISTS, 16)
    } else if lower.contains("unique constraint") || lower.contains("primary key") {
        (DUPLICATE_KEY, 14)
    } else if lower.contains("not null constraint") {
        (NULL_VIOLATION, 16)
    } else if lower.contains("foreign key constraint") || lower.contains("check constraint") {
        (CONSTRAINT_CONFLICT, 16)
    } else if lower.contains("no transaction is active") {
        (NO_TRANSACTION, 16)
    } else if lower.contains("syntax error")
        || lower.contains("incomplete input")
        || lower.contains("unrecognized token")
    {
        (SYNTAX_ERROR, 15)
    } else {
        (GENERAL, 16)
    };
    ServerMessage {
        number,
        state: 1,
        class,
        message,
    }
}

/// Notice SQL Server sends after a data modification that violated a constraint
pub(crate) fn termination_notice(failure: &ServerMessage) -> Option<ServerMessage> {
    matches!(failure.number, DUPLICATE_KEY | NULL_VIOLATION | CONSTRAINT_CONFLICT).then(|| {
        ServerMessage {
            number: STATEMENT_TERMINATED,
            state: 0,
            class: 0,
            message: "The statement has been terminated.".to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rusqlite::Connection;
    use tdsodbc_core::SqlState;

    fn failure(setup: &str, sql: &str) -> ServerMessage {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(setup).unwrap();
        let error = conn.execute_batch(sql).unwrap_err();
        server_message(&error)
    }

    #[test]
    fn test_sqlite_failures_take_server_numbers() {
        let setup = "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE);
                     INSERT INTO t VALUES (1, 'a');";
        assert_eq!(failure(setup, "SELECT * FROM missing").number, INVALID_OBJECT);
        assert_eq!(failure(setup, "SELECT nope FROM t").number, INVALID_COLUMN);
        assert_eq!(failure(setup, "CREATE TABLE t (x INT)").number, OBJECT_EXISTS);
        assert_eq!(failure(setup, "INSERT INTO t VALUES (1, 'b')").number, DUPLICATE_KEY);
        assert_eq!(failure(setup, "INSERT INTO t VALUES (2, NULL)").number, NULL_VIOLATION);
        assert_eq!(failure(setup, "SELEC 1").number, SYNTAX_ERROR);
        assert_eq!(failure(setup, "SELECT {fn UCASE('a')}").number, SYNTAX_ERROR);
        assert_eq!(failure(setup, "COMMIT").number, NO_TRANSACTION);
    }

    #[test]
    fn test_server_numbers_classify_to_sqlstates() {
        let setup = "CREATE TABLE t (id INTEGER PRIMARY KEY)";
        let duplicate = failure(setup, "INSERT INTO t VALUES (1); INSERT INTO t VALUES (1)");
        assert_eq!(duplicate.class, 14);
        assert_eq!(
            OdbcError::Backend(vec![duplicate]).sql_state(),
            SqlState::INTEGRITY_CONSTRAINT
        );

        let missing = failure(setup, "SELECT * FROM nowhere");
        assert_eq!(
            OdbcError::Backend(vec![missing]).sql_state(),
            SqlState::TABLE_NOT_FOUND
        );
    }

    #[test]
    fn test_constraint_failures_are_followed_by_a_notice() {
        let setup = "CREATE TABLE t (id INTEGER PRIMARY KEY)";
        let duplicate = failure(setup, "INSERT INTO t VALUES (1); INSERT INTO t VALUES (1)");
        let notice = termination_notice(&duplicate).expect("duplicate key terminates");
        assert_eq!(notice.number, STATEMENT_TERMINATED);
        assert!(notice.is_info());

        let missing = failure(setup, "SELECT * FROM nowhere");
        assert_eq!(termination_notice(&missing), None);
    }

    #[test]
    fn test_connect_errors_map_to_login_classes() {
        let unreachable: OdbcError = LoopbackError::Unreachable("db.example".to_string()).into();
        assert_eq!(unreachable.sql_state(), SqlState::UNABLE_TO_CONNECT);

        let denied: OdbcError = LoopbackError::LoginFailed("sa".to_string()).into();
        assert_eq!(denied.sql_state(), SqlState::INVALID_AUTHORIZATION);
    }
}
