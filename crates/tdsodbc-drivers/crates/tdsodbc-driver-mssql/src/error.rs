use tdsodbc_core::{OdbcError, ServerMessage};

/// Login failed for user
const LOGIN_FAILED: u32 = 18456;

/// Conversion and client-side failures reported as if raised by the server
const CLIENT_ERROR: i32 = 50000;

/// SQL Server transport errors
#[derive(Debug, thiserror::Error)]
pub enum MssqlError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Runtime unavailable: {0}")]
    Runtime(String),

    #[error("Login timed out after {0}s")]
    Timeout(u64),

    #[error("Tiberius error: {0}")]
    Tiberius(#[from] tiberius::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MssqlError {
    /// Classify a failure raised while opening the session
    pub(crate) fn from_login(error: tiberius::error::Error) -> Self {
        match &error {
            tiberius::error::Error::Server(token) if token.code() == LOGIN_FAILED => {
                MssqlError::AuthenticationFailed(token.message().to_string())
            }
            _ => MssqlError::ConnectionFailed(error.to_string()),
        }
    }
}

impl From<MssqlError> for OdbcError {
    fn from(err: MssqlError) -> Self {
        match err {
            MssqlError::AuthenticationFailed(message) => OdbcError::Authentication(message),
            MssqlError::ConnectionFailed(_) | MssqlError::Timeout(_) | MssqlError::Io(_) => {
                OdbcError::ConnectFailed(err.to_string())
            }
            MssqlError::Tiberius(error) => match MssqlError::from_login(error) {
                MssqlError::AuthenticationFailed(message) => OdbcError::Authentication(message),
                other => OdbcError::ConnectFailed(other.to_string()),
            },
            MssqlError::Runtime(_) => OdbcError::General(err.to_string()),
        }
    }
}

/// How a failed request is reported back to the caller
#[derive(Debug)]
pub(crate) enum Failure {
    /// Statement-level error; the session stays usable
    Server(ServerMessage),
    /// The link itself is broken
    Link(String),
}

impl From<tiberius::error::Error> for Failure {
    fn from(error: tiberius::error::Error) -> Self {
        use tiberius::error::Error;

        match error {
            Error::Server(token) => Failure::Server(ServerMessage {
                number: token.code() as i32,
                state: token.state(),
                class: token.class(),
                message: token.message().to_string(),
            }),
            Error::Io { .. } | Error::Protocol(_) | Error::Tls(_) | Error::Routing { .. } => {
                Failure::Link(error.to_string())
            }
            other => Failure::Server(ServerMessage {
                number: CLIENT_ERROR,
                state: 1,
                class: 16,
                message: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tdsodbc_core::SqlState;

    #[test]
    fn test_connect_errors_map_to_login_classes() {
        let refused: OdbcError = MssqlError::ConnectionFailed("refused".to_string()).into();
        assert_eq!(refused.sql_state(), SqlState::UNABLE_TO_CONNECT);

        let denied: OdbcError = MssqlError::AuthenticationFailed("sa".to_string()).into();
        assert_eq!(denied.sql_state(), SqlState::INVALID_AUTHORIZATION);

        let timeout: OdbcError = MssqlError::Timeout(15).into();
        assert_eq!(timeout.sql_state(), SqlState::UNABLE_TO_CONNECT);
    }

    #[test]
    fn test_protocol_errors_break_the_link() {
        let failure = Failure::from(tiberius::error::Error::Protocol("bad packet".into()));
        assert!(matches!(failure, Failure::Link(message) if message.contains("bad packet")));

        let failure = Failure::from(tiberius::error::Error::Conversion("not a number".into()));
        match failure {
            Failure::Server(message) => assert_eq!(message.number, CLIENT_ERROR),
            Failure::Link(message) => panic!("unexpected link failure: {message}"),
        }
    }
}
