//! Error types for tdsodbc

use thiserror::Error;

use crate::diagnostics::SqlState;
use crate::session::TransportError;
use crate::wire::WireError;

/// A message raised by the backend (error or informational)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Backend-native error number
    pub number: i32,
    /// Backend state byte
    pub state: u8,
    /// Severity class
    pub class: u8,
    /// Message text as sent by the backend
    pub message: String,
}

impl ServerMessage {
    /// Highest severity class the backend uses for informational messages
    pub const INFO_MAX_CLASS: u8 = 10;

    pub fn is_info(&self) -> bool {
        self.class <= Self::INFO_MAX_CLASS
    }
}

/// Core error type for driver operations.
///
/// Every variant classifies to exactly one SQLSTATE through [`OdbcError::sql_state`].
#[derive(Error, Debug)]
pub enum OdbcError {
    #[error("Invalid handle")]
    InvalidHandle,

    #[error("Function sequence error: {0}")]
    Sequence(String),

    #[error("Connection not open")]
    NotConnected,

    #[error("Connection name in use")]
    AlreadyConnected,

    #[error("Client unable to establish connection: {0}")]
    ConnectFailed(String),

    #[error("Login failed: {0}")]
    Authentication(String),

    #[error("Communication link failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("{}", backend_summary(.0))]
    Backend(Vec<ServerMessage>),

    #[error("Invalid descriptor index: {0}")]
    InvalidDescriptorIndex(u16),

    #[error("COUNT field incorrect: parameter {0} is not bound")]
    ParameterNotBound(u16),

    #[error("Restricted data type attribute violation: {0}")]
    RestrictedDataType(String),

    #[error("Invalid character value for cast specification: {0}")]
    InvalidCharacterValue(String),

    #[error("Numeric value out of range: {0}")]
    NumericOutOfRange(String),

    #[error("Invalid datetime format: {0}")]
    InvalidDatetime(String),

    #[error("Invalid string or buffer length: {0}")]
    InvalidBufferLength(usize),

    #[error("Invalid cursor state: {0}")]
    InvalidCursorState(String),

    #[error("Operation canceled")]
    Cancelled,

    #[error("Memory allocation error: {0}")]
    ResourceExhausted(String),

    #[error("Optional feature not implemented: {0}")]
    NotSupported(String),

    #[error("Attribute cannot be set now: {0}")]
    AttributeCannotBeSetNow(String),

    #[error("Invalid attribute value: {0}")]
    InvalidAttributeValue(String),

    #[error("Invalid attribute identifier: {0}")]
    InvalidAttribute(String),

    #[error("Fetch type out of range: {0}")]
    FetchTypeOutOfRange(String),

    #[error("Syntax error or access violation: {0}")]
    Syntax(String),

    #[error("Invalid use of null pointer: {0}")]
    MissingArgument(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    General(String),
}

/// The message that classifies a backend failure: its first error, if any
fn leading(messages: &[ServerMessage]) -> Option<&ServerMessage> {
    messages
        .iter()
        .find(|m| !m.is_info())
        .or_else(|| messages.first())
}

fn backend_summary(messages: &[ServerMessage]) -> String {
    leading(messages)
        .map(|m| m.message.clone())
        .unwrap_or_else(|| "Backend reported an error".to_string())
}

impl OdbcError {
    /// SQLSTATE class code for this error
    pub fn sql_state(&self) -> SqlState {
        match self {
            OdbcError::InvalidHandle => SqlState::GENERAL_ERROR,
            OdbcError::Sequence(_) => SqlState::SEQUENCE_ERROR,
            OdbcError::NotConnected => SqlState::CONNECTION_NOT_OPEN,
            OdbcError::AlreadyConnected => SqlState::CONNECTION_IN_USE,
            OdbcError::ConnectFailed(_) => SqlState::UNABLE_TO_CONNECT,
            OdbcError::Authentication(_) => SqlState::INVALID_AUTHORIZATION,
            OdbcError::Transport(_) | OdbcError::Wire(_) => SqlState::LINK_FAILURE,
            OdbcError::Backend(messages) => leading(messages)
                .map(|m| SqlState::from_native(m.number, m.class))
                .unwrap_or(SqlState::GENERAL_ERROR),
            OdbcError::InvalidDescriptorIndex(_) => SqlState::INVALID_DESCRIPTOR_INDEX,
            OdbcError::ParameterNotBound(_) => SqlState::COUNT_FIELD_INCORRECT,
            OdbcError::RestrictedDataType(_) => SqlState::RESTRICTED_DATA_TYPE,
            OdbcError::InvalidCharacterValue(_) => SqlState::INVALID_CHARACTER_VALUE,
            OdbcError::NumericOutOfRange(_) => SqlState::NUMERIC_OUT_OF_RANGE,
            OdbcError::InvalidDatetime(_) => SqlState::INVALID_DATETIME_FORMAT,
            OdbcError::InvalidBufferLength(_) => SqlState::INVALID_BUFFER_LENGTH,
            OdbcError::InvalidCursorState(_) => SqlState::INVALID_CURSOR_STATE,
            OdbcError::Cancelled => SqlState::OPERATION_CANCELED,
            OdbcError::ResourceExhausted(_) => SqlState::MEMORY_ALLOCATION,
            OdbcError::NotSupported(_) => SqlState::NOT_IMPLEMENTED,
            OdbcError::AttributeCannotBeSetNow(_) => SqlState::ATTRIBUTE_CANNOT_BE_SET_NOW,
            OdbcError::InvalidAttributeValue(_) => SqlState::INVALID_ATTRIBUTE_VALUE,
            OdbcError::InvalidAttribute(_) => SqlState::INVALID_ATTRIBUTE_IDENTIFIER,
            OdbcError::FetchTypeOutOfRange(_) => SqlState::FETCH_TYPE_OUT_OF_RANGE,
            OdbcError::Syntax(_) => SqlState::SYNTAX_ERROR,
            OdbcError::MissingArgument(_) => SqlState::INVALID_USE_OF_NULL,
            OdbcError::Configuration(_) | OdbcError::Io(_) | OdbcError::General(_) => {
                SqlState::GENERAL_ERROR
            }
        }
    }

    /// Backend-native error code, zero for driver-side errors
    pub fn native_error(&self) -> i32 {
        match self {
            OdbcError::Backend(messages) => leading(messages).map(|m| m.number).unwrap_or(0),
            _ => 0,
        }
    }

    /// Whether the error means the wire session can no longer be used
    pub fn is_link_failure(&self) -> bool {
        matches!(self, OdbcError::Transport(_) | OdbcError::Wire(_))
    }
}

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, OdbcError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(number: i32, class: u8) -> OdbcError {
        OdbcError::Backend(vec![ServerMessage {
            number,
            state: 1,
            class,
            message: format!("error {number}"),
        }])
    }

    #[test]
    fn test_backend_error_uses_first_message() {
        let err = OdbcError::Backend(vec![
            ServerMessage {
                number: 2627,
                state: 1,
                class: 14,
                message: "Violation of PRIMARY KEY constraint".into(),
            },
            ServerMessage {
                number: 3621,
                state: 0,
                class: 0,
                message: "The statement has been terminated.".into(),
            },
        ]);
        assert_eq!(err.to_string(), "Violation of PRIMARY KEY constraint");
        assert_eq!(err.native_error(), 2627);
        assert_eq!(err.sql_state().as_str(), "23000");
    }

    #[test]
    fn test_link_failures_are_distinct_from_backend_errors() {
        let err = OdbcError::Transport(TransportError::Closed);
        assert!(err.is_link_failure());
        assert_eq!(err.sql_state().as_str(), "08S01");

        let err = backend(208, 16);
        assert!(!err.is_link_failure());
        assert_eq!(err.sql_state().as_str(), "42S02");
    }
}
