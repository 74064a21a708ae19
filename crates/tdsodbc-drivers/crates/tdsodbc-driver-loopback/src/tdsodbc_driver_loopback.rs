//! Loopback transport for tdsodbc
//!
//! Serves the driver's wire protocol from an embedded SQLite database inside
//! the calling process. The T-SQL constructs the driver itself emits
//! (`N'...'` literals, bracketed identifiers, `(MAX)` lengths, `0x` binary
//! literals, transaction batches and `INFORMATION_SCHEMA` views) are
//! translated to their SQLite equivalents, and SQLite failures are reported
//! with the native error numbers SQL Server would use.

mod catalog;
mod dialect;
mod error;
mod session;
mod values;

#[cfg(test)]
mod dialect_tests;
#[cfg(test)]
mod session_tests;

pub use dialect::translate;
pub use error::LoopbackError;
pub use session::{LoopbackSession, LoopbackTransport};
