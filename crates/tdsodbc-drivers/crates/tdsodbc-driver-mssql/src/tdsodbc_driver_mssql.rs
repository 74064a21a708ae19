//! SQL Server transport for tdsodbc
//!
//! Sessions run on top of tiberius. Each request decoded from the core's wire
//! format is executed over a tiberius client and its results are re-encoded as
//! response tokens.

mod columns;
mod error;
mod params;
mod runtime;
mod session;

#[cfg(test)]
mod columns_tests;
#[cfg(test)]
mod params_tests;

pub use error::MssqlError;
pub use params::rewrite_placeholders;
pub use runtime::block_on_tokio;
pub use session::{MssqlSession, MssqlTransport};
