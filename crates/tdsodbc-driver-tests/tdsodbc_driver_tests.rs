//! tdsodbc conformance suite
//!
//! Drives the call-level surface end to end against the loopback transport,
//! once over a private in-memory database and once over a file-backed one.
//!
//! # Test Categories
//!
//! - Connections and handle lifetimes
//! - Queries, multiple results and row counts
//! - Parameters, including the deferred-data exchange
//! - Transactions under manual commit
//! - Error classing into SQLSTATEs and diagnostic ordering
//! - Cancellation from another thread
//! - Data types: padding, truncation, temporal precision, NULL
//! - Catalog functions
//! - Driver information, attributes, diagnostic fields and escape clauses
//!
//! # Usage
//!
//! ```bash
//! cargo test -p tdsodbc-driver-tests
//!
//! # With driver logging
//! RUST_LOG=tdsodbc_core=debug cargo test -p tdsodbc-driver-tests -- --nocapture
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fixtures;

#[cfg(test)]
pub mod connection_tests;

#[cfg(test)]
pub mod query_tests;

#[cfg(test)]
pub mod parameter_tests;

#[cfg(test)]
pub mod transaction_tests;

#[cfg(test)]
pub mod error_tests;

#[cfg(test)]
pub mod datatype_tests;

#[cfg(test)]
pub mod schema_tests;

#[cfg(test)]
pub mod cancel_tests;

#[cfg(test)]
pub mod metadata_tests;
