//! tdsodbc core - a call-level SQL driver for tabular-data-stream backends
//!
//! This crate holds everything between the caller and a backend session:
//!
//! - `Driver` - the call-level surface over environment, connection and statement handles
//! - `Session` / `TransportDriver` - the contract transports implement
//! - the wire codec, type marshaling, the statement state machine with its
//!   deferred-parameter exchange, diagnostics with SQLSTATE classing, and the
//!   transaction controller

mod api;
mod attr;
mod catalog;
mod config;
mod connection;
mod descriptor;
mod diagnostics;
mod error;
mod handle;
mod info;
pub mod marshal;
mod session;
pub mod sqltext;
mod statement;
mod transaction;
mod transport;
mod types;
mod value;
pub mod wire;

pub use api::*;
pub use catalog::RowIdentifier;
pub use attr::{AttrValue, ConnectAttr, StmtAttr, CONCUR_READ_ONLY, CURSOR_FORWARD_ONLY};
pub use config::*;
pub use descriptor::*;
pub use diagnostics::*;
pub use error::*;
pub use handle::{ConnHandle, EnvHandle, Handle, HandleId, StmtHandle};
pub use info::{FUNCTION_BITMAP_WORDS, InfoType, InfoValue, SessionInfo, driver_version};
pub use session::*;
pub use statement::{NeedData, StatementState};
pub use transaction::*;
pub use transport::*;
pub use types::*;
pub use value::*;
