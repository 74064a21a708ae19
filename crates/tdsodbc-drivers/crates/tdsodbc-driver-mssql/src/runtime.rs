//! Shared Tokio runtime for the blocking session API
//!
//! Sessions expose a synchronous request/response interface while tiberius is
//! async. One multi-threaded runtime is created lazily and reused by every
//! session in the process.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::Runtime;

use crate::error::MssqlError;

static TOKIO_RUNTIME: OnceLock<std::io::Result<Runtime>> = OnceLock::new();

fn tokio_runtime() -> Result<&'static Runtime, MssqlError> {
    TOKIO_RUNTIME
        .get_or_init(|| {
            tracing::debug!("creating tokio runtime for SQL Server sessions");
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .thread_name("tdsodbc-mssql")
                .build()
        })
        .as_ref()
        .map_err(|e| MssqlError::Runtime(e.to_string()))
}

/// Run `future` to completion on the shared runtime.
///
/// Must not be called from inside an async context.
pub fn block_on_tokio<F: Future>(future: F) -> Result<F::Output, MssqlError> {
    Ok(tokio_runtime()?.block_on(future))
}
