//! Transports for tdsodbc
//!
//! Each backend lives in its own crate and is compiled in through a cargo
//! feature. [`DriverRegistry`] collects the enabled ones and resolves the
//! `Driver=` key of a connection string to one of them.

#[cfg(feature = "loopback")]
pub use tdsodbc_driver_loopback as loopback;
#[cfg(feature = "mssql")]
pub use tdsodbc_driver_mssql as mssql;

mod registry;

pub use registry::DriverRegistry;

use std::sync::Arc;

use tdsodbc_core::Driver;

/// Driver front end resolving transports through [`DriverRegistry::with_defaults`]
pub fn driver() -> Driver {
    Driver::new(Arc::new(DriverRegistry::with_defaults()))
}
