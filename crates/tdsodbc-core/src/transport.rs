//! Transport drivers: the collaborators that open backend sessions

use std::sync::Arc;

use crate::config::{ConnectionString, DriverConfig};
use crate::error::Result;
use crate::session::Session;

/// A way of reaching a backend, selected by the `Driver=` connection-string key
pub trait TransportDriver: Send + Sync {
    /// Key matched against `Driver=` (case-insensitive)
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Product name reported for the backend
    fn dbms_name(&self) -> &'static str {
        "Microsoft SQL Server"
    }

    fn dbms_version(&self) -> &'static str {
        "16.00.0000"
    }

    /// Open and authenticate a session.
    ///
    /// Unreachable servers fail with `OdbcError::ConnectFailed`, rejected
    /// credentials with `OdbcError::Authentication`.
    fn connect(&self, target: &ConnectionString, config: &DriverConfig) -> Result<Box<dyn Session>>;
}

/// Looks up the transport for a connection string
pub trait TransportResolver: Send + Sync {
    /// Transport registered as `name`, or the default one when `name` is `None`
    fn resolve(&self, name: Option<&str>) -> Option<Arc<dyn TransportDriver>>;
}

/// Resolver serving a single transport regardless of the requested name
pub struct SingleTransport(pub Arc<dyn TransportDriver>);

impl TransportResolver for SingleTransport {
    fn resolve(&self, _name: Option<&str>) -> Option<Arc<dyn TransportDriver>> {
        Some(Arc::clone(&self.0))
    }
}
