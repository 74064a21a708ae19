//! Transport registry keyed by the `Driver=` connection-string value

use std::collections::HashMap;
use std::sync::Arc;

use tdsodbc_core::{TransportDriver, TransportResolver};

/// Registry of available transports.
///
/// Names are matched case-insensitively against both [`TransportDriver::name`]
/// and [`TransportDriver::display_name`]. The first transport registered is
/// the default for connection strings without a `Driver=` key.
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn TransportDriver>>,
    default: Option<String>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
            default: None,
        }
    }

    /// Registry with every transport enabled at compile time
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "mssql")]
        registry.register(Arc::new(tdsodbc_driver_mssql::MssqlTransport::new()));

        #[cfg(feature = "loopback")]
        registry.register(Arc::new(tdsodbc_driver_loopback::LoopbackTransport::new()));

        registry
    }

    pub fn register(&mut self, driver: Arc<dyn TransportDriver>) {
        let name = driver.name().to_lowercase();
        tracing::info!(transport = %name, display_name = driver.display_name(), "registering transport");
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.drivers.insert(name, driver);
    }

    /// Make `name` the transport used when no `Driver=` key is given
    pub fn set_default(&mut self, name: &str) -> bool {
        let name = name.to_lowercase();
        if self.drivers.contains_key(&name) {
            self.default = Some(name);
            true
        } else {
            false
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TransportDriver>> {
        let key = name.trim().to_lowercase();
        let found = self.drivers.get(&key).cloned().or_else(|| {
            self.drivers
                .values()
                .find(|driver| driver.display_name().eq_ignore_ascii_case(name.trim()))
                .cloned()
        });
        if found.is_none() {
            tracing::warn!(transport = %name, "transport not found in registry");
        }
        found
    }

    /// Registered transport names, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has(&self, name: &str) -> bool {
        self.drivers.contains_key(&name.to_lowercase())
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TransportResolver for DriverRegistry {
    fn resolve(&self, name: Option<&str>) -> Option<Arc<dyn TransportDriver>> {
        match name {
            Some(name) => self.get(name),
            None => self
                .default
                .as_deref()
                .and_then(|name| self.drivers.get(name).cloned()),
        }
    }
}
