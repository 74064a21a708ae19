//! Driver configuration and connection-string parsing

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OdbcError, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1433;
pub const DEFAULT_DATABASE: &str = "master";
pub const MIN_PACKET_SIZE: usize = 512;

/// Settings attached to an environment at allocation and copied onto each
/// of its connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Autocommit state of newly allocated connections
    pub autocommit: bool,
    pub login_timeout_secs: u64,
    /// Upper bound on response packet size produced by transports
    pub packet_size: usize,
    /// Records kept per handle per operation
    pub max_diag_records: usize,
    pub application_name: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            autocommit: true,
            login_timeout_secs: 15,
            packet_size: 4096,
            max_diag_records: 64,
            application_name: "tdsodbc".to_string(),
        }
    }
}

impl DriverConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| OdbcError::Configuration(format!("Failed to parse driver config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "driver config not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| OdbcError::Configuration(format!("Failed to serialize driver config: {e}")))
    }

    fn validate(&self) -> Result<()> {
        if self.packet_size < MIN_PACKET_SIZE {
            return Err(OdbcError::Configuration(format!(
                "packet_size must be at least {MIN_PACKET_SIZE}, got {}",
                self.packet_size
            )));
        }
        if self.max_diag_records == 0 {
            return Err(OdbcError::Configuration(
                "max_diag_records must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parsed `key=value;` connection string. Keys are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    attributes: BTreeMap<String, String>,
}

impl ConnectionString {
    pub fn parse(input: &str) -> Result<Self> {
        let mut attributes = BTreeMap::new();
        let mut rest = input.trim();
        while !rest.is_empty() {
            let Some(eq) = rest.find('=') else {
                if rest.trim_matches(';').trim().is_empty() {
                    break;
                }
                return Err(OdbcError::Configuration(format!(
                    "Expected key=value in connection string near '{rest}'"
                )));
            };
            let key = rest[..eq].trim().trim_start_matches(';').trim().to_lowercase();
            rest = rest[eq + 1..].trim_start();

            let value;
            if let Some(quoted) = rest.strip_prefix('{') {
                let (inner, after) = split_braced(quoted).ok_or_else(|| {
                    OdbcError::Configuration(format!("Unterminated '{{' for key '{key}'"))
                })?;
                value = inner;
                rest = after.trim_start().strip_prefix(';').unwrap_or(after).trim_start();
            } else {
                let end = rest.find(';').unwrap_or(rest.len());
                value = rest[..end].trim().to_string();
                rest = rest.get(end + 1..).unwrap_or("").trim_start();
            }

            if !key.is_empty() {
                attributes.insert(key, value);
            }
        }
        Ok(Self { attributes })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(&key.to_lowercase()).map(String::as_str)
    }

    fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    /// Transport named by the `Driver` key
    pub fn driver(&self) -> Option<&str> {
        self.get("driver")
    }

    /// Host and port from `Server=host[,port]`
    pub fn server(&self) -> (String, u16) {
        let Some(server) = self.first_of(&["server", "address", "addr"]) else {
            return (DEFAULT_HOST.to_string(), DEFAULT_PORT);
        };
        let server = server.strip_prefix("tcp:").unwrap_or(server);
        match server.split_once(',') {
            Some((host, port)) => (
                host.trim().to_string(),
                port.trim().parse().unwrap_or(DEFAULT_PORT),
            ),
            None => (server.trim().to_string(), DEFAULT_PORT),
        }
    }

    pub fn database(&self) -> String {
        self.first_of(&["database", "initial catalog"])
            .unwrap_or(DEFAULT_DATABASE)
            .to_string()
    }

    /// Same target, opening `database` instead
    pub fn with_database(mut self, database: &str) -> Self {
        self.attributes.remove("initial catalog");
        self.attributes.insert("database".to_string(), database.to_string());
        self
    }

    pub fn user(&self) -> Option<&str> {
        self.first_of(&["uid", "user id"])
    }

    pub fn password(&self) -> Option<&str> {
        self.first_of(&["pwd", "password"])
    }

    pub fn trust_server_certificate(&self) -> bool {
        self.get("trustservercertificate").is_some_and(|v| {
            v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true") || v == "1"
        })
    }
}

/// Split `text` after an opening brace at its closing brace; `}}` escapes `}`
fn split_braced(text: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '}' {
            if chars.peek().is_some_and(|(_, next)| *next == '}') {
                chars.next();
                value.push('}');
                continue;
            }
            return Some((value, &text[i + 1..]));
        }
        value.push(c);
    }
    None
}
