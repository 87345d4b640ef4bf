//! Configuration management for olap-bridge.
//!
//! Handles loading configuration from TOML files and environment variables,
//! with support for named server connections and output defaults.

use crate::connection::{ConnectionDescriptor, Credential};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Main configuration structure for olap-bridge.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Defaults applied when the command line does not override them.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named server connections.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
}

/// Command defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Defaults {
    /// Output format: "text", "json" or "csv".
    pub output: Option<String>,

    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server address: a host name or an `http(s)://` XMLA endpoint.
    pub server: Option<String>,

    /// Database (catalog) name.
    pub database: Option<String>,

    /// Username for basic authentication.
    pub username: Option<String>,

    /// Password, or the client secret of a service principal
    /// (not recommended to store in config).
    pub password: Option<String>,

    /// Application id; switches to service principal authentication.
    pub application_id: Option<String>,

    /// Tenant id of the service principal.
    pub tenant_id: Option<String>,

    /// Extra provider flags appended to the connection string.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, String>,
}

impl ConnectionConfig {
    /// Creates a connection config from a `key=value;` connection string.
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let descriptor = ConnectionDescriptor::parse(conn_str)?;
        let mut config = Self {
            server: Some(descriptor.server().to_string()),
            database: Some(descriptor.database().to_string()),
            flags: descriptor.flags().iter().cloned().collect(),
            ..Default::default()
        };

        match descriptor.credential() {
            Credential::Integrated => {}
            Credential::UsernamePassword { username, password } => {
                config.username = Some(username.clone());
                config.password = Some(password.clone());
            }
            Credential::ServicePrincipal {
                application_id,
                tenant_id,
                secret,
            } => {
                config.application_id = Some(application_id.clone());
                config.tenant_id = Some(tenant_id.clone());
                config.password = Some(secret.clone());
            }
        }
        Ok(config)
    }

    /// Builds a validated connection descriptor.
    pub fn to_descriptor(&self) -> Result<ConnectionDescriptor> {
        let server = self
            .server
            .as_deref()
            .ok_or_else(|| BridgeError::invalid_configuration("Server address is required"))?;
        let database = self
            .database
            .as_deref()
            .ok_or_else(|| BridgeError::invalid_configuration("Database name is required"))?;

        let mut builder = ConnectionDescriptor::builder()
            .server(server)
            .database(database);

        match (&self.application_id, &self.username, &self.password) {
            (Some(_), Some(_), _) => {
                return Err(BridgeError::invalid_configuration(
                    "Set either username or application_id, not both",
                ));
            }
            (Some(application_id), None, Some(secret)) => {
                let tenant_id = self.tenant_id.as_deref().ok_or_else(|| {
                    BridgeError::invalid_configuration(
                        "tenant_id is required for service principal authentication",
                    )
                })?;
                builder = builder.service_principal(application_id, tenant_id, secret);
            }
            (Some(_), None, None) => {
                return Err(BridgeError::invalid_configuration(
                    "A client secret (password) is required for service principal authentication",
                ));
            }
            (None, Some(username), Some(password)) => {
                builder = builder.credentials(username, password);
            }
            (None, Some(_), None) => {
                return Err(BridgeError::invalid_configuration(
                    "username was supplied without a password",
                ));
            }
            (None, None, Some(_)) => {
                return Err(BridgeError::invalid_configuration(
                    "password was supplied without a username",
                ));
            }
            (None, None, None) => {}
        }

        for (key, value) in &self.flags {
            builder = builder.flag(key, value);
        }
        builder.build()
    }

    /// Merges another config into this one, with the other taking precedence.
    pub fn merge(&mut self, other: &ConnectionConfig) {
        if other.server.is_some() {
            self.server = other.server.clone();
        }
        if other.database.is_some() {
            self.database = other.database.clone();
        }
        if other.username.is_some() {
            self.username = other.username.clone();
            self.application_id = None;
            self.tenant_id = None;
        }
        if other.application_id.is_some() {
            self.application_id = other.application_id.clone();
            self.username = None;
        }
        if other.tenant_id.is_some() {
            self.tenant_id = other.tenant_id.clone();
        }
        if other.password.is_some() {
            self.password = other.password.clone();
        }
        for (key, value) in &other.flags {
            self.flags.insert(key.clone(), value.clone());
        }
    }

    /// Applies environment variables (OLAP_SERVER, OLAP_DATABASE, etc.) as defaults.
    pub fn apply_env_defaults(&mut self) {
        self.apply_defaults_from(|key| std::env::var(key).ok());
    }

    fn apply_defaults_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.server.is_none() {
            self.server = lookup("OLAP_SERVER");
        }
        if self.database.is_none() {
            self.database = lookup("OLAP_DATABASE");
        }
        if self.username.is_none() && self.application_id.is_none() {
            self.username = lookup("OLAP_USERNAME");
        }
        if self.password.is_none() {
            self.password = lookup("OLAP_PASSWORD");
        }
    }

    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Returns a display-safe string (no password) for log output.
    pub fn display_string(&self) -> String {
        let server = self.server.as_deref().unwrap_or("unknown");
        let database = self.database.as_deref().unwrap_or("unknown");
        format!("{database} @ {server}")
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("olap-bridge")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::invalid_configuration(format!("Failed to read config file: {e}"))
        })?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            BridgeError::invalid_configuration(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Gets a named connection, or the default connection if name is None.
    pub fn get_connection(&self, name: Option<&str>) -> Option<&ConnectionConfig> {
        let key = name.unwrap_or("default");
        self.connections.get(key)
    }
}
