//! Connection descriptors for the analytical server.
//!
//! A [`ConnectionDescriptor`] is an immutable, validated value describing
//! where to connect and how to authenticate. It renders to the provider's
//! `key=value;` connection string grammar and can be parsed back from one.

use std::fmt;

use crate::error::{BridgeError, Result};

/// Provider flag always emitted first.
const DEFAULT_PROVIDER: &str = "MSOLAP";

/// Keys the descriptor renders itself; not accepted as provider flags.
const RESERVED_KEYS: &[&str] = &["data source", "initial catalog", "user id", "password"];

/// How the session authenticates against the server.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// No credential material; the driver's default (integrated) authentication.
    Integrated,

    /// Explicit username and password.
    UsernamePassword { username: String, password: String },

    /// An application registration authenticating with a client secret.
    ServicePrincipal {
        application_id: String,
        tenant_id: String,
        secret: String,
    },
}

impl Credential {
    /// Returns the `User ID` value this credential renders, if any.
    pub fn user_id(&self) -> Option<String> {
        match self {
            Self::Integrated => None,
            Self::UsernamePassword { username, .. } => Some(username.clone()),
            Self::ServicePrincipal {
                application_id,
                tenant_id,
                ..
            } => Some(format!("app:{application_id}@{tenant_id}")),
        }
    }

    /// Returns the secret part of the credential, if any.
    pub fn password(&self) -> Option<&str> {
        match self {
            Self::Integrated => None,
            Self::UsernamePassword { password, .. } => Some(password),
            Self::ServicePrincipal { secret, .. } => Some(secret),
        }
    }

    /// Returns true if no credential material is carried.
    pub fn is_integrated(&self) -> bool {
        matches!(self, Self::Integrated)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integrated => write!(f, "Integrated"),
            Self::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::ServicePrincipal {
                application_id,
                tenant_id,
                ..
            } => f
                .debug_struct("ServicePrincipal")
                .field("application_id", application_id)
                .field("tenant_id", tenant_id)
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}

/// Validated connection settings for one analytical database.
///
/// Holds no live resource; clone it freely and pass it to every call.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    server: String,
    database: String,
    credential: Credential,
    flags: Vec<(String, String)>,
}

impl ConnectionDescriptor {
    /// Builds a descriptor from a server, database and optional credential pair.
    ///
    /// Fails with `InvalidConfiguration` when the server or database is empty,
    /// or when only one of username/password is supplied.
    pub fn build(
        server: &str,
        database: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        let mut builder = Self::builder().server(server).database(database);
        match (username, password) {
            (Some(username), Some(password)) => {
                builder = builder.credentials(username, password);
            }
            (None, None) => {}
            (Some(_), None) => {
                return Err(BridgeError::invalid_configuration(
                    "username was supplied without a password",
                ));
            }
            (None, Some(_)) => {
                return Err(BridgeError::invalid_configuration(
                    "password was supplied without a username",
                ));
            }
        }
        builder.build()
    }

    /// Returns a fluent builder.
    pub fn builder() -> ConnectionDescriptorBuilder {
        ConnectionDescriptorBuilder::default()
    }

    /// Parses a `key=value;` connection string.
    ///
    /// Keys are case-insensitive. `Data Source`/`Server`, `Initial Catalog`/
    /// `Catalog`/`Database`, `User ID`/`UID` and `Password`/`PWD` are
    /// recognised; everything else is kept as a provider flag.
    pub fn parse(conn_str: &str) -> Result<Self> {
        let mut builder = Self::builder();
        let mut username = None;
        let mut password = None;

        for (key, value) in split_pairs(conn_str)? {
            match key.to_ascii_lowercase().as_str() {
                "data source" | "datasource" | "server" => builder = builder.server(value),
                "initial catalog" | "catalog" | "database" => builder = builder.database(value),
                "user id" | "uid" | "user" => username = Some(value),
                "password" | "pwd" => password = Some(value),
                _ => builder = builder.flag(key, value),
            }
        }

        match (username, password) {
            (Some(user), Some(secret)) => {
                builder = match parse_service_principal(&user) {
                    Some((application_id, tenant_id)) => {
                        builder.service_principal(application_id, tenant_id, secret)
                    }
                    None => builder.credentials(user, secret),
                };
            }
            (None, None) => {}
            _ => {
                return Err(BridgeError::invalid_configuration(
                    "connection string must carry both User ID and Password, or neither",
                ));
            }
        }

        builder.build()
    }

    /// The server address (data source).
    pub fn server(&self) -> &str {
        &self.server
    }

    /// The logical database (initial catalog).
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The credential used to authenticate.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Provider flags in render order, `Provider` first.
    pub fn flags(&self) -> &[(String, String)] {
        &self.flags
    }

    /// Returns the value of a provider flag, matched case-insensitively.
    pub fn flag(&self, key: &str) -> Option<&str> {
        self.flags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Renders the provider connection string.
    ///
    /// Output is deterministic for identical inputs.
    pub fn connection_string(&self) -> String {
        let mut pairs: Vec<(&str, String)> = Vec::new();
        let (provider, rest): (Vec<_>, Vec<_>) = self
            .flags
            .iter()
            .partition(|(k, _)| k.eq_ignore_ascii_case("provider"));

        for (key, value) in provider {
            pairs.push((key.as_str(), value.clone()));
        }
        pairs.push(("Data Source", self.server.clone()));
        pairs.push(("Initial Catalog", self.database.clone()));
        if let (Some(user), Some(password)) =
            (self.credential.user_id(), self.credential.password())
        {
            pairs.push(("User ID", user));
            pairs.push(("Password", password.to_string()));
        }
        for (key, value) in rest {
            pairs.push((key.as_str(), value.clone()));
        }

        pairs
            .iter()
            .map(|(key, value)| format!("{key}={}", quote_value(value)))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Returns a display-safe string (no secrets) for logs and messages.
    pub fn display_string(&self) -> String {
        match self.credential.user_id() {
            Some(user) => format!("{} @ {} (as {user})", self.database, self.server),
            None => format!("{} @ {}", self.database, self.server),
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("credential", &self.credential)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Fluent builder for [`ConnectionDescriptor`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionDescriptorBuilder {
    server: Option<String>,
    database: Option<String>,
    credential: Option<Credential>,
    conflicting_credentials: bool,
    flags: Vec<(String, String)>,
}

impl ConnectionDescriptorBuilder {
    /// Sets the server address.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Sets the database (model) name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Authenticates with a username and password.
    pub fn credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.with_credential(Credential::UsernamePassword {
            username: username.into(),
            password: password.into(),
        })
    }

    /// Authenticates as a service principal.
    pub fn service_principal(
        self,
        application_id: impl Into<String>,
        tenant_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.with_credential(Credential::ServicePrincipal {
            application_id: application_id.into(),
            tenant_id: tenant_id.into(),
            secret: secret.into(),
        })
    }

    fn with_credential(mut self, credential: Credential) -> Self {
        if self.credential.is_some() {
            self.conflicting_credentials = true;
        }
        self.credential = Some(credential);
        self
    }

    /// Adds or replaces a provider flag.
    pub fn flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self
            .flags
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some(existing) => existing.1 = value,
            None => self.flags.push((key, value)),
        }
        self
    }

    /// Validates the inputs and produces the descriptor.
    pub fn build(self) -> Result<ConnectionDescriptor> {
        let server = non_empty(self.server, "server address")?;
        let database = non_empty(self.database, "database name")?;

        if self.conflicting_credentials {
            return Err(BridgeError::invalid_configuration(
                "only one credential may be supplied",
            ));
        }
        let credential = self.credential.unwrap_or(Credential::Integrated);
        validate_credential(&credential)?;

        let mut flags = vec![("Provider".to_string(), DEFAULT_PROVIDER.to_string())];
        if !credential.is_integrated() {
            flags.push(("Persist Security Info".to_string(), "True".to_string()));
            flags.push(("Impersonation Level".to_string(), "Impersonate".to_string()));
        }
        for (key, value) in self.flags {
            let key = key.trim().to_string();
            if key.is_empty() {
                return Err(BridgeError::invalid_configuration(
                    "provider flag keys must not be empty",
                ));
            }
            if key.contains(['=', ';']) {
                return Err(BridgeError::invalid_configuration(format!(
                    "provider flag key '{key}' must not contain '=' or ';'"
                )));
            }
            if RESERVED_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                return Err(BridgeError::invalid_configuration(format!(
                    "'{key}' cannot be set as a provider flag"
                )));
            }
            match flags.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
                Some(existing) => existing.1 = value,
                None => flags.push((key, value)),
            }
        }

        Ok(ConnectionDescriptor {
            server,
            database,
            credential,
            flags,
        })
    }
}

fn non_empty(value: Option<String>, what: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(BridgeError::invalid_configuration(format!(
            "{what} must not be empty"
        ))),
    }
}

fn validate_credential(credential: &Credential) -> Result<()> {
    match credential {
        Credential::Integrated | Credential::UsernamePassword { .. } => Ok(()),
        Credential::ServicePrincipal {
            application_id,
            tenant_id,
            ..
        } => {
            if application_id.trim().is_empty() || tenant_id.trim().is_empty() {
                return Err(BridgeError::invalid_configuration(
                    "service principal needs both an application id and a tenant id",
                ));
            }
            Ok(())
        }
    }
}

/// Splits `app:<application>@<tenant>` into its parts.
fn parse_service_principal(user: &str) -> Option<(String, String)> {
    let rest = user.strip_prefix("app:")?;
    let (application_id, tenant_id) = rest.split_once('@')?;
    Some((application_id.to_string(), tenant_id.to_string()))
}

/// Quotes a value when the grammar requires it.
///
/// Values containing `;`, `=`, quotes, or surrounding whitespace are wrapped
/// in double quotes with embedded double quotes doubled.
fn quote_value(value: &str) -> String {
    let needs_quotes = value.contains([';', '=', '"', '\''])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);

    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Splits a connection string into trimmed key/value pairs, honouring quotes.
fn split_pairs(conn_str: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = conn_str.chars().peekable();

    loop {
        // Key, up to '='
        let mut key = String::new();
        let mut saw_equals = false;
        for c in chars.by_ref() {
            match c {
                '=' => {
                    saw_equals = true;
                    break;
                }
                ';' if key.trim().is_empty() => key.clear(),
                ';' => {
                    return Err(BridgeError::invalid_configuration(format!(
                        "missing '=' after '{}' in connection string",
                        key.trim()
                    )));
                }
                _ => key.push(c),
            }
        }
        if !saw_equals {
            if !key.trim().is_empty() {
                return Err(BridgeError::invalid_configuration(format!(
                    "missing '=' after '{}' in connection string",
                    key.trim()
                )));
            }
            break;
        }

        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        // Value, quoted or bare, up to ';'
        let mut value = String::new();
        match chars.peek().copied() {
            Some(quote @ ('"' | '\'')) => {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == quote {
                        if chars.next_if_eq(&quote).is_some() {
                            value.push(quote);
                        } else {
                            closed = true;
                            break;
                        }
                    } else {
                        value.push(c);
                    }
                }
                if !closed {
                    return Err(BridgeError::invalid_configuration(format!(
                        "unterminated quoted value for '{}'",
                        key.trim()
                    )));
                }
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    if !c.is_whitespace() {
                        return Err(BridgeError::invalid_configuration(format!(
                            "unexpected text after quoted value for '{}'",
                            key.trim()
                        )));
                    }
                }
            }
            _ => {
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                }
                value = value.trim().to_string();
            }
        }

        pairs.push((key.trim().to_string(), value));
    }

    Ok(pairs)
}
