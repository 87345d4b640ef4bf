//! Error types for olap-bridge.
//!
//! Defines the error taxonomy shared by descriptor construction, queries and
//! model processing.

use thiserror::Error;

/// Main error type for bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Malformed connection inputs, detected locally before any network call.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A session could not be established (unreachable server, auth rejected, etc.)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The engine rejected or errored on a query (syntax, missing object, permissions).
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A processing target does not resolve to a database, table or partition.
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// The engine reported an error while refreshing a model object.
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// A result column or cell type that cannot be represented.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// The engine's response could not be read (malformed envelope, bad cell text, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Creates an invalid configuration error with the given message.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::QueryFailed(msg.into())
    }

    /// Creates an object-not-found error with the given message.
    pub fn object_not_found(msg: impl Into<String>) -> Self {
        Self::ObjectNotFound(msg.into())
    }

    /// Creates a processing error with the given message.
    pub fn processing(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    /// Creates an unsupported type error with the given message.
    pub fn unsupported_type(msg: impl Into<String>) -> Self {
        Self::UnsupportedType(msg.into())
    }

    /// Creates a protocol error with the given message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "Configuration Error",
            Self::ConnectionFailed(_) => "Connection Error",
            Self::QueryFailed(_) => "Query Error",
            Self::ObjectNotFound(_) => "Object Not Found",
            Self::ProcessingFailed(_) => "Processing Error",
            Self::UnsupportedType(_) => "Type Error",
            Self::Protocol(_) => "Protocol Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the diagnostic text without the category prefix.
    ///
    /// For engine-side failures this is the engine's own message, unmodified.
    pub fn detail(&self) -> &str {
        match self {
            Self::InvalidConfiguration(msg)
            | Self::ConnectionFailed(msg)
            | Self::QueryFailed(msg)
            | Self::ObjectNotFound(msg)
            | Self::ProcessingFailed(msg)
            | Self::UnsupportedType(msg)
            | Self::Protocol(msg)
            | Self::Internal(msg) => msg,
        }
    }
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
