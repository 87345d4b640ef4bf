//! Engine abstraction layer for olap-bridge.
//!
//! Provides a trait-based interface over the analytical engine's native
//! client, so query execution and processing do not depend on the wire
//! protocol. Sessions are opened per call and closed before the call returns.

mod mock;
mod rowset;
mod soap;
mod type_map;
mod types;
mod xmla;

pub use mock::{MockEngineClient, MockTable};
pub use type_map::{map_column_type, map_value};
pub use types::{CanonicalType, Column, Row, TabularResult, Value};
pub use xmla::{XmlaClient, XmlaConfig};

use async_trait::async_trait;

use crate::connection::ConnectionDescriptor;
use crate::error::Result;
use crate::processing::{ProcessTarget, ProcessingMode};

/// Native column type as the engine declares it.
///
/// For XMLA rowsets this is the XML Schema type name (`long`, `decimal`,
/// `dateTime`, ...), stored without its namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeType(String);

impl NativeType {
    /// Creates a native type, dropping any `prefix:` part.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim();
        let local = name.rsplit_once(':').map(|(_, l)| l).unwrap_or(name);
        Self(local.to_string())
    }

    /// The type name without prefix.
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A column as declared in the native rowset schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeColumn {
    /// Column name as reported by the engine.
    pub name: String,
    /// Declared native type.
    pub native_type: NativeType,
}

impl NativeColumn {
    pub fn new(name: impl Into<String>, native_type: NativeType) -> Self {
        Self {
            name: name.into(),
            native_type,
        }
    }
}

/// A native cell: the engine's lexical text, or an explicit null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCell {
    Null,
    Text(String),
}

impl NativeCell {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

impl From<&str> for NativeCell {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for NativeCell {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T> From<Option<T>> for NativeCell
where
    T: Into<String>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(text) => Self::Text(text.into()),
            None => Self::Null,
        }
    }
}

/// One native row, aligned with the rowset schema.
pub type NativeRow = Vec<NativeCell>;

/// Capability to open sessions against the analytical engine.
#[async_trait]
pub trait NativeEngineClient: Send + Sync {
    /// Opens a read-only session for queries against the descriptor's database.
    async fn open_query_session(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn QuerySession>>;

    /// Opens a management session for processing commands.
    async fn open_management_session(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn ManagementSession>>;
}

/// A live query session. Owned by exactly one call.
#[async_trait]
pub trait QuerySession: Send {
    /// Submits query text verbatim; its rowset becomes readable.
    async fn execute(&mut self, query: &str) -> Result<()>;

    /// Column schema of the submitted query's rowset.
    fn read_schema(&self) -> Result<Vec<NativeColumn>>;

    /// Reads the next row, or `None` once the rowset is exhausted.
    async fn read_row(&mut self) -> Result<Option<NativeRow>>;

    /// Ends the session. Calling it more than once is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// A live management session. Owned by exactly one call.
#[async_trait]
pub trait ManagementSession: Send {
    /// Returns whether the target resolves to an existing object.
    async fn locate(&mut self, target: &ProcessTarget) -> Result<bool>;

    /// Refreshes the target and waits for completion, returning engine warnings.
    async fn process_object(
        &mut self,
        target: &ProcessTarget,
        mode: ProcessingMode,
    ) -> Result<Vec<String>>;

    /// Ends the session. Calling it more than once is a no-op.
    async fn close(&mut self) -> Result<()>;
}
