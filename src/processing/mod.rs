//! Model processing (refresh) for olap-bridge.
//!
//! Resolves processing targets, names the refresh modes, and drives the
//! synchronous refresh state machine.

pub mod processor;

pub use processor::ModelProcessor;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Refresh mode for a processing command.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    /// Drop and reload data, then recalculate.
    #[default]
    Full,
    /// Append new data to existing partitions.
    Add,
    /// Reload data without recalculating dependents.
    DataOnly,
    /// Remove all data.
    Clear,
    /// Recalculate derived structures only.
    Calculate,
    /// Let the engine bring stale objects up to date (the default refresh).
    Automatic,
}

impl ProcessingMode {
    /// The refresh type name used in TMSL commands.
    pub fn tmsl_type(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Add => "add",
            Self::DataOnly => "dataOnly",
            Self::Clear => "clearValues",
            Self::Calculate => "calculate",
            Self::Automatic => "automatic",
        }
    }

    /// Returns the mode as a kebab-case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Add => "add",
            Self::DataOnly => "data-only",
            Self::Clear => "clear",
            Self::Calculate => "calculate",
            Self::Automatic => "automatic",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "full" => Ok(Self::Full),
            "add" | "incremental" => Ok(Self::Add),
            "data-only" | "dataonly" => Ok(Self::DataOnly),
            "clear" | "clearvalues" | "clear-values" => Ok(Self::Clear),
            "calculate" | "recalc" => Ok(Self::Calculate),
            "automatic" | "default" => Ok(Self::Automatic),
            _ => Err(BridgeError::invalid_configuration(format!(
                "Invalid processing mode: {s}. Expected: full, add, data-only, clear, calculate, or automatic"
            ))),
        }
    }
}

/// The object a processing command acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessTarget {
    /// The whole model.
    Database { database: String },
    /// One table of the model.
    Table { database: String, table: String },
    /// One partition of a table.
    Partition {
        database: String,
        table: String,
        partition: String,
    },
}

impl ProcessTarget {
    /// Resolves an object path relative to `database`.
    ///
    /// Segments are split on `/`, or on `.` when the path has no `/`. A
    /// leading segment naming the database is dropped. The remainder is empty
    /// (model), `table`, or `table/partition`.
    pub fn resolve(object_path: &str, database: &str) -> Result<Self> {
        let path = object_path.trim().trim_matches('/');
        let mut segments: Vec<&str> = if path.is_empty() {
            Vec::new()
        } else if path.contains('/') {
            path.split('/').map(str::trim).collect()
        } else {
            path.split('.').map(str::trim).collect()
        };

        if segments.iter().any(|s| s.is_empty()) {
            return Err(BridgeError::invalid_configuration(format!(
                "object path '{object_path}' contains an empty segment"
            )));
        }
        if segments
            .first()
            .is_some_and(|first| first.eq_ignore_ascii_case(database))
        {
            segments.remove(0);
        }

        let database = database.to_string();
        match segments.as_slice() {
            [] => Ok(Self::Database { database }),
            [table] => Ok(Self::Table {
                database,
                table: table.to_string(),
            }),
            [table, partition] => Ok(Self::Partition {
                database,
                table: table.to_string(),
                partition: partition.to_string(),
            }),
            _ => Err(BridgeError::invalid_configuration(format!(
                "object path '{object_path}' has too many segments; expected [database/]table[/partition]"
            ))),
        }
    }

    /// Database the target belongs to.
    pub fn database(&self) -> &str {
        match self {
            Self::Database { database }
            | Self::Table { database, .. }
            | Self::Partition { database, .. } => database,
        }
    }

    /// Table name, for table and partition targets.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Database { .. } => None,
            Self::Table { table, .. } | Self::Partition { table, .. } => Some(table),
        }
    }

    /// TMSL object reference for this target.
    pub fn tmsl_object(&self) -> serde_json::Value {
        match self {
            Self::Database { database } => serde_json::json!({ "database": database }),
            Self::Table { database, table } => {
                serde_json::json!({ "database": database, "table": table })
            }
            Self::Partition {
                database,
                table,
                partition,
            } => serde_json::json!({
                "database": database,
                "table": table,
                "partition": partition,
            }),
        }
    }
}

impl fmt::Display for ProcessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database { database } => write!(f, "database '{database}'"),
            Self::Table { database, table } => {
                write!(f, "table '{table}' in database '{database}'")
            }
            Self::Partition {
                database,
                table,
                partition,
            } => write!(
                f,
                "partition '{partition}' of table '{table}' in database '{database}'"
            ),
        }
    }
}

/// Stages of a processing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Idle,
    Connecting,
    Locating,
    Issuing,
    Succeeded,
    Failed,
}

impl ProcessingState {
    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Result of a completed processing call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingOutcome {
    /// The object that was processed.
    pub target: String,
    /// Refresh mode that was issued.
    pub mode: ProcessingMode,
    /// Terminal state reached.
    pub state: ProcessingState,
    /// Engine diagnostic text for a failed refresh.
    pub error: Option<String>,
    /// Warnings the engine reported alongside a successful refresh.
    pub warnings: Vec<String>,
    /// Wall-clock time from connecting to completion.
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl ProcessingOutcome {
    /// Returns true if the refresh succeeded.
    pub fn is_success(&self) -> bool {
        self.state == ProcessingState::Succeeded
    }
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u128(duration.as_millis())
}
