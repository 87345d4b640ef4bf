//! Tabular result types for olap-bridge.
//!
//! Defines the canonical column/value model query results are converted into.

use base64::Engine as _;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Canonical column type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalType {
    Integer,
    Float,
    Decimal,
    Text,
    Boolean,
    DateTime,
    Binary,
}

impl CanonicalType {
    /// Returns the type as a lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents the result of executing a query.
///
/// Fully materialized; holds no reference to the session that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    /// Column metadata, in result order.
    pub columns: Vec<Column>,

    /// Rows of data, each aligned positionally with `columns`.
    pub rows: Vec<Row>,

    /// Time taken to execute the query and read all rows.
    #[serde(with = "duration_serde")]
    pub execution_time: Duration,
}

impl TabularResult {
    /// Creates a new empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a result with the given columns and rows, checking that every
    /// row is aligned with the columns.
    pub fn with_data(columns: Vec<Column>, rows: Vec<Row>) -> Result<Self> {
        for (index, row) in rows.iter().enumerate() {
            check_row(&columns, row).map_err(|e| {
                BridgeError::internal(format!("row {index} does not match the columns: {e}"))
            })?;
        }
        Ok(Self {
            columns,
            rows,
            execution_time: Duration::ZERO,
        })
    }

    /// Sets the execution time.
    pub fn with_execution_time(mut self, duration: Duration) -> Self {
        self.execution_time = duration;
        self
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the result has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the column with the given name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// All values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Converts the rows into JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| (column.name.clone(), value.to_json()))
                    .collect()
            })
            .collect()
    }

    /// Renders the result as CSV with a header line.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let header: Vec<String> = self.columns.iter().map(|c| csv_field(&c.name)).collect();
        out.push_str(&header.join(","));
        out.push('\n');
        for row in &self.rows {
            let fields: Vec<String> = row
                .iter()
                .map(|value| match value {
                    Value::Null => String::new(),
                    other => csv_field(&other.to_display_string()),
                })
                .collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }
}

/// Checks that a row has one value per column and each value fits its column.
pub(crate) fn check_row(columns: &[Column], row: &[Value]) -> std::result::Result<(), String> {
    if row.len() != columns.len() {
        return Err(format!(
            "expected {} values, got {}",
            columns.len(),
            row.len()
        ));
    }
    for (column, value) in columns.iter().zip(row) {
        if let Some(actual) = value.canonical_type() {
            if actual != column.data_type {
                return Err(format!(
                    "column '{}' is {} but holds a {} value",
                    column.name, column.data_type, actual
                ));
            }
        }
    }
    Ok(())
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// Metadata about a column in a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as the engine reports it (e.g. `Product[Color]`).
    pub name: String,

    /// Canonical data type.
    pub data_type: CanonicalType,
}

impl Column {
    /// Creates a new column with the given name and type.
    pub fn new(name: impl Into<String>, data_type: CanonicalType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A row of data from a query result.
pub type Row = Vec<Value>;

/// Represents a single cell value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum Value {
    /// Null cell, whatever the column type.
    #[default]
    Null,

    /// Signed integer (up to i64).
    Integer(i64),

    /// Floating point number.
    Float(f64),

    /// Exact decimal (currency and fixed-point columns).
    Decimal(Decimal),

    /// Text value.
    Text(String),

    /// Boolean value.
    Boolean(bool),

    /// Date and time, as the engine reports the wall-clock value.
    DateTime(NaiveDateTime),

    /// Binary data.
    Binary(Vec<u8>),
}

impl Value {
    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical type of the value, or `None` for null.
    pub fn canonical_type(&self) -> Option<CanonicalType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(CanonicalType::Integer),
            Value::Float(_) => Some(CanonicalType::Float),
            Value::Decimal(_) => Some(CanonicalType::Decimal),
            Value::Text(_) => Some(CanonicalType::Text),
            Value::Boolean(_) => Some(CanonicalType::Boolean),
            Value::DateTime(_) => Some(CanonicalType::DateTime),
            Value::Binary(_) => Some(CanonicalType::Binary),
        }
    }

    /// Attempts to convert the value to a string representation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => b.to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            Value::Binary(b) => base64::engine::general_purpose::STANDARD.encode(b),
        }
    }

    /// Converts the value to JSON.
    ///
    /// Decimals are emitted as strings so no precision is lost.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            other => serde_json::Value::String(other.to_display_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

// Conversion implementations for common types
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

/// Serde support for Duration (not natively supported by serde).
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_nanos().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u128::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos as u64))
    }
}
