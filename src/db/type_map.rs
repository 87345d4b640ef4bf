//! Native-to-canonical type mapping.
//!
//! Every native type the engine declares for a rowset column either has an
//! explicit canonical target or is rejected with `UnsupportedType`. Nothing
//! is silently degraded to text.

use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::str::FromStr;

use super::{CanonicalType, NativeCell, NativeType, Value};
use crate::error::{BridgeError, Result};

/// Maps a native column type to its canonical type.
pub fn map_column_type(native: &NativeType) -> Result<CanonicalType> {
    match native.name() {
        "byte" | "short" | "int" | "long" | "unsignedByte" | "unsignedShort" | "unsignedInt" => {
            Ok(CanonicalType::Integer)
        }
        // unsignedLong can exceed i64, so it is kept exact as a decimal
        "unsignedLong" | "decimal" => Ok(CanonicalType::Decimal),
        "float" | "double" => Ok(CanonicalType::Float),
        "string" => Ok(CanonicalType::Text),
        "boolean" => Ok(CanonicalType::Boolean),
        "dateTime" | "date" => Ok(CanonicalType::DateTime),
        "base64Binary" => Ok(CanonicalType::Binary),
        other => Err(BridgeError::unsupported_type(format!(
            "native type 'xsd:{other}' has no canonical mapping"
        ))),
    }
}

/// Maps one native cell of the given native type to a canonical value.
///
/// A null cell is `Value::Null` for every supported type.
pub fn map_value(cell: &NativeCell, native: &NativeType) -> Result<Value> {
    let canonical = map_column_type(native)?;
    let text = match cell {
        NativeCell::Null => return Ok(Value::Null),
        NativeCell::Text(text) => text,
    };

    let bad = || {
        BridgeError::protocol(format!(
            "cannot read '{text}' as xsd:{}",
            native.name()
        ))
    };

    match canonical {
        CanonicalType::Text => Ok(Value::Text(text.clone())),
        CanonicalType::Integer => text
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| bad()),
        CanonicalType::Decimal => parse_decimal(text.trim()).map(Value::Decimal).ok_or_else(bad),
        CanonicalType::Float => parse_float(text.trim()).map(Value::Float).ok_or_else(bad),
        CanonicalType::Boolean => match text.trim() {
            "true" | "1" => Ok(Value::Boolean(true)),
            "false" | "0" => Ok(Value::Boolean(false)),
            _ => Err(bad()),
        },
        CanonicalType::DateTime => parse_datetime(text.trim())
            .map(Value::DateTime)
            .ok_or_else(bad),
        CanonicalType::Binary => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map(Value::Binary)
                .map_err(|_| bad())
        }
    }
}

/// Parses a decimal from its lexical form without passing through binary floating point.
fn parse_decimal(text: &str) -> Option<Decimal> {
    if text.contains(['e', 'E']) {
        Decimal::from_scientific(text).ok()
    } else {
        Decimal::from_str(text).ok()
    }
}

/// Parses an XSD float, including the `INF`, `-INF` and `NaN` lexical forms.
fn parse_float(text: &str) -> Option<f64> {
    match text {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => text.parse::<f64>().ok(),
    }
}

/// Parses an XSD dateTime or date. An offset, if any, is dropped and the
/// wall-clock value kept.
fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
