//! Query execution for olap-bridge.
//!
//! Runs native query text through an engine session and returns canonical,
//! fully materialized results.

pub mod executor;

pub use executor::QueryExecutor;
