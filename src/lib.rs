//! olap-bridge - Query and process tabular analytical models over XMLA.
//!
//! This library exposes the core modules for the `olap` binary and for
//! integration tests.

pub mod cli;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod logging;
pub mod processing;
pub mod query;
