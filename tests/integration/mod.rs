//! Integration tests for olap-bridge.

pub mod config_test;
pub mod process_test;
pub mod xmla_server;
pub mod xmla_test;
