//! Configuration integration tests.
//!
//! Load connection profiles from disk and turn them into descriptors.

use std::io::Write;

use olap_bridge::config::Config;
use olap_bridge::connection::Credential;
use olap_bridge::error::BridgeError;
use pretty_assertions::assert_eq;

const CONFIG: &str = r#"
[defaults]
output = "csv"

[connections.default]
server = "olap01"
database = "AdventureWorks"

[connections.prod]
server = "https://olap.example.com/xmla"
database = "Finance"
username = "reader"
password = "p;ss=word"

[connections.prod.flags]
"Connect Timeout" = "30"
"Application Name" = "olap-bridge"

[connections.broken]
server = "olap01"
database = "Finance"

[connections.broken.flags]
"Data Source" = "elsewhere"
"#;

fn write_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file
}

#[test]
fn test_named_connection_to_connection_string() {
    let file = write_config();
    let config = Config::load_from_file(file.path()).unwrap();

    let descriptor = config
        .get_connection(Some("prod"))
        .unwrap()
        .to_descriptor()
        .unwrap();

    assert_eq!(
        descriptor.connection_string(),
        "Provider=MSOLAP;Data Source=https://olap.example.com/xmla;Initial Catalog=Finance;\
         User ID=reader;Password=\"p;ss=word\";Persist Security Info=True;\
         Impersonation Level=Impersonate;Application Name=olap-bridge;Connect Timeout=30"
    );
    assert!(!descriptor.display_string().contains("p;ss=word"));
}

#[test]
fn test_default_connection_is_integrated() {
    let file = write_config();
    let config = Config::load_from_file(file.path()).unwrap();

    let descriptor = config.get_connection(None).unwrap().to_descriptor().unwrap();
    assert_eq!(descriptor.credential(), &Credential::Integrated);
    assert_eq!(config.defaults.output.as_deref(), Some("csv"));
}

#[test]
fn test_reserved_flag_is_rejected() {
    let file = write_config();
    let config = Config::load_from_file(file.path()).unwrap();

    let err = config
        .get_connection(Some("broken"))
        .unwrap()
        .to_descriptor()
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidConfiguration(_)));
}
