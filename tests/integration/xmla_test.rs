//! XMLA client integration tests.
//!
//! Drive the HTTP client against an in-process responder with canned
//! server responses. The live tests at the bottom need a reachable server:
//! set OLAP_TEST_SERVER (and optionally OLAP_TEST_DATABASE, OLAP_USERNAME,
//! OLAP_PASSWORD) to run them.

use std::sync::Arc;
use std::time::Duration;

use olap_bridge::connection::ConnectionDescriptor;
use olap_bridge::db::{CanonicalType, NativeEngineClient, Value, XmlaClient, XmlaConfig};
use olap_bridge::error::BridgeError;
use olap_bridge::processing::{ModelProcessor, ProcessingMode, ProcessingState};
use olap_bridge::query::QueryExecutor;
use pretty_assertions::assert_eq;

use super::xmla_server::{empty_result, envelope, fault, rowset, Request, Responder};

const SESSION: &str = "3F2A8B4C-0001";

fn client() -> Arc<XmlaClient> {
    Arc::new(XmlaClient::new(XmlaConfig::new().with_timeout(10)).unwrap())
}

fn descriptor(responder: &Responder) -> ConnectionDescriptor {
    ConnectionDescriptor::build(&responder.url, "Model", Some("alice"), Some("s3cret")).unwrap()
}

/// Answers session management for catalog `Model`; `other` handles the rest.
fn model_server(
    other: impl Fn(&Request) -> (u16, String) + Send + Sync + 'static,
) -> impl Fn(&Request) -> (u16, String) + Send + Sync + 'static {
    move |request| {
        let body = &request.body;
        if body.contains("<EndSession") {
            return (200, empty_result(None, ""));
        }
        if body.contains("DBSCHEMA_CATALOGS") {
            let rows = if body.contains("<CATALOG_NAME>Model</CATALOG_NAME>") {
                vec![vec![Some("Model")]]
            } else {
                Vec::new()
            };
            return (
                200,
                rowset(Some(SESSION), &[("CATALOG_NAME", "xsd:string")], &rows),
            );
        }
        other(request)
    }
}

fn sales_rowset() -> String {
    rowset(
        Some(SESSION),
        &[
            ("Sales[Id]", "xsd:long"),
            ("Sales[Product]", "xsd:string"),
            ("Sales[Amount]", "xsd:decimal"),
            ("Sales[OrderDate]", "xsd:dateTime"),
            ("Sales[Shipped]", "xsd:boolean"),
        ],
        &[
            vec![
                Some("1"),
                Some("Road & Bike"),
                Some("19.99"),
                Some("2024-03-01T10:30:00"),
                Some("true"),
            ],
            vec![Some("2"), None, None, None, Some("false")],
        ],
    )
}

#[tokio::test]
async fn test_query_over_xmla() {
    let responder = Responder::start(model_server(|request| {
        if request.body.contains("EVALUATE") {
            (200, sales_rowset())
        } else {
            (500, fault("unexpected request"))
        }
    }))
    .await;
    let executor = QueryExecutor::new(client());

    let result = executor
        .execute(&descriptor(&responder), "EVALUATE 'Sales'")
        .await
        .unwrap();

    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Sales[Id]",
            "Sales[Product]",
            "Sales[Amount]",
            "Sales[OrderDate]",
            "Sales[Shipped]"
        ]
    );
    assert_eq!(result.columns[2].data_type, CanonicalType::Decimal);
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.rows[0][1], Value::Text("Road & Bike".to_string()));
    assert_eq!(result.rows[0][2].to_string(), "19.99");
    assert_eq!(result.rows[0][4], Value::Boolean(true));
    assert_eq!(result.rows[1][1], Value::Null);
    assert_eq!(result.rows[1][2], Value::Null);
    assert_eq!(result.rows[1][3], Value::Null);

    let requests = responder.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].body.contains("<BeginSession"));
    assert!(requests[0].soap_action.ends_with(":Discover"));
    assert!(requests[1].body.contains(&format!(r#"SessionId="{SESSION}""#)));
    assert!(requests[1].body.contains("<Catalog>Model</Catalog>"));
    assert!(requests[1].body.contains("EVALUATE &apos;Sales&apos;"));
    assert!(requests[1].soap_action.ends_with(":Execute"));
    assert!(requests[2].body.contains("<EndSession"));
    assert!(requests
        .iter()
        .all(|r| r.authorization.as_deref() == Some("Basic YWxpY2U6czNjcmV0")));
}

#[tokio::test]
async fn test_query_fault_is_query_failed() {
    let message = "Query (1, 1) The syntax for 'EVALUATEX' is incorrect.";
    let responder = Responder::start(model_server(move |_| (500, fault(message)))).await;
    let executor = QueryExecutor::new(client());

    let err = executor
        .execute(&descriptor(&responder), "EVALUATEX 'Sales'")
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::QueryFailed(_)));
    assert_eq!(err.detail(), message);
    assert_eq!(responder.end_sessions(), 1);
}

#[tokio::test]
async fn test_missing_catalog_is_connection_failure() {
    let responder = Responder::start(model_server(|_| (500, fault("unexpected request")))).await;
    let executor = QueryExecutor::new(client());

    let descriptor =
        ConnectionDescriptor::build(&responder.url, "Archive", Some("alice"), Some("s3cret"))
            .unwrap();
    let err = executor
        .execute(&descriptor, "EVALUATE 'Sales'")
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::ConnectionFailed(_)));
    assert!(err.detail().contains("'Archive'"));
    assert_eq!(responder.end_sessions(), 1);
}

#[tokio::test]
async fn test_rejected_credentials() {
    let responder = Responder::start(|_| (401, String::from("Unauthorized"))).await;
    let executor = QueryExecutor::new(client());

    let err = executor
        .execute(&descriptor(&responder), "EVALUATE 'Sales'")
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::ConnectionFailed(_)));
    assert!(err.detail().contains("Authentication failed"));
}

#[tokio::test]
async fn test_unreachable_server() {
    let executor = QueryExecutor::new(client());
    // Port 9 (discard) is not expected to accept connections locally
    let descriptor =
        ConnectionDescriptor::build("http://127.0.0.1:9/xmla", "Model", None, None).unwrap();

    let result = executor.execute(&descriptor, "EVALUATE 'Sales'").await;
    assert!(matches!(result, Err(BridgeError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_dropped_session_is_ended() {
    let responder = Responder::start(model_server(|_| (200, sales_rowset()))).await;

    let session = client()
        .open_query_session(&descriptor(&responder))
        .await
        .unwrap();
    drop(session);

    for _ in 0..100 {
        if responder.end_sessions() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(responder.end_sessions(), 1);
}

fn tables_rowset() -> String {
    rowset(
        Some(SESSION),
        &[("ID", "xsd:unsignedLong"), ("Name", "xsd:string")],
        &[vec![Some("7"), Some("Sales")]],
    )
}

fn partitions_rowset() -> String {
    rowset(
        Some(SESSION),
        &[
            ("ID", "xsd:unsignedLong"),
            ("TableID", "xsd:unsignedLong"),
            ("Name", "xsd:string"),
        ],
        &[
            vec![Some("21"), Some("7"), Some("Sales 2024")],
            vec![Some("22"), Some("8"), Some("Returns 2024")],
        ],
    )
}

/// Answers table/partition discovery; `refresh` answers the TMSL command.
fn processing_server(
    refresh: impl Fn(&Request) -> (u16, String) + Send + Sync + 'static,
) -> impl Fn(&Request) -> (u16, String) + Send + Sync + 'static {
    model_server(move |request| {
        let body = &request.body;
        if body.contains("TMSCHEMA_TABLES") {
            if body.contains("<Name>Sales</Name>") {
                (200, tables_rowset())
            } else {
                let columns = [("ID", "xsd:unsignedLong"), ("Name", "xsd:string")];
                (200, rowset(Some(SESSION), &columns, &[]))
            }
        } else if body.contains("TMSCHEMA_PARTITIONS") {
            (200, partitions_rowset())
        } else if body.contains("refresh") {
            refresh(request)
        } else {
            (500, fault("unexpected request"))
        }
    })
}

#[tokio::test]
async fn test_process_table_over_xmla() {
    let responder = Responder::start(processing_server(|_| {
        (
            200,
            empty_result(
                Some(SESSION),
                r#"<Warning WarningCode="1092354050" Description="Partition 'Sales 2019' was skipped."/>"#,
            ),
        )
    }))
    .await;
    let processor = ModelProcessor::new(client());

    let outcome = processor
        .process(&descriptor(&responder), "Model/Sales", ProcessingMode::Full)
        .await
        .unwrap();

    assert_eq!(outcome.state, ProcessingState::Succeeded);
    assert_eq!(
        outcome.warnings,
        vec!["Partition 'Sales 2019' was skipped.".to_string()]
    );

    let requests = responder.requests();
    let command = requests
        .iter()
        .find(|r| r.body.contains("refresh"))
        .unwrap();
    assert!(command.body.contains("&quot;type&quot;:&quot;full&quot;"));
    assert!(command.body.contains("&quot;table&quot;:&quot;Sales&quot;"));
    assert_eq!(responder.end_sessions(), 1);
}

#[tokio::test]
async fn test_process_partition_checks_owning_table() {
    let responder =
        Responder::start(processing_server(|_| (200, empty_result(Some(SESSION), "")))).await;
    let processor = ModelProcessor::new(client());

    let outcome = processor
        .process(
            &descriptor(&responder),
            "Sales/Sales 2024",
            ProcessingMode::DataOnly,
        )
        .await
        .unwrap();
    assert!(outcome.is_success());

    // "Returns 2024" exists, but belongs to another table
    let err = processor
        .process(
            &descriptor(&responder),
            "Sales/Returns 2024",
            ProcessingMode::Full,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ObjectNotFound(_)));

    let err = processor
        .process(&descriptor(&responder), "Inventory", ProcessingMode::Full)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ObjectNotFound(_)));
    assert_eq!(responder.end_sessions(), 3);
}

#[tokio::test]
async fn test_process_failure_over_xmla() {
    let responder = Responder::start(processing_server(|_| {
        (
            200,
            empty_result(
                Some(SESSION),
                r#"<Error ErrorCode="3239575574" Description="OLE DB or ODBC error: Login failed for user 'etl'."/>"#,
            ),
        )
    }))
    .await;
    let processor = ModelProcessor::new(client());

    let err = processor
        .process_table(&descriptor(&responder), "Sales", ProcessingMode::Full)
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::ProcessingFailed(_)));
    assert_eq!(
        err.detail(),
        "OLE DB or ODBC error: Login failed for user 'etl'."
    );
    assert_eq!(responder.end_sessions(), 1);
}

#[tokio::test]
async fn test_refresh_server_error_without_fault_fails() {
    let responder = Responder::start(processing_server(|_| {
        (500, envelope(None, "<ExecuteResponse/>"))
    }))
    .await;
    let processor = ModelProcessor::new(client());

    let err = processor
        .process_database(&descriptor(&responder), ProcessingMode::Full)
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::ProcessingFailed(_)));
    assert!(err.detail().contains("500"));
    assert_eq!(responder.end_sessions(), 1);
}

#[tokio::test]
async fn test_query_server_error_without_fault_fails() {
    let responder = Responder::start(model_server(|_| {
        (503, "Service Unavailable".to_string())
    }))
    .await;
    let executor = QueryExecutor::new(client());

    let err = executor
        .execute(&descriptor(&responder), "EVALUATE 'Sales'")
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::QueryFailed(_)));
    assert!(err.detail().contains("503"));
}

#[tokio::test]
async fn test_session_header_omitted_without_session() {
    let responder = Responder::start(|request: &Request| {
        let body = &request.body;
        if body.contains("DBSCHEMA_CATALOGS") {
            let rows = [vec![Some("Model")]];
            (200, rowset(None, &[("CATALOG_NAME", "xsd:string")], &rows))
        } else {
            (200, envelope(None, "<ExecuteResponse/>"))
        }
    })
    .await;
    let processor = ModelProcessor::new(client());

    let outcome = processor
        .process_database(&descriptor(&responder), ProcessingMode::Calculate)
        .await
        .unwrap();
    assert!(outcome.is_success());

    let requests = responder.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[1].body.contains("SessionId"));
}

// === Live server tests ===

fn live_descriptor() -> Option<ConnectionDescriptor> {
    let server = std::env::var("OLAP_TEST_SERVER").ok()?;
    let database = std::env::var("OLAP_TEST_DATABASE").unwrap_or_else(|_| "Model".to_string());
    let username = std::env::var("OLAP_USERNAME").ok();
    let password = std::env::var("OLAP_PASSWORD").ok();
    ConnectionDescriptor::build(&server, &database, username.as_deref(), password.as_deref()).ok()
}

#[tokio::test]
async fn test_live_simple_query() {
    let Some(descriptor) = live_descriptor() else {
        eprintln!("Skipping test: OLAP_TEST_SERVER not set");
        return;
    };

    let result = QueryExecutor::new(client())
        .execute(&descriptor, r#"EVALUATE ROW("One", 1, "Label", "hello")"#)
        .await
        .unwrap();

    assert_eq!(result.row_count(), 1);
    assert_eq!(result.columns.len(), 2);
    assert_eq!(result.rows[0][0], Value::Integer(1));
}

#[tokio::test]
async fn test_live_bad_syntax() {
    let Some(descriptor) = live_descriptor() else {
        eprintln!("Skipping test: OLAP_TEST_SERVER not set");
        return;
    };

    let err = QueryExecutor::new(client())
        .execute(&descriptor, "EVALUATEX 1")
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::QueryFailed(_)));
    assert!(!err.detail().is_empty());
}
