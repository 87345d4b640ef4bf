//! Model processing integration tests.
//!
//! Refresh mock model objects and observe the data through queries.

use std::sync::Arc;

use olap_bridge::connection::ConnectionDescriptor;
use olap_bridge::db::{MockEngineClient, MockTable};
use olap_bridge::error::BridgeError;
use olap_bridge::processing::{ModelProcessor, ProcessingMode, ProcessingState};
use olap_bridge::query::QueryExecutor;
use pretty_assertions::assert_eq;

fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor::build("olap01", "Sales", Some("etl"), Some("hunter2")).unwrap()
}

fn orders(count: usize) -> impl Iterator<Item = Vec<String>> {
    (1..=count).map(|i| vec![i.to_string(), format!("{}.50", i * 10)])
}

fn engine() -> Arc<MockEngineClient> {
    Arc::new(
        MockEngineClient::new().with_table(
            "Sales",
            MockTable::new("Orders")
                .with_integer_column("OrderId")
                .with_column("Amount", "xsd:decimal")
                .with_rows(orders(10))
                .with_source_rows(orders(10))
                .with_partition("Orders 2024"),
        ),
    )
}

async fn order_count(engine: &Arc<MockEngineClient>) -> usize {
    QueryExecutor::new(engine.clone())
        .execute(&descriptor(), "EVALUATE 'Orders'")
        .await
        .unwrap()
        .row_count()
}

#[tokio::test]
async fn test_full_refresh_picks_up_new_source_rows() {
    let engine = engine();
    let processor = ModelProcessor::new(engine.clone());
    assert_eq!(order_count(&engine).await, 10);

    engine.set_source_rows("Sales", "Orders", orders(15));
    let outcome = processor
        .process(&descriptor(), "Orders", ProcessingMode::Full)
        .await
        .unwrap();

    assert_eq!(outcome.state, ProcessingState::Succeeded);
    assert_eq!(outcome.target, "table 'Orders' in database 'Sales'");
    assert_eq!(order_count(&engine).await, 15);
    assert_eq!(engine.open_sessions(), 0);
}

#[tokio::test]
async fn test_refresh_modes_on_the_model() {
    let engine = engine();
    let processor = ModelProcessor::new(engine.clone());
    engine.set_source_rows("Sales", "Orders", orders(3));

    processor
        .process(&descriptor(), "Sales", ProcessingMode::Add)
        .await
        .unwrap();
    assert_eq!(order_count(&engine).await, 13);

    processor
        .process_database(&descriptor(), ProcessingMode::Calculate)
        .await
        .unwrap();
    assert_eq!(order_count(&engine).await, 13);

    processor
        .process(&descriptor(), "", ProcessingMode::Clear)
        .await
        .unwrap();
    assert_eq!(order_count(&engine).await, 0);

    processor
        .process(&descriptor(), "Orders/Orders 2024", ProcessingMode::Automatic)
        .await
        .unwrap();
    assert_eq!(order_count(&engine).await, 3);
}

#[tokio::test]
async fn test_missing_object_path() {
    let engine = engine();
    let processor = ModelProcessor::new(engine.clone());

    for path in ["Returns", "Sales/Returns", "Orders/Orders 2019"] {
        let err = processor
            .process(&descriptor(), path, ProcessingMode::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ObjectNotFound(_)), "{path}");
    }

    let err = processor
        .process(&descriptor(), "Sales/Orders/2024/extra", ProcessingMode::Full)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidConfiguration(_)));
    assert_eq!(order_count(&engine).await, 10);
    assert_eq!(engine.open_sessions(), 0);
}

#[tokio::test]
async fn test_failed_refresh_leaves_data() {
    let engine = Arc::new(
        MockEngineClient::new()
            .with_table(
                "Sales",
                MockTable::new("Orders")
                    .with_integer_column("OrderId")
                    .with_column("Amount", "xsd:decimal")
                    .with_rows(orders(10))
                    .with_source_rows(orders(20)),
            )
            .fail_processing("The credentials provided for the SQL source are invalid."),
    );
    let processor = ModelProcessor::new(engine.clone());

    let outcome = processor
        .process_report(&descriptor(), "Orders", ProcessingMode::Full)
        .await;

    assert_eq!(outcome.state, ProcessingState::Failed);
    assert_eq!(
        outcome.error.as_deref(),
        Some("The credentials provided for the SQL source are invalid.")
    );
    assert_eq!(order_count(&engine).await, 10);
    assert_eq!(engine.open_sessions(), 0);
}

#[tokio::test]
async fn test_concurrent_refreshes() {
    let engine = Arc::new(
        MockEngineClient::new()
            .with_table(
                "Sales",
                MockTable::new("Orders")
                    .with_integer_column("OrderId")
                    .with_source_rows((1..=4).map(|i| vec![i.to_string()])),
            )
            .with_table(
                "Sales",
                MockTable::new("Returns")
                    .with_integer_column("ReturnId")
                    .with_source_rows((1..=2).map(|i| vec![i.to_string()])),
            ),
    );
    let processor = ModelProcessor::new(engine.clone());
    let descriptor = descriptor();

    let (orders, returns) = tokio::join!(
        processor.process_table(&descriptor, "Orders", ProcessingMode::DataOnly),
        processor.process_table(&descriptor, "Returns", ProcessingMode::DataOnly),
    );

    assert!(orders.unwrap().is_success());
    assert!(returns.unwrap().is_success());
    assert_eq!(engine.row_count("Sales", "Orders"), Some(4));
    assert_eq!(engine.row_count("Sales", "Returns"), Some(2));
    assert_eq!(engine.sessions_opened(), 2);
    assert_eq!(engine.open_sessions(), 0);
}
