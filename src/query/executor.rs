//! Query execution against the analytical engine.
//!
//! Each call opens its own query session, submits the text verbatim, maps
//! the rowset through the type mapper, and closes the session before
//! returning.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::connection::ConnectionDescriptor;
use crate::db::{
    map_column_type, map_value, Column, NativeEngineClient, QuerySession, Row, TabularResult,
};
use crate::error::{BridgeError, Result};

/// Runs native query text and returns fully materialized results.
#[derive(Clone)]
pub struct QueryExecutor {
    client: Arc<dyn NativeEngineClient>,
}

impl QueryExecutor {
    /// Creates a new query executor over the given engine client.
    pub fn new(client: Arc<dyn NativeEngineClient>) -> Self {
        Self { client }
    }

    /// Executes `query` against the descriptor's database.
    ///
    /// Fails with `InvalidConfiguration` for blank text, `ConnectionFailed`
    /// if no session can be opened, `QueryFailed` with the engine's text if
    /// the query is rejected, and `UnsupportedType` for columns with no
    /// canonical type. Nothing is returned on failure.
    pub async fn execute(
        &self,
        descriptor: &ConnectionDescriptor,
        query: &str,
    ) -> Result<TabularResult> {
        if query.trim().is_empty() {
            return Err(BridgeError::invalid_configuration("query text is empty"));
        }

        let start = Instant::now();
        let mut session = self.client.open_query_session(descriptor).await?;
        debug!("Opened query session on {}", descriptor.display_string());

        let result = read_result(session.as_mut(), query).await;
        if let Err(e) = session.close().await {
            warn!("Failed to close query session: {}", e);
        }

        let result = result?.with_execution_time(start.elapsed());
        info!(
            "Query returned {} rows in {:?}",
            result.row_count(),
            result.execution_time
        );
        Ok(result)
    }
}

async fn read_result(session: &mut dyn QuerySession, query: &str) -> Result<TabularResult> {
    session.execute(query).await?;

    let schema = session.read_schema()?;
    let columns = schema
        .iter()
        .map(|c| Ok(Column::new(c.name.clone(), map_column_type(&c.native_type)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut rows: Vec<Row> = Vec::new();
    while let Some(native) = session.read_row().await? {
        if native.len() != schema.len() {
            return Err(BridgeError::protocol(format!(
                "row {} has {} cells but the rowset declares {} columns",
                rows.len() + 1,
                native.len(),
                schema.len()
            )));
        }
        let row = native
            .iter()
            .zip(&schema)
            .map(|(cell, column)| map_value(cell, &column.native_type))
            .collect::<Result<Row>>()?;
        rows.push(row);
    }

    TabularResult::with_data(columns, rows)
}
