//! XMLA over HTTP engine client.
//!
//! Talks to an Analysis Services HTTP endpoint (`msmdpump.dll` or a
//! compatible gateway). Every session starts with a `BeginSession` discover
//! of the target catalog and ends with `EndSession`; a session dropped
//! without being closed is ended in the background.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::rowset::RowsetReader;
use super::soap::{discover_envelope, execute_envelope, scan_response, ResponseInfo, SessionHeader};
use super::{ManagementSession, NativeCell, NativeColumn, NativeEngineClient, NativeRow, QuerySession};
use crate::connection::ConnectionDescriptor;
use crate::error::{BridgeError, Result};
use crate::processing::{ProcessTarget, ProcessingMode};

/// Default timeout for XMLA requests. Processing waits for completion, so
/// this is generous.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Path of the HTTP pump on a bare server host.
const PUMP_PATH: &str = "olap/msmdpump.dll";

const EXECUTE_ACTION: &str = "urn:schemas-microsoft-com:xml-analysis:Execute";
const DISCOVER_ACTION: &str = "urn:schemas-microsoft-com:xml-analysis:Discover";

/// XMLA client configuration.
#[derive(Debug, Clone)]
pub struct XmlaConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl XmlaConfig {
    /// Creates a config with the default timeout.
    pub fn new() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

impl Default for XmlaConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine client speaking XMLA over HTTP.
#[derive(Debug, Clone)]
pub struct XmlaClient {
    http: Client,
}

impl XmlaClient {
    /// Creates a new XMLA client with the given configuration.
    pub fn new(config: XmlaConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BridgeError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    async fn begin(&self, descriptor: &ConnectionDescriptor) -> Result<(XmlaSession, bool)> {
        let transport = Transport::new(self.http.clone(), descriptor)?;
        XmlaSession::begin(transport, descriptor.database()).await
    }
}

#[async_trait]
impl NativeEngineClient for XmlaClient {
    async fn open_query_session(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn QuerySession>> {
        let (mut session, exists) = self.begin(descriptor).await?;
        if !exists {
            if let Err(e) = session.close().await {
                debug!("Failed to end XMLA session: {}", e);
            }
            return Err(BridgeError::connection(format!(
                "Either the user does not have access to the '{}' database, or the database does not exist.",
                descriptor.database()
            )));
        }
        Ok(Box::new(XmlaQuerySession {
            session,
            rowset: None,
        }))
    }

    async fn open_management_session(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn ManagementSession>> {
        let (session, database_exists) = self.begin(descriptor).await?;
        Ok(Box::new(XmlaManagementSession {
            session,
            database_exists,
        }))
    }
}

/// Maps a server name to the XMLA endpoint URL.
///
/// `http(s)://` URLs are used as given; a bare host (optionally with port)
/// gets the default pump path.
pub(crate) fn resolve_endpoint(server: &str) -> Result<Url> {
    let server = server.trim();
    if let Some((scheme, _)) = server.split_once("://") {
        if !matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https") {
            return Err(BridgeError::connection(format!(
                "Unsupported server address '{server}': only http and https endpoints are reachable"
            )));
        }
        return Url::parse(server)
            .map_err(|e| BridgeError::connection(format!("Invalid server URL '{server}': {e}")));
    }

    Url::parse(&format!("http://{server}/{PUMP_PATH}"))
        .map_err(|e| BridgeError::connection(format!("Invalid server name '{server}': {e}")))
}

/// HTTP plumbing shared by a session and its background cleanup.
#[derive(Clone)]
struct Transport {
    http: Client,
    endpoint: Url,
    auth: Option<(String, String)>,
}

impl Transport {
    fn new(http: Client, descriptor: &ConnectionDescriptor) -> Result<Self> {
        let credential = descriptor.credential();
        let auth = credential
            .user_id()
            .map(|user| (user, credential.password().unwrap_or_default().to_string()));

        Ok(Self {
            http,
            endpoint: resolve_endpoint(descriptor.server())?,
            auth,
        })
    }

    /// Posts a SOAP envelope and returns the response body.
    ///
    /// SOAP faults come back with status 500 and are returned for scanning.
    /// Any other unsuccessful status is mapped with `on_failure`.
    async fn post(
        &self,
        action: &str,
        envelope: String,
        on_failure: fn(String) -> BridgeError,
    ) -> Result<String> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(envelope);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BridgeError::connection(format!("Request to {} timed out", self.endpoint))
            } else if e.is_connect() {
                BridgeError::connection(format!(
                    "Failed to connect to {}. Is the server reachable?",
                    self.endpoint
                ))
            } else {
                BridgeError::connection(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(BridgeError::connection(format!(
                "Authentication failed ({}). Check username and password.",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::connection(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let reports_failure = scan_response(&body)
                .map(|info| info.failure().is_some())
                .unwrap_or(false);
            if !reports_failure {
                return Err(on_failure(format!(
                    "XMLA endpoint error ({}): {}",
                    status,
                    body.trim()
                )));
            }
        }
        Ok(body)
    }
}

/// One XMLA session on the server.
struct XmlaSession {
    transport: Transport,
    database: String,
    session_id: Option<String>,
    closed: bool,
}

impl XmlaSession {
    /// Begins a session by discovering the catalog, reporting whether it exists.
    async fn begin(transport: Transport, database: &str) -> Result<(Self, bool)> {
        let mut session = Self {
            transport,
            database: database.to_string(),
            session_id: None,
            closed: false,
        };

        let envelope = discover_envelope(
            SessionHeader::Begin,
            "DBSCHEMA_CATALOGS",
            &[("CATALOG_NAME", database)],
            &[("Format", "Tabular"), ("Content", "SchemaData")],
        );
        let body = session
            .transport
            .post(DISCOVER_ACTION, envelope, BridgeError::ConnectionFailed)
            .await?;
        let info = scan_response(&body)?;
        session.session_id = info.session_id.clone();
        if let Some(message) = info.failure() {
            return Err(BridgeError::connection(message));
        }
        debug!(
            "Began XMLA session {:?} at {}",
            session.session_id, session.transport.endpoint
        );

        let mut rowset = RowsetReader::new(body)?;
        let exists = rowset.next_row()?.is_some();
        Ok((session, exists))
    }

    fn header(&self) -> SessionHeader<'_> {
        match &self.session_id {
            Some(id) => SessionHeader::Session(id),
            None => SessionHeader::None,
        }
    }

    fn properties(&self) -> [(&str, &str); 3] {
        [
            ("Catalog", self.database.as_str()),
            ("Format", "Tabular"),
            ("Content", "SchemaData"),
        ]
    }

    /// Sends a request and maps a reported failure with `on_failure`.
    async fn request(
        &self,
        action: &str,
        envelope: String,
        on_failure: fn(String) -> BridgeError,
    ) -> Result<(String, ResponseInfo)> {
        if self.closed {
            return Err(BridgeError::internal("session is closed"));
        }
        let body = self.transport.post(action, envelope, on_failure).await?;
        let info = scan_response(&body)?;
        match info.failure() {
            Some(message) => Err(on_failure(message)),
            None => Ok((body, info)),
        }
    }

    /// Ends the session on the server. Calling it more than once is a no-op.
    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let Some(id) = self.session_id.take() else {
            return Ok(());
        };

        let envelope = execute_envelope(SessionHeader::End(&id), "", &[]);
        let body = self
            .transport
            .post(EXECUTE_ACTION, envelope, BridgeError::ConnectionFailed)
            .await?;
        if let Some(message) = scan_response(&body)?.failure() {
            return Err(BridgeError::connection(message));
        }
        debug!("Ended XMLA session {}", id);
        Ok(())
    }
}

impl Drop for XmlaSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Some(id) = self.session_id.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime to end XMLA session {}", id);
            return;
        };

        let transport = self.transport.clone();
        handle.spawn(async move {
            let envelope = execute_envelope(SessionHeader::End(&id), "", &[]);
            if let Err(e) = transport
                .post(EXECUTE_ACTION, envelope, BridgeError::ConnectionFailed)
                .await {
                warn!("Failed to end abandoned XMLA session {}: {}", id, e);
            }
        });
    }
}

struct XmlaQuerySession {
    session: XmlaSession,
    rowset: Option<RowsetReader>,
}

impl XmlaQuerySession {
    fn rowset(&mut self) -> Result<&mut RowsetReader> {
        self.rowset
            .as_mut()
            .ok_or_else(|| BridgeError::internal("no query has been executed"))
    }
}

#[async_trait]
impl QuerySession for XmlaQuerySession {
    async fn execute(&mut self, query: &str) -> Result<()> {
        self.rowset = None;
        let envelope = execute_envelope(self.session.header(), query, &self.session.properties());
        let (body, _) = self
            .session
            .request(EXECUTE_ACTION, envelope, BridgeError::QueryFailed)
            .await?;
        self.rowset = Some(RowsetReader::new(body)?);
        Ok(())
    }

    fn read_schema(&self) -> Result<Vec<NativeColumn>> {
        self.rowset
            .as_ref()
            .map(RowsetReader::columns)
            .ok_or_else(|| BridgeError::internal("no query has been executed"))
    }

    async fn read_row(&mut self) -> Result<Option<NativeRow>> {
        self.rowset()?.next_row()
    }

    async fn close(&mut self) -> Result<()> {
        self.rowset = None;
        self.session.close().await
    }
}

struct XmlaManagementSession {
    session: XmlaSession,
    database_exists: bool,
}

impl XmlaManagementSession {
    /// Discovers a schema rowset, returning each row as column name to text.
    async fn discover(
        &self,
        request_type: &str,
        restrictions: &[(&str, &str)],
    ) -> Result<Vec<HashMap<String, String>>> {
        let envelope = discover_envelope(
            self.session.header(),
            request_type,
            restrictions,
            &self.session.properties(),
        );
        let (body, _) = self
            .session
            .request(DISCOVER_ACTION, envelope, BridgeError::ProcessingFailed)
            .await?;

        let mut rowset = RowsetReader::new(body)?;
        let names: Vec<String> = rowset.columns().into_iter().map(|c| c.name).collect();
        let mut rows = Vec::new();
        while let Some(row) = rowset.next_row()? {
            let record = names
                .iter()
                .zip(row)
                .filter_map(|(name, cell)| match cell {
                    NativeCell::Text(text) => Some((name.clone(), text)),
                    NativeCell::Null => None,
                })
                .collect();
            rows.push(record);
        }
        Ok(rows)
    }

    /// Id of the table with the given name, if any.
    async fn table_id(&self, table: &str) -> Result<Option<String>> {
        let rows = self.discover("TMSCHEMA_TABLES", &[("Name", table)]).await?;
        Ok(rows
            .into_iter()
            .find(|row| named(row, table))
            .and_then(|mut row| row.remove("ID")))
    }
}

fn named(row: &HashMap<String, String>, name: &str) -> bool {
    row.get("Name")
        .is_some_and(|n| n.eq_ignore_ascii_case(name))
}

#[async_trait]
impl ManagementSession for XmlaManagementSession {
    async fn locate(&mut self, target: &ProcessTarget) -> Result<bool> {
        if !self.database_exists {
            return Ok(false);
        }
        match target {
            ProcessTarget::Database { .. } => Ok(true),
            ProcessTarget::Table { table, .. } => Ok(self.table_id(table).await?.is_some()),
            ProcessTarget::Partition {
                table, partition, ..
            } => {
                let Some(table_id) = self.table_id(table).await? else {
                    return Ok(false);
                };
                let rows = self
                    .discover("TMSCHEMA_PARTITIONS", &[("Name", partition)])
                    .await?;
                Ok(rows.iter().any(|row| {
                    named(row, partition) && row.get("TableID") == Some(&table_id)
                }))
            }
        }
    }

    async fn process_object(
        &mut self,
        target: &ProcessTarget,
        mode: ProcessingMode,
    ) -> Result<Vec<String>> {
        let command = refresh_command(target, mode);
        debug!("Issuing refresh: {}", command);

        let envelope = execute_envelope(self.session.header(), &command, &[]);
        let (_, info) = self
            .session
            .request(EXECUTE_ACTION, envelope, BridgeError::ProcessingFailed)
            .await?;
        Ok(info.warnings)
    }

    async fn close(&mut self) -> Result<()> {
        self.session.close().await
    }
}

/// TMSL refresh command for a target.
fn refresh_command(target: &ProcessTarget, mode: ProcessingMode) -> String {
    serde_json::json!({
        "refresh": {
            "type": mode.tmsl_type(),
            "objects": [target.tmsl_object()],
        }
    })
    .to_string()
}
