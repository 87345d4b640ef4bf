//! Mock engine client for testing.
//!
//! Provides an in-memory tabular model: tables with native-typed columns,
//! rows that `EVALUATE <table>` returns, and an external "source" that
//! processing reloads from. Failures can be injected, and open sessions are
//! counted so tests can check that every session is closed.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    ManagementSession, NativeCell, NativeColumn, NativeEngineClient, NativeRow, NativeType,
    QuerySession,
};
use crate::connection::ConnectionDescriptor;
use crate::error::{BridgeError, Result};
use crate::processing::{ProcessTarget, ProcessingMode};

/// A table in the mock model.
#[derive(Debug, Clone)]
pub struct MockTable {
    name: String,
    columns: Vec<(String, NativeType)>,
    rows: Vec<NativeRow>,
    source: Option<Vec<NativeRow>>,
    partitions: Vec<String>,
}

impl MockTable {
    /// Creates an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            source: None,
            partitions: Vec::new(),
        }
    }

    /// Adds a column with a native type name such as `xsd:decimal`.
    pub fn with_column(mut self, name: impl Into<String>, native_type: &str) -> Self {
        self.columns.push((name.into(), NativeType::new(native_type)));
        self
    }

    /// Adds an `xsd:long` column.
    pub fn with_integer_column(self, name: impl Into<String>) -> Self {
        self.with_column(name, "xsd:long")
    }

    /// Sets the current rows.
    pub fn with_rows<I, R, C>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = C>,
        C: Into<NativeCell>,
    {
        self.rows = collect_rows(rows);
        self
    }

    /// Sets the rows the external source provides on the next refresh.
    pub fn with_source_rows<I, R, C>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = C>,
        C: Into<NativeCell>,
    {
        self.source = Some(collect_rows(rows));
        self
    }

    /// Declares a partition of the table.
    pub fn with_partition(mut self, name: impl Into<String>) -> Self {
        self.partitions.push(name.into());
        self
    }

    fn native_columns(&self) -> Vec<NativeColumn> {
        self.columns
            .iter()
            .map(|(column, ty)| {
                NativeColumn::new(format!("{}[{}]", self.name, column), ty.clone())
            })
            .collect()
    }

    fn refresh(&mut self, mode: ProcessingMode) {
        let source = self.source.clone();
        match mode {
            ProcessingMode::Full | ProcessingMode::DataOnly => {
                if let Some(rows) = source {
                    self.rows = rows;
                }
            }
            ProcessingMode::Add => {
                if let Some(rows) = source {
                    self.rows.extend(rows);
                }
            }
            ProcessingMode::Clear => self.rows.clear(),
            ProcessingMode::Automatic => {
                if self.rows.is_empty() {
                    if let Some(rows) = source {
                        self.rows = rows;
                    }
                }
            }
            ProcessingMode::Calculate => {}
        }
    }
}

fn collect_rows<I, R, C>(rows: I) -> Vec<NativeRow>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = C>,
    C: Into<NativeCell>,
{
    rows.into_iter()
        .map(|row| row.into_iter().map(Into::into).collect())
        .collect()
}

#[derive(Debug, Clone)]
struct CannedQuery {
    columns: Vec<NativeColumn>,
    rows: Vec<NativeRow>,
}

#[derive(Debug, Default)]
struct MockState {
    databases: HashMap<String, Vec<MockTable>>,
    queries: HashMap<String, CannedQuery>,
    connect_error: Option<String>,
    processing_error: Option<String>,
}

impl MockState {
    fn database(&self, name: &str) -> Option<&Vec<MockTable>> {
        self.databases
            .iter()
            .find(|(db, _)| db.eq_ignore_ascii_case(name))
            .map(|(_, tables)| tables)
    }

    fn database_mut(&mut self, name: &str) -> Option<&mut Vec<MockTable>> {
        self.databases
            .iter_mut()
            .find(|(db, _)| db.eq_ignore_ascii_case(name))
            .map(|(_, tables)| tables)
    }
}

fn find_table<'a>(tables: &'a [MockTable], name: &str) -> Option<&'a MockTable> {
    tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

/// An in-memory engine client.
#[derive(Debug, Clone, Default)]
pub struct MockEngineClient {
    state: Arc<Mutex<MockState>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockEngineClient {
    /// Creates a client with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table to a database, creating the database if needed.
    pub fn with_table(self, database: impl Into<String>, table: MockTable) -> Self {
        self.lock()
            .databases
            .entry(database.into())
            .or_default()
            .push(table);
        self
    }

    /// Registers a fixed result for an exact query text.
    pub fn with_query<I, R, C>(self, query: &str, columns: &[(&str, &str)], rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = C>,
        C: Into<NativeCell>,
    {
        let canned = CannedQuery {
            columns: columns
                .iter()
                .map(|(name, ty)| NativeColumn::new(*name, NativeType::new(ty)))
                .collect(),
            rows: collect_rows(rows),
        };
        self.lock().queries.insert(query.trim().to_string(), canned);
        self
    }

    /// Makes every session open fail with the given message.
    pub fn fail_connect(self, message: impl Into<String>) -> Self {
        self.lock().connect_error = Some(message.into());
        self
    }

    /// Makes every refresh fail with the given engine message.
    pub fn fail_processing(self, message: impl Into<String>) -> Self {
        self.lock().processing_error = Some(message.into());
        self
    }

    /// Replaces the rows the external source will provide for a table.
    pub fn set_source_rows<I, R, C>(&self, database: &str, table: &str, rows: I)
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = C>,
        C: Into<NativeCell>,
    {
        let rows = collect_rows(rows);
        let mut state = self.lock();
        if let Some(t) = state
            .database_mut(database)
            .and_then(|tables| tables.iter_mut().find(|t| t.name.eq_ignore_ascii_case(table)))
        {
            t.source = Some(rows);
        }
    }

    /// Current row count of a table.
    pub fn row_count(&self, database: &str, table: &str) -> Option<usize> {
        let state = self.lock();
        state
            .database(database)
            .and_then(|tables| find_table(tables, table))
            .map(|t| t.rows.len())
    }

    /// Sessions opened so far.
    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sessions opened but not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.sessions_opened() - self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn open(&self, descriptor: &ConnectionDescriptor) -> Result<SessionGuard> {
        if let Some(message) = &self.lock().connect_error {
            return Err(BridgeError::connection(message.clone()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(SessionGuard {
            client: self.clone(),
            database: descriptor.database().to_string(),
            closed: false,
        })
    }
}

/// Bookkeeping shared by both session kinds.
#[derive(Debug)]
struct SessionGuard {
    client: MockEngineClient,
    database: String,
    closed: bool,
}

impl SessionGuard {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BridgeError::internal("session is closed"));
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.client.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl NativeEngineClient for MockEngineClient {
    async fn open_query_session(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn QuerySession>> {
        if self.lock().database(descriptor.database()).is_none() {
            return Err(BridgeError::connection(format!(
                "Either the user does not have access to the '{}' database, or the database does not exist.",
                descriptor.database()
            )));
        }
        let guard = self.open(descriptor)?;
        Ok(Box::new(MockQuerySession {
            guard,
            columns: None,
            rows: VecDeque::new(),
        }))
    }

    async fn open_management_session(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn ManagementSession>> {
        let guard = self.open(descriptor)?;
        Ok(Box::new(MockManagementSession { guard }))
    }
}

struct MockQuerySession {
    guard: SessionGuard,
    columns: Option<Vec<NativeColumn>>,
    rows: VecDeque<NativeRow>,
}

impl MockQuerySession {
    /// Answers a canned query, or `EVALUATE <table>`.
    fn answer(&self, query: &str) -> Result<CannedQuery> {
        let state = self.guard.client.lock();
        let query = query.trim();
        if let Some(canned) = state.queries.get(query) {
            return Ok(canned.clone());
        }

        let mut words = query.splitn(2, char::is_whitespace);
        let keyword = words.next().unwrap_or_default();
        if !keyword.eq_ignore_ascii_case("EVALUATE") {
            return Err(BridgeError::query(format!(
                "Query (1, 1) The syntax for '{keyword}' is incorrect. ({query})."
            )));
        }

        let name = words.next().unwrap_or_default().trim();
        let name = name.trim_matches('\'');
        let table = state
            .database(&self.guard.database)
            .and_then(|tables| find_table(tables, name))
            .ok_or_else(|| {
                BridgeError::query(format!(
                    "Query (1, 10) Failed to resolve name '{name}'. It is not a valid table, variable, or function name."
                ))
            })?;

        Ok(CannedQuery {
            columns: table.native_columns(),
            rows: table.rows.clone(),
        })
    }
}

#[async_trait]
impl QuerySession for MockQuerySession {
    async fn execute(&mut self, query: &str) -> Result<()> {
        self.guard.ensure_open()?;
        let answer = self.answer(query)?;
        self.columns = Some(answer.columns);
        self.rows = answer.rows.into();
        Ok(())
    }

    fn read_schema(&self) -> Result<Vec<NativeColumn>> {
        self.columns
            .clone()
            .ok_or_else(|| BridgeError::internal("no query has been executed"))
    }

    async fn read_row(&mut self) -> Result<Option<NativeRow>> {
        self.guard.ensure_open()?;
        // Let concurrent sessions interleave between rows
        tokio::task::yield_now().await;
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> Result<()> {
        self.rows.clear();
        self.guard.close();
        Ok(())
    }
}

struct MockManagementSession {
    guard: SessionGuard,
}

#[async_trait]
impl ManagementSession for MockManagementSession {
    async fn locate(&mut self, target: &ProcessTarget) -> Result<bool> {
        self.guard.ensure_open()?;
        let state = self.guard.client.lock();
        let Some(tables) = state.database(target.database()) else {
            return Ok(false);
        };
        Ok(match target {
            ProcessTarget::Database { .. } => true,
            ProcessTarget::Table { table, .. } => find_table(tables, table).is_some(),
            ProcessTarget::Partition {
                table, partition, ..
            } => find_table(tables, table).is_some_and(|t| {
                t.partitions
                    .iter()
                    .any(|p| p.eq_ignore_ascii_case(partition))
            }),
        })
    }

    async fn process_object(
        &mut self,
        target: &ProcessTarget,
        mode: ProcessingMode,
    ) -> Result<Vec<String>> {
        self.guard.ensure_open()?;
        let mut state = self.guard.client.lock();
        if let Some(message) = &state.processing_error {
            return Err(BridgeError::processing(message.clone()));
        }

        let tables = state
            .database_mut(target.database())
            .ok_or_else(|| BridgeError::object_not_found(target.to_string()))?;
        match target.table() {
            None => tables.iter_mut().for_each(|t| t.refresh(mode)),
            Some(name) => {
                let table = tables
                    .iter_mut()
                    .find(|t| t.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| BridgeError::object_not_found(target.to_string()))?;
                table.refresh(mode);
            }
        }
        Ok(Vec::new())
    }

    async fn close(&mut self) -> Result<()> {
        self.guard.close();
        Ok(())
    }
}
