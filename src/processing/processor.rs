//! Synchronous model processing.
//!
//! Each call opens its own management session, walks
//! Idle -> Connecting -> Locating -> Issuing -> {Succeeded | Failed},
//! and closes the session before returning. There is no retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{ProcessTarget, ProcessingMode, ProcessingOutcome, ProcessingState};
use crate::connection::ConnectionDescriptor;
use crate::db::{ManagementSession, NativeEngineClient};
use crate::error::{BridgeError, Result};

/// Issues refresh commands against a model, its tables, or partitions.
#[derive(Clone)]
pub struct ModelProcessor {
    client: Arc<dyn NativeEngineClient>,
}

impl ModelProcessor {
    /// Creates a processor over the given engine client.
    pub fn new(client: Arc<dyn NativeEngineClient>) -> Self {
        Self { client }
    }

    /// Processes the object at `object_path` and waits for completion.
    ///
    /// Fails with `ConnectionFailed`, `ObjectNotFound` or `ProcessingFailed`,
    /// carrying the engine's diagnostic text.
    pub async fn process(
        &self,
        descriptor: &ConnectionDescriptor,
        object_path: &str,
        mode: ProcessingMode,
    ) -> Result<ProcessingOutcome> {
        let target = ProcessTarget::resolve(object_path, descriptor.database())?;
        let (outcome, result) = self.run(descriptor, &target, mode).await;
        result.map(|()| outcome)
    }

    /// Processes the whole model of the descriptor's database.
    pub async fn process_database(
        &self,
        descriptor: &ConnectionDescriptor,
        mode: ProcessingMode,
    ) -> Result<ProcessingOutcome> {
        let target = ProcessTarget::Database {
            database: descriptor.database().to_string(),
        };
        let (outcome, result) = self.run(descriptor, &target, mode).await;
        result.map(|()| outcome)
    }

    /// Processes one table. The name is used as-is, without path splitting.
    pub async fn process_table(
        &self,
        descriptor: &ConnectionDescriptor,
        table: &str,
        mode: ProcessingMode,
    ) -> Result<ProcessingOutcome> {
        if table.trim().is_empty() {
            return Err(BridgeError::invalid_configuration(
                "a table name is required to process a table",
            ));
        }
        let target = ProcessTarget::Table {
            database: descriptor.database().to_string(),
            table: table.to_string(),
        };
        let (outcome, result) = self.run(descriptor, &target, mode).await;
        result.map(|()| outcome)
    }

    /// Like [`process`](Self::process), but reports failures inside the
    /// outcome instead of returning an error.
    pub async fn process_report(
        &self,
        descriptor: &ConnectionDescriptor,
        object_path: &str,
        mode: ProcessingMode,
    ) -> ProcessingOutcome {
        match ProcessTarget::resolve(object_path, descriptor.database()) {
            Ok(target) => self.run(descriptor, &target, mode).await.0,
            Err(e) => ProcessingOutcome {
                target: object_path.to_string(),
                mode,
                state: ProcessingState::Failed,
                error: Some(e.detail().to_string()),
                warnings: Vec::new(),
                duration: Duration::ZERO,
            },
        }
    }

    /// Runs one attempt. The session, once opened, is closed on every path.
    async fn run(
        &self,
        descriptor: &ConnectionDescriptor,
        target: &ProcessTarget,
        mode: ProcessingMode,
    ) -> (ProcessingOutcome, Result<()>) {
        let start = Instant::now();
        let mut state = ProcessingState::Idle;

        transition(&mut state, ProcessingState::Connecting, target);
        let result = match self.client.open_management_session(descriptor).await {
            Ok(mut session) => {
                let result = drive(session.as_mut(), target, mode, &mut state).await;
                if let Err(e) = session.close().await {
                    warn!("Failed to close management session: {}", e);
                }
                result
            }
            Err(e) => Err(e),
        };

        let mut outcome = ProcessingOutcome {
            target: target.to_string(),
            mode,
            state,
            error: None,
            warnings: Vec::new(),
            duration: start.elapsed(),
        };

        match result {
            Ok(warnings) => {
                transition(&mut state, ProcessingState::Succeeded, target);
                info!(
                    "Processed {} ({}) in {:?}",
                    target, mode, outcome.duration
                );
                outcome.state = state;
                outcome.warnings = warnings;
                (outcome, Ok(()))
            }
            Err(e) => {
                transition(&mut state, ProcessingState::Failed, target);
                warn!("Processing {} ({}) failed: {}", target, mode, e);
                outcome.state = state;
                outcome.error = Some(e.detail().to_string());
                (outcome, Err(e))
            }
        }
    }
}

async fn drive(
    session: &mut dyn ManagementSession,
    target: &ProcessTarget,
    mode: ProcessingMode,
    state: &mut ProcessingState,
) -> Result<Vec<String>> {
    transition(state, ProcessingState::Locating, target);
    if !session.locate(target).await? {
        return Err(BridgeError::object_not_found(target.to_string()));
    }

    transition(state, ProcessingState::Issuing, target);
    let warnings = session.process_object(target, mode).await?;
    for warning in &warnings {
        warn!("{}: {}", target, warning);
    }
    Ok(warnings)
}

fn transition(state: &mut ProcessingState, next: ProcessingState, target: &ProcessTarget) {
    debug!("Processing {}: {:?} -> {:?}", target, state, next);
    *state = next;
}
