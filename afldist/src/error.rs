use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Error conditions of the orchestrator.
///
/// `InvalidConfig`, `ReservedFlagConflict` and `MissingCollaborator` are raised
/// before any process is spawned. The remaining variants describe conditions
/// that are recovered locally and only surface as values (see
/// [`crate::supervisor::SupervisionResult::failure`]) or in the log stream.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Flag {flag} is managed by afldist: {reason}")]
    ReservedFlagConflict { flag: String, reason: String },
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(String),
    #[error("Worker {instance} returned non-zero exit status {status}. Failed command: {command}")]
    WorkerExitFailure {
        instance: String,
        status: String,
        command: String,
    },
    #[error("Malformed telemetry: {0}")]
    MalformedTelemetry(String),
    #[error("Startup aborted: {0}")]
    StartupAbort(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
