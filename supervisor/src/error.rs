//! Supervisor-specific error types

use shared::SharedError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Caller {caller:?} is not allowed to issue commands")]
    Unauthorized { caller: String },

    #[error("Remote command failed ({command}, status {status:?}): {stderr}")]
    RemoteCommand {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Status query failed for {source_key}: {message}")]
    StatusQuery { source_key: String, message: String },

    #[error("Notification delivery failed: {message}")]
    Notification { message: String },

    #[error("Failed to signal pid {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error("Configuration error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SupervisorError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found(what: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            what,
            key: key.to_string(),
        }
    }

    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
