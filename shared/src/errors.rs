//! Shared error types for the recording supervisor

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Invalid source key: {input:?}")]
    InvalidSourceKey { input: String },

    #[error("Invalid recording id: {input:?}")]
    InvalidRecordingId { input: String },

    #[error("Invalid configuration: {field} = {value}")]
    InvalidConfig { field: String, value: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
