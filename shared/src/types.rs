//! Core identifiers shared across the recording supervisor

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{SharedError, SharedResult};

/// Stable name of a continuously monitored stream (e.g. a channel login)
///
/// Source keys double as directory names under the recordings root, so they
/// are restricted to a single path component without whitespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceKey(String);

impl SourceKey {
    pub fn new(key: impl Into<String>) -> SharedResult<Self> {
        let key = key.into();
        let trimmed = key.trim();

        if trimmed.is_empty()
            || trimmed == "."
            || trimmed == ".."
            || trimmed.contains(['/', '\\'])
            || trimmed.chars().any(char::is_whitespace)
        {
            return Err(SharedError::InvalidSourceKey { input: key });
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SourceKey {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SourceKey {
    type Error = SharedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SourceKey> for String {
    fn from(key: SourceKey) -> Self {
        key.0
    }
}

/// Generated identifier of an ad-hoc recording: four random bytes, hex encoded
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordingId(String);

impl RecordingId {
    const BYTES: usize = 4;

    /// Generate a fresh random id. Uniqueness within the process is enforced
    /// by the registry that stores it, not here.
    pub fn generate() -> Self {
        let bytes: [u8; Self::BYTES] = rand::random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn parse(input: &str) -> SharedResult<Self> {
        let input = input.trim();
        let valid = input.len() == Self::BYTES * 2 && input.chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(SharedError::InvalidRecordingId {
                input: input.to_string(),
            });
        }
        Ok(Self(input.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordingId {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Component tag attached to every log line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Component {
    /// Facade, command handling and binary lifecycle
    Supervisor,
    /// Periodic liveness poll
    Monitor,
    /// Continuous fetch/transcode pipeline for one source
    Pipeline(SourceKey),
    /// On-demand capture of an arbitrary URL
    AdHoc(RecordingId),
    /// Remote archive reconciliation
    Upload,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Supervisor => write!(f, "supervisor"),
            Component::Monitor => write!(f, "monitor"),
            Component::Pipeline(key) => write!(f, "pipeline:{key}"),
            Component::AdHoc(id) => write!(f, "adhoc:{id}"),
            Component::Upload => write!(f, "upload"),
        }
    }
}
