//! Trait definitions with mockall annotations for testing
//!
//! These are the seams between the supervisor core and the outside world:
//! the status endpoint, the notification channel, the remote archive, the
//! capture toolchain, and the capture pipelines as seen by the monitor.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::error::SupervisorResult;
use shared::SourceKey;

/// Result of asking for a pipeline to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { output: PathBuf },
    AlreadyRecording,
}

/// Result of asking for a recording to stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotFound,
}

/// Consolidated human-readable message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    /// RGB colour of the embed
    pub color: u32,
}

impl Notification {
    pub const GREEN: u32 = 0x00ff00;
    pub const LAWN_GREEN: u32 = 0x7cfc00;
    pub const RED: u32 = 0xff0000;
    pub const BLUE: u32 = 0x0099ff;

    pub fn new(title: impl Into<String>, description: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            color,
        }
    }
}

/// External liveness source
#[mockall::automock]
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Whether `source` is producing live content right now.
    ///
    /// Errors are transient; callers treat them as "not live".
    async fn is_live(&self, source: &SourceKey) -> SupervisorResult<bool>;
}

/// Outbound notification channel
#[mockall::automock]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> SupervisorResult<()>;
}

/// Remote archive primitives
#[mockall::automock]
#[async_trait]
pub trait RemoteArchive: Send + Sync {
    /// Create `target`; an already existing directory is success
    async fn ensure_dir(&self, target: &str) -> SupervisorResult<()>;

    /// File names directly under `target`
    async fn list(&self, target: &str) -> SupervisorResult<Vec<String>>;

    /// Copy one local file into `target`, keeping its name
    async fn copy(&self, local: &Path, target: &str) -> SupervisorResult<()>;
}

/// Continuous capture control as driven by the liveness monitor
#[mockall::automock]
#[async_trait]
pub trait CaptureControl: Send + Sync {
    async fn is_recording(&self, source: &SourceKey) -> bool;

    async fn start(&self, source: &SourceKey) -> SupervisorResult<StartOutcome>;

    async fn stop(&self, source: &SourceKey) -> SupervisorResult<StopOutcome>;
}

/// Output files still being written by a capture service
#[mockall::automock]
#[async_trait]
pub trait ActiveOutputs: Send + Sync {
    async fn active_outputs(&self) -> Vec<PathBuf>;
}

/// Builds the external capture commands
///
/// Implementations only describe the invocation; stdio wiring and spawning
/// stay with the callers.
#[mockall::automock]
pub trait CaptureToolchain: Send + Sync {
    /// Stage 1: stream raw media of `source` to stdout
    fn fetch_command(&self, source: &SourceKey) -> Command;

    /// Stage 2: remux stdin into a finished container at `output`
    fn transcode_command(&self, output: &Path) -> Command;

    /// Single-process capture of an arbitrary URL into `output`
    fn adhoc_command(&self, url: &str, output: &Path) -> Command;
}
