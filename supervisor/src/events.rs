//! Lifecycle events published by the supervisor
//!
//! Events are fire-and-forget: with no subscriber they are dropped.

use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::services::process::ProcessExit;
use shared::{RecordingId, SourceKey};

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    RecordingStarted {
        source: SourceKey,
        output: PathBuf,
    },
    /// The fetch stage exited and the pipeline is over
    RecordingEnded {
        source: SourceKey,
        exit: ProcessExit,
    },
    TranscodeExited {
        source: SourceKey,
        exit: ProcessExit,
    },
    AdHocStarted {
        id: RecordingId,
        output: PathBuf,
    },
    AdHocRestarted {
        id: RecordingId,
        attempt: u32,
    },
    AdHocGaveUp {
        id: RecordingId,
        attempts: u32,
    },
    AdHocFinalized {
        id: RecordingId,
        output: PathBuf,
    },
    UploadFinished {
        remote_target: String,
        uploaded: Vec<String>,
        failed: Vec<String>,
    },
}

/// Cloneable publisher over a broadcast channel
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: SupervisorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
