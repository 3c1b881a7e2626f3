//! Stream recording supervisor
//!
//! Polls a liveness endpoint for a set of monitored sources, runs one
//! fetch/transcode capture pipeline per live source, records arbitrary stream
//! URLs on demand with automatic restarts, and reconciles finished recordings
//! with a remote archive.

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod monitor;
pub mod services;
pub mod supervisor;
pub mod traits;

// Re-export commonly used types
pub use commands::{Command, CommandOutcome};
pub use config::SupervisorConfig;
pub use error::{SupervisorError, SupervisorResult};
pub use events::{EventBus, SupervisorEvent};
pub use monitor::{LivenessMonitor, TickReport, Watchlist};
pub use supervisor::Supervisor;
pub use traits::{CaptureControl, CaptureToolchain, Notification, Notifier, RemoteArchive, StatusSource};
