//! Service implementations behind the supervisor traits

pub mod adhoc;
pub mod archive;
pub mod library;
pub mod notifier;
pub mod pipeline;
pub mod process;
pub mod status;
pub mod toolchain;
pub mod upload;

#[cfg(test)]
mod tests;

pub use adhoc::{AdHocInfo, AdHocRecorder, AdHocState};
pub use archive::RcloneArchive;
pub use library::{RecordingFile, RecordingsLibrary};
pub use notifier::{LogNotifier, NotifierChannel, WebhookNotifier};
pub use pipeline::{CapturePipelines, RecordingInfo};
pub use process::{ChildProcess, ProcessExit, StopSignal};
pub use status::TwitchStatusSource;
pub use toolchain::ExternalToolchain;
pub use upload::{UploadReconciler, UploadReport};
