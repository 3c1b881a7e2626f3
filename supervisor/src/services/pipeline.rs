//! Continuous capture pipelines
//!
//! One pipeline per monitored source: a fetch process streaming raw media to
//! stdout and a transcode process remuxing it into the output file. A relay
//! task copies the bytes between the two. The fetch process defines the
//! pipeline lifetime: when it exits the entry is dropped from the registry and
//! the source directory is reconciled with the remote archive.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::core::Registry;
use crate::core::artifacts::unique_output_path;
use crate::error::{SupervisorError, SupervisorResult};
use crate::events::{EventBus, SupervisorEvent};
use crate::services::process::{ChildProcess, StopSignal, spawn_output_drain};
use crate::services::upload::{UploadReconciler, UploadReport};
use crate::traits::{ActiveOutputs, CaptureControl, CaptureToolchain, StartOutcome, StopOutcome};
use shared::{Component, SourceKey, component_debug, component_error, component_info, component_warn};

/// Handle of one running pipeline
pub struct RecordingHandle {
    pub source: SourceKey,
    pub output: PathBuf,
    /// Distinguishes successive pipelines of the same source
    pub instance: Uuid,
    pub started_at: DateTime<Local>,
    fetch: Arc<ChildProcess>,
    transcode: Arc<ChildProcess>,
    close_input: Option<oneshot::Sender<()>>,
}

impl RecordingHandle {
    /// Signal end-of-input to the transcode stage
    fn close_input(&mut self) {
        if let Some(close) = self.close_input.take() {
            let _ = close.send(());
        }
    }

    fn info(&self) -> RecordingInfo {
        RecordingInfo {
            source: self.source.clone(),
            output: self.output.clone(),
            started_at: self.started_at,
            fetch_pid: self.fetch.pid(),
            transcode_pid: self.transcode.pid(),
        }
    }
}

/// Snapshot of a running pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingInfo {
    pub source: SourceKey,
    pub output: PathBuf,
    pub started_at: DateTime<Local>,
    pub fetch_pid: Option<u32>,
    pub transcode_pid: Option<u32>,
}

struct PipelinesInner {
    registry: Mutex<Registry<SourceKey, RecordingHandle>>,
    /// Outputs whose transcode stage has not exited yet. Outlives the registry
    /// entry of a stopped pipeline while the stage finishes the file.
    writing: Mutex<BTreeSet<PathBuf>>,
    toolchain: Arc<dyn CaptureToolchain>,
    config: Arc<SupervisorConfig>,
    uploads: Option<UploadReconciler>,
    events: EventBus,
}

/// Registry of running pipelines plus the operations on it. Cheap to clone.
#[derive(Clone)]
pub struct CapturePipelines {
    inner: Arc<PipelinesInner>,
}

impl CapturePipelines {
    pub fn new(
        config: Arc<SupervisorConfig>,
        toolchain: Arc<dyn CaptureToolchain>,
        uploads: Option<UploadReconciler>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(PipelinesInner {
                registry: Mutex::new(Registry::new()),
                writing: Mutex::new(BTreeSet::new()),
                toolchain,
                config,
                uploads,
                events,
            }),
        }
    }

    /// Start recording `source` unless a pipeline for it already runs.
    ///
    /// The existence check, both spawns and the registration happen under one
    /// registry lock, so concurrent starts for a key yield a single pipeline.
    pub async fn start(&self, source: &SourceKey) -> SupervisorResult<StartOutcome> {
        let component = Component::Pipeline(source.clone());
        let mut registry = self.inner.registry.lock().await;
        if registry.has(source) {
            component_debug!(component, "Already recording");
            return Ok(StartOutcome::AlreadyRecording);
        }

        let handle = self.launch(source, &component).await.inspect_err(|e| {
            component_error!(component, "❌ Failed to start recording: {}", e);
        })?;

        let output = handle.output.clone();
        let instance = handle.instance;
        let fetch = handle.fetch.clone();
        let transcode = handle.transcode.clone();
        if registry.put(source.clone(), handle).is_err() {
            // Unreachable while the lock is held since the `has` check
            self.release_output(&output).await;
            return Ok(StartOutcome::AlreadyRecording);
        }
        drop(registry);

        self.watch_fetch(source.clone(), instance, output.clone(), fetch, transcode.clone());
        self.watch_transcode(source.clone(), instance, output.clone(), transcode);

        component_info!(component, "🔴 Recording to {}", output.display());
        self.inner.events.publish(SupervisorEvent::RecordingStarted {
            source: source.clone(),
            output: output.clone(),
        });
        Ok(StartOutcome::Started { output })
    }

    /// Spawn both stages and the relay; nothing is left running on failure
    async fn launch(&self, source: &SourceKey, component: &Component) -> SupervisorResult<RecordingHandle> {
        let config = &self.inner.config;
        let dir = config.source_dir(source);
        tokio::fs::create_dir_all(&dir).await?;
        let output = unique_output_path(
            &dir,
            &format!("twitch-{source}"),
            &config.recording_extension,
            Local::now(),
        );

        let mut fetch_cmd = self.inner.toolchain.fetch_command(source);
        fetch_cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        let (fetch, fetch_io) = ChildProcess::spawn(&mut fetch_cmd, "fetch")?;

        // Registered before the file can exist
        self.inner.writing.lock().await.insert(output.clone());
        let mut transcode_cmd = self.inner.toolchain.transcode_command(&output);
        transcode_cmd.stdin(Stdio::piped()).stdout(Stdio::null()).stderr(Stdio::piped());
        let (transcode, transcode_io) = match ChildProcess::spawn(&mut transcode_cmd, "transcode") {
            Ok(spawned) => spawned,
            Err(e) => {
                kill_orphans(&[&fetch], component);
                self.release_output(&output).await;
                return Err(e);
            }
        };

        let (Some(stdout), Some(stdin)) = (fetch_io.stdout, transcode_io.stdin) else {
            kill_orphans(&[&fetch, &transcode], component);
            self.release_output(&output).await;
            return Err(SupervisorError::Io(std::io::Error::other("pipeline stdio was not captured")));
        };
        if let Some(stderr) = fetch_io.stderr {
            spawn_output_drain(stderr, component.clone(), "fetch");
        }
        if let Some(stderr) = transcode_io.stderr {
            spawn_output_drain(stderr, component.clone(), "transcode");
        }

        let (close_tx, close_rx) = oneshot::channel();
        spawn_relay(stdout, stdin, close_rx, component.clone());

        Ok(RecordingHandle {
            source: source.clone(),
            output,
            instance: Uuid::new_v4(),
            started_at: Local::now(),
            fetch: Arc::new(fetch),
            transcode: Arc::new(transcode),
            close_input: Some(close_tx),
        })
    }

    /// Stop the pipeline of `source`.
    ///
    /// Closes the transcode input, sends SIGTERM to both stages and removes the
    /// entry straight away. Stages still running after the stop grace period are
    /// killed in the background.
    pub async fn stop(&self, source: &SourceKey) -> SupervisorResult<StopOutcome> {
        let component = Component::Pipeline(source.clone());
        let Some(mut handle) = self.inner.registry.lock().await.remove(source) else {
            return Ok(StopOutcome::NotFound);
        };

        handle.close_input();
        for process in [&handle.fetch, &handle.transcode] {
            if let Err(e) = process.signal(StopSignal::Terminate) {
                component_warn!(component, "⚠️ Could not stop {}: {}", process.label(), e);
            }
        }

        let grace = self.inner.config.stop_grace();
        let stages = [handle.fetch.clone(), handle.transcode.clone()];
        tokio::spawn(async move {
            let escalations = stages.iter().map(|process| kill_after(process, grace, &component));
            futures_util::future::join_all(escalations).await;
        });

        component_info!(
            Component::Pipeline(source.clone()),
            "⏹️ Stopped recording {}",
            handle.output.display()
        );
        Ok(StopOutcome::Stopped)
    }

    /// Stop every pipeline
    pub async fn stop_all(&self) -> usize {
        let keys = self.inner.registry.lock().await.keys();
        let mut stopped = 0;
        for key in keys {
            if let Ok(StopOutcome::Stopped) = self.stop(&key).await {
                stopped += 1;
            }
        }
        stopped
    }

    pub async fn is_recording(&self, source: &SourceKey) -> bool {
        self.inner.registry.lock().await.has(source)
    }

    pub async fn get(&self, source: &SourceKey) -> Option<RecordingInfo> {
        self.inner.registry.lock().await.get(source).map(RecordingHandle::info)
    }

    /// Running pipelines ordered by source
    pub async fn active(&self) -> Vec<RecordingInfo> {
        let mut active: Vec<_> = self
            .inner
            .registry
            .lock()
            .await
            .iter()
            .map(|(_, handle)| handle.info())
            .collect();
        active.sort_by(|a, b| a.source.cmp(&b.source));
        active
    }

    /// Reconcile the finished files in the directory of `source` with the
    /// remote archive now
    pub fn spawn_upload(&self, source: &SourceKey) -> Option<JoinHandle<Option<UploadReport>>> {
        let uploads = self.inner.uploads.as_ref()?;
        let config = &self.inner.config;
        Some(uploads.spawn_reconcile(
            config.source_dir(source),
            config.remote_target(source.as_str()),
            Some(Arc::new(self.clone())),
        ))
    }

    async fn release_output(&self, output: &Path) {
        self.inner.writing.lock().await.remove(output);
    }

    /// Fetch exit ends the pipeline: drop the entry (if it is still ours),
    /// let the transcode stage drain, then reconcile the source directory.
    fn watch_fetch(
        &self,
        source: SourceKey,
        instance: Uuid,
        output: PathBuf,
        fetch: Arc<ChildProcess>,
        transcode: Arc<ChildProcess>,
    ) {
        let pipelines = self.clone();
        tokio::spawn(async move {
            let component = Component::Pipeline(source.clone());
            let exit = fetch.wait().await;

            let removed = pipelines
                .inner
                .registry
                .lock()
                .await
                .remove_if(&source, |handle| handle.instance == instance);
            // The relay drains what fetch left in the pipe and closes the input itself
            match removed {
                Some(_) => component_info!(component, "📴 Stream ended ({}), recording finished", exit),
                None => component_debug!(component, "Fetch exited after stop ({})", exit),
            }
            pipelines.inner.events.publish(SupervisorEvent::RecordingEnded {
                source: source.clone(),
                exit,
            });

            let grace = pipelines.inner.config.stop_grace();
            if timeout(grace, transcode.wait()).await.is_err() {
                component_warn!(component, "⏱️ Transcode still running {:?} after input ended", grace);
                transcode.terminate(StopSignal::Terminate, grace, &component).await;
            }
            pipelines.release_output(&output).await;

            if let Some(upload) = pipelines.spawn_upload(&source) {
                if upload.await.is_err() {
                    component_debug!(component, "Upload task was cancelled");
                }
            }
        });
    }

    /// Transcode exit is observed on its own. If it dies while fetch still
    /// feeds it, the pipeline is stopped so the next tick can start a fresh one.
    fn watch_transcode(&self, source: SourceKey, instance: Uuid, output: PathBuf, transcode: Arc<ChildProcess>) {
        let pipelines = self.clone();
        tokio::spawn(async move {
            let component = Component::Pipeline(source.clone());
            let exit = transcode.wait().await;
            pipelines.release_output(&output).await;

            let still_ours = pipelines
                .inner
                .registry
                .lock()
                .await
                .get(&source)
                .is_some_and(|handle| handle.instance == instance);
            if still_ours && !exit.success() {
                component_error!(component, "❌ Transcode failed ({}), stopping pipeline", exit);
                if let Err(e) = pipelines.stop(&source).await {
                    component_warn!(component, "⚠️ Could not stop pipeline: {}", e);
                }
            } else {
                component_debug!(component, "Transcode exited ({})", exit);
            }

            pipelines
                .inner
                .events
                .publish(SupervisorEvent::TranscodeExited { source, exit });
        });
    }
}

#[async_trait]
impl CaptureControl for CapturePipelines {
    async fn is_recording(&self, source: &SourceKey) -> bool {
        CapturePipelines::is_recording(self, source).await
    }

    async fn start(&self, source: &SourceKey) -> SupervisorResult<StartOutcome> {
        CapturePipelines::start(self, source).await
    }

    async fn stop(&self, source: &SourceKey) -> SupervisorResult<StopOutcome> {
        CapturePipelines::stop(self, source).await
    }
}

#[async_trait]
impl ActiveOutputs for CapturePipelines {
    async fn active_outputs(&self) -> Vec<PathBuf> {
        self.inner.writing.lock().await.iter().cloned().collect()
    }
}

/// Copy fetch stdout into transcode stdin until end of stream or an explicit
/// `close`. Dropping the sender does not interrupt the copy.
fn spawn_relay(mut stdout: ChildStdout, mut stdin: ChildStdin, close: oneshot::Receiver<()>, component: Component) {
    tokio::spawn(async move {
        tokio::select! {
            copied = tokio::io::copy(&mut stdout, &mut stdin) => match copied {
                Ok(bytes) => component_debug!(component, "Relay reached end of stream after {} bytes", bytes),
                Err(e) => component_debug!(component, "Relay interrupted: {}", e),
            },
            Ok(()) = close => component_debug!(component, "Relay closed on stop"),
        }
        let _ = stdin.shutdown().await;
    });
}

fn kill_orphans(processes: &[&ChildProcess], component: &Component) {
    for process in processes {
        if let Err(e) = process.signal(StopSignal::Kill) {
            component_warn!(component, "⚠️ Could not kill orphaned {}: {}", process.label(), e);
        }
    }
}

async fn kill_after(process: &ChildProcess, grace: Duration, component: &Component) {
    if timeout(grace, process.wait()).await.is_ok() {
        return;
    }
    component_warn!(component, "⏱️ {} ignored SIGTERM for {:?}, killing", process.label(), grace);
    if let Err(e) = process.signal(StopSignal::Kill) {
        component_warn!(component, "⚠️ Could not kill {}: {}", process.label(), e);
    }
}
