//! On-demand recordings of arbitrary stream URLs
//!
//! Each recording is one capture process supervised by its own task. The
//! task restarts the process after abnormal exits (bounded by the restart
//! policy), and once the recording is over it reconciles the output file name,
//! drops the registry entry and hands the folder to the upload reconciler.
//!
//! States: `Running -> Restarting -> Running` on abnormal exit;
//! `Running -> Finalizing -> removed` on stop, normal exit, or when the
//! restart budget is spent.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use url::Url;

use crate::config::SupervisorConfig;
use crate::core::artifacts::{finalize_alternate, finalize_part, unique_output_path};
use crate::core::{Registry, RestartPolicy, RestartTracker};
use crate::error::{SupervisorError, SupervisorResult};
use crate::events::{EventBus, SupervisorEvent};
use crate::services::process::{ChildProcess, ProcessExit, StopSignal, spawn_output_drain};
use crate::services::upload::UploadReconciler;
use crate::traits::{ActiveOutputs, CaptureToolchain, StopOutcome};
use shared::{Component, RecordingId, component_error, component_info, component_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdHocState {
    Running,
    Restarting,
    Finalizing,
}

impl std::fmt::Display for AdHocState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdHocState::Running => write!(f, "running"),
            AdHocState::Restarting => write!(f, "restarting"),
            AdHocState::Finalizing => write!(f, "finalizing"),
        }
    }
}

struct AdHocEntry {
    url: String,
    output: PathBuf,
    state: AdHocState,
    /// `None` while waiting to restart
    process: Option<Arc<ChildProcess>>,
    stop_requested: bool,
    stop_notify: Arc<Notify>,
    started_at: DateTime<Local>,
    restarts: u32,
}

/// Snapshot of an ad-hoc recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdHocInfo {
    pub id: RecordingId,
    pub url: String,
    pub output: PathBuf,
    pub state: AdHocState,
    pub started_at: DateTime<Local>,
    pub restarts: u32,
}

/// Why the supervision loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Completed,
    Stopped,
    /// Restarts attempted before the policy ran out
    GaveUp(u32),
}

/// What to do after the capture process exited
enum AfterExit {
    Restart(Duration),
    Finish(Ending),
    Gone,
}

struct AdHocInner {
    registry: Mutex<Registry<RecordingId, AdHocEntry>>,
    toolchain: Arc<dyn CaptureToolchain>,
    config: Arc<SupervisorConfig>,
    policy: RestartPolicy,
    uploads: Option<UploadReconciler>,
    events: EventBus,
}

#[derive(Clone)]
pub struct AdHocRecorder {
    inner: Arc<AdHocInner>,
}

impl AdHocRecorder {
    pub fn new(
        config: Arc<SupervisorConfig>,
        toolchain: Arc<dyn CaptureToolchain>,
        uploads: Option<UploadReconciler>,
        events: EventBus,
    ) -> Self {
        let policy = RestartPolicy::from(&config.restart);
        Self {
            inner: Arc::new(AdHocInner {
                registry: Mutex::new(Registry::new()),
                toolchain,
                config,
                policy,
                uploads,
                events,
            }),
        }
    }

    /// Start capturing `url`; returns the new id and the output path
    pub async fn start(&self, url: &str) -> SupervisorResult<(RecordingId, PathBuf)> {
        let url = parse_stream_url(url)?;
        let dir = self.inner.config.adhoc_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let mut registry = self.inner.registry.lock().await;
        let id = std::iter::repeat_with(RecordingId::generate)
            .find(|id| !registry.has(id))
            .unwrap_or_else(RecordingId::generate);
        let component = Component::AdHoc(id.clone());
        let output = unique_output_path(
            &dir,
            &format!("m3u8-{id}"),
            &self.inner.config.recording_extension,
            Local::now(),
        );

        let process = self.spawn_capture(&url, &output, &component).inspect_err(|e| {
            component_error!(component, "❌ Failed to start recording of {}: {}", url, e);
        })?;
        let entry = AdHocEntry {
            url: url.clone(),
            output: output.clone(),
            state: AdHocState::Running,
            process: Some(process.clone()),
            stop_requested: false,
            stop_notify: Arc::new(Notify::new()),
            started_at: Local::now(),
            restarts: 0,
        };
        if registry.put(id.clone(), entry).is_err() {
            let _ = process.signal(StopSignal::Kill);
            return Err(SupervisorError::invalid_input(format!("recording id {id} is already in use")));
        }
        drop(registry);

        component_info!(component, "🔴 Recording {} to {}", url, output.display());
        self.inner.events.publish(SupervisorEvent::AdHocStarted {
            id: id.clone(),
            output: output.clone(),
        });

        let recorder = self.clone();
        let supervised = id.clone();
        tokio::spawn(async move { recorder.supervise(supervised, process).await });

        Ok((id, output))
    }

    fn spawn_capture(
        &self,
        url: &str,
        output: &std::path::Path,
        component: &Component,
    ) -> SupervisorResult<Arc<ChildProcess>> {
        let mut cmd = self.inner.toolchain.adhoc_command(url, output);
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        let (process, stdio) = ChildProcess::spawn(&mut cmd, "capture")?;
        if let Some(stdout) = stdio.stdout {
            spawn_output_drain(stdout, component.clone(), "stdout");
        }
        if let Some(stderr) = stdio.stderr {
            spawn_output_drain(stderr, component.clone(), "stderr");
        }
        Ok(Arc::new(process))
    }

    /// Ask recording `id` to stop.
    ///
    /// The capture process gets SIGINT so it can finish its file, and is killed
    /// if it is still running after the ad-hoc grace period. Finalisation and
    /// upload happen once it has exited. Unknown ids report `NotFound`;
    /// repeated stops are no-ops.
    pub async fn stop(&self, id: &RecordingId) -> SupervisorResult<StopOutcome> {
        let component = Component::AdHoc(id.clone());
        let process = {
            let mut registry = self.inner.registry.lock().await;
            let Some(entry) = registry.get_mut(id) else {
                return Ok(StopOutcome::NotFound);
            };
            if entry.stop_requested {
                return Ok(StopOutcome::Stopped);
            }
            entry.stop_requested = true;
            entry.stop_notify.notify_one();
            entry.process.clone()
        };

        component_info!(component, "⏹️ Stop requested");
        if let Some(process) = process {
            let grace = self.inner.config.adhoc_stop_grace();
            tokio::spawn(async move {
                process.terminate(StopSignal::Interrupt, grace, &component).await;
            });
        }
        Ok(StopOutcome::Stopped)
    }

    /// Stop every recording and wait (bounded) for them to be finalised
    pub async fn stop_all(&self) -> usize {
        let ids = self.inner.registry.lock().await.keys();
        let mut stopped = 0;
        for id in &ids {
            if let Ok(StopOutcome::Stopped) = self.stop(id).await {
                stopped += 1;
            }
        }

        let deadline = tokio::time::Instant::now() + self.inner.config.adhoc_stop_grace() + Duration::from_secs(5);
        while !self.inner.registry.lock().await.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        stopped
    }

    pub async fn get(&self, id: &RecordingId) -> Option<AdHocInfo> {
        let registry = self.inner.registry.lock().await;
        registry.get(id).map(|entry| info(id, entry))
    }

    /// Active recordings, oldest first
    pub async fn list(&self) -> Vec<AdHocInfo> {
        let registry = self.inner.registry.lock().await;
        let mut list: Vec<_> = registry.iter().map(|(id, entry)| info(id, entry)).collect();
        list.sort_by_key(|info| info.started_at);
        list
    }

    async fn supervise(self, id: RecordingId, mut process: Arc<ChildProcess>) {
        let component = Component::AdHoc(id.clone());
        let mut tracker = RestartTracker::new();

        let ending = loop {
            let exit = process.wait().await;
            let run_time = process.uptime();
            self.reconcile_part(&id, &component).await;

            match self.after_exit(&id, &exit, run_time, &mut tracker).await {
                AfterExit::Gone => return,
                AfterExit::Finish(ending) => {
                    component_info!(component, "Capture exited ({}), finalizing", exit);
                    break ending;
                }
                AfterExit::Restart(delay) => {
                    component_warn!(
                        component,
                        "🔄 Capture exited abnormally ({}), restarting in {:?} (attempt {})",
                        exit,
                        delay,
                        tracker.consecutive_failures()
                    );
                    match self.restart(&id, delay, &mut tracker, &component).await {
                        Ok(next) => process = next,
                        Err(ending) => break ending,
                    }
                }
            }
        };

        self.finish(&id, ending, &component).await;
    }

    async fn reconcile_part(&self, id: &RecordingId, component: &Component) {
        let output = self.inner.registry.lock().await.get(id).map(|entry| entry.output.clone());
        if let Some(output) = output {
            match finalize_part(&output).await {
                Ok(true) => component_info!(component, "Renamed partial file to {}", output.display()),
                Ok(false) => {}
                Err(e) => component_warn!(component, "⚠️ Could not rename partial file: {}", e),
            }
        }
    }

    /// Decide between restart and finalisation, atomically with `stop`
    async fn after_exit(
        &self,
        id: &RecordingId,
        exit: &ProcessExit,
        run_time: Duration,
        tracker: &mut RestartTracker,
    ) -> AfterExit {
        let mut registry = self.inner.registry.lock().await;
        let Some(entry) = registry.get_mut(id) else {
            return AfterExit::Gone;
        };
        entry.process = None;

        if entry.stop_requested {
            entry.state = AdHocState::Finalizing;
            return AfterExit::Finish(Ending::Stopped);
        }
        if exit.success() {
            entry.state = AdHocState::Finalizing;
            return AfterExit::Finish(Ending::Completed);
        }
        match tracker.on_abnormal_exit(&self.inner.policy, run_time) {
            Some(delay) => {
                entry.state = AdHocState::Restarting;
                AfterExit::Restart(delay)
            }
            None => {
                entry.state = AdHocState::Finalizing;
                AfterExit::Finish(Ending::GaveUp(tracker.total_restarts()))
            }
        }
    }

    /// Wait out the backoff and respawn with the same id and output path.
    /// A stop request cuts the wait short.
    async fn restart(
        &self,
        id: &RecordingId,
        mut delay: Duration,
        tracker: &mut RestartTracker,
        component: &Component,
    ) -> Result<Arc<ChildProcess>, Ending> {
        loop {
            let stop_notify = match self.inner.registry.lock().await.get(id) {
                Some(entry) => entry.stop_notify.clone(),
                None => return Err(Ending::Stopped),
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_notify.notified() => {}
            }

            let mut registry = self.inner.registry.lock().await;
            let Some(entry) = registry.get_mut(id) else {
                return Err(Ending::Stopped);
            };
            if entry.stop_requested {
                entry.state = AdHocState::Finalizing;
                return Err(Ending::Stopped);
            }

            match self.spawn_capture(&entry.url, &entry.output, component) {
                Ok(process) => {
                    entry.process = Some(process.clone());
                    entry.state = AdHocState::Running;
                    entry.restarts += 1;
                    let attempt = entry.restarts;
                    drop(registry);

                    component_info!(component, "🔄 Restarted capture (restart #{})", attempt);
                    self.inner.events.publish(SupervisorEvent::AdHocRestarted {
                        id: id.clone(),
                        attempt,
                    });
                    return Ok(process);
                }
                Err(e) => {
                    component_error!(component, "❌ Restart failed: {}", e);
                    match tracker.on_abnormal_exit(&self.inner.policy, Duration::ZERO) {
                        Some(next) => delay = next,
                        None => {
                            entry.state = AdHocState::Finalizing;
                            return Err(Ending::GaveUp(tracker.total_restarts()));
                        }
                    }
                }
            }
        }
    }

    /// Reconcile artifacts, drop the entry, then upload the settled files of
    /// the ad-hoc folder
    async fn finish(&self, id: &RecordingId, ending: Ending, component: &Component) {
        let output = self.inner.registry.lock().await.get(id).map(|entry| entry.output.clone());
        let Some(output) = output else {
            return;
        };

        if let Ending::GaveUp(attempts) = ending {
            component_error!(component, "🛑 Giving up after {} failed restarts", attempts);
            self.inner.events.publish(SupervisorEvent::AdHocGaveUp {
                id: id.clone(),
                attempts,
            });
        }

        // Stopping may leave the merged file in a fallback container
        if ending != Ending::Completed {
            match finalize_alternate(&output).await {
                Ok(Some(from)) => component_info!(component, "Renamed {} to {}", from.display(), output.display()),
                Ok(None) => {}
                Err(e) => component_warn!(component, "⚠️ Could not rename alternate container: {}", e),
            }
        }

        self.inner.registry.lock().await.remove(id);
        component_info!(component, "✅ Recording finished: {}", output.display());
        self.inner.events.publish(SupervisorEvent::AdHocFinalized {
            id: id.clone(),
            output: output.clone(),
        });

        // Other recordings share the folder and keep writing under their final names
        if let Some(ref uploads) = self.inner.uploads {
            let config = &self.inner.config;
            let target = config.remote_target(&config.adhoc_folder);
            if let Err(e) = uploads.reconcile_settled(&config.adhoc_dir(), &target, self).await {
                component_warn!(component, "⚠️ Upload to {} failed: {}", target, e);
            }
        }
    }
}

#[async_trait]
impl ActiveOutputs for AdHocRecorder {
    /// Every registered recording, finalizing ones included
    async fn active_outputs(&self) -> Vec<PathBuf> {
        let registry = self.inner.registry.lock().await;
        registry.iter().map(|(_, entry)| entry.output.clone()).collect()
    }
}

fn info(id: &RecordingId, entry: &AdHocEntry) -> AdHocInfo {
    AdHocInfo {
        id: id.clone(),
        url: entry.url.clone(),
        output: entry.output.clone(),
        state: entry.state,
        started_at: entry.started_at,
        restarts: entry.restarts,
    }
}

/// Accept absolute http(s) URLs only
pub fn parse_stream_url(input: &str) -> SupervisorResult<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SupervisorError::invalid_input("a stream URL is required"));
    }
    let url = Url::parse(input).map_err(|e| SupervisorError::invalid_input(format!("invalid URL {input:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        scheme => Err(SupervisorError::invalid_input(format!("unsupported URL scheme {scheme:?}"))),
    }
}
