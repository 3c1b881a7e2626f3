//! Supervisor facade
//!
//! Wires the monitor, the continuous pipelines, the ad-hoc recorder, the
//! upload reconciler and the recordings library together, and executes
//! commands on behalf of the single allow-listed caller.

use std::sync::Arc;

use crate::commands::{Command, CommandOutcome, HELP_TEXT};
use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::events::EventBus;
use crate::monitor::{LivenessMonitor, Watchlist};
use crate::services::{AdHocRecorder, CapturePipelines, RecordingsLibrary, UploadReconciler, UploadReport, library};
use crate::traits::{ActiveOutputs, CaptureToolchain, Notifier, RemoteArchive, StartOutcome, StatusSource, StopOutcome};
use shared::{Component, SourceKey, component_info, component_warn, logging};

pub struct Supervisor<S, N>
where
    S: StatusSource + 'static,
    N: Notifier + 'static,
{
    config: Arc<SupervisorConfig>,
    monitor: Arc<LivenessMonitor<S, N, CapturePipelines>>,
    pipelines: CapturePipelines,
    adhoc: AdHocRecorder,
    library: RecordingsLibrary,
    uploads: Option<UploadReconciler>,
    events: EventBus,
}

impl<S, N> Supervisor<S, N>
where
    S: StatusSource + 'static,
    N: Notifier + 'static,
{
    /// Build every service from `config`. Uploads are enabled iff an archive
    /// is given.
    pub fn new(
        config: SupervisorConfig,
        status: S,
        notifier: N,
        toolchain: Arc<dyn CaptureToolchain>,
        archive: Option<Arc<dyn RemoteArchive>>,
    ) -> Self {
        let config = Arc::new(config);
        let events = EventBus::default();
        let uploads = archive
            .map(|archive| UploadReconciler::new(archive, config.recording_extension.clone()).with_events(events.clone()));

        let pipelines = CapturePipelines::new(config.clone(), toolchain.clone(), uploads.clone(), events.clone());
        let adhoc = AdHocRecorder::new(config.clone(), toolchain, uploads.clone(), events.clone());
        let monitor = LivenessMonitor::new(
            status,
            notifier,
            pipelines.clone(),
            Watchlist::from_config(&config),
            config.monitor_interval(),
        );

        Self {
            library: RecordingsLibrary::from_config(&config),
            config,
            monitor: Arc::new(monitor),
            pipelines,
            adhoc,
            uploads,
            events,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn monitor(&self) -> Arc<LivenessMonitor<S, N, CapturePipelines>> {
        self.monitor.clone()
    }

    pub fn watchlist(&self) -> &Watchlist {
        self.monitor.watchlist()
    }

    pub fn pipelines(&self) -> &CapturePipelines {
        &self.pipelines
    }

    pub fn adhoc(&self) -> &AdHocRecorder {
        &self.adhoc
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Snapshot of the running configuration with the current watchlist
    pub async fn config_snapshot(&self) -> SupervisorConfig {
        let mut config = (*self.config).clone();
        config.streams_to_monitor = self.watchlist().all().await;
        config
    }

    fn authorize(&self, caller: &str) -> SupervisorResult<()> {
        match self.config.authorized_caller {
            Some(ref allowed) if allowed != caller => Err(SupervisorError::Unauthorized {
                caller: caller.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Execute `command` for `caller`
    pub async fn execute(&self, caller: &str, command: Command) -> SupervisorResult<CommandOutcome> {
        self.authorize(caller)?;
        component_info!(Component::Supervisor, "⌨️ {} from {}", command, caller);

        let outcome = match command {
            Command::Start(key) => {
                self.ensure_channel(&key)?;
                match self.pipelines.start(&key).await? {
                    StartOutcome::Started { .. } => {
                        CommandOutcome::success("Recording", format!("Started recording for channel: {key}"))
                    }
                    StartOutcome::AlreadyRecording => {
                        CommandOutcome::info("Recording", format!("Already recording channel: {key}"))
                    }
                }
            }
            Command::Stop(key) => match self.pipelines.stop(&key).await? {
                StopOutcome::Stopped => CommandOutcome::failure("Stopped", format!("Stopped recording for channel: {key}")),
                StopOutcome::NotFound => {
                    CommandOutcome::info("Not Found", format!("No active recording for channel: {key}"))
                }
            },
            Command::Record(url) => {
                let (id, _) = self.adhoc.start(&url).await?;
                CommandOutcome::success("Recording", format!("Started recording m3u8 stream with ID: {id}"))
            }
            Command::End(id) => match self.adhoc.stop(&id).await? {
                StopOutcome::Stopped => {
                    CommandOutcome::failure("Ended", format!("Stopped recording m3u8 stream with ID: {id}"))
                }
                StopOutcome::NotFound => {
                    CommandOutcome::info("Not Found", format!("No recording process found with ID: {id}"))
                }
            },
            Command::Watch(key) => {
                self.ensure_channel(&key)?;
                self.watchlist().watch(key.clone()).await;
                CommandOutcome::success("Watching", format!("Started monitoring channel: {key}"))
            }
            Command::Unwatch(key) => {
                if self.watchlist().unwatch(&key).await {
                    CommandOutcome::failure("Unwatched", format!("Stopped monitoring channel: {key}"))
                } else {
                    CommandOutcome::info("Not Found", format!("Channel {key} is not on the watchlist"))
                }
            }
            Command::Watchlist => {
                let lines: Vec<String> = self
                    .monitor
                    .watchlist_status()
                    .await
                    .iter()
                    .map(|status| format!("{} is currently **{}**", status.key, status.label()))
                    .collect();
                CommandOutcome::info(
                    "Watchlist Status",
                    format!("Checking stream statuses...\n\n{}", lines.join("\n")).trim_end(),
                )
            }
            Command::List => {
                let recordings = self.library.list().await?;
                if recordings.is_empty() {
                    CommandOutcome::failure("Recordings", "No recordings found.")
                } else {
                    CommandOutcome::info("Recordings", library::render_listing(&recordings))
                }
            }
            Command::Delete(key) => {
                let busy = if self.is_adhoc_folder(&key) {
                    !self.adhoc.list().await.is_empty()
                } else {
                    self.pipelines.is_recording(&key).await
                };
                if busy {
                    return Err(SupervisorError::invalid_input(format!(
                        "{key} is being recorded, stop it before deleting its folder"
                    )));
                }
                self.library.delete_source_dir(&key).await?;
                CommandOutcome::failure("Deleted", format!("Deleted local folder for channel: {key}"))
            }
            Command::Upload(key) => {
                self.spawn_upload(&key).await?;
                CommandOutcome::success("Uploading", format!("Started uploading folder for channel: {key}"))
            }
            Command::Status => CommandOutcome::info("Status", self.status_text().await),
            Command::Help => CommandOutcome::success("Help", HELP_TEXT),
        };
        Ok(outcome)
    }

    /// Reconcile the local folder `name` (a source key or the ad-hoc folder)
    /// with its remote target and wait for the result. Recordings still in
    /// progress are left out.
    pub async fn upload(&self, name: &SourceKey) -> SupervisorResult<UploadReport> {
        let (uploads, local_dir) = self.upload_target(name).await?;
        let target = self.config.remote_target(name.as_str());
        let writers = self.writers(name);
        uploads.reconcile_settled(&local_dir, &target, &*writers).await
    }

    async fn spawn_upload(&self, name: &SourceKey) -> SupervisorResult<()> {
        let (uploads, local_dir) = self.upload_target(name).await?;
        uploads.spawn_reconcile(local_dir, self.config.remote_target(name.as_str()), Some(self.writers(name)));
        Ok(())
    }

    fn is_adhoc_folder(&self, key: &SourceKey) -> bool {
        key.as_str() == self.config.adhoc_folder
    }

    /// The ad-hoc folder is not a channel and cannot hold a pipeline
    fn ensure_channel(&self, key: &SourceKey) -> SupervisorResult<()> {
        if self.is_adhoc_folder(key) {
            return Err(SupervisorError::invalid_input(format!(
                "{key} is the ad-hoc recordings folder, not a channel"
            )));
        }
        Ok(())
    }

    /// Whoever writes into the folder `name`
    fn writers(&self, name: &SourceKey) -> Arc<dyn ActiveOutputs> {
        if self.is_adhoc_folder(name) {
            Arc::new(self.adhoc.clone())
        } else {
            Arc::new(self.pipelines.clone())
        }
    }

    async fn upload_target(&self, name: &SourceKey) -> SupervisorResult<(&UploadReconciler, std::path::PathBuf)> {
        let uploads = self
            .uploads
            .as_ref()
            .ok_or_else(|| SupervisorError::invalid_input("uploads are disabled"))?;
        let local_dir = self.config.source_dir(name);
        if !tokio::fs::try_exists(&local_dir).await? {
            return Err(SupervisorError::not_found("recording folder", name));
        }
        Ok((uploads, local_dir))
    }

    async fn status_text(&self) -> String {
        let pipelines = self.pipelines.active().await;
        let adhoc = self.adhoc.list().await;
        if pipelines.is_empty() && adhoc.is_empty() {
            return "Nothing is being recorded.".to_string();
        }

        let mut lines = Vec::new();
        for info in pipelines {
            lines.push(format!(
                "**{}** since {} -> {}",
                info.source,
                info.started_at.format("%H:%M:%S"),
                info.output.display()
            ));
        }
        for info in adhoc {
            lines.push(format!(
                "**{}** ({}, {} restarts) {} -> {}",
                info.id,
                info.state,
                info.restarts,
                info.url,
                info.output.display()
            ));
        }
        lines.join("\n")
    }

    /// Stop every pipeline and ad-hoc recording
    pub async fn shutdown(&self) {
        logging::log_shutdown(&Component::Supervisor, "stopping all recordings");
        let pipelines = self.pipelines.stop_all().await;
        let adhoc = self.adhoc.stop_all().await;
        if pipelines + adhoc > 0 {
            component_info!(
                Component::Supervisor,
                "⏹️ Stopped {} pipelines and {} ad-hoc recordings",
                pipelines,
                adhoc
            );
        }
        let leftover = self.adhoc.list().await;
        if !leftover.is_empty() {
            component_warn!(Component::Supervisor, "⚠️ {} ad-hoc recordings did not finish in time", leftover.len());
        }
    }
}
