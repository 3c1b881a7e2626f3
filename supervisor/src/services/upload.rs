//! Diff-based upload of finished recordings
//!
//! Only files missing remotely are copied, so a reconcile can run after every
//! capture and on manual request without re-uploading the archive.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::SupervisorResult;
use crate::events::{EventBus, SupervisorEvent};
use crate::traits::{ActiveOutputs, RemoteArchive};
use shared::{Component, component_debug, component_error, component_info, component_warn, logging};

/// Outcome of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub remote_target: String,
    pub uploaded: Vec<String>,
    pub failed: Vec<String>,
    /// Local files already present remotely
    pub skipped: usize,
}

impl UploadReport {
    pub fn is_noop(&self) -> bool {
        self.uploaded.is_empty() && self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct UploadReconciler {
    archive: Arc<dyn RemoteArchive>,
    extension: String,
    events: Option<EventBus>,
}

impl UploadReconciler {
    pub fn new(archive: Arc<dyn RemoteArchive>, extension: impl Into<String>) -> Self {
        Self {
            archive,
            extension: extension.into().trim_start_matches('.').to_string(),
            events: None,
        }
    }

    /// Publish `UploadFinished` for every reconcile that did something (fluent API)
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Copy every local recording not yet listed under `remote_target`.
    ///
    /// Failing to prepare or list the remote aborts the run; a failed copy is
    /// recorded in the report and the remaining files are still attempted.
    pub async fn reconcile(&self, local_dir: &Path, remote_target: &str) -> SupervisorResult<UploadReport> {
        self.run(local_dir, remote_target, None).await
    }

    /// Like `reconcile`, but leaves out files `writers` is still producing.
    ///
    /// `writers` is asked after the local listing. A capture registers its
    /// output before the file can appear, so every listed file is either
    /// finished or reported as active.
    pub async fn reconcile_settled(
        &self,
        local_dir: &Path,
        remote_target: &str,
        writers: &dyn ActiveOutputs,
    ) -> SupervisorResult<UploadReport> {
        self.run(local_dir, remote_target, Some(writers)).await
    }

    async fn run(
        &self,
        local_dir: &Path,
        remote_target: &str,
        writers: Option<&dyn ActiveOutputs>,
    ) -> SupervisorResult<UploadReport> {
        let component = Component::Upload;

        self.archive.ensure_dir(remote_target).await?;
        let remote: BTreeSet<String> = self.archive.list(remote_target).await?.into_iter().collect();
        let mut local = self.local_files(local_dir).await?;
        if let Some(writers) = writers {
            let active: BTreeSet<PathBuf> = writers.active_outputs().await.into_iter().collect();
            local.retain(|name| {
                let busy = active.contains(&local_dir.join(name));
                if busy {
                    component_debug!(component, "Skipping {}, still being recorded", name);
                }
                !busy
            });
        }

        let mut report = UploadReport {
            remote_target: remote_target.to_string(),
            ..UploadReport::default()
        };

        let (present, missing): (Vec<_>, Vec<_>) = local.into_iter().partition(|name| remote.contains(name));
        report.skipped = present.len();
        if !missing.is_empty() {
            logging::log_progress(
                &component,
                "Uploading",
                &format!("{} new files to {}", missing.len(), remote_target),
            );
        }

        for name in missing {
            let path = local_dir.join(&name);
            match self.archive.copy(&path, remote_target).await {
                Ok(()) => {
                    component_info!(component, "☁️ Uploaded {} to {}", name, remote_target);
                    report.uploaded.push(name);
                }
                Err(e) => {
                    component_error!(component, "❌ Failed to upload {} to {}: {}", name, remote_target, e);
                    report.failed.push(name);
                }
            }
        }

        if report.is_noop() {
            component_info!(component, "✅ {} is up to date", remote_target);
        } else if let Some(ref events) = self.events {
            events.publish(SupervisorEvent::UploadFinished {
                remote_target: report.remote_target.clone(),
                uploaded: report.uploaded.clone(),
                failed: report.failed.clone(),
            });
        }
        Ok(report)
    }

    /// File names in `dir` carrying the recording extension, sorted.
    /// A missing directory has no recordings.
    pub async fn local_files(&self, dir: &Path) -> SupervisorResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let matches = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(self.extension.as_str()));
            if let (true, Some(name)) = (matches, path.file_name().and_then(|n| n.to_str())) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Run a reconcile on its own task, logging instead of returning errors.
    /// With `writers`, files still being recorded are left for a later run.
    pub fn spawn_reconcile(
        &self,
        local_dir: PathBuf,
        remote_target: String,
        writers: Option<Arc<dyn ActiveOutputs>>,
    ) -> JoinHandle<Option<UploadReport>> {
        let reconciler = self.clone();
        tokio::spawn(async move {
            match reconciler.run(&local_dir, &remote_target, writers.as_deref()).await {
                Ok(report) => Some(report),
                Err(e) => {
                    component_warn!(
                        Component::Upload,
                        "⚠️ Upload of {} to {} failed: {}",
                        local_dir.display(),
                        remote_target,
                        e
                    );
                    None
                }
            }
        })
    }
}
