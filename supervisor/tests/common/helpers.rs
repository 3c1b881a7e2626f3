//! Test helpers and builder patterns for supervisor tests
//!
//! The capture toolchain is a `MockCaptureToolchain` whose commands are
//! `sh -c` snippets, so process-driven tests need a unix shell.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio::process::Command;

use super::fixtures::TestFixtures;
use shared::SourceKey;
use supervisor::config::{MonitoredSource, RestartSettings};
use supervisor::traits::{MockCaptureToolchain, MockNotifier, MockRemoteArchive, MockStatusSource};
use supervisor::{RemoteArchive, Supervisor, SupervisorConfig};

pub type TestSupervisor = Supervisor<MockStatusSource, MockNotifier>;

fn sh(script: &str, args: &[&OsStr]) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script).arg("sh").args(args);
    cmd
}

/// Builder for a supervisor rooted in a temp dir, with permissive mocks
pub struct SupervisorBuilder {
    dir: TempDir,
    config: SupervisorConfig,
    status: MockStatusSource,
    notifier: MockNotifier,
    fetch: String,
    transcode: String,
    adhoc: String,
    archive: Option<MockRemoteArchive>,
}

impl SupervisorBuilder {
    /// Offline sources, accepting notifier, no uploads, owner-only commands
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = SupervisorConfig::with_recordings_path(dir.path());
        config.authorized_caller = Some(TestFixtures::OWNER.to_string());
        config.stop_grace_secs = 2;
        config.adhoc_stop_grace_secs = 3;
        config.rclone_remote = TestFixtures::REMOTE.to_string();
        config.rclone_folder = TestFixtures::REMOTE_FOLDER.to_string();
        config.restart = RestartSettings {
            max_attempts: Some(2),
            initial_delay_ms: 10,
            max_delay_ms: 20,
            stable_after_secs: 300,
        };

        let mut status = MockStatusSource::new();
        status.expect_is_live().returning(|_| Ok(false)).times(0..);
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_| Ok(())).times(0..);

        Self {
            dir,
            config,
            status,
            notifier,
            fetch: TestFixtures::ENDLESS_FETCH.to_string(),
            transcode: TestFixtures::COPY_TRANSCODE.to_string(),
            adhoc: TestFixtures::INTERRUPTIBLE_CAPTURE.to_string(),
            archive: None,
        }
    }

    /// Replace the status mock; the default expectation is dropped
    pub fn with_status<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut MockStatusSource),
    {
        self.status = MockStatusSource::new();
        setup(&mut self.status);
        self
    }

    pub fn with_notifier<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut MockNotifier),
    {
        self.notifier = MockNotifier::new();
        setup(&mut self.notifier);
        self
    }

    pub fn with_archive(mut self, archive: MockRemoteArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn watching(mut self, keys: &[SourceKey]) -> Self {
        self.config.streams_to_monitor = keys
            .iter()
            .map(|key| MonitoredSource {
                key: key.clone(),
                enabled: true,
            })
            .collect();
        self
    }

    pub fn with_config<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut SupervisorConfig),
    {
        setup(&mut self.config);
        self
    }

    pub fn with_fetch(mut self, script: &str) -> Self {
        self.fetch = script.to_string();
        self
    }

    pub fn with_adhoc(mut self, script: &str) -> Self {
        self.adhoc = script.to_string();
        self
    }

    /// Build the supervisor; keep the returned dir alive for the test
    pub fn build(self) -> (TempDir, TestSupervisor) {
        let mut toolchain = MockCaptureToolchain::new();
        let fetch = self.fetch;
        toolchain
            .expect_fetch_command()
            .returning(move |source: &SourceKey| sh(&fetch, &[OsStr::new(source.as_str())]));
        let transcode = self.transcode;
        toolchain
            .expect_transcode_command()
            .returning(move |output: &Path| sh(&transcode, &[output.as_os_str()]));
        let adhoc = self.adhoc;
        toolchain
            .expect_adhoc_command()
            .returning(move |url: &str, output: &Path| sh(&adhoc, &[output.as_os_str(), OsStr::new(url)]));

        let archive = self.archive.map(|archive| Arc::new(archive) as Arc<dyn RemoteArchive>);
        let supervisor = Supervisor::new(self.config, self.status, self.notifier, Arc::new(toolchain), archive);
        (self.dir, supervisor)
    }
}

/// Common test operations
pub struct TestHelpers;

impl TestHelpers {
    /// Archive listing `remote` and recording every copied file name
    pub fn archive(remote: &[&str]) -> (MockRemoteArchive, Arc<Mutex<Vec<String>>>) {
        let remote: Vec<String> = remote.iter().map(|s| s.to_string()).collect();
        let copied = Arc::new(Mutex::new(Vec::new()));
        let mut archive = MockRemoteArchive::new();
        archive.expect_ensure_dir().returning(|_| Ok(()));
        archive.expect_list().returning(move |_| Ok(remote.clone()));
        let log = copied.clone();
        archive.expect_copy().returning(move |path, _| {
            log.lock().unwrap().push(path.file_name().unwrap().to_string_lossy().to_string());
            Ok(())
        });
        (archive, copied)
    }

    /// Create `dir/name` under the recordings root
    pub fn write_recording(root: &Path, dir: &str, name: &str) {
        std::fs::create_dir_all(root.join(dir)).unwrap();
        std::fs::write(root.join(dir).join(name), name).unwrap();
    }
}
