//! Service tests
//!
//! Process-level tests drive real child processes through `sh -c` scripts
//! standing in for the capture toolchain, so they only run on unix.

#[cfg(unix)]
mod pipeline;

// Common test utilities for services
pub mod common {
    use std::collections::BTreeMap;
    use std::ffi::OsStr;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::process::Command;
    use tokio::sync::broadcast::{self, error::RecvError};
    use tokio::time::timeout;

    use crate::config::{RestartSettings, SupervisorConfig};
    use crate::events::SupervisorEvent;
    use crate::traits::{CaptureToolchain, MockRemoteArchive};
    use shared::SourceKey;

    /// Upper bound for anything driven by a child process
    pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn key(name: &str) -> SourceKey {
        SourceKey::new(name).unwrap()
    }

    pub fn file_name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().to_string()
    }

    /// Config rooted in a fresh temp dir with short grace periods and backoff
    pub fn test_config() -> (TempDir, SupervisorConfig) {
        let dir = TempDir::new().unwrap();
        let mut config = SupervisorConfig::with_recordings_path(dir.path());
        config.stop_grace_secs = 2;
        config.adhoc_stop_grace_secs = 5;
        config.rclone_remote = "remote".to_string();
        config.rclone_folder = "streams".to_string();
        config.restart = RestartSettings {
            max_attempts: Some(3),
            initial_delay_ms: 10,
            max_delay_ms: 50,
            stable_after_secs: 300,
        };
        (dir, config)
    }

    /// Toolchain whose stages are shell snippets.
    ///
    /// Fetch gets the source key as `$1`, transcode the output path as `$1`,
    /// ad-hoc capture the output path as `$1` and the URL as `$2`.
    #[derive(Debug, Clone)]
    pub struct ScriptToolchain {
        pub fetch: String,
        pub transcode: String,
        pub adhoc: String,
        pub missing_fetch: bool,
        pub missing_transcode: bool,
    }

    impl ScriptToolchain {
        pub fn new() -> Self {
            Self {
                fetch: "while true; do echo chunk; sleep 0.1; done".to_string(),
                transcode: r#"cat > "$1""#.to_string(),
                adhoc: "sleep 30".to_string(),
                missing_fetch: false,
                missing_transcode: false,
            }
        }

        pub fn fetch(mut self, script: &str) -> Self {
            self.fetch = script.to_string();
            self
        }

        pub fn transcode(mut self, script: &str) -> Self {
            self.transcode = script.to_string();
            self
        }

        pub fn adhoc(mut self, script: &str) -> Self {
            self.adhoc = script.to_string();
            self
        }

        fn sh(script: &str, args: &[&OsStr]) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script).arg("sh").args(args);
            cmd
        }
    }

    impl CaptureToolchain for ScriptToolchain {
        fn fetch_command(&self, source: &SourceKey) -> Command {
            if self.missing_fetch {
                return Command::new("/nonexistent/streamlink");
            }
            Self::sh(&self.fetch, &[OsStr::new(source.as_str())])
        }

        fn transcode_command(&self, output: &Path) -> Command {
            if self.missing_transcode {
                return Command::new("/nonexistent/ffmpeg");
            }
            Self::sh(&self.transcode, &[output.as_os_str()])
        }

        fn adhoc_command(&self, url: &str, output: &Path) -> Command {
            Self::sh(&self.adhoc, &[output.as_os_str(), OsStr::new(url)])
        }
    }

    /// Remote archive mock that starts empty and records every copy.
    /// Each copy records whether the local file existed at copy time.
    pub fn recording_archive() -> (MockRemoteArchive, Arc<Mutex<Vec<(PathBuf, bool)>>>) {
        let copies = Arc::new(Mutex::new(Vec::new()));
        let mut archive = MockRemoteArchive::new();
        archive.expect_ensure_dir().returning(|_| Ok(()));
        archive.expect_list().returning(|_| Ok(Vec::new()));
        let recorded = copies.clone();
        archive.expect_copy().returning(move |path, _| {
            recorded.lock().unwrap().push((path.to_path_buf(), path.exists()));
            Ok(())
        });
        (archive, copies)
    }

    /// Remote archive mock holding the content each file had when it was copied.
    /// Listings reflect earlier copies, like a real remote.
    pub fn content_archive() -> (MockRemoteArchive, Arc<Mutex<BTreeMap<String, String>>>) {
        let remote = Arc::new(Mutex::new(BTreeMap::new()));
        let mut archive = MockRemoteArchive::new();
        archive.expect_ensure_dir().returning(|_| Ok(()));

        let listed = remote.clone();
        archive
            .expect_list()
            .returning(move |_| Ok(listed.lock().unwrap().keys().cloned().collect()));

        let stored = remote.clone();
        archive.expect_copy().returning(move |path, _| {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            let content = std::fs::read_to_string(path).unwrap_or_default();
            stored.lock().unwrap().insert(name, content);
            Ok(())
        });
        (archive, remote)
    }

    /// Wait for the first event matching `predicate`
    pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<SupervisorEvent>, mut predicate: F) -> SupervisorEvent
    where
        F: FnMut(&SupervisorEvent) -> bool,
    {
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(event) if predicate(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event bus closed"),
                }
            }
        };
        timeout(EVENT_TIMEOUT, wait).await.expect("timed out waiting for event")
    }
}
