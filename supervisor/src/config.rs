//! Supervisor configuration
//!
//! The configuration lives in a JSON file (`config.json` by default) whose
//! keys are camelCase. Secrets can be overridden from the environment, with a
//! `.env` file loaded first when present:
//! - `TWITCH_CLIENT_ID`
//! - `TWITCH_ACCESS_TOKEN`
//! - `NOTIFY_WEBHOOK_URL`
//!
//! The running supervisor only ever reads an in-memory snapshot.
//! `save_watchlist` persists console watchlist edits by rewriting the
//! `streamsToMonitor` key of the file on disk. Every other key, including ones
//! the supervisor does not know and secrets left out of the file, stays as the
//! operator wrote it.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shared::{SharedError, SourceKey};

use crate::error::{SupervisorError, SupervisorResult};

/// One entry of the monitored-source map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredSource {
    pub key: SourceKey,
    pub enabled: bool,
}

/// Program paths of the external capture and archive toolchain
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolPaths {
    pub streamlink: PathBuf,
    pub ffmpeg: PathBuf,
    pub yt_dlp: PathBuf,
    pub rclone: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            streamlink: PathBuf::from("streamlink"),
            ffmpeg: PathBuf::from("ffmpeg"),
            yt_dlp: PathBuf::from("yt-dlp"),
            rclone: PathBuf::from("rclone"),
        }
    }
}

/// Ad-hoc recording restart settings as written in the config file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestartSettings {
    /// `null` restarts forever
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// A run at least this long resets the attempt counter
    pub stable_after_secs: u64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            initial_delay_ms: 2_000,
            max_delay_ms: 60_000,
            stable_after_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    pub recordings_path: PathBuf,

    #[serde(default = "default_adhoc_folder")]
    pub adhoc_folder: String,

    /// Container extension of finished recordings, without the dot
    #[serde(default = "default_recording_extension")]
    pub recording_extension: String,

    #[serde(default)]
    pub base_recording_url: String,

    #[serde(default, deserialize_with = "ordered_sources::deserialize")]
    pub streams_to_monitor: Vec<MonitoredSource>,

    #[serde(default)]
    pub twitch_client_id: String,

    #[serde(default)]
    pub twitch_access_token: String,

    #[serde(default)]
    pub twitch_proxy_playlist: Option<String>,

    #[serde(default = "default_status_api_base")]
    pub status_api_base: String,

    #[serde(default)]
    pub rclone_enabled: bool,

    #[serde(default)]
    pub rclone_remote: String,

    #[serde(default)]
    pub rclone_folder: String,

    #[serde(default)]
    pub rclone_config_path: Option<PathBuf>,

    #[serde(default)]
    pub notify_webhook_url: Option<String>,

    /// Only this caller may issue commands; `None` accepts anyone
    #[serde(default)]
    pub authorized_caller: Option<String>,

    #[serde(default)]
    pub tools: ToolPaths,

    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    #[serde(default = "default_adhoc_stop_grace_secs")]
    pub adhoc_stop_grace_secs: u64,

    #[serde(default)]
    pub restart: RestartSettings,
}

fn default_adhoc_folder() -> String {
    "m3u8".to_string()
}

fn default_recording_extension() -> String {
    "mp4".to_string()
}

fn default_status_api_base() -> String {
    "https://api.twitch.tv/helix".to_string()
}

fn default_monitor_interval_secs() -> u64 {
    60
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_adhoc_stop_grace_secs() -> u64 {
    30
}

impl SupervisorConfig {
    /// Default config path
    pub const DEFAULT_PATH: &'static str = "config.json";

    /// Minimal configuration rooted at `recordings_path`; everything else defaulted
    pub fn with_recordings_path(recordings_path: impl Into<PathBuf>) -> Self {
        Self {
            recordings_path: recordings_path.into(),
            adhoc_folder: default_adhoc_folder(),
            recording_extension: default_recording_extension(),
            base_recording_url: String::new(),
            streams_to_monitor: Vec::new(),
            twitch_client_id: String::new(),
            twitch_access_token: String::new(),
            twitch_proxy_playlist: None,
            status_api_base: default_status_api_base(),
            rclone_enabled: false,
            rclone_remote: String::new(),
            rclone_folder: String::new(),
            rclone_config_path: None,
            notify_webhook_url: None,
            authorized_caller: None,
            tools: ToolPaths::default(),
            monitor_interval_secs: default_monitor_interval_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            adhoc_stop_grace_secs: default_adhoc_stop_grace_secs(),
            restart: RestartSettings::default(),
        }
    }

    /// Per-source output directory
    pub fn source_dir(&self, key: &SourceKey) -> PathBuf {
        self.recordings_path.join(key.as_str())
    }

    /// Output directory of ad-hoc recordings
    pub fn adhoc_dir(&self) -> PathBuf {
        self.recordings_path.join(&self.adhoc_folder)
    }

    /// rclone target for a local directory name, e.g. `gdrive:streams/<name>`
    pub fn remote_target(&self, name: &str) -> String {
        let folder = self.rclone_folder.trim_matches('/');
        if folder.is_empty() {
            format!("{}:{}", self.rclone_remote, name)
        } else {
            format!("{}:{}/{}", self.rclone_remote, folder, name)
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn adhoc_stop_grace(&self) -> Duration {
        Duration::from_secs(self.adhoc_stop_grace_secs)
    }

    /// Apply secret overrides from the process environment (and `.env`)
    pub fn apply_env_overrides(&mut self) {
        // Silently ignored when there is no .env file
        let _ = dotenv::dotenv();
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply secret overrides from an arbitrary lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup("TWITCH_CLIENT_ID") {
            self.twitch_client_id = value;
        }
        if let Some(value) = lookup("TWITCH_ACCESS_TOKEN") {
            self.twitch_access_token = value;
        }
        if let Some(value) = lookup("NOTIFY_WEBHOOK_URL") {
            self.notify_webhook_url = Some(value);
        }
    }

    /// Check invariants the rest of the supervisor relies on
    pub fn validate(&self) -> Result<(), SharedError> {
        let invalid = |field: &str, value: &dyn std::fmt::Display| SharedError::InvalidConfig {
            field: field.to_string(),
            value: value.to_string(),
        };

        if self.recordings_path.as_os_str().is_empty() {
            return Err(invalid("recordingsPath", &"<empty>"));
        }
        let extension = &self.recording_extension;
        if extension.is_empty() || extension.contains('.') || extension.contains('/') {
            return Err(invalid("recordingExtension", extension));
        }
        if SourceKey::new(self.adhoc_folder.as_str()).is_err() {
            return Err(invalid("adhocFolder", &self.adhoc_folder));
        }
        if self.monitor_interval_secs == 0 {
            return Err(invalid("monitorIntervalSecs", &self.monitor_interval_secs));
        }
        if self.streams_to_monitor.iter().any(|source| source.key.as_str() == self.adhoc_folder) {
            return Err(invalid("streamsToMonitor", &self.adhoc_folder));
        }
        if self.rclone_enabled && self.rclone_remote.trim().is_empty() {
            return Err(invalid("rcloneRemote", &"<empty>"));
        }
        Ok(())
    }
}

/// Load, override from the environment and validate a config file
pub fn load(path: &Path) -> SupervisorResult<SupervisorConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SupervisorError::config(path, format!("cannot read: {e}")))?;
    let mut config = parse(&text).map_err(|e| SupervisorError::config(path, e.to_string()))?;
    config.apply_env_overrides();
    config
        .validate()
        .map_err(|e| SupervisorError::config(path, e.to_string()))?;
    Ok(config)
}

/// Parse config text without touching the environment
pub fn parse(text: &str) -> SupervisorResult<SupervisorConfig> {
    Ok(serde_json::from_str(text)?)
}

/// Replace the watchlist in the config file at `path`, atomically.
///
/// The file is re-read so environment overrides applied at load time are
/// never written back.
pub fn save_watchlist(path: &Path, sources: &[MonitoredSource]) -> SupervisorResult<()> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SupervisorError::config(path, format!("cannot read: {e}")))?;
    let mut document: serde_json::Value = serde_json::from_str(&text)?;
    let Some(fields) = document.as_object_mut() else {
        return Err(SupervisorError::config(path, "top level is not an object"));
    };

    let watchlist: serde_json::Map<String, serde_json::Value> = sources
        .iter()
        .map(|source| (source.key.as_str().to_string(), serde_json::Value::Bool(source.enabled)))
        .collect();
    fields.insert("streamsToMonitor".to_string(), serde_json::Value::Object(watchlist));

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(&document)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// `streamsToMonitor` is a JSON object whose document order is significant:
/// it is the order sources are polled and reported in.
mod ordered_sources {
    use super::MonitoredSource;
    use serde::Deserializer;
    use serde::de::{self, MapAccess, Visitor};
    use shared::SourceKey;
    use std::fmt;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<MonitoredSource>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SourcesVisitor;

        impl<'de> Visitor<'de> for SourcesVisitor {
            type Value = Vec<MonitoredSource>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of source name to enabled flag")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut sources: Vec<MonitoredSource> = Vec::new();
                while let Some((name, enabled)) = access.next_entry::<String, bool>()? {
                    let key = SourceKey::new(name).map_err(de::Error::custom)?;
                    // Last occurrence wins, first position is kept
                    match sources.iter_mut().find(|source| source.key == key) {
                        Some(existing) => existing.enabled = enabled,
                        None => sources.push(MonitoredSource { key, enabled }),
                    }
                }
                Ok(sources)
            }
        }

        deserializer.deserialize_map(SourcesVisitor)
    }
}
