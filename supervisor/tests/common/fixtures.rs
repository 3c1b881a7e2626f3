//! Test fixtures and data for supervisor tests

use shared::{RecordingId, SourceKey};

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub const OWNER: &'static str = "owner#0001";
    pub const STRANGER: &'static str = "someone#4242";
    pub const CHANNEL: &'static str = "somechan";
    pub const OTHER_CHANNEL: &'static str = "otherchan";
    pub const STREAM_URL: &'static str = "https://cdn.example/live/index.m3u8";
    pub const UNKNOWN_ID: &'static str = "deadbeef";
    pub const REMOTE: &'static str = "gdrive";
    pub const REMOTE_FOLDER: &'static str = "streams";

    /// Fetch stage emitting chunks until signalled
    pub const ENDLESS_FETCH: &'static str = "while true; do echo chunk; sleep 0.1; done";
    /// Transcode stage copying stdin into the output path
    pub const COPY_TRANSCODE: &'static str = r#"cat > "$1""#;
    /// Ad-hoc capture that writes a partial file and exits on SIGINT
    pub const INTERRUPTIBLE_CAPTURE: &'static str = r#"trap 'printf done > "$1.part"; exit 0' INT
while true; do sleep 0.1; done"#;

    pub fn channel() -> SourceKey {
        SourceKey::new(Self::CHANNEL).unwrap()
    }

    pub fn other_channel() -> SourceKey {
        SourceKey::new(Self::OTHER_CHANNEL).unwrap()
    }

    pub fn unknown_id() -> RecordingId {
        RecordingId::parse(Self::UNKNOWN_ID).unwrap()
    }

    /// Config file as an operator would write it
    pub fn sample_config_json(recordings_path: &str) -> String {
        format!(
            r#"{{
    "discordToken": "bot-token",
    "recordingsPath": "{recordings_path}",
    "baseRecordingUrl": "https://files.example/rec",
    "streamsToMonitor": {{ "{}": true, "{}": false }},
    "twitchClientId": "client",
    "twitchAccessToken": "token",
    "rcloneEnabled": true,
    "rcloneRemote": "{}",
    "rcloneFolder": "{}",
    "authorizedCaller": "{}",
    "monitorIntervalSecs": 30,
    "restart": {{ "maxAttempts": 5, "initialDelayMs": 500 }}
}}"#,
            Self::CHANNEL,
            Self::OTHER_CHANNEL,
            Self::REMOTE,
            Self::REMOTE_FOLDER,
            Self::OWNER
        )
    }
}
