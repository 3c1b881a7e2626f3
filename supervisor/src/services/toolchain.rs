//! Command lines of the external capture toolchain
//!
//! streamlink fetches the live stream, ffmpeg remuxes it without re-encoding,
//! yt-dlp captures arbitrary (HLS) URLs. Arguments are passed directly, never
//! through a shell.

use std::path::Path;
use tokio::process::Command;

use crate::config::{SupervisorConfig, ToolPaths};
use crate::traits::CaptureToolchain;
use shared::SourceKey;

/// Real toolchain built from configured program paths
#[derive(Debug, Clone)]
pub struct ExternalToolchain {
    tools: ToolPaths,
    proxy_playlist: Option<String>,
    playback_base: String,
}

impl ExternalToolchain {
    pub fn new(tools: ToolPaths) -> Self {
        Self {
            tools,
            proxy_playlist: None,
            playback_base: "https://www.twitch.tv".to_string(),
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.tools.clone()).with_proxy_playlist(config.twitch_proxy_playlist.clone())
    }

    /// Configure the playlist proxy passed to streamlink (fluent API)
    pub fn with_proxy_playlist(mut self, proxy_playlist: Option<String>) -> Self {
        self.proxy_playlist = proxy_playlist.filter(|p| !p.trim().is_empty());
        self
    }

    /// Canonical playback URL of a source
    pub fn playback_url(&self, source: &SourceKey) -> String {
        format!("{}/{}", self.playback_base.trim_end_matches('/'), source)
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }
}

impl CaptureToolchain for ExternalToolchain {
    fn fetch_command(&self, source: &SourceKey) -> Command {
        let mut cmd = Command::new(&self.tools.streamlink);
        cmd.arg(self.playback_url(source)).arg("best");
        if let Some(ref proxy) = self.proxy_playlist {
            cmd.arg("--twitch-proxy-playlist").arg(proxy);
        }
        cmd.arg("--retry-streams").arg("30").arg("--stdout");
        cmd
    }

    fn transcode_command(&self, output: &Path) -> Command {
        let mut cmd = Command::new(&self.tools.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-i", "-", "-c", "copy"])
            .arg(output);
        cmd
    }

    fn adhoc_command(&self, url: &str, output: &Path) -> Command {
        let mut cmd = Command::new(&self.tools.yt_dlp);
        cmd.arg("-o")
            .arg(output)
            .args([
                "--no-part",
                "--live-from-start",
                "--retry-sleep",
                "10",
                "--fragment-retries",
                "infinite",
                "--hls-use-mpegts",
                "-f",
                "bestvideo+bestaudio/best",
            ])
            .arg(url);
        cmd
    }
}
