//! rclone-backed remote archive

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::RemoteArchive;
use shared::{Component, component_debug};

/// rclone exits with 3 when the directory already exists on some backends
const MKDIR_EXISTS_CODE: i32 = 3;

#[derive(Debug, Clone)]
pub struct RcloneArchive {
    program: PathBuf,
    config_path: Option<PathBuf>,
}

impl RcloneArchive {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_path: None,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.tools.rclone.clone()).with_config_path(config.rclone_config_path.clone())
    }

    /// Pass `--config <path>` to every invocation (fluent API)
    pub fn with_config_path(mut self, config_path: Option<PathBuf>) -> Self {
        self.config_path = config_path;
        self
    }

    fn command(&self, args: &[&str], path: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(path) = path {
            cmd.arg(path);
        }
        if let Some(ref config_path) = self.config_path {
            cmd.arg("--config").arg(config_path);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    async fn run(&self, name: &str, mut cmd: Command) -> SupervisorResult<Output> {
        component_debug!(Component::Upload, "rclone {}: {:?}", name, cmd.as_std());
        cmd.output().await.map_err(|source| SupervisorError::SpawnFailed {
            program: self.program.display().to_string(),
            source,
        })
    }

    fn failure(name: &str, output: &Output) -> SupervisorError {
        SupervisorError::RemoteCommand {
            command: format!("rclone {name}"),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

#[async_trait]
impl RemoteArchive for RcloneArchive {
    async fn ensure_dir(&self, target: &str) -> SupervisorResult<()> {
        let output = self.run("mkdir", self.command(&["mkdir", target], None)).await?;
        match output.status.code() {
            Some(0) | Some(MKDIR_EXISTS_CODE) => Ok(()),
            _ => Err(Self::failure("mkdir", &output)),
        }
    }

    async fn list(&self, target: &str) -> SupervisorResult<Vec<String>> {
        let output = self.run("lsf", self.command(&["lsf", target], None)).await?;
        if !output.status.success() {
            return Err(Self::failure("lsf", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn copy(&self, local: &Path, target: &str) -> SupervisorResult<()> {
        let mut cmd = self.command(&["copy"], Some(local));
        cmd.arg(target);
        let output = self.run("copy", cmd).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Self::failure("copy", &output))
        }
    }
}
