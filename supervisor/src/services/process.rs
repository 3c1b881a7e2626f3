//! Supervised child processes
//!
//! A `ChildProcess` owns nothing but the pid and an exit channel: the
//! `tokio::process::Child` itself moves into a reaper task that publishes the
//! exit status. Stopping is signal based (`nix`), with an optional grace period
//! after which the process is killed.

use std::fmt;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::time::timeout;

use crate::error::{SupervisorError, SupervisorResult};
use shared::{Component, component_debug, component_warn};

/// Signals used to ask a child to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGINT: graceful, lets capture tools finalize their output
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGKILL, only used as escalation
    Kill,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Interrupt => write!(f, "SIGINT"),
            StopSignal::Terminate => write!(f, "SIGTERM"),
            StopSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// How a child ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Code(i32),
    Signal(i32),
    WaitFailed(String),
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Code(0))
    }

    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ProcessExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ProcessExit::Signal(signal);
            }
        }
        ProcessExit::WaitFailed(format!("unrecognised exit status: {status}"))
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Code(code) => write!(f, "exit code {code}"),
            ProcessExit::Signal(signal) => write!(f, "signal {signal}"),
            ProcessExit::WaitFailed(reason) => write!(f, "wait failed: {reason}"),
        }
    }
}

/// Stdio handles taken from the child at spawn time
#[derive(Debug, Default)]
pub struct ChildStdio {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

#[derive(Debug)]
pub struct ChildProcess {
    label: String,
    pid: Option<u32>,
    started_at: Instant,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl ChildProcess {
    /// Spawn `command` and start reaping it in the background
    pub fn spawn(command: &mut Command, label: impl Into<String>) -> SupervisorResult<(Self, ChildStdio)> {
        let label = label.into();
        let mut child = command.spawn().map_err(|source| SupervisorError::SpawnFailed {
            program: label.clone(),
            source,
        })?;

        let stdio = ChildStdio {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
        };
        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ProcessExit::from_status(status),
                Err(e) => ProcessExit::WaitFailed(e.to_string()),
            };
            let _ = exit_tx.send(Some(exit));
        });

        Ok((
            Self {
                label,
                pid,
                started_at: Instant::now(),
                exit_rx,
            },
            stdio,
        ))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn exit(&self) -> Option<ProcessExit> {
        self.exit_rx.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait for the child to exit. Safe to call from several tasks.
    pub async fn wait(&self) -> ProcessExit {
        let mut exit_rx = self.exit_rx.clone();
        let exit = exit_rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|exit| exit.clone());
        exit.unwrap_or_else(|| ProcessExit::WaitFailed("reaper task ended without a status".to_string()))
    }

    /// Send `signal`. Returns `false` if the child had already exited.
    pub fn signal(&self, signal: StopSignal) -> SupervisorResult<bool> {
        match self.pid {
            Some(pid) if !self.has_exited() => {
                send_signal(pid, signal)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Signal, wait up to `grace`, then kill if the child is still running
    pub async fn terminate(&self, signal: StopSignal, grace: Duration, component: &Component) -> ProcessExit {
        if let Err(e) = self.signal(signal) {
            component_warn!(component, "⚠️ Could not send {} to {}: {}", signal, self.label, e);
        }

        match timeout(grace, self.wait()).await {
            Ok(exit) => exit,
            Err(_) => {
                component_warn!(
                    component,
                    "⏱️ {} ignored {} for {:?}, killing",
                    self.label,
                    signal,
                    grace
                );
                if let Err(e) = self.signal(StopSignal::Kill) {
                    component_warn!(component, "⚠️ Could not kill {}: {}", self.label, e);
                }
                self.wait().await
            }
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: StopSignal) -> SupervisorResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| SupervisorError::Signal {
        pid,
        message: "pid out of range".to_string(),
    })?;
    let signal = match signal {
        StopSignal::Interrupt => Signal::SIGINT,
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };

    match kill(Pid::from_raw(raw), signal) {
        // Already gone between the exit check and the signal
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(SupervisorError::Signal {
            pid,
            message: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, _signal: StopSignal) -> SupervisorResult<()> {
    Err(SupervisorError::Signal {
        pid,
        message: "process signals are only supported on unix".to_string(),
    })
}

/// Forward a child's output stream to debug logs so its pipe never fills up
pub fn spawn_output_drain<R>(reader: R, component: Component, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                component_debug!(component, "[{}] {}", stream, line);
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let (process, _) = ChildProcess::spawn(&mut sh("exit 7"), "test").unwrap();
        assert_eq!(process.wait().await, ProcessExit::Code(7));
        assert!(process.has_exited());
        assert!(!process.signal(StopSignal::Terminate).unwrap(), "Exited child is not signalled");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let err = ChildProcess::spawn(&mut Command::new("/nonexistent/tool"), "tool").unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let (process, _) = ChildProcess::spawn(&mut sh("trap '' TERM; while true; do sleep 0.05; done"), "stubborn").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let exit = process
            .terminate(StopSignal::Terminate, Duration::from_millis(300), &Component::Supervisor)
            .await;
        assert_eq!(exit, ProcessExit::Signal(9));
    }

    #[tokio::test]
    async fn test_wait_from_several_tasks() {
        let (process, _) = ChildProcess::spawn(&mut sh("sleep 0.1"), "sleeper").unwrap();
        let (a, b) = tokio::join!(process.wait(), process.wait());
        assert!(a.success() && b.success());
        assert_eq!(process.exit(), Some(ProcessExit::Code(0)));
    }
}
