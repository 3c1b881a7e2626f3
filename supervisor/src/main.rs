//! Main entry point for the streamkeeper binary
//!
//! Loads the configuration, wires the real services into the supervisor,
//! runs the liveness monitor and an optional stdin command console, and stops
//! every recording gracefully on Ctrl+C.

use anyhow::Context;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, watch};

use shared::{Component, component_error, component_info, logging};
use supervisor::core::render_digest;
use supervisor::services::{ExternalToolchain, NotifierChannel, RcloneArchive, TwitchStatusSource};
use supervisor::{Command, RemoteArchive, Supervisor, config};

type AppSupervisor = Supervisor<TwitchStatusSource, NotifierChannel>;

/// Records live streams while they are live and archives the recordings
#[derive(Parser)]
#[command(name = "streamkeeper")]
#[command(about = "Supervises live stream recordings and archives them")]
pub struct Args {
    /// Path of the JSON configuration file
    #[arg(long, default_value = config::SupervisorConfig::DEFAULT_PATH)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Poll every watched source once, print the status digest and exit
    #[arg(long)]
    pub once: bool,

    /// Do not read commands from stdin
    #[arg(long)]
    pub no_console: bool,

    /// Caller identity used for console commands (defaults to the authorized caller)
    #[arg(long)]
    pub caller: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing_with_level(Some(&args.log_level));

    let config = config::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?;
    logging::log_startup(
        &Component::Supervisor,
        &format!(
            "{} watched sources, recordings in {}",
            config.streams_to_monitor.len(),
            config.recordings_path.display()
        ),
    );

    let caller = args
        .caller
        .clone()
        .or_else(|| config.authorized_caller.clone())
        .unwrap_or_else(|| "console".to_string());
    let supervisor = Arc::new(build_supervisor(config));

    if args.once {
        let statuses = supervisor.monitor().watchlist_status().await;
        println!("{}", render_digest(&statuses));
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = supervisor.monitor();
    let monitor_task = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { monitor.run(shutdown_rx).await }
    });

    if !args.no_console {
        tokio::spawn(run_console(supervisor.clone(), args.config.clone(), caller, shutdown_rx));
    }

    match signal::ctrl_c().await {
        Ok(()) => logging::log_shutdown(&Component::Supervisor, "Received Ctrl+C signal"),
        Err(err) => logging::log_error(&Component::Supervisor, "Signal handling", &err),
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_task.await {
        logging::log_error(&Component::Monitor, "Monitor task", &e);
    }
    supervisor.shutdown().await;

    logging::log_success(&Component::Supervisor, "Supervisor stopped gracefully");
    Ok(())
}

fn build_supervisor(config: config::SupervisorConfig) -> AppSupervisor {
    let status = TwitchStatusSource::from_config(&config);
    let notifier = NotifierChannel::from_config(&config);
    let toolchain = Arc::new(ExternalToolchain::from_config(&config));
    let archive = config
        .rclone_enabled
        .then(|| Arc::new(RcloneArchive::from_config(&config)) as Arc<dyn RemoteArchive>);

    Supervisor::new(config, status, notifier, toolchain, archive)
}

/// Execute stdin lines as commands until shutdown or end of input.
/// Watchlist changes are written back to the config file.
async fn run_console(
    supervisor: Arc<AppSupervisor>,
    config_path: PathBuf,
    caller: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lines = stdin_lines();
    component_info!(Component::Supervisor, "⌨️ Console ready, type .help for commands");

    loop {
        let line = tokio::select! {
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("[Error] {e}");
                continue;
            }
        };
        let persist = command.changes_watchlist();

        match supervisor.execute(&caller, command).await {
            Ok(outcome) => println!("{outcome}"),
            Err(e) => println!("[Error] {e}"),
        }

        if persist {
            let watchlist = supervisor.watchlist().all().await;
            if let Err(e) = config::save_watchlist(&config_path, &watchlist) {
                component_error!(Component::Supervisor, "❌ Could not save {}: {}", config_path.display(), e);
            }
        }
    }
}

/// Stdin is read on a plain thread so a pending read never holds up shutdown
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
