//! Liveness monitor
//!
//! Every tick polls the status source for each enabled source in watchlist
//! order, starts or stops capture to match, and delivers the status digest
//! unless it repeats the last delivered one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::{MissedTickBehavior, interval};

use crate::config::{MonitoredSource, SupervisorConfig};
use crate::core::{DigestDedup, SourceStatus, render_digest};
use crate::traits::{CaptureControl, Notification, Notifier, StartOutcome, StatusSource, StopOutcome};
use shared::{Component, SourceKey, component_debug, component_error, component_info, component_warn, logging};

pub const DIGEST_TITLE: &str = "Stream Monitoring";
pub const STARTUP_MESSAGE: &str = "Checking is live, waiting for streamers...";

/// Shared, ordered set of monitored sources
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    sources: Arc<RwLock<Vec<MonitoredSource>>>,
}

impl Watchlist {
    pub fn new(sources: Vec<MonitoredSource>) -> Self {
        Self {
            sources: Arc::new(RwLock::new(sources)),
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.streams_to_monitor.clone())
    }

    /// Enabled sources in order
    pub async fn enabled(&self) -> Vec<SourceKey> {
        self.sources
            .read()
            .await
            .iter()
            .filter(|source| source.enabled)
            .map(|source| source.key.clone())
            .collect()
    }

    pub async fn all(&self) -> Vec<MonitoredSource> {
        self.sources.read().await.clone()
    }

    /// Enable `key`, appending it when unknown
    pub async fn watch(&self, key: SourceKey) {
        let mut sources = self.sources.write().await;
        match sources.iter_mut().find(|source| source.key == key) {
            Some(source) => source.enabled = true,
            None => sources.push(MonitoredSource { key, enabled: true }),
        }
    }

    /// Drop `key`; returns whether it was present
    pub async fn unwatch(&self, key: &SourceKey) -> bool {
        let mut sources = self.sources.write().await;
        let before = sources.len();
        sources.retain(|source| &source.key != key);
        before != sources.len()
    }
}

/// What a single tick observed and did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub statuses: Vec<SourceStatus>,
    pub digest: String,
    pub started: Vec<SourceKey>,
    pub stopped: Vec<SourceKey>,
    pub notified: bool,
    pub query_failures: usize,
}

pub struct LivenessMonitor<S, N, C>
where
    S: StatusSource + 'static,
    N: Notifier + 'static,
    C: CaptureControl + 'static,
{
    status: S,
    notifier: N,
    capture: C,
    watchlist: Watchlist,
    period: Duration,
    dedup: Mutex<DigestDedup>,
    startup_sent: AtomicBool,
}

impl<S, N, C> LivenessMonitor<S, N, C>
where
    S: StatusSource + 'static,
    N: Notifier + 'static,
    C: CaptureControl + 'static,
{
    pub fn new(status: S, notifier: N, capture: C, watchlist: Watchlist, period: Duration) -> Self {
        Self {
            status,
            notifier,
            capture,
            watchlist,
            period,
            dedup: Mutex::new(DigestDedup::new()),
            startup_sent: AtomicBool::new(false),
        }
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.watchlist
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Liveness of `source`, `None` when the query failed
    pub async fn check(&self, source: &SourceKey) -> Option<bool> {
        match self.status.is_live(source).await {
            Ok(live) => {
                component_debug!(Component::Monitor, "{} is {}", source, if live { "LIVE" } else { "OFFLINE" });
                Some(live)
            }
            Err(e) => {
                component_warn!(Component::Monitor, "⚠️ Status check for {} failed, assuming offline: {}", source, e);
                None
            }
        }
    }

    /// One polling cycle. Never fails: every error is logged and absorbed.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for key in self.watchlist.enabled().await {
            let answer = self.check(&key).await;
            if answer.is_none() {
                report.query_failures += 1;
            }
            let live = answer.unwrap_or(false);

            let recording = self.capture.is_recording(&key).await;
            if live && !recording {
                component_info!(Component::Monitor, "📡 {} is live, starting recording", key);
                match self.capture.start(&key).await {
                    Ok(StartOutcome::Started { .. }) => report.started.push(key.clone()),
                    Ok(StartOutcome::AlreadyRecording) => {}
                    Err(e) => component_error!(Component::Monitor, "❌ Could not start {}: {}", key, e),
                }
            } else if !live && recording {
                component_info!(Component::Monitor, "📴 {} is offline, stopping recording", key);
                match self.capture.stop(&key).await {
                    Ok(StopOutcome::Stopped) => report.stopped.push(key.clone()),
                    Ok(StopOutcome::NotFound) => {}
                    Err(e) => component_error!(Component::Monitor, "❌ Could not stop {}: {}", key, e),
                }
            }

            report.statuses.push(SourceStatus { key, live });
        }

        report.digest = render_digest(&report.statuses);
        report.notified = self.deliver_digest(&report.digest).await;
        report
    }

    /// Send `digest` unless it equals the last delivered one.
    /// Only a successful delivery updates the dedup state.
    async fn deliver_digest(&self, digest: &str) -> bool {
        let mut dedup = self.dedup.lock().await;
        if !dedup.should_deliver(digest) {
            return false;
        }

        let notification = Notification::new(DIGEST_TITLE, digest.trim(), Notification::GREEN);
        match self.notifier.notify(&notification).await {
            Ok(()) => {
                dedup.mark_delivered(digest);
                true
            }
            Err(e) => {
                component_warn!(Component::Monitor, "⚠️ Could not deliver status digest: {}", e);
                false
            }
        }
    }

    /// Liveness of every watched source, enabled or not, without acting on it
    pub async fn watchlist_status(&self) -> Vec<SourceStatus> {
        let mut statuses = Vec::new();
        for source in self.watchlist.all().await {
            let live = self.check(&source.key).await.unwrap_or(false);
            statuses.push(SourceStatus { key: source.key, live });
        }
        statuses
    }

    /// Send the startup notification once per monitor
    pub async fn announce_startup(&self) {
        if self.startup_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let notification = Notification::new(DIGEST_TITLE, STARTUP_MESSAGE, Notification::LAWN_GREEN);
        if let Err(e) = self.notifier.notify(&notification).await {
            component_warn!(Component::Monitor, "⚠️ Could not send startup notification: {}", e);
        }
    }

    /// Tick every period until `shutdown` turns true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        logging::log_startup(&Component::Monitor, &format!("polling every {:?}", self.period));
        self.announce_startup().await;

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    component_debug!(
                        Component::Monitor,
                        "Tick: {} sources, {} started, {} stopped",
                        report.statuses.len(),
                        report.started.len(),
                        report.stopped.len()
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        logging::log_shutdown(&Component::Monitor, "shutdown requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> SourceKey {
        SourceKey::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_watchlist_keeps_order() {
        let watchlist = Watchlist::new(vec![
            MonitoredSource { key: key("b"), enabled: true },
            MonitoredSource { key: key("a"), enabled: false },
        ]);
        watchlist.watch(key("c")).await;
        watchlist.watch(key("a")).await;

        assert_eq!(watchlist.enabled().await, vec![key("b"), key("a"), key("c")]);
        assert!(watchlist.unwatch(&key("b")).await);
        assert!(!watchlist.unwatch(&key("b")).await);
        assert_eq!(watchlist.enabled().await, vec![key("a"), key("c")]);
    }
}
