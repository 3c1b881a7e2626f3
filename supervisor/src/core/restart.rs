//! Bounded exponential backoff for restarting crashed ad-hoc captures

use std::time::Duration;

use crate::config::RestartSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// A run lasting at least this long resets the consecutive-failure count
    pub stable_after: Duration,
}

impl RestartPolicy {
    /// Immediate, unlimited restarts
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            stable_after: Duration::MAX,
        }
    }

    /// Delay before restart attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from(&RestartSettings::default())
    }
}

impl From<&RestartSettings> for RestartPolicy {
    fn from(settings: &RestartSettings) -> Self {
        let initial_delay = Duration::from_millis(settings.initial_delay_ms);
        Self {
            max_attempts: settings.max_attempts,
            initial_delay,
            max_delay: Duration::from_millis(settings.max_delay_ms).max(initial_delay),
            stable_after: Duration::from_secs(settings.stable_after_secs),
        }
    }
}

/// Per-recording consecutive failure bookkeeping
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    consecutive_failures: u32,
    total_restarts: u32,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an abnormal exit after a run of `run_time`.
    ///
    /// Returns the delay before the next attempt, or `None` once the policy
    /// is exhausted.
    pub fn on_abnormal_exit(&mut self, policy: &RestartPolicy, run_time: Duration) -> Option<Duration> {
        if run_time >= policy.stable_after {
            self.consecutive_failures = 0;
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if let Some(max) = policy.max_attempts {
            if self.consecutive_failures > max {
                return None;
            }
        }

        self.total_restarts = self.total_restarts.saturating_add(1);
        Some(policy.delay_for(self.consecutive_failures))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_restarts(&self) -> u32 {
        self.total_restarts
    }
}
