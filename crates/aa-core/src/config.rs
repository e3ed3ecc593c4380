//! Timing and retry configuration for the sequencer.

use crate::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to record when an app leaves the foreground before `min_dwell`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShortDwellPolicy {
    /// Record the observed dwell as a successful run.
    #[default]
    RecordSuccess,
    /// Record a failure and do not count the app as completed.
    RecordFailure,
}

/// Sequencer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// How often the monitor is sampled while an app is in the foreground.
    pub poll_interval: Duration,
    /// Dwell below which leaving the foreground is inconclusive.
    pub min_dwell: Duration,
    /// Dwell window for queue entries without their own duration.
    pub default_dwell: Duration,
    /// Launch attempts per app before it is logged as failed and skipped.
    pub launch_attempts: u32,
    /// Wait after a launch before checking that the app reached the foreground.
    /// Zero skips the check.
    pub launch_grace: Duration,
    /// Backoff unit between launch attempts; the n-th retry waits `n * launch_backoff`.
    pub launch_backoff: Duration,
    /// Retry schedule for session and log writes.
    pub persist_retry: RetryPolicy,
    pub short_dwell: ShortDwellPolicy,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            min_dwell: Duration::from_secs(3),
            default_dwell: Duration::from_secs(60),
            launch_attempts: 3,
            launch_grace: Duration::from_secs(3),
            launch_backoff: Duration::from_secs(1),
            persist_retry: RetryPolicy::default(),
            short_dwell: ShortDwellPolicy::default(),
        }
    }
}

impl SequencerConfig {
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn min_dwell(mut self, min_dwell: Duration) -> Self {
        self.min_dwell = min_dwell;
        self
    }

    pub fn default_dwell(mut self, default_dwell: Duration) -> Self {
        self.default_dwell = default_dwell;
        self
    }

    pub fn launch_attempts(mut self, launch_attempts: u32) -> Self {
        self.launch_attempts = launch_attempts;
        self
    }

    pub fn launch_grace(mut self, launch_grace: Duration) -> Self {
        self.launch_grace = launch_grace;
        self
    }

    pub fn launch_backoff(mut self, launch_backoff: Duration) -> Self {
        self.launch_backoff = launch_backoff;
        self
    }

    pub fn persist_retry(mut self, persist_retry: RetryPolicy) -> Self {
        self.persist_retry = persist_retry;
        self
    }

    pub fn short_dwell(mut self, short_dwell: ShortDwellPolicy) -> Self {
        self.short_dwell = short_dwell;
        self
    }

    /// Reject settings the sequencer cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.poll_interval.is_zero() {
            return Err(crate::Error::config("poll_interval must be greater than zero"));
        }
        if self.launch_attempts == 0 {
            return Err(crate::Error::config("launch_attempts must be at least 1"));
        }
        if self.persist_retry.max_attempts == 0 {
            return Err(crate::Error::config("persist_retry.max_attempts must be at least 1"));
        }
        if self.default_dwell < self.min_dwell {
            return Err(crate::Error::config(format!(
                "default_dwell ({}ms) is shorter than min_dwell ({}ms)",
                self.default_dwell.as_millis(),
                self.min_dwell.as_millis()
            )));
        }
        Ok(())
    }
}
