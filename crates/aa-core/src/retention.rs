//! Retention sweep for the outcome log.
//!
//! The sweep is driven by whoever schedules it; the sequencer never purges.

use crate::AutomationRepository;
use std::time::Duration;
use tracing::info;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// How long log entries are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub days_to_keep: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { days_to_keep: 30 }
    }
}

impl RetentionPolicy {
    pub fn new(days_to_keep: u32) -> Self {
        Self { days_to_keep }
    }

    /// Entries older than this epoch-millis timestamp are expired.
    pub fn cutoff(&self, now_millis: i64) -> i64 {
        let keep = DAY.saturating_mul(self.days_to_keep).as_millis() as i64;
        now_millis.saturating_sub(keep)
    }

    /// Delete expired entries. Returns the number removed.
    pub async fn sweep(
        &self,
        repo: &dyn AutomationRepository,
        now_millis: i64,
    ) -> crate::Result<usize> {
        let cutoff = self.cutoff(now_millis);
        let removed = repo.purge_logs_older_than(cutoff).await?;
        info!(removed, cutoff, days_to_keep = self.days_to_keep, "purged expired automation logs");
        Ok(removed)
    }
}
