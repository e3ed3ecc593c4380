use crate::{format_millis, open_repository};
use aa_core::{session::now_millis, AutomationLog, AutomationRepository, RetentionPolicy};
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Arguments for listing launch outcomes
#[derive(Args)]
pub struct LogsArgs {
    /// Only show failed launches
    #[arg(long = "failed")]
    pub failed: bool,

    /// Maximum number of entries to show
    #[arg(short = 'n', long = "limit", value_name = "N", default_value_t = 20)]
    pub limit: usize,

    /// Print entries as JSON lines
    #[arg(long = "json")]
    pub json: bool,
}

/// Arguments for removing old launch outcomes
#[derive(Args)]
pub struct PurgeArgs {
    /// Keep entries from the last N days
    #[arg(long = "days", value_name = "N", conflicts_with = "before")]
    pub days: Option<u32>,

    /// Remove entries older than this epoch-millisecond timestamp
    #[arg(long = "before", value_name = "MILLIS")]
    pub before: Option<i64>,
}

impl LogsArgs {
    pub fn run(self, db: Option<&Path>) -> Result<()> {
        let repo = open_repository(db)?;
        let logs = if self.failed {
            repo.failed_logs().current()
        } else {
            repo.recent_logs().current()
        };

        if logs.is_empty() && !self.json {
            println!("No launch outcomes recorded");
            return Ok(());
        }
        for log in logs.iter().take(self.limit) {
            if self.json {
                println!(
                    "{}",
                    serde_json::to_string(log).context("Failed to serialize log entry")?
                );
            } else {
                println!("{}", format_log(log));
            }
        }
        Ok(())
    }
}

fn format_log(log: &AutomationLog) -> String {
    let outcome = if log.success { "ok  " } else { "FAIL" };
    let mut line = format!(
        "{}  {}  {:<24} {:>8} ms",
        format_millis(log.timestamp),
        outcome,
        log.app_name,
        log.duration_millis
    );
    if let Some(message) = &log.error_message {
        line.push_str("  ");
        line.push_str(message);
    }
    line
}

impl PurgeArgs {
    pub async fn run(self, db: Option<&Path>) -> Result<()> {
        let repo = open_repository(db)?;
        let removed = match self.before {
            Some(before) => repo
                .purge_logs_older_than(before)
                .await
                .context("Failed to purge logs")?,
            None => {
                let policy = self.days.map(RetentionPolicy::new).unwrap_or_default();
                policy
                    .sweep(repo.as_ref(), now_millis())
                    .await
                    .context("Failed to purge logs")?
            }
        };
        println!("Removed {removed} log entries");
        Ok(())
    }
}
