//! App Automation CLI library

pub mod automation;
pub mod host;
pub mod logs;

use aa_core::SqliteRepository;
use aa_local_db::Database;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Re-export CLI types for testing
pub use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aa")]
#[command(about = "App Automation CLI")]
#[command(version, author, long_about = None)]
pub struct Cli {
    /// Path to the state database (defaults to $AA_HOME/state.db or the platform state dir)
    #[arg(long = "db", value_name = "PATH", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch each app in turn and wait for the queue to finish
    Run(automation::RunArgs),
    /// Continue the interrupted automation session
    Resume(automation::ResumeArgs),
    /// Stop the active automation session
    Cancel,
    /// Show the active automation session
    Status,
    /// List automation sessions, newest first
    Sessions,
    /// Delete an automation session from history
    Delete(automation::DeleteArgs),
    /// Show recent launch outcomes
    Logs(logs::LogsArgs),
    /// Remove old launch outcomes
    Purge(logs::PurgeArgs),
}

/// Open the repository at `path`, or at the default location.
pub fn open_repository(path: Option<&Path>) -> Result<Arc<SqliteRepository>> {
    let db = match path {
        Some(path) => Database::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?,
        None => Database::open_default().context("Failed to open default database")?,
    };
    let repo = SqliteRepository::new(db).context("Failed to load automation state")?;
    Ok(Arc::new(repo))
}

/// Format epoch milliseconds as a local timestamp.
pub(crate) fn format_millis(millis: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(millis) {
        Some(utc) => utc
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => millis.to_string(),
    }
}
