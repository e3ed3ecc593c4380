use crate::host::ProcessHost;
use crate::{format_millis, open_repository};
use aa_core::{
    AppTask, AutomationRepository, AutomationSession, RunReport, Sequencer, SequencerConfig,
    SessionId, ShortDwellPolicy, SqliteRepository,
};
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// How an app that leaves the foreground before the minimum dwell is recorded
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ShortDwell {
    Success,
    Failure,
}

impl From<ShortDwell> for ShortDwellPolicy {
    fn from(value: ShortDwell) -> Self {
        match value {
            ShortDwell::Success => ShortDwellPolicy::RecordSuccess,
            ShortDwell::Failure => ShortDwellPolicy::RecordFailure,
        }
    }
}

/// Timing options shared by `run` and `resume`
#[derive(Args, Debug, Clone)]
pub struct SequencerArgs {
    /// Seconds to keep each app in the foreground
    #[arg(long = "dwell", value_name = "SECS", default_value_t = 60)]
    pub dwell: u64,

    /// Seconds an app must stay in the foreground to count as launched
    #[arg(long = "min-dwell", value_name = "SECS", default_value_t = 3)]
    pub min_dwell: u64,

    /// Foreground polling interval in milliseconds
    #[arg(long = "poll-ms", value_name = "MS", default_value_t = 1000)]
    pub poll_ms: u64,

    /// Launch attempts per app before recording a failure
    #[arg(long = "launch-attempts", value_name = "N", default_value_t = 3)]
    pub launch_attempts: u32,

    /// Seconds to wait for a launched app to reach the foreground
    #[arg(long = "launch-grace", value_name = "SECS", default_value_t = 3)]
    pub launch_grace: u64,

    /// Outcome recorded for apps that leave before the minimum dwell
    #[arg(long = "short-dwell", value_enum, default_value_t = ShortDwell::Success)]
    pub short_dwell: ShortDwell,
}

impl SequencerArgs {
    pub fn to_config(&self) -> SequencerConfig {
        SequencerConfig::default()
            .default_dwell(Duration::from_secs(self.dwell))
            .min_dwell(Duration::from_secs(self.min_dwell))
            .poll_interval(Duration::from_millis(self.poll_ms))
            .launch_attempts(self.launch_attempts)
            .launch_grace(Duration::from_secs(self.launch_grace))
            .short_dwell(self.short_dwell.into())
    }
}

/// Arguments for starting a new automation session
#[derive(Args)]
pub struct RunArgs {
    /// Apps to launch, in order; each is a command line
    #[arg(value_name = "APP", required = true)]
    pub apps: Vec<String>,

    #[command(flatten)]
    pub sequencer: SequencerArgs,
}

/// Arguments for resuming the active automation session
#[derive(Args)]
pub struct ResumeArgs {
    #[command(flatten)]
    pub sequencer: SequencerArgs,
}

/// Arguments for deleting a session
#[derive(Args)]
pub struct DeleteArgs {
    /// Session id, as shown by `aa sessions`
    #[arg(value_name = "ID")]
    pub id: i64,
}

fn sequencer(repo: Arc<SqliteRepository>, config: SequencerConfig) -> Result<Sequencer> {
    let host = Arc::new(ProcessHost::new());
    Sequencer::new(repo, host.clone(), host, config).context("Invalid sequencer configuration")
}

/// Print each new log entry as it is recorded.
fn print_outcomes(repo: &SqliteRepository) -> JoinHandle<()> {
    let mut feed = repo.recent_logs();
    let mut seen = feed.current().first().map(|log| log.id);
    tokio::spawn(async move {
        while let Some(logs) = feed.changed().await {
            let fresh: Vec<_> = logs
                .iter()
                .take_while(|log| Some(log.id) != seen)
                .collect();
            for log in fresh.iter().rev() {
                if log.success {
                    println!("  ok    {} ({} ms)", log.app_name, log.duration_millis);
                } else {
                    println!(
                        "  fail  {}: {}",
                        log.app_name,
                        log.error_message.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            if let Some(newest) = logs.first() {
                seen = Some(newest.id);
            }
        }
    })
}

/// Wait for the driver, cancelling the session on Ctrl-C.
async fn drive(sequencer: &Sequencer, id: SessionId) -> Result<()> {
    let report = tokio::select! {
        report = sequencer.wait() => report.context("Automation session failed")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!(session.id = id.0, "interrupted, cancelling");
            sequencer.cancel().await.context("Failed to cancel automation session")?;
            None
        }
    };

    match report {
        Some(report) => print_report(&report),
        None => {
            let status = sequencer.status();
            println!(
                "Session {id}: {:?} after {}/{} apps ({} succeeded)",
                status.state, status.current_index, status.total, status.completed_count
            );
        }
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "Session {}: {:?} after {}/{} apps ({} succeeded)",
        report.session_id, report.state, report.current_index, report.total, report.completed_count
    );
}

impl RunArgs {
    pub async fn run(self, db: Option<&Path>) -> Result<()> {
        let repo = open_repository(db)?;
        let sequencer = sequencer(repo.clone(), self.sequencer.to_config())?;
        let printer = print_outcomes(&repo);

        let queue: Vec<AppTask> = self.apps.into_iter().map(AppTask::from).collect();
        let id = sequencer
            .start(queue)
            .await
            .context("Failed to start automation session")?;
        println!("Started automation session {id}");

        let result = drive(&sequencer, id).await;
        printer.abort();
        result
    }
}

impl ResumeArgs {
    pub async fn run(self, db: Option<&Path>) -> Result<()> {
        let repo = open_repository(db)?;
        let sequencer = sequencer(repo.clone(), self.sequencer.to_config())?;
        let printer = print_outcomes(&repo);

        let resumed = sequencer
            .resume()
            .await
            .context("Failed to resume automation session")?;
        let result = match resumed {
            Some(id) => {
                println!("Resumed automation session {id}");
                drive(&sequencer, id).await
            }
            None => {
                println!("No automation session to resume");
                Ok(())
            }
        };
        printer.abort();
        result
    }
}

impl DeleteArgs {
    pub async fn run(self, db: Option<&Path>) -> Result<()> {
        let repo = open_repository(db)?;
        let id = SessionId(self.id);
        let active = repo
            .get_active_session()
            .await
            .context("Failed to read active session")?;
        if active.is_some_and(|session| session.id == id) {
            anyhow::bail!("Session {id} is still active; cancel it before deleting");
        }

        if repo
            .delete_session(id)
            .await
            .context("Failed to delete session")?
        {
            println!("Deleted session {id}");
            Ok(())
        } else {
            anyhow::bail!("Session {id} not found")
        }
    }
}

/// Deactivate the active session.
///
/// A run driving it from another process stops before recording its next app.
pub async fn cancel(db: Option<&Path>) -> Result<()> {
    let repo = open_repository(db)?;
    let sequencer = sequencer(repo, SequencerConfig::default())?;
    match sequencer
        .cancel()
        .await
        .context("Failed to cancel automation session")?
    {
        Some(id) => println!("Cancelled automation session {id}"),
        None => println!("No active automation session"),
    }
    Ok(())
}

pub async fn status(db: Option<&Path>) -> Result<()> {
    let repo = open_repository(db)?;
    let active = repo
        .get_active_session()
        .await
        .context("Failed to read active session")?;
    match active {
        Some(session) => {
            println!("{}", describe(&session));
            if let Some(next) = session.current_task() {
                println!("Next app: {}", next.app_name);
            }
        }
        None => println!("No active automation session"),
    }
    Ok(())
}

pub fn sessions(db: Option<&Path>) -> Result<()> {
    let repo = open_repository(db)?;
    let sessions = repo.all_sessions().current();
    if sessions.is_empty() {
        println!("No automation sessions");
    }
    for session in &sessions {
        println!("{}", describe(session));
    }
    Ok(())
}

fn describe(session: &AutomationSession) -> String {
    format!(
        "Session {:>4}  {}  {}/{} apps, {} succeeded{}",
        session.id.0,
        format_millis(session.start_time),
        session.current_index,
        session.total(),
        session.completed_count,
        if session.is_active { "  [active]" } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_the_sequencer_config() {
        let args = SequencerArgs {
            dwell: 10,
            min_dwell: 2,
            poll_ms: 250,
            launch_attempts: 5,
            launch_grace: 0,
            short_dwell: ShortDwell::Failure,
        };
        let config = args.to_config();
        assert_eq!(config.default_dwell, Duration::from_secs(10));
        assert_eq!(config.min_dwell, Duration::from_secs(2));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.launch_attempts, 5);
        assert_eq!(config.launch_grace, Duration::ZERO);
        assert_eq!(config.short_dwell, ShortDwellPolicy::RecordFailure);
        config.validate().unwrap();
    }

    #[test]
    fn sessions_are_described_with_progress() {
        let mut session = AutomationSession::new(
            vec![AppTask::new("a"), AppTask::new("b"), AppTask::new("c")],
            0,
        );
        session.id = SessionId(7);
        let session = session.advanced(true);
        let line = describe(&session);
        assert!(line.contains("Session    7"));
        assert!(line.contains("1/3 apps, 1 succeeded  [active]"));
    }
}
