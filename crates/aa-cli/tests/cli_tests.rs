use aa_cli::automation::ShortDwell;
use aa_cli::{open_repository, Cli, Commands, Parser};
use aa_core::{AutomationRepository, SessionId};
use tempfile::TempDir;

#[test]
fn test_cli_parsing_run() {
    let args = vec![
        "aa",
        "run",
        "firefox",
        "vlc --fullscreen",
        "--dwell",
        "30",
        "--short-dwell",
        "failure",
    ];

    let cli = Cli::try_parse_from(args).unwrap();
    match cli.command {
        Commands::Run(run) => {
            assert_eq!(run.apps, vec!["firefox", "vlc --fullscreen"]);
            assert_eq!(run.sequencer.dwell, 30);
            assert_eq!(run.sequencer.min_dwell, 3);
            assert_eq!(run.sequencer.short_dwell, ShortDwell::Failure);
        }
        _ => panic!("expected run command"),
    }
}

#[test]
fn test_cli_run_requires_apps() {
    assert!(Cli::try_parse_from(vec!["aa", "run"]).is_err());
}

#[test]
fn test_cli_parsing_global_db() {
    let cli = Cli::try_parse_from(vec!["aa", "status", "--db", "/tmp/state.db"]).unwrap();
    assert!(matches!(cli.command, Commands::Status));
    assert_eq!(cli.db.unwrap().to_str(), Some("/tmp/state.db"));
}

#[test]
fn test_cli_parsing_logs() {
    let cli = Cli::try_parse_from(vec!["aa", "logs", "--failed", "-n", "5"]).unwrap();
    match cli.command {
        Commands::Logs(logs) => {
            assert!(logs.failed);
            assert_eq!(logs.limit, 5);
            assert!(!logs.json);
        }
        _ => panic!("expected logs command"),
    }
}

#[test]
fn test_cli_purge_options_conflict() {
    let cli = Cli::try_parse_from(vec!["aa", "purge", "--days", "7"]).unwrap();
    assert!(matches!(cli.command, Commands::Purge(ref p) if p.days == Some(7)));

    assert!(Cli::try_parse_from(vec!["aa", "purge", "--days", "7", "--before", "100"]).is_err());
}

#[test]
fn test_cli_parsing_delete() {
    let cli = Cli::try_parse_from(vec!["aa", "delete", "12"]).unwrap();
    assert!(matches!(cli.command, Commands::Delete(ref d) if d.id == 12));
    assert!(Cli::try_parse_from(vec!["aa", "delete", "twelve"]).is_err());
}

#[test]
fn test_cli_invalid_command() {
    assert!(Cli::try_parse_from(vec!["aa", "launch", "firefox"]).is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn run_records_a_session_and_its_outcomes() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("state.db");
    let cli = Cli::try_parse_from(vec![
        "aa",
        "--db",
        db.to_str().unwrap(),
        "run",
        "sleep 30",
        "aa-no-such-program",
        "--dwell",
        "1",
        "--min-dwell",
        "1",
        "--poll-ms",
        "100",
        "--launch-attempts",
        "1",
        "--launch-grace",
        "0",
    ])
    .unwrap();
    let Commands::Run(run) = cli.command else {
        panic!("expected run command");
    };
    run.run(cli.db.as_deref()).await.unwrap();

    let repo = open_repository(Some(&db)).unwrap();
    assert!(repo.get_active_session().await.unwrap().is_none());

    let sessions = repo.all_sessions().current();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].current_index, 2);
    assert_eq!(sessions[0].completed_count, 1);

    let mut logs = repo.recent_logs().current();
    logs.reverse();
    assert_eq!(logs.len(), 2);
    assert!(logs[0].success);
    assert!(logs[0].duration_millis >= 1000);
    assert!(!logs[1].success);

    // Finished sessions can be removed from history
    let delete = Cli::try_parse_from(vec!["aa", "delete", &sessions[0].id.0.to_string()]).unwrap();
    let Commands::Delete(delete) = delete.command else {
        panic!("expected delete command");
    };
    delete.run(Some(&db)).await.unwrap();
    assert!(!repo.delete_session(SessionId(sessions[0].id.0)).await.unwrap());
}
