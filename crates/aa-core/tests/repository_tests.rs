//! Tests for the SQLite-backed repository and the retention sweep.

use aa_core::{
    AppTask, AutomationLog, AutomationRepository, AutomationSession, LogId, RetentionPolicy,
    SessionId, SqliteRepository,
};
use aa_local_db::Database;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

fn queue(packages: &[&str]) -> Vec<AppTask> {
    packages.iter().copied().map(AppTask::new).collect()
}

fn log_at(package: &str, timestamp: i64, success: bool) -> AutomationLog {
    let task = AppTask::new(package);
    if success {
        AutomationLog::success(&task, Duration::from_secs(5), timestamp)
    } else {
        AutomationLog::failure(&task, Duration::ZERO, "App not found", timestamp)
    }
}

#[tokio::test]
async fn session_feed_is_newest_first_and_pushed_on_write() {
    let repo = SqliteRepository::open_in_memory().unwrap();
    let mut feed = repo.all_sessions();
    assert!(feed.current().is_empty());

    let mut first = AutomationSession::new(queue(&["com.a"]), 1_000);
    first.id = repo.create_session(&first).await.unwrap();
    assert_eq!(feed.changed().await.unwrap().len(), 1);

    first.is_active = false;
    repo.update_session(&first).await.unwrap();
    let sessions = feed.changed().await.unwrap();
    assert!(!sessions[0].is_active);

    let second = AutomationSession::new(queue(&["com.b", "com.c"]), 2_000);
    let second_id = repo.create_session(&second).await.unwrap();
    let sessions = feed.changed().await.unwrap();
    let ids: Vec<SessionId> = sessions.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![second_id, first.id]);
    assert_eq!(sessions[0].app_queue, queue(&["com.b", "com.c"]));
}

#[tokio::test]
async fn second_active_session_conflicts_across_connections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.db");
    let one = SqliteRepository::new(Database::open(&path).unwrap()).unwrap();
    let two = SqliteRepository::new(Database::open(&path).unwrap()).unwrap();

    let id = one
        .create_session(&AutomationSession::new(queue(&["com.a"]), 1))
        .await
        .unwrap();

    let err = two
        .create_session(&AutomationSession::new(queue(&["com.b"]), 2))
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {err}");

    // Inactive rows never conflict
    let mut history = AutomationSession::new(queue(&["com.c"]), 3);
    history.is_active = false;
    two.create_session(&history).await.unwrap();

    let active = two.get_active_session().await.unwrap().unwrap();
    assert_eq!(active.id, id);
}

#[tokio::test]
async fn updating_a_missing_session_fails() {
    let repo = SqliteRepository::open_in_memory().unwrap();
    let mut ghost = AutomationSession::new(queue(&["com.a"]), 1);
    ghost.id = SessionId(42);
    let err = repo.update_session(&ghost).await.unwrap_err();
    assert!(err.to_string().contains("Session 42 not found"));
}

#[tokio::test]
async fn deleting_a_session_reports_whether_it_existed() {
    let repo = SqliteRepository::open_in_memory().unwrap();
    let id = repo
        .create_session(&AutomationSession::new(queue(&["com.a"]), 1))
        .await
        .unwrap();

    assert!(repo.delete_session(id).await.unwrap());
    assert!(!repo.delete_session(id).await.unwrap());
    assert!(repo.get_active_session().await.unwrap().is_none());
}

#[tokio::test]
async fn explicit_log_ids_must_be_unique() {
    let repo = SqliteRepository::open_in_memory().unwrap();
    let mut log = log_at("com.a", 10, true);
    log.id = LogId(7);
    assert_eq!(repo.insert_log(&log).await.unwrap(), LogId(7));
    assert!(repo.insert_log(&log).await.is_err());

    // Auto-assigned ids continue past the explicit one
    let next = repo.insert_log(&log_at("com.b", 11, true)).await.unwrap();
    assert!(next > LogId(7));
}

#[tokio::test]
async fn failed_feed_only_holds_failures() {
    let repo = SqliteRepository::open_in_memory().unwrap();
    repo.insert_log(&log_at("com.a", 1, true)).await.unwrap();
    repo.insert_log(&log_at("com.b", 2, false)).await.unwrap();
    repo.insert_log(&log_at("com.c", 3, false)).await.unwrap();

    let failed = repo.failed_logs().current();
    let packages: Vec<&str> = failed.iter().map(|l| l.app_package.as_str()).collect();
    assert_eq!(packages, vec!["com.c", "com.b"]);
    assert!(failed.iter().all(|l| l.error_message.as_deref() == Some("App not found")));
    assert_eq!(repo.recent_logs().current().len(), 3);
}

#[tokio::test]
async fn purge_removes_strictly_older_entries() {
    let repo = SqliteRepository::open_in_memory().unwrap();
    for ts in [100, 199, 200, 201] {
        repo.insert_log(&log_at("com.a", ts, true)).await.unwrap();
    }
    let mut feed = repo.recent_logs();

    assert_eq!(repo.purge_logs_older_than(200).await.unwrap(), 2);
    let remaining: Vec<i64> = feed
        .changed()
        .await
        .unwrap()
        .iter()
        .map(|l| l.timestamp)
        .collect();
    assert_eq!(remaining, vec![201, 200]);

    assert_eq!(repo.purge_logs_older_than(200).await.unwrap(), 0);
}

#[tokio::test]
async fn retention_sweep_keeps_the_configured_window() {
    let repo = SqliteRepository::open_in_memory().unwrap();
    let now = 100 * DAY_MILLIS;
    repo.insert_log(&log_at("com.old", now - 31 * DAY_MILLIS, false))
        .await
        .unwrap();
    repo.insert_log(&log_at("com.edge", now - 30 * DAY_MILLIS, true))
        .await
        .unwrap();
    repo.insert_log(&log_at("com.new", now - DAY_MILLIS, true))
        .await
        .unwrap();

    let policy = RetentionPolicy::default();
    assert_eq!(policy.cutoff(now), now - 30 * DAY_MILLIS);
    assert_eq!(policy.sweep(&repo, now).await.unwrap(), 1);

    let kept: Vec<String> = repo
        .recent_logs()
        .current()
        .into_iter()
        .map(|l| l.app_package)
        .collect();
    assert_eq!(kept, vec!["com.new", "com.edge"]);

    assert_eq!(RetentionPolicy::new(0).sweep(&repo, now).await.unwrap(), 2);
}

#[tokio::test]
async fn recording_a_step_commits_log_and_progress_together() {
    let repo = SqliteRepository::open_in_memory().unwrap();
    let mut session = AutomationSession::new(queue(&["com.a", "com.b"]), 1);
    session.id = repo.create_session(&session).await.unwrap();

    let mut taken = log_at("com.x", 5, true);
    taken.id = LogId(9);
    repo.insert_log(&taken).await.unwrap();

    // The progress update succeeds, then the log insert collides
    let mut step = log_at("com.a", 10, true);
    step.id = LogId(9);
    let next = session.advanced(true);
    assert!(repo.record_step(&step, &next).await.is_err());

    let stored = repo.get_active_session().await.unwrap().unwrap();
    assert_eq!((stored.current_index, stored.completed_count), (0, 0));
    assert_eq!(repo.recent_logs().current().len(), 1);

    step.id = LogId::UNASSIGNED;
    assert!(repo.record_step(&step, &next).await.unwrap().is_some());
    let stored = repo.get_active_session().await.unwrap().unwrap();
    assert_eq!((stored.current_index, stored.completed_count), (1, 1));
    assert_eq!(repo.recent_logs().current().len(), 2);
}

#[tokio::test]
async fn steps_are_not_recorded_once_the_session_is_inactive() {
    let repo = SqliteRepository::open_in_memory().unwrap();
    let mut session = AutomationSession::new(queue(&["com.a", "com.b"]), 1);
    session.id = repo.create_session(&session).await.unwrap();
    let next = session.advanced(true);

    session.is_active = false;
    repo.update_session(&session).await.unwrap();

    let recorded = repo.record_step(&log_at("com.a", 10, true), &next).await.unwrap();
    assert_eq!(recorded, None);
    assert!(repo.recent_logs().current().is_empty());

    let stored = &repo.all_sessions().current()[0];
    assert!(!stored.is_active);
    assert_eq!(stored.current_index, 0);
}

#[tokio::test]
async fn lock_waits_do_not_block_the_runtime() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.db");
    let holder = Database::open(&path).unwrap();
    let repo = Arc::new(SqliteRepository::new(Database::open(&path).unwrap()).unwrap());

    // Another connection holds the write lock
    let conn = holder.lock().unwrap();
    conn.execute_batch("BEGIN IMMEDIATE").unwrap();

    let writer = tokio::spawn({
        let repo = Arc::clone(&repo);
        async move {
            repo.create_session(&AutomationSession::new(queue(&["com.a"]), 1))
                .await
        }
    });

    // The single runtime thread keeps running timers while the insert waits
    let started = std::time::Instant::now();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!writer.is_finished());

    conn.execute_batch("COMMIT").unwrap();
    drop(conn);
    let id = writer.await.unwrap().unwrap();
    assert_eq!(repo.get_active_session().await.unwrap().unwrap().id, id);
}
