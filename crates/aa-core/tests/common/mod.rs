//! Shared fixtures for the sequencer tests.

#![allow(dead_code)]

use aa_core::{
    AutomationLog, AutomationRepository, AutomationSession, LiveQuery, LogId, Sequencer,
    SequencerConfig, SessionId, SqliteRepository,
};
use aa_ports_mock::MockDevice;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fast, deterministic timings for paused-clock tests.
pub fn test_config() -> SequencerConfig {
    SequencerConfig::default()
        .poll_interval(Duration::from_millis(500))
        .min_dwell(Duration::from_secs(3))
        .default_dwell(Duration::from_secs(60))
        .launch_attempts(1)
        .launch_grace(Duration::ZERO)
        .launch_backoff(Duration::from_secs(1))
}

/// Repository wrapper that checks session invariants on every update and can
/// be told to fail the next few updates.
pub struct CheckedRepository {
    inner: SqliteRepository,
    failing_updates: AtomicU32,
    last_index: Mutex<HashMap<SessionId, usize>>,
}

impl CheckedRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteRepository::open_in_memory().expect("in-memory database"),
            failing_updates: AtomicU32::new(0),
            last_index: Mutex::new(HashMap::new()),
        })
    }

    pub fn fail_next_updates(&self, count: u32) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<AutomationSession> {
        self.inner.all_sessions().current()
    }

    pub fn session(&self, id: SessionId) -> AutomationSession {
        self.sessions()
            .into_iter()
            .find(|s| s.id == id)
            .expect("session should exist")
    }

    /// Assert the session invariants, then fail if a failure is pending.
    fn check_progress(&self, session: &AutomationSession) -> aa_core::Result<()> {
        assert!(session.invariants_hold(), "invariants violated: {session:?}");
        if let Some(previous) = self.last_index.lock().unwrap().get(&session.id) {
            assert!(session.current_index >= *previous, "current_index went backwards");
        }

        let remaining = self.failing_updates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_updates.store(remaining - 1, Ordering::SeqCst);
            return Err(aa_core::Error::generic("simulated disk failure"));
        }
        Ok(())
    }

    fn committed(&self, session: &AutomationSession) {
        self.last_index
            .lock()
            .unwrap()
            .insert(session.id, session.current_index);
    }

    /// All log entries in insertion order.
    pub fn logs(&self) -> Vec<AutomationLog> {
        let mut logs = self.inner.recent_logs().current();
        logs.sort_by_key(|log| log.id);
        logs
    }
}

#[async_trait]
impl AutomationRepository for CheckedRepository {
    async fn create_session(&self, session: &AutomationSession) -> aa_core::Result<SessionId> {
        assert!(session.invariants_hold());
        self.inner.create_session(session).await
    }

    async fn update_session(&self, session: &AutomationSession) -> aa_core::Result<()> {
        self.check_progress(session)?;
        self.inner.update_session(session).await?;
        self.committed(session);
        Ok(())
    }

    async fn record_step(
        &self,
        log: &AutomationLog,
        session: &AutomationSession,
    ) -> aa_core::Result<Option<LogId>> {
        self.check_progress(session)?;
        let recorded = self.inner.record_step(log, session).await?;
        if recorded.is_some() {
            self.committed(session);
        }
        Ok(recorded)
    }

    async fn delete_session(&self, id: SessionId) -> aa_core::Result<bool> {
        self.inner.delete_session(id).await
    }

    async fn get_active_session(&self) -> aa_core::Result<Option<AutomationSession>> {
        self.inner.get_active_session().await
    }

    async fn insert_log(&self, log: &AutomationLog) -> aa_core::Result<LogId> {
        self.inner.insert_log(log).await
    }

    async fn purge_logs_older_than(&self, before_millis: i64) -> aa_core::Result<usize> {
        self.inner.purge_logs_older_than(before_millis).await
    }

    fn all_sessions(&self) -> LiveQuery<Vec<AutomationSession>> {
        self.inner.all_sessions()
    }

    fn recent_logs(&self) -> LiveQuery<Vec<AutomationLog>> {
        self.inner.recent_logs()
    }

    fn failed_logs(&self) -> LiveQuery<Vec<AutomationLog>> {
        self.inner.failed_logs()
    }
}

pub fn sequencer(
    repo: &Arc<CheckedRepository>,
    device: &MockDevice,
    config: SequencerConfig,
) -> Sequencer {
    Sequencer::new(
        repo.clone(),
        Arc::new(device.clone()),
        Arc::new(device.clone()),
        config,
    )
    .expect("valid config")
}
