//! Session and log persistence behind a narrow async interface.

use crate::session::{AutomationLog, AutomationSession, LogId, SessionId};
use aa_local_db::{Database, LogStore, SessionStore, RECENT_LOGS_LIMIT};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

type Feeds = (Vec<AutomationLog>, Vec<AutomationLog>);

/// Push-based view over a query result.
///
/// Holds the latest result and is re-delivered the full current contents after
/// every committed write to the table it watches.
#[derive(Debug, Clone)]
pub struct LiveQuery<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> LiveQuery<T> {
    pub fn new(rx: watch::Receiver<T>) -> Self {
        Self { rx }
    }

    /// The most recent result.
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next result. Returns `None` once the source is gone.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Storage for sessions and the outcome log.
#[async_trait]
pub trait AutomationRepository: Send + Sync {
    /// Store a new session and return its assigned id. The session's own id is ignored.
    ///
    /// Fails with [`crate::Error::Conflict`] if `session` is active and another
    /// active session exists.
    async fn create_session(&self, session: &AutomationSession) -> crate::Result<SessionId>;

    async fn update_session(&self, session: &AutomationSession) -> crate::Result<()>;

    /// Append `log` and store `session`'s progress in one transaction.
    ///
    /// Returns `None`, writing nothing, when the session is no longer active
    /// in storage, for example because it was cancelled by another process.
    async fn record_step(
        &self,
        log: &AutomationLog,
        session: &AutomationSession,
    ) -> crate::Result<Option<LogId>>;

    /// Returns whether a row was removed.
    async fn delete_session(&self, id: SessionId) -> crate::Result<bool>;

    /// The unique active session, if any.
    async fn get_active_session(&self) -> crate::Result<Option<AutomationSession>>;

    /// Append a log entry. A non-zero id is stored as given and a collision is an error.
    async fn insert_log(&self, log: &AutomationLog) -> crate::Result<LogId>;

    /// Remove log entries with `timestamp < before_millis`. Returns the number removed.
    async fn purge_logs_older_than(&self, before_millis: i64) -> crate::Result<usize>;

    /// All sessions, newest first.
    fn all_sessions(&self) -> LiveQuery<Vec<AutomationSession>>;

    /// The 100 most recent log entries, newest first.
    fn recent_logs(&self) -> LiveQuery<Vec<AutomationLog>>;

    /// Failed log entries, newest first.
    fn failed_logs(&self) -> LiveQuery<Vec<AutomationLog>>;
}

/// [`AutomationRepository`] backed by the local SQLite database.
///
/// Statements run on the blocking pool, since a connection may wait up to
/// the busy timeout on locks held by other processes.
#[derive(Debug)]
pub struct SqliteRepository {
    db: Database,
    sessions_tx: watch::Sender<Vec<AutomationSession>>,
    recent_tx: watch::Sender<Vec<AutomationLog>>,
    failed_tx: watch::Sender<Vec<AutomationLog>>,
}

impl SqliteRepository {
    /// Wrap an open database and load the initial query results.
    pub fn new(db: Database) -> crate::Result<Self> {
        let sessions = load_sessions(&db)?;
        let (recent, failed) = load_logs(&db)?;
        Ok(Self {
            db,
            sessions_tx: watch::Sender::new(sessions),
            recent_tx: watch::Sender::new(recent),
            failed_tx: watch::Sender::new(failed),
        })
    }

    pub fn open_in_memory() -> crate::Result<Self> {
        Self::new(Database::open_in_memory()?)
    }

    /// Get access to the underlying database for advanced operations.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run `f` against the database on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&Database) -> crate::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|err| crate::Error::generic(format!("database task failed: {err}")))?
    }

    async fn notify_sessions(&self) {
        match self.blocking(load_sessions).await {
            Ok(sessions) => {
                self.sessions_tx.send_replace(sessions);
            }
            Err(err) => warn!(%err, "failed to refresh session live query"),
        }
    }

    async fn notify_logs(&self) {
        match self.blocking(load_logs).await {
            Ok((recent, failed)) => {
                self.recent_tx.send_replace(recent);
                self.failed_tx.send_replace(failed);
            }
            Err(err) => warn!(%err, "failed to refresh log live queries"),
        }
    }
}

fn load_sessions(db: &Database) -> crate::Result<Vec<AutomationSession>> {
    let records = {
        let conn = db.lock()?;
        SessionStore::new(&conn).list_all()?
    };
    records.into_iter().map(AutomationSession::from_record).collect()
}

fn load_logs(db: &Database) -> crate::Result<Feeds> {
    let conn = db.lock()?;
    let store = LogStore::new(&conn);
    let recent = store.list_recent(RECENT_LOGS_LIMIT)?;
    let failed = store.list_failed()?;
    Ok((
        recent.into_iter().map(AutomationLog::from_record).collect(),
        failed.into_iter().map(AutomationLog::from_record).collect(),
    ))
}

#[async_trait]
impl AutomationRepository for SqliteRepository {
    async fn create_session(&self, session: &AutomationSession) -> crate::Result<SessionId> {
        let record = session.to_record()?;
        let inserted = self
            .blocking(move |db| {
                let conn = db.lock()?;
                Ok(SessionStore::new(&conn).insert(&record))
            })
            .await?;
        let id = match inserted {
            Ok(id) => SessionId(id),
            Err(err) if err.is_constraint_violation() && session.is_active => {
                return Err(crate::Error::conflict(
                    "another automation session is already active",
                ));
            }
            Err(err) => return Err(err.into()),
        };
        debug!(session.id = id.0, "created automation session");
        self.notify_sessions().await;
        Ok(id)
    }

    async fn update_session(&self, session: &AutomationSession) -> crate::Result<()> {
        let record = session.to_record()?;
        let changed = self
            .blocking(move |db| {
                let conn = db.lock()?;
                Ok(SessionStore::new(&conn).update(&record)?)
            })
            .await?;
        if changed == 0 {
            return Err(crate::Error::session(format!("Session {} not found", session.id)));
        }
        self.notify_sessions().await;
        Ok(())
    }

    async fn record_step(
        &self,
        log: &AutomationLog,
        session: &AutomationSession,
    ) -> crate::Result<Option<LogId>> {
        let log_record = log.to_record();
        let session_record = session.to_record()?;
        let recorded = self
            .blocking(move |db| {
                Ok(db.transaction(|conn| {
                    if SessionStore::new(conn).update_if_active(&session_record)? == 0 {
                        return Ok(None);
                    }
                    LogStore::new(conn).insert(&log_record).map(Some)
                })?)
            })
            .await?;

        match recorded {
            Some(id) => {
                self.notify_logs().await;
                self.notify_sessions().await;
                Ok(Some(LogId(id)))
            }
            None => {
                debug!(session.id = session.id.0, "session no longer active, step not recorded");
                Ok(None)
            }
        }
    }

    async fn delete_session(&self, id: SessionId) -> crate::Result<bool> {
        let removed = self
            .blocking(move |db| {
                let conn = db.lock()?;
                Ok(SessionStore::new(&conn).delete(id.0)?)
            })
            .await?;
        if removed > 0 {
            self.notify_sessions().await;
        }
        Ok(removed > 0)
    }

    async fn get_active_session(&self) -> crate::Result<Option<AutomationSession>> {
        let record = self
            .blocking(|db| {
                let conn = db.lock()?;
                Ok(SessionStore::new(&conn).get_active()?)
            })
            .await?;
        record.map(AutomationSession::from_record).transpose()
    }

    async fn insert_log(&self, log: &AutomationLog) -> crate::Result<LogId> {
        let record = log.to_record();
        let id = self
            .blocking(move |db| {
                let conn = db.lock()?;
                Ok(LogStore::new(&conn).insert(&record)?)
            })
            .await?;
        self.notify_logs().await;
        Ok(LogId(id))
    }

    async fn purge_logs_older_than(&self, before_millis: i64) -> crate::Result<usize> {
        let removed = self
            .blocking(move |db| {
                let conn = db.lock()?;
                Ok(LogStore::new(&conn).delete_before(before_millis)?)
            })
            .await?;
        if removed > 0 {
            self.notify_logs().await;
        }
        Ok(removed)
    }

    fn all_sessions(&self) -> LiveQuery<Vec<AutomationSession>> {
        LiveQuery::new(self.sessions_tx.subscribe())
    }

    fn recent_logs(&self) -> LiveQuery<Vec<AutomationLog>> {
        LiveQuery::new(self.recent_tx.subscribe())
    }

    fn failed_logs(&self) -> LiveQuery<Vec<AutomationLog>> {
        LiveQuery::new(self.failed_tx.subscribe())
    }
}
