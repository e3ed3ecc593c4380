//! Database models and persistence operations.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Database model for automation sessions.
///
/// `app_queue` holds the JSON-encoded queue; this crate does not interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub start_time: i64,
    pub app_queue: String,
    pub current_index: i64,
    pub is_active: bool,
    pub completed_count: i64,
}

impl SessionRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            start_time: row.get(1)?,
            app_queue: row.get(2)?,
            current_index: row.get(3)?,
            is_active: row.get(4)?,
            completed_count: row.get(5)?,
        })
    }
}

/// Database model for automation log entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: i64,
    pub app_package: String,
    pub app_name: String,
    pub duration_millis: i64,
    pub success: bool,
    pub error_message: Option<String>,
}

impl LogRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            app_package: row.get(2)?,
            app_name: row.get(3)?,
            duration_millis: row.get(4)?,
            success: row.get(5)?,
            error_message: row.get(6)?,
        })
    }
}

const SESSION_COLUMNS: &str =
    "id, start_time, app_queue, current_index, is_active, completed_count";
const LOG_COLUMNS: &str =
    "id, timestamp, app_package, app_name, duration_millis, success, error_message";

/// Database operations for sessions.
pub struct SessionStore<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SessionStore<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Insert a session and return its storage-assigned id.
    ///
    /// Fails with [`crate::Error::Constraint`] when the record is active and
    /// another active session already exists.
    pub fn insert(&self, record: &SessionRecord) -> crate::Result<i64> {
        self.conn
            .execute(
                r#"
                INSERT INTO automation_sessions (start_time, app_queue, current_index, is_active, completed_count)
                VALUES (?, ?, ?, ?, ?)
                "#,
                params![
                    record.start_time,
                    record.app_queue,
                    record.current_index,
                    record.is_active,
                    record.completed_count
                ],
            )
            .map_err(crate::Error::from_write)?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get(&self, session_id: i64) -> crate::Result<Option<SessionRecord>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM automation_sessions WHERE id = ?");
        let record = self
            .conn
            .query_row(&sql, params![session_id], SessionRecord::from_row)
            .optional()?;
        Ok(record)
    }

    /// The single active session, if any.
    pub fn get_active(&self) -> crate::Result<Option<SessionRecord>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM automation_sessions WHERE is_active = 1 LIMIT 1"
        );
        let record = self
            .conn
            .query_row(&sql, params![], SessionRecord::from_row)
            .optional()?;
        Ok(record)
    }

    /// All sessions, newest first.
    pub fn list_all(&self) -> crate::Result<Vec<SessionRecord>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM automation_sessions ORDER BY start_time DESC, id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt.query_map(params![], SessionRecord::from_row)?;

        let mut sessions = Vec::new();
        for record in records {
            sessions.push(record?);
        }
        Ok(sessions)
    }

    /// Overwrite the mutable columns of a session. Returns the number of rows changed.
    pub fn update(&self, record: &SessionRecord) -> crate::Result<usize> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE automation_sessions
                SET start_time = ?, app_queue = ?, current_index = ?, is_active = ?, completed_count = ?
                WHERE id = ?
                "#,
                params![
                    record.start_time,
                    record.app_queue,
                    record.current_index,
                    record.is_active,
                    record.completed_count,
                    record.id
                ],
            )
            .map_err(crate::Error::from_write)?;
        Ok(changed)
    }

    /// Like [`SessionStore::update`], but only touches the row while it is still active.
    ///
    /// Returns 0 when the session was deactivated or deleted in the meantime.
    pub fn update_if_active(&self, record: &SessionRecord) -> crate::Result<usize> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE automation_sessions
                SET current_index = ?, is_active = ?, completed_count = ?
                WHERE id = ? AND is_active = 1
                "#,
                params![
                    record.current_index,
                    record.is_active,
                    record.completed_count,
                    record.id
                ],
            )
            .map_err(crate::Error::from_write)?;
        Ok(changed)
    }

    pub fn delete(&self, session_id: i64) -> crate::Result<usize> {
        let changed = self.conn.execute(
            "DELETE FROM automation_sessions WHERE id = ?",
            params![session_id],
        )?;
        Ok(changed)
    }
}

/// Database operations for the outcome log.
pub struct LogStore<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> LogStore<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Append a log entry.
    ///
    /// An `id` of 0 lets storage assign one; any other id is inserted as given
    /// and a collision is reported as [`crate::Error::Constraint`].
    pub fn insert(&self, record: &LogRecord) -> crate::Result<i64> {
        let id = (record.id != 0).then_some(record.id);
        self.conn
            .execute(
                r#"
                INSERT INTO automation_logs (id, timestamp, app_package, app_name, duration_millis, success, error_message)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    id,
                    record.timestamp,
                    record.app_package,
                    record.app_name,
                    record.duration_millis,
                    record.success,
                    record.error_message
                ],
            )
            .map_err(crate::Error::from_write)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent entries, newest first.
    pub fn list_recent(&self, limit: usize) -> crate::Result<Vec<LogRecord>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM automation_logs ORDER BY timestamp DESC, id DESC LIMIT ?"
        );
        self.collect(&sql, params![limit as i64])
    }

    /// Failed entries, newest first.
    pub fn list_failed(&self) -> crate::Result<Vec<LogRecord>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM automation_logs WHERE success = 0 ORDER BY timestamp DESC, id DESC"
        );
        self.collect(&sql, params![])
    }

    /// Delete every entry with `timestamp < before`. Returns the number removed.
    pub fn delete_before(&self, before: i64) -> crate::Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM automation_logs WHERE timestamp < ?",
            params![before],
        )?;
        Ok(removed)
    }

    pub fn count(&self) -> crate::Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM automation_logs", params![], |row| row.get(0))?;
        Ok(count)
    }

    fn collect(&self, sql: &str, params: impl rusqlite::Params) -> crate::Result<Vec<LogRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let records = stmt.query_map(params, LogRecord::from_row)?;

        let mut logs = Vec::new();
        for record in records {
            logs.push(record?);
        }
        Ok(logs)
    }
}
