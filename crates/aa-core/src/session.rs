//! Automation sessions, queue entries and outcome log entries.

use aa_local_db::{LogRecord, SessionRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unique identifier for a session, assigned by storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub i64);

impl SessionId {
    /// Placeholder for a session that has not been stored yet.
    pub const UNASSIGNED: SessionId = SessionId(0);
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a log entry, assigned by storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogId(pub i64);

impl LogId {
    pub const UNASSIGNED: LogId = LogId(0);
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One entry of a session's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppTask {
    /// Identifier handed to the launcher and monitor.
    pub package_name: String,
    /// Display name written into the log.
    pub app_name: String,
    /// Dwell window for this app; the configured default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_millis: Option<u64>,
}

impl AppTask {
    /// Create a queue entry whose display name is its package name.
    pub fn new<S: Into<String>>(package_name: S) -> Self {
        let package_name = package_name.into();
        Self {
            app_name: package_name.clone(),
            package_name,
            duration_millis: None,
        }
    }

    pub fn with_name<S: Into<String>>(mut self, app_name: S) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_millis = Some(duration.as_millis() as u64);
        self
    }

    /// How long this app should be kept in the foreground.
    pub fn dwell_window(&self, default: Duration) -> Duration {
        self.duration_millis.map(Duration::from_millis).unwrap_or(default)
    }
}

impl From<&str> for AppTask {
    fn from(package_name: &str) -> Self {
        Self::new(package_name)
    }
}

impl From<String> for AppTask {
    fn from(package_name: String) -> Self {
        Self::new(package_name)
    }
}

/// One run through an ordered queue of apps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationSession {
    pub id: SessionId,
    /// Creation time in epoch milliseconds.
    pub start_time: i64,
    pub app_queue: Vec<AppTask>,
    /// Cursor into `app_queue`; equal to its length once the run is complete.
    pub current_index: usize,
    pub is_active: bool,
    pub completed_count: usize,
}

impl AutomationSession {
    /// A fresh, active session positioned at the head of `app_queue`.
    pub fn new(app_queue: Vec<AppTask>, start_time: i64) -> Self {
        Self {
            id: SessionId::UNASSIGNED,
            start_time,
            app_queue,
            current_index: 0,
            is_active: true,
            completed_count: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.app_queue.len()
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.app_queue.len()
    }

    /// The entry the cursor points at, if the queue is not exhausted.
    pub fn current_task(&self) -> Option<&AppTask> {
        self.app_queue.get(self.current_index)
    }

    /// Whether the cursor and counters are within their bounds.
    pub fn invariants_hold(&self) -> bool {
        self.current_index <= self.app_queue.len() && self.completed_count <= self.current_index
    }

    /// The session after the current entry has been processed.
    ///
    /// Reaching the end of the queue deactivates the session in the same step,
    /// so completion is persisted by a single update.
    pub fn advanced(&self, completed: bool) -> Self {
        let mut next = self.clone();
        if next.current_index < next.app_queue.len() {
            next.current_index += 1;
            if completed {
                next.completed_count += 1;
            }
        }
        if next.is_complete() {
            next.is_active = false;
        }
        next
    }

    pub fn to_record(&self) -> crate::Result<SessionRecord> {
        Ok(SessionRecord {
            id: self.id.0,
            start_time: self.start_time,
            app_queue: serde_json::to_string(&self.app_queue)?,
            current_index: self.current_index as i64,
            is_active: self.is_active,
            completed_count: self.completed_count as i64,
        })
    }

    pub fn from_record(record: SessionRecord) -> crate::Result<Self> {
        let app_queue: Vec<AppTask> = serde_json::from_str(&record.app_queue)?;
        let counter = |value: i64, name: &str| {
            usize::try_from(value).map_err(|_| {
                crate::Error::session(format!("Session {} has negative {}", record.id, name))
            })
        };
        let session = Self {
            id: SessionId(record.id),
            start_time: record.start_time,
            current_index: counter(record.current_index, "current_index")?,
            completed_count: counter(record.completed_count, "completed_count")?,
            is_active: record.is_active,
            app_queue,
        };
        if !session.invariants_hold() {
            return Err(crate::Error::session(format!(
                "Session {} is corrupt: index {} / completed {} / queue length {}",
                session.id,
                session.current_index,
                session.completed_count,
                session.total()
            )));
        }
        Ok(session)
    }
}

/// Outcome of one launch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationLog {
    pub id: LogId,
    /// When the attempt concluded, in epoch milliseconds.
    pub timestamp: i64,
    pub app_package: String,
    pub app_name: String,
    /// Observed foreground dwell, or time until the failure was detected.
    pub duration_millis: u64,
    pub success: bool,
    /// Only set on failures.
    pub error_message: Option<String>,
}

impl AutomationLog {
    pub fn success(task: &AppTask, dwell: Duration, timestamp: i64) -> Self {
        Self {
            id: LogId::UNASSIGNED,
            timestamp,
            app_package: task.package_name.clone(),
            app_name: task.app_name.clone(),
            duration_millis: dwell.as_millis() as u64,
            success: true,
            error_message: None,
        }
    }

    pub fn failure<S: Into<String>>(
        task: &AppTask,
        elapsed: Duration,
        message: S,
        timestamp: i64,
    ) -> Self {
        Self {
            id: LogId::UNASSIGNED,
            timestamp,
            app_package: task.package_name.clone(),
            app_name: task.app_name.clone(),
            duration_millis: elapsed.as_millis() as u64,
            success: false,
            error_message: Some(message.into()),
        }
    }

    pub fn to_record(&self) -> LogRecord {
        LogRecord {
            id: self.id.0,
            timestamp: self.timestamp,
            app_package: self.app_package.clone(),
            app_name: self.app_name.clone(),
            duration_millis: self.duration_millis as i64,
            success: self.success,
            error_message: if self.success {
                None
            } else {
                self.error_message.clone()
            },
        }
    }

    pub fn from_record(record: LogRecord) -> Self {
        Self {
            id: LogId(record.id),
            timestamp: record.timestamp,
            app_package: record.app_package,
            app_name: record.app_name,
            duration_millis: record.duration_millis.max(0) as u64,
            success: record.success,
            error_message: record.error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(n: usize) -> Vec<AppTask> {
        (0..n).map(|i| AppTask::new(format!("com.app{i}"))).collect()
    }

    #[test]
    fn advancing_to_the_end_deactivates() {
        let session = AutomationSession::new(queue(2), 0);
        let step1 = session.advanced(true);
        assert_eq!((step1.current_index, step1.completed_count), (1, 1));
        assert!(step1.is_active);

        let step2 = step1.advanced(false);
        assert_eq!((step2.current_index, step2.completed_count), (2, 1));
        assert!(!step2.is_active);
        assert!(step2.is_complete());

        // Saturates at the end of the queue
        assert_eq!(step2.advanced(true), step2);
    }

    #[test]
    fn corrupt_records_are_rejected() {
        let mut record = AutomationSession::new(queue(1), 0).to_record().unwrap();
        record.current_index = 2;
        assert!(AutomationSession::from_record(record).is_err());
    }

    #[test]
    fn queue_json_omits_default_duration() {
        let task = AppTask::new("com.a").with_name("A");
        let json = serde_json::to_string(&task).unwrap();
        assert_eq!(json, r#"{"package_name":"com.a","app_name":"A"}"#);

        let timed = task.with_duration(Duration::from_secs(7));
        assert_eq!(timed.dwell_window(Duration::from_secs(60)), Duration::from_secs(7));
    }

    #[test]
    fn successful_logs_never_carry_an_error_message() {
        let mut log = AutomationLog::success(&AppTask::new("com.a"), Duration::from_millis(5), 1);
        log.error_message = Some("stray".into());
        assert_eq!(log.to_record().error_message, None);
    }
}
