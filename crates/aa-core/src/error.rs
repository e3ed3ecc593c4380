//! Core error types for the automation system.

/// Core error type for all automation operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An app could not be brought to the foreground. Recoverable: the
    /// sequencer records it as a failed log entry and moves on.
    #[error("Launch failed for {app}: {message}")]
    Launch { app: String, message: String },

    /// A storage write kept failing after the bounded retries.
    #[error("Persistence failure in {operation} after {attempts} attempt(s): {message}")]
    Persistence {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Another session is already active.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Invalid queue: {message}")]
    InvalidQueue { message: String },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] aa_local_db::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl Error {
    /// Create a new launch failure.
    pub fn launch<A: Into<String>, S: Into<String>>(app: A, message: S) -> Self {
        Self::Launch {
            app: app.into(),
            message: message.into(),
        }
    }

    /// Create a new conflict error.
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a new invalid-queue error.
    pub fn invalid_queue<S: Into<String>>(message: S) -> Self {
        Self::InvalidQueue {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new session-related error.
    pub fn session<S: Into<String>>(message: S) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Create a new generic error.
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}
