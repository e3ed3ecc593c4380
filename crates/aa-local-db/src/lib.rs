//! SQLite database management for local app automation state.
//!
//! This crate provides persistent storage for automation sessions and the
//! per-app outcome log, using SQLite as the backing database.

pub mod connection;
pub mod migrations;
pub mod models;
pub mod schema;

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for database operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Constraint violation: {message}")]
    Constraint { message: String },

    #[error("Migration error: {message}")]
    Migration { message: String },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic database error: {0}")]
    Generic(String),
}

impl Error {
    /// Create a new migration error.
    pub fn migration<S: Into<String>>(message: S) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }

    /// Create a new generic database error.
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Whether this error was caused by a UNIQUE/PRIMARY KEY/CHECK constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::Constraint { .. })
    }

    /// Classify a rusqlite error, lifting constraint failures into [`Error::Constraint`].
    pub(crate) fn from_write(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Constraint {
                    message: message.unwrap_or_else(|| code.to_string()),
                }
            }
            other => Self::Database(other),
        }
    }
}

/// Database connection and management.
pub use connection::Database;

/// Database models and operations.
pub use models::{LogRecord, LogStore, SessionRecord, SessionStore};

/// Schema definitions and constants.
pub use schema::*;
