//! Core app automation orchestration.
//!
//! This crate walks an ordered queue of apps, launching each one and watching
//! how long it stays in the foreground, while persisting session progress and
//! a per-app outcome log so an interrupted run can be resumed.

pub mod config;
pub mod error;
pub mod ports;
pub mod repository;
pub mod retention;
pub mod retry;
pub mod sequencer;
pub mod session;

/// Core result type used throughout the automation system.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type that encompasses all automation operations.
pub use error::Error;

/// Timing and retry configuration for the sequencer.
pub use config::{SequencerConfig, ShortDwellPolicy};

/// Launch and foreground-detection capabilities.
pub use ports::{AppLauncher, AppMonitor, LaunchError};

/// Persistence gateway and live queries.
pub use repository::{AutomationRepository, LiveQuery, SqliteRepository};

/// Log retention sweep.
pub use retention::RetentionPolicy;

/// Bounded backoff for storage writes.
pub use retry::RetryPolicy;

/// The queue-walking state machine.
pub use sequencer::{RunReport, Sequencer, SequencerState, SequencerStatus};

/// Session and log domain types.
pub use session::{AppTask, AutomationLog, AutomationSession, LogId, SessionId};
