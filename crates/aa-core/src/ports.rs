//! Capabilities the sequencer needs from the host platform.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no launchable target for {0}")]
    NotFound(String),
    #[error("launch rejected: {0}")]
    Rejected(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Starts an app in the foreground.
#[async_trait]
pub trait AppLauncher: Send + Sync {
    async fn launch(&self, app: &str) -> Result<(), LaunchError>;
}

/// Reports whether an app is currently the foreground process.
///
/// Sampled by the sequencer on its polling interval.
#[async_trait]
pub trait AppMonitor: Send + Sync {
    async fn is_foreground(&self, app: &str) -> bool;
}
