//! Process-backed launcher and monitor.
//!
//! An app identifier is a command line (`"vlc --fullscreen movie.mkv"`).
//! Launching spawns it and the app counts as foreground for as long as the
//! spawned process runs. Only one app is foreground at a time, so launching a
//! different app stops the previous one.

use aa_core::{AppLauncher, AppMonitor, LaunchError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ProcessHost {
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn children(&self) -> MutexGuard<'_, HashMap<String, Child>> {
        self.children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Whether `child` has not exited yet.
fn is_running(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

#[async_trait]
impl AppLauncher for ProcessHost {
    async fn launch(&self, app: &str) -> Result<(), LaunchError> {
        let mut words = app.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| LaunchError::Rejected("empty command line".to_string()))?;

        let mut children = self.children();
        if let Some(child) = children.get_mut(app) {
            if is_running(child) {
                debug!(app, "already running");
                return Ok(());
            }
        }

        for (other, child) in children.iter_mut() {
            if other != app && is_running(child) {
                if let Err(err) = child.start_kill() {
                    warn!(app = %other, %err, "failed to stop previous app");
                }
            }
        }

        let child = Command::new(program)
            .args(words)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => LaunchError::NotFound(app.to_string()),
                ErrorKind::PermissionDenied => LaunchError::Rejected(err.to_string()),
                _ => LaunchError::Io(err),
            })?;
        debug!(app, pid = child.id(), "spawned app");
        children.insert(app.to_string(), child);
        Ok(())
    }
}

#[async_trait]
impl AppMonitor for ProcessHost {
    async fn is_foreground(&self, app: &str) -> bool {
        let mut children = self.children();
        match children.get_mut(app).map(is_running) {
            Some(true) => true,
            Some(false) => {
                children.remove(app);
                false
            }
            None => false,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn process_is_foreground_until_it_exits() {
        let host = ProcessHost::new();
        host.launch("sleep 0.3").await.unwrap();
        assert!(host.is_foreground("sleep 0.3").await);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while host.is_foreground("sleep 0.3").await {
            assert!(tokio::time::Instant::now() < deadline, "process never exited");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn launching_another_app_stops_the_previous_one() {
        let host = ProcessHost::new();
        host.launch("sleep 30").await.unwrap();
        host.launch("sleep 31").await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while host.is_foreground("sleep 30").await {
            assert!(tokio::time::Instant::now() < deadline, "previous app kept running");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(host.is_foreground("sleep 31").await);
    }

    #[tokio::test]
    async fn missing_programs_are_not_found() {
        let host = ProcessHost::new();
        let err = host.launch("aa-no-such-program --flag").await.unwrap_err();
        assert!(matches!(err, LaunchError::NotFound(_)));
        assert!(!host.is_foreground("aa-no-such-program --flag").await);

        assert!(matches!(host.launch("   ").await, Err(LaunchError::Rejected(_))));
    }
}
