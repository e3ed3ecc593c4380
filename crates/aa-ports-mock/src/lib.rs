//! Scripted launcher and monitor backed by tokio's clock.
//!
//! Each app is given an [`AppBehavior`]; launching an app makes it the
//! foreground app, and it stays there for as long as its behavior says.
//! Works with paused time (`#[tokio::test(start_paused = true)]`).

use aa_core::{AppLauncher, AppMonitor, LaunchError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// How a scripted app reacts to being launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppBehavior {
    /// Launches and stays in the foreground, forever when `None`.
    Foreground(Option<Duration>),
    /// Every launch fails with the given message.
    FailLaunch(String),
    /// The first `failures` launches fail, later ones stay in the foreground for `then`.
    Flaky { failures: u32, then: Duration },
    /// Launches report success but the app never reaches the foreground.
    Background,
}

impl AppBehavior {
    pub fn foreground_for(duration: Duration) -> Self {
        Self::Foreground(Some(duration))
    }

    pub fn fails<S: Into<String>>(message: S) -> Self {
        Self::FailLaunch(message.into())
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    apps: HashMap<String, AppBehavior>,
    foreground: Option<(String, Instant, Option<Duration>)>,
    launches: Vec<String>,
}

/// A fake device implementing both [`AppLauncher`] and [`AppMonitor`].
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `package`. Unscripted packages fail to launch as not installed.
    pub fn app(self, package: &str, behavior: AppBehavior) -> Self {
        self.lock().apps.insert(package.to_string(), behavior);
        self
    }

    /// Every launch call so far, in order.
    pub fn launches(&self) -> Vec<String> {
        self.lock().launches.clone()
    }

    pub fn launch_count(&self, package: &str) -> usize {
        self.lock().launches.iter().filter(|p| p.as_str() == package).count()
    }

    /// Simulate the user switching away from whatever is in the foreground.
    pub fn switch_away(&self) {
        self.lock().foreground = None;
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AppLauncher for MockDevice {
    async fn launch(&self, app: &str) -> Result<(), LaunchError> {
        let mut state = self.lock();
        state.launches.push(app.to_string());

        let behavior = state
            .apps
            .get_mut(app)
            .ok_or_else(|| LaunchError::NotFound(app.to_string()))?;
        let stays_for = match behavior {
            AppBehavior::Foreground(duration) => Some(*duration),
            AppBehavior::FailLaunch(message) => return Err(LaunchError::Rejected(message.clone())),
            AppBehavior::Flaky { failures, then } => {
                if *failures > 0 {
                    *failures -= 1;
                    return Err(LaunchError::Rejected(format!("{app} is not ready yet")));
                }
                Some(Some(*then))
            }
            AppBehavior::Background => None,
        };

        state.foreground = stays_for.map(|duration| (app.to_string(), Instant::now(), duration));
        Ok(())
    }
}

#[async_trait]
impl AppMonitor for MockDevice {
    async fn is_foreground(&self, app: &str) -> bool {
        match &self.lock().foreground {
            Some((package, since, duration)) if package == app => {
                duration.map_or(true, |duration| since.elapsed() < duration)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn foreground_expires_on_the_tokio_clock() {
        let device = MockDevice::new().app("com.a", AppBehavior::foreground_for(Duration::from_secs(2)));
        device.launch("com.a").await.unwrap();
        assert!(device.is_foreground("com.a").await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!device.is_foreground("com.a").await);
    }

    #[tokio::test]
    async fn flaky_apps_recover() {
        let device = MockDevice::new().app(
            "com.a",
            AppBehavior::Flaky {
                failures: 1,
                then: Duration::from_secs(60),
            },
        );
        assert!(device.launch("com.a").await.is_err());
        device.launch("com.a").await.unwrap();
        assert!(device.is_foreground("com.a").await);
        assert_eq!(device.launch_count("com.a"), 2);
    }

    #[tokio::test]
    async fn unknown_apps_are_not_found() {
        let device = MockDevice::new();
        assert!(matches!(device.launch("com.x").await, Err(LaunchError::NotFound(_))));
        assert_eq!(device.launches(), vec!["com.x".to_string()]);
    }
}
