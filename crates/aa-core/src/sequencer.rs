//! The queue-walking state machine.
//!
//! A [`Sequencer`] drives one active session at a time. Each queue entry goes
//! through `Launching -> Monitoring -> Advancing`; a launch failure skips
//! straight to `Advancing` with a failed log entry. Progress is written to
//! storage after every entry, so a session interrupted by a crash can be
//! picked up again with [`Sequencer::resume`].
//!
//! The driver runs on its own task and is the only writer of the active
//! session row while it is active. Its progress writes only apply to a row
//! that is still active, so a session deactivated elsewhere (`aa cancel` from
//! another process) stops at the next step. `start`, `resume`, `cancel`,
//! `pause`, `unpause` and `delete_session` serialize on an async mutex;
//! `status` and `subscribe` read a cached snapshot.

use crate::config::{SequencerConfig, ShortDwellPolicy};
use crate::ports::{AppLauncher, AppMonitor};
use crate::repository::AutomationRepository;
use crate::session::{now_millis, AppTask, AutomationLog, AutomationSession, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Phase of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerState {
    Idle,
    Launching,
    Monitoring,
    /// Monitoring is suspended; the dwell clock is stopped.
    Paused,
    Advancing,
    Completed,
    Cancelled,
}

impl SequencerState {
    /// Whether a driver task owns the session in this state.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::Launching | Self::Monitoring | Self::Paused | Self::Advancing
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Snapshot of the sequencer, as returned by [`Sequencer::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerStatus {
    pub session_id: Option<SessionId>,
    pub current_index: usize,
    pub completed_count: usize,
    pub total: usize,
    pub state: SequencerState,
    /// Package of the entry being launched or monitored.
    pub current_app: Option<String>,
    /// Foreground time accumulated by the current app, while monitoring or paused.
    pub elapsed_millis: Option<u64>,
    /// Time left in the current app's dwell window, while monitoring or paused.
    pub remaining_millis: Option<u64>,
}

impl SequencerStatus {
    fn idle() -> Self {
        Self {
            session_id: None,
            current_index: 0,
            completed_count: 0,
            total: 0,
            state: SequencerState::Idle,
            current_app: None,
            elapsed_millis: None,
            remaining_millis: None,
        }
    }

    /// Mark the snapshot cancelled without touching the progress counters.
    fn stop(&mut self) {
        self.state = SequencerState::Cancelled;
        self.current_app = None;
        self.elapsed_millis = None;
        self.remaining_millis = None;
    }
}

/// Final state of a driven session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub session_id: SessionId,
    /// `Completed` or `Cancelled`.
    pub state: SequencerState,
    pub current_index: usize,
    pub completed_count: usize,
    pub total: usize,
}

impl RunReport {
    fn new(session: &AutomationSession, state: SequencerState) -> Self {
        Self {
            session_id: session.id,
            state,
            current_index: session.current_index,
            completed_count: session.completed_count,
            total: session.total(),
        }
    }
}

enum LaunchOutcome {
    /// The app was started; dwell is measured from `since`.
    Launched { since: Instant },
    Failed { elapsed: Duration, error: crate::Error },
    Cancelled,
}

enum StepOutcome {
    Completed { dwell: Duration },
    Failed { elapsed: Duration, message: String },
    Cancelled,
}

struct ActiveRun {
    session_id: SessionId,
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
    task: Option<JoinHandle<crate::Result<RunReport>>>,
}

#[derive(Default)]
struct Control {
    run: Option<ActiveRun>,
}

struct Shared {
    repo: Arc<dyn AutomationRepository>,
    launcher: Arc<dyn AppLauncher>,
    monitor: Arc<dyn AppMonitor>,
    config: SequencerConfig,
    status_tx: watch::Sender<SequencerStatus>,
}

/// Drives app queues to completion, one app at a time.
///
/// Dropping the sequencer aborts a running driver without touching storage,
/// the same as the process exiting: the session stays active and can be
/// resumed later.
pub struct Sequencer {
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("config", &self.shared.config)
            .field("status", &*self.shared.status_tx.borrow())
            .finish()
    }
}

impl Sequencer {
    pub fn new(
        repo: Arc<dyn AutomationRepository>,
        launcher: Arc<dyn AppLauncher>,
        monitor: Arc<dyn AppMonitor>,
        config: SequencerConfig,
    ) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                repo,
                launcher,
                monitor,
                config,
                status_tx: watch::Sender::new(SequencerStatus::idle()),
            }),
            control: Mutex::new(Control::default()),
        })
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.shared.config
    }

    pub fn repository(&self) -> &Arc<dyn AutomationRepository> {
        &self.shared.repo
    }

    /// Create a session for `queue` and start driving it.
    ///
    /// Fails with [`crate::Error::Conflict`] when a session is already active,
    /// whether driven by this sequencer or left active in storage.
    pub async fn start<I>(&self, queue: I) -> crate::Result<SessionId>
    where
        I: IntoIterator,
        I::Item: Into<AppTask>,
    {
        let queue: Vec<AppTask> = queue.into_iter().map(Into::into).collect();
        if queue.is_empty() {
            return Err(crate::Error::invalid_queue("the app queue is empty"));
        }

        let mut control = self.control.lock().await;
        if let Some(id) = self.running_session(&control) {
            return Err(crate::Error::conflict(format!(
                "automation session {id} is already running"
            )));
        }
        if let Some(active) = self.shared.repo.get_active_session().await? {
            return Err(crate::Error::conflict(format!(
                "automation session {} is still active; resume or cancel it first",
                active.id
            )));
        }

        let mut session = AutomationSession::new(queue, now_millis());
        session.id = self.shared.repo.create_session(&session).await?;
        info!(session.id = session.id.0, apps = session.total(), "starting automation session");

        let id = session.id;
        self.spawn_driver(&mut control, session);
        Ok(id)
    }

    /// Pick up the persisted active session.
    ///
    /// Returns the id of the running session when already driving one, and
    /// `None` when there is nothing to resume.
    pub async fn resume(&self) -> crate::Result<Option<SessionId>> {
        let mut control = self.control.lock().await;
        if let Some(id) = self.running_session(&control) {
            debug!(session.id = id.0, "resume requested while already running");
            return Ok(Some(id));
        }

        let Some(mut session) = self.shared.repo.get_active_session().await? else {
            return Ok(None);
        };

        if session.is_complete() {
            // Interrupted after the last entry but before it was marked inactive
            session.is_active = false;
            self.shared.repo.update_session(&session).await?;
            self.shared.publish(&session, SequencerState::Completed);
            info!(session.id = session.id.0, "finalized already completed session");
            return Ok(None);
        }

        info!(
            session.id = session.id.0,
            current_index = session.current_index,
            apps = session.total(),
            "resuming automation session"
        );
        let id = session.id;
        self.spawn_driver(&mut control, session);
        Ok(Some(id))
    }

    /// Stop the active session.
    ///
    /// Waits for the driver to persist the session as inactive. A session
    /// left active in storage without a driver is deactivated directly.
    /// Returns the cancelled session's id, or `None` if nothing was active.
    pub async fn cancel(&self) -> crate::Result<Option<SessionId>> {
        let control = self.control.lock().await;
        if let Some(id) = self.running_session(&control) {
            if let Some(run) = control.run.as_ref() {
                run.cancel.cancel();
            }
            let mut rx = self.shared.status_tx.subscribe();
            rx.wait_for(|status| !status.state.is_running())
                .await
                .map_err(|_| crate::Error::generic("sequencer status channel closed"))?;
            info!(session.id = id.0, "automation session cancelled");
            return Ok(Some(id));
        }

        let Some(mut session) = self.shared.repo.get_active_session().await? else {
            return Ok(None);
        };
        session.is_active = false;
        self.shared
            .config
            .persist_retry
            .run("deactivate session", None, || {
                self.shared.repo.update_session(&session)
            })
            .await?;
        self.shared.publish(&session, SequencerState::Cancelled);
        info!(session.id = session.id.0, "deactivated stale automation session");
        Ok(Some(session.id))
    }

    /// Read-only snapshot of the current state. Never touches storage.
    pub fn status(&self) -> SequencerStatus {
        self.shared.status_tx.borrow().clone()
    }

    /// Feed of status snapshots, updated on every transition.
    pub fn subscribe(&self) -> watch::Receiver<SequencerStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Wait for the current driver to finish.
    ///
    /// Fatal errors from the driver are returned here. Returns `None` when no
    /// driver was started or its result was already collected.
    pub async fn wait(&self) -> crate::Result<Option<RunReport>> {
        let taken = {
            let mut control = self.control.lock().await;
            control
                .run
                .as_mut()
                .and_then(|run| Some((run.session_id, run.task.take()?)))
        };
        let Some((session_id, handle)) = taken else {
            return Ok(None);
        };
        match handle.await {
            Ok(result) => result.map(Some),
            Err(err) => {
                error!(session.id = session_id.0, %err, "automation driver task failed");
                self.shared.abandon(session_id).await;
                Err(crate::Error::generic(format!(
                    "automation driver task failed: {err}"
                )))
            }
        }
    }

    /// Start `queue` and wait for it to finish.
    pub async fn run<I>(&self, queue: I) -> crate::Result<RunReport>
    where
        I: IntoIterator,
        I::Item: Into<AppTask>,
    {
        self.start(queue).await?;
        self.wait()
            .await?
            .ok_or_else(|| crate::Error::generic("automation run result was already collected"))
    }

    /// Hold the running session at its current app.
    ///
    /// The dwell clock stops until [`Sequencer::unpause`], which relaunches the
    /// app for the rest of its window. A pause requested while an app is being
    /// launched or recorded applies once the next app is being monitored.
    /// Returns whether a session is running.
    pub async fn pause(&self) -> bool {
        self.set_paused(true).await
    }

    /// Continue a paused session. Returns whether a session is running.
    pub async fn unpause(&self) -> bool {
        self.set_paused(false).await
    }

    async fn set_paused(&self, paused: bool) -> bool {
        let control = self.control.lock().await;
        if self.running_session(&control).is_none() {
            return false;
        }
        match control.run.as_ref() {
            Some(run) => {
                run.pause.send_replace(paused);
                true
            }
            None => false,
        }
    }

    /// Delete a session from history.
    ///
    /// The session currently being driven cannot be deleted.
    pub async fn delete_session(&self, id: SessionId) -> crate::Result<bool> {
        let control = self.control.lock().await;
        if self.running_session(&control) == Some(id) {
            return Err(crate::Error::conflict(format!(
                "automation session {id} is running; cancel it before deleting"
            )));
        }
        self.shared.repo.delete_session(id).await
    }

    fn running_session(&self, control: &Control) -> Option<SessionId> {
        let run = control.run.as_ref()?;
        let finished = run.task.as_ref().is_some_and(|task| task.is_finished());
        let running = self.shared.status_tx.borrow().state.is_running();
        (running && !finished).then_some(run.session_id)
    }

    fn spawn_driver(&self, control: &mut Control, session: AutomationSession) {
        let cancel = CancellationToken::new();
        let (pause, mut paused) = watch::channel(false);
        let session_id = session.id;
        self.shared.publish(&session, SequencerState::Launching);

        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let span = info_span!("automation", session.id = session_id.0);
        let task = tokio::spawn(
            async move {
                let _guard = UnwindGuard {
                    status_tx: &shared.status_tx,
                };
                shared.drive(session, token, &mut paused).await
            }
            .instrument(span),
        );

        control.run = Some(ActiveRun {
            session_id,
            cancel,
            pause,
            task: Some(task),
        });
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        if let Some(task) = self.control.get_mut().run.as_mut().and_then(|run| run.task.take()) {
            task.abort();
        }
    }
}

/// Publishes `Cancelled` when the driver unwinds out of a panic, so waiters
/// never see a running state that nothing will end.
struct UnwindGuard<'a> {
    status_tx: &'a watch::Sender<SequencerStatus>,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.status_tx.send_modify(SequencerStatus::stop);
        }
    }
}

impl Shared {
    fn publish(&self, session: &AutomationSession, state: SequencerState) {
        self.publish_status(session, state, None);
    }

    /// Publish a monitoring or paused snapshot with the dwell progress.
    fn publish_dwell(
        &self,
        session: &AutomationSession,
        state: SequencerState,
        observed: Duration,
        window: Duration,
    ) {
        self.publish_status(session, state, Some((observed, window.saturating_sub(observed))));
    }

    fn publish_status(
        &self,
        session: &AutomationSession,
        state: SequencerState,
        dwell: Option<(Duration, Duration)>,
    ) {
        let current_app = if state.is_running() {
            session.current_task().map(|task| task.package_name.clone())
        } else {
            None
        };
        self.status_tx.send_replace(SequencerStatus {
            session_id: Some(session.id),
            current_index: session.current_index,
            completed_count: session.completed_count,
            total: session.total(),
            state,
            current_app,
            elapsed_millis: dwell.map(|(elapsed, _)| elapsed.as_millis() as u64),
            remaining_millis: dwell.map(|(_, remaining)| remaining.as_millis() as u64),
        });
    }

    /// Clean up after a driver that died without reaching a terminal state.
    async fn abandon(&self, session_id: SessionId) {
        self.status_tx.send_modify(SequencerStatus::stop);
        match self.repo.get_active_session().await {
            Ok(Some(mut session)) if session.id == session_id => {
                session.is_active = false;
                if let Err(err) = self.repo.update_session(&session).await {
                    warn!(%err, session.id = session_id.0, "could not mark abandoned session inactive");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%err, session.id = session_id.0, "could not read abandoned session"),
        }
    }

    async fn drive(
        &self,
        mut session: AutomationSession,
        cancel: CancellationToken,
        paused: &mut watch::Receiver<bool>,
    ) -> crate::Result<RunReport> {
        match self.walk(&mut session, &cancel, paused).await {
            Ok(report) => Ok(report),
            Err(err) => {
                error!(%err, "automation session aborted");
                // Best effort: the store is what just failed
                session.is_active = false;
                if let Err(deactivate_err) = self.repo.update_session(&session).await {
                    warn!(%deactivate_err, "could not mark aborted session inactive");
                }
                self.publish(&session, SequencerState::Cancelled);
                Err(err)
            }
        }
    }

    async fn walk(
        &self,
        session: &mut AutomationSession,
        cancel: &CancellationToken,
        paused: &mut watch::Receiver<bool>,
    ) -> crate::Result<RunReport> {
        loop {
            let Some(task) = session.current_task().cloned() else {
                self.publish(session, SequencerState::Completed);
                info!(
                    completed = session.completed_count,
                    apps = session.total(),
                    "automation session completed"
                );
                return Ok(RunReport::new(session, SequencerState::Completed));
            };
            if cancel.is_cancelled() {
                return self.finish_cancelled(session).await;
            }

            self.publish(session, SequencerState::Launching);
            let outcome = match self.launch(&task, cancel).await {
                LaunchOutcome::Launched { since } => {
                    self.watch_foreground(session, &task, since, cancel, paused)
                        .await
                }
                LaunchOutcome::Failed { elapsed, error } => StepOutcome::Failed {
                    elapsed,
                    message: error.to_string(),
                },
                LaunchOutcome::Cancelled => StepOutcome::Cancelled,
            };

            let log = match outcome {
                StepOutcome::Cancelled => return self.finish_cancelled(session).await,
                StepOutcome::Completed { dwell } => {
                    info!(app = %task.package_name, dwell_ms = dwell.as_millis() as u64, "app run completed");
                    AutomationLog::success(&task, dwell, now_millis())
                }
                StepOutcome::Failed { elapsed, message } => {
                    warn!(app = %task.package_name, %message, "app run failed, skipping");
                    AutomationLog::failure(&task, elapsed, message, now_millis())
                }
            };

            self.publish(session, SequencerState::Advancing);
            let next = session.advanced(log.success);
            debug_assert!(next.invariants_hold());
            let recorded = self
                .config
                .persist_retry
                .run("record step", Some(cancel), || self.repo.record_step(&log, &next))
                .await?;
            match recorded {
                None => return self.finish_cancelled(session).await,
                Some(None) => {
                    info!("automation session was deactivated elsewhere, stopping");
                    session.is_active = false;
                    self.publish(session, SequencerState::Cancelled);
                    return Ok(RunReport::new(session, SequencerState::Cancelled));
                }
                Some(Some(_)) => *session = next,
            }
        }
    }

    async fn finish_cancelled(&self, session: &mut AutomationSession) -> crate::Result<RunReport> {
        session.is_active = false;
        let snapshot = session.clone();
        self.config
            .persist_retry
            .run("deactivate session", None, || self.repo.update_session(&snapshot))
            .await?;
        self.publish(session, SequencerState::Cancelled);
        Ok(RunReport::new(session, SequencerState::Cancelled))
    }

    async fn launch(&self, task: &AppTask, cancel: &CancellationToken) -> LaunchOutcome {
        let started = Instant::now();
        let attempts = self.config.launch_attempts.max(1);
        let mut last_error = crate::Error::launch(&task.app_name, "not attempted");

        for attempt in 1..=attempts {
            info!(app = %task.package_name, attempt, attempts, "launching app");
            let launched = tokio::select! {
                _ = cancel.cancelled() => return LaunchOutcome::Cancelled,
                result = self.launcher.launch(&task.package_name) => result,
            };

            last_error = match launched {
                Ok(()) => {
                    let since = Instant::now();
                    if self.config.launch_grace.is_zero() {
                        return LaunchOutcome::Launched { since };
                    }
                    if !sleep_or_cancel(self.config.launch_grace, cancel).await {
                        return LaunchOutcome::Cancelled;
                    }
                    if self.monitor.is_foreground(&task.package_name).await {
                        return LaunchOutcome::Launched { since };
                    }
                    crate::Error::launch(&task.app_name, "not in the foreground after launch")
                }
                Err(err) => crate::Error::launch(&task.app_name, err.to_string()),
            };
            warn!(app = %task.package_name, attempt, attempts, error = %last_error, "launch attempt failed");

            if attempt < attempts {
                let backoff = self.config.launch_backoff.saturating_mul(attempt);
                if !sleep_or_cancel(backoff, cancel).await {
                    return LaunchOutcome::Cancelled;
                }
            }
        }

        LaunchOutcome::Failed {
            elapsed: started.elapsed(),
            error: last_error,
        }
    }

    /// Keep `task` in the foreground until its dwell window is used up.
    ///
    /// Time spent paused does not count towards the window; on unpause the
    /// app is relaunched for whatever is left of it.
    async fn watch_foreground(
        &self,
        session: &AutomationSession,
        task: &AppTask,
        mut since: Instant,
        cancel: &CancellationToken,
        paused: &mut watch::Receiver<bool>,
    ) -> StepOutcome {
        let window = task.dwell_window(self.config.default_dwell);
        // Foreground time from before the last pause
        let mut banked = Duration::ZERO;
        loop {
            let observed = banked + since.elapsed();
            if observed >= window {
                return StepOutcome::Completed { dwell: observed };
            }

            if *paused.borrow_and_update() {
                banked = observed;
                self.publish_dwell(session, SequencerState::Paused, banked, window);
                info!(app = %task.package_name, elapsed_ms = banked.as_millis() as u64, "automation paused");
                let unpaused = tokio::select! {
                    _ = cancel.cancelled() => false,
                    unpaused = async { paused.wait_for(|paused| !*paused).await.is_ok() } => unpaused,
                };
                if !unpaused {
                    return StepOutcome::Cancelled;
                }
                info!(app = %task.package_name, "automation unpaused, relaunching");

                self.publish(session, SequencerState::Launching);
                since = match self.launch(task, cancel).await {
                    LaunchOutcome::Launched { since } => since,
                    LaunchOutcome::Failed { elapsed, error } => {
                        return StepOutcome::Failed {
                            elapsed: banked + elapsed,
                            message: error.to_string(),
                        }
                    }
                    LaunchOutcome::Cancelled => return StepOutcome::Cancelled,
                };
                continue;
            }
            self.publish_dwell(session, SequencerState::Monitoring, observed, window);

            let foreground = tokio::select! {
                _ = cancel.cancelled() => return StepOutcome::Cancelled,
                foreground = self.monitor.is_foreground(&task.package_name) => foreground,
            };
            if !foreground {
                let observed = banked + since.elapsed();
                debug!(app = %task.package_name, dwell_ms = observed.as_millis() as u64, "app left the foreground");
                if observed >= self.config.min_dwell {
                    return StepOutcome::Completed { dwell: observed };
                }
                return match self.config.short_dwell {
                    ShortDwellPolicy::RecordSuccess => StepOutcome::Completed { dwell: observed },
                    ShortDwellPolicy::RecordFailure => StepOutcome::Failed {
                        elapsed: observed,
                        message: format!(
                            "{} left the foreground after {}ms, before the minimum dwell of {}ms",
                            task.app_name,
                            observed.as_millis(),
                            self.config.min_dwell.as_millis()
                        ),
                    },
                };
            }

            let wait = self.config.poll_interval.min(window - observed);
            tokio::select! {
                _ = cancel.cancelled() => return StepOutcome::Cancelled,
                _ = tokio::time::sleep(wait) => {}
                Ok(()) = paused.changed() => {}
            }
        }
    }
}

/// Sleep for `duration`; returns `false` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
