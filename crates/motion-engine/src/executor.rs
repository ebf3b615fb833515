//! Sequence executor: the state machine that drives a path across the axes.
//!
//! One session at a time. `start` captures the registry's enabled axes,
//! spawns a dedicated task for the step loop and returns immediately; the
//! caller observes progress through [`SequenceExecutor::status`] snapshots
//! or a [`SequenceExecutor::subscribe`] event stream.
//!
//! Per step, the loop:
//! 1. fans `send_target` out to every referenced axis in the captured set
//!    concurrently (independent physical devices; synchronized arrival is
//!    the point of multi-axis coordination),
//! 2. faults the session if any dispatch failed — a multi-axis move that was
//!    only partially commanded is not treated as partially successful,
//! 3. polls `is_busy` on the step's linear axes until all settle, with a
//!    ceiling that faults as `Timeout`; rotation axes are never waited on,
//! 4. waits out the configured step delay,
//! 5. honors pending pause/stop requests before advancing.
//!
//! Pause and stop are request flags observed at step boundaries and inside
//! every wait loop, so a stop during a busy-wait returns within one poll
//! interval instead of the full ceiling. Any fault halts every captured axis
//! best-effort; failures during that halt are logged, not re-raised — the
//! session fault already dominates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use motion_core::axis::{AxisDriver, AxisId, AxisKind, AxisStatus};
use motion_core::error::{AxisError, MotionError};
use motion_hardware::registry::{AxisRegistry, CapturedAxis};

use crate::sequence::Sequence;

/// Session state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session active; ready to start one.
    Idle,
    /// Executing steps.
    Running,
    /// Parked after a fully settled step; resume continues at the next step.
    Paused,
    /// Stop requested; the step loop is winding down.
    Stopping,
    /// Sequence finished (transient; resolves to `Idle`).
    Completed,
    /// Session faulted (transient; resolves to `Idle`).
    Faulted,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
            SessionState::Completed => "completed",
            SessionState::Faulted => "faulted",
        };
        f.write_str(label)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Every step of every repeat ran.
    Completed,
    /// A stop request (or emergency stop) ended the session early.
    Stopped,
    /// A dispatch failure, settle timeout or disconnect ended the session.
    Faulted(MotionError),
}

/// Snapshot of session progress.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    /// Current state.
    pub state: SessionState,
    /// Zero-based repeat currently executing.
    pub repeat_index: usize,
    /// Zero-based step currently executing.
    pub step_index: usize,
    /// Last observed status per captured axis.
    pub axes: HashMap<AxisId, AxisStatus>,
    /// Set once the session ends.
    pub outcome: Option<SessionOutcome>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            repeat_index: 0,
            step_index: 0,
            axes: HashMap::new(),
            outcome: None,
        }
    }
}

/// Progress events pushed to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session started.
    Started {
        /// Steps per repeat.
        steps: usize,
        /// Configured repeat count.
        repeats: u32,
    },
    /// A step's targets are about to be dispatched.
    StepStarted {
        /// Zero-based repeat index.
        repeat: u32,
        /// Zero-based step index.
        step: usize,
    },
    /// A step fully settled (linear axes done, delay not yet waited).
    StepSettled {
        /// Zero-based repeat index.
        repeat: u32,
        /// Zero-based step index.
        step: usize,
    },
    /// The session parked after a settled step.
    Paused {
        /// Repeat index of the settled step.
        repeat: u32,
        /// Step index of the settled step.
        step: usize,
    },
    /// The session continued after a pause.
    Resumed,
    /// The session ran to completion.
    Completed,
    /// The session was stopped before completion.
    Stopped,
    /// The session faulted.
    Faulted {
        /// What went wrong, with axis identity where one axis is at fault.
        error: MotionError,
    },
}

/// Timing knobs for the step loop.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Cadence of the linear busy poll (and of stop-flag checks in waits).
    pub poll_interval: Duration,
    /// Ceiling on one step's settle wait; exceeding it is a `Timeout` fault.
    pub busy_timeout: Duration,
    /// Cadence of the pause parking loop.
    pub pause_poll: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(75),
            busy_timeout: Duration::from_secs(60),
            pause_poll: Duration::from_millis(100),
        }
    }
}

struct Shared {
    status: RwLock<SessionStatus>,
    pause_requested: AtomicBool,
    stop_requested: AtomicBool,
    /// Guards the one-session-at-a-time invariant.
    active: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

/// Handle to a started session.
pub struct SessionHandle {
    join: tokio::task::JoinHandle<()>,
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Wait for the session to end and return its outcome.
    pub async fn wait(self) -> SessionOutcome {
        let _ = self.join.await;
        self.shared
            .status
            .read()
            .await
            .outcome
            .clone()
            .unwrap_or(SessionOutcome::Stopped)
    }

    /// Whether the session task has finished.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// The sequence executor.
///
/// Cheap to clone; clones share the same session state, so a GUI thread can
/// hold one clone for `status()`/`stop()` while the composition root holds
/// another.
#[derive(Clone)]
pub struct SequenceExecutor {
    registry: Arc<RwLock<AxisRegistry>>,
    config: ExecutorConfig,
    shared: Arc<Shared>,
}

impl SequenceExecutor {
    /// Executor with default timing.
    pub fn new(registry: Arc<RwLock<AxisRegistry>>) -> Self {
        Self::with_config(registry, ExecutorConfig::default())
    }

    /// Executor with custom timing (tests tighten every interval).
    pub fn with_config(registry: Arc<RwLock<AxisRegistry>>, config: ExecutorConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            registry,
            config,
            shared: Arc::new(Shared {
                status: RwLock::new(SessionStatus::default()),
                pause_requested: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                active: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Subscribe to session progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of the current session status.
    pub async fn status(&self) -> SessionStatus {
        self.shared.status.read().await.clone()
    }

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        self.shared.status.read().await.state
    }

    /// Start a session over the registry's currently enabled axes.
    ///
    /// The enabled-axis set is captured once, here; later registry changes
    /// only affect the next session. The step loop runs on its own task —
    /// this call never blocks on device I/O.
    ///
    /// # Errors
    /// `AlreadyRunning` if a session is active.
    pub async fn start(&self, sequence: Sequence) -> Result<SessionHandle, MotionError> {
        if self.shared.active.swap(true, Ordering::SeqCst) {
            return Err(MotionError::AlreadyRunning);
        }

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        self.shared.pause_requested.store(false, Ordering::SeqCst);

        let captured = self.registry.read().await.enabled_axes();
        info!(
            steps = sequence.steps().len(),
            repeats = sequence.repeat_count(),
            axes = captured.len(),
            "starting sequence session"
        );

        {
            let mut status = self.shared.status.write().await;
            *status = SessionStatus {
                state: SessionState::Running,
                ..SessionStatus::default()
            };
        }
        self.emit(SessionEvent::Started {
            steps: sequence.steps().len(),
            repeats: sequence.repeat_count(),
        });

        let worker = SessionWorker {
            shared: self.shared.clone(),
            registry: self.registry.clone(),
            captured,
            sequence,
            config: self.config.clone(),
        };
        let join = tokio::spawn(worker.run());

        Ok(SessionHandle {
            join,
            shared: self.shared.clone(),
        })
    }

    /// Request a pause. The session parks after the current step fully
    /// settles — never mid-dispatch, never truncating a step.
    ///
    /// # Errors
    /// `InvalidTransition` unless the session is running.
    pub async fn pause(&self) -> Result<(), MotionError> {
        let state = self.state().await;
        if state != SessionState::Running {
            return Err(MotionError::InvalidTransition {
                operation: "pause",
                state: state.to_string(),
            });
        }
        info!("pause requested");
        self.shared.pause_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Resume a paused session at the next step (or cancel a pause that has
    /// not parked yet).
    ///
    /// # Errors
    /// `InvalidTransition` unless the session is paused or about to pause.
    pub async fn resume(&self) -> Result<(), MotionError> {
        let state = self.state().await;
        let pause_pending = self.shared.pause_requested.load(Ordering::SeqCst);
        match state {
            SessionState::Paused => {
                info!("resuming");
                self.shared.pause_requested.store(false, Ordering::SeqCst);
                Ok(())
            }
            SessionState::Running if pause_pending => {
                info!("pause request cancelled before it took effect");
                self.shared.pause_requested.store(false, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(MotionError::InvalidTransition {
                operation: "resume",
                state: state.to_string(),
            }),
        }
    }

    /// Request a stop. The step loop exits within one poll interval, even
    /// mid-busy-wait; hardware is not halted (use
    /// [`EmergencyStop`](crate::EmergencyStop) for that).
    ///
    /// # Errors
    /// `InvalidTransition` unless a session is running or paused.
    pub async fn stop(&self) -> Result<(), MotionError> {
        let state = self.state().await;
        if !matches!(state, SessionState::Running | SessionState::Paused) {
            return Err(MotionError::InvalidTransition {
                operation: "stop",
                state: state.to_string(),
            });
        }
        info!("stop requested");
        self.force_stop().await;
        Ok(())
    }

    /// Unconditional stop, callable from any state. Used by the emergency
    /// stop path; a no-op when no session is active.
    pub(crate) async fn force_stop(&self) {
        self.shared.pause_requested.store(false, Ordering::SeqCst);
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        if self.shared.active.load(Ordering::SeqCst) {
            let mut status = self.shared.status.write().await;
            if matches!(status.state, SessionState::Running | SessionState::Paused) {
                status.state = SessionState::Stopping;
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.shared.events.send(event);
    }
}

// =============================================================================
// Session worker (the spawned step loop)
// =============================================================================

enum SettleAbort {
    Stopped,
    Fault(MotionError),
}

struct SessionWorker {
    shared: Arc<Shared>,
    registry: Arc<RwLock<AxisRegistry>>,
    captured: Vec<CapturedAxis>,
    sequence: Sequence,
    config: ExecutorConfig,
}

impl SessionWorker {
    async fn run(self) {
        let outcome = self.drive().await;

        {
            let mut status = self.shared.status.write().await;
            status.state = match &outcome {
                SessionOutcome::Completed => SessionState::Completed,
                SessionOutcome::Stopped => SessionState::Stopping,
                SessionOutcome::Faulted(_) => SessionState::Faulted,
            };
            status.outcome = Some(outcome.clone());
        }

        match &outcome {
            SessionOutcome::Completed => {
                info!("sequence session completed");
                self.emit(SessionEvent::Completed);
            }
            SessionOutcome::Stopped => {
                info!("sequence session stopped");
                self.emit(SessionEvent::Stopped);
            }
            SessionOutcome::Faulted(error) => {
                error!(%error, "sequence session faulted");
                self.emit(SessionEvent::Faulted {
                    error: error.clone(),
                });
            }
        }

        // Terminal states resolve to Idle so the next session can start.
        self.shared.status.write().await.state = SessionState::Idle;
        self.shared.active.store(false, Ordering::SeqCst);
    }

    async fn drive(&self) -> SessionOutcome {
        for repeat in 0..self.sequence.repeat_count() {
            for (step_index, step) in self.sequence.steps().iter().enumerate() {
                if self.stop_requested() {
                    return SessionOutcome::Stopped;
                }

                {
                    let mut status = self.shared.status.write().await;
                    status.repeat_index = repeat as usize;
                    status.step_index = step_index;
                }
                self.emit(SessionEvent::StepStarted {
                    repeat,
                    step: step_index,
                });
                debug!(repeat, step = step_index, "dispatching step");

                // Axes referenced by this step that are in the captured set.
                let work: Vec<(CapturedAxis, f64)> = step
                    .targets()
                    .iter()
                    .filter_map(|(axis, value)| {
                        self.captured
                            .iter()
                            .find(|c| c.id == *axis)
                            .map(|c| (c.clone(), *value))
                    })
                    .collect();

                if let Some(failures) = self.dispatch(&work).await {
                    error!(
                        count = failures.len(),
                        "step dispatch failed; halting all captured axes"
                    );
                    self.halt_captured().await;
                    return SessionOutcome::Faulted(MotionError::DispatchFailed { failures });
                }

                if let Err(abort) = self.wait_for_settle(&work).await {
                    match abort {
                        SettleAbort::Stopped => return SessionOutcome::Stopped,
                        SettleAbort::Fault(error) => {
                            self.halt_captured().await;
                            return SessionOutcome::Faulted(error);
                        }
                    }
                }

                self.refresh_status().await;
                self.emit(SessionEvent::StepSettled {
                    repeat,
                    step: step_index,
                });

                if !self.wait_step_delay().await {
                    return SessionOutcome::Stopped;
                }

                if !self.pause_boundary(repeat, step_index).await {
                    return SessionOutcome::Stopped;
                }
            }
        }

        SessionOutcome::Completed
    }

    /// Fan the step's targets out concurrently. Returns the per-axis
    /// failures, or `None` when every dispatch succeeded.
    async fn dispatch(&self, work: &[(CapturedAxis, f64)]) -> Option<Vec<(AxisId, AxisError)>> {
        let dispatches = work.iter().map(|(captured, value)| {
            let captured = captured.clone();
            let value = *value;
            async move {
                let result = match &captured.driver {
                    None => Err(AxisError::NotConnected),
                    Some(driver) => driver.send_target(value).await,
                };
                (captured.id, result)
            }
        });

        let failures: Vec<(AxisId, AxisError)> = join_all(dispatches)
            .await
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| (id, e)))
            .collect();

        if failures.is_empty() {
            None
        } else {
            Some(failures)
        }
    }

    /// Poll the step's linear axes until all settle. Rotation axes are never
    /// waited on. Non-fatal poll errors get one retry; a disconnect or a
    /// second failure faults; exceeding the ceiling is a `Timeout` fault.
    async fn wait_for_settle(&self, work: &[(CapturedAxis, f64)]) -> Result<(), SettleAbort> {
        let mut pending: Vec<(AxisId, Arc<dyn AxisDriver>)> = work
            .iter()
            .filter(|(captured, _)| captured.kind == AxisKind::Linear)
            .filter_map(|(captured, _)| captured.driver.clone().map(|d| (captured.id, d)))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + self.config.busy_timeout;
        let mut retried: Vec<AxisId> = Vec::new();

        loop {
            if self.stop_requested() {
                return Err(SettleAbort::Stopped);
            }

            let polls = join_all(pending.iter().map(|(id, driver)| {
                let id = *id;
                let driver = driver.clone();
                async move { (id, driver.is_busy().await) }
            }))
            .await;

            let mut still_busy = Vec::new();
            for ((id, driver), (_, result)) in pending.into_iter().zip(polls) {
                match result {
                    Ok(false) => {}
                    Ok(true) => still_busy.push((id, driver)),
                    Err(err) if err.is_disconnect() => {
                        error!(axis = %id, "axis disconnected during busy polling");
                        return Err(SettleAbort::Fault(MotionError::AxisFault {
                            axis: id,
                            source: err,
                        }));
                    }
                    Err(err) => {
                        if retried.contains(&id) {
                            return Err(SettleAbort::Fault(MotionError::AxisFault {
                                axis: id,
                                source: err,
                            }));
                        }
                        warn!(axis = %id, %err, "busy poll failed, retrying once");
                        retried.push(id);
                        still_busy.push((id, driver));
                    }
                }
            }
            pending = still_busy;

            if pending.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                let axis = pending[0].0;
                warn!(axis = %axis, "settle wait exceeded ceiling");
                return Err(SettleAbort::Fault(MotionError::AxisFault {
                    axis,
                    source: AxisError::Timeout {
                        timeout_ms: self.config.busy_timeout.as_millis() as u64,
                    },
                }));
            }

            sleep(self.config.poll_interval).await;
        }
    }

    /// Best-effort concurrent halt of every captured axis. Failures are
    /// logged, not re-raised; the fault that got us here dominates.
    async fn halt_captured(&self) {
        let halts = self
            .captured
            .iter()
            .filter_map(|captured| captured.driver.clone().map(|d| (captured.id, d)))
            .map(|(id, driver)| async move { (id, driver.halt().await) });

        for (id, result) in join_all(halts).await {
            if let Err(err) = result {
                warn!(axis = %id, %err, "halt failed during fault handling");
            }
        }
    }

    /// Refresh the per-axis status map and the registry's staleness cache.
    async fn refresh_status(&self) {
        let polls = self
            .captured
            .iter()
            .filter_map(|captured| captured.driver.clone().map(|d| (captured.id, d)))
            .map(|(id, driver)| async move { (id, driver.poll_status().await) });
        let results: Vec<(AxisId, Result<AxisStatus, AxisError>)> = join_all(polls).await;

        {
            let mut status = self.shared.status.write().await;
            for (id, result) in &results {
                if let Ok(axis_status) = result {
                    status.axes.insert(*id, *axis_status);
                }
            }
        }
        let mut registry = self.registry.write().await;
        for (id, result) in results {
            match result {
                Ok(axis_status) => registry.record_status(id, axis_status),
                Err(err) => debug!(axis = %id, %err, "status refresh failed"),
            }
        }
    }

    /// Wait out the inter-step delay in stop-aware slices. Returns false
    /// when a stop request arrived.
    async fn wait_step_delay(&self) -> bool {
        let mut remaining = self.sequence.step_delay();
        while !remaining.is_zero() {
            if self.stop_requested() {
                return false;
            }
            let slice = remaining.min(self.config.poll_interval);
            sleep(slice).await;
            remaining -= slice;
        }
        true
    }

    /// Honor pending pause/stop requests at the step boundary. Returns false
    /// when the session should stop.
    async fn pause_boundary(&self, repeat: u32, step: usize) -> bool {
        if self.stop_requested() {
            return false;
        }
        if !self.pause_requested() {
            return true;
        }

        self.shared.status.write().await.state = SessionState::Paused;
        info!(repeat, step, "session paused");
        self.emit(SessionEvent::Paused { repeat, step });

        loop {
            sleep(self.config.pause_poll).await;
            if self.stop_requested() {
                return false;
            }
            if !self.pause_requested() {
                self.shared.status.write().await.state = SessionState::Running;
                info!("session resumed");
                self.emit(SessionEvent::Resumed);
                return true;
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::SeqCst)
    }

    fn pause_requested(&self) -> bool {
        self.shared.pause_requested.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.shared.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::MotionStep;
    use motion_hardware::drivers::mock::MockLinearAxis;

    fn executor() -> SequenceExecutor {
        let registry = Arc::new(RwLock::new(AxisRegistry::new()));
        SequenceExecutor::new(registry)
    }

    #[tokio::test]
    async fn transitions_refused_when_idle() {
        let exec = executor();
        assert_eq!(exec.state().await, SessionState::Idle);
        assert!(matches!(
            exec.pause().await,
            Err(MotionError::InvalidTransition { operation: "pause", .. })
        ));
        assert!(matches!(
            exec.resume().await,
            Err(MotionError::InvalidTransition { operation: "resume", .. })
        ));
        assert!(matches!(
            exec.stop().await,
            Err(MotionError::InvalidTransition { operation: "stop", .. })
        ));
    }

    #[tokio::test]
    async fn second_start_is_refused() {
        let registry = Arc::new(RwLock::new(AxisRegistry::new()));
        {
            let mut reg = registry.write().await;
            reg.attach(AxisId::X, Arc::new(MockLinearAxis::with_speed(1.0)))
                .unwrap();
            reg.set_enabled(AxisId::X, true);
        }
        let exec = SequenceExecutor::with_config(
            registry,
            ExecutorConfig {
                poll_interval: Duration::from_millis(10),
                busy_timeout: Duration::from_secs(30),
                pause_poll: Duration::from_millis(10),
            },
        );

        // Slow move keeps the first session busy.
        let seq = Sequence::once(vec![MotionStep::single(AxisId::X, 50.0)]).unwrap();
        let handle = exec.start(seq.clone()).await.unwrap();

        assert!(matches!(
            exec.start(seq).await,
            Err(MotionError::AlreadyRunning)
        ));

        exec.stop().await.unwrap();
        assert_eq!(handle.wait().await, SessionOutcome::Stopped);
        assert_eq!(exec.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn session_with_no_enabled_axes_completes_vacuously() {
        // Steps reference axes outside the captured set; nothing is
        // dispatched, nothing is waited on.
        let exec = executor();
        let seq = Sequence::once(vec![MotionStep::single(AxisId::X, 1.0)]).unwrap();
        let handle = exec.start(seq).await.unwrap();
        assert_eq!(handle.wait().await, SessionOutcome::Completed);
    }
}
