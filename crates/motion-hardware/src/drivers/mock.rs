//! Mock axis drivers.
//!
//! Simulated hardware for tests and hardware-free bring-up. The linear mock
//! models velocity-limited travel toward the commanded target; the rotation
//! mock accepts speed commands instantly (the real firmware ramps on its own,
//! so from the driver's point of view the command is already complete).
//!
//! Both record every device command they would have put on the wire, which
//! is what the executor and emergency-stop tests assert against.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use motion_core::axis::{AxisDriver, AxisKind, AxisStatus};
use motion_core::error::AxisError;

// =============================================================================
// MockLinearAxis
// =============================================================================

/// Simulated linear stage.
///
/// Travels toward the last commanded target at a fixed speed; `is_busy()`
/// stays true until the simulated position is within tolerance of the
/// target. Clone handles share the same simulated device.
#[derive(Clone)]
pub struct MockLinearAxis {
    inner: Arc<LinearInner>,
}

struct LinearInner {
    state: Mutex<LinearState>,
    log: Mutex<Vec<String>>,
    speed_mm_per_sec: f64,
    tolerance_mm: f64,
    connected: AtomicBool,
    fail_next_send: AtomicBool,
    busy_polls: AtomicUsize,
    halted: AtomicBool,
}

struct LinearState {
    origin: f64,
    target: f64,
    started: Option<Instant>,
}

impl LinearState {
    fn position(&self, speed_mm_per_sec: f64) -> f64 {
        match self.started {
            None => self.target,
            Some(started) => {
                let travelled = started.elapsed().as_secs_f64() * speed_mm_per_sec;
                let distance = self.target - self.origin;
                if travelled >= distance.abs() {
                    self.target
                } else {
                    self.origin + distance.signum() * travelled
                }
            }
        }
    }
}

impl MockLinearAxis {
    /// Stage at position 0.0 mm moving at 200 mm/s (fast enough that test
    /// moves settle in tens of milliseconds).
    pub fn new() -> Self {
        Self::with_speed(200.0)
    }

    /// Stage with a custom simulated speed. Slow speeds keep the axis busy
    /// long enough to observe mid-move behavior.
    pub fn with_speed(speed_mm_per_sec: f64) -> Self {
        Self {
            inner: Arc::new(LinearInner {
                state: Mutex::new(LinearState {
                    origin: 0.0,
                    target: 0.0,
                    started: None,
                }),
                log: Mutex::new(Vec::new()),
                speed_mm_per_sec,
                tolerance_mm: 0.01,
                connected: AtomicBool::new(true),
                fail_next_send: AtomicBool::new(false),
                busy_polls: AtomicUsize::new(0),
                halted: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate the device dropping off the bus: every subsequent call
    /// fails `NotConnected`.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    /// Make the next `send_target` fail with `CommandRejected`.
    pub fn fail_next_send(&self) {
        self.inner.fail_next_send.store(true, Ordering::SeqCst);
    }

    /// Every command this device received, in order.
    pub async fn command_log(&self) -> Vec<String> {
        self.inner.log.lock().await.clone()
    }

    /// How many times `is_busy` was polled.
    pub fn busy_polls(&self) -> usize {
        self.inner.busy_polls.load(Ordering::SeqCst)
    }

    fn check_connected(&self) -> Result<(), AxisError> {
        if self.inner.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AxisError::NotConnected)
        }
    }
}

impl Default for MockLinearAxis {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AxisDriver for MockLinearAxis {
    fn kind(&self) -> AxisKind {
        AxisKind::Linear
    }

    async fn send_target(&self, value: f64) -> Result<(), AxisError> {
        self.check_connected()?;
        if self.inner.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(AxisError::CommandRejected {
                reply: "ERROR:injected".to_string(),
            });
        }

        let mut state = self.inner.state.lock().await;
        state.origin = state.position(self.inner.speed_mm_per_sec);
        state.target = value;
        state.started = Some(Instant::now());
        drop(state);

        self.inner.log.lock().await.push(format!("MOVE_ABS:{value:.4}"));
        self.inner.halted.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn poll_status(&self) -> Result<AxisStatus, AxisError> {
        self.check_connected()?;
        let state = self.inner.state.lock().await;
        Ok(AxisStatus::Linear {
            position_mm: state.position(self.inner.speed_mm_per_sec),
        })
    }

    async fn is_busy(&self) -> Result<bool, AxisError> {
        self.inner.busy_polls.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        let state = self.inner.state.lock().await;
        let position = state.position(self.inner.speed_mm_per_sec);
        Ok((position - state.target).abs() > self.inner.tolerance_mm)
    }

    async fn halt(&self) -> Result<(), AxisError> {
        self.check_connected()?;
        if self.inner.halted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Freeze wherever the stage is right now.
        let mut state = self.inner.state.lock().await;
        let position = state.position(self.inner.speed_mm_per_sec);
        state.origin = position;
        state.target = position;
        state.started = None;
        drop(state);

        self.inner.log.lock().await.push("STOP".to_string());
        Ok(())
    }

    async fn release(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// MockRotationAxis
// =============================================================================

/// Simulated rotation stepper.
///
/// Speed commands take effect instantly (the real device ramps on its own
/// schedule); the axis is never busy.
#[derive(Clone)]
pub struct MockRotationAxis {
    inner: Arc<RotationInner>,
}

struct RotationInner {
    state: Mutex<RotationState>,
    log: Mutex<Vec<String>>,
    connected: AtomicBool,
    fail_next_send: AtomicBool,
    busy_polls: AtomicUsize,
    halted: AtomicBool,
}

struct RotationState {
    current_rps: f64,
    target_rps: f64,
    position_steps: i64,
}

impl MockRotationAxis {
    /// Stepper at rest.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RotationInner {
                state: Mutex::new(RotationState {
                    current_rps: 0.0,
                    target_rps: 0.0,
                    position_steps: 0,
                }),
                log: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                fail_next_send: AtomicBool::new(false),
                busy_polls: AtomicUsize::new(0),
                halted: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate the device dropping off the bus.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    /// Make the next `send_target` fail with `CommandRejected`.
    pub fn fail_next_send(&self) {
        self.inner.fail_next_send.store(true, Ordering::SeqCst);
    }

    /// Every command this device received, in order.
    pub async fn command_log(&self) -> Vec<String> {
        self.inner.log.lock().await.clone()
    }

    /// How many times `is_busy` was polled. The executor must never wait on
    /// a rotation axis, so its tests pin this at zero.
    pub fn busy_polls(&self) -> usize {
        self.inner.busy_polls.load(Ordering::SeqCst)
    }

    fn check_connected(&self) -> Result<(), AxisError> {
        if self.inner.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AxisError::NotConnected)
        }
    }
}

impl Default for MockRotationAxis {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AxisDriver for MockRotationAxis {
    fn kind(&self) -> AxisKind {
        AxisKind::Rotational
    }

    async fn send_target(&self, value: f64) -> Result<(), AxisError> {
        self.check_connected()?;
        if self.inner.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(AxisError::CommandRejected {
                reply: "ERROR:injected".to_string(),
            });
        }

        let mut state = self.inner.state.lock().await;
        state.target_rps = value;
        state.current_rps = value;
        drop(state);

        self.inner.log.lock().await.push(format!("SPEED_RPS:{value:.4}"));
        self.inner.halted.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn poll_status(&self) -> Result<AxisStatus, AxisError> {
        self.check_connected()?;
        let state = self.inner.state.lock().await;
        Ok(AxisStatus::Rotation {
            current_rps: state.current_rps,
            target_rps: state.target_rps,
            position_steps: state.position_steps,
        })
    }

    async fn is_busy(&self) -> Result<bool, AxisError> {
        self.inner.busy_polls.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        Ok(false)
    }

    async fn halt(&self) -> Result<(), AxisError> {
        self.check_connected()?;
        if self.inner.halted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut state = self.inner.state.lock().await;
        state.target_rps = 0.0;
        state.current_rps = 0.0;
        drop(state);

        self.inner.log.lock().await.push("STOP".to_string());
        Ok(())
    }

    async fn release(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn linear_mock_travels_then_settles() {
        let axis = MockLinearAxis::with_speed(50.0); // 200ms to reach 10mm
        axis.send_target(10.0).await.unwrap();

        assert!(axis.is_busy().await.unwrap());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!axis.is_busy().await.unwrap());
        assert_eq!(
            axis.poll_status().await.unwrap(),
            AxisStatus::Linear { position_mm: 10.0 }
        );
    }

    #[tokio::test]
    async fn linear_halt_freezes_mid_move() {
        let axis = MockLinearAxis::with_speed(10.0); // 1 second to reach 10mm
        axis.send_target(10.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        axis.halt().await.unwrap();
        assert!(!axis.is_busy().await.unwrap());

        let AxisStatus::Linear { position_mm } = axis.poll_status().await.unwrap() else {
            panic!("linear mock must report linear status");
        };
        assert!(position_mm > 0.0 && position_mm < 10.0);
    }

    #[tokio::test]
    async fn halt_is_logged_once() {
        let axis = MockLinearAxis::new();
        axis.halt().await.unwrap();
        axis.halt().await.unwrap();
        assert_eq!(axis.command_log().await, vec!["STOP"]);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let axis = MockLinearAxis::new();
        axis.fail_next_send();
        assert!(matches!(
            axis.send_target(1.0).await,
            Err(AxisError::CommandRejected { .. })
        ));
        axis.send_target(1.0).await.unwrap();
    }

    #[tokio::test]
    async fn disconnected_mock_refuses_everything() {
        let axis = MockLinearAxis::new();
        axis.disconnect();
        assert_eq!(axis.send_target(1.0).await, Err(AxisError::NotConnected));
        assert_eq!(axis.halt().await, Err(AxisError::NotConnected));
        assert_eq!(axis.is_busy().await, Err(AxisError::NotConnected));
    }

    #[tokio::test]
    async fn rotation_mock_is_never_busy() {
        let axis = MockRotationAxis::new();
        axis.send_target(5.0).await.unwrap();
        assert!(!axis.is_busy().await.unwrap());
        assert_eq!(
            axis.poll_status().await.unwrap(),
            AxisStatus::Rotation {
                current_rps: 5.0,
                target_rps: 5.0,
                position_steps: 0,
            }
        );
    }

    #[tokio::test]
    async fn rotation_halt_zeroes_speed() {
        let axis = MockRotationAxis::new();
        axis.send_target(-2.0).await.unwrap();
        axis.halt().await.unwrap();

        let AxisStatus::Rotation { current_rps, target_rps, .. } =
            axis.poll_status().await.unwrap()
        else {
            panic!("rotation mock must report rotation status");
        };
        assert_eq!(current_rps, 0.0);
        assert_eq!(target_rps, 0.0);
        assert_eq!(axis.command_log().await, vec!["SPEED_RPS:-2.0000", "STOP"]);
    }
}
