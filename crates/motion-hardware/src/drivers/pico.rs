//! Pico W stepper controller driver (rotation axis).
//!
//! Protocol overview (Pico firmware):
//! - Format: ASCII command/response, newline-terminated, 115200 8N1
//! - The board emits `READY` once after its boot/reset on port open
//! - Every command elicits exactly one response line
//!
//! | Command | Response | Meaning |
//! |---------|----------|---------|
//! | `ENABLE` / `DISABLE` | `OK:` | driver power stage on/off |
//! | `SPEED_RPS:<rps>` | `OK:` | signed speed, rev/s; zero stops |
//! | `SPEED_STEPS:<sps>` | `OK:` | signed speed, steps/s |
//! | `RAMP:<sps2>` | `OK:` | accel/decel ramp, steps/s² |
//! | `STOP` | `OK:` | ramp down to zero speed |
//! | `STATUS` | `STATUS:<cur>,<tgt>,<pos>` | speeds in rev/s, step count |
//!
//! Speed commands complete immediately — the firmware ramps toward the
//! target on its own — so this axis is never "busy" in the blocking sense
//! and callers must not wait on it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::Mutex;
use tracing::instrument;

use motion_core::axis::{AxisDriver, AxisKind, AxisStatus};
use motion_core::error::AxisError;
use motion_core::serial::SharedPort;

use super::{expect_ok, transact};
use crate::config::StepperConfig;

/// How long to wait for the boot `READY` line before giving up on it.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Driver for the Pico W stepper controller.
pub struct PicoStepperDriver {
    /// Connection slot; `release()` empties it exactly once.
    port: Mutex<Option<SharedPort>>,
    ack_timeout: Duration,
    /// Set after a successful `STOP`, cleared by any speed command.
    halted: AtomicBool,
}

impl PicoStepperDriver {
    /// Open the configured serial port and perform the boot handshake.
    ///
    /// The board resets when the port opens and prints `READY` when its
    /// firmware is up. A missing `READY` is downgraded to a warning — older
    /// firmware revisions skip it — but an unopenable port is an error.
    pub async fn connect(cfg: &StepperConfig) -> anyhow::Result<Self> {
        crate::config::validate_serial_port(&cfg.port, "Pico stepper")?;
        let stream =
            motion_core::serial::open_serial_async(&cfg.port, cfg.baud, "Pico stepper").await?;
        let shared = motion_core::serial::wrap_shared(Box::new(stream));

        if !await_ready(&shared, READY_TIMEOUT).await {
            tracing::warn!(port = %cfg.port, "did not receive READY from Pico, continuing anyway");
        }

        let driver = Self::from_port(shared, cfg.ack_timeout());
        if let Some(rate) = cfg.ramp_rate {
            driver.set_ramp_rate(rate).await?;
        }

        tracing::info!(port = %cfg.port, "Pico stepper connected");
        Ok(driver)
    }

    fn from_port(port: SharedPort, ack_timeout: Duration) -> Self {
        Self {
            port: Mutex::new(Some(port)),
            ack_timeout,
            halted: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_test_port(port: SharedPort) -> Self {
        Self::from_port(port, Duration::from_millis(200))
    }

    async fn port(&self) -> Result<SharedPort, AxisError> {
        self.port.lock().await.clone().ok_or(AxisError::NotConnected)
    }

    async fn command_ok(&self, command: &str) -> Result<(), AxisError> {
        let port = self.port().await?;
        let reply = transact(&port, command, self.ack_timeout).await?;
        expect_ok(&reply)?;
        Ok(())
    }

    /// Energize the motor driver stage.
    #[instrument(skip(self), err)]
    pub async fn enable_motor(&self) -> Result<(), AxisError> {
        self.command_ok("ENABLE").await
    }

    /// De-energize the motor driver stage (cuts holding torque).
    #[instrument(skip(self), err)]
    pub async fn disable_motor(&self) -> Result<(), AxisError> {
        self.command_ok("DISABLE").await
    }

    /// Set the acceleration/deceleration ramp in steps/s².
    #[instrument(skip(self), err)]
    pub async fn set_ramp_rate(&self, steps_per_sec2: f64) -> Result<(), AxisError> {
        self.command_ok(&format!("RAMP:{:.4}", steps_per_sec2)).await
    }

    /// Command a speed in steps/s instead of rev/s.
    #[instrument(skip(self), err)]
    pub async fn set_speed_steps(&self, steps_per_sec: f64) -> Result<(), AxisError> {
        self.command_ok(&format!("SPEED_STEPS:{:.4}", steps_per_sec))
            .await?;
        self.halted.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Read lines until `READY` shows up, skipping any boot banner.
///
/// Returns false on timeout; the caller decides how loudly to complain.
async fn await_ready(port: &SharedPort, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut guard = port.lock().await;

    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        let mut line = String::new();
        match tokio::time::timeout(deadline - now, guard.read_line(&mut line)).await {
            Ok(Ok(0)) | Err(_) => return false,
            Ok(Ok(_)) if line.trim() == "READY" => return true,
            Ok(Ok(_)) => continue, // boot banner noise
            Ok(Err(_)) => return false,
        }
    }
}

/// Parse a `STATUS:<current>,<target>,<position>` line.
fn parse_status(reply: &str) -> Result<AxisStatus, AxisError> {
    let rejected = || AxisError::CommandRejected {
        reply: reply.to_string(),
    };

    let payload = reply.strip_prefix("STATUS:").ok_or_else(rejected)?;
    let mut fields = payload.split(',');
    let current_rps = fields
        .next()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .ok_or_else(rejected)?;
    let target_rps = fields
        .next()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .ok_or_else(rejected)?;
    let position_steps = fields
        .next()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(rejected)?;
    if fields.next().is_some() {
        return Err(rejected());
    }

    Ok(AxisStatus::Rotation {
        current_rps,
        target_rps,
        position_steps,
    })
}

#[async_trait]
impl AxisDriver for PicoStepperDriver {
    fn kind(&self) -> AxisKind {
        AxisKind::Rotational
    }

    /// Command a signed speed in rev/s. Zero means stop.
    #[instrument(skip(self), err)]
    async fn send_target(&self, value: f64) -> Result<(), AxisError> {
        self.command_ok(&format!("SPEED_RPS:{:.4}", value)).await?;
        self.halted.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn poll_status(&self) -> Result<AxisStatus, AxisError> {
        let port = self.port().await?;
        let reply = transact(&port, "STATUS", self.ack_timeout).await?;
        parse_status(&reply)
    }

    /// Speed commands complete immediately; the axis is never busy.
    async fn is_busy(&self) -> Result<bool, AxisError> {
        self.port().await?;
        Ok(false)
    }

    #[instrument(skip(self), err)]
    async fn halt(&self) -> Result<(), AxisError> {
        self.port().await?;
        if self.halted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.command_ok("STOP").await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.halted.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn release(&self) {
        if self.port.lock().await.take().is_some() {
            tracing::info!("Pico stepper connection released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_core::serial::wrap_shared;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn harness() -> (tokio::io::DuplexStream, PicoStepperDriver) {
        let (device, host) = tokio::io::duplex(256);
        (
            device,
            PicoStepperDriver::with_test_port(wrap_shared(Box::new(host))),
        )
    }

    async fn read_sent(device: &mut tokio::io::DuplexStream) -> String {
        let mut buf = [0u8; 64];
        let n = device.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[tokio::test]
    async fn send_target_writes_speed_command() {
        let (mut device, driver) = harness();
        device.write_all(b"OK:\n").await.unwrap();

        driver.send_target(-3.5).await.unwrap();
        assert_eq!(read_sent(&mut device).await, "SPEED_RPS:-3.5000\n");
    }

    #[tokio::test]
    async fn status_parses_all_three_fields() {
        let (mut device, driver) = harness();
        device.write_all(b"STATUS:1.25,5.00,12345\n").await.unwrap();

        let status = driver.poll_status().await.unwrap();
        assert_eq!(
            status,
            AxisStatus::Rotation {
                current_rps: 1.25,
                target_rps: 5.0,
                position_steps: 12345,
            }
        );
        assert_eq!(read_sent(&mut device).await, "STATUS\n");
    }

    #[test]
    fn malformed_status_is_rejected() {
        assert!(parse_status("STATUS:1.0,2.0").is_err());
        assert!(parse_status("STATUS:a,b,c").is_err());
        assert!(parse_status("STATUS:1.0,2.0,3,4").is_err());
        assert!(parse_status("OK:").is_err());
    }

    #[tokio::test]
    async fn never_busy() {
        let (_device, driver) = harness();
        assert!(!driver.is_busy().await.unwrap());
    }

    #[tokio::test]
    async fn motor_and_ramp_commands() {
        let (mut device, driver) = harness();
        device.write_all(b"OK:\nOK:\nOK:\nOK:\n").await.unwrap();

        driver.enable_motor().await.unwrap();
        driver.set_ramp_rate(800.0).await.unwrap();
        driver.set_speed_steps(400.0).await.unwrap();
        driver.disable_motor().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let sent = read_sent(&mut device).await;
        assert_eq!(
            sent,
            "ENABLE\nRAMP:800.0000\nSPEED_STEPS:400.0000\nDISABLE\n"
        );
    }

    #[tokio::test]
    async fn halt_is_idempotent_on_the_wire() {
        let (mut device, driver) = harness();
        device.write_all(b"OK:\n").await.unwrap();

        driver.halt().await.unwrap();
        driver.halt().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(read_sent(&mut device).await, "STOP\n");
    }

    #[tokio::test]
    async fn ready_handshake_skips_banner() {
        let (mut device, host) = tokio::io::duplex(256);
        let port = wrap_shared(Box::new(host));

        device.write_all(b"pico-stepper fw 0.9\nREADY\n").await.unwrap();
        assert!(await_ready(&port, Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn ready_handshake_times_out_quietly() {
        let (_device, host) = tokio::io::duplex(256);
        let port = wrap_shared(Box::new(host));
        assert!(!await_ready(&port, Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn released_driver_reports_not_connected() {
        let (_device, driver) = harness();
        driver.release().await;
        assert_eq!(
            driver.poll_status().await.unwrap_err(),
            AxisError::NotConnected
        );
        assert_eq!(driver.halt().await.unwrap_err(), AxisError::NotConnected);
    }
}
