//! Thorlabs LTS linear stage driver.
//!
//! Protocol overview (stage-side bridge firmware):
//! - Format: ASCII command/response, newline-terminated, 115200 8N1
//! - Every command elicits exactly one `OK:`/`ERROR:` line
//!
//! | Command | Response | Meaning |
//! |---------|----------|---------|
//! | `MOVE_ABS:<mm>` | `OK:` | absolute move |
//! | `MOVE_REL:<mm>` | `OK:` | relative move / jog |
//! | `HOME` | `OK:` | find mechanical zero |
//! | `STOP` | `OK:` | halt motion now |
//! | `POS` | `OK:<mm>` | measured position |
//! | `MOVING` | `OK:0` / `OK:1` | motion-complete flag |
//!
//! Moves are accepted immediately; completion is observed by polling
//! `MOVING` (or `wait_settled`, which does that with a ceiling).

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

use motion_core::axis::{AxisDriver, AxisKind, AxisStatus};
use motion_core::error::AxisError;
use motion_core::serial::SharedPort;

use super::{expect_ok, transact};
use crate::config::LtsConfig;

/// How long `wait_settled` and `home` will poll before declaring a timeout.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll cadence for `wait_settled`.
const SETTLE_POLL: Duration = Duration::from_millis(100);

/// Driver for one Thorlabs LTS long-travel stage axis.
///
/// One driver instance per stage; the stage owns its serial connection for
/// the driver's whole lifetime. All positions are in mm.
pub struct LtsDriver {
    /// Connection slot. `release()` takes the port out exactly once;
    /// afterwards every command fails `NotConnected`.
    port: Mutex<Option<SharedPort>>,
    ack_timeout: Duration,
    /// Set after a successful `STOP`, cleared by any motion command. Guards
    /// the halt-twice case so the second call sends nothing to the device.
    halted: AtomicBool,
}

impl LtsDriver {
    /// Open the configured serial port and validate the stage responds.
    ///
    /// # Errors
    /// Fails if the port does not exist, cannot be opened, or the stage does
    /// not answer a position query.
    pub async fn connect(label: &str, cfg: &LtsConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        crate::config::validate_serial_port(&cfg.port, label)?;
        let stream = motion_core::serial::open_serial_async(&cfg.port, cfg.baud, label).await?;
        let shared = motion_core::serial::wrap_shared(Box::new(stream));

        {
            // Discard anything stale before the first query.
            let mut guard = shared.lock().await;
            let discarded = motion_core::serial::drain_serial_buffer(guard.get_mut(), 50).await;
            if discarded > 0 {
                tracing::debug!(%label, discarded, "discarded stale serial data");
            }
        }

        let driver = Self::from_port(shared, cfg.ack_timeout());
        driver
            .poll_status()
            .await
            .with_context(|| format!("{label}: stage did not answer position query"))?;

        tracing::info!(%label, port = %cfg.port, "LTS stage connected");
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

    /// Move by a signed distance from the current position.
    #[instrument(skip(self), err)]
    pub async fn move_rel(&self, distance_mm: f64) -> Result<(), AxisError> {
        self.command_ok(&format!("MOVE_REL:{:.4}", distance_mm))
            .await?;
        self.halted.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Home the stage (find mechanical zero) and wait for it to settle.
    #[instrument(skip(self), err)]
    pub async fn home(&self) -> Result<(), AxisError> {
        self.command_ok("HOME").await?;
        self.halted.store(false, Ordering::SeqCst);
        self.wait_settled().await
    }

    /// Poll the motion-complete flag until the stage settles.
    ///
    /// # Errors
    /// `Timeout` if the stage is still moving after the settle ceiling.
    pub async fn wait_settled(&self) -> Result<(), AxisError> {
        let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
        loop {
            if !self.is_busy().await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AxisError::Timeout {
                    timeout_ms: SETTLE_TIMEOUT.as_millis() as u64,
                });
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }
}

#[async_trait]
impl AxisDriver for LtsDriver {
    fn kind(&self) -> AxisKind {
        AxisKind::Linear
    }

    #[instrument(skip(self), err)]
    async fn send_target(&self, value: f64) -> Result<(), AxisError> {
        self.command_ok(&format!("MOVE_ABS:{:.4}", value)).await?;
        self.halted.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn poll_status(&self) -> Result<AxisStatus, AxisError> {
        let port = self.port().await?;
        let reply = transact(&port, "POS", self.ack_timeout).await?;
        let payload = expect_ok(&reply)?;
        let position_mm = payload
            .parse::<f64>()
            .map_err(|_| AxisError::CommandRejected {
                reply: reply.clone(),
            })?;
        Ok(AxisStatus::Linear { position_mm })
    }

    async fn is_busy(&self) -> Result<bool, AxisError> {
        let port = self.port().await?;
        let reply = transact(&port, "MOVING", self.ack_timeout).await?;
        match expect_ok(&reply)? {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(AxisError::CommandRejected { reply }),
        }
    }

    #[instrument(skip(self), err)]
    async fn halt(&self) -> Result<(), AxisError> {
        self.port().await?;
        if self.halted.swap(true, Ordering::SeqCst) {
            // Already stopped since the last motion command.
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
            tracing::info!("LTS stage connection released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_core::serial::wrap_shared;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn harness() -> (tokio::io::DuplexStream, LtsDriver) {
        let (device, host) = tokio::io::duplex(256);
        (device, LtsDriver::with_test_port(wrap_shared(Box::new(host))))
    }

    async fn read_sent(device: &mut tokio::io::DuplexStream) -> String {
        let mut buf = [0u8; 64];
        let n = device.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[tokio::test]
    async fn send_target_writes_absolute_move() {
        let (mut device, driver) = harness();
        device.write_all(b"OK:\n").await.unwrap();

        driver.send_target(12.5).await.unwrap();
        assert_eq!(read_sent(&mut device).await, "MOVE_ABS:12.5000\n");
    }

    #[tokio::test]
    async fn poll_status_parses_position() {
        let (mut device, driver) = harness();
        device.write_all(b"OK:42.125\n").await.unwrap();

        let status = driver.poll_status().await.unwrap();
        assert_eq!(status, AxisStatus::Linear { position_mm: 42.125 });
        assert_eq!(read_sent(&mut device).await, "POS\n");
    }

    #[tokio::test]
    async fn is_busy_reads_moving_flag() {
        let (mut device, driver) = harness();
        device.write_all(b"OK:1\n").await.unwrap();
        assert!(driver.is_busy().await.unwrap());

        device.write_all(b"OK:0\n").await.unwrap();
        assert!(!driver.is_busy().await.unwrap());
    }

    #[tokio::test]
    async fn error_token_is_command_rejected() {
        let (mut device, driver) = harness();
        device.write_all(b"ERROR:out of range\n").await.unwrap();

        let err = driver.send_target(999.0).await.unwrap_err();
        assert_eq!(
            err,
            AxisError::CommandRejected {
                reply: "ERROR:out of range".to_string()
            }
        );
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let (_device, driver) = harness();
        let err = driver.send_target(1.0).await.unwrap_err();
        assert!(matches!(err, AxisError::Timeout { .. }));
    }

    #[tokio::test]
    async fn halt_twice_sends_one_stop() {
        let (mut device, driver) = harness();
        device.write_all(b"OK:\n").await.unwrap();

        driver.halt().await.unwrap();
        driver.halt().await.unwrap();

        // Give any (wrong) second write a chance to land, then drain.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let sent = read_sent(&mut device).await;
        assert_eq!(sent, "STOP\n");
    }

    #[tokio::test]
    async fn motion_command_rearms_halt() {
        let (mut device, driver) = harness();
        device.write_all(b"OK:\nOK:\nOK:\n").await.unwrap();

        driver.halt().await.unwrap();
        driver.send_target(5.0).await.unwrap();
        driver.halt().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let sent = read_sent(&mut device).await;
        assert_eq!(sent, "STOP\nMOVE_ABS:5.0000\nSTOP\n");
    }

    #[tokio::test]
    async fn move_rel_and_home_use_their_commands() {
        let (mut device, driver) = harness();
        device.write_all(b"OK:\n").await.unwrap();
        driver.move_rel(-0.5).await.unwrap();
        assert_eq!(read_sent(&mut device).await, "MOVE_REL:-0.5000\n");

        // HOME acks, then the settle poll sees the stage already stationary.
        device.write_all(b"OK:\nOK:0\n").await.unwrap();
        driver.home().await.unwrap();
        let sent = read_sent(&mut device).await;
        assert_eq!(sent, "HOME\nMOVING\n");
    }

    #[tokio::test]
    async fn release_is_exactly_once() {
        let (mut device, driver) = harness();
        device.write_all(b"OK:\n").await.unwrap();
        driver.send_target(1.0).await.unwrap();

        driver.release().await;
        driver.release().await; // no-op

        let err = driver.send_target(2.0).await.unwrap_err();
        assert_eq!(err, AxisError::NotConnected);
        let err = driver.is_busy().await.unwrap_err();
        assert_eq!(err, AxisError::NotConnected);
    }
}
