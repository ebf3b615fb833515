//! Axis driver implementations.
//!
//! - [`lts`]: Thorlabs LTS linear stage controller (X/Y/Z axes)
//! - [`pico`]: Pico W stepper controller (rotation axis)
//! - [`mock`]: simulated axes for tests and hardware-free bring-up
//!
//! Both serial drivers speak the same shape of protocol — one ASCII command
//! line out, exactly one response line back, `OK:`/`ERROR:` prefixed — so the
//! round-trip plumbing lives here and the drivers contribute only their
//! command vocabulary.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use motion_core::error::AxisError;
use motion_core::serial::SharedPort;

pub mod lts;
pub mod mock;
pub mod pico;

/// Send one command line and read the single response line.
///
/// Holds the port lock across the whole round-trip so concurrent callers
/// cannot interleave their responses. The read is bounded by `ack_timeout`;
/// expiry maps to [`AxisError::Timeout`], never an indefinite block.
pub(crate) async fn transact(
    port: &SharedPort,
    command: &str,
    ack_timeout: Duration,
) -> Result<String, AxisError> {
    let mut guard = port.lock().await;

    let line = format!("{}\n", command);
    let writer = guard.get_mut();
    writer.write_all(line.as_bytes()).await.map_err(AxisError::io)?;
    writer.flush().await.map_err(AxisError::io)?;

    let mut response = String::new();
    match tokio::time::timeout(ack_timeout, guard.read_line(&mut response)).await {
        Err(_) => Err(AxisError::Timeout {
            timeout_ms: ack_timeout.as_millis() as u64,
        }),
        Ok(Err(e)) => Err(AxisError::io(e)),
        Ok(Ok(0)) => Err(AxisError::Io("connection closed".to_string())),
        Ok(Ok(_)) => Ok(response.trim().to_string()),
    }
}

/// Accept an `OK:`-prefixed reply, returning its payload.
///
/// `ERROR:` tokens and anything the protocol does not recognize are
/// [`AxisError::CommandRejected`], carrying the reply verbatim.
pub(crate) fn expect_ok(reply: &str) -> Result<&str, AxisError> {
    match reply.strip_prefix("OK:") {
        Some(payload) => Ok(payload.trim()),
        None => Err(AxisError::CommandRejected {
            reply: reply.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_core::serial::wrap_shared;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn transact_round_trips_one_line() {
        let (mut device, host) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(host));

        device.write_all(b"OK:5.0\n").await.unwrap();
        let reply = transact(&port, "POS", Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply, "OK:5.0");

        // The command itself went out newline-terminated.
        let mut buf = [0u8; 16];
        let n = tokio::io::AsyncReadExt::read(&mut device, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"POS\n");
    }

    #[tokio::test]
    async fn transact_times_out_on_silent_device() {
        let (_device, host) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(host));

        let err = transact(&port, "POS", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, AxisError::Timeout { timeout_ms: 50 });
    }

    #[test]
    fn expect_ok_classifies_replies() {
        assert_eq!(expect_ok("OK:1").unwrap(), "1");
        assert!(matches!(
            expect_ok("ERROR:limit switch"),
            Err(AxisError::CommandRejected { .. })
        ));
        assert!(matches!(
            expect_ok("garbage"),
            Err(AxisError::CommandRejected { .. })
        ));
    }
}
