//! Async serial transport shared by the line-protocol drivers.
//!
//! Both rig devices — the LTS linear stage controller and the Pico stepper —
//! speak line-delimited ASCII (one command out, one response line back), so
//! the transport layer is a buffered reader over a type-erased async port.
//!
//! # Types
//!
//! - [`SerialPortIO`]: trait alias combining `AsyncRead + AsyncWrite`
//! - [`DynSerial`]: type-erased boxed serial port
//! - [`SharedPort`]: thread-safe shared port with buffered line reading
//!
//! Drivers take a [`SharedPort`] rather than a concrete
//! `tokio_serial::SerialStream`, which is what makes the wire tests possible:
//! a `tokio::io::DuplexStream` plugs in as the "device" end.
//!
//! # Example
//!
//! ```rust,ignore
//! use motion_core::serial::{open_serial_async, wrap_shared};
//!
//! let port = open_serial_async("/dev/ttyACM0", 115_200, "Pico stepper").await?;
//! let shared = wrap_shared(Box::new(port));
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Trait alias for async serial port I/O.
///
/// Any `AsyncRead + AsyncWrite + Unpin + Send` type qualifies:
/// `tokio_serial::SerialStream` for real hardware, `tokio::io::DuplexStream`
/// for tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Thread-safe shared serial port with buffered reading.
///
/// The `BufReader` wrapper enables `read_line()` for the one-line-response
/// protocols both devices use. The mutex serializes whole command/response
/// round-trips: a driver holds the lock from write to read so responses
/// cannot interleave.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Wrap a type-erased port into a [`SharedPort`].
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Open a serial port asynchronously using `spawn_blocking`.
///
/// Port initialization can block on OS calls, so it is pushed off the async
/// runtime. Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns an error if the port cannot be opened; `device_name` is included
/// in the message so multi-device setups stay diagnosable.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards until no more data is immediately available or
/// `timeout_ms` elapses. Devices chat on reset, and a half-read response can
/// survive a host restart; draining before the first command keeps that
/// noise out of the response stream.
///
/// Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }

        let remaining = deadline.saturating_duration_since(now);
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break, // real I/O error, abort drain
            Err(_) => break,     // timeout, no more immediate data
        }
    }

    total_discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn shared_port_reads_lines_from_duplex() {
        let (mut device, host) = tokio::io::duplex(64);
        let port: SharedPort = wrap_shared(Box::new(host));

        device.write_all(b"OK:12.5\n").await.unwrap();

        let mut guard = port.lock().await;
        let mut line = String::new();
        guard.read_line(&mut line).await.unwrap();

        assert_eq!(line.trim(), "OK:12.5");
    }

    #[tokio::test]
    async fn shared_port_clones_share_the_underlying_stream() {
        let (mut device, host) = tokio::io::duplex(64);
        let port: SharedPort = wrap_shared(Box::new(host));
        let clone = port.clone();

        device.write_all(b"READY\n").await.unwrap();

        let mut guard = clone.lock().await;
        let mut line = String::new();
        guard.read_line(&mut line).await.unwrap();

        assert_eq!(line.trim(), "READY");
    }

    #[tokio::test]
    async fn drain_discards_boot_banner() {
        let (mut device, mut host) = tokio::io::duplex(64);

        device.write_all(b"boot v1.2\r\nREADY\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_serial_buffer(&mut host, 50).await;
        assert_eq!(discarded, 17);
    }
}
