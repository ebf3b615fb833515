//! Driver configuration.
//!
//! Typed, serde-deserializable configs for each device, loadable from the
//! rig's TOML file. Validation is split the usual way: field-level defaults
//! and types here, port existence checked just before a connection attempt so
//! error messages can list what ports *are* available.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Default command acknowledgment timeout, applied when a config omits it.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

fn default_lts_baud() -> u32 {
    115_200
}

fn default_stepper_baud() -> u32 {
    115_200
}

/// Configuration for one Thorlabs LTS linear stage axis.
///
/// # Example
///
/// ```toml
/// [axes.x]
/// port = "/dev/ttyUSB0"
/// baud = 115200
/// ack_timeout_ms = 2000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LtsConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM4").
    pub port: String,
    /// Baud rate.
    #[serde(default = "default_lts_baud")]
    pub baud: u32,
    /// Acknowledgment timeout in milliseconds.
    #[serde(default)]
    pub ack_timeout_ms: Option<u64>,
}

impl LtsConfig {
    /// Acknowledgment timeout as a `Duration`.
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_ACK_TIMEOUT)
    }
}

/// Configuration for the Pico W stepper controller (rotation axis).
///
/// # Example
///
/// ```toml
/// [axes.rotation]
/// port = "/dev/ttyACM0"
/// ramp_rate = 800.0
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct StepperConfig {
    /// Serial port path (e.g. "/dev/ttyACM0", "COM3").
    pub port: String,
    /// Baud rate.
    #[serde(default = "default_stepper_baud")]
    pub baud: u32,
    /// Acknowledgment timeout in milliseconds.
    #[serde(default)]
    pub ack_timeout_ms: Option<u64>,
    /// Acceleration/deceleration ramp in steps/s², pushed to the firmware on
    /// connect when set.
    #[serde(default)]
    pub ramp_rate: Option<f64>,
}

impl StepperConfig {
    /// Acknowledgment timeout as a `Duration`.
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_ACK_TIMEOUT)
    }
}

/// Parse an [`LtsConfig`] from a TOML fragment.
pub fn lts_from_toml(value: toml::Value) -> Result<LtsConfig> {
    value.try_into().context("invalid LTS stage config")
}

/// Parse a [`StepperConfig`] from a TOML fragment.
pub fn stepper_from_toml(value: toml::Value) -> Result<StepperConfig> {
    value.try_into().context("invalid stepper config")
}

/// Check that a configured serial port exists before opening it.
///
/// On failure the error lists the ports the OS does report, which is what
/// actually gets a mis-wired rig going again.
pub fn validate_serial_port(port: &str, device_name: &str) -> Result<()> {
    if std::path::Path::new(port).exists() {
        return Ok(());
    }

    let available = match serialport::available_ports() {
        Ok(ports) if ports.is_empty() => "No serial ports detected on this system".to_string(),
        Ok(ports) => {
            let list: Vec<String> = ports
                .iter()
                .map(|p| format!("  - {}", p.port_name))
                .collect();
            format!("Available serial ports:\n{}", list.join("\n"))
        }
        Err(e) => format!("Could not enumerate serial ports: {}", e),
    };

    anyhow::bail!(
        "Serial port '{}' does not exist for device '{}'.\n{}",
        port,
        device_name,
        available
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lts_defaults_applied() {
        let value: toml::Value = toml::from_str("port = \"/dev/ttyUSB0\"").unwrap();
        let cfg = lts_from_toml(value).unwrap();
        assert_eq!(cfg.baud, 115_200);
        assert_eq!(cfg.ack_timeout(), DEFAULT_ACK_TIMEOUT);
    }

    #[test]
    fn stepper_full_config() {
        let value: toml::Value = toml::from_str(
            "port = \"/dev/ttyACM0\"\nbaud = 921600\nack_timeout_ms = 500\nramp_rate = 800.0",
        )
        .unwrap();
        let cfg = stepper_from_toml(value).unwrap();
        assert_eq!(cfg.baud, 921_600);
        assert_eq!(cfg.ack_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.ramp_rate, Some(800.0));
    }

    #[test]
    fn missing_port_is_an_error() {
        let value: toml::Value = toml::from_str("baud = 9600").unwrap();
        assert!(lts_from_toml(value).is_err());
    }

    #[test]
    fn nonexistent_port_fails_validation() {
        assert!(validate_serial_port("/dev/does-not-exist-42", "LTS X stage").is_err());
    }
}
