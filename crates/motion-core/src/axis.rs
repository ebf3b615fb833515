//! Axis identity and the driver capability contract.
//!
//! The rig has four axes: three linear stages (X, Y, Z) and one rotation
//! stepper. Linear axes move to absolute positions and settle; the rotation
//! axis runs at a signed speed and ramps on-device. Everything that commands
//! hardware goes through the [`AxisDriver`] trait so the registry and the
//! sequence executor stay device-agnostic.
//!
//! # Design
//!
//! Each driver:
//! - Is async (uses `#[async_trait]`)
//! - Is thread-safe (`Send + Sync`), with interior mutability behind `&self`
//! - Returns typed [`AxisError`]s, never raw transport errors
//! - Owns exactly one underlying connection; connection lifetime equals
//!   driver lifetime

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::AxisError;

/// One independently controllable degree of freedom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AxisId {
    /// X linear stage.
    X,
    /// Y linear stage.
    Y,
    /// Z linear stage.
    Z,
    /// Rotation stepper.
    Rotation,
}

impl AxisId {
    /// Every axis the rig knows about, in canonical order.
    pub const ALL: [AxisId; 4] = [AxisId::X, AxisId::Y, AxisId::Z, AxisId::Rotation];

    /// The motion model this axis follows.
    pub fn kind(&self) -> AxisKind {
        match self {
            AxisId::X | AxisId::Y | AxisId::Z => AxisKind::Linear,
            AxisId::Rotation => AxisKind::Rotational,
        }
    }

    /// Canonical name, matching path-file column headers.
    pub fn label(&self) -> &'static str {
        match self {
            AxisId::X => "X",
            AxisId::Y => "Y",
            AxisId::Z => "Z",
            AxisId::Rotation => "Rotation",
        }
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error for [`AxisId::from_str`] on a name that is not X/Y/Z/Rotation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown axis name: {0:?}")]
pub struct UnknownAxis(pub String);

impl FromStr for AxisId {
    type Err = UnknownAxis;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "X" | "x" => Ok(AxisId::X),
            "Y" | "y" => Ok(AxisId::Y),
            "Z" | "z" => Ok(AxisId::Z),
            "Rotation" | "rotation" | "R" | "r" => Ok(AxisId::Rotation),
            other => Err(UnknownAxis(other.to_string())),
        }
    }
}

/// Motion model of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisKind {
    /// Moves to absolute positions in mm and reports motion-complete.
    Linear,
    /// Runs at a signed speed in revolutions/second; no motion-complete
    /// signal — ramping toward the target speed happens on-device.
    Rotational,
}

/// Last reported state of an axis, as returned by [`AxisDriver::poll_status`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AxisStatus {
    /// Linear stage: measured position.
    Linear {
        /// Measured position in mm.
        position_mm: f64,
    },
    /// Rotation stepper: speed ramp state and step counter.
    Rotation {
        /// Measured speed in revolutions/second.
        current_rps: f64,
        /// Commanded speed the device is ramping toward.
        target_rps: f64,
        /// Accumulated step count since power-up.
        position_steps: i64,
    },
}

/// Capability contract every axis driver satisfies.
///
/// Implemented by the LTS stage driver, the Pico stepper driver and the mock
/// axes. The registry hands these out as `Arc<dyn AxisDriver>`; the executor
/// fans commands out across them without knowing the device underneath.
///
/// # Contract
///
/// - `send_target`: linear drivers issue an absolute position command in mm;
///   rotation drivers issue a speed command in revolutions/second where sign
///   encodes direction and zero means stop. Fails `NotConnected` without a
///   connection, `CommandRejected` on a device error token, `Timeout` when
///   no acknowledgment arrives within the driver's ack bound — never blocks
///   indefinitely.
/// - `poll_status`: side-effect-free beyond the round-trip; safe while the
///   axis is moving.
/// - `is_busy`: linear — true until the device reports motion complete;
///   rotation — always false (speed commands complete immediately), so
///   callers must not wait on rotation axes.
/// - `halt`: takes effect faster than motion completion, succeeds on a
///   stationary axis, and is idempotent — a second call in a row is a no-op
///   that sends nothing further to the device.
/// - `release`: tears the connection down exactly once; afterwards every
///   command fails `NotConnected`. Safe to call repeatedly.
#[async_trait]
pub trait AxisDriver: Send + Sync {
    /// The motion model this driver serves. Must match the axis it is
    /// attached to.
    fn kind(&self) -> AxisKind;

    /// Command a new target: absolute position (mm) for linear drivers,
    /// signed speed (rev/s, zero = stop) for rotation drivers.
    async fn send_target(&self, value: f64) -> Result<(), AxisError>;

    /// Read the axis's current state.
    async fn poll_status(&self) -> Result<AxisStatus, AxisError>;

    /// Whether the axis is still executing its last target command.
    async fn is_busy(&self) -> Result<bool, AxisError>;

    /// Stop motion now. Idempotent; succeeds even when stationary.
    async fn halt(&self) -> Result<(), AxisError>;

    /// Release the underlying connection. Runs exactly once; later commands
    /// fail `NotConnected`.
    async fn release(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_per_axis() {
        assert_eq!(AxisId::X.kind(), AxisKind::Linear);
        assert_eq!(AxisId::Y.kind(), AxisKind::Linear);
        assert_eq!(AxisId::Z.kind(), AxisKind::Linear);
        assert_eq!(AxisId::Rotation.kind(), AxisKind::Rotational);
    }

    #[test]
    fn names_round_trip() {
        for axis in AxisId::ALL {
            let parsed: AxisId = axis.label().parse().unwrap();
            assert_eq!(parsed, axis);
        }
        assert!("Theta".parse::<AxisId>().is_err());
    }

    #[test]
    fn serde_matches_labels() {
        let json = serde_json::to_string(&AxisId::Rotation).unwrap();
        assert_eq!(json, "\"Rotation\"");
        let back: AxisId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AxisId::Rotation);
    }
}
