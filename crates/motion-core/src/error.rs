//! Error taxonomy for the motion control stack.
//!
//! Two layers, mirroring where failures originate:
//!
//! - [`AxisError`]: a single axis's transport or device failure, produced at
//!   the driver boundary. Every raw I/O error is converted to one of these
//!   kinds before it leaves a driver.
//! - [`MotionError`]: registry and executor failures. Carries axis identity
//!   where one axis is at fault, and aggregates per-axis errors for fan-out
//!   dispatch failures.
//!
//! Both types are `Clone` so the executor can keep a fault in its session
//! status while also broadcasting it to subscribers. Nothing is allowed to
//! propagate past the executor's step loop: every step outcome is an explicit
//! `Result` consumed by the state machine.

use thiserror::Error;

use crate::axis::AxisId;

/// Failure of a single axis command or status round-trip.
///
/// Drivers convert transport errors into these kinds at the boundary; the
/// executor and emergency stop only ever see `AxisError`, never a raw
/// `std::io::Error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AxisError {
    /// No underlying connection: the driver was released, never connected,
    /// or the device dropped off the bus.
    #[error("axis is not connected")]
    NotConnected,

    /// The device answered with an `ERROR:` token, or with a line the
    /// protocol does not recognize. The offending reply is kept verbatim
    /// for diagnostics.
    #[error("device rejected command: {reply:?}")]
    CommandRejected {
        /// The raw response line, trimmed.
        reply: String,
    },

    /// No acknowledgment arrived within the bounded wait. Commands never
    /// block indefinitely; this is the ceiling firing.
    #[error("no acknowledgment within {timeout_ms} ms")]
    Timeout {
        /// The wait that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Transport-level failure (write, flush, or read error on the port).
    #[error("serial I/O error: {0}")]
    Io(String),
}

impl AxisError {
    /// Wrap a transport error, keeping only its message.
    ///
    /// `std::io::Error` is not `Clone`; storing the rendered message keeps
    /// `AxisError` cheap to aggregate and broadcast.
    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io(err.to_string())
    }

    /// True when the failure means the connection itself is gone, as opposed
    /// to a single command going wrong.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected)
    }
}

/// Registry and executor failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    /// `attach` on an axis that already has a driver bound. Detach first.
    #[error("axis {axis} already has a driver attached")]
    AlreadyBound {
        /// The axis that is already bound.
        axis: AxisId,
    },

    /// A driver of the wrong kind was offered to an axis (e.g. a rotation
    /// controller attached to the X stage slot).
    #[error("axis {axis} is {expected:?} but the driver is {actual:?}")]
    KindMismatch {
        /// The axis being attached to.
        axis: AxisId,
        /// The kind the axis requires.
        expected: crate::axis::AxisKind,
        /// The kind the driver reports.
        actual: crate::axis::AxisKind,
    },

    /// The same driver instance was offered to a second axis. Bindings are
    /// exclusive: one driver, one axis.
    #[error("driver instance is already bound to axis {axis}")]
    DriverShared {
        /// The axis that already owns this driver.
        axis: AxisId,
    },

    /// `start` while a session is already active. Only one session runs at
    /// a time.
    #[error("a sequence session is already active")]
    AlreadyRunning,

    /// A sequence-level invariant failed (no steps, zero repeat count).
    #[error("invalid sequence: {reason}")]
    InvalidSequence {
        /// Which invariant failed.
        reason: String,
    },

    /// A step-level invariant failed (non-finite target, duplicate axis).
    #[error("invalid step {index}: {reason}")]
    InvalidStep {
        /// Zero-based index of the offending step.
        index: usize,
        /// Which invariant failed.
        reason: String,
    },

    /// A single axis faulted the session (timeout waiting for settle,
    /// unexpected disconnect during polling).
    #[error("axis {axis} faulted: {source}")]
    AxisFault {
        /// The axis at fault.
        axis: AxisId,
        /// The underlying driver error.
        #[source]
        source: AxisError,
    },

    /// One or more axes failed during fan-out dispatch of a step. A
    /// multi-axis move with a partially failed dispatch is not treated as
    /// partially successful; the whole step faults.
    #[error("dispatch failed on {} of the step's axes", failures.len())]
    DispatchFailed {
        /// Every axis that failed to accept its target, with its error.
        failures: Vec<(AxisId, AxisError)>,
    },

    /// An operation was requested in a session state that does not permit it
    /// (pause while idle, resume while running, ...).
    #[error("cannot {operation} while session is {state}")]
    InvalidTransition {
        /// The operation that was refused.
        operation: &'static str,
        /// The state the session was in.
        state: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_error_renders_reply_verbatim() {
        let err = AxisError::CommandRejected {
            reply: "ERROR:limit".to_string(),
        };
        assert!(err.to_string().contains("ERROR:limit"));
    }

    #[test]
    fn io_helper_keeps_message() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
        let err = AxisError::io(io);
        assert_eq!(err, AxisError::Io("pipe gone".to_string()));
    }

    #[test]
    fn disconnect_classification() {
        assert!(AxisError::NotConnected.is_disconnect());
        assert!(!AxisError::Timeout { timeout_ms: 2000 }.is_disconnect());
    }

    #[test]
    fn dispatch_failure_counts_axes() {
        let err = MotionError::DispatchFailed {
            failures: vec![
                (AxisId::X, AxisError::NotConnected),
                (AxisId::Y, AxisError::Timeout { timeout_ms: 2000 }),
            ],
        };
        assert!(err.to_string().contains("2 of the step's axes"));
    }
}
