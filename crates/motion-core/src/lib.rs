//! `motion-core`
//!
//! Core trait definitions and types for the motion control stack.
//!
//! This crate provides the shared vocabulary used across the driver and
//! orchestration crates:
//!
//! - [`axis`]: axis identity ([`AxisId`]), classification ([`AxisKind`]),
//!   reported state ([`AxisStatus`]) and the [`AxisDriver`] capability trait
//!   every hardware driver implements.
//! - [`error`]: the error taxonomy — [`AxisError`] for driver-boundary
//!   failures, [`MotionError`] for registry/executor failures.
//! - [`serial`]: async serial transport shared by the line-protocol drivers.
//!
//! Hardware drivers live in `motion-hardware`; the sequence executor and
//! emergency stop live in `motion-engine`.

pub mod axis;
pub mod error;
pub mod serial;

pub use axis::{AxisDriver, AxisId, AxisKind, AxisStatus};
pub use error::{AxisError, MotionError};
