//! `motion-engine`
//!
//! Orchestration for the motion rig: the [`SequenceExecutor`] drives a
//! validated [`Sequence`] of [`MotionStep`]s across the axes captured from
//! the [`AxisRegistry`](motion_hardware::AxisRegistry), one step at a time,
//! synchronizing linear-axis completion before advancing; the
//! [`EmergencyStop`] halts everything regardless of executor state.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  start()   ┌─────────┐ pause()/resume() ┌────────┐
//! │ Idle │───────────▶│ Running │◀────────────────▶│ Paused │
//! └──────┘            └────┬────┘                  └───┬────┘
//!    ▲                     │ stop() / stop_all()       │
//!    │                ┌────▼─────┐◀────────────────────┘
//!    │◀───────────────│ Stopping │
//!    │                └──────────┘
//!    │◀─── Completed (sequence finished)
//!    │◀─── Faulted   (dispatch failure, timeout, disconnect)
//! ```
//!
//! `Completed`/`Faulted`/`Stopped` are recorded as the session's
//! [`SessionOutcome`]; the state itself resolves back to `Idle` so the next
//! session can start.

pub mod estop;
pub mod executor;
pub mod sequence;

pub use estop::{EmergencyStop, HaltReport};
pub use executor::{
    ExecutorConfig, SequenceExecutor, SessionEvent, SessionHandle, SessionOutcome, SessionState,
    SessionStatus,
};
pub use sequence::{MotionStep, Sequence};
