//! `motion-hardware`
//!
//! Concrete axis drivers and the axis registry.
//!
//! | Axis | Device | Driver |
//! |------|--------|--------|
//! | X/Y/Z | Thorlabs LTS linear stage | [`drivers::lts::LtsDriver`] |
//! | Rotation | Pico W stepper controller | [`drivers::pico::PicoStepperDriver`] |
//! | any | simulation/tests | [`drivers::mock`] |
//!
//! The [`registry::AxisRegistry`] is the single source of truth for which
//! axes exist, whether each is connected, and whether each participates in
//! sequence execution.

pub mod config;
pub mod drivers;
pub mod registry;

pub use config::{LtsConfig, StepperConfig};
pub use drivers::lts::LtsDriver;
pub use drivers::mock::{MockLinearAxis, MockRotationAxis};
pub use drivers::pico::PicoStepperDriver;
pub use registry::{AxisRegistry, CapturedAxis, StatusSample};
