//! Axis registry: runtime bookkeeping for the rig's four axes.
//!
//! The registry is the single source of truth for which axes exist, whether
//! each is connected (has a driver bound), and whether each participates in
//! sequence execution. It hands the executor an immutable snapshot of the
//! enabled set at session start, so attaching/detaching/toggling axes while
//! a session runs is safe but only takes effect for the *next* session.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    AxisRegistry                      │
//! │   X ─▶ LtsDriver      (enabled)                      │
//! │   Y ─▶ LtsDriver      (disabled)                     │
//! │   Z ─▶ (unbound)                                     │
//! │   Rotation ─▶ PicoStepperDriver (enabled)            │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Callers share the registry as `Arc<RwLock<AxisRegistry>>`; the lock is
//! what serializes `attach`/`detach`/`set_enabled` against a running
//! session's capture.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use motion_core::axis::{AxisDriver, AxisId, AxisKind, AxisStatus};
use motion_core::error::MotionError;

/// A cached status observation with its staleness timestamp.
#[derive(Debug, Clone, Copy)]
pub struct StatusSample {
    /// The observed status.
    pub status: AxisStatus,
    /// When it was observed.
    pub recorded_at: Instant,
}

/// One axis captured into a session's working set.
///
/// The driver is `None` when the axis was enabled for sequencing but had no
/// driver bound at capture time; dispatching to it then fails
/// `NotConnected`, which is exactly the fault the session should report.
#[derive(Clone)]
pub struct CapturedAxis {
    /// Which axis this is.
    pub id: AxisId,
    /// Its motion model (linear axes are waited on, rotational are not).
    pub kind: AxisKind,
    /// The binding at capture time, if any.
    pub driver: Option<Arc<dyn AxisDriver>>,
}

struct AxisSlot {
    driver: Option<Arc<dyn AxisDriver>>,
    enabled: bool,
    last_status: Option<StatusSample>,
}

/// Registry of the rig's four axes.
pub struct AxisRegistry {
    /// One slot per axis, indexed by [`AxisId::ALL`] order.
    axes: [AxisSlot; 4],
}

fn slot_index(axis: AxisId) -> usize {
    match axis {
        AxisId::X => 0,
        AxisId::Y => 1,
        AxisId::Z => 2,
        AxisId::Rotation => 3,
    }
}

impl AxisRegistry {
    /// Create the registry: all four axes present, unbound and disabled.
    pub fn new() -> Self {
        Self {
            axes: std::array::from_fn(|_| AxisSlot {
                driver: None,
                enabled: false,
                last_status: None,
            }),
        }
    }

    fn slot(&self, axis: AxisId) -> &AxisSlot {
        &self.axes[slot_index(axis)]
    }

    fn slot_mut(&mut self, axis: AxisId) -> &mut AxisSlot {
        &mut self.axes[slot_index(axis)]
    }

    /// Bind a driver to an axis.
    ///
    /// # Errors
    /// - `AlreadyBound` if the axis already has a driver (detach first)
    /// - `KindMismatch` if the driver's motion model does not match the axis
    /// - `DriverShared` if this driver instance is bound to another axis
    pub fn attach(
        &mut self,
        axis: AxisId,
        driver: Arc<dyn AxisDriver>,
    ) -> Result<(), MotionError> {
        if driver.kind() != axis.kind() {
            return Err(MotionError::KindMismatch {
                axis,
                expected: axis.kind(),
                actual: driver.kind(),
            });
        }

        // Bindings are exclusive: one driver instance, one axis.
        for other in AxisId::ALL {
            if other == axis {
                continue;
            }
            if let Some(existing) = &self.slot(other).driver {
                if Arc::ptr_eq(existing, &driver) {
                    return Err(MotionError::DriverShared { axis: other });
                }
            }
        }

        let slot = self.slot_mut(axis);
        if slot.driver.is_some() {
            return Err(MotionError::AlreadyBound { axis });
        }

        slot.driver = Some(driver);
        slot.last_status = None;
        info!(%axis, "axis driver attached");
        Ok(())
    }

    /// Unbind and release an axis's driver. No-op when already detached.
    pub async fn detach(&mut self, axis: AxisId) {
        let slot = self.slot_mut(axis);
        if let Some(driver) = slot.driver.take() {
            slot.last_status = None;
            driver.release().await;
            info!(%axis, "axis driver detached");
        }
    }

    /// Toggle sequence participation. Does not touch the connection.
    pub fn set_enabled(&mut self, axis: AxisId, enabled: bool) {
        self.slot_mut(axis).enabled = enabled;
        debug!(%axis, enabled, "axis sequence participation changed");
    }

    /// Whether the axis is enabled for sequence execution.
    pub fn is_enabled(&self, axis: AxisId) -> bool {
        self.slot(axis).enabled
    }

    /// Whether the axis currently has a driver bound.
    pub fn is_attached(&self, axis: AxisId) -> bool {
        self.slot(axis).driver.is_some()
    }

    /// Snapshot of the enabled axes, for a session's working set.
    ///
    /// Enabled-but-unbound axes are included with `driver: None` so a step
    /// referencing them faults with `NotConnected` instead of silently
    /// skipping a physical move.
    pub fn enabled_axes(&self) -> Vec<CapturedAxis> {
        AxisId::ALL
            .into_iter()
            .filter(|id| self.slot(*id).enabled)
            .map(|id| CapturedAxis {
                id,
                kind: id.kind(),
                driver: self.slot(id).driver.clone(),
            })
            .collect()
    }

    /// Every axis that currently has a driver bound, enabled or not.
    /// The emergency stop path halts all of these.
    pub fn attached_axes(&self) -> Vec<(AxisId, Arc<dyn AxisDriver>)> {
        AxisId::ALL
            .into_iter()
            .filter_map(|id| self.slot(id).driver.clone().map(|d| (id, d)))
            .collect()
    }

    /// Record a fresh status observation for an axis.
    pub fn record_status(&mut self, axis: AxisId, status: AxisStatus) {
        self.slot_mut(axis).last_status = Some(StatusSample {
            status,
            recorded_at: Instant::now(),
        });
    }

    /// Last recorded status for an axis, with its staleness timestamp.
    pub fn status_of(&self, axis: AxisId) -> Option<StatusSample> {
        self.slot(axis).last_status
    }
}

impl Default for AxisRegistry {
    fn default() -> Self {
        Self::new()
    }
}
