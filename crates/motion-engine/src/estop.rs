//! Emergency stop: halt everything, regardless of executor state.
//!
//! `stop_all` fans `halt()` out to every *attached* axis — not just the ones
//! enabled for sequencing — concurrently, so total latency is bounded by one
//! driver's halt timeout rather than the sum across axes. An active session
//! is forced to `Stopping → Idle` no matter where its step loop is.
//!
//! The operation itself never fails: individual halt failures are collected
//! into the [`HaltReport`] instead of short-circuiting, so the caller knows
//! which axes are *not* confirmed stopped.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use motion_core::axis::AxisId;
use motion_core::error::AxisError;
use motion_hardware::registry::AxisRegistry;

use crate::executor::SequenceExecutor;

/// Outcome of one `stop_all` sweep.
#[derive(Debug, Clone)]
pub struct HaltReport {
    /// Axes whose halt command was acknowledged.
    pub halted: Vec<AxisId>,
    /// Axes whose halt failed — physical motion on these is not confirmed
    /// stopped.
    pub failures: Vec<(AxisId, AxisError)>,
}

impl HaltReport {
    /// True when every attached axis acknowledged its halt.
    pub fn all_confirmed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Cross-cutting emergency stop controller.
pub struct EmergencyStop {
    registry: Arc<RwLock<AxisRegistry>>,
    executor: SequenceExecutor,
}

impl EmergencyStop {
    /// Build the controller over the same registry and executor the rest of
    /// the system uses.
    pub fn new(registry: Arc<RwLock<AxisRegistry>>, executor: SequenceExecutor) -> Self {
        Self { registry, executor }
    }

    /// Halt every attached axis and force any active session down.
    ///
    /// Callable from any state; calling it with nothing attached and nothing
    /// running is a harmless empty sweep.
    pub async fn stop_all(&self) -> HaltReport {
        warn!("EMERGENCY STOP - halting all axes");

        // Kill the session first so the step loop cannot dispatch more
        // targets while halts are in flight.
        self.executor.force_stop().await;

        let attached = self.registry.read().await.attached_axes();
        let halts = attached
            .into_iter()
            .map(|(id, driver)| async move { (id, driver.halt().await) });

        let mut report = HaltReport {
            halted: Vec::new(),
            failures: Vec::new(),
        };
        for (id, result) in join_all(halts).await {
            match result {
                Ok(()) => report.halted.push(id),
                Err(err) => {
                    warn!(axis = %id, %err, "halt not confirmed");
                    report.failures.push((id, err));
                }
            }
        }

        info!(
            halted = report.halted.len(),
            failed = report.failures.len(),
            "emergency stop sweep finished"
        );
        report
    }
}
