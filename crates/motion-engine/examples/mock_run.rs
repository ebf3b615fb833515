//! Run a short path over mock axes, printing engine events.
//!
//! ```bash
//! RUST_LOG=info cargo run -p motion-engine --example mock_run
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use motion_core::axis::AxisId;
use motion_engine::{EmergencyStop, MotionStep, Sequence, SequenceExecutor};
use motion_hardware::drivers::mock::{MockLinearAxis, MockRotationAxis};
use motion_hardware::registry::AxisRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Mock rig: X/Y stages plus the rotation stepper.
    let registry = Arc::new(RwLock::new(AxisRegistry::new()));
    {
        let mut reg = registry.write().await;
        reg.attach(AxisId::X, Arc::new(MockLinearAxis::with_speed(40.0)))?;
        reg.attach(AxisId::Y, Arc::new(MockLinearAxis::with_speed(40.0)))?;
        reg.attach(AxisId::Rotation, Arc::new(MockRotationAxis::new()))?;
        reg.set_enabled(AxisId::X, true);
        reg.set_enabled(AxisId::Y, true);
        reg.set_enabled(AxisId::Rotation, true);
    }

    let executor = SequenceExecutor::new(registry.clone());
    let _estop = EmergencyStop::new(registry.clone(), executor.clone());

    let mut events = executor.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("event: {event:?}");
        }
    });

    // A small raster: move X and Y together, spin up the rotation axis on
    // the second pass, spin it down at the end.
    let sequence = Sequence::new(
        vec![
            MotionStep::new([(AxisId::X, 5.0), (AxisId::Y, 2.5)]),
            MotionStep::new([(AxisId::X, 10.0), (AxisId::Rotation, 2.0)]),
            MotionStep::new([(AxisId::X, 0.0), (AxisId::Y, 0.0), (AxisId::Rotation, 0.0)]),
        ],
        2,
        Duration::from_millis(100),
    )?;

    let handle = executor.start(sequence).await?;
    let outcome = handle.wait().await;
    println!("outcome: {outcome:?}");

    let status = executor.status().await;
    for (axis, axis_status) in &status.axes {
        println!("{axis}: {axis_status:?}");
    }

    Ok(())
}
