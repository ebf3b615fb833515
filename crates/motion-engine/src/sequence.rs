//! Motion path data model.
//!
//! A [`Sequence`] is the validated, immutable form of a loaded path: an
//! ordered list of [`MotionStep`]s plus run parameters (repeat count,
//! inter-step delay). CSV parsing and axis-name matching happen in the
//! caller; by the time a sequence reaches the executor every target is a
//! finite number on a known axis. Changing a running path means building a
//! new `Sequence` and starting a new session.

use std::time::Duration;

use motion_core::axis::AxisId;
use motion_core::error::MotionError;

/// One row of a path: targets for the axes this step touches.
///
/// Axes absent from a step are left unchanged. Values are positions in mm
/// for linear axes and speeds in rev/s for the rotation axis.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionStep {
    targets: Vec<(AxisId, f64)>,
}

impl MotionStep {
    /// Build a step from `(axis, target)` pairs, kept in the given order.
    pub fn new(targets: impl IntoIterator<Item = (AxisId, f64)>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }

    /// Convenience: a step touching a single axis.
    pub fn single(axis: AxisId, value: f64) -> Self {
        Self::new([(axis, value)])
    }

    /// The `(axis, target)` pairs of this step.
    pub fn targets(&self) -> &[(AxisId, f64)] {
        &self.targets
    }

    /// Target for one axis, if the step references it.
    pub fn target_for(&self, axis: AxisId) -> Option<f64> {
        self.targets
            .iter()
            .find(|(a, _)| *a == axis)
            .map(|(_, v)| *v)
    }

    /// True when the step references no axes at all.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn validate(&self, index: usize) -> Result<(), MotionError> {
        for (i, (axis, value)) in self.targets.iter().enumerate() {
            if !value.is_finite() {
                return Err(MotionError::InvalidStep {
                    index,
                    reason: format!("non-finite target {value} for axis {axis}"),
                });
            }
            if self.targets[..i].iter().any(|(a, _)| a == axis) {
                return Err(MotionError::InvalidStep {
                    index,
                    reason: format!("axis {axis} appears more than once"),
                });
            }
        }
        Ok(())
    }
}

/// A validated, immutable motion path with its run parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    steps: Vec<MotionStep>,
    repeat_count: u32,
    step_delay: Duration,
}

impl Sequence {
    /// Validate and freeze a path.
    ///
    /// # Errors
    /// - `InvalidSequence` for an empty step list or a zero repeat count
    /// - `InvalidStep` for a non-finite target or a duplicated axis within
    ///   one step
    pub fn new(
        steps: Vec<MotionStep>,
        repeat_count: u32,
        step_delay: Duration,
    ) -> Result<Self, MotionError> {
        if steps.is_empty() {
            return Err(MotionError::InvalidSequence {
                reason: "sequence has no steps".to_string(),
            });
        }
        if repeat_count == 0 {
            return Err(MotionError::InvalidSequence {
                reason: "repeat count must be at least 1".to_string(),
            });
        }
        for (index, step) in steps.iter().enumerate() {
            step.validate(index)?;
        }

        Ok(Self {
            steps,
            repeat_count,
            step_delay,
        })
    }

    /// Single pass through the steps, no inter-step delay.
    pub fn once(steps: Vec<MotionStep>) -> Result<Self, MotionError> {
        Self::new(steps, 1, Duration::ZERO)
    }

    /// The steps, in execution order.
    pub fn steps(&self) -> &[MotionStep] {
        &self.steps
    }

    /// How many times the step list runs.
    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    /// Delay inserted after each step settles.
    pub fn step_delay(&self) -> Duration {
        self.step_delay
    }

    /// Total step executions a full run performs (steps × repeats).
    pub fn total_steps(&self) -> usize {
        self.steps.len() * self.repeat_count as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_sequence_passes() {
        let seq = Sequence::new(
            vec![
                MotionStep::new([(AxisId::X, 0.0), (AxisId::Rotation, 3.0)]),
                MotionStep::single(AxisId::X, 10.0),
            ],
            2,
            Duration::from_millis(100),
        )
        .unwrap();
        assert_eq!(seq.total_steps(), 4);
        assert_eq!(seq.steps()[0].target_for(AxisId::Rotation), Some(3.0));
        assert_eq!(seq.steps()[0].target_for(AxisId::Y), None);
    }

    #[test]
    fn empty_sequence_rejected() {
        assert!(matches!(
            Sequence::once(vec![]),
            Err(MotionError::InvalidSequence { .. })
        ));
    }

    #[test]
    fn zero_repeat_rejected() {
        let err = Sequence::new(
            vec![MotionStep::single(AxisId::X, 1.0)],
            0,
            Duration::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, MotionError::InvalidSequence { .. }));
    }

    #[test]
    fn non_finite_target_rejected() {
        let err = Sequence::once(vec![
            MotionStep::single(AxisId::X, 0.0),
            MotionStep::single(AxisId::Y, f64::NAN),
        ])
        .unwrap_err();
        match err {
            MotionError::InvalidStep { index, .. } => assert_eq!(index, 1),
            other => panic!("expected InvalidStep, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_axis_in_step_rejected() {
        let err = Sequence::once(vec![MotionStep::new([
            (AxisId::Z, 1.0),
            (AxisId::Z, 2.0),
        ])])
        .unwrap_err();
        assert!(matches!(err, MotionError::InvalidStep { index: 0, .. }));
    }
}
