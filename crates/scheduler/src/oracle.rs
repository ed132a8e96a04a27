//! Demand-prediction contract consumed by the placement engine.

use fg_common::{SchedulingMode, TaskId};

use crate::taskset::FULL_WORKER_CORES;

/// Placement policy selected by a customized oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementPolicy {
    /// Priority placement: best-fit worker per task, with a max-residual
    /// fallback that downgrades the prediction.
    Ppa,
    /// Bin placement: workers partitioned into free/active/extra bins by
    /// residual capacity.
    Bpa,
}

/// External service supplying per-task CPU demand predictions.
///
/// Predictions are integer capacity units where 100 equals one whole
/// worker. The oracle is process-wide and must be thread-safe; the engine
/// calls it only while holding the scheduler monitor.
pub trait PredictionOracle: Send + Sync {
    /// Whether a custom placement policy is active.
    fn is_customized(&self) -> bool {
        false
    }

    /// Policy to run when [`Self::is_customized`] returns true.
    fn placement_policy(&self) -> PlacementPolicy {
        PlacementPolicy::Ppa
    }

    /// Predicted CPU demand of one dispatched task.
    fn cpu_core(&self, task_id: TaskId) -> u32;

    /// Records a downgraded estimate after a fallback placement left the
    /// task with only `residual` units.
    fn re_predict(&self, task_id: TaskId, residual: u32);

    /// Gives the oracle a chance to override the configured scheduling mode.
    fn scheduling_mode(&self, current: SchedulingMode) -> SchedulingMode {
        current
    }
}

/// Oracle used when no prediction service is wired in: every task demands a
/// whole worker and no custom policy runs.
#[derive(Debug, Default)]
pub struct UniformOracle;

impl PredictionOracle for UniformOracle {
    fn cpu_core(&self, _task_id: TaskId) -> u32 {
        FULL_WORKER_CORES
    }

    fn re_predict(&self, _task_id: TaskId, _residual: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_oracle_is_not_customized() {
        let oracle = UniformOracle;
        assert!(!oracle.is_customized());
        assert_eq!(oracle.cpu_core(TaskId(1)), FULL_WORKER_CORES);
        assert_eq!(
            oracle.scheduling_mode(SchedulingMode::Fair),
            SchedulingMode::Fair
        );
    }
}
