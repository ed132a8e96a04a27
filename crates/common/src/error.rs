use thiserror::Error;

use crate::ids::StageId;

/// Canonical FlowGrid error taxonomy used across crates.
///
/// Classification guidance:
/// - [`SchedulerError::InvalidConfig`]: configuration contract violations discovered at startup
/// - [`SchedulerError::ConflictingTaskSet`]: admission rejected; scheduler state is unchanged
/// - [`SchedulerError::Serialization`]: task payload or result payload encode/decode failures
/// - [`SchedulerError::Execution`]: runtime scheduling/lifecycle failures
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid or inconsistent configuration.
    ///
    /// Examples:
    /// - unknown scheduling-mode name
    /// - zero cpus-per-task
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A non-zombie task-set manager already exists for the stage.
    ///
    /// Raised at admission when a second attempt is submitted while an
    /// earlier attempt for the same stage is still live.
    #[error("task set conflict for stage {stage_id}: {detail}")]
    ConflictingTaskSet {
        /// Stage whose admission was rejected.
        stage_id: StageId,
        /// Live attempts that caused the rejection.
        detail: String,
    },

    /// Task payload or result payload encode/decode failure.
    ///
    /// Examples:
    /// - a task body that cannot be serialized at dispatch time
    /// - an undecodable finished-task result payload
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Runtime scheduling/lifecycle failures after admission succeeded.
    ///
    /// Examples:
    /// - backend error reported with no active task sets
    /// - a lifecycle transition the scheduler cannot honor
    #[error("execution error: {0}")]
    Execution(String),
}

/// Standard FlowGrid result alias.
pub type Result<T> = std::result::Result<T, SchedulerError>;
