//! Task-set data model shared between admission, placement, and lifecycle paths.
//!
//! Contract:
//! - a [`TaskSet`] is the immutable unit of admission: all tasks of one
//!   `(stage, stage attempt)` plus its scheduling properties;
//! - a [`TaskDescription`] is one dispatch decision shipped to the backend;
//! - a [`WorkerOffer`] reports free capacity in integer units where 100
//!   equals one fully idle worker.

use fg_common::{Result, SchedulerError, StageAttempt, StageId, TaskId};
use serde::{Deserialize, Serialize};

/// Hard cap on one encoded task payload shipped through the backend.
pub const MAX_TASK_PAYLOAD_BYTES: usize = 1 << 20;

/// Capacity units reported by one fully idle worker.
pub const FULL_WORKER_CORES: u32 = 100;

/// Locality preference levels, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskLocality {
    /// Task input lives in the offering executor's process.
    ProcessLocal,
    /// Task input lives on the offering host.
    NodeLocal,
    /// Task has no locality preference.
    NoPref,
    /// Task input lives in the offering host's rack.
    RackLocal,
    /// Any worker is acceptable.
    Any,
}

impl TaskLocality {
    /// All levels in ascending (best-first) order.
    pub const ALL: [TaskLocality; 5] = [
        TaskLocality::ProcessLocal,
        TaskLocality::NodeLocal,
        TaskLocality::NoPref,
        TaskLocality::RackLocal,
        TaskLocality::Any,
    ];
}

impl std::fmt::Display for TaskLocality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskLocality::ProcessLocal => "PROCESS_LOCAL",
            TaskLocality::NodeLocal => "NODE_LOCAL",
            TaskLocality::NoPref => "NO_PREF",
            TaskLocality::RackLocal => "RACK_LOCAL",
            TaskLocality::Any => "ANY",
        };
        f.write_str(s)
    }
}

/// Preferred placement of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLocation {
    /// Host holding the task's input.
    pub host: String,
    /// Specific executor process holding the input, when known.
    pub executor_id: Option<String>,
}

impl TaskLocation {
    /// Host-level location.
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            executor_id: None,
        }
    }

    /// Executor-pinned location.
    pub fn executor(host: impl Into<String>, executor_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            executor_id: Some(executor_id.into()),
        }
    }
}

/// Work shipped to the worker for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskBody {
    /// Pre-encoded plan fragment produced by the stage planner.
    Fragment {
        /// Opaque fragment bytes.
        bytes: Vec<u8>,
    },
    /// Structured command evaluated by the worker runtime.
    Command {
        /// Operator name.
        name: String,
        /// Operator arguments.
        args: serde_json::Value,
    },
}

/// One task of a task set, prior to any dispatch decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Position within the owning task set.
    pub index: u32,
    /// Work to ship at dispatch time.
    pub body: TaskBody,
    /// Placement preferences, best first. Empty means no preference.
    pub preferred_locations: Vec<TaskLocation>,
}

/// Immutable batch of tasks belonging to one stage attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSet {
    /// Owning stage.
    pub stage_id: StageId,
    /// Attempt number of the stage submission.
    pub stage_attempt: StageAttempt,
    /// Submission priority; lower drains first under FIFO.
    pub priority: i32,
    /// Named fair-scheduling pool, when the FAIR builder is active.
    pub pool_name: Option<String>,
    /// Ordered tasks of this attempt.
    pub tasks: Vec<TaskSpec>,
}

impl TaskSet {
    /// Human-readable identity used in logs, e.g. `TaskSet_4.0`.
    pub fn name(&self) -> String {
        format!("TaskSet_{}.{}", self.stage_id, self.stage_attempt)
    }
}

/// Wire payload encoded into a [`TaskDescription`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Owning stage.
    pub stage_id: StageId,
    /// Owning stage attempt.
    pub stage_attempt: StageAttempt,
    /// Task position within the set.
    pub index: u32,
    /// Attempt number of this task launch.
    pub attempt: u32,
    /// The work itself.
    pub body: TaskBody,
}

impl TaskPayload {
    /// Encodes the payload, enforcing [`MAX_TASK_PAYLOAD_BYTES`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| SchedulerError::Serialization(format!("task payload encode: {e}")))?;
        if bytes.len() > MAX_TASK_PAYLOAD_BYTES {
            return Err(SchedulerError::Serialization(format!(
                "task payload of {} bytes exceeds limit of {} bytes",
                bytes.len(),
                MAX_TASK_PAYLOAD_BYTES
            )));
        }
        Ok(bytes)
    }
}

/// One dispatch decision returned to the backend.
#[derive(Debug, Clone)]
pub struct TaskDescription {
    /// Globally unique, monotonic task id.
    pub task_id: TaskId,
    /// Executor chosen for the launch.
    pub executor_id: String,
    /// Display name, e.g. `task 3.0 in stage 4.0`.
    pub name: String,
    /// Encoded [`TaskPayload`].
    pub payload: Vec<u8>,
}

/// Free capacity reported by one worker for an offer round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOffer {
    /// Offering executor.
    pub executor_id: String,
    /// Host the executor runs on.
    pub host: String,
    /// Free integer capacity units; 100 is one whole worker.
    pub cores: u32,
}

impl WorkerOffer {
    /// Convenience constructor.
    pub fn new(executor_id: impl Into<String>, host: impl Into<String>, cores: u32) -> Self {
        Self {
            executor_id: executor_id.into(),
            host: host.into(),
            cores,
        }
    }
}

/// Task lifecycle states reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Dispatch accepted, process start pending.
    Launching,
    /// Task is executing.
    Running,
    /// Task completed successfully; payload holds the encoded result.
    Finished,
    /// Task failed; payload may describe the failure.
    Failed,
    /// Task was killed on request.
    Killed,
    /// Task was lost with its executor.
    Lost,
}

impl TaskState {
    /// Whether the state ends the attempt.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }
}

/// Decoded result of a finished task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Result value produced by the task.
    pub value: serde_json::Value,
}

/// Reason attached to a failed/killed/lost attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskFailReason {
    /// The task raised an error.
    Exception {
        /// Worker-reported message.
        message: String,
    },
    /// The task was killed on request.
    Killed,
    /// The task went down with its executor.
    ExecutorLost {
        /// Lost executor.
        executor_id: String,
    },
    /// The backend lost track of the attempt.
    Lost,
}

impl TaskFailReason {
    /// Whether this failure consumes one of the attempt budget slots.
    ///
    /// Kills and infrastructure losses are not the task's fault.
    pub fn counts_toward_failures(&self) -> bool {
        matches!(self, TaskFailReason::Exception { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locality_levels_order_best_first() {
        assert!(TaskLocality::ProcessLocal < TaskLocality::NodeLocal);
        assert!(TaskLocality::NodeLocal < TaskLocality::NoPref);
        assert!(TaskLocality::NoPref < TaskLocality::RackLocal);
        assert!(TaskLocality::RackLocal < TaskLocality::Any);
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Launching.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Finished.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Killed.is_terminal());
        assert!(TaskState::Lost.is_terminal());
    }

    #[test]
    fn payload_roundtrips_through_json() {
        let payload = TaskPayload {
            stage_id: StageId(4),
            stage_attempt: 0,
            index: 3,
            attempt: 1,
            body: TaskBody::Command {
                name: "map".to_string(),
                args: serde_json::json!({"split": 3}),
            },
        };
        let bytes = payload.encode().unwrap();
        let decoded: TaskPayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.stage_id, StageId(4));
        assert_eq!(decoded.index, 3);
        assert_eq!(decoded.attempt, 1);
    }

    #[test]
    fn oversized_payload_is_serialization_error() {
        let payload = TaskPayload {
            stage_id: StageId(1),
            stage_attempt: 0,
            index: 0,
            attempt: 0,
            body: TaskBody::Fragment {
                bytes: vec![0_u8; MAX_TASK_PAYLOAD_BYTES + 1],
            },
        };
        let err = payload.encode().unwrap_err();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }

    #[test]
    fn kill_and_loss_do_not_consume_failure_budget() {
        assert!(TaskFailReason::Exception {
            message: "boom".to_string()
        }
        .counts_toward_failures());
        assert!(!TaskFailReason::Killed.counts_toward_failures());
        assert!(!TaskFailReason::ExecutorLost {
            executor_id: "e1".to_string()
        }
        .counts_toward_failures());
        assert!(!TaskFailReason::Lost.counts_toward_failures());
    }
}
