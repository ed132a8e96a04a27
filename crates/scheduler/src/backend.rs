//! Contracts for the scheduler's external collaborators.
//!
//! The worker-facing backend transports launch decisions and emits resource
//! offers; the stage planner supplies task sets and consumes completion
//! events; the result deserializer decodes terminal-task payloads. All three
//! are invoked strictly after the scheduler monitor is released: the backend
//! may hold its own lock while calling into the scheduler, so the reverse
//! call order must never happen under the monitor.

use async_trait::async_trait;
use fg_common::{Result, SchedulerError, StageAttempt, StageId, TaskId};
use serde::{Deserialize, Serialize};

use crate::taskset::{TaskFailReason, TaskResult, TaskState};

/// Worker-facing backend contract consumed by the scheduler.
#[async_trait]
pub trait SchedulerBackend: Send + Sync {
    /// Brings the backend up.
    async fn start(&self) -> Result<()>;

    /// Shuts the backend down.
    async fn stop(&self) -> Result<()>;

    /// Whether the backend can accept dispatches.
    fn is_ready(&self) -> bool;

    /// Whether this backend runs workers in-process. Local backends skip the
    /// speculation ticker and the starvation watchdog.
    fn is_local(&self) -> bool {
        false
    }

    /// Suggested default task-set width.
    fn default_parallelism(&self) -> usize;

    /// Stable application identity.
    fn application_id(&self) -> String;

    /// Attempt identity for restarted applications.
    fn application_attempt_id(&self) -> Option<String> {
        None
    }

    /// Asynchronously requests a fresh offer round.
    async fn revive_offers(&self) -> Result<()>;

    /// Kills one running attempt.
    async fn kill_task(
        &self,
        task_id: TaskId,
        executor_id: &str,
        interrupt_thread: bool,
    ) -> Result<()>;
}

/// Identity of one executor's block manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockManagerId {
    /// Owning executor.
    pub executor_id: String,
    /// Host the block manager serves from.
    pub host: String,
    /// Serving port.
    pub port: u16,
}

/// One in-flight task's metrics carried by an executor heartbeat.
#[derive(Debug, Clone)]
pub struct TaskMetricUpdate {
    /// Reporting attempt.
    pub task_id: TaskId,
    /// Owning stage.
    pub stage_id: StageId,
    /// Owning stage attempt.
    pub stage_attempt: StageAttempt,
    /// Accumulated metrics payload.
    pub metrics: serde_json::Value,
}

/// Terminal-task notification forwarded to the stage planner.
#[derive(Debug, Clone)]
pub struct TaskEndNotice {
    /// Attempt that ended.
    pub task_id: TaskId,
    /// Owning stage.
    pub stage_id: StageId,
    /// Owning stage attempt.
    pub stage_attempt: StageAttempt,
    /// Task position within the set.
    pub index: u32,
    /// Attempt number.
    pub attempt: u32,
    /// Terminal state.
    pub state: TaskState,
    /// Decoded result for finished attempts.
    pub result: Option<TaskResult>,
    /// Failure reason for failed/killed/lost attempts.
    pub failure: Option<TaskFailReason>,
}

/// Stage-planner upcall surface.
///
/// Every method is invoked after the scheduler monitor has been released.
pub trait StagePlanner: Send + Sync {
    /// A new executor joined the cluster.
    fn executor_added(&self, executor_id: &str, host: &str);

    /// A known executor was lost.
    fn executor_lost(&self, executor_id: &str, reason: &str);

    /// Periodic executor heartbeat with per-task metrics. Returning `false`
    /// instructs the executor to re-register its block manager.
    fn executor_heartbeat(
        &self,
        executor_id: &str,
        updates: &[TaskMetricUpdate],
        block_manager: &BlockManagerId,
    ) -> bool;

    /// A task attempt reached a terminal state.
    fn task_ended(&self, notice: &TaskEndNotice);

    /// A task set aborted before completing.
    fn task_set_failed(&self, stage_id: StageId, stage_attempt: StageAttempt, message: &str);
}

/// Decodes terminal-task payloads off the scheduler monitor.
pub trait ResultDeserializer: Send + Sync {
    /// Decodes a finished task's result payload.
    fn decode_success(&self, payload: &[u8]) -> Result<TaskResult>;

    /// Decodes a failed task's reason payload. An empty or undecodable
    /// payload falls back to a state-derived reason chosen by the caller.
    fn decode_failure(&self, payload: &[u8]) -> Option<TaskFailReason>;
}

/// Result deserializer for JSON-encoded payloads.
#[derive(Debug, Default)]
pub struct JsonResultDeserializer;

impl ResultDeserializer for JsonResultDeserializer {
    fn decode_success(&self, payload: &[u8]) -> Result<TaskResult> {
        serde_json::from_slice(payload)
            .map_err(|e| SchedulerError::Serialization(format!("task result decode: {e}")))
    }

    fn decode_failure(&self, payload: &[u8]) -> Option<TaskFailReason> {
        if payload.is_empty() {
            return None;
        }
        serde_json::from_slice(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_deserializer_roundtrips_results() {
        let deser = JsonResultDeserializer;
        let payload = serde_json::to_vec(&TaskResult {
            value: serde_json::json!({"rows": 42}),
        })
        .unwrap();
        let result = deser.decode_success(&payload).unwrap();
        assert_eq!(result.value["rows"], 42);
    }

    #[test]
    fn undecodable_success_payload_is_serialization_error() {
        let deser = JsonResultDeserializer;
        let err = deser.decode_success(b"not json").unwrap_err();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }

    #[test]
    fn failure_decode_falls_back_on_empty_payload() {
        let deser = JsonResultDeserializer;
        assert_eq!(deser.decode_failure(b""), None);
        let payload = serde_json::to_vec(&TaskFailReason::Exception {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(
            deser.decode_failure(&payload),
            Some(TaskFailReason::Exception {
                message: "boom".to_string()
            })
        );
    }
}
