//! FlowGrid task scheduler core.
//!
//! Architecture role:
//! - admits task sets produced by the stage planner and tracks one
//!   [`manager::TaskSetManager`] per stage attempt;
//! - serves resource-offer rounds through the [`placement::PlacementEngine`]
//!   under one of four policies (default round-robin, PPA, BPA, driven by
//!   the [`oracle::PredictionOracle`]);
//! - applies backend status updates and forwards terminal events to the
//!   stage planner.
//!
//! Key modules:
//! - [`taskset`]
//! - [`manager`]
//! - [`pool`]
//! - [`placement`]
//! - [`registry`]
//! - [`scheduler`]
//!
//! Concurrency: one monitor guards all scheduler state; backend calls and
//! planner upcalls always happen after the monitor is released.

pub mod backend;
pub mod manager;
pub mod oracle;
pub mod placement;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod taskset;

pub use backend::{
    BlockManagerId, JsonResultDeserializer, ResultDeserializer, SchedulerBackend, StagePlanner,
    TaskEndNotice, TaskMetricUpdate,
};
pub use manager::{DrainedTask, TaskAttempt, TaskSetEvent, TaskSetManager};
pub use oracle::{PlacementPolicy, PredictionOracle, UniformOracle};
pub use placement::{prioritize_containers, OfferRoundOutcome, PlacementEngine};
pub use pool::{Pool, SchedulableBuilder, DEFAULT_POOL_NAME};
pub use registry::{ExecutorTopology, RackResolver, TaskRegistry};
pub use scheduler::TaskScheduler;
pub use taskset::{
    TaskBody, TaskDescription, TaskFailReason, TaskLocality, TaskLocation, TaskPayload,
    TaskResult, TaskSet, TaskSpec, TaskState, WorkerOffer, FULL_WORKER_CORES,
    MAX_TASK_PAYLOAD_BYTES,
};
