//! Scheduler entry points and lifecycle coordination.
//!
//! Concurrency discipline: every registry mutation and dispatch decision
//! happens while holding the scheduler monitor (`SchedulerInner::state`).
//! The backend may hold its own lock when it calls in, so no backend method
//! is ever invoked under the monitor: state transitions return [`Effect`]
//! values that are executed after the guard is dropped. Result payloads are
//! decoded on spawned tasks that re-acquire the monitor to apply the
//! outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fg_common::metrics::global_metrics;
use fg_common::{
    Result, SchedulerConfig, SchedulerError, StageAttempt, StageId, TaskId,
};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{
    BlockManagerId, ResultDeserializer, SchedulerBackend, StagePlanner, TaskEndNotice,
    TaskMetricUpdate,
};
use crate::manager::{TaskSetEvent, TaskSetManager};
use crate::oracle::PredictionOracle;
use crate::placement::PlacementEngine;
use crate::pool::{Pool, SchedulableBuilder};
use crate::registry::{ExecutorTopology, RackResolver, TaskRegistry};
use crate::taskset::{
    TaskDescription, TaskFailReason, TaskResult, TaskSet, TaskState, WorkerOffer,
};

/// Poll period while waiting for the backend to come up.
const BACKEND_READY_POLL_MS: u64 = 100;

/// Work to perform after the monitor has been released.
enum Effect {
    Revive,
    Kill {
        task_id: TaskId,
        executor_id: String,
        interrupt: bool,
    },
    TaskEnded(TaskEndNotice),
    TaskSetFailed {
        stage_id: StageId,
        stage_attempt: StageAttempt,
        message: String,
    },
    ExecutorAdded {
        executor_id: String,
        host: String,
    },
    ExecutorLost {
        executor_id: String,
        reason: String,
    },
    Decode(DecodeJob),
}

/// Terminal payload handed to the result deserializer off the monitor.
struct DecodeJob {
    task_id: TaskId,
    stage_id: StageId,
    stage_attempt: StageAttempt,
    state: TaskState,
    payload: Vec<u8>,
}

enum Decoded {
    Success(TaskResult),
    Failure(TaskState, TaskFailReason),
}

/// Monitor-protected scheduler state.
struct SchedulerState {
    registry: TaskRegistry,
    task_sets_by_stage: HashMap<StageId, HashMap<StageAttempt, Arc<Mutex<TaskSetManager>>>>,
    root_pool: Pool,
    executors_added: bool,
}

impl SchedulerState {
    fn manager_for(
        &self,
        stage_id: StageId,
        stage_attempt: StageAttempt,
    ) -> Option<Arc<Mutex<TaskSetManager>>> {
        self.task_sets_by_stage
            .get(&stage_id)?
            .get(&stage_attempt)
            .cloned()
    }

    fn all_managers(&self) -> Vec<(StageId, StageAttempt, Arc<Mutex<TaskSetManager>>)> {
        self.task_sets_by_stage
            .iter()
            .flat_map(|(stage_id, attempts)| {
                attempts
                    .iter()
                    .map(move |(attempt, manager)| (*stage_id, *attempt, Arc::clone(manager)))
            })
            .collect()
    }

    /// Removes one completed attempt from the stage map and the pool.
    /// Idempotent.
    fn task_set_finished(&mut self, stage_id: StageId, stage_attempt: StageAttempt) {
        if let Some(attempts) = self.task_sets_by_stage.get_mut(&stage_id) {
            if attempts.remove(&stage_attempt).is_some() {
                info!(
                    stage_id = %stage_id,
                    stage_attempt,
                    operator = "SchedulerTaskSetFinished",
                    "task set removed"
                );
            }
            if attempts.is_empty() {
                self.task_sets_by_stage.remove(&stage_id);
            }
        }
        self.root_pool.remove_task_set(stage_id, stage_attempt);
    }

    /// Translates manager events into monitor-boundary effects, applying the
    /// state-side consequences (pool/map removal) inline.
    fn process_events(
        &mut self,
        stage_id: StageId,
        stage_attempt: StageAttempt,
        events: Vec<TaskSetEvent>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        for event in events {
            match event {
                TaskSetEvent::TaskEnded {
                    task_id,
                    index,
                    attempt,
                    state,
                    result,
                    reason,
                } => {
                    self.registry.clear_task(task_id);
                    if state != TaskState::Finished {
                        global_metrics().inc_task_failures(stage_id.0);
                    }
                    effects.push(Effect::TaskEnded(TaskEndNotice {
                        task_id,
                        stage_id,
                        stage_attempt,
                        index,
                        attempt,
                        state,
                        result,
                        failure: reason,
                    }));
                }
                TaskSetEvent::KillAttempt {
                    task_id,
                    executor_id,
                } => effects.push(Effect::Kill {
                    task_id,
                    executor_id,
                    interrupt: false,
                }),
                TaskSetEvent::Aborted { message } => effects.push(Effect::TaskSetFailed {
                    stage_id,
                    stage_attempt,
                    message,
                }),
                TaskSetEvent::Finished => self.task_set_finished(stage_id, stage_attempt),
            }
        }
        if let Some(manager) = self.manager_for(stage_id, stage_attempt) {
            global_metrics().set_tasks_running(stage_id.0, manager.lock().running_tasks() as u64);
        } else {
            global_metrics().set_tasks_running(stage_id.0, 0);
        }
        effects
    }

    /// Removes a lost executor from every index and informs every manager so
    /// its tasks re-queue.
    fn purge_executor(&mut self, executor_id: &str, reason: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.registry.remove_executor(executor_id).is_none() {
            return effects;
        }
        warn!(
            executor_id = %executor_id,
            reason = %reason,
            operator = "SchedulerExecutorLost",
            "removing lost executor"
        );
        global_metrics().set_active_executors(self.registry.active_executor_count() as u64);
        for (stage_id, stage_attempt, manager) in self.all_managers() {
            let events = manager.lock().executor_lost(executor_id, &self.registry);
            effects.extend(self.process_events(stage_id, stage_attempt, events));
        }
        effects.push(Effect::ExecutorLost {
            executor_id: executor_id.to_string(),
            reason: reason.to_string(),
        });
        effects
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    backend: Arc<dyn SchedulerBackend>,
    planner: Arc<dyn StagePlanner>,
    deserializer: Arc<dyn ResultDeserializer>,
    engine: PlacementEngine,
    builder: SchedulableBuilder,
    next_task_id: Arc<AtomicU64>,
    has_launched_task: AtomicBool,
    watchdog_armed: AtomicBool,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerInner {
    /// Executes boundary effects. Must be called without the monitor held.
    async fn deliver(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Revive => {
                    if let Err(e) = self.backend.revive_offers().await {
                        warn!(
                            error = %e,
                            operator = "SchedulerEffects",
                            "revive offers failed"
                        );
                    }
                }
                Effect::Kill {
                    task_id,
                    executor_id,
                    interrupt,
                } => {
                    if let Err(e) = self.backend.kill_task(task_id, &executor_id, interrupt).await
                    {
                        warn!(
                            task_id = %task_id,
                            executor_id = %executor_id,
                            error = %e,
                            operator = "SchedulerEffects",
                            "kill task failed"
                        );
                    }
                }
                Effect::TaskEnded(notice) => self.planner.task_ended(&notice),
                Effect::TaskSetFailed {
                    stage_id,
                    stage_attempt,
                    message,
                } => self
                    .planner
                    .task_set_failed(stage_id, stage_attempt, &message),
                Effect::ExecutorAdded { executor_id, host } => {
                    self.planner.executor_added(&executor_id, &host)
                }
                Effect::ExecutorLost {
                    executor_id,
                    reason,
                } => self.planner.executor_lost(&executor_id, &reason),
                Effect::Decode(job) => self.spawn_decode(job),
            }
        }
    }

    /// Decodes one terminal payload off the monitor, then re-acquires it to
    /// apply the outcome.
    fn spawn_decode(self: &Arc<Self>, job: DecodeJob) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let decoded = match job.state {
                TaskState::Finished => match inner.deserializer.decode_success(&job.payload) {
                    Ok(result) => Decoded::Success(result),
                    Err(e) => {
                        warn!(
                            task_id = %job.task_id,
                            error = %e,
                            operator = "SchedulerResultDecode",
                            "result payload undecodable; treating task as failed"
                        );
                        Decoded::Failure(
                            TaskState::Failed,
                            TaskFailReason::Exception {
                                message: format!("result decode: {e}"),
                            },
                        )
                    }
                },
                state => {
                    let reason = inner
                        .deserializer
                        .decode_failure(&job.payload)
                        .unwrap_or(match state {
                            TaskState::Killed => TaskFailReason::Killed,
                            TaskState::Lost => TaskFailReason::Lost,
                            _ => TaskFailReason::Exception {
                                message: "task failed without details".to_string(),
                            },
                        });
                    Decoded::Failure(state, reason)
                }
            };

            let effects = {
                let mut state = inner.state.lock();
                let Some(manager) = state.manager_for(job.stage_id, job.stage_attempt) else {
                    debug!(
                        task_id = %job.task_id,
                        stage_id = %job.stage_id,
                        operator = "SchedulerResultDecode",
                        "owning task set already removed; dropping decoded outcome"
                    );
                    return;
                };
                let events = match decoded {
                    Decoded::Success(result) => {
                        manager.lock().handle_successful_task(job.task_id, result)
                    }
                    Decoded::Failure(terminal_state, reason) => manager.lock().handle_failed_task(
                        job.task_id,
                        terminal_state,
                        reason,
                        &state.registry,
                    ),
                };
                state.process_events(job.stage_id, job.stage_attempt, events)
            };
            inner.deliver(effects).await;
        });
    }
}

/// The task scheduler core: admits task sets, serves offer rounds, and
/// tracks every dispatched task to a terminal state.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    /// Builds a scheduler wired to its collaborators.
    ///
    /// The oracle may override the configured scheduling mode.
    pub fn new(
        config: SchedulerConfig,
        backend: Arc<dyn SchedulerBackend>,
        planner: Arc<dyn StagePlanner>,
        oracle: Arc<dyn PredictionOracle>,
        deserializer: Arc<dyn ResultDeserializer>,
    ) -> Result<Self> {
        Self::build(config, backend, planner, oracle, deserializer, None)
    }

    /// Like [`Self::new`], with a host-to-rack resolution hook for
    /// rack-aware deployments.
    pub fn with_rack_resolver(
        config: SchedulerConfig,
        backend: Arc<dyn SchedulerBackend>,
        planner: Arc<dyn StagePlanner>,
        oracle: Arc<dyn PredictionOracle>,
        deserializer: Arc<dyn ResultDeserializer>,
        rack_resolver: RackResolver,
    ) -> Result<Self> {
        Self::build(
            config,
            backend,
            planner,
            oracle,
            deserializer,
            Some(rack_resolver),
        )
    }

    fn build(
        config: SchedulerConfig,
        backend: Arc<dyn SchedulerBackend>,
        planner: Arc<dyn StagePlanner>,
        oracle: Arc<dyn PredictionOracle>,
        deserializer: Arc<dyn ResultDeserializer>,
        rack_resolver: Option<RackResolver>,
    ) -> Result<Self> {
        config.validate()?;
        let mode = oracle.scheduling_mode(config.scheduling_mode);
        let builder = SchedulableBuilder::from_mode(mode);
        info!(
            scheduling_mode = ?mode,
            cpus_per_task = config.cpus_per_task,
            max_task_failures = config.max_task_failures,
            speculation = config.speculation_enabled,
            operator = "SchedulerInit",
            "scheduler constructed"
        );
        let registry = match rack_resolver {
            Some(resolver) => TaskRegistry::with_rack_resolver(resolver),
            None => TaskRegistry::new(),
        };
        let engine = PlacementEngine::new(
            Arc::clone(&oracle),
            config.cpus_per_task,
            config.ppa_sorted,
        );
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState {
                    registry,
                    task_sets_by_stage: HashMap::new(),
                    root_pool: builder.build_root_pool(),
                    executors_added: false,
                }),
                config,
                backend,
                planner,
                deserializer,
                engine,
                builder,
                next_task_id: Arc::new(AtomicU64::new(0)),
                has_launched_task: AtomicBool::new(false),
                watchdog_armed: AtomicBool::new(false),
                timers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Starts the backend and, outside local mode, the speculation ticker.
    pub async fn start(&self) -> Result<()> {
        self.inner.backend.start().await?;
        if self.inner.config.speculation_enabled && !self.inner.backend.is_local() {
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(
                    inner.config.speculation_interval_ms,
                ));
                loop {
                    ticker.tick().await;
                    let revive = {
                        let state = inner.state.lock();
                        state.root_pool.check_speculatable_tasks(
                            inner.config.speculation_quantile,
                            inner.config.speculation_multiplier,
                        )
                    };
                    if revive {
                        if let Err(e) = inner.backend.revive_offers().await {
                            warn!(
                                error = %e,
                                operator = "SchedulerSpeculation",
                                "revive offers failed"
                            );
                        }
                    }
                }
            });
            self.inner.timers.lock().push(handle);
        }
        Ok(())
    }

    /// Blocks until the backend reports ready, polling every 100 ms.
    pub async fn wait_backend_ready(&self) {
        while !self.inner.backend.is_ready() {
            tokio::time::sleep(Duration::from_millis(BACKEND_READY_POLL_MS)).await;
        }
    }

    /// Admits one task set.
    ///
    /// Fails with [`SchedulerError::ConflictingTaskSet`] when a non-zombie
    /// manager already exists for the stage; scheduler state is unchanged in
    /// that case.
    pub async fn submit_tasks(&self, task_set: TaskSet) -> Result<()> {
        let stage_id = task_set.stage_id;
        let stage_attempt = task_set.stage_attempt;
        {
            let mut state = self.inner.state.lock();
            if let Some(attempts) = state.task_sets_by_stage.get(&stage_id) {
                let live: Vec<StageAttempt> = attempts
                    .iter()
                    .filter(|(attempt, manager)| {
                        **attempt != stage_attempt && !manager.lock().is_zombie()
                    })
                    .map(|(attempt, _)| *attempt)
                    .collect();
                if !live.is_empty() {
                    return Err(SchedulerError::ConflictingTaskSet {
                        stage_id,
                        detail: format!("non-zombie attempts {live:?} still active"),
                    });
                }
                if attempts.contains_key(&stage_attempt) {
                    return Err(SchedulerError::ConflictingTaskSet {
                        stage_id,
                        detail: format!("attempt {stage_attempt} already submitted"),
                    });
                }
            }
            info!(
                stage_id = %stage_id,
                stage_attempt,
                tasks = task_set.tasks.len(),
                operator = "SchedulerSubmitTasks",
                "admitting task set"
            );
            let manager = Arc::new(Mutex::new(TaskSetManager::new(
                task_set,
                self.inner.config.max_task_failures,
                Arc::clone(&self.inner.next_task_id),
                &state.registry,
            )));
            state
                .task_sets_by_stage
                .entry(stage_id)
                .or_default()
                .insert(stage_attempt, Arc::clone(&manager));
            self.inner.builder.add_task_set(&mut state.root_pool, manager);
        }

        if !self.inner.watchdog_armed.swap(true, Ordering::SeqCst)
            && !self.inner.backend.is_local()
        {
            self.spawn_starvation_watchdog();
        }
        // Revive outside the monitor: the backend may hold its own lock when
        // calling back into the scheduler.
        if let Err(e) = self.inner.backend.revive_offers().await {
            warn!(
                error = %e,
                operator = "SchedulerSubmitTasks",
                "revive offers failed"
            );
        }
        Ok(())
    }

    /// Kills every running task under the stage and aborts its managers.
    /// Unknown stages are a no-op.
    pub async fn cancel_tasks(&self, stage_id: StageId, interrupt: bool) {
        let mut effects = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if let Some(attempts) = state.task_sets_by_stage.get(&stage_id).cloned() {
                for (stage_attempt, manager) in attempts {
                    for task_id in manager.lock().running_task_ids() {
                        if let Some(executor_id) = state.registry.executor_for_task(task_id) {
                            effects.push(Effect::Kill {
                                task_id,
                                executor_id: executor_id.to_string(),
                                interrupt,
                            });
                        }
                    }
                    let events = manager
                        .lock()
                        .abort(&format!("stage {stage_id} cancelled"));
                    effects.extend(state.process_events(stage_id, stage_attempt, events));
                }
            } else {
                debug!(
                    stage_id = %stage_id,
                    operator = "SchedulerCancelTasks",
                    "no task sets for stage; nothing to cancel"
                );
            }
        }
        self.inner.deliver(effects).await;
    }

    /// Serves one offer round: registers executors, shuffles the offers,
    /// and runs the placement engine over the sorted task-set queue.
    pub async fn resource_offers(&self, offers: &[WorkerOffer]) -> Vec<Vec<TaskDescription>> {
        let (tasks, effects) = {
            let mut state = self.inner.state.lock();
            let mut effects = Vec::new();
            for offer in offers {
                if state.registry.add_executor(&offer.executor_id, &offer.host) {
                    state.executors_added = true;
                    effects.push(Effect::ExecutorAdded {
                        executor_id: offer.executor_id.clone(),
                        host: offer.host.clone(),
                    });
                }
            }
            global_metrics().set_active_executors(state.registry.active_executor_count() as u64);

            // Ties across equally good workers break fairly.
            let mut shuffled: Vec<WorkerOffer> = offers.to_vec();
            shuffled.shuffle(&mut rand::thread_rng());

            let queue = state.root_pool.sorted_task_set_queue();
            if state.executors_added {
                for set in &queue {
                    set.lock().executor_added(&state.registry);
                }
                state.executors_added = false;
            }

            let outcome = self
                .inner
                .engine
                .run_round(&shuffled, &queue, &mut state.registry);
            if outcome.launched {
                self.inner.has_launched_task.store(true, Ordering::SeqCst);
            }
            debug!(
                offers = offers.len(),
                launched = outcome.tasks.iter().map(Vec::len).sum::<usize>(),
                operator = "SchedulerResourceOffers",
                "offer round complete"
            );
            (outcome.tasks, effects)
        };
        self.inner.deliver(effects).await;
        tasks
    }

    /// Applies one task state transition reported by the backend.
    pub async fn status_update(
        &self,
        task_id: TaskId,
        state: TaskState,
        payload: Vec<u8>,
    ) -> Result<()> {
        let effects = {
            let mut st = self.inner.state.lock();
            let mut effects = Vec::new();
            let mut failed_executor = None;
            if state == TaskState::Lost {
                if let Some(executor_id) = st
                    .registry
                    .executor_for_task(task_id)
                    .map(str::to_string)
                {
                    if st.registry.is_executor_alive(&executor_id) {
                        effects.extend(st.purge_executor(&executor_id, "task reported lost"));
                        failed_executor = Some(executor_id);
                    }
                }
            }
            match st.registry.set_for_task(task_id) {
                None => {
                    debug!(
                        task_id = %task_id,
                        state = ?state,
                        operator = "SchedulerStatusUpdate",
                        "ignoring update for unknown task (duplicate or post-cleanup)"
                    );
                }
                Some((stage_id, stage_attempt)) => {
                    if state.is_terminal() {
                        st.registry.clear_task(task_id);
                    }
                    match state {
                        TaskState::Finished => effects.push(Effect::Decode(DecodeJob {
                            task_id,
                            stage_id,
                            stage_attempt,
                            state,
                            payload,
                        })),
                        TaskState::Failed | TaskState::Killed | TaskState::Lost => {
                            let zombie = st
                                .manager_for(stage_id, stage_attempt)
                                .is_some_and(|m| m.lock().is_zombie());
                            effects.push(Effect::Decode(DecodeJob {
                                task_id,
                                stage_id,
                                stage_attempt,
                                state,
                                payload,
                            }));
                            if !zombie && state != TaskState::Killed {
                                effects.push(Effect::Revive);
                            }
                        }
                        TaskState::Launching | TaskState::Running => {}
                    }
                }
            }
            if failed_executor.is_some() {
                effects.push(Effect::Revive);
            }
            effects
        };
        self.inner.deliver(effects).await;
        Ok(())
    }

    /// Removes a lost executor, re-queues its tasks, and notifies the
    /// planner. Reported by the backend.
    pub async fn executor_lost(&self, executor_id: &str, reason: &str) {
        let effects = {
            let mut state = self.inner.state.lock();
            let mut effects = state.purge_executor(executor_id, reason);
            if !effects.is_empty() {
                effects.push(Effect::Revive);
            }
            effects
        };
        self.inner.deliver(effects).await;
    }

    /// Resolves heartbeat task metrics under the monitor and forwards them
    /// to the planner outside it. Returns the planner's verdict; `false`
    /// means the block manager must re-register.
    pub fn executor_heartbeat_received(
        &self,
        executor_id: &str,
        updates: &[(TaskId, serde_json::Value)],
        block_manager: &BlockManagerId,
    ) -> bool {
        let resolved: Vec<TaskMetricUpdate> = {
            let state = self.inner.state.lock();
            updates
                .iter()
                .filter_map(|(task_id, metrics)| {
                    state
                        .registry
                        .set_for_task(*task_id)
                        .map(|(stage_id, stage_attempt)| TaskMetricUpdate {
                            task_id: *task_id,
                            stage_id,
                            stage_attempt,
                            metrics: metrics.clone(),
                        })
                })
                .collect()
        };
        self.inner
            .planner
            .executor_heartbeat(executor_id, &resolved, block_manager)
    }

    /// Funnels a backend-reported error: aborts every active task set, or
    /// surfaces the error when none is active.
    pub async fn report_backend_error(&self, message: &str) -> Result<()> {
        let effects = {
            let mut state = self.inner.state.lock();
            if state.task_sets_by_stage.is_empty() {
                error!(
                    message = %message,
                    operator = "SchedulerBackendError",
                    "backend error with no active task sets"
                );
                return Err(SchedulerError::Execution(format!(
                    "backend error: {message}"
                )));
            }
            let mut effects = Vec::new();
            for (stage_id, stage_attempt, manager) in state.all_managers() {
                let events = manager.lock().abort(&format!("backend error: {message}"));
                effects.extend(state.process_events(stage_id, stage_attempt, events));
            }
            effects
        };
        self.inner.deliver(effects).await;
        Ok(())
    }

    /// Stops timers and the backend. In-flight status updates complete
    /// first because they hold the monitor.
    pub async fn stop(&self) -> Result<()> {
        for handle in self.inner.timers.lock().drain(..) {
            handle.abort();
        }
        self.inner.backend.stop().await
    }

    /// Whether any offer round has produced a dispatch yet.
    pub fn has_launched_task(&self) -> bool {
        self.inner.has_launched_task.load(Ordering::SeqCst)
    }

    /// Backend-suggested default task-set width.
    pub fn default_parallelism(&self) -> usize {
        self.inner.backend.default_parallelism()
    }

    /// Stable application identity from the backend.
    pub fn application_id(&self) -> String {
        self.inner.backend.application_id()
    }

    /// Attempt identity for restarted applications.
    pub fn application_attempt_id(&self) -> Option<String> {
        self.inner.backend.application_attempt_id()
    }

    fn spawn_starvation_watchdog(&self) {
        let inner = Arc::clone(&self.inner);
        let timeout = Duration::from_millis(inner.config.starvation_timeout_ms);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(timeout).await;
                if inner.has_launched_task.load(Ordering::SeqCst) {
                    break;
                }
                warn!(
                    operator = "SchedulerStarvationWatchdog",
                    "initial task set has not accepted any resources; check that workers \
                     are registered and offer sufficient capacity"
                );
            }
        });
        self.inner.timers.lock().push(handle);
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
