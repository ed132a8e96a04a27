//! Per-task-set scheduling state.
//!
//! A [`TaskSetManager`] owns the mutable state of one admitted [`TaskSet`]:
//! pending-task queues bucketed by locality, attempt records, per-index
//! failure budgets, and the zombie flag. All methods are called under the
//! scheduler monitor; side effects that must cross the monitor boundary
//! (planner upcalls, backend kills, pool removal) are returned as
//! [`TaskSetEvent`] values instead of being performed here.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fg_common::metrics::global_metrics;
use fg_common::{Result, StageAttempt, StageId, TaskId};
use tracing::{debug, info};

use crate::registry::ExecutorTopology;
use crate::taskset::{
    TaskDescription, TaskFailReason, TaskLocality, TaskPayload, TaskResult, TaskSet, TaskState,
};

/// Floor applied to the speculation threshold, in milliseconds.
const MIN_SPECULATION_THRESHOLD_MS: u64 = 100;

/// One launched attempt of a task index.
#[derive(Debug, Clone)]
pub struct TaskAttempt {
    /// Globally unique id of this attempt.
    pub task_id: TaskId,
    /// Task position within the set.
    pub index: u32,
    /// Attempt number for the index, starting at 0.
    pub attempt: u32,
    /// Executor the attempt was dispatched to.
    pub executor_id: String,
    /// Host the attempt was dispatched to.
    pub host: String,
    /// Locality level the dispatch satisfied.
    pub locality: TaskLocality,
    /// Whether this is a speculative duplicate.
    pub speculative: bool,
    /// Launch instant, used for speculation thresholds.
    pub launched_at: Instant,
    /// Whether a terminal state was recorded for the attempt.
    pub finished: bool,
}

/// A pending task pulled out of the queues by a drain-style placement policy,
/// before a worker has been chosen.
#[derive(Debug, Clone)]
pub struct DrainedTask {
    /// Id pre-allocated for the eventual dispatch.
    pub task_id: TaskId,
    /// Task position within the set.
    pub index: u32,
    /// Locality level the drain ran at.
    pub locality: TaskLocality,
}

/// Monitor-boundary side effects produced by manager transitions.
#[derive(Debug, Clone)]
pub enum TaskSetEvent {
    /// A task attempt reached a terminal state; forward to the stage planner.
    TaskEnded {
        /// Attempt id.
        task_id: TaskId,
        /// Task position within the set.
        index: u32,
        /// Attempt number.
        attempt: u32,
        /// Terminal state.
        state: TaskState,
        /// Decoded result for finished attempts.
        result: Option<TaskResult>,
        /// Failure reason for failed/killed/lost attempts.
        reason: Option<TaskFailReason>,
    },
    /// A redundant live attempt should be killed by the backend.
    KillAttempt {
        /// Attempt to kill.
        task_id: TaskId,
        /// Executor it runs on.
        executor_id: String,
    },
    /// The set aborted; forward to the stage planner as a set failure.
    Aborted {
        /// Abort message.
        message: String,
    },
    /// All attempts are terminal; detach the manager from its pool.
    Finished,
}

/// Mutable scheduling state of one admitted task set.
pub struct TaskSetManager {
    task_set: TaskSet,
    name: String,
    max_task_failures: u32,
    next_task_id: Arc<AtomicU64>,

    // Pending task indexes, bucketed by locality preference. Entries are
    // lazily invalidated: an index may sit in several buckets and in a
    // bucket more than once; validity is checked at pop time.
    pending_for_executor: HashMap<String, Vec<u32>>,
    pending_for_host: HashMap<String, Vec<u32>>,
    pending_for_rack: HashMap<String, Vec<u32>>,
    pending_no_pref: Vec<u32>,
    pending_any: Vec<u32>,
    // Indexes drained by a placement policy but not yet committed or
    // returned. Invisible to every dequeue until resolved.
    reserved: HashSet<u32>,

    locality_levels: Vec<TaskLocality>,

    task_infos: HashMap<TaskId, TaskAttempt>,
    attempts_for_index: Vec<Vec<TaskId>>,
    copies_running: Vec<u32>,
    successful: Vec<bool>,
    num_failures: Vec<u32>,
    speculatable: HashSet<u32>,
    successful_durations: Vec<Duration>,

    tasks_successful: u32,
    running: u32,
    zombie: bool,
    finish_notified: bool,
}

impl TaskSetManager {
    /// Wraps one admitted task set.
    pub fn new(
        task_set: TaskSet,
        max_task_failures: u32,
        next_task_id: Arc<AtomicU64>,
        topo: &dyn ExecutorTopology,
    ) -> Self {
        let total = task_set.tasks.len();
        let name = task_set.name();
        let mut manager = Self {
            task_set,
            name,
            max_task_failures,
            next_task_id,
            pending_for_executor: HashMap::new(),
            pending_for_host: HashMap::new(),
            pending_for_rack: HashMap::new(),
            pending_no_pref: Vec::new(),
            pending_any: Vec::new(),
            reserved: HashSet::new(),
            locality_levels: Vec::new(),
            task_infos: HashMap::new(),
            attempts_for_index: vec![Vec::new(); total],
            copies_running: vec![0; total],
            successful: vec![false; total],
            num_failures: vec![0; total],
            speculatable: HashSet::new(),
            successful_durations: Vec::new(),
            tasks_successful: 0,
            running: 0,
            zombie: false,
            finish_notified: false,
        };
        for index in 0..total as u32 {
            manager.add_pending(index, topo);
        }
        manager.locality_levels = manager.compute_locality_levels(topo);
        manager
    }

    /// Owning stage.
    pub fn stage_id(&self) -> StageId {
        self.task_set.stage_id
    }

    /// Owning stage attempt.
    pub fn stage_attempt(&self) -> StageAttempt {
        self.task_set.stage_attempt
    }

    /// Submission priority of the wrapped set.
    pub fn priority(&self) -> i32 {
        self.task_set.priority
    }

    /// Named fair-scheduling pool requested at submission.
    pub fn pool_name(&self) -> Option<&str> {
        self.task_set.pool_name.as_deref()
    }

    /// Log identity, e.g. `TaskSet_4.0`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tasks in the wrapped set.
    pub fn num_tasks(&self) -> usize {
        self.task_set.tasks.len()
    }

    /// Number of attempts currently running.
    pub fn running_tasks(&self) -> u32 {
        self.running
    }

    /// Whether the manager may still be offered new dispatches.
    pub fn is_zombie(&self) -> bool {
        self.zombie
    }

    /// Whether every task has a successful attempt.
    pub fn all_successful(&self) -> bool {
        self.tasks_successful as usize == self.num_tasks()
    }

    /// Ids of attempts without a recorded terminal state.
    pub fn running_task_ids(&self) -> Vec<TaskId> {
        self.task_infos
            .values()
            .filter(|info| !info.finished)
            .map(|info| info.task_id)
            .collect()
    }

    /// Attempt record lookup.
    pub fn attempt(&self, task_id: TaskId) -> Option<&TaskAttempt> {
        self.task_infos.get(&task_id)
    }

    /// Locality levels this set currently accepts, best first.
    pub fn locality_levels(&self) -> &[TaskLocality] {
        &self.locality_levels
    }

    /// Reacts to a newly available executor by refreshing locality levels.
    pub fn executor_added(&mut self, topo: &dyn ExecutorTopology) {
        self.locality_levels = self.compute_locality_levels(topo);
    }

    /// Offers one worker to this set at up to `max_locality`.
    ///
    /// Returns the dispatch decision, or `None` when no pending task matches.
    /// A payload encode failure leaves the manager unchanged and must cause
    /// the caller to skip this set for the rest of the round.
    pub fn resource_offer(
        &mut self,
        executor_id: &str,
        host: &str,
        rack: Option<&str>,
        max_locality: TaskLocality,
    ) -> Result<Option<TaskDescription>> {
        if self.zombie {
            return Ok(None);
        }
        if let Some((index, locality)) = self.dequeue_for_offer(executor_id, host, rack, max_locality)
        {
            let task_id = self.new_task_id();
            return self
                .launch(index, locality, false, executor_id, host, task_id)
                .map(Some);
        }
        if let Some(index) = self.dequeue_speculative(host) {
            let task_id = self.new_task_id();
            return self
                .launch(index, TaskLocality::Any, true, executor_id, host, task_id)
                .map(Some);
        }
        Ok(None)
    }

    /// Pops one pending task at exactly `locality` for a drain-style policy.
    ///
    /// The returned task carries a pre-allocated id so demand predictions can
    /// be looked up before a worker is chosen. The caller either commits the
    /// task with [`Self::commit_drained`] or returns it with
    /// [`Self::requeue_drained`].
    pub fn poll_task(
        &mut self,
        locality: TaskLocality,
        topo: &dyn ExecutorTopology,
    ) -> Option<DrainedTask> {
        if self.zombie {
            return None;
        }
        let index = match locality {
            TaskLocality::ProcessLocal => {
                let executor = self
                    .pending_for_executor
                    .iter()
                    .find(|(exec, queue)| !queue.is_empty() && topo.is_executor_alive(exec))
                    .map(|(exec, _)| String::clone(exec))?;
                let queue = self.pending_for_executor.get_mut(&executor)?;
                Self::pop_valid(queue, &self.successful, &self.copies_running, &self.reserved)
            }
            TaskLocality::NodeLocal => {
                let host = self
                    .pending_for_host
                    .iter()
                    .find(|(host, queue)| !queue.is_empty() && topo.is_host_alive(host))
                    .map(|(host, _)| String::clone(host))?;
                let queue = self.pending_for_host.get_mut(&host)?;
                Self::pop_valid(queue, &self.successful, &self.copies_running, &self.reserved)
            }
            TaskLocality::NoPref => Self::pop_valid(
                &mut self.pending_no_pref,
                &self.successful,
                &self.copies_running,
                &self.reserved,
            ),
            TaskLocality::RackLocal => {
                let rack = self
                    .pending_for_rack
                    .iter()
                    .find(|(rack, queue)| !queue.is_empty() && topo.is_rack_alive(rack))
                    .map(|(rack, _)| String::clone(rack))?;
                let queue = self.pending_for_rack.get_mut(&rack)?;
                Self::pop_valid(queue, &self.successful, &self.copies_running, &self.reserved)
            }
            TaskLocality::Any => Self::pop_valid(
                &mut self.pending_any,
                &self.successful,
                &self.copies_running,
                &self.reserved,
            ),
        }?;
        self.reserved.insert(index);
        Some(DrainedTask {
            task_id: self.new_task_id(),
            index,
            locality,
        })
    }

    /// Finalizes a drained task onto the chosen worker.
    pub fn commit_drained(
        &mut self,
        drained: &DrainedTask,
        executor_id: &str,
        host: &str,
    ) -> Result<TaskDescription> {
        let desc = self.launch(
            drained.index,
            drained.locality,
            false,
            executor_id,
            host,
            drained.task_id,
        )?;
        self.reserved.remove(&drained.index);
        Ok(desc)
    }

    /// Returns a drained-but-unplaced task to the pending queues.
    ///
    /// The pre-allocated id is discarded; the next drain allocates a fresh
    /// one, keeping dispatched ids monotonic.
    pub fn requeue_drained(&mut self, drained: &DrainedTask, topo: &dyn ExecutorTopology) {
        self.reserved.remove(&drained.index);
        self.add_pending(drained.index, topo);
    }

    /// Records a decoded successful attempt.
    pub fn handle_successful_task(
        &mut self,
        task_id: TaskId,
        result: TaskResult,
    ) -> Vec<TaskSetEvent> {
        let mut events = Vec::new();
        let Some(info) = self.task_infos.get_mut(&task_id) else {
            debug!(
                task_set = %self.name,
                task_id = %task_id,
                operator = "TaskSetHandleSuccess",
                "ignoring success for unknown attempt"
            );
            return events;
        };
        if info.finished {
            return events;
        }
        info.finished = true;
        let index = info.index;
        let attempt = info.attempt;
        let duration = info.launched_at.elapsed();
        self.copies_running[index as usize] = self.copies_running[index as usize].saturating_sub(1);
        self.running = self.running.saturating_sub(1);

        if self.successful[index as usize] {
            // A speculative duplicate already won this index.
            debug!(
                task_set = %self.name,
                task_id = %task_id,
                index,
                operator = "TaskSetHandleSuccess",
                "ignoring duplicate success"
            );
        } else {
            self.successful[index as usize] = true;
            self.tasks_successful += 1;
            self.successful_durations.push(duration);
            self.speculatable.remove(&index);
            for other in &self.attempts_for_index[index as usize] {
                if *other == task_id {
                    continue;
                }
                if let Some(other_info) = self.task_infos.get(other) {
                    if !other_info.finished {
                        events.push(TaskSetEvent::KillAttempt {
                            task_id: *other,
                            executor_id: other_info.executor_id.clone(),
                        });
                    }
                }
            }
            events.push(TaskSetEvent::TaskEnded {
                task_id,
                index,
                attempt,
                state: TaskState::Finished,
                result: Some(result),
                reason: None,
            });
            if self.all_successful() {
                info!(
                    task_set = %self.name,
                    tasks = self.num_tasks(),
                    operator = "TaskSetHandleSuccess",
                    "all tasks finished"
                );
                self.zombie = true;
            }
        }
        self.maybe_finish(&mut events);
        events
    }

    /// Records a failed/killed/lost attempt and re-queues the index when the
    /// set is still live.
    pub fn handle_failed_task(
        &mut self,
        task_id: TaskId,
        state: TaskState,
        reason: TaskFailReason,
        topo: &dyn ExecutorTopology,
    ) -> Vec<TaskSetEvent> {
        let mut events = Vec::new();
        let Some(info) = self.task_infos.get_mut(&task_id) else {
            debug!(
                task_set = %self.name,
                task_id = %task_id,
                operator = "TaskSetHandleFailure",
                "ignoring failure for unknown attempt"
            );
            return events;
        };
        if info.finished {
            return events;
        }
        info.finished = true;
        let index = info.index;
        let attempt = info.attempt;
        self.copies_running[index as usize] = self.copies_running[index as usize].saturating_sub(1);
        self.running = self.running.saturating_sub(1);
        self.speculatable.remove(&index);

        events.push(TaskSetEvent::TaskEnded {
            task_id,
            index,
            attempt,
            state,
            result: None,
            reason: Some(reason.clone()),
        });

        if !self.zombie {
            if !self.successful[index as usize] {
                self.add_pending_from_spec(index, topo);
            }
            if reason.counts_toward_failures() {
                self.num_failures[index as usize] += 1;
                if self.num_failures[index as usize] >= self.max_task_failures {
                    let message = format!(
                        "task {index} in {} failed {} times; aborting: {reason:?}",
                        self.name, self.max_task_failures
                    );
                    events.extend(self.abort(&message));
                }
            }
        }
        self.maybe_finish(&mut events);
        events
    }

    /// Fails every live attempt on a lost executor.
    pub fn executor_lost(
        &mut self,
        executor_id: &str,
        topo: &dyn ExecutorTopology,
    ) -> Vec<TaskSetEvent> {
        let affected: Vec<TaskId> = self
            .task_infos
            .values()
            .filter(|info| !info.finished && info.executor_id == executor_id)
            .map(|info| info.task_id)
            .collect();
        let mut events = Vec::new();
        for task_id in affected {
            events.extend(self.handle_failed_task(
                task_id,
                TaskState::Lost,
                TaskFailReason::ExecutorLost {
                    executor_id: executor_id.to_string(),
                },
                topo,
            ));
        }
        self.locality_levels = self.compute_locality_levels(topo);
        events
    }

    /// Marks the set zombie and reports the abort.
    pub fn abort(&mut self, message: &str) -> Vec<TaskSetEvent> {
        let mut events = Vec::new();
        if !self.zombie {
            self.zombie = true;
            events.push(TaskSetEvent::Aborted {
                message: message.to_string(),
            });
        }
        self.maybe_finish(&mut events);
        events
    }

    /// Marks slow single-copy tasks speculatable once enough of the set has
    /// succeeded. Returns whether any new candidate was found.
    pub fn check_speculatable_tasks(&mut self, quantile: f64, multiplier: f64) -> bool {
        if self.zombie || self.num_tasks() <= 1 {
            return false;
        }
        let min_finished = ((self.num_tasks() as f64) * quantile).floor().max(1.0) as u32;
        if self.tasks_successful < min_finished {
            return false;
        }
        let mut durations_ms: Vec<u128> = self
            .successful_durations
            .iter()
            .map(|d| d.as_millis())
            .collect();
        durations_ms.sort_unstable();
        let median_ms = durations_ms[durations_ms.len() / 2];
        let threshold_ms = ((median_ms as f64) * multiplier)
            .max(MIN_SPECULATION_THRESHOLD_MS as f64) as u128;

        let mut found = false;
        let candidates: Vec<(TaskId, u32, u128)> = self
            .task_infos
            .values()
            .filter(|info| {
                !info.finished
                    && !self.successful[info.index as usize]
                    && self.copies_running[info.index as usize] == 1
                    && !self.speculatable.contains(&info.index)
            })
            .map(|info| (info.task_id, info.index, info.launched_at.elapsed().as_millis()))
            .collect();
        for (task_id, index, elapsed_ms) in candidates {
            if elapsed_ms > threshold_ms {
                info!(
                    task_set = %self.name,
                    task_id = %task_id,
                    index,
                    elapsed_ms = elapsed_ms as u64,
                    threshold_ms = threshold_ms as u64,
                    operator = "TaskSetSpeculation",
                    "marking task speculatable"
                );
                self.speculatable.insert(index);
                found = true;
            }
        }
        found
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn new_task_id(&self) -> TaskId {
        TaskId(self.next_task_id.fetch_add(1, Ordering::SeqCst))
    }

    fn add_pending(&mut self, index: u32, topo: &dyn ExecutorTopology) {
        self.add_pending_from_spec(index, topo);
    }

    fn add_pending_from_spec(&mut self, index: u32, topo: &dyn ExecutorTopology) {
        let spec = &self.task_set.tasks[index as usize];
        if spec.preferred_locations.is_empty() {
            self.pending_no_pref.push(index);
        } else {
            for loc in &spec.preferred_locations {
                if let Some(exec) = &loc.executor_id {
                    self.pending_for_executor
                        .entry(exec.clone())
                        .or_default()
                        .push(index);
                }
                self.pending_for_host
                    .entry(loc.host.clone())
                    .or_default()
                    .push(index);
                if let Some(rack) = topo.rack_for_host(&loc.host) {
                    self.pending_for_rack.entry(rack).or_default().push(index);
                }
            }
        }
        self.pending_any.push(index);
    }

    fn compute_locality_levels(&self, topo: &dyn ExecutorTopology) -> Vec<TaskLocality> {
        let mut levels = Vec::new();
        if self
            .pending_for_executor
            .iter()
            .any(|(exec, queue)| !queue.is_empty() && topo.is_executor_alive(exec))
        {
            levels.push(TaskLocality::ProcessLocal);
        }
        if self
            .pending_for_host
            .iter()
            .any(|(host, queue)| !queue.is_empty() && topo.is_host_alive(host))
        {
            levels.push(TaskLocality::NodeLocal);
        }
        if !self.pending_no_pref.is_empty() {
            levels.push(TaskLocality::NoPref);
        }
        if self
            .pending_for_rack
            .iter()
            .any(|(rack, queue)| !queue.is_empty() && topo.is_rack_alive(rack))
        {
            levels.push(TaskLocality::RackLocal);
        }
        levels.push(TaskLocality::Any);
        levels
    }

    fn pop_valid(
        queue: &mut Vec<u32>,
        successful: &[bool],
        copies_running: &[u32],
        reserved: &HashSet<u32>,
    ) -> Option<u32> {
        while let Some(index) = queue.pop() {
            if !successful[index as usize]
                && copies_running[index as usize] == 0
                && !reserved.contains(&index)
            {
                return Some(index);
            }
        }
        None
    }

    fn dequeue_for_offer(
        &mut self,
        executor_id: &str,
        host: &str,
        rack: Option<&str>,
        max_locality: TaskLocality,
    ) -> Option<(u32, TaskLocality)> {
        let levels: Vec<TaskLocality> = self
            .locality_levels
            .iter()
            .copied()
            .filter(|level| *level <= max_locality)
            .collect();
        for level in levels {
            let popped = match level {
                TaskLocality::ProcessLocal => self
                    .pending_for_executor
                    .get_mut(executor_id)
                    .and_then(|q| Self::pop_valid(q, &self.successful, &self.copies_running, &self.reserved)),
                TaskLocality::NodeLocal => self
                    .pending_for_host
                    .get_mut(host)
                    .and_then(|q| Self::pop_valid(q, &self.successful, &self.copies_running, &self.reserved)),
                TaskLocality::NoPref => Self::pop_valid(
                    &mut self.pending_no_pref,
                    &self.successful,
                    &self.copies_running,
                    &self.reserved,
                ),
                TaskLocality::RackLocal => rack
                    .and_then(|r| self.pending_for_rack.get_mut(r))
                    .and_then(|q| Self::pop_valid(q, &self.successful, &self.copies_running, &self.reserved)),
                TaskLocality::Any => Self::pop_valid(
                    &mut self.pending_any,
                    &self.successful,
                    &self.copies_running,
                    &self.reserved,
                ),
            };
            if let Some(index) = popped {
                return Some((index, level));
            }
        }
        None
    }

    fn dequeue_speculative(&mut self, host: &str) -> Option<u32> {
        let index = *self.speculatable.iter().find(|index| {
            !self.successful[**index as usize]
                && !self.attempts_for_index[**index as usize].iter().any(|tid| {
                    self.task_infos
                        .get(tid)
                        .is_some_and(|info| !info.finished && info.host == host)
                })
        })?;
        self.speculatable.remove(&index);
        Some(index)
    }

    fn launch(
        &mut self,
        index: u32,
        locality: TaskLocality,
        speculative: bool,
        executor_id: &str,
        host: &str,
        task_id: TaskId,
    ) -> Result<TaskDescription> {
        let attempt = self.attempts_for_index[index as usize].len() as u32;
        let payload = TaskPayload {
            stage_id: self.task_set.stage_id,
            stage_attempt: self.task_set.stage_attempt,
            index,
            attempt,
            body: self.task_set.tasks[index as usize].body.clone(),
        }
        .encode()?;

        self.task_infos.insert(
            task_id,
            TaskAttempt {
                task_id,
                index,
                attempt,
                executor_id: executor_id.to_string(),
                host: host.to_string(),
                locality,
                speculative,
                launched_at: Instant::now(),
                finished: false,
            },
        );
        self.attempts_for_index[index as usize].push(task_id);
        self.copies_running[index as usize] += 1;
        self.running += 1;
        if speculative {
            global_metrics().inc_speculative_launches();
        }
        debug!(
            task_set = %self.name,
            task_id = %task_id,
            index,
            attempt,
            executor_id = %executor_id,
            host = %host,
            locality = %locality,
            speculative,
            operator = "TaskSetLaunch",
            "dispatching task"
        );
        Ok(TaskDescription {
            task_id,
            executor_id: executor_id.to_string(),
            name: format!(
                "task {index}.{attempt} in stage {}.{}",
                self.task_set.stage_id, self.task_set.stage_attempt
            ),
            payload,
        })
    }

    fn maybe_finish(&mut self, events: &mut Vec<TaskSetEvent>) {
        if self.zombie && self.running == 0 && !self.finish_notified {
            self.finish_notified = true;
            events.push(TaskSetEvent::Finished);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taskset::{TaskBody, TaskLocation, TaskSpec};

    struct FlatTopology;

    impl ExecutorTopology for FlatTopology {
        fn is_executor_alive(&self, _executor_id: &str) -> bool {
            true
        }
        fn is_host_alive(&self, _host: &str) -> bool {
            true
        }
        fn is_rack_alive(&self, _rack: &str) -> bool {
            false
        }
        fn rack_for_host(&self, _host: &str) -> Option<String> {
            None
        }
    }

    fn body() -> TaskBody {
        TaskBody::Command {
            name: "noop".to_string(),
            args: serde_json::Value::Null,
        }
    }

    fn task_set(stage: u32, n: u32) -> TaskSet {
        TaskSet {
            stage_id: StageId(stage),
            stage_attempt: 0,
            priority: 0,
            pool_name: None,
            tasks: (0..n)
                .map(|index| TaskSpec {
                    index,
                    body: body(),
                    preferred_locations: Vec::new(),
                })
                .collect(),
        }
    }

    fn manager(stage: u32, n: u32) -> TaskSetManager {
        TaskSetManager::new(
            task_set(stage, n),
            4,
            Arc::new(AtomicU64::new(0)),
            &FlatTopology,
        )
    }

    fn offer(m: &mut TaskSetManager, exec: &str, host: &str) -> Option<TaskDescription> {
        m.resource_offer(exec, host, None, TaskLocality::Any).unwrap()
    }

    #[test]
    fn dispatches_each_task_once_with_monotonic_ids() {
        let mut m = manager(1, 3);
        let mut ids = Vec::new();
        while let Some(desc) = offer(&mut m, "e1", "h1") {
            ids.push(desc.task_id);
        }
        assert_eq!(ids.len(), 3);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(m.running_tasks(), 3);
    }

    #[test]
    fn success_of_all_tasks_makes_zombie_and_finishes() {
        let mut m = manager(1, 2);
        let d0 = offer(&mut m, "e1", "h1").unwrap();
        let d1 = offer(&mut m, "e1", "h1").unwrap();
        let result = TaskResult {
            value: serde_json::Value::Null,
        };
        let ev0 = m.handle_successful_task(d0.task_id, result.clone());
        assert!(matches!(ev0[0], TaskSetEvent::TaskEnded { state: TaskState::Finished, .. }));
        assert!(!m.is_zombie());

        let ev1 = m.handle_successful_task(d1.task_id, result);
        assert!(m.is_zombie());
        assert!(ev1.iter().any(|e| matches!(e, TaskSetEvent::Finished)));
        assert_eq!(m.running_tasks(), 0);
    }

    #[test]
    fn failure_requeues_and_exhaustion_aborts() {
        let mut m = manager(2, 1);
        let mut last_events = Vec::new();
        for round in 0..4 {
            let desc = offer(&mut m, "e1", "h1").unwrap_or_else(|| panic!("round {round}"));
            last_events = m.handle_failed_task(
                desc.task_id,
                TaskState::Failed,
                TaskFailReason::Exception {
                    message: "boom".to_string(),
                },
                &FlatTopology,
            );
        }
        assert!(m.is_zombie());
        assert!(last_events
            .iter()
            .any(|e| matches!(e, TaskSetEvent::Aborted { .. })));
        assert!(last_events.iter().any(|e| matches!(e, TaskSetEvent::Finished)));
        assert!(offer(&mut m, "e1", "h1").is_none());
    }

    #[test]
    fn kill_and_executor_loss_do_not_exhaust_the_budget() {
        let mut m = manager(3, 1);
        for _ in 0..6 {
            let desc = offer(&mut m, "e1", "h1").unwrap();
            let events = m.handle_failed_task(
                desc.task_id,
                TaskState::Killed,
                TaskFailReason::Killed,
                &FlatTopology,
            );
            assert!(!events.iter().any(|e| matches!(e, TaskSetEvent::Aborted { .. })));
        }
        assert!(!m.is_zombie());
    }

    #[test]
    fn executor_loss_requeues_running_attempts() {
        let mut m = manager(4, 2);
        let d0 = offer(&mut m, "e1", "h1").unwrap();
        let _d1 = offer(&mut m, "e2", "h2").unwrap();
        let events = m.executor_lost("e1", &FlatTopology);
        assert!(events.iter().any(|e| matches!(
            e,
            TaskSetEvent::TaskEnded {
                state: TaskState::Lost,
                ..
            }
        )));
        assert_eq!(m.running_tasks(), 1);
        // The lost index is offerable again.
        let redo = offer(&mut m, "e3", "h3").unwrap();
        assert_eq!(
            m.attempt(redo.task_id).unwrap().index,
            m.attempt(d0.task_id).unwrap().index
        );
    }

    #[test]
    fn locality_ordering_prefers_executor_then_host() {
        let set = TaskSet {
            stage_id: StageId(5),
            stage_attempt: 0,
            priority: 0,
            pool_name: None,
            tasks: vec![
                TaskSpec {
                    index: 0,
                    body: body(),
                    preferred_locations: vec![TaskLocation::executor("h1", "e1")],
                },
                TaskSpec {
                    index: 1,
                    body: body(),
                    preferred_locations: vec![TaskLocation::host("h2")],
                },
            ],
        };
        let mut m = TaskSetManager::new(set, 4, Arc::new(AtomicU64::new(0)), &FlatTopology);
        assert_eq!(
            m.locality_levels(),
            &[
                TaskLocality::ProcessLocal,
                TaskLocality::NodeLocal,
                TaskLocality::Any
            ]
        );

        // At ProcessLocal only the pinned task is eligible, and only on e1.
        let none = m
            .resource_offer("e9", "h9", None, TaskLocality::ProcessLocal)
            .unwrap();
        assert!(none.is_none());
        let desc = m
            .resource_offer("e1", "h1", None, TaskLocality::ProcessLocal)
            .unwrap()
            .unwrap();
        assert_eq!(m.attempt(desc.task_id).unwrap().index, 0);

        // The host-preferring task dispatches at NodeLocal on h2.
        let desc = m
            .resource_offer("e2", "h2", None, TaskLocality::NodeLocal)
            .unwrap()
            .unwrap();
        assert_eq!(m.attempt(desc.task_id).unwrap().index, 1);
    }

    #[test]
    fn drain_and_requeue_reissues_fresh_ids() {
        let mut m = manager(6, 2);
        let d0 = m.poll_task(TaskLocality::Any, &FlatTopology).unwrap();
        let d1 = m.poll_task(TaskLocality::Any, &FlatTopology).unwrap();
        assert!(m.poll_task(TaskLocality::Any, &FlatTopology).is_none());

        m.requeue_drained(&d1, &FlatTopology);
        let desc = m.commit_drained(&d0, "e1", "h1").unwrap();
        assert_eq!(desc.task_id, d0.task_id);

        let redrained = m.poll_task(TaskLocality::Any, &FlatTopology).unwrap();
        assert_eq!(redrained.index, d1.index);
        assert!(redrained.task_id > d1.task_id);
    }

    #[test]
    fn speculation_marks_slow_straggler_and_avoids_original_host() {
        let mut m = manager(7, 4);
        let descs: Vec<TaskDescription> = (0..4)
            .map(|i| offer(&mut m, &format!("e{i}"), &format!("h{i}")).unwrap())
            .collect();
        let result = TaskResult {
            value: serde_json::Value::Null,
        };
        for desc in &descs[..3] {
            m.handle_successful_task(desc.task_id, result.clone());
        }
        // Not yet past the floor threshold.
        assert!(!m.check_speculatable_tasks(0.75, 1.5));
        std::thread::sleep(std::time::Duration::from_millis(120));
        assert!(m.check_speculatable_tasks(0.75, 1.5));
        // Repeat calls do not rediscover the same straggler.
        assert!(!m.check_speculatable_tasks(0.75, 1.5));

        let straggler_host = &m.attempt(descs[3].task_id).unwrap().host.clone();
        // A speculative copy refuses the original host but accepts another.
        assert!(offer(&mut m, "eX", straggler_host).is_none());
        let dup = offer(&mut m, "eY", "other-host").unwrap();
        let dup_info = m.attempt(dup.task_id).unwrap();
        assert!(dup_info.speculative);
        assert_eq!(dup_info.index, m.attempt(descs[3].task_id).unwrap().index);
    }

    #[test]
    fn zombie_manager_rejects_offers_but_accepts_status() {
        let mut m = manager(8, 2);
        let d0 = offer(&mut m, "e1", "h1").unwrap();
        let events = m.abort("stage canceled");
        assert!(events.iter().any(|e| matches!(e, TaskSetEvent::Aborted { .. })));
        // Still one attempt running, so not yet finished.
        assert!(!events.iter().any(|e| matches!(e, TaskSetEvent::Finished)));
        assert!(offer(&mut m, "e1", "h1").is_none());

        let events = m.handle_failed_task(
            d0.task_id,
            TaskState::Killed,
            TaskFailReason::Killed,
            &FlatTopology,
        );
        assert!(events.iter().any(|e| matches!(e, TaskSetEvent::Finished)));
    }
}
