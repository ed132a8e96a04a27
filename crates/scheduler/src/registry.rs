//! In-memory dispatch and executor indexes.
//!
//! Ownership: the scheduler owns the registry exclusively and mutates it only
//! under its monitor. Invariants:
//! - `task_to_set` and `task_to_executor` are populated together at dispatch
//!   and cleared together at terminal states;
//! - `executors_by_host`, `hosts_by_rack`, and `executor_to_host` are derived
//!   from `active_executors` and updated atomically with it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fg_common::{StageAttempt, StageId, TaskId};

/// Optional host-to-rack resolution hook.
///
/// `None` resolution means rack-unaware placement (the default for
/// single-rack deployments).
pub type RackResolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Read-only view of executor liveness used when computing locality levels.
pub trait ExecutorTopology {
    /// Whether the executor is known live.
    fn is_executor_alive(&self, executor_id: &str) -> bool;
    /// Whether any live executor runs on the host.
    fn is_host_alive(&self, host: &str) -> bool;
    /// Whether any live host is known in the rack.
    fn is_rack_alive(&self, rack: &str) -> bool;
    /// Rack of a host, when topology information is available.
    fn rack_for_host(&self, host: &str) -> Option<String>;
}

/// Dispatch-time and executor-membership indexes.
#[derive(Default)]
pub struct TaskRegistry {
    task_to_set: HashMap<TaskId, (StageId, StageAttempt)>,
    task_to_executor: HashMap<TaskId, String>,
    active_executors: HashSet<String>,
    executor_to_host: HashMap<String, String>,
    executors_by_host: HashMap<String, HashSet<String>>,
    hosts_by_rack: HashMap<String, HashSet<String>>,
    rack_resolver: Option<RackResolver>,
}

impl TaskRegistry {
    /// Empty registry without rack topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry with a rack resolution hook.
    pub fn with_rack_resolver(resolver: RackResolver) -> Self {
        Self {
            rack_resolver: Some(resolver),
            ..Self::default()
        }
    }

    /// Records one dispatched task. Both task indexes are written together.
    pub fn register_dispatch(
        &mut self,
        task_id: TaskId,
        stage_id: StageId,
        stage_attempt: StageAttempt,
        executor_id: &str,
    ) {
        self.task_to_set.insert(task_id, (stage_id, stage_attempt));
        self.task_to_executor
            .insert(task_id, executor_id.to_string());
    }

    /// Clears both task indexes for a terminal task. Idempotent.
    pub fn clear_task(&mut self, task_id: TaskId) {
        self.task_to_set.remove(&task_id);
        self.task_to_executor.remove(&task_id);
    }

    /// Owning stage attempt of a dispatched task.
    pub fn set_for_task(&self, task_id: TaskId) -> Option<(StageId, StageAttempt)> {
        self.task_to_set.get(&task_id).copied()
    }

    /// Executor a dispatched task runs on.
    pub fn executor_for_task(&self, task_id: TaskId) -> Option<&str> {
        self.task_to_executor.get(&task_id).map(String::as_str)
    }

    /// Registers a live executor. Returns `true` when the executor was not
    /// previously known.
    pub fn add_executor(&mut self, executor_id: &str, host: &str) -> bool {
        let newly_added = self.active_executors.insert(executor_id.to_string());
        if !newly_added {
            return false;
        }
        self.executor_to_host
            .insert(executor_id.to_string(), host.to_string());
        self.executors_by_host
            .entry(host.to_string())
            .or_default()
            .insert(executor_id.to_string());
        if let Some(rack) = self.rack_for_host(host) {
            self.hosts_by_rack
                .entry(rack)
                .or_default()
                .insert(host.to_string());
        }
        true
    }

    /// Purges one executor from every index. Returns its host when the
    /// executor was known.
    pub fn remove_executor(&mut self, executor_id: &str) -> Option<String> {
        if !self.active_executors.remove(executor_id) {
            return None;
        }
        let host = self.executor_to_host.remove(executor_id)?;
        let mut host_drained = false;
        if let Some(execs) = self.executors_by_host.get_mut(&host) {
            execs.remove(executor_id);
            if execs.is_empty() {
                self.executors_by_host.remove(&host);
                host_drained = true;
            }
        }
        if host_drained {
            if let Some(rack) = self.rack_for_host(&host) {
                if let Some(hosts) = self.hosts_by_rack.get_mut(&rack) {
                    hosts.remove(&host);
                    if hosts.is_empty() {
                        self.hosts_by_rack.remove(&rack);
                    }
                }
            }
        }
        Some(host)
    }

    /// Task ids currently assigned to an executor.
    pub fn tasks_on_executor(&self, executor_id: &str) -> Vec<TaskId> {
        self.task_to_executor
            .iter()
            .filter(|(_, exec)| exec.as_str() == executor_id)
            .map(|(tid, _)| *tid)
            .collect()
    }

    /// Number of known-live executors.
    pub fn active_executor_count(&self) -> usize {
        self.active_executors.len()
    }

    /// Whether both task indexes carry identical key sets.
    ///
    /// Holds at every quiescent point; checked by tests.
    pub fn task_indexes_consistent(&self) -> bool {
        self.task_to_set.len() == self.task_to_executor.len()
            && self
                .task_to_set
                .keys()
                .all(|tid| self.task_to_executor.contains_key(tid))
    }
}

impl ExecutorTopology for TaskRegistry {
    fn is_executor_alive(&self, executor_id: &str) -> bool {
        self.active_executors.contains(executor_id)
    }

    fn is_host_alive(&self, host: &str) -> bool {
        self.executors_by_host
            .get(host)
            .is_some_and(|execs| !execs.is_empty())
    }

    fn is_rack_alive(&self, rack: &str) -> bool {
        self.hosts_by_rack
            .get(rack)
            .is_some_and(|hosts| !hosts.is_empty())
    }

    fn rack_for_host(&self, host: &str) -> Option<String> {
        self.rack_resolver.as_ref().and_then(|r| r(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_indexes_written_and_cleared_together() {
        let mut reg = TaskRegistry::new();
        reg.register_dispatch(TaskId(7), StageId(1), 0, "e1");
        assert!(reg.task_indexes_consistent());
        assert_eq!(reg.set_for_task(TaskId(7)), Some((StageId(1), 0)));
        assert_eq!(reg.executor_for_task(TaskId(7)), Some("e1"));

        reg.clear_task(TaskId(7));
        assert!(reg.task_indexes_consistent());
        assert_eq!(reg.set_for_task(TaskId(7)), None);
        assert_eq!(reg.executor_for_task(TaskId(7)), None);
        // Clearing twice is harmless.
        reg.clear_task(TaskId(7));
        assert!(reg.task_indexes_consistent());
    }

    #[test]
    fn executor_membership_maintains_derived_indexes() {
        let mut reg = TaskRegistry::new();
        assert!(reg.add_executor("e1", "h1"));
        assert!(reg.add_executor("e2", "h1"));
        assert!(!reg.add_executor("e1", "h1"));
        assert!(reg.is_executor_alive("e1"));
        assert!(reg.is_host_alive("h1"));
        assert_eq!(reg.active_executor_count(), 2);

        assert_eq!(reg.remove_executor("e1").as_deref(), Some("h1"));
        assert!(reg.is_host_alive("h1"));
        assert_eq!(reg.remove_executor("e2").as_deref(), Some("h1"));
        assert!(!reg.is_host_alive("h1"));
        assert_eq!(reg.remove_executor("e2"), None);
    }

    #[test]
    fn rack_indexes_follow_resolver() {
        let resolver: RackResolver = Arc::new(|host: &str| {
            if host.starts_with("ra-") {
                Some("rack-a".to_string())
            } else {
                None
            }
        });
        let mut reg = TaskRegistry::with_rack_resolver(resolver);
        reg.add_executor("e1", "ra-h1");
        reg.add_executor("e2", "h2");
        assert!(reg.is_rack_alive("rack-a"));
        assert_eq!(reg.rack_for_host("ra-h1").as_deref(), Some("rack-a"));
        assert_eq!(reg.rack_for_host("h2"), None);

        reg.remove_executor("e1");
        assert!(!reg.is_rack_alive("rack-a"));
    }

    #[test]
    fn tasks_on_executor_reports_current_assignments() {
        let mut reg = TaskRegistry::new();
        reg.register_dispatch(TaskId(1), StageId(0), 0, "e1");
        reg.register_dispatch(TaskId(2), StageId(0), 0, "e2");
        reg.register_dispatch(TaskId(3), StageId(0), 0, "e1");
        let mut on_e1 = reg.tasks_on_executor("e1");
        on_e1.sort();
        assert_eq!(on_e1, vec![TaskId(1), TaskId(3)]);
    }
}
