//! Schedulable tree and admission-order policies.
//!
//! Contract:
//! - the root [`Pool`] yields the current admission order through
//!   [`Pool::sorted_task_set_queue`];
//! - FIFO and CPU order by (priority, stage id); FAIR orders sibling
//!   entries by weighted share; NONE keeps insertion order untouched;
//! - the [`SchedulableBuilder`] decides where an admitted manager lands in
//!   the tree.

use std::cmp::Ordering;
use std::sync::Arc;

use fg_common::{SchedulingMode, StageAttempt, StageId};
use parking_lot::Mutex;
use tracing::debug;

use crate::manager::TaskSetManager;

/// Pool used when a task set names no pool under the FAIR builder.
pub const DEFAULT_POOL_NAME: &str = "default";

const DEFAULT_WEIGHT: u32 = 1;
const DEFAULT_MIN_SHARE: u32 = 0;

enum PoolEntry {
    SubPool(Pool),
    Set(Arc<Mutex<TaskSetManager>>),
}

/// A named schedulable node holding task sets and/or sub-pools.
pub struct Pool {
    name: String,
    mode: SchedulingMode,
    weight: u32,
    min_share: u32,
    entries: Vec<PoolEntry>,
}

impl Pool {
    /// Creates an empty pool.
    pub fn new(name: impl Into<String>, mode: SchedulingMode, weight: u32, min_share: u32) -> Self {
        Self {
            name: name.into(),
            mode,
            weight,
            min_share,
            entries: Vec::new(),
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches a manager directly to this pool.
    pub fn add_task_set(&mut self, manager: Arc<Mutex<TaskSetManager>>) {
        self.entries.push(PoolEntry::Set(manager));
    }

    /// Returns the named child pool, creating it with default share values
    /// when absent.
    pub fn get_or_create_pool(&mut self, name: &str) -> &mut Pool {
        let position = self.entries.iter().position(
            |entry| matches!(entry, PoolEntry::SubPool(pool) if pool.name == name),
        );
        let position = match position {
            Some(p) => p,
            None => {
                debug!(
                    pool = %name,
                    parent = %self.name,
                    operator = "PoolCreate",
                    "creating pool"
                );
                self.entries.push(PoolEntry::SubPool(Pool::new(
                    name,
                    SchedulingMode::Fifo,
                    DEFAULT_WEIGHT,
                    DEFAULT_MIN_SHARE,
                )));
                self.entries.len() - 1
            }
        };
        match &mut self.entries[position] {
            PoolEntry::SubPool(pool) => pool,
            PoolEntry::Set(_) => unreachable!("position points at a sub-pool"),
        }
    }

    /// Managers of this subtree in the order the placement engine must
    /// consume them.
    pub fn sorted_task_set_queue(&self) -> Vec<Arc<Mutex<TaskSetManager>>> {
        let mut queue = Vec::new();
        match self.mode {
            SchedulingMode::Fifo | SchedulingMode::Cpu => {
                self.collect(&mut queue);
                queue.sort_by(|a, b| {
                    let a = a.lock();
                    let b = b.lock();
                    (a.priority(), a.stage_id()).cmp(&(b.priority(), b.stage_id()))
                });
            }
            SchedulingMode::Fair => {
                let mut order: Vec<usize> = (0..self.entries.len()).collect();
                order.sort_by(|x, y| self.fair_compare(&self.entries[*x], &self.entries[*y]));
                for position in order {
                    match &self.entries[position] {
                        PoolEntry::SubPool(pool) => queue.extend(pool.sorted_task_set_queue()),
                        PoolEntry::Set(set) => queue.push(Arc::clone(set)),
                    }
                }
            }
            SchedulingMode::None => self.collect(&mut queue),
        }
        queue
    }

    /// Asks every manager in the subtree for speculation candidates.
    pub fn check_speculatable_tasks(&self, quantile: f64, multiplier: f64) -> bool {
        let mut found = false;
        for entry in &self.entries {
            found |= match entry {
                PoolEntry::SubPool(pool) => pool.check_speculatable_tasks(quantile, multiplier),
                PoolEntry::Set(set) => set.lock().check_speculatable_tasks(quantile, multiplier),
            };
        }
        found
    }

    /// Detaches one stage attempt from the subtree. Idempotent; returns
    /// whether an entry was removed.
    pub fn remove_task_set(&mut self, stage_id: StageId, stage_attempt: StageAttempt) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| match entry {
            PoolEntry::Set(set) => {
                let set = set.lock();
                !(set.stage_id() == stage_id && set.stage_attempt() == stage_attempt)
            }
            PoolEntry::SubPool(_) => true,
        });
        let mut removed = self.entries.len() != before;
        for entry in &mut self.entries {
            if let PoolEntry::SubPool(pool) = entry {
                removed |= pool.remove_task_set(stage_id, stage_attempt);
            }
        }
        removed
    }

    /// Running attempts across the subtree, the fair-share signal.
    pub fn running_tasks(&self) -> u32 {
        self.entries
            .iter()
            .map(|entry| match entry {
                PoolEntry::SubPool(pool) => pool.running_tasks(),
                PoolEntry::Set(set) => set.lock().running_tasks(),
            })
            .sum()
    }

    fn collect(&self, queue: &mut Vec<Arc<Mutex<TaskSetManager>>>) {
        for entry in &self.entries {
            match entry {
                PoolEntry::SubPool(pool) => pool.collect(queue),
                PoolEntry::Set(set) => queue.push(Arc::clone(set)),
            }
        }
    }

    fn fair_compare(&self, a: &PoolEntry, b: &PoolEntry) -> Ordering {
        let (running_a, weight_a, min_share_a, name_a) = Self::share_signals(a);
        let (running_b, weight_b, min_share_b, name_b) = Self::share_signals(b);

        let needy_a = running_a < min_share_a;
        let needy_b = running_b < min_share_b;
        let min_share_ratio_a = running_a as f64 / min_share_a.max(1) as f64;
        let min_share_ratio_b = running_b as f64 / min_share_b.max(1) as f64;
        let weight_ratio_a = running_a as f64 / weight_a.max(1) as f64;
        let weight_ratio_b = running_b as f64 / weight_b.max(1) as f64;

        match (needy_a, needy_b) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => min_share_ratio_a
                .partial_cmp(&min_share_ratio_b)
                .unwrap_or(Ordering::Equal)
                .then_with(|| name_a.cmp(&name_b)),
            (false, false) => weight_ratio_a
                .partial_cmp(&weight_ratio_b)
                .unwrap_or(Ordering::Equal)
                .then_with(|| name_a.cmp(&name_b)),
        }
    }

    fn share_signals(entry: &PoolEntry) -> (u32, u32, u32, String) {
        match entry {
            PoolEntry::SubPool(pool) => (
                pool.running_tasks(),
                pool.weight,
                pool.min_share,
                pool.name.clone(),
            ),
            PoolEntry::Set(set) => {
                let set = set.lock();
                (
                    set.running_tasks(),
                    DEFAULT_WEIGHT,
                    DEFAULT_MIN_SHARE,
                    set.name().to_string(),
                )
            }
        }
    }
}

/// Builds the root pool and routes admitted managers into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulableBuilder {
    /// Single root pool ordered by submission priority.
    Fifo,
    /// Named child pools balanced by weighted share.
    Fair,
    /// Submission order with oracle-driven placement engaged.
    Cpu,
    /// Insertion order, no preemption hook.
    None,
}

impl SchedulableBuilder {
    /// Builder matching a configured scheduling mode.
    pub fn from_mode(mode: SchedulingMode) -> Self {
        match mode {
            SchedulingMode::Fifo => Self::Fifo,
            SchedulingMode::Fair => Self::Fair,
            SchedulingMode::Cpu => Self::Cpu,
            SchedulingMode::None => Self::None,
        }
    }

    /// Root pool this builder routes into.
    pub fn build_root_pool(&self) -> Pool {
        let mode = match self {
            Self::Fifo => SchedulingMode::Fifo,
            Self::Fair => SchedulingMode::Fair,
            Self::Cpu => SchedulingMode::Cpu,
            Self::None => SchedulingMode::None,
        };
        Pool::new("root", mode, DEFAULT_WEIGHT, DEFAULT_MIN_SHARE)
    }

    /// Attaches a newly admitted manager to the tree.
    pub fn add_task_set(&self, root: &mut Pool, manager: Arc<Mutex<TaskSetManager>>) {
        match self {
            Self::Fifo | Self::Cpu | Self::None => root.add_task_set(manager),
            Self::Fair => {
                let pool_name = manager
                    .lock()
                    .pool_name()
                    .unwrap_or(DEFAULT_POOL_NAME)
                    .to_string();
                root.get_or_create_pool(&pool_name).add_task_set(manager);
            }
        }
    }
}
