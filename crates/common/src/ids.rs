//! Typed identifiers shared across scheduler components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable stage identifier assigned by the stage planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(
    /// Raw numeric id value.
    pub u32,
);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique task identifier, allocated at dispatch time.
///
/// Ids are monotonic within one scheduler lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(
    /// Raw numeric id value.
    pub u64,
);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attempt number of one stage submission.
pub type StageAttempt = u32;
