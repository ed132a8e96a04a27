use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Ordering discipline applied by the root scheduling pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchedulingMode {
    /// Submission order: earlier task sets drain first.
    Fifo,
    /// Weighted fair share across named pools.
    Fair,
    /// Submission order with oracle-driven placement policies engaged.
    Cpu,
    /// Insertion order with no preemption hook.
    None,
}

impl Default for SchedulingMode {
    fn default() -> Self {
        Self::Fifo
    }
}

impl FromStr for SchedulingMode {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FIFO" => Ok(Self::Fifo),
            "FAIR" => Ok(Self::Fair),
            "CPU" => Ok(Self::Cpu),
            "NONE" => Ok(Self::None),
            other => Err(SchedulerError::InvalidConfig(format!(
                "unknown scheduling mode '{other}' (expected FIFO, FAIR, CPU or NONE)"
            ))),
        }
    }
}

/// Scheduler behavior/configuration knobs shared across layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ordering discipline for the root pool.
    #[serde(default)]
    pub scheduling_mode: SchedulingMode,
    /// Integer capacity units consumed by one default-policy task.
    pub cpus_per_task: u32,
    /// Task attempt failures tolerated before the owning set is aborted.
    pub max_task_failures: u32,
    /// Whether the speculation ticker runs.
    #[serde(default)]
    pub speculation_enabled: bool,
    /// Speculation ticker period in milliseconds.
    pub speculation_interval_ms: u64,
    /// Fraction of a set that must succeed before speculation is considered.
    pub speculation_quantile: f64,
    /// Running time multiple of the median successful duration that marks a
    /// task speculatable.
    pub speculation_multiplier: f64,
    /// Starvation watchdog period in milliseconds.
    pub starvation_timeout_ms: u64,
    /// Whether the priority placement algorithm drains the largest predicted
    /// demand first instead of queue order.
    #[serde(default)]
    pub ppa_sorted: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduling_mode: SchedulingMode::Fifo,
            cpus_per_task: 1,
            max_task_failures: 4,
            speculation_enabled: false,
            speculation_interval_ms: 100,
            speculation_quantile: 0.75,
            speculation_multiplier: 1.5,
            starvation_timeout_ms: 15_000,
            ppa_sorted: false,
        }
    }
}

impl SchedulerConfig {
    /// Validates value ranges that would otherwise fail deep inside a
    /// scheduling round.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.cpus_per_task == 0 {
            return Err(SchedulerError::InvalidConfig(
                "cpus_per_task must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.speculation_quantile) {
            return Err(SchedulerError::InvalidConfig(format!(
                "speculation_quantile {} outside [0, 1]",
                self.speculation_quantile
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_scheduling_modes() {
        assert_eq!("fifo".parse::<SchedulingMode>().unwrap(), SchedulingMode::Fifo);
        assert_eq!("FAIR".parse::<SchedulingMode>().unwrap(), SchedulingMode::Fair);
        assert_eq!("Cpu".parse::<SchedulingMode>().unwrap(), SchedulingMode::Cpu);
        assert_eq!("NONE".parse::<SchedulingMode>().unwrap(), SchedulingMode::None);
    }

    #[test]
    fn unknown_scheduling_mode_is_config_error() {
        let err = "GPA".parse::<SchedulingMode>().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.scheduling_mode, SchedulingMode::Fifo);
        assert_eq!(cfg.cpus_per_task, 1);
        assert_eq!(cfg.max_task_failures, 4);
        assert!(!cfg.speculation_enabled);
        assert_eq!(cfg.speculation_interval_ms, 100);
        assert_eq!(cfg.starvation_timeout_ms, 15_000);
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_cpus_per_task_rejected() {
        let cfg = SchedulerConfig {
            cpus_per_task: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }
}
