#![deny(missing_docs)]

//! Shared configuration, error types, IDs, and observability primitives for FlowGrid crates.
//!
//! Architecture role:
//! - defines scheduler configuration passed across layers
//! - provides common [`SchedulerError`] / [`Result`] contracts
//! - hosts the process-wide metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

/// Shared scheduler configuration types.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;
/// Metrics registry and Prometheus rendering helpers.
pub mod metrics;

pub use config::{SchedulerConfig, SchedulingMode};
pub use error::{Result, SchedulerError};
pub use ids::*;
pub use metrics::MetricsRegistry;
