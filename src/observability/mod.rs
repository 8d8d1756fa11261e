//! Observability
//!
//! Cycle reporting (log lines) and metrics for operational visibility.

pub mod metrics;
pub mod report;
