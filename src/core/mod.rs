//! Health-check core.
//!
//! Probe, isolated execution, per-check deadline, Timeout Supervisor, and
//! the Check Orchestrator. Platform details live in [`crate::kernel`];
//! log and metrics emission live in [`crate::observability`].

pub mod deadline;
pub mod isolation;
pub mod orchestrator;
pub mod probe;
pub mod registry;
pub mod supervisor;
pub mod types;
