//! mountwatch: detect mountpoints that stopped answering
//!
//! A directory listing against a dead network filesystem blocks in the
//! kernel, often forever. mountwatch runs each listing in a separate,
//! killable process under a hard deadline, so a hung mount shows up as a
//! logged failure instead of a frozen monitor.
//!
//! # Architecture
//!
//! ## OS Primitives ([`kernel`])
//! - [`kernel::mount`]: live mount table (`/proc/self/mountinfo`, `getmntinfo`)
//! - [`kernel::credentials`]: group-then-user identity change, type-state enforced
//! - [`kernel::process`]: fork, status pipe, SIGKILL, non-reaping wait, reap
//! - [`kernel::signal`]: async-safe shutdown flag and cleanup coordination
//!
//! ## Health-Check Core ([`core`])
//! - [`core::probe`]: the directory probe and its exit sentinels
//! - [`core::isolation`]: one probe per forked child
//! - [`core::deadline`]: per-check single-shot deadline with explicit disarm
//! - [`core::registry`]: in-flight units keyed by check id
//! - [`core::supervisor`]: Timeout Supervisor (spawn, arm, wait, kill, reap, classify)
//! - [`core::orchestrator`]: bounded worker pool over one enumerated cycle
//!
//! ## Observability ([`observability`])
//! - [`observability::report`]: Reporter interface and log lines
//! - [`observability::metrics`]: Prometheus text metrics and textfile output
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: `MonitorConfig` and the `MonitorError` taxonomy
//! - [`config::loader`]: JSON config loading
//! - [`config::validator`]: startup validation
//!
//! # Design Principles
//!
//! 1. **Kernel as truth** - Outcomes come from wait status and the probe's own report
//! 2. **Nothing shared per check** - Each check owns its unit and its deadline
//! 3. **Signal only what is unreaped** - A pid is never killed after it could be recycled
//! 4. **Types prevent errors** - Group-before-user is the only order that compiles

// OS Primitives
pub mod kernel;

// Health-Check Core
pub mod core;

// Observability
pub mod observability;

// Configuration
pub mod config;

// CLI entrypoint for the mountwatch binary
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::{MonitorConfig, MonitorError, Result};
pub use crate::core::orchestrator::Orchestrator;
pub use crate::core::probe::{DirectoryProbe, Probe, ProbeTarget, ProbeVerdict};
pub use crate::core::supervisor::{Killer, TimeoutSupervisor};
pub use crate::core::types::{CheckOutcome, CycleReport, MountRecord};
pub use kernel::mount::MountSource;
pub use observability::report::Reporter;
