//! Reporter: where a finished cycle goes.
//!
//! The orchestrator hands over a complete `CycleReport`; formatting and
//! emission live here so the core never touches a log sink directly.

use crate::config::types::MonitorError;
use crate::core::types::{errno_text, secs, CheckOutcome, CycleReport, MountFailure, Termination};
use log::{debug, error, info};

pub trait Reporter: Send + Sync {
    /// One call per completed cycle.
    fn cycle_completed(&self, report: &CycleReport);

    /// The mount table could not be read; the cycle was skipped.
    fn enumeration_failed(&self, error: &MonitorError);
}

/// Emits the summary line at info and one error line per failed mount.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn cycle_completed(&self, report: &CycleReport) {
        for failure in &report.failures {
            error!("{}", failure_line(failure));
        }
        debug!(
            "Cycle {} started {} finished with {} healthy",
            report.cycle_id,
            report.started_at.to_rfc3339(),
            report.healthy_count()
        );
        info!("{}", report.summary_line());
    }

    fn enumeration_failed(&self, error: &MonitorError) {
        error!("Unable to read mount table: {}", error);
    }
}

/// The per-failure log line for one non-healthy mount.
pub fn failure_line(failure: &MountFailure) -> String {
    let path = failure.path.display();
    match &failure.outcome {
        CheckOutcome::TimedOut { pid, after_ms, terminated: true } => {
            format!("Mount {} timed out: probe pid {} killed after {}s", path, pid, secs(*after_ms))
        }
        CheckOutcome::TimedOut { pid, after_ms, terminated: false } => format!(
            "Mount {} timed out: probe pid {} could not be killed after {}s",
            path,
            pid,
            secs(*after_ms)
        ),
        CheckOutcome::PermissionDenied { mode: Some(mode), .. } => {
            format!("Mount {} is not accessible (mode {:04o})", path, mode)
        }
        CheckOutcome::PermissionDenied { mode: None, errno: Some(errno) } => {
            format!("Mount {} is not accessible: {}", path, errno_text(*errno))
        }
        CheckOutcome::PermissionDenied { mode: None, errno: None } => {
            format!("Mount {} is not accessible", path)
        }
        CheckOutcome::Unreadable { errno } => {
            format!("Mount {} is unreadable: {}", path, errno_text(*errno))
        }
        CheckOutcome::ProbeCrashed(Termination::Exited(code)) => {
            format!("Probe for {} exited with status {}", path, code)
        }
        CheckOutcome::ProbeCrashed(Termination::Signaled(sig)) => {
            format!("Probe for {} terminated by signal {}", path, sig)
        }
        CheckOutcome::InternalError(reason) => {
            format!("Monitor error while checking {}: {}", path, reason)
        }
        CheckOutcome::EnumerationError(reason) => format!("Cannot check mount {}: {}", path, reason),
        CheckOutcome::Healthy => format!("Mount {} is healthy", path),
        CheckOutcome::Cancelled => format!("Check of mount {} cancelled by shutdown", path),
    }
}

/// Fans one report out to several reporters, in order.
#[derive(Default)]
pub struct Reporters {
    reporters: Vec<Box<dyn Reporter>>,
}

impl Reporters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl Reporter for Reporters {
    fn cycle_completed(&self, report: &CycleReport) {
        for reporter in &self.reporters {
            reporter.cycle_completed(report);
        }
    }

    fn enumeration_failed(&self, error: &MonitorError) {
        for reporter in &self.reporters {
            reporter.enumeration_failed(error);
        }
    }
}
