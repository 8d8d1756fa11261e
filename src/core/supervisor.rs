use crate::config::types::{MonitorConfig, MonitorError, Result};
use crate::core::deadline::Deadline;
use crate::core::isolation::{spawn_probe, IsolatedUnit};
use crate::core::probe::{
    Probe, ProbeTarget, ProbeVerdict, EXIT_HEALTHY, EXIT_IDENTITY_FAILED, EXIT_PERMISSION_DENIED,
    EXIT_UNREADABLE,
};
use crate::core::registry::InFlightRegistry;
use crate::core::types::{CheckId, CheckOutcome, MountRecord, Termination};
use crate::kernel::process::{force_kill, reap, wait_exited, ExitKind};
use crate::observability::metrics::{get_metrics, MetricsRegistry};
use crossbeam_channel::{bounded, select, Receiver};
use log::{debug, error, warn};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> MonitorError {
    MonitorError::Process(format!("{prefix}: {err}"))
}

/// How an expired unit is terminated.
pub trait Killer: Send + Sync {
    fn kill(&self, pid: Pid) -> Result<()>;
}

/// Unconditional SIGKILL.
pub struct Sigkill;

impl Killer for Sigkill {
    fn kill(&self, pid: Pid) -> Result<()> {
        force_kill(pid)
    }
}

/// One in-flight check: the isolated unit, its deadline, and its exit notification.
///
/// Owned by exactly one `TimeoutSupervisor::check` call. The pid is never
/// shared with another check and is only signalled while still unreaped.
pub struct ProbeHandle {
    check_id: CheckId,
    unit: IsolatedUnit,
    deadline: Deadline,
    exited: Receiver<Result<()>>,
    started: Instant,
}

impl ProbeHandle {
    pub fn check_id(&self) -> CheckId {
        self.check_id
    }

    pub fn pid(&self) -> Pid {
        self.unit.pid()
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }
}

/// Runs one probe under a hard wall-clock deadline.
///
/// Protocol per check: spawn -> arm -> wait -> (kill + confirm on expiry)
/// -> disarm -> reap -> classify. Every path yields exactly one outcome.
pub struct TimeoutSupervisor {
    timeout: Duration,
    kill_grace: Duration,
    assume_owner: bool,
    registry: InFlightRegistry,
    metrics: Arc<MetricsRegistry>,
    killer: Arc<dyn Killer>,
}

impl TimeoutSupervisor {
    pub fn new(timeout: Duration, kill_grace: Duration, registry: InFlightRegistry) -> Self {
        Self {
            timeout,
            kill_grace,
            assume_owner: true,
            registry,
            metrics: get_metrics(),
            killer: Arc::new(Sigkill),
        }
    }

    pub fn from_config(config: &MonitorConfig, registry: InFlightRegistry) -> Self {
        Self::new(config.check_timeout(), config.kill_grace(), registry)
            .assume_owner(config.assume_owner_identity)
    }

    /// Whether probes switch to the mountpoint owner before listing.
    pub fn assume_owner(mut self, assume_owner: bool) -> Self {
        self.assume_owner = assume_owner;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_killer(mut self, killer: Arc<dyn Killer>) -> Self {
        self.killer = killer;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    /// Check one mount. Never fails: monitor-side problems become
    /// `InternalError` / `EnumerationError` outcomes.
    ///
    /// At most one unit runs per mountpoint: while an earlier unit for the
    /// same path survives its kill, the mount is reported timed out again
    /// without forking. After shutdown, every check is `Cancelled` at once.
    pub fn check(&self, probe: &dyn Probe, record: &MountRecord) -> CheckOutcome {
        if self.registry.is_cancelled() {
            return CheckOutcome::Cancelled;
        }

        if let Some(pending) = self.registry.pending(&record.path) {
            warn!(
                "Slow check for mount {} has not exited after {:.0} seconds",
                record.path.display(),
                pending.elapsed.as_secs_f64()
            );
            return CheckOutcome::TimedOut {
                pid: pending.pid.as_raw(),
                after_ms: pending.elapsed.as_millis() as u64,
                terminated: false,
            };
        }

        let target = match ProbeTarget::new(record, self.assume_owner) {
            Ok(target) => target,
            Err(reason) => return CheckOutcome::EnumerationError(reason),
        };

        let handle = match self.spawn(probe, &target, record) {
            Ok(Some(handle)) => handle,
            Ok(None) => return CheckOutcome::Cancelled,
            Err(e) => return CheckOutcome::InternalError(e.to_string()),
        };

        self.supervise(handle, record)
    }

    /// Spawn the unit, register it, start its waiter, and arm its deadline.
    /// `None` when shutdown began while the unit was being forked.
    fn spawn(
        &self,
        probe: &dyn Probe,
        target: &ProbeTarget,
        record: &MountRecord,
    ) -> Result<Option<ProbeHandle>> {
        let check_id = CheckId::next();
        let unit = spawn_probe(probe, target)?;
        let pid = unit.pid();
        if !self.registry.register(check_id, pid, &record.path) {
            let _ = force_kill(pid);
            let _ = reap(pid);
            return Ok(None);
        }

        let (exit_tx, exited) = bounded(1);
        let waiter = std::thread::Builder::new()
            .name(format!("probe-wait-{}", check_id.as_u64()))
            .spawn(move || {
                let _ = exit_tx.send(wait_exited(pid));
            });

        if let Err(e) = waiter {
            // Without a waiter nothing can observe the exit; don't leave the unit running.
            self.registry.release(check_id);
            let _ = force_kill(pid);
            let _ = reap(pid);
            return Err(to_process_error("Failed to spawn probe waiter", e));
        }

        debug!("{}: probe pid {} started for {}", check_id, pid, record.path.display());
        Ok(Some(ProbeHandle {
            check_id,
            unit,
            deadline: Deadline::arm(check_id, self.timeout),
            exited,
            started: Instant::now(),
        }))
    }

    fn supervise(&self, mut handle: ProbeHandle, record: &MountRecord) -> CheckOutcome {
        let check_id = handle.check_id;
        let pid = handle.pid();
        let timer = handle.deadline.timer();

        let deadline_fired = select! {
            recv(handle.exited) -> _ => false,
            recv(timer) -> _ => true,
        };

        if deadline_fired {
            // SIGKILL to a unit that exited at this same instant is harmless:
            // it is still unreaped, so the pid cannot have been reused.
            let killed = match self.killer.kill(pid) {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to kill probe pid {} for {}: {}", pid, record.path.display(), e);
                    false
                }
            };

            if handle.exited.recv_timeout(self.kill_grace).is_err() {
                if killed {
                    error!(
                        "Probe pid {} for {} still running {}ms after SIGKILL",
                        pid,
                        record.path.display(),
                        self.kill_grace.as_millis()
                    );
                }
                self.metrics.kill_failures.inc();
                handle.deadline.disarm();
                self.registry.abandon(check_id);
                return CheckOutcome::TimedOut {
                    pid: pid.as_raw(),
                    after_ms: self.timeout.as_millis() as u64,
                    terminated: false,
                };
            }
        }

        handle.deadline.disarm();
        self.registry.release(check_id);

        let exit = match reap(pid) {
            Ok(exit) => exit,
            Err(e) => return CheckOutcome::InternalError(format!("lost probe pid {}: {}", pid, e)),
        };

        let outcome = self.conclude(deadline_fired, exit, handle.unit.read_verdict(), pid);
        debug!(
            "{}: {} -> {} in {:?}",
            check_id,
            record.path.display(),
            outcome.label(),
            handle.started.elapsed()
        );
        outcome
    }

    /// Classify, and count a forced kill only when the kill is what ended the unit.
    fn conclude(
        &self,
        deadline_fired: bool,
        exit: ExitKind,
        verdict: Option<ProbeVerdict>,
        pid: Pid,
    ) -> CheckOutcome {
        let outcome = self.classify(deadline_fired, exit, verdict, pid);
        if matches!(outcome, CheckOutcome::TimedOut { terminated: true, .. }) {
            self.metrics.forced_kills.inc();
        }
        outcome
    }

    /// Map how the unit ended to an outcome. A SIGKILL only means "timed out"
    /// when our own deadline sent it; a unit that beat the kill keeps its own
    /// result. A SIGKILL sent by shutdown cancels the check.
    fn classify(
        &self,
        deadline_fired: bool,
        exit: ExitKind,
        verdict: Option<ProbeVerdict>,
        pid: Pid,
    ) -> CheckOutcome {
        match exit {
            ExitKind::Signaled(Signal::SIGKILL) if deadline_fired => CheckOutcome::TimedOut {
                pid: pid.as_raw(),
                after_ms: self.timeout.as_millis() as u64,
                terminated: true,
            },
            ExitKind::Signaled(Signal::SIGKILL) if self.registry.is_cancelled() => CheckOutcome::Cancelled,
            ExitKind::Signaled(sig) => CheckOutcome::ProbeCrashed(Termination::Signaled(sig as i32)),
            ExitKind::Exited(code) => classify_exit(code, verdict),
        }
    }
}

fn classify_exit(code: i32, verdict: Option<ProbeVerdict>) -> CheckOutcome {
    match (code, verdict) {
        (EXIT_HEALTHY, Some(ProbeVerdict::Healthy)) => CheckOutcome::Healthy,
        (EXIT_PERMISSION_DENIED, Some(ProbeVerdict::PermissionDenied { mode, errno })) => {
            CheckOutcome::PermissionDenied { mode, errno }
        }
        (EXIT_UNREADABLE, Some(ProbeVerdict::Unreadable { errno })) => {
            CheckOutcome::Unreadable { errno }
        }
        (EXIT_IDENTITY_FAILED, Some(ProbeVerdict::IdentityFailed { uid, gid, errno })) => {
            CheckOutcome::InternalError(format!(
                "cannot assume owner identity {}:{}: {}",
                uid,
                gid,
                crate::core::types::errno_text(errno)
            ))
        }
        (EXIT_HEALTHY, None) => {
            // Exit 0 with no report: the probe never ran to completion.
            warn!("Probe exited 0 without a status record");
            CheckOutcome::ProbeCrashed(Termination::Exited(code))
        }
        _ => CheckOutcome::ProbeCrashed(Termination::Exited(code)),
    }
}
