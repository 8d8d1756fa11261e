//! Arena of in-flight probe units, keyed by check id.
//!
//! Every pid in here is a forked, not-yet-reaped child, so signalling it can
//! never hit a recycled pid. The owning check removes its entry under the
//! lock *before* reaping; the shutdown path and the sweep only touch pids
//! while holding that same lock.
//!
//! Units whose forced termination could not be confirmed within the kill
//! grace are moved to the abandoned list. While one is still alive its
//! mountpoint gets no new probe; the end-of-cycle sweep retries the kill and
//! reaps them once they finally exit.
//!
//! `terminate_all` is the shutdown path: it cancels the registry, so no
//! further unit can be registered, and kills everything tracked.

use crate::core::types::CheckId;
use crate::kernel::process::{force_kill, try_reap, ExitKind};
use log::{debug, info, warn};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct TrackedUnit {
    pid: Pid,
    path: PathBuf,
    started: Instant,
}

#[derive(Debug, Default)]
struct RegistryState {
    in_flight: HashMap<CheckId, TrackedUnit>,
    abandoned: Vec<TrackedUnit>,
    cancelled: bool,
}

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub reaped: usize,
    pub still_running: usize,
}

/// An abandoned unit that still holds a mountpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUnit {
    pub pid: Pid,
    pub elapsed: Duration,
}

/// Shared handle; clones refer to the same arena.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Entries are plain data; a panicked holder cannot leave them half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a freshly spawned unit. Returns false, tracking nothing, once
    /// the registry is cancelled; the caller must then kill the unit itself.
    pub fn register(&self, check_id: CheckId, pid: Pid, path: &Path) -> bool {
        let mut state = self.lock();
        if state.cancelled {
            return false;
        }
        state.in_flight.insert(
            check_id,
            TrackedUnit {
                pid,
                path: path.to_path_buf(),
                started: Instant::now(),
            },
        );
        true
    }

    /// Remove `check_id` so nobody else signals its pid; the caller reaps next.
    pub fn release(&self, check_id: CheckId) -> Option<Pid> {
        self.lock().in_flight.remove(&check_id).map(|unit| unit.pid)
    }

    /// Hand an unconfirmed unit over to the end-of-cycle sweep.
    pub fn abandon(&self, check_id: CheckId) {
        let mut state = self.lock();
        if let Some(unit) = state.in_flight.remove(&check_id) {
            warn!(
                "Probe pid {} for {} did not exit after SIGKILL; deferring reap",
                unit.pid,
                unit.path.display()
            );
            state.abandoned.push(unit);
        }
    }

    /// The abandoned unit still running against `path`, if any. Units for
    /// `path` that have exited meanwhile are reaped here.
    pub fn pending(&self, path: &Path) -> Option<PendingUnit> {
        let mut state = self.lock();
        let mut pending = None;
        state.abandoned.retain(|unit| {
            if unit.path != path {
                return true;
            }
            match try_reap(unit.pid) {
                Ok(Some(kind)) => {
                    log_late_exit(unit, kind);
                    false
                }
                Ok(None) => {
                    pending.get_or_insert(PendingUnit {
                        pid: unit.pid,
                        elapsed: unit.started.elapsed(),
                    });
                    true
                }
                Err(e) => {
                    debug!("Dropping abandoned probe pid {}: {}", unit.pid, e);
                    false
                }
            }
        });
        pending
    }

    pub fn pid_of(&self, check_id: CheckId) -> Option<Pid> {
        self.lock().in_flight.get(&check_id).map(|unit| unit.pid)
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn abandoned_count(&self) -> usize {
        self.lock().abandoned.len()
    }

    /// True once `terminate_all` has run.
    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Reap abandoned units that have exited, re-kill the rest.
    pub fn sweep(&self) -> SweepSummary {
        let mut state = self.lock();
        let mut summary = SweepSummary::default();

        state.abandoned.retain(|unit| match try_reap(unit.pid) {
            Ok(Some(kind)) => {
                log_late_exit(unit, kind);
                summary.reaped += 1;
                false
            }
            Ok(None) => {
                if let Err(e) = force_kill(unit.pid) {
                    warn!("Retrying kill of probe pid {} failed: {}", unit.pid, e);
                }
                summary.still_running += 1;
                true
            }
            Err(e) => {
                debug!("Dropping abandoned probe pid {}: {}", unit.pid, e);
                false
            }
        });

        summary
    }

    /// Cancel the registry and SIGKILL every tracked unit. Used on shutdown;
    /// owners still reap, and report their unit as cancelled.
    pub fn terminate_all(&self) -> usize {
        let mut state = self.lock();
        state.cancelled = true;
        let mut signalled = 0;
        for unit in state.in_flight.values().chain(state.abandoned.iter()) {
            match force_kill(unit.pid) {
                Ok(()) => signalled += 1,
                Err(e) => warn!("Failed to kill probe pid {}: {}", unit.pid, e),
            }
        }
        if signalled > 0 {
            info!("Killed {} in-flight probe(s)", signalled);
        }
        signalled
    }
}

fn log_late_exit(unit: &TrackedUnit, kind: ExitKind) {
    info!(
        "Slow check for mount {} exited after {:.0} seconds ({})",
        unit.path.display(),
        unit.started.elapsed().as_secs_f64(),
        describe(kind)
    );
}

fn describe(kind: ExitKind) -> String {
    match kind {
        ExitKind::Exited(code) => format!("status {}", code),
        ExitKind::Signaled(sig) => format!("signal {}", sig as i32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::process::{reap, spawn_child, wait_exited};
    use std::time::Duration;

    fn sleeper() -> Pid {
        spawn_child(|| {
            std::thread::sleep(Duration::from_secs(60));
            0
        })
        .unwrap()
    }

    #[test]
    fn register_then_release() {
        let registry = InFlightRegistry::new();
        let id = CheckId::next();
        let pid = spawn_child(|| 0).unwrap();

        registry.register(id, pid, Path::new("/data"));
        assert_eq!(registry.pid_of(id), Some(pid));
        assert_eq!(registry.in_flight_count(), 1);

        assert_eq!(registry.release(id), Some(pid));
        assert_eq!(registry.release(id), None);
        assert_eq!(registry.in_flight_count(), 0);
        reap(pid).unwrap();
    }

    #[test]
    fn terminate_all_kills_only_tracked_units() {
        let registry = InFlightRegistry::new();
        let tracked = sleeper();
        let untracked = sleeper();
        let id = CheckId::next();
        registry.register(id, tracked, Path::new("/mnt/a"));

        assert_eq!(registry.terminate_all(), 1);
        registry.release(id);
        assert_eq!(reap(tracked).unwrap(), ExitKind::Signaled(nix::sys::signal::Signal::SIGKILL));

        // The other unit is still alive.
        assert_eq!(try_reap(untracked).unwrap(), None);
        force_kill(untracked).unwrap();
        reap(untracked).unwrap();
    }

    #[test]
    fn sweep_reaps_abandoned_units_once_exited() {
        let registry = InFlightRegistry::new();
        let id = CheckId::next();
        let pid = sleeper();
        registry.register(id, pid, Path::new("/mnt/slow"));
        registry.abandon(id);
        assert_eq!(registry.in_flight_count(), 0);
        assert_eq!(registry.abandoned_count(), 1);

        // First sweep sees it alive and re-kills it.
        let first = registry.sweep();
        assert_eq!(first.reaped + first.still_running, 1);

        wait_exited(pid).unwrap_or(());
        let second = registry.sweep();
        assert_eq!(first.reaped + second.reaped, 1);
        assert_eq!(registry.abandoned_count(), 0);
    }

    #[test]
    fn live_abandoned_unit_holds_its_mountpoint() {
        let registry = InFlightRegistry::new();
        let id = CheckId::next();
        let pid = sleeper();
        registry.register(id, pid, Path::new("/mnt/wedged"));
        registry.abandon(id);

        let pending = registry.pending(Path::new("/mnt/wedged")).unwrap();
        assert_eq!(pending.pid, pid);
        assert_eq!(registry.pending(Path::new("/mnt/other")), None);

        force_kill(pid).unwrap();
        wait_exited(pid).unwrap();
        // Exited now: the lookup reaps it and frees the mountpoint.
        assert_eq!(registry.pending(Path::new("/mnt/wedged")), None);
        assert_eq!(registry.abandoned_count(), 0);
    }

    #[test]
    fn cancelled_registry_refuses_new_units() {
        let registry = InFlightRegistry::new();
        let tracked = sleeper();
        assert!(registry.register(CheckId::next(), tracked, Path::new("/mnt/a")));
        assert!(!registry.is_cancelled());

        assert_eq!(registry.terminate_all(), 1);
        assert!(registry.is_cancelled());
        reap(tracked).unwrap();

        let late = spawn_child(|| 0).unwrap();
        assert!(!registry.register(CheckId::next(), late, Path::new("/mnt/b")));
        assert_eq!(registry.in_flight_count(), 1);
        reap(late).unwrap();
    }

    #[test]
    fn abandon_of_unknown_check_is_ignored() {
        let registry = InFlightRegistry::new();
        registry.abandon(CheckId::next());
        assert_eq!(registry.abandoned_count(), 0);
        assert_eq!(registry.sweep(), SweepSummary::default());
    }
}
