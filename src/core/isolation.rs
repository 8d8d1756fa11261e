//! Run one probe in its own forked process.
//!
//! A directory read against a dead NFS server blocks in the kernel and
//! cannot be interrupted from inside the calling process. Running it in a
//! child makes it a unit that can be SIGKILLed and reaped without touching
//! the supervisor's own state.

use crate::config::types::Result;
use crate::core::probe::{Probe, ProbeTarget, ProbeVerdict, RECORD_LEN};
use crate::kernel::process::{spawn_child, write_record, set_parent_death_signal, StatusPipe, StatusReader};
use crate::kernel::signal::restore_default_handlers;
use nix::unistd::{getpid, getppid, Pid};
use std::os::fd::AsRawFd;

/// Exit code of a child that found its parent already gone.
const EXIT_ORPHANED: i32 = 1;

/// Parent-side view of a running probe child.
pub struct IsolatedUnit {
    pid: Pid,
    status: StatusReader,
}

impl IsolatedUnit {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The child's report, if it got as far as writing one.
    /// Only meaningful once the child has exited.
    pub fn read_verdict(&mut self) -> Option<ProbeVerdict> {
        self.status
            .read_record::<RECORD_LEN>()
            .and_then(|record| ProbeVerdict::from_record(&record))
    }
}

/// Fork a child that runs `probe` against `target`, reports, and exits.
pub fn spawn_probe(probe: &dyn Probe, target: &ProbeTarget) -> Result<IsolatedUnit> {
    let (status, write_end) = StatusPipe::new()?.split();
    let status_fd = write_end.as_raw_fd();
    let parent = getpid();

    let pid = spawn_child(|| {
        // A monitor that dies mid-check must not leave probes behind.
        if set_parent_death_signal().is_err() || getppid() != parent {
            return EXIT_ORPHANED;
        }
        // The monitor's flag-only handlers would make the probe immune to
        // Ctrl-C and a service manager's group-wide SIGTERM.
        let _ = restore_default_handlers();
        let verdict = probe.probe(target);
        write_record(status_fd, &verdict.to_record());
        verdict.exit_code()
    })?;

    // Parent keeps only the read end, so EOF follows the child's exit.
    drop(write_end);
    Ok(IsolatedUnit { pid, status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::probe::{DirectoryProbe, EXIT_HEALTHY};
    use crate::core::types::MountRecord;
    use crate::kernel::process::{reap, ExitKind};

    #[test]
    fn child_reports_verdict_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let target = ProbeTarget::new(&MountRecord::new(dir.path(), "t", "tmpfs"), false).unwrap();

        let mut unit = spawn_probe(&DirectoryProbe, &target).unwrap();
        assert_eq!(reap(unit.pid()).unwrap(), ExitKind::Exited(EXIT_HEALTHY));
        assert_eq!(unit.read_verdict(), Some(ProbeVerdict::Healthy));
    }

    /// Sends itself SIGTERM, then reports healthy if it survived.
    struct SelfTerminating;

    impl Probe for SelfTerminating {
        fn probe(&self, _target: &ProbeTarget) -> ProbeVerdict {
            let _ = nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM);
            std::thread::sleep(std::time::Duration::from_millis(200));
            ProbeVerdict::Healthy
        }
    }

    #[test]
    fn child_dies_on_sigterm_despite_monitor_handlers() {
        crate::kernel::signal::SignalHandler::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = ProbeTarget::new(&MountRecord::new(dir.path(), "t", "tmpfs"), false).unwrap();

        let unit = spawn_probe(&SelfTerminating, &target).unwrap();
        assert_eq!(
            reap(unit.pid()).unwrap(),
            ExitKind::Signaled(nix::sys::signal::Signal::SIGTERM)
        );
    }

    struct Exploding;

    impl Probe for Exploding {
        fn probe(&self, _target: &ProbeTarget) -> ProbeVerdict {
            panic!("probe failure inside the child")
        }
    }

    #[test]
    fn panicking_probe_leaves_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let target = ProbeTarget::new(&MountRecord::new(dir.path(), "t", "tmpfs"), false).unwrap();

        let mut unit = spawn_probe(&Exploding, &target).unwrap();
        assert_eq!(
            reap(unit.pid()).unwrap(),
            ExitKind::Exited(crate::kernel::process::EXIT_CHILD_PANIC)
        );
        assert_eq!(unit.read_verdict(), None);
    }
}
