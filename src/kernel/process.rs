//! Process primitives for isolated probe units.
//!
//! fork, SIGKILL, a non-reaping exit wait, and reaping. Keeping "has it
//! exited" separate from "reap it" is what makes forced termination safe: a
//! pid is only ever signalled while it is still unreaped, so it can never
//! have been recycled for an unrelated process.

use crate::config::types::{MonitorError, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Exit code used when the child body panics.
pub const EXIT_CHILD_PANIC: i32 = 70;

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> MonitorError {
    MonitorError::Process(format!("{prefix}: {err}"))
}

/// One-shot pipe carrying a fixed-size status record from child to parent.
///
/// Both ends are close-on-exec; the read end is non-blocking so a child that
/// died before writing can never stall the parent.
pub struct StatusPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl StatusPipe {
    pub fn new() -> Result<Self> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: fds is a valid two-element buffer for pipe(2).
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(to_process_error("pipe(status)", Errno::last()));
        }
        // SAFETY: pipe(2) succeeded, both descriptors are fresh and owned here.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        set_fd_flag(read.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC)?;
        set_fd_flag(write.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC)?;
        let status_flags = unsafe { libc::fcntl(read.as_raw_fd(), libc::F_GETFL) };
        if status_flags < 0 {
            return Err(to_process_error("fcntl(F_GETFL)", Errno::last()));
        }
        set_fd_flag(read.as_raw_fd(), libc::F_SETFL, status_flags | libc::O_NONBLOCK)?;

        Ok(Self { read, write })
    }

    /// Split into (parent read end, child write end).
    pub fn split(self) -> (StatusReader, OwnedFd) {
        (StatusReader { file: File::from(self.read) }, self.write)
    }
}

fn set_fd_flag(fd: RawFd, cmd: libc::c_int, flags: libc::c_int) -> Result<()> {
    // SAFETY: fcntl on a descriptor we own with an integer argument.
    if unsafe { libc::fcntl(fd, cmd, flags) } < 0 {
        return Err(to_process_error("fcntl", Errno::last()));
    }
    Ok(())
}

/// Parent side of a [`StatusPipe`].
pub struct StatusReader {
    file: File,
}

impl StatusReader {
    /// Read exactly `N` bytes if the child wrote them; `None` otherwise.
    /// Only meaningful after the child has exited.
    pub fn read_record<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut buf = [0u8; N];
        match self.file.read_exact(&mut buf) {
            Ok(()) => Some(buf),
            Err(_) => None,
        }
    }
}

/// Write a whole record from inside the child. Async-signal-safe.
pub fn write_record(fd: RawFd, record: &[u8]) -> bool {
    let mut written = 0;
    while written < record.len() {
        // SAFETY: pointer and length describe the unwritten tail of `record`.
        let rc = unsafe {
            libc::write(
                fd,
                record[written..].as_ptr() as *const libc::c_void,
                record.len() - written,
            )
        };
        if rc < 0 {
            if Errno::last() == Errno::EINTR {
                continue;
            }
            return false;
        }
        written += rc as usize;
    }
    true
}

/// Fork a child that runs `body` and `_exit`s with its return value.
///
/// The child never returns into the caller's stack and never runs atexit
/// handlers; a panic inside `body` exits with [`EXIT_CHILD_PANIC`].
pub fn spawn_child<F>(body: F) -> Result<Pid>
where
    F: FnOnce() -> i32,
{
    // SAFETY: the child only runs `body` and then `_exit`s; it never unwinds
    // back into code that assumes the parent's threads exist.
    match unsafe { fork() }.map_err(|e| to_process_error("fork(probe)", e))? {
        ForkResult::Child => {
            let code = catch_unwind(AssertUnwindSafe(body)).unwrap_or(EXIT_CHILD_PANIC);
            // SAFETY: _exit is async-signal-safe and skips atexit handlers.
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => Ok(child),
    }
}

/// Ask the kernel to SIGKILL this process when its parent dies.
pub fn set_parent_death_signal() -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        nix::sys::prctl::set_pdeathsig(Signal::SIGKILL)
            .map_err(|e| to_process_error("Failed to set parent death signal", e))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Ok(())
    }
}

/// Send SIGKILL. No grace period: the unit is already presumed hung.
pub fn force_kill(pid: Pid) -> Result<()> {
    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(to_process_error(&format!("kill({}, SIGKILL)", pid), e)),
    }
}

/// Block until `pid` has exited, leaving it unreaped (`WNOWAIT`).
pub fn wait_exited(pid: Pid) -> Result<()> {
    loop {
        // SAFETY: zeroed siginfo_t is a valid out-parameter for waitid.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid.as_raw() as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        match Errno::last() {
            Errno::EINTR => continue,
            e => return Err(to_process_error(&format!("waitid({})", pid), e)),
        }
    }
}

/// Exit status of a reaped unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signaled(Signal),
}

fn exit_kind(status: WaitStatus) -> Option<ExitKind> {
    match status {
        WaitStatus::Exited(_, code) => Some(ExitKind::Exited(code)),
        WaitStatus::Signaled(_, sig, _) => Some(ExitKind::Signaled(sig)),
        _ => None,
    }
}

/// Reap `pid`, blocking until it has exited.
pub fn reap(pid: Pid) -> Result<ExitKind> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(kind) = exit_kind(status) {
                    return Ok(kind);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(to_process_error(&format!("waitpid({})", pid), e)),
        }
    }
}

/// Reap `pid` if it has already exited.
pub fn try_reap(pid: Pid) -> Result<Option<ExitKind>> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => return Ok(None),
            Ok(status) => {
                if let Some(kind) = exit_kind(status) {
                    return Ok(Some(kind));
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(to_process_error(&format!("waitpid({})", pid), e)),
        }
    }
}
