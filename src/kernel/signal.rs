//! Async-safe shutdown signalling for the poll loop
//! The handler only flips atomics; the loop observes them between cycles
//! and while sleeping.

use crate::config::types::{MonitorError, Result};
use log::info;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

const SHUTDOWN_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

/// Global shutdown flag (async-safe atomic)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Global signal received (async-safe atomic)
static SIGNAL_RECEIVED: AtomicU32 = AtomicU32::new(0);

const SIGNAL_POLL: Duration = Duration::from_millis(100);

/// Signal handler state
pub struct SignalHandler;

impl SignalHandler {
    /// Install handlers for SIGINT, SIGTERM, SIGHUP.
    /// Must be called early in main() before any threads are spawned
    pub fn init() -> Result<Self> {
        Self::install_signal_handlers()?;
        Ok(Self)
    }

    fn install_signal_handlers() -> Result<()> {
        let sig_action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        for sig in SHUTDOWN_SIGNALS {
            // SAFETY: the handler only performs atomic stores.
            unsafe { signal::sigaction(sig, &sig_action) }.map_err(|e| {
                MonitorError::Signal(format!("Failed to install {} handler: {}", sig, e))
            })?;
        }

        info!("Signal handlers installed (SIGINT, SIGTERM, SIGHUP)");
        Ok(())
    }

    /// Only atomic operations: no allocations, no locks, no I/O
    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal as u32, Ordering::SeqCst);
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }

    /// Signal that was received (0 if none)
    pub fn get_signal(&self) -> u32 {
        SIGNAL_RECEIVED.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`, waking early on shutdown.
    /// Returns true if shutdown was requested.
    pub fn wait_for_signal(&self, timeout: Duration) -> bool {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if self.shutdown_requested() {
                return true;
            }
            std::thread::sleep(SIGNAL_POLL.min(timeout.saturating_sub(start.elapsed())));
        }

        self.shutdown_requested()
    }
}

/// Put the shutdown signals back to their default action.
/// For forked probe children: no allocation, no logging.
pub fn restore_default_handlers() -> nix::Result<()> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in SHUTDOWN_SIGNALS {
        // SAFETY: SIG_DFL runs no code in this process.
        unsafe { signal::sigaction(sig, &default) }?;
    }
    Ok(())
}

/// Request shutdown without a signal (tests, programmatic stop).
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Main loop helper: false once shutdown was requested
pub fn should_continue() -> bool {
    !SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Cleanup handler that runs on shutdown, from the main loop
pub struct CleanupHandler {
    cleanup_fn: Box<dyn FnOnce() + Send>,
}

impl CleanupHandler {
    pub fn new<F>(cleanup_fn: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cleanup_fn: Box::new(cleanup_fn),
        }
    }

    pub fn run(self) {
        (self.cleanup_fn)();
    }
}

/// Graceful shutdown coordinator
/// Owns the signal handler and the cleanup to run once the loop exits.
pub struct ShutdownCoordinator {
    signal_handler: SignalHandler,
    cleanup_handlers: Vec<CleanupHandler>,
}

impl ShutdownCoordinator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            signal_handler: SignalHandler::init()?,
            cleanup_handlers: Vec::new(),
        })
    }

    pub fn register_cleanup<F>(&mut self, cleanup_fn: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanup_handlers.push(CleanupHandler::new(cleanup_fn));
    }

    pub fn shutdown_requested(&self) -> bool {
        self.signal_handler.shutdown_requested()
    }

    pub fn get_signal(&self) -> u32 {
        self.signal_handler.get_signal()
    }

    /// Interruptible sleep between cycles.
    pub fn sleep(&self, interval: Duration) -> bool {
        self.signal_handler.wait_for_signal(interval)
    }

    /// Run all cleanup handlers in registration order
    pub fn run_cleanup(self) {
        let signal = self.get_signal();
        if signal != 0 {
            info!("Running cleanup handlers after signal {}", signal);
        } else {
            info!("Running cleanup handlers");
        }

        for handler in self.cleanup_handlers {
            handler.run();
        }

        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn reset() {
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
        SIGNAL_RECEIVED.store(0, Ordering::SeqCst);
    }

    // Single test so the process-wide flag is never raced by another test.
    #[test]
    fn test_shutdown_flag_lifecycle() {
        reset();
        let handler = SignalHandler::init().unwrap();
        assert!(!handler.shutdown_requested());
        assert!(should_continue());

        let start = Instant::now();
        assert!(!handler.wait_for_signal(Duration::from_millis(150)));
        assert!(start.elapsed() >= Duration::from_millis(150));

        request_shutdown();
        assert!(handler.shutdown_requested());
        assert!(!should_continue());
        assert!(handler.wait_for_signal(Duration::from_secs(30)));

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let mut coordinator = ShutdownCoordinator::new().unwrap();
        coordinator.register_cleanup(move || flag.store(true, Ordering::SeqCst));
        assert!(coordinator.sleep(Duration::from_secs(30)));
        coordinator.run_cleanup();
        assert!(ran.load(Ordering::SeqCst));

        reset();
    }
}
