//! Single-shot deadline owned by one check.
//!
//! A deadline is a channel that delivers one tick at a fixed instant.
//! Disarming drops the receiver, so a disarmed deadline can never be
//! observed firing, no matter how long the owner lingers afterwards. There
//! is no process-wide timer and no signal handler involved.

use crate::core::types::CheckId;
use crossbeam_channel::{at, never, Receiver};
use std::time::{Duration, Instant};

pub struct Deadline {
    check_id: CheckId,
    expires_at: Instant,
    timer: Option<Receiver<Instant>>,
}

impl Deadline {
    /// Arm a deadline `timeout` from now for `check_id`.
    pub fn arm(check_id: CheckId, timeout: Duration) -> Self {
        let expires_at = Instant::now() + timeout;
        Self {
            check_id,
            expires_at,
            timer: Some(at(expires_at)),
        }
    }

    pub fn check_id(&self) -> CheckId {
        self.check_id
    }

    /// Receiver for `select!`; a disarmed deadline yields a channel that never fires.
    pub fn timer(&self) -> Receiver<Instant> {
        match &self.timer {
            Some(timer) => timer.clone(),
            None => never(),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Time left before expiry; zero once past it.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// True once the deadline passed while still armed.
    pub fn expired(&self) -> bool {
        self.is_armed() && self.remaining().is_zero()
    }

    pub fn disarm(&mut self) {
        self.timer = None;
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::select;

    #[test]
    fn armed_deadline_fires() {
        let deadline = Deadline::arm(CheckId::next(), Duration::from_millis(20));
        let fired = deadline.timer().recv_timeout(Duration::from_secs(5));
        assert!(fired.is_ok());
        assert!(deadline.expired());
    }

    #[test]
    fn disarmed_deadline_never_fires_even_after_delay() {
        let mut deadline = Deadline::arm(CheckId::next(), Duration::from_millis(20));
        deadline.disarm();
        // Delay well past the original expiry before observing the timer.
        std::thread::sleep(Duration::from_millis(100));
        assert!(!deadline.is_armed());
        assert!(!deadline.expired());
        assert!(deadline.timer().recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn select_prefers_completion_before_expiry() {
        let deadline = Deadline::arm(CheckId::next(), Duration::from_secs(30));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        done_tx.send(()).unwrap();
        let timer = deadline.timer();
        let completed = select! {
            recv(done_rx) -> _ => true,
            recv(timer) -> _ => false,
        };
        assert!(completed);
        assert!(deadline.remaining() > Duration::from_secs(20));
    }

    #[test]
    fn independent_deadlines_do_not_interfere() {
        let check_a = CheckId::next();
        let check_b = CheckId::next();
        let mut a = Deadline::arm(check_a, Duration::from_millis(10));
        let b = Deadline::arm(check_b, Duration::from_millis(10));
        a.disarm();
        assert!(b.timer().recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(a.timer().try_recv().is_err());
        assert_eq!(b.check_id(), check_b);
        assert_ne!(a.check_id(), b.check_id());
    }
}
