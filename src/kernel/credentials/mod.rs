//! UID/GID transitions used by the probe to act as the mountpoint owner.
//!
//! CRITICAL: the group identity MUST be set BEFORE the user identity. Once
//! the user id is dropped the process may no longer change its groups, and
//! setting them in the other order leaves a window with excess privilege.

mod transition;
mod validation;

use crate::config::types::MonitorError;
use nix::errno::Errno;
use std::fmt;

pub use transition::{assume_identity, CredentialTransition, GroupSet, GroupsCleared, Unchanged};
pub use validation::validate_ids;

/// A refused identity change: which step failed and the raw errno.
///
/// Allocation-free so it can be produced inside a freshly forked child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CredentialError {
    pub step: &'static str,
    pub errno: Errno,
}

impl CredentialError {
    pub fn new(step: &'static str, errno: Errno) -> Self {
        Self { step, errno }
    }
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.step, self.errno.desc())
    }
}

impl std::error::Error for CredentialError {}

impl From<CredentialError> for MonitorError {
    fn from(err: CredentialError) -> Self {
        MonitorError::Privilege(err.to_string())
    }
}

/// Effective user and group of the calling process.
pub fn effective_identity() -> (u32, u32) {
    (
        nix::unistd::geteuid().as_raw(),
        nix::unistd::getegid().as_raw(),
    )
}

/// True when running with root's effective uid.
pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}
