//! Identity transition to a mountpoint owner.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid. The type-state chain
//! below makes the reverse order unrepresentable.
//!
//! Everything here runs inside the forked probe child: no logging, no locks.

use super::validation::validate_ids;
use super::CredentialError;
use nix::errno::Errno;
use nix::unistd::{getegid, geteuid, getgid, getuid};
use std::marker::PhantomData;

/// Nothing changed yet.
pub struct Unchanged;
/// Supplementary groups dropped.
pub struct GroupsCleared;
/// Real, effective and saved GIDs set.
pub struct GroupSet;

/// One in-progress transition to `(uid, gid)`.
pub struct CredentialTransition<State> {
    uid: u32,
    gid: u32,
    _state: PhantomData<State>,
}

impl CredentialTransition<Unchanged> {
    pub fn new(uid: u32, gid: u32) -> Result<Self, CredentialError> {
        validate_ids(uid, gid)?;
        Ok(Self {
            uid,
            gid,
            _state: PhantomData,
        })
    }

    /// Drop every supplementary group. Only root can (or needs to) do this.
    pub fn clear_supplementary_groups(self) -> Result<CredentialTransition<GroupsCleared>, CredentialError> {
        if geteuid().is_root() {
            // SAFETY: a zero-length list never dereferences the pointer.
            let rc = unsafe { libc::setgroups(0, std::ptr::null()) };
            if rc != 0 {
                return Err(CredentialError::new("setgroups", Errno::last()));
            }
        }
        Ok(self.advance())
    }
}

impl CredentialTransition<GroupsCleared> {
    /// MUST happen before `set_user`.
    pub fn set_group(self) -> Result<CredentialTransition<GroupSet>, CredentialError> {
        set_gid(self.gid)?;
        Ok(self.advance())
    }
}

impl CredentialTransition<GroupSet> {
    /// Final step: set the user ids, then confirm the kernel agrees.
    pub fn set_user(self) -> Result<(), CredentialError> {
        set_uid(self.uid)?;
        verify_transition(self.uid, self.gid)
    }
}

impl<State> CredentialTransition<State> {
    fn advance<Next>(self) -> CredentialTransition<Next> {
        CredentialTransition {
            uid: self.uid,
            gid: self.gid,
            _state: PhantomData,
        }
    }
}

/// Become `(uid, gid)`: validate -> clear groups -> set GID -> set UID -> verify.
///
/// A no-op when the process already runs as exactly that identity, so an
/// unprivileged monitor can still probe its own mounts.
pub fn assume_identity(uid: u32, gid: u32) -> Result<(), CredentialError> {
    validate_ids(uid, gid)?;

    if getuid().as_raw() == uid
        && geteuid().as_raw() == uid
        && getgid().as_raw() == gid
        && getegid().as_raw() == gid
    {
        return Ok(());
    }

    CredentialTransition::new(uid, gid)?
        .clear_supplementary_groups()?
        .set_group()?
        .set_user()
}

fn set_gid(gid: u32) -> Result<(), CredentialError> {
    #[cfg(target_os = "linux")]
    // SAFETY: setresgid atomically sets all three GIDs. gid validated != -1 by caller.
    let rc = unsafe { libc::setresgid(gid as libc::gid_t, gid as libc::gid_t, gid as libc::gid_t) };

    #[cfg(not(target_os = "linux"))]
    // SAFETY: as root, setgid sets real, effective and saved GIDs.
    let rc = unsafe { libc::setgid(gid as libc::gid_t) };

    if rc != 0 {
        return Err(CredentialError::new("setresgid", Errno::last()));
    }
    Ok(())
}

/// MUST be called AFTER set_gid.
fn set_uid(uid: u32) -> Result<(), CredentialError> {
    #[cfg(target_os = "linux")]
    // SAFETY: setresuid atomically sets all three UIDs. uid validated != -1 by caller.
    let rc = unsafe { libc::setresuid(uid as libc::uid_t, uid as libc::uid_t, uid as libc::uid_t) };

    #[cfg(not(target_os = "linux"))]
    // SAFETY: as root, setuid sets real, effective and saved UIDs.
    let rc = unsafe { libc::setuid(uid as libc::uid_t) };

    if rc != 0 {
        return Err(CredentialError::new("setresuid", Errno::last()));
    }
    Ok(())
}

fn verify_transition(expected_uid: u32, expected_gid: u32) -> Result<(), CredentialError> {
    if getuid().as_raw() != expected_uid || geteuid().as_raw() != expected_uid {
        return Err(CredentialError::new("verify uid", Errno::EPERM));
    }
    if getgid().as_raw() != expected_gid || getegid().as_raw() != expected_gid {
        return Err(CredentialError::new("verify gid", Errno::EPERM));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assume_current_identity_is_a_noop() {
        let uid = getuid().as_raw();
        let gid = getgid().as_raw();
        if uid != geteuid().as_raw() || gid != getegid().as_raw() {
            return;
        }
        assert!(assume_identity(uid, gid).is_ok());
        assert_eq!(geteuid().as_raw(), uid);
    }

    #[test]
    fn assume_identity_rejects_unchanged_sentinel() {
        let err = assume_identity(u32::MAX, 0).unwrap_err();
        assert_eq!(err.errno, Errno::EINVAL);
    }

    #[test]
    fn transition_constructor_validates() {
        assert!(CredentialTransition::new(1000, u32::MAX).is_err());
        assert!(CredentialTransition::new(1000, 1000).is_ok());
    }
}
