//! Integration tests for kernel module
//!
//! These tests verify cross-module interactions and ordering requirements.
//! Identity changes always happen inside a forked child so the test process
//! keeps its own credentials.

use mountwatch::kernel::credentials::{assume_identity, CredentialTransition};
use mountwatch::kernel::process::{reap, spawn_child, ExitKind};
use nix::unistd::{getegid, geteuid};

const NOBODY: u32 = 65534;

fn in_child(body: impl FnOnce() -> i32) -> i32 {
    let pid = spawn_child(body).unwrap();
    match reap(pid).unwrap() {
        ExitKind::Exited(code) => code,
        ExitKind::Signaled(sig) => panic!("child killed by {}", sig),
    }
}

#[test]
fn test_credential_transition_validates_before_syscall() {
    // (uid_t)-1 would make setresuid a silent no-op; reject it up front.
    assert!(assume_identity(u32::MAX, 1000).is_err());
    assert!(assume_identity(1000, u32::MAX).is_err());
    assert!(CredentialTransition::new(u32::MAX, u32::MAX).is_err());
}

#[test]
fn test_group_is_set_while_still_root() {
    if !geteuid().is_root() {
        return;
    }

    let code = in_child(|| {
        let groups_set = CredentialTransition::new(NOBODY, NOBODY)
            .and_then(|t| t.clear_supplementary_groups())
            .and_then(|t| t.set_group());
        let transition = match groups_set {
            Ok(transition) => transition,
            Err(_) => return 1,
        };
        // Group already switched, user still root: the only safe intermediate state.
        if getegid().as_raw() != NOBODY || !geteuid().is_root() {
            return 2;
        }
        match transition.set_user() {
            Ok(()) if geteuid().as_raw() == NOBODY => 0,
            _ => 3,
        }
    });
    assert_eq!(code, 0);
}

#[test]
fn test_identity_change_result_matches_privilege() {
    let root = geteuid().is_root();

    let code = in_child(|| match assume_identity(NOBODY, NOBODY) {
        Ok(()) => 0,
        Err(_) => 1,
    });

    if root {
        assert_eq!(code, 0, "root must be able to become nobody");
    } else {
        assert_eq!(code, 1, "an unprivileged process must not change identity");
    }
}

#[test]
fn test_no_panic_on_permission_denied() {
    // Refusals come back as errors, never panics.
    let code = in_child(|| {
        let _ = assume_identity(NOBODY, NOBODY);
        let _ = assume_identity(0, 0);
        0
    });
    assert_eq!(code, 0);
}

#[cfg(target_os = "linux")]
#[test]
fn test_live_mount_table_is_fresh_and_complete() {
    use mountwatch::kernel::mount::{live_mount_table, MountSource};
    use std::path::Path;

    let table = live_mount_table(None);
    let first = table.mounts().unwrap();
    let second = table.mounts().unwrap();

    assert!(first.iter().any(|m| m.path == Path::new("/")));
    assert!(first.iter().all(|m| m.owner.is_none()));
    assert!(!second.is_empty());
}
