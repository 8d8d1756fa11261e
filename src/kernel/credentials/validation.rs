//! Credential validation logic.

use super::CredentialError;
use nix::errno::Errno;

/// `(uid_t)-1` / `(gid_t)-1` mean "leave unchanged" to the set*id calls,
/// which would silently skip the identity change.
const UNCHANGED_ID: u32 = u32::MAX;

/// Reject ids the kernel would interpret as "no change".
pub fn validate_ids(uid: u32, gid: u32) -> Result<(), CredentialError> {
    if uid == UNCHANGED_ID {
        return Err(CredentialError::new("validate uid", Errno::EINVAL));
    }
    if gid == UNCHANGED_ID {
        return Err(CredentialError::new("validate gid", Errno::EINVAL));
    }
    Ok(())
}
