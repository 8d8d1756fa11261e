/// BSD/macOS live mount table via getmntinfo(MNT_NOWAIT)
/// MNT_NOWAIT returns the kernel's cached statfs data and never asks the
/// filesystem itself, so a dead NFS server cannot stall enumeration.
use crate::config::types::{MonitorError, Result};
use crate::core::types::MountRecord;
use crate::kernel::mount::MountSource;
use nix::errno::Errno;
use std::ffi::CStr;

/// Mount table read through getmntinfo(3).
#[derive(Debug, Clone, Copy, Default)]
pub struct MntInfoTable;

impl MountSource for MntInfoTable {
    fn mounts(&self) -> Result<Vec<MountRecord>> {
        let mut entries: *mut libc::statfs = std::ptr::null_mut();
        // SAFETY: getmntinfo fills `entries` with a pointer to a buffer owned
        // by libc that stays valid until the next call on this thread.
        let count = unsafe { libc::getmntinfo(&mut entries, libc::MNT_NOWAIT) };
        if count <= 0 || entries.is_null() {
            return Err(MonitorError::Enumeration(format!(
                "getmntinfo failed: {}",
                Errno::last()
            )));
        }

        // SAFETY: count > 0 entries were returned at `entries`.
        let stats = unsafe { std::slice::from_raw_parts(entries, count as usize) };
        Ok(stats.iter().map(record_from_statfs).collect())
    }
}

fn record_from_statfs(stat: &libc::statfs) -> MountRecord {
    MountRecord::new(
        c_field(&stat.f_mntonname),
        c_field(&stat.f_mntfromname),
        c_field(&stat.f_fstypename),
    )
}

fn c_field(field: &[libc::c_char]) -> String {
    // SAFETY: the kernel NUL-terminates these fixed-size name buffers.
    unsafe { CStr::from_ptr(field.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn live_table_has_root() {
        let mounts = MntInfoTable.mounts().unwrap();
        assert!(mounts.iter().any(|m| m.path == Path::new("/")));
    }
}
