//! The Probe: list one mountpoint's directory as its owner.
//!
//! A probe body runs inside a freshly forked child. It must not log, take
//! locks, or touch anything shared with the supervisor's threads; its whole
//! answer is an exit code plus one fixed-size status record.
//!
//! Exit sentinels follow sysexits(3):
//!
//! | code | meaning |
//! |------|---------|
//! | 0    | directory listed |
//! | 77   | `EX_NOPERM`: stat failed, mode grants nothing, or open refused |
//! | 74   | `EX_IOERR`: open or readdir failed with an I/O error |
//! | 71   | `EX_OSERR`: the owner's identity could not be assumed |
//!
//! Anything else, including death by signal, is a crashed probe.

use crate::core::types::{MountOwner, MountRecord};
use crate::kernel::credentials::assume_identity;
use nix::dir::Dir;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::{stat, Mode};
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

pub const EXIT_HEALTHY: i32 = 0;
pub const EXIT_PERMISSION_DENIED: i32 = 77;
pub const EXIT_UNREADABLE: i32 = 74;
pub const EXIT_IDENTITY_FAILED: i32 = 71;

/// Size of the status record a probe child writes before exiting.
pub const RECORD_LEN: usize = 20;

const KIND_HEALTHY: u8 = 1;
const KIND_PERMISSION_DENIED: u8 = 2;
const KIND_UNREADABLE: u8 = 3;
const KIND_IDENTITY_FAILED: u8 = 4;

const HAS_MODE: u8 = 0b01;
const HAS_ERRNO: u8 = 0b10;

/// Everything a probe needs, prepared before fork so the child never allocates.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    path: CString,
    display: PathBuf,
    owner: Option<MountOwner>,
    assume_owner: bool,
}

impl ProbeTarget {
    /// Fails when the path cannot be passed to the kernel (interior NUL).
    pub fn new(record: &MountRecord, assume_owner: bool) -> Result<Self, String> {
        let path = CString::new(record.path.as_os_str().as_bytes())
            .map_err(|_| format!("path {:?} contains a NUL byte", record.path))?;
        Ok(Self {
            path,
            display: record.path.clone(),
            owner: record.owner,
            assume_owner,
        })
    }

    pub fn c_path(&self) -> &CStr {
        &self.path
    }

    pub fn path(&self) -> &Path {
        &self.display
    }

    pub fn owner(&self) -> Option<MountOwner> {
        self.owner
    }

    pub fn assume_owner(&self) -> bool {
        self.assume_owner
    }
}

/// What a probe child reports back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeVerdict {
    Healthy,
    PermissionDenied { mode: Option<u32>, errno: Option<i32> },
    Unreadable { errno: i32 },
    IdentityFailed { uid: u32, gid: u32, errno: i32 },
}

impl ProbeVerdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            ProbeVerdict::Healthy => EXIT_HEALTHY,
            ProbeVerdict::PermissionDenied { .. } => EXIT_PERMISSION_DENIED,
            ProbeVerdict::Unreadable { .. } => EXIT_UNREADABLE,
            ProbeVerdict::IdentityFailed { .. } => EXIT_IDENTITY_FAILED,
        }
    }

    /// Layout: kind u8, flags u8, 2 pad, errno i32, mode u32, uid u32, gid u32 (native endian).
    pub fn to_record(&self) -> [u8; RECORD_LEN] {
        let (kind, mode, errno, uid, gid) = match *self {
            ProbeVerdict::Healthy => (KIND_HEALTHY, None, None, 0, 0),
            ProbeVerdict::PermissionDenied { mode, errno } => {
                (KIND_PERMISSION_DENIED, mode, errno, 0, 0)
            }
            ProbeVerdict::Unreadable { errno } => (KIND_UNREADABLE, None, Some(errno), 0, 0),
            ProbeVerdict::IdentityFailed { uid, gid, errno } => {
                (KIND_IDENTITY_FAILED, None, Some(errno), uid, gid)
            }
        };

        let mut flags = 0;
        if mode.is_some() {
            flags |= HAS_MODE;
        }
        if errno.is_some() {
            flags |= HAS_ERRNO;
        }

        let mut record = [0u8; RECORD_LEN];
        record[0] = kind;
        record[1] = flags;
        record[4..8].copy_from_slice(&errno.unwrap_or(0).to_ne_bytes());
        record[8..12].copy_from_slice(&mode.unwrap_or(0).to_ne_bytes());
        record[12..16].copy_from_slice(&uid.to_ne_bytes());
        record[16..20].copy_from_slice(&gid.to_ne_bytes());
        record
    }

    pub fn from_record(record: &[u8; RECORD_LEN]) -> Option<Self> {
        let word = |at: usize| [record[at], record[at + 1], record[at + 2], record[at + 3]];
        let flags = record[1];
        let errno = i32::from_ne_bytes(word(4));
        let mode = u32::from_ne_bytes(word(8));
        let uid = u32::from_ne_bytes(word(12));
        let gid = u32::from_ne_bytes(word(16));

        let verdict = match record[0] {
            KIND_HEALTHY => ProbeVerdict::Healthy,
            KIND_PERMISSION_DENIED => ProbeVerdict::PermissionDenied {
                mode: (flags & HAS_MODE != 0).then_some(mode),
                errno: (flags & HAS_ERRNO != 0).then_some(errno),
            },
            KIND_UNREADABLE => ProbeVerdict::Unreadable { errno },
            KIND_IDENTITY_FAILED => ProbeVerdict::IdentityFailed { uid, gid, errno },
            _ => return None,
        };
        Some(verdict)
    }
}

/// One unit of work against one mountpoint.
///
/// `probe` runs in the isolated child; implementations must stick to raw
/// system calls and must not return before every handle they opened is closed.
pub trait Probe: Send + Sync {
    fn probe(&self, target: &ProbeTarget) -> ProbeVerdict;
}

/// stat, check mode, become the owner, then open and read the whole directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryProbe;

impl Probe for DirectoryProbe {
    fn probe(&self, target: &ProbeTarget) -> ProbeVerdict {
        let owner = match target.owner() {
            Some(owner) => owner,
            None => match stat_owner(target.c_path()) {
                Ok(owner) => owner,
                Err(errno) => {
                    return ProbeVerdict::PermissionDenied {
                        mode: None,
                        errno: Some(errno as i32),
                    }
                }
            },
        };

        if owner.denies_all_access() {
            return ProbeVerdict::PermissionDenied {
                mode: Some(owner.mode),
                errno: None,
            };
        }

        if target.assume_owner() {
            if let Err(err) = assume_identity(owner.uid, owner.gid) {
                return ProbeVerdict::IdentityFailed {
                    uid: owner.uid,
                    gid: owner.gid,
                    errno: err.errno as i32,
                };
            }
        }

        match list_directory(target.c_path()) {
            Ok(_entries) => ProbeVerdict::Healthy,
            Err(errno @ (Errno::EACCES | Errno::EPERM)) => ProbeVerdict::PermissionDenied {
                mode: Some(owner.mode),
                errno: Some(errno as i32),
            },
            Err(errno) => ProbeVerdict::Unreadable {
                errno: errno as i32,
            },
        }
    }
}

/// Owner and permission bits of `path`.
pub fn stat_owner(path: &CStr) -> Result<MountOwner, Errno> {
    let st = stat(path)?;
    Ok(MountOwner {
        uid: st.st_uid,
        gid: st.st_gid,
        mode: (st.st_mode as u32) & 0o7777,
    })
}

/// Read every entry; the count only proves the filesystem answered.
/// The directory handle is closed when `dir` drops, on every path.
fn list_directory(path: &CStr) -> Result<usize, Errno> {
    let mut dir = Dir::open(
        path,
        OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
        Mode::empty(),
    )?;
    let mut entries = 0;
    for entry in dir.iter() {
        entry?;
        entries += 1;
    }
    Ok(entries)
}
