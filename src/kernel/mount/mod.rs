//! Mount Enumerator
//!
//! Produces the current list of mounted filesystems from the live kernel
//! table. Nothing here stats or opens a mountpoint: a dead network mount
//! would block the caller, and the caller is the supervisor.

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
pub mod getmntinfo;
pub mod mountinfo;

use crate::config::types::Result;
use crate::core::types::MountRecord;
use std::collections::HashSet;
use std::path::PathBuf;

/// A source of mount records, read fresh on every call.
pub trait MountSource: Send + Sync {
    fn mounts(&self) -> Result<Vec<MountRecord>>;
}

impl<T: MountSource + ?Sized> MountSource for Box<T> {
    fn mounts(&self) -> Result<Vec<MountRecord>> {
        (**self).mounts()
    }
}

/// Fixed list of mounts; used by `check` on explicit paths and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticMountTable {
    records: Vec<MountRecord>,
}

impl StaticMountTable {
    pub fn new(records: Vec<MountRecord>) -> Self {
        Self { records }
    }
}

impl MountSource for StaticMountTable {
    fn mounts(&self) -> Result<Vec<MountRecord>> {
        Ok(self.records.clone())
    }
}

/// Drops mounts the operator asked us to ignore.
pub struct FilteredMounts<S> {
    inner: S,
    fs_types: HashSet<String>,
    paths: HashSet<PathBuf>,
}

impl<S: MountSource> FilteredMounts<S> {
    pub fn new(inner: S, fs_types: &[String], paths: &[PathBuf]) -> Self {
        Self {
            inner,
            fs_types: fs_types.iter().cloned().collect(),
            paths: paths.iter().cloned().collect(),
        }
    }

    fn keeps(&self, record: &MountRecord) -> bool {
        !self.fs_types.contains(&record.fs_type) && !self.paths.contains(&record.path)
    }
}

impl<S: MountSource> MountSource for FilteredMounts<S> {
    fn mounts(&self) -> Result<Vec<MountRecord>> {
        let mut records = self.inner.mounts()?;
        let before = records.len();
        records.retain(|record| self.keeps(record));
        log::debug!("Mount table: {} entries, {} ignored", before, before - records.len());
        Ok(records)
    }
}

/// The platform's live mount table.
///
/// `table_override` names an alternate mountinfo-format file; it is only
/// honoured on Linux.
#[cfg(target_os = "linux")]
pub fn live_mount_table(table_override: Option<PathBuf>) -> Box<dyn MountSource> {
    match table_override {
        Some(path) => Box::new(mountinfo::ProcMountTable::new(path)),
        None => Box::new(mountinfo::ProcMountTable::default()),
    }
}

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
pub fn live_mount_table(table_override: Option<PathBuf>) -> Box<dyn MountSource> {
    match table_override {
        Some(path) => Box::new(mountinfo::ProcMountTable::new(path)),
        None => Box::new(getmntinfo::MntInfoTable),
    }
}
