/// Linux live mount table
/// Reads /proc/self/mountinfo (falling back to /proc/self/mounts) fresh on every call.
use crate::config::types::{MonitorError, Result};
use crate::core::types::MountRecord;
use crate::kernel::mount::MountSource;
use std::fs;
use std::path::{Path, PathBuf};

pub const PROC_MOUNTINFO: &str = "/proc/self/mountinfo";
pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Mount table backed by a procfs file.
#[derive(Debug, Clone)]
pub struct ProcMountTable {
    path: PathBuf,
}

impl ProcMountTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ProcMountTable {
    fn default() -> Self {
        Self::new(PROC_MOUNTINFO)
    }
}

impl MountSource for ProcMountTable {
    fn mounts(&self) -> Result<Vec<MountRecord>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(parse_table(&content)),
            Err(e) if self.path == Path::new(PROC_MOUNTINFO) => {
                log::warn!(
                    "Failed to read {}: {}; falling back to {}",
                    PROC_MOUNTINFO,
                    e,
                    PROC_MOUNTS
                );
                let content = fs::read_to_string(PROC_MOUNTS).map_err(|e| {
                    MonitorError::Enumeration(format!("Failed to read {}: {}", PROC_MOUNTS, e))
                })?;
                Ok(parse_table(&content))
            }
            Err(e) => Err(MonitorError::Enumeration(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

/// Parse either table format; each line is detected on its own.
pub fn parse_table(content: &str) -> Vec<MountRecord> {
    content
        .lines()
        .filter_map(|line| parse_mountinfo_line(line).or_else(|| parse_mounts_line(line)))
        .collect()
}

/// Parse a single line from /proc/self/mountinfo
/// Format: mount_id parent_id major:minor root mount_point options [optional...] - fs_type source super_options
pub fn parse_mountinfo_line(line: &str) -> Option<MountRecord> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() < 10 {
        return None;
    }

    parts[0].parse::<u32>().ok()?;
    parts[1].parse::<u32>().ok()?;
    let mount_point = unescape(parts[4]);

    // Optional fields end at the lone "-" separator
    let sep_pos = parts.iter().skip(6).position(|&p| p == "-")? + 6;
    if sep_pos + 2 >= parts.len() {
        return None;
    }

    let fs_type = unescape(parts[sep_pos + 1]);
    let source = unescape(parts[sep_pos + 2]);

    Some(MountRecord::new(mount_point, source, fs_type))
}

/// Parse a single line from /proc/self/mounts (fstab format)
/// Format: source mount_point fs_type options freq passno
pub fn parse_mounts_line(line: &str) -> Option<MountRecord> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 || !parts[1].starts_with('/') {
        return None;
    }
    Some(MountRecord::new(
        unescape(parts[1]),
        unescape(parts[0]),
        unescape(parts[2]),
    ))
}

/// The kernel escapes space, tab, newline and backslash as `\ooo`.
fn unescape(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_mountinfo_line() {
        let line = "25 30 0:23 / /sys rw,nosuid,nodev,noexec,relatime shared:7 - sysfs sysfs rw";
        let entry = parse_mountinfo_line(line).unwrap();

        assert_eq!(entry.path, PathBuf::from("/sys"));
        assert_eq!(entry.fs_type, "sysfs");
        assert_eq!(entry.source, "sysfs");
        assert!(entry.owner.is_none());
    }

    #[test]
    fn test_parse_nfs_mountinfo_line_without_optional_fields() {
        let line = "88 25 0:52 / /mnt/dead rw,relatime - nfs4 fileserver:/export/home rw,vers=4.2,hard";
        let entry = parse_mountinfo_line(line).unwrap();

        assert_eq!(entry.path, PathBuf::from("/mnt/dead"));
        assert_eq!(entry.fs_type, "nfs4");
        assert_eq!(entry.source, "fileserver:/export/home");
    }

    #[test]
    fn test_escaped_mount_point() {
        let line = r"90 25 0:60 / /media/usb\040stick rw - vfat /dev/sdb1 rw";
        let entry = parse_mountinfo_line(line).unwrap();
        assert_eq!(entry.path, PathBuf::from("/media/usb stick"));
    }

    #[test]
    fn test_parse_mounts_line() {
        let line = "fileserver:/export /data nfs rw,hard 0 0";
        let entry = parse_mounts_line(line).unwrap();
        assert_eq!(entry.path, PathBuf::from("/data"));
        assert_eq!(entry.source, "fileserver:/export");
        assert_eq!(entry.fs_type, "nfs");
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let table = "garbage\n\n36 35 98:0 /mnt1 /mnt2 rw - ext3 /dev/root rw\n";
        let entries = parse_table(table);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, PathBuf::from("/mnt2"));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("plain"), "plain");
        assert_eq!(unescape(r"a\040b"), "a b");
        assert_eq!(unescape(r"tab\011here"), "tab\there");
        assert_eq!(unescape(r"back\134slash"), "back\\slash");
        assert_eq!(unescape(r"trailing\04"), r"trailing\04");
    }

    #[test]
    fn test_table_file_is_read_fresh() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1 0 8:1 / / rw - ext4 /dev/sda1 rw").unwrap();
        let table = ProcMountTable::new(file.path());
        assert_eq!(table.mounts().unwrap().len(), 1);

        writeln!(file, "2 1 0:52 / /data rw - nfs srv:/data rw").unwrap();
        assert_eq!(table.mounts().unwrap().len(), 2);
    }

    #[test]
    fn test_unreadable_override_is_an_enumeration_error() {
        let table = ProcMountTable::new("/nonexistent/mountinfo");
        let err = table.mounts().unwrap_err();
        assert!(matches!(err, MonitorError::Enumeration(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_live_table_has_root() {
        let entries = ProcMountTable::default().mounts().unwrap();
        assert!(entries.iter().any(|e| e.path == Path::new("/")));
    }
}
