use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Identity and permission bits of a mountpoint directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOwner {
    pub uid: u32,
    pub gid: u32,
    /// Permission bits (`st_mode & 0o7777`)
    pub mode: u32,
}

impl MountOwner {
    /// True when the mode grants nobody any access at all.
    pub fn denies_all_access(&self) -> bool {
        self.mode & 0o777 == 0
    }
}

/// One mounted filesystem, read fresh from the live mount table each cycle.
///
/// `owner` is `None` when the enumerator did not resolve it: statting a
/// mountpoint from the supervisor could block on a dead mount, so the probe
/// resolves it inside the isolated unit instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    pub path: PathBuf,
    /// Backing device or server export (`server:/export`)
    pub source: String,
    pub fs_type: String,
    pub owner: Option<MountOwner>,
}

impl MountRecord {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>, fs_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            fs_type: fs_type.into(),
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: MountOwner) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Process-unique identifier for one Timeout Supervisor invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckId(u64);

static NEXT_CHECK_ID: AtomicU64 = AtomicU64::new(1);

impl CheckId {
    pub fn next() -> Self {
        Self(NEXT_CHECK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "check-{}", self.0)
    }
}

/// How a probe unit ended when it was not one of the known sentinels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exit status {}", code),
            Termination::Signaled(sig) => write!(f, "signal {}", sig),
        }
    }
}

/// Classified result of one check against one mount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CheckOutcome {
    Healthy,
    /// Deadline fired; `terminated` is false when the kill could not be confirmed.
    TimedOut { pid: i32, after_ms: u64, terminated: bool },
    /// The path could not be statted, its mode grants no access, or the
    /// owner was refused access. Not a dead mount, but not checked either.
    PermissionDenied { mode: Option<u32>, errno: Option<i32> },
    /// Listing the directory failed with an I/O error (EIO, ESTALE, ENOTCONN...).
    Unreadable { errno: i32 },
    ProbeCrashed(Termination),
    /// The monitor itself failed: identity change refused, or no probe unit could be created.
    InternalError(String),
    /// The enumerated record cannot be probed at all.
    EnumerationError(String),
    /// The monitor began shutting down before the check finished. Says
    /// nothing about the mount and is never counted as dead.
    Cancelled,
}

impl CheckOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, CheckOutcome::Healthy)
    }

    /// Failures that point at the monitor rather than the mount.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CheckOutcome::InternalError(_) | CheckOutcome::EnumerationError(_)
        )
    }

    /// Stable short label used for metrics and JSON output.
    pub fn label(&self) -> &'static str {
        match self {
            CheckOutcome::Healthy => "healthy",
            CheckOutcome::TimedOut { .. } => "timed_out",
            CheckOutcome::PermissionDenied { .. } => "permission_denied",
            CheckOutcome::Unreadable { .. } => "unreadable",
            CheckOutcome::ProbeCrashed(_) => "probe_crashed",
            CheckOutcome::InternalError(_) => "internal_error",
            CheckOutcome::EnumerationError(_) => "enumeration_error",
            CheckOutcome::Cancelled => "cancelled",
        }
    }
}

/// Whole seconds print without a fraction ("60"), sub-second deadlines keep one ("0.2").
pub fn secs(ms: u64) -> String {
    if ms % 1000 == 0 {
        (ms / 1000).to_string()
    } else {
        format!("{:.1}", ms as f64 / 1000.0)
    }
}

pub fn errno_text(errno: i32) -> String {
    format!("{} ({})", std::io::Error::from_raw_os_error(errno), errno)
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Healthy => write!(f, "healthy"),
            CheckOutcome::TimedOut { pid, after_ms, terminated: true } => {
                write!(f, "timed out, probe pid {} killed after {}s", pid, secs(*after_ms))
            }
            CheckOutcome::TimedOut { pid, after_ms, terminated: false } => write!(
                f,
                "timed out, probe pid {} not confirmed dead after {}s",
                pid,
                secs(*after_ms)
            ),
            CheckOutcome::PermissionDenied { mode: Some(mode), .. } => {
                write!(f, "not accessible (mode {:04o})", mode)
            }
            CheckOutcome::PermissionDenied { mode: None, errno: Some(errno) } => {
                write!(f, "not accessible: {}", errno_text(*errno))
            }
            CheckOutcome::PermissionDenied { mode: None, errno: None } => {
                write!(f, "not accessible")
            }
            CheckOutcome::Unreadable { errno } => {
                write!(f, "directory listing failed: {}", errno_text(*errno))
            }
            CheckOutcome::ProbeCrashed(termination) => write!(f, "probe ended with {}", termination),
            CheckOutcome::InternalError(reason) => write!(f, "monitor error: {}", reason),
            CheckOutcome::EnumerationError(reason) => write!(f, "cannot probe: {}", reason),
            CheckOutcome::Cancelled => write!(f, "cancelled by shutdown"),
        }
    }
}

/// One non-healthy entry of a cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountFailure {
    pub path: PathBuf,
    pub source: String,
    pub outcome: CheckOutcome,
}

/// Aggregate result of one pass over every enumerated mount.
///
/// Built by the orchestrator, handed to the reporter, then dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub total_checked: usize,
    pub dead_count: usize,
    /// Enumeration order, regardless of completion order.
    pub failures: Vec<MountFailure>,
    /// Shutdown cut the cycle short; its counts are incomplete.
    #[serde(default)]
    pub interrupted: bool,
    #[serde(skip)]
    clock: Option<Instant>,
}

impl CycleReport {
    /// Start an empty report; the elapsed clock starts now.
    pub fn begin() -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            total_checked: 0,
            dead_count: 0,
            failures: Vec::new(),
            interrupted: false,
            clock: Some(Instant::now()),
        }
    }

    /// Record exactly one outcome for one mount. A cancelled check marks
    /// the whole cycle interrupted and is left out of the counts.
    pub fn record(&mut self, mount: &MountRecord, outcome: CheckOutcome) {
        if outcome == CheckOutcome::Cancelled {
            self.interrupted = true;
            return;
        }
        self.total_checked += 1;
        if !outcome.is_healthy() {
            self.dead_count += 1;
            self.failures.push(MountFailure {
                path: mount.path.clone(),
                source: mount.source.clone(),
                outcome,
            });
        }
    }

    /// Freeze the elapsed time.
    pub fn finish(mut self) -> Self {
        if let Some(clock) = self.clock.take() {
            self.elapsed = clock.elapsed();
        }
        self
    }

    pub fn healthy_count(&self) -> usize {
        self.total_checked - self.dead_count
    }

    pub fn summary_line(&self) -> String {
        let base = format!(
            "Checked {} mounts in {:.2} seconds",
            self.total_checked,
            self.elapsed.as_secs_f64()
        );
        if self.dead_count == 0 {
            base
        } else {
            format!("{}: {} dead", base, self.dead_count)
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(path: &str) -> MountRecord {
        MountRecord::new(path, "server:/export", "nfs")
    }

    #[test]
    fn report_counts_stay_consistent() {
        let mut report = CycleReport::begin();
        report.record(&mount("/data"), CheckOutcome::Healthy);
        report.record(
            &mount("/mnt/dead"),
            CheckOutcome::TimedOut { pid: 4242, after_ms: 60_000, terminated: true },
        );
        report.record(
            &mount("/mnt/locked"),
            CheckOutcome::PermissionDenied { mode: Some(0), errno: None },
        );
        let report = report.finish();

        assert_eq!(report.total_checked, 3);
        assert_eq!(report.dead_count, 2);
        assert_eq!(report.healthy_count(), 1);
        assert_eq!(report.failures.len(), report.dead_count);
        assert_eq!(report.failures[0].path, PathBuf::from("/mnt/dead"));
        assert_eq!(report.failures[1].path, PathBuf::from("/mnt/locked"));
    }

    #[test]
    fn summary_line_omits_dead_suffix_when_all_healthy() {
        let mut report = CycleReport::begin();
        report.record(&mount("/data"), CheckOutcome::Healthy);
        report.elapsed = Duration::from_millis(1500);
        assert_eq!(report.summary_line(), "Checked 1 mounts in 1.50 seconds");

        report.record(&mount("/mnt/dead"), CheckOutcome::Unreadable { errno: libc::EIO });
        assert_eq!(
            report.summary_line(),
            "Checked 2 mounts in 1.50 seconds: 1 dead"
        );
    }

    #[test]
    fn cancelled_check_interrupts_without_counting_dead() {
        let mut report = CycleReport::begin();
        report.record(&mount("/data"), CheckOutcome::Healthy);
        report.record(&mount("/mnt/slow"), CheckOutcome::Cancelled);
        let report = report.finish();

        assert!(report.interrupted);
        assert_eq!(report.total_checked, 1);
        assert_eq!(report.dead_count, 0);
        assert!(report.failures.is_empty());
        assert_eq!(report.total_checked, report.dead_count + report.healthy_count());
    }

    #[test]
    fn outcome_display_carries_detail() {
        let timed_out = CheckOutcome::TimedOut { pid: 77, after_ms: 60_000, terminated: true };
        assert_eq!(timed_out.to_string(), "timed out, probe pid 77 killed after 60s");

        let denied = CheckOutcome::PermissionDenied { mode: Some(0), errno: None };
        assert_eq!(denied.to_string(), "not accessible (mode 0000)");

        let crashed = CheckOutcome::ProbeCrashed(Termination::Signaled(11));
        assert_eq!(crashed.to_string(), "probe ended with signal 11");
    }

    #[test]
    fn owner_mode_zero_denies_everything() {
        let owner = MountOwner { uid: 1000, gid: 1000, mode: 0 };
        assert!(owner.denies_all_access());
        let sticky_only = MountOwner { uid: 0, gid: 0, mode: 0o1000 };
        assert!(sticky_only.denies_all_access());
        let readable = MountOwner { uid: 0, gid: 0, mode: 0o500 };
        assert!(!readable.denies_all_access());
    }

    #[test]
    fn check_ids_are_unique() {
        let a = CheckId::next();
        let b = CheckId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn report_serializes_outcome_tags() {
        let mut report = CycleReport::begin();
        report.record(
            &mount("/mnt/dead"),
            CheckOutcome::TimedOut { pid: 9, after_ms: 200, terminated: true },
        );
        let json = serde_json::to_value(report.finish()).unwrap();
        assert_eq!(json["dead_count"], 1);
        assert_eq!(json["failures"][0]["outcome"]["outcome"], "timed_out");
    }
}
