/// Core configuration and error types for mountwatch
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on concurrent probes in one cycle.
/// Unbounded forking on hosts with thousands of mounts is a resource-exhaustion risk.
pub const MAX_CONCURRENT_CHECKS: usize = 64;

/// Monitor configuration.
///
/// Every field has a default, so a config file only needs to name the
/// values it changes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds to sleep between cycles
    pub poll_interval_secs: u64,
    /// Per-check deadline in seconds
    pub check_timeout_secs: u64,
    /// How long to wait for a killed probe to disappear before giving up on it
    pub kill_grace_ms: u64,
    /// Worker pool fan-out for one cycle
    pub max_concurrent_checks: usize,
    /// Run each probe as the owner of the mountpoint
    pub assume_owner_identity: bool,
    /// Filesystem types never probed (e.g. "proc", "sysfs")
    pub ignore_fs_types: Vec<String>,
    /// Mountpoints never probed
    pub ignore_paths: Vec<PathBuf>,
    /// Alternate mountinfo file (Linux only)
    pub mount_table: Option<PathBuf>,
    /// Prometheus textfile-collector output, rewritten after every cycle
    pub metrics_textfile: Option<PathBuf>,
    /// `instance` label on exported metrics; hostname when unset
    pub instance: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            check_timeout_secs: 60,
            kill_grace_ms: 5_000,
            max_concurrent_checks: 4,
            assume_owner_identity: true,
            ignore_fs_types: Vec::new(),
            ignore_paths: Vec::new(),
            mount_table: None,
            metrics_textfile: None,
            instance: None,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Metrics `instance` label: configured value, else the hostname.
    pub fn instance_label(&self) -> String {
        if let Some(instance) = &self.instance {
            return instance.clone();
        }
        nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// Custom error types for mountwatch
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Mount enumeration error: {0}")]
    Enumeration(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Signal error: {0}")]
    Signal(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.check_timeout(), Duration::from_secs(60));
        assert_eq!(config.kill_grace(), Duration::from_secs(5));
        assert_eq!(config.max_concurrent_checks, 4);
        assert!(config.assume_owner_identity);
        assert!(config.metrics_textfile.is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"check_timeout_secs": 15, "ignore_fs_types": ["proc"]}"#)
                .unwrap();
        assert_eq!(config.check_timeout_secs, 15);
        assert_eq!(config.ignore_fs_types, vec!["proc".to_string()]);
        assert_eq!(config.poll_interval_secs, 60);
    }

    #[test]
    fn explicit_instance_label_wins() {
        let config = MonitorConfig {
            instance: Some("nfs-client-7".to_string()),
            ..MonitorConfig::default()
        };
        assert_eq!(config.instance_label(), "nfs-client-7");
    }

    #[test]
    fn error_display_names_the_category() {
        let err = MonitorError::Enumeration("mountinfo unreadable".to_string());
        assert_eq!(err.to_string(), "Mount enumeration error: mountinfo unreadable");
    }
}
