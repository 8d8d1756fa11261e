// Mount health metrics
//
// Counters, gauges, and a histogram for:
// - Mount counts per cycle (total / dead), under the names operators alert on
// - Check outcomes by kind
// - Forced terminations and terminations that could not be confirmed
// - Mount table read failures
// - Cycle duration
//
// Exposition is Prometheus text format, optionally written to a
// textfile-collector path after every cycle. Nothing is pushed over the network.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::{MonitorError, Result};
use crate::core::types::{CheckOutcome, CycleReport};
use crate::observability::report::Reporter;

/// Counter metric (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric (set to the latest value)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Histogram bucket
#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

/// Histogram for cycle durations
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // microseconds
    count: AtomicU64,
}

impl Histogram {
    /// Buckets sized for whole cycles: milliseconds when healthy, deadline-long when not.
    pub fn new_cycle() -> Self {
        let bucket_bounds = [0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

        Self {
            buckets: bucket_bounds
                .into_iter()
                .map(|le| HistogramBucket {
                    le,
                    count: AtomicU64::new(0),
                })
                .collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum.fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 0.0001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Latest cycle
    pub total_mountpoints: Gauge,
    pub dead_mountpoints: Gauge,

    // Check outcomes
    pub checks_healthy: Counter,
    pub checks_timed_out: Counter,
    pub checks_permission_denied: Counter,
    pub checks_unreadable: Counter,
    pub checks_probe_crashed: Counter,
    pub checks_internal_error: Counter,
    pub checks_enumeration_error: Counter,

    // Termination
    pub forced_kills: Counter,
    pub kill_failures: Counter,

    // Cycles
    pub cycles_total: Counter,
    pub enumeration_failures: Counter,
    pub cycle_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            total_mountpoints: Gauge::new(),
            dead_mountpoints: Gauge::new(),

            checks_healthy: Counter::new(),
            checks_timed_out: Counter::new(),
            checks_permission_denied: Counter::new(),
            checks_unreadable: Counter::new(),
            checks_probe_crashed: Counter::new(),
            checks_internal_error: Counter::new(),
            checks_enumeration_error: Counter::new(),

            forced_kills: Counter::new(),
            kill_failures: Counter::new(),

            cycles_total: Counter::new(),
            enumeration_failures: Counter::new(),
            cycle_duration: Histogram::new_cycle(),
        }
    }

    fn outcome_counter(&self, outcome: &CheckOutcome) -> Option<&Counter> {
        match outcome {
            CheckOutcome::Healthy => Some(&self.checks_healthy),
            CheckOutcome::TimedOut { .. } => Some(&self.checks_timed_out),
            CheckOutcome::PermissionDenied { .. } => Some(&self.checks_permission_denied),
            CheckOutcome::Unreadable { .. } => Some(&self.checks_unreadable),
            CheckOutcome::ProbeCrashed(_) => Some(&self.checks_probe_crashed),
            CheckOutcome::InternalError(_) => Some(&self.checks_internal_error),
            CheckOutcome::EnumerationError(_) => Some(&self.checks_enumeration_error),
            CheckOutcome::Cancelled => None,
        }
    }

    /// Record one finished cycle
    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycles_total.inc();
        self.total_mountpoints.set(report.total_checked as u64);
        self.dead_mountpoints.set(report.dead_count as u64);
        self.checks_healthy.add(report.healthy_count() as u64);
        for failure in &report.failures {
            if let Some(counter) = self.outcome_counter(&failure.outcome) {
                counter.inc();
            }
        }
        self.cycle_duration.observe(report.elapsed);
    }

    pub fn record_enumeration_failure(&self) {
        self.enumeration_failures.inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self, instance: &str) -> String {
        let mut output = String::new();
        let label = format!("instance=\"{}\"", escape_label(instance));

        output.push_str("# HELP total_mountpoints Mountpoints checked in the last cycle\n");
        output.push_str("# TYPE total_mountpoints gauge\n");
        output.push_str(&format!("total_mountpoints{{{}}} {}\n", label, self.total_mountpoints.get()));

        output.push_str("# HELP dead_mountpoints Mountpoints that failed their check in the last cycle\n");
        output.push_str("# TYPE dead_mountpoints gauge\n");
        output.push_str(&format!("dead_mountpoints{{{}}} {}\n", label, self.dead_mountpoints.get()));

        output.push_str("# HELP mountwatch_checks_total Checks by outcome\n");
        output.push_str("# TYPE mountwatch_checks_total counter\n");
        for (outcome, counter) in [
            ("healthy", &self.checks_healthy),
            ("timed_out", &self.checks_timed_out),
            ("permission_denied", &self.checks_permission_denied),
            ("unreadable", &self.checks_unreadable),
            ("probe_crashed", &self.checks_probe_crashed),
            ("internal_error", &self.checks_internal_error),
            ("enumeration_error", &self.checks_enumeration_error),
        ] {
            output.push_str(&format!(
                "mountwatch_checks_total{{{},outcome=\"{}\"}} {}\n",
                label,
                outcome,
                counter.get()
            ));
        }

        for (name, help, counter) in [
            ("mountwatch_forced_kills_total", "Probes killed at their deadline", &self.forced_kills),
            (
                "mountwatch_kill_failures_total",
                "Killed probes not confirmed dead within the grace period",
                &self.kill_failures,
            ),
            (
                "mountwatch_enumeration_failures_total",
                "Cycles skipped because the mount table could not be read",
                &self.enumeration_failures,
            ),
            ("mountwatch_cycles_total", "Completed check cycles", &self.cycles_total),
        ] {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{}{{{}}} {}\n", name, label, counter.get()));
        }

        output.push_str("# HELP mountwatch_cycle_duration_seconds Wall time of one check cycle\n");
        output.push_str("# TYPE mountwatch_cycle_duration_seconds histogram\n");
        for bucket in &self.cycle_duration.buckets {
            output.push_str(&format!(
                "mountwatch_cycle_duration_seconds_bucket{{{},le=\"{}\"}} {}\n",
                label,
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "mountwatch_cycle_duration_seconds_bucket{{{},le=\"+Inf\"}} {}\n",
            label,
            self.cycle_duration.get_count()
        ));
        output.push_str(&format!(
            "mountwatch_cycle_duration_seconds_sum{{{}}} {}\n",
            label,
            self.cycle_duration.get_sum_micros() as f64 / 1_000_000.0
        ));
        output.push_str(&format!(
            "mountwatch_cycle_duration_seconds_count{{{}}} {}\n",
            label,
            self.cycle_duration.get_count()
        ));

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}

/// Write `contents` next to `path` and rename over it, so a collector never
/// reads a half-written file.
pub fn write_textfile(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| MonitorError::Config(format!("metrics path {} has no file name", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Reporter that feeds the registry and refreshes the textfile.
pub struct MetricsReporter {
    metrics: Arc<MetricsRegistry>,
    instance: String,
    textfile: Option<PathBuf>,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<MetricsRegistry>, instance: impl Into<String>, textfile: Option<PathBuf>) -> Self {
        Self {
            metrics,
            instance: instance.into(),
            textfile,
        }
    }

    fn flush(&self) {
        if let Some(path) = &self.textfile {
            let text = self.metrics.export_prometheus(&self.instance);
            if let Err(e) = write_textfile(path, &text) {
                log::warn!("Failed to write metrics to {}: {}", path.display(), e);
            }
        }
    }
}

impl Reporter for MetricsReporter {
    fn cycle_completed(&self, report: &CycleReport) {
        self.metrics.record_cycle(report);
        self.flush();
    }

    fn enumeration_failed(&self, _error: &MonitorError) {
        self.metrics.record_enumeration_failure();
        self.flush();
    }
}
