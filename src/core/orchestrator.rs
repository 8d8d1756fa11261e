//! Check Orchestrator: one pass over every enumerated mount.
//!
//! Checks run on a bounded pool of scoped worker threads. Each worker calls
//! the Timeout Supervisor, which owns its unit and deadline outright, so the
//! only thing workers share is the job queue. Outcomes are slotted back by
//! enumeration index so the report order never depends on completion order.

use crate::config::types::{Result, MAX_CONCURRENT_CHECKS};
use crate::core::probe::Probe;
use crate::core::supervisor::TimeoutSupervisor;
use crate::core::types::{CheckOutcome, CycleReport, MountRecord};
use crate::kernel::mount::MountSource;
use crate::observability::report::Reporter;
use crossbeam_channel::{bounded, unbounded};
use log::{debug, info, warn};
use std::sync::Arc;

pub struct Orchestrator {
    supervisor: TimeoutSupervisor,
    probe: Arc<dyn Probe>,
    max_concurrent: usize,
}

impl Orchestrator {
    /// `max_concurrent` is clamped to `1..=MAX_CONCURRENT_CHECKS`.
    pub fn new(supervisor: TimeoutSupervisor, probe: Arc<dyn Probe>, max_concurrent: usize) -> Self {
        Self {
            supervisor,
            probe,
            max_concurrent: max_concurrent.clamp(1, MAX_CONCURRENT_CHECKS),
        }
    }

    pub fn supervisor(&self) -> &TimeoutSupervisor {
        &self.supervisor
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Enumerate, check every mount once, sweep, and report.
    ///
    /// Only enumeration failure fails the cycle; it is reported and returned
    /// so the caller can retry at the next interval. A cycle cut short by
    /// shutdown is returned marked `interrupted` and never reported, so
    /// cancelled checks cannot show up as dead mounts.
    pub fn run_cycle(&self, source: &dyn MountSource, reporter: &dyn Reporter) -> Result<CycleReport> {
        let mut report = CycleReport::begin();

        let mounts = match source.mounts() {
            Ok(mounts) => mounts,
            Err(e) => {
                reporter.enumeration_failed(&e);
                return Err(e);
            }
        };
        debug!("Cycle {}: {} mounts to check", report.cycle_id, mounts.len());

        let outcomes = self.check_all(&mounts);
        for (mount, outcome) in mounts.iter().zip(outcomes) {
            report.record(mount, outcome);
        }

        let swept = self.supervisor.registry().sweep();
        if swept.still_running > 0 {
            warn!("{} killed probe(s) still not exited", swept.still_running);
        }

        let report = report.finish();
        if report.interrupted {
            info!("Cycle {} interrupted by shutdown; not reported", report.cycle_id);
            return Ok(report);
        }
        reporter.cycle_completed(&report);
        Ok(report)
    }

    /// One outcome per mount, in the order given. Once the registry is
    /// cancelled, jobs still queued resolve as `Cancelled` without forking.
    pub fn check_all(&self, mounts: &[MountRecord]) -> Vec<CheckOutcome> {
        let workers = self.max_concurrent.min(mounts.len());
        if workers <= 1 {
            return mounts
                .iter()
                .map(|mount| self.supervisor.check(&*self.probe, mount))
                .collect();
        }

        let (job_tx, job_rx) = bounded(mounts.len());
        for job in mounts.iter().enumerate() {
            // Capacity equals the job count; this never blocks.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let (result_tx, result_rx) = unbounded();
        let supervisor = &self.supervisor;
        let probe = &*self.probe;

        std::thread::scope(|scope| {
            let mut started = 0;
            for n in 0..workers {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("check-worker-{}", n))
                    .spawn_scoped(scope, move || {
                        for (index, mount) in jobs {
                            if supervisor.registry().is_cancelled() {
                                break;
                            }
                            let _ = results.send((index, supervisor.check(probe, mount)));
                        }
                    });
                match spawned {
                    Ok(_) => started += 1,
                    Err(e) => warn!("Failed to start check worker {}: {}", n, e),
                }
            }

            if started == 0 {
                for (index, mount) in job_rx.iter() {
                    let _ = result_tx.send((index, supervisor.check(probe, mount)));
                }
            }
        });
        drop(result_tx);

        let cancelled = self.supervisor.registry().is_cancelled();
        let mut slots: Vec<Option<CheckOutcome>> = vec![None; mounts.len()];
        for (index, outcome) in result_rx.try_iter() {
            slots[index] = Some(outcome);
        }
        slots
            .into_iter()
            .map(|slot| match slot {
                Some(outcome) => outcome,
                None if cancelled => CheckOutcome::Cancelled,
                None => CheckOutcome::InternalError("check did not complete".to_string()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::MonitorError;
    use crate::core::probe::{DirectoryProbe, ProbeTarget, ProbeVerdict};
    use crate::core::registry::InFlightRegistry;
    use crate::kernel::mount::StaticMountTable;
    use crate::observability::metrics::MetricsRegistry;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<CycleReport>>,
        failures: Mutex<Vec<String>>,
    }

    impl Reporter for Recorder {
        fn cycle_completed(&self, report: &CycleReport) {
            self.reports.lock().unwrap().push(report.clone());
        }

        fn enumeration_failed(&self, error: &MonitorError) {
            self.failures.lock().unwrap().push(error.to_string());
        }
    }

    /// Hangs for any path ending in `dead`, sleeps briefly for `slow`, lists otherwise.
    struct Scripted;

    impl Probe for Scripted {
        fn probe(&self, target: &ProbeTarget) -> ProbeVerdict {
            let name = target.path().to_string_lossy();
            if name.ends_with("dead") {
                loop {
                    std::thread::sleep(Duration::from_secs(3600));
                }
            }
            if name.ends_with("slow") {
                std::thread::sleep(Duration::from_millis(150));
            }
            DirectoryProbe.probe(target)
        }
    }

    fn orchestrator(workers: usize) -> Orchestrator {
        let supervisor =
            TimeoutSupervisor::new(Duration::from_millis(300), Duration::from_secs(5), InFlightRegistry::new())
                .assume_owner(false)
                .with_metrics(Arc::new(MetricsRegistry::new()));
        Orchestrator::new(supervisor, Arc::new(Scripted), workers)
    }

    fn dirs(root: &Path, names: &[&str]) -> Vec<MountRecord> {
        names
            .iter()
            .map(|name| {
                let path = root.join(name);
                std::fs::create_dir(&path).unwrap();
                MountRecord::new(path, "srv:/export", "nfs")
            })
            .collect()
    }

    #[test]
    fn fan_out_is_clamped() {
        assert_eq!(orchestrator(0).max_concurrent(), 1);
        assert_eq!(orchestrator(10_000).max_concurrent(), MAX_CONCURRENT_CHECKS);
    }

    #[test]
    fn failures_keep_enumeration_order_under_concurrency() {
        let root = tempfile::tempdir().unwrap();
        let mounts = dirs(root.path(), &["a-dead", "b-slow", "c", "d-dead", "e"]);
        let source = StaticMountTable::new(mounts);
        let recorder = Recorder::default();

        let report = orchestrator(4).run_cycle(&source, &recorder).unwrap();

        assert_eq!(report.total_checked, 5);
        assert_eq!(report.dead_count, 2);
        assert_eq!(report.healthy_count(), 3);
        assert_eq!(report.failures.len(), report.dead_count);
        assert!(report.failures[0].path.ends_with("a-dead"));
        assert!(report.failures[1].path.ends_with("d-dead"));
        for failure in &report.failures {
            assert!(matches!(failure.outcome, CheckOutcome::TimedOut { terminated: true, .. }));
        }
        assert_eq!(recorder.reports.lock().unwrap().len(), 1);
    }

    #[test]
    fn concurrency_does_not_change_classification() {
        let root = tempfile::tempdir().unwrap();
        let mounts = dirs(root.path(), &["x-dead", "y", "z-slow"]);

        let sequential = orchestrator(1).check_all(&mounts);
        let parallel = orchestrator(3).check_all(&mounts);

        let labels = |outcomes: &[CheckOutcome]| outcomes.iter().map(|o| o.label()).collect::<Vec<_>>();
        assert_eq!(labels(&sequential), labels(&parallel));
        assert_eq!(labels(&parallel), vec!["timed_out", "healthy", "healthy"]);
    }

    struct Unreadable;

    impl MountSource for Unreadable {
        fn mounts(&self) -> Result<Vec<MountRecord>> {
            Err(MonitorError::Enumeration("mount table unreadable".to_string()))
        }
    }

    #[test]
    fn enumeration_failure_aborts_cycle_and_is_reported() {
        let recorder = Recorder::default();
        let err = orchestrator(2).run_cycle(&Unreadable, &recorder).unwrap_err();
        assert!(matches!(err, MonitorError::Enumeration(_)));
        assert_eq!(recorder.failures.lock().unwrap().len(), 1);
        assert!(recorder.reports.lock().unwrap().is_empty());
    }

    #[test]
    fn shutdown_stops_the_cycle_and_suppresses_its_report() {
        let root = tempfile::tempdir().unwrap();
        let mounts = dirs(root.path(), &["a-dead", "b-dead", "c-dead"]);
        let supervisor =
            TimeoutSupervisor::new(Duration::from_secs(30), Duration::from_secs(5), InFlightRegistry::new())
                .assume_owner(false)
                .with_metrics(Arc::new(MetricsRegistry::new()));
        let orchestrator = Orchestrator::new(supervisor, Arc::new(Scripted), 1);
        let recorder = Recorder::default();

        let started = std::time::Instant::now();
        let report = std::thread::scope(|s| {
            let cycle = s.spawn(|| orchestrator.run_cycle(&StaticMountTable::new(mounts), &recorder));
            std::thread::sleep(Duration::from_millis(300));
            orchestrator.supervisor().registry().terminate_all();
            cycle.join().unwrap().unwrap()
        });

        // Queued mounts were never probed: no waiting out their deadlines.
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(report.interrupted);
        assert_eq!(report.dead_count, 0);
        assert!(report.failures.is_empty());
        assert!(recorder.reports.lock().unwrap().is_empty());
        assert_eq!(orchestrator.supervisor().registry().in_flight_count(), 0);
    }

    #[test]
    fn empty_table_yields_empty_report() {
        let recorder = Recorder::default();
        let report = orchestrator(4)
            .run_cycle(&StaticMountTable::default(), &recorder)
            .unwrap();
        assert_eq!(report.total_checked, 0);
        assert_eq!(report.summary_line(), format!("Checked 0 mounts in {:.2} seconds", report.elapsed.as_secs_f64()));
    }
}
