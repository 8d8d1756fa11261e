use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::MonitorConfig;
use crate::config::validator::validate_config;
use crate::core::orchestrator::Orchestrator;
use crate::core::probe::DirectoryProbe;
use crate::core::registry::InFlightRegistry;
use crate::core::supervisor::TimeoutSupervisor;
use crate::core::types::MountRecord;
use crate::kernel::credentials::running_as_root;
use crate::kernel::mount::{live_mount_table, FilteredMounts, MountSource, StaticMountTable};
use crate::kernel::signal::{should_continue, ShutdownCoordinator};
use crate::observability::metrics::{get_metrics, MetricsReporter};
use crate::observability::report::{LogReporter, Reporters};

#[derive(Parser)]
#[command(author, version, about = "Detect hung and unreadable mountpoints", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,
    /// Per-check deadline in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
    /// Seconds between cycles (run only)
    #[arg(long, global = true)]
    interval: Option<u64>,
    /// Maximum concurrent checks
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    /// Alternate mountinfo-format table
    #[arg(long, global = true)]
    mount_table: Option<PathBuf>,
    /// Write Prometheus metrics to this file after every cycle
    #[arg(long, global = true)]
    metrics_textfile: Option<PathBuf>,
    /// Probe as the monitor's own identity instead of each mount's owner
    #[arg(long, global = true)]
    no_assume_owner: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check all mounts every interval until SIGINT/SIGTERM
    Run,
    /// Run one cycle and exit; status 1 if any mount is dead
    Check {
        /// Print the cycle report as JSON
        #[arg(long)]
        json: bool,
        /// Only check these mountpoints
        paths: Vec<PathBuf>,
    },
    /// Print the mounts that would be checked
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Config file first, then flags on top.
    fn resolve_config(&self) -> Result<MonitorConfig> {
        let mut config = MonitorConfig::load_or_default(self.config.as_deref())?;
        if let Some(timeout) = self.timeout {
            config.check_timeout_secs = timeout;
        }
        if let Some(interval) = self.interval {
            config.poll_interval_secs = interval;
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrent_checks = concurrency;
        }
        if self.mount_table.is_some() {
            config.mount_table = self.mount_table.clone();
        }
        if self.metrics_textfile.is_some() {
            config.metrics_textfile = self.metrics_textfile.clone();
        }
        if self.no_assume_owner {
            config.assume_owner_identity = false;
        }
        validate_config(&config)?;
        Ok(config)
    }
}

fn mount_source(config: &MonitorConfig) -> FilteredMounts<Box<dyn MountSource>> {
    FilteredMounts::new(
        live_mount_table(config.mount_table.clone()),
        &config.ignore_fs_types,
        &config.ignore_paths,
    )
}

fn build_orchestrator(config: &MonitorConfig, registry: InFlightRegistry) -> Orchestrator {
    let supervisor = TimeoutSupervisor::from_config(config, registry);
    Orchestrator::new(supervisor, Arc::new(DirectoryProbe), config.max_concurrent_checks)
}

fn build_reporters(config: &MonitorConfig) -> Reporters {
    Reporters::new().with(LogReporter).with(MetricsReporter::new(
        get_metrics(),
        config.instance_label(),
        config.metrics_textfile.clone(),
    ))
}

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    if config.assume_owner_identity && !running_as_root() {
        log::warn!("Not running as root: mounts owned by other users will be reported as monitor errors");
    }

    match &cli.command {
        Commands::Run => run_loop(&config),
        Commands::Check { json, paths } => run_once(&config, paths, *json),
        Commands::List { json } => list_mounts(&config, *json),
    }
}

/// Foreground poll loop. Daemonizing is left to the service manager.
fn run_loop(config: &MonitorConfig) -> Result<()> {
    let mut shutdown = ShutdownCoordinator::new()?;
    let registry = InFlightRegistry::new();
    let orchestrator = build_orchestrator(config, registry.clone());
    let reporters = build_reporters(config);
    let source = mount_source(config);

    let cleanup_registry = registry.clone();
    shutdown.register_cleanup(move || {
        cleanup_registry.terminate_all();
        cleanup_registry.sweep();
    });

    log::info!(
        "Checking mounts every {}s (timeout {}s, {} concurrent)",
        config.poll_interval_secs,
        config.check_timeout_secs,
        orchestrator.max_concurrent()
    );

    let cycle_done = AtomicBool::new(false);
    std::thread::scope(|scope| {
        // A signal mid-cycle must not wait out a hung probe's deadline.
        scope.spawn(|| {
            while should_continue() && !cycle_done.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
            }
            if !should_continue() {
                registry.terminate_all();
            }
        });

        while !shutdown.shutdown_requested() {
            // Enumeration failures are already reported; retry next interval.
            let _ = orchestrator.run_cycle(&source, &reporters);
            if shutdown.sleep(config.poll_interval()) {
                break;
            }
        }
        cycle_done.store(true, Ordering::SeqCst);
    });

    shutdown.run_cleanup();
    Ok(())
}

fn run_once(config: &MonitorConfig, paths: &[PathBuf], json: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config, InFlightRegistry::new());
    let reporters = build_reporters(config);
    let source = mount_source(config);

    let report = if paths.is_empty() {
        orchestrator.run_cycle(&source, &reporters)?
    } else {
        let selected = select_mounts(&source, paths)?;
        orchestrator.run_cycle(&selected, &reporters)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if report.dead_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Records for the requested paths, taken from the live table when mounted there.
fn select_mounts(source: &dyn MountSource, paths: &[PathBuf]) -> Result<StaticMountTable> {
    let mounts = source.mounts().context("reading mount table")?;
    let records = paths
        .iter()
        .map(|path| {
            mounts
                .iter()
                .find(|m| &m.path == path)
                .cloned()
                .unwrap_or_else(|| {
                    log::warn!("{} is not a mountpoint; checking the directory anyway", path.display());
                    MountRecord::new(path.clone(), "", "")
                })
        })
        .collect();
    Ok(StaticMountTable::new(records))
}

fn list_mounts(config: &MonitorConfig, json: bool) -> Result<()> {
    let mounts = mount_source(config).mounts()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&mounts)?);
        return Ok(());
    }
    for mount in &mounts {
        println!("{}\t{}\t{}", mount.path.display(), mount.fs_type, mount.source);
    }
    Ok(())
}
