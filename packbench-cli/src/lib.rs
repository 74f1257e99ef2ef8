#![warn(missing_docs)]
//! Packbench CLI
//!
//! Entry point for the `packbench` binary. One invocation plays one of
//! two roles: the coordinator (default), which loads the configuration,
//! spawns workers, and schedules the batch; or a worker (hidden
//! `--batch-worker` flag), which re-loads the same configuration and
//! serves dispatched tasks over its inherited pipe pair. Both roles
//! derive the task catalog and field registry from identical inputs, so
//! neither is ever transmitted.

mod coordinator;
mod rows;
mod scheduler;

pub use coordinator::{Coordinator, CoordinatorError, WorkerHandle, spawn_workers};
pub use rows::{RowAccumulator, RowError, header_line};
pub use scheduler::{Action, CoordinatorState, Scheduler};

use clap::Parser;
use packbench_core::{
    ArtifactDirs, CompressorConfig, DEFAULT_METRIC_MODULES, DatasetConfig, FieldRegistry,
    MetricsSpec, WorkerContext, build_catalog, load_compressors, load_datasets, run_worker,
};
use std::ffi::OsString;
use std::path::PathBuf;

/// Batch benchmarking harness for data-compression codecs
#[derive(Parser, Debug)]
#[command(name = "packbench")]
#[command(author, version, about = "packbench - batch compression benchmarking")]
pub struct Cli {
    /// Path to the dataset configuration
    #[arg(short = 'd', long, default_value = "./datasets.json")]
    pub datasets: PathBuf,

    /// Path to the compressor configuration
    #[arg(short = 'c', long, default_value = "./compressors.json")]
    pub compressors: PathBuf,

    /// How many times to replicate each (dataset, compressor) pair
    #[arg(short = 'r', long, default_value = "1")]
    pub replicates: u32,

    /// Metric modules to enable (default: time, size, error_stat)
    #[arg(short = 'm', long = "metric")]
    pub metrics: Vec<String>,

    /// Number of worker processes
    #[arg(short = 'j', long, default_value = "1")]
    pub jobs: usize,

    /// Write CSV to this file instead of stdout
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Directory for per-task compressed buffers
    #[arg(long)]
    pub compressed_dir: Option<PathBuf>,

    /// Directory for per-task decompressed buffers
    #[arg(long)]
    pub decompressed_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Internal: run as a worker process (used by the coordinator)
    #[arg(long, hide = true)]
    pub batch_worker: bool,

    /// Explicit metric field names; inferred from the metric modules when
    /// none are given
    #[arg(value_name = "FIELD")]
    pub fields: Vec<String>,
}

/// Parse arguments and run.
pub fn run() -> anyhow::Result<()> {
    run_with_cli(Cli::parse())
}

/// Run with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    eprintln!("DBG run_with_cli batch_worker={} fields={:?} args-seen", cli.batch_worker, cli.fields);
    init_logging(cli.verbose, cli.batch_worker);

    if cli.batch_worker {
        return run_worker_mode(&cli);
    }
    run_coordinator_mode(&cli)
}

/// Logging goes to stderr in both roles: stdout carries the CSV. Workers
/// log warnings only, so a failed task surfaces once instead of once per
/// process re-loading the configuration.
fn init_logging(verbose: bool, worker: bool) {
    let filter = if worker {
        "packbench_cli=warn,packbench_core=warn"
    } else if verbose {
        "packbench_cli=debug,packbench_core=debug"
    } else {
        "packbench_cli=info,packbench_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Everything both roles derive from the configuration inputs.
struct BatchSetup {
    datasets: Vec<DatasetConfig>,
    compressors: Vec<CompressorConfig>,
    metrics: MetricsSpec,
    registry: FieldRegistry,
}

/// Load and validate the configuration. Any error here is fatal and
/// aborts before dispatch begins.
fn load_setup(cli: &Cli) -> anyhow::Result<BatchSetup> {
    let datasets = load_datasets(&cli.datasets)?;
    let compressors = load_compressors(&cli.compressors)?;

    let module_ids: Vec<&str> = if cli.metrics.is_empty() {
        DEFAULT_METRIC_MODULES.to_vec()
    } else {
        cli.metrics.iter().map(String::as_str).collect()
    };
    let metrics = MetricsSpec::from_ids(module_ids)?;
    let registry = FieldRegistry::build(&cli.fields, &metrics);

    Ok(BatchSetup {
        datasets,
        compressors,
        metrics,
        registry,
    })
}

/// Arguments for a worker process. Built from the parsed options rather
/// than the raw command line, so the worker sees exactly the inputs the
/// coordinator's catalog and registry came from.
fn worker_args(cli: &Cli) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--batch-worker".into()];
    args.push("--datasets".into());
    args.push(cli.datasets.clone().into_os_string());
    args.push("--compressors".into());
    args.push(cli.compressors.clone().into_os_string());
    args.push("--replicates".into());
    args.push(cli.replicates.to_string().into());
    for module in &cli.metrics {
        args.push("--metric".into());
        args.push(module.into());
    }
    if let Some(dir) = &cli.compressed_dir {
        args.push("--compressed-dir".into());
        args.push(dir.clone().into_os_string());
    }
    if let Some(dir) = &cli.decompressed_dir {
        args.push("--decompressed-dir".into());
        args.push(dir.clone().into_os_string());
    }
    for field in &cli.fields {
        args.push(field.into());
    }
    args
}

fn run_coordinator_mode(cli: &Cli) -> anyhow::Result<()> {
    let setup = load_setup(cli)?;
    let catalog = build_catalog(&setup.datasets, &setup.compressors, cli.replicates);

    for dir in [&cli.compressed_dir, &cli.decompressed_dir].into_iter().flatten() {
        std::fs::create_dir_all(dir)?;
    }

    let jobs = cli.jobs.max(1);
    tracing::info!(tasks = catalog.len(), workers = jobs, "starting batch run");

    let workers = spawn_workers(jobs, &worker_args(cli))?;

    match &cli.output {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            Coordinator::new(workers, catalog, setup.registry, file).run()?;
            tracing::info!(path = %path.display(), "results written");
        }
        None => {
            let stdout = std::io::stdout();
            Coordinator::new(workers, catalog, setup.registry, stdout.lock()).run()?;
        }
    }

    Ok(())
}

fn run_worker_mode(cli: &Cli) -> anyhow::Result<()> {
    let setup = load_setup(cli)?;
    let ctx = WorkerContext {
        datasets: setup.datasets,
        compressors: setup.compressors,
        metrics: setup.metrics,
        registry: setup.registry,
        artifacts: ArtifactDirs {
            compressed: cli.compressed_dir.clone(),
            decompressed: cli.decompressed_dir.clone(),
        },
    };
    run_worker(ctx).map_err(|e| anyhow::anyhow!("worker error: {e}"))
}
