// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod journal;
pub mod logging;
pub mod protocol;
pub mod task;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{Orchestrator, OrchestratorCore, OrchestratorHandle, RunResult, RuntimeEvent};
use crate::exec::{ExecutionBackend, ProcessBackend};
use crate::journal::file::{DEFAULT_CAPACITY, FileJournal};
use crate::journal::{Journal, TeeJournal, TracingJournal};
use crate::protocol::{RunClock, format_duration};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - journal sinks
/// - orchestrator core / runtime
/// - process backend
/// - Ctrl-C handling
///
/// Returns `None` for a dry run.
pub async fn run(args: CliArgs) -> Result<Option<RunResult>> {
    let config_path = &args.config;
    let mut cfg = load_and_validate(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    cfg.retain_sets(&args.only)?;
    if let Some(concurrency) = args.concurrency {
        cfg.set_concurrency(concurrency)?;
    }
    if let Some(journal) = &args.journal {
        cfg.config.journal = Some(journal.clone());
    }

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(None);
    }

    // Journal: always through tracing, optionally into a file as well.
    let mut sinks: Vec<Arc<dyn Journal>> = vec![Arc::new(TracingJournal)];
    let mut writer = None;
    if let Some(path) = &cfg.config.journal {
        let (file, handle) = FileJournal::create(path, DEFAULT_CAPACITY)
            .await
            .with_context(|| format!("creating journal {}", path.display()))?;
        info!(path = %path.display(), "writing run journal");
        sinks.push(Arc::new(file));
        writer = Some(handle);
    }
    let journal: Arc<dyn Journal> = Arc::new(TeeJournal::new(sinks));

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);
    let clock = RunClock::start();

    // Process backend (real implementation in production).
    let backend = ProcessBackend::new(rt_tx.clone(), clock, cfg.backend_settings());

    // Ctrl-C → cancel the run.
    {
        let handle = OrchestratorHandle::new(rt_tx.clone());
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; cancelling run");
            handle.cancel().await;
        });
    }
    drop(rt_tx);

    // Construct the pure core (single source of truth for semantics).
    let mut core = OrchestratorCore::new(cfg.run_options(), journal);
    core.submit_task_set(cfg.task_specs())?;
    info!(
        jobs = cfg.command_count(),
        concurrency = cfg.config.concurrency,
        "submitted job list"
    );

    // Construct the async IO shell around the core.
    let orchestrator = Orchestrator::new(core, rt_rx, backend, clock, cfg.config.sweep_interval);
    let result = run_to_completion(orchestrator, writer).await?;

    Ok(Some(result))
}

/// Run the orchestrator, then wait for the journal writer to drain.
///
/// The writer is awaited on the error path too: the journal sinks go away
/// with the orchestrator, so the last entries reach the file either way.
async fn run_to_completion<B: ExecutionBackend>(
    orchestrator: Orchestrator<B>,
    writer: Option<JoinHandle<()>>,
) -> Result<RunResult> {
    let result = orchestrator.run().await;

    if let Some(writer) = writer {
        if let Err(e) = writer.await {
            warn!(error = %e, "journal writer task failed");
        }
    }

    Ok(result?)
}

/// Simple dry-run output: print run settings and jobs.
fn print_dry_run(cfg: &ConfigFile) {
    println!("taskwarden dry-run");
    println!("  config.concurrency = {}", cfg.config.concurrency);
    println!(
        "  config.termination_grace = {}",
        format_duration(cfg.config.termination_grace)
    );
    if let Some(timeout) = cfg.config.overall_timeout {
        println!("  config.overall_timeout = {}", format_duration(timeout));
    }
    let thresholds: Vec<String> = cfg
        .hang
        .thresholds()
        .iter()
        .map(|t| format_duration(*t))
        .collect();
    println!(
        "  hang = [{}] then {}",
        thresholds.join(", "),
        cfg.hang.action()
    );
    println!();

    println!("jobs ({}):", cfg.command_count());
    for spec in cfg.task_specs() {
        println!("  - {}", spec.id());
        println!("      cmd: {}", spec.command_line);
        if let Some(dir) = &spec.working_dir {
            println!("      working_dir: {}", dir.display());
        }
        if let Some(pattern) = &spec.progress_pattern {
            println!("      progress_on_output: {pattern}");
        }
    }

    debug!("dry-run complete (no execution)");
}
