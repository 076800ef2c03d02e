//! CLI entry point: wires the config loader, logger, and wave engine
//! together for the two operations the external workflow engine drives
//! (`run-wave`, `resolve`), plus a `status` table for human operators.
//!
//! Grounded on the teacher's `main.rs` dispatch shape (`Cli::parse()`,
//! match on `cli.command`, `anyhow::Context` on every fallible setup
//! step) reduced to this engine's much smaller command surface.

mod types;

pub use types::{Cli, Commands};

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Cell, Table};
use tokio::sync::watch;

use crate::domain::models::WaveOutcome;
use crate::engine::{EngineConfig, TimeoutBounds, WaveEngine};
use crate::infrastructure::{CliGitOps, ConfigLoader, LoggerImpl, OrchestratorConfig};
use crate::sandbox::SandboxManager;
use crate::state::StateStore;

/// Parse arguments and dispatch. The sole entry point `main` calls.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load().context("failed to load orchestrator configuration")?;
    let _logger = LoggerImpl::init(&config.logging).context("failed to initialize logger")?;

    match cli.command {
        Commands::RunWave {
            issue_id,
            canonical_branch,
        } => run_wave_once(&config, &issue_id, &canonical_branch).await,
        Commands::Resolve {
            issue_id,
            canonical_branch,
            max_iterations,
        } => resolve(&config, &issue_id, &canonical_branch, max_iterations).await,
        Commands::Status { issue_id } => print_status(&config, &issue_id).await,
    }
}

fn build_engine(config: &OrchestratorConfig, issue_id: &str, canonical_branch: &str) -> (WaveEngine, StateStore) {
    let state_dir = config.state_root.join(issue_id);
    let store = StateStore::new(state_dir);
    let git = Arc::new(CliGitOps);
    let sandbox_manager = SandboxManager::new(
        git.clone(),
        store.runs_root(),
        config.state_root.join(".sandboxes").join(issue_id),
    );
    let engine_config = EngineConfig {
        issue_id: issue_id.to_string(),
        repo_path: config.repo_path.clone(),
        canonical_branch: canonical_branch.to_string(),
        runner_bin: config.runner_bin.clone(),
        workflow_name: config.workflow_name.clone(),
        provider: config.provider.clone(),
        workflows_dir: config.workflows_dir.clone(),
        prompts_dir: config.prompts_dir.clone(),
    };
    (WaveEngine::new(git, sandbox_manager, engine_config), store)
}

/// A manual-stop watch fed by the process's Ctrl-C / SIGTERM signal,
/// shared across every `run_wave` call in this process (§4.7.3).
fn spawn_stop_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt; requesting manual stop");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn timeout_bounds_for(store: &StateStore) -> Result<TimeoutBounds> {
    let issue = store
        .read_issue()
        .await
        .context("failed to read canonical issue record")?
        .context("issue.json does not exist; cannot drive a wave for an unknown issue")?;
    Ok(TimeoutBounds::from_secs(
        issue.settings.task_execution.iteration_timeout_sec,
        issue.settings.task_execution.inactivity_timeout_sec,
    ))
}

async fn run_wave_once(config: &OrchestratorConfig, issue_id: &str, canonical_branch: &str) -> Result<()> {
    let (engine, store) = build_engine(config, issue_id, canonical_branch);
    let timeout_bounds = timeout_bounds_for(&store).await?;
    let stop = spawn_stop_signal();

    let outcome = engine
        .run_wave(&store, timeout_bounds, stop)
        .await
        .context("wave engine iteration failed")?;

    report_outcome(&outcome);
    if matches!(outcome, WaveOutcome::MergeConflict { .. }) {
        anyhow::bail!("wave ended in a merge conflict; run is errored");
    }
    Ok(())
}

async fn resolve(
    config: &OrchestratorConfig,
    issue_id: &str,
    canonical_branch: &str,
    max_iterations: Option<usize>,
) -> Result<()> {
    let (engine, store) = build_engine(config, issue_id, canonical_branch);
    let stop = spawn_stop_signal();

    let mut iterations = 0usize;
    loop {
        if let Some(max) = max_iterations {
            if iterations >= max {
                tracing::warn!(max_iterations = max, "resolve hit its iteration safety bound");
                break;
            }
        }
        iterations += 1;

        let timeout_bounds = timeout_bounds_for(&store).await?;
        let outcome = engine
            .run_wave(&store, timeout_bounds, stop.clone())
            .await
            .context("wave engine iteration failed")?;
        report_outcome(&outcome);

        match outcome {
            WaveOutcome::MergeConflict { .. } => {
                anyhow::bail!("wave ended in a merge conflict; run is errored");
            }
            WaveOutcome::SetupFailed => {
                anyhow::bail!("wave setup failed; see the wave summary for details");
            }
            WaveOutcome::Stopped => {
                tracing::info!("run stopped by request");
                break;
            }
            WaveOutcome::NoWave => {
                let issue = store
                    .read_issue()
                    .await?
                    .context("issue.json disappeared mid-run")?;
                if issue.status.flags.all_tasks_complete {
                    tracing::info!("all tasks complete");
                } else {
                    tracing::info!("no eligible tasks and no active wave; nothing left to drive");
                }
                break;
            }
            WaveOutcome::Completed | WaveOutcome::TimedOut => {
                let issue = store
                    .read_issue()
                    .await?
                    .context("issue.json disappeared mid-run")?;
                if issue.status.flags.all_tasks_complete {
                    tracing::info!("all tasks complete");
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn print_status(config: &OrchestratorConfig, issue_id: &str) -> Result<()> {
    let state_dir = config.state_root.join(issue_id);
    let store = StateStore::new(state_dir);
    let issue = store
        .read_issue()
        .await?
        .context("issue.json does not exist for this issue id")?;
    let tasks = store.read_tasks().await?;

    let mut table = Table::new();
    table.set_header(vec!["task", "status", "depends on"]);
    for task in &tasks {
        table.add_row(vec![
            Cell::new(&task.id),
            Cell::new(format!("{:?}", task.status)),
            Cell::new(task.depends_on.join(", ")),
        ]);
    }
    println!("{table}");
    println!(
        "phase={} taskPassed={} taskFailed={} hasMoreTasks={} allTasksComplete={}",
        issue.phase,
        issue.status.flags.task_passed,
        issue.status.flags.task_failed,
        issue.status.flags.has_more_tasks,
        issue.status.flags.all_tasks_complete,
    );
    if let Some(wave) = &issue.status.active_wave {
        println!(
            "active wave {} ({}): {}",
            wave.active_wave_id,
            wave.active_wave_phase.as_str(),
            wave.active_wave_task_ids.join(", ")
        );
    }
    Ok(())
}

fn report_outcome(outcome: &WaveOutcome) {
    match outcome {
        WaveOutcome::NoWave => tracing::info!("no-op: no eligible tasks"),
        WaveOutcome::Completed => tracing::info!("wave completed"),
        WaveOutcome::SetupFailed => tracing::error!("wave setup failed"),
        WaveOutcome::TimedOut => tracing::warn!("wave timed out"),
        WaveOutcome::Stopped => tracing::info!("wave stopped"),
        WaveOutcome::MergeConflict { task_id } => {
            tracing::error!(task_id = %task_id, "wave ended in merge conflict");
        }
    }
}
