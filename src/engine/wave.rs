//! The wave engine (§4.4 implement wave, §4.6 spec-check wave, §4.9 signal
//! flags, §4.10 timeout cleanup): the top-level driver the `run-wave` CLI
//! subcommand calls once per invocation.
//!
//! Grounded on the teacher's task-status transition discipline
//! (`domain/models/task.rs`'s `force_status` + warn-log for recovery
//! bypass) applied to reservation rollback, and the Design Notes' (§9)
//! "exceptions → explicit result types" guidance: every public entry point
//! returns a closed [`WaveOutcome`] rather than threading errors through
//! nested try/catch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    clamp_max_parallel_tasks, ActiveWaveRecord, IssueRecord, Sandbox, Task, TaskStatus,
    WaveOutcome, WavePhase, WorkerOutcome, WorkerStatus,
};
use crate::domain::ports::GitOps;
use crate::engine::merge::{MergeIntegrator, MergeResult};
use crate::engine::recovery::RecoveryManager;
use crate::engine::selection::select_wave_tasks;
use crate::engine::timeout::{TimeoutBounds, TimeoutKind, TimeoutMonitor};
use crate::progress;
use crate::sandbox::{SandboxContext, SandboxManager};
use crate::state::StateStore;
use crate::supervisor::{SpawnSpec, WorkerExit, WorkerSupervisor};

/// Process-level parameters the canonical issue record doesn't carry
/// (§6.7): binary paths, directories, the canonical repo/branch.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub issue_id: String,
    pub repo_path: PathBuf,
    pub canonical_branch: String,
    pub runner_bin: String,
    pub workflow_name: String,
    pub provider: String,
    pub workflows_dir: PathBuf,
    pub prompts_dir: PathBuf,
}

/// Per-task verdict recorded in the wave summary (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskVerdict {
    pub status: WorkerStatus,
    pub exit_code: i32,
    pub branch: String,
    pub task_passed: bool,
    pub task_failed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialSetup {
    pub created_sandboxes: Vec<String>,
    pub started_workers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeTaskSummary {
    pub task_id: String,
    pub success: bool,
    pub conflict: bool,
    pub commit_sha: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSummary {
    pub results: Vec<MergeTaskSummary>,
    pub has_conflict: bool,
    pub conflict_task_id: Option<String>,
}

impl From<&MergeResult> for MergeSummary {
    fn from(result: &MergeResult) -> Self {
        Self {
            results: result
                .results
                .iter()
                .map(|r| MergeTaskSummary {
                    task_id: r.task_id.clone(),
                    success: r.success,
                    conflict: r.conflict,
                    commit_sha: r.commit_sha.clone(),
                    error: r.error.clone(),
                })
                .collect(),
            has_conflict: result.has_conflict,
            conflict_task_id: result.conflict_task_id.clone(),
        }
    }
}

/// The per-wave JSON summary artifact (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveSummary {
    pub wave_id: String,
    pub phase: WavePhase,
    pub task_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub workers: Vec<WorkerOutcome>,
    #[serde(default)]
    pub all_passed: bool,
    #[serde(default)]
    pub any_failed: bool,
    #[serde(default)]
    pub task_verdicts: HashMap<String, TaskVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_setup: Option<PartialSetup>,
}

impl WaveSummary {
    fn new(wave_id: &str, phase: WavePhase, task_ids: &[String]) -> Self {
        Self {
            wave_id: wave_id.to_string(),
            phase,
            task_ids: task_ids.to_vec(),
            started_at: Utc::now(),
            ended_at: None,
            workers: Vec::new(),
            all_passed: false,
            any_failed: false,
            task_verdicts: HashMap::new(),
            merge: None,
            state: None,
            error: None,
            error_stack: None,
            partial_setup: None,
        }
    }
}

/// A worker whose process has been spawned and is being awaited.
struct RunningWorker {
    task_id: String,
    branch: String,
    pid: u32,
    activity: Arc<Mutex<Instant>>,
    wait_task: tokio::task::JoinHandle<OrchestratorResult<WorkerExit>>,
}

/// Setup failed before or during spawn (§4.4 step 3 / §7).
struct SetupFailure {
    error: OrchestratorError,
    created_sandboxes: Vec<String>,
    started_workers: Vec<String>,
}

pub struct WaveEngine {
    sandbox_manager: SandboxManager,
    merge_integrator: MergeIntegrator,
    recovery: RecoveryManager,
    config: EngineConfig,
}

impl WaveEngine {
    pub fn new(git: Arc<dyn GitOps>, sandbox_manager: SandboxManager, config: EngineConfig) -> Self {
        Self {
            merge_integrator: MergeIntegrator::new(git),
            sandbox_manager,
            recovery: RecoveryManager::new(),
            config,
        }
    }

    /// Drive one engine iteration: start-of-entry orphan repair, then
    /// dispatch to resume (an active-wave record already exists) or a
    /// fresh implement wave.
    pub async fn run_wave(
        &self,
        store: &StateStore,
        timeout_bounds: TimeoutBounds,
        stop: watch::Receiver<bool>,
    ) -> OrchestratorResult<WaveOutcome> {
        let mut issue = store.read_issue().await?.ok_or_else(|| OrchestratorError::Io {
            path: store.issue_path().display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "issue.json missing"),
        })?;
        let mut tasks = store.read_tasks().await?;

        if let Some(active) = issue.status.active_wave.as_ref() {
            active.validate()?;
        }

        let repaired = self
            .recovery
            .repair_orphans(&mut tasks, issue.status.active_wave.as_ref());
        if !repaired.is_empty() {
            store.write_tasks(&tasks).await?;
            for task_id in &repaired {
                self.recovery
                    .write_orphan_feedback(store, task_id, &store.runs_root())
                    .await;
            }
        }

        let max_parallel = clamp_max_parallel_tasks(issue.settings.task_execution.max_parallel_tasks);

        if let Some(active_wave) = issue.status.active_wave.clone() {
            return self
                .resume_wave(store, &mut issue, &mut tasks, active_wave, timeout_bounds, stop)
                .await;
        }

        if issue.phase != "implement_task" {
            return Ok(WaveOutcome::NoWave);
        }

        let task_ids = select_wave_tasks(&tasks, max_parallel);
        if task_ids.is_empty() {
            return Ok(WaveOutcome::NoWave);
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let wave_id = uuid::Uuid::new_v4().to_string();
        self.begin_implement_wave(store, &mut issue, &mut tasks, run_id, wave_id, task_ids, timeout_bounds, stop)
            .await
    }

    /// §4.7.2: resume an active wave, re-entering the phase it was in.
    async fn resume_wave(
        &self,
        store: &StateStore,
        issue: &mut IssueRecord,
        tasks: &mut [Task],
        mut active_wave: ActiveWaveRecord,
        timeout_bounds: TimeoutBounds,
        stop: watch::Receiver<bool>,
    ) -> OrchestratorResult<WaveOutcome> {
        if active_wave.active_wave_phase.as_str() != issue.phase {
            tracing::warn!(
                recorded_phase = active_wave.active_wave_phase.as_str(),
                canonical_phase = %issue.phase,
                "active wave phase mismatch on resume"
            );
            let corrected = self.recovery.reconcile_phase(&mut active_wave, &issue.phase);
            if corrected {
                let entry = progress::state_corruption_entry(
                    &active_wave.active_wave_id,
                    active_wave.active_wave_phase.as_str(),
                    &issue.phase,
                );
                store.append_progress(&entry).await?;
                issue.status.active_wave = Some(active_wave.clone());
                store.write_issue(issue).await?;
            }
        }

        match active_wave.active_wave_phase {
            WavePhase::ImplementTask => {
                self.run_implement_phase(store, issue, tasks, &active_wave, timeout_bounds, stop)
                    .await
            }
            WavePhase::TaskSpecCheck => {
                self.run_spec_check_phase(store, issue, tasks, &active_wave, timeout_bounds, stop)
                    .await
            }
        }
    }

    /// §4.4 steps 2-5: reserve the selected ids, persist the active-wave
    /// record, then run the implement phase.
    async fn begin_implement_wave(
        &self,
        store: &StateStore,
        issue: &mut IssueRecord,
        tasks: &mut [Task],
        run_id: String,
        wave_id: String,
        task_ids: Vec<String>,
        timeout_bounds: TimeoutBounds,
        stop: watch::Receiver<bool>,
    ) -> OrchestratorResult<WaveOutcome> {
        let mut reserved_status = HashMap::new();
        for task in tasks.iter_mut() {
            if task_ids.contains(&task.id) {
                reserved_status.insert(task.id.clone(), task.status);
                task.force_status(TaskStatus::InProgress);
            }
        }
        store.write_tasks(tasks).await?;

        let active_wave = ActiveWaveRecord {
            run_id,
            active_wave_id: wave_id,
            active_wave_phase: WavePhase::ImplementTask,
            active_wave_task_ids: task_ids,
            reserved_status_by_task_id: reserved_status,
            reserved_at: Utc::now(),
        };
        issue.status.active_wave = Some(active_wave.clone());
        store.write_issue(issue).await?;

        self.run_implement_phase(store, issue, tasks, &active_wave, timeout_bounds, stop)
            .await
    }

    /// §4.4: spawn (or, on resume, re-enter) the implement phase for every
    /// task id in the active wave that doesn't already have
    /// `implement.done`.
    async fn run_implement_phase(
        &self,
        store: &StateStore,
        issue: &mut IssueRecord,
        tasks: &mut [Task],
        active_wave: &ActiveWaveRecord,
        timeout_bounds: TimeoutBounds,
        stop: watch::Receiver<bool>,
    ) -> OrchestratorResult<WaveOutcome> {
        let mut pending_ids = Vec::new();
        for task_id in &active_wave.active_wave_task_ids {
            let sandbox = self.sandbox_for(task_id, &active_wave.run_id);
            if !sandbox.implement_marker().exists() {
                pending_ids.push(task_id.clone());
            }
        }

        let mut summary = WaveSummary::new(
            &active_wave.active_wave_id,
            WavePhase::ImplementTask,
            &active_wave.active_wave_task_ids,
        );

        if pending_ids.is_empty() {
            // Every task in this wave already finished implement in an
            // earlier process; nothing to spawn, just proceed.
            summary.ended_at = Some(Utc::now());
            store
                .write_wave_summary(&active_wave.run_id, &active_wave.active_wave_id, &summary)
                .await?;
            return Ok(WaveOutcome::Completed);
        }

        let spawned = self
            .create_sandboxes_and_spawn(
                store,
                &active_wave.run_id,
                &pending_ids,
                WavePhase::ImplementTask,
                true,
            )
            .await;

        let workers = match spawned {
            Ok(w) => w,
            Err(failure) => {
                return self
                    .handle_setup_failure(store, issue, tasks, active_wave, &mut summary, failure)
                    .await
            }
        };

        let wait_result = self
            .wait_for_workers(workers, WavePhase::ImplementTask, timeout_bounds, stop)
            .await;

        if wait_result.stopped {
            self.rollback_for_stop(store, issue, tasks, active_wave).await?;
            return Ok(WaveOutcome::Stopped);
        }

        if wait_result.timed_out.is_some() {
            return self
                .timeout_cleanup(
                    store,
                    issue,
                    tasks,
                    active_wave,
                    &mut summary,
                    wait_result.outcomes,
                    wait_result.timed_out.unwrap(),
                )
                .await;
        }

        for outcome in &wait_result.outcomes {
            let sandbox = self.sandbox_for(&outcome.task_id, &active_wave.run_id);
            tokio::fs::write(sandbox.implement_marker(), b"").await.map_err(|e| {
                OrchestratorError::Io {
                    path: sandbox.implement_marker().display().to_string(),
                    source: e,
                }
            })?;
            summary.task_verdicts.insert(
                outcome.task_id.clone(),
                TaskVerdict {
                    status: outcome.status,
                    exit_code: outcome.exit_code,
                    branch: outcome.branch.clone(),
                    task_passed: outcome.task_passed,
                    task_failed: outcome.task_failed,
                },
            );
            summary.workers.push(outcome.clone());
        }

        summary.ended_at = Some(Utc::now());
        store
            .write_wave_summary(&active_wave.run_id, &active_wave.active_wave_id, &summary)
            .await?;

        // §4.4 step 5: canonical statuses and the active-wave record are
        // left untouched; the workflow engine re-enters for spec-check.
        Ok(WaveOutcome::Completed)
    }

    /// §4.6: spec-check the active wave's tasks, then drive merge + flags.
    async fn run_spec_check_phase(
        &self,
        store: &StateStore,
        issue: &mut IssueRecord,
        tasks: &mut [Task],
        active_wave: &ActiveWaveRecord,
        timeout_bounds: TimeoutBounds,
        stop: watch::Receiver<bool>,
    ) -> OrchestratorResult<WaveOutcome> {
        let mut pending_ids = Vec::new();
        let mut done_outcomes = Vec::new();
        for task_id in &active_wave.active_wave_task_ids {
            let sandbox = self.sandbox_for(task_id, &active_wave.run_id);
            if sandbox.spec_check_marker().exists() {
                let outcome = self.read_completed_spec_check(&sandbox).await?;
                done_outcomes.push(outcome);
            } else {
                pending_ids.push(task_id.clone());
            }
        }

        let mut summary = WaveSummary::new(
            &active_wave.active_wave_id,
            WavePhase::TaskSpecCheck,
            &active_wave.active_wave_task_ids,
        );

        let spawned = self
            .create_sandboxes_and_spawn(
                store,
                &active_wave.run_id,
                &pending_ids,
                WavePhase::TaskSpecCheck,
                false,
            )
            .await;

        let workers = match spawned {
            Ok(w) => w,
            Err(failure) => {
                return self
                    .handle_setup_failure(store, issue, tasks, active_wave, &mut summary, failure)
                    .await
            }
        };

        let wait_result = self
            .wait_for_workers(workers, WavePhase::TaskSpecCheck, timeout_bounds, stop)
            .await;

        if wait_result.stopped {
            self.rollback_for_stop(store, issue, tasks, active_wave).await?;
            return Ok(WaveOutcome::Stopped);
        }

        if wait_result.timed_out.is_some() {
            return self
                .timeout_cleanup(
                    store,
                    issue,
                    tasks,
                    active_wave,
                    &mut summary,
                    wait_result.outcomes,
                    wait_result.timed_out.unwrap(),
                )
                .await;
        }

        let mut all_outcomes = done_outcomes;
        all_outcomes.extend(wait_result.outcomes);

        // Record markers and per-task verdicts, copy failing feedback.
        let mut passing: Vec<(String, String)> = Vec::new();
        for outcome in &all_outcomes {
            let sandbox = self.sandbox_for(&outcome.task_id, &active_wave.run_id);
            if !sandbox.spec_check_marker().exists() {
                tokio::fs::write(sandbox.spec_check_marker(), b"").await.map_err(|e| {
                    OrchestratorError::Io {
                        path: sandbox.spec_check_marker().display().to_string(),
                        source: e,
                    }
                })?;
            }

            let passed = outcome.status == WorkerStatus::Passed;
            summary.task_verdicts.insert(
                outcome.task_id.clone(),
                TaskVerdict {
                    status: outcome.status,
                    exit_code: outcome.exit_code,
                    branch: outcome.branch.clone(),
                    task_passed: outcome.task_passed,
                    task_failed: outcome.task_failed,
                },
            );
            summary.workers.push(outcome.clone());

            if let Some(task) = tasks.iter_mut().find(|t| t.id == outcome.task_id) {
                if passed {
                    task.force_status(TaskStatus::Passed);
                    passing.push((outcome.task_id.clone(), outcome.branch.clone()));
                } else {
                    task.force_status(TaskStatus::Failed);
                    let feedback_src = sandbox.feedback_file();
                    let body = match tokio::fs::read_to_string(&feedback_src).await {
                        Ok(body) => body,
                        Err(_) => format!(
                            "# Task failed spec-check\n\nTask `{}` did not pass spec-check \
                             (exit code {}).\n",
                            outcome.task_id, outcome.exit_code
                        ),
                    };
                    store.write_canonical_feedback(&outcome.task_id, &body).await?;
                }
            }
        }
        store.write_tasks(tasks).await?;

        let merge_result = self
            .merge_integrator
            .merge_wave(&self.config.repo_path, &self.config.canonical_branch, passing)
            .await;

        // Conflicted or otherwise-failed merges flip the task back to failed.
        for result in &merge_result.results {
            if !result.success {
                if let Some(task) = tasks.iter_mut().find(|t| t.id == result.task_id) {
                    task.force_status(TaskStatus::Failed);
                }
                let body = if result.conflict {
                    format!(
                        "# Merge conflict\n\nTask `{}`'s branch conflicted while merging into \
                         `{}`. Resolve the conflict manually against the task branch, then retry \
                         this task.\n\nArtifacts: `.runs/{}/workers/{}/`\n",
                        result.task_id, self.config.canonical_branch, active_wave.run_id, result.task_id
                    )
                } else {
                    format!(
                        "# Merge failed\n\nTask `{}` failed to merge into `{}`: {}\n",
                        result.task_id,
                        self.config.canonical_branch,
                        result.error.as_deref().unwrap_or("unknown error")
                    )
                };
                store.write_canonical_feedback(&result.task_id, &body).await?;
            }
        }
        store.write_tasks(tasks).await?;

        summary.merge = Some(MergeSummary::from(&merge_result));
        summary.all_passed = tasks.iter().all(|t| t.status == TaskStatus::Passed);
        summary.any_failed = tasks.iter().any(|t| t.status == TaskStatus::Failed);
        summary.ended_at = Some(Utc::now());
        store
            .write_wave_summary(&active_wave.run_id, &active_wave.active_wave_id, &summary)
            .await?;

        apply_workflow_flags(issue, tasks);
        issue.status.active_wave = None;
        store.write_issue(issue).await?;

        let statuses: Vec<(String, WorkerStatus)> = all_outcomes
            .iter()
            .map(|o| (o.task_id.clone(), o.status))
            .collect();
        let entry = progress::combined_wave_entry(&progress::WaveReport {
            wave_id: &active_wave.active_wave_id,
            phase_label: "implement+spec-check",
            task_statuses: &statuses,
            merge: &merge_result,
        });
        store.append_progress(&entry).await?;

        let merged_task_ids: Vec<String> = merge_result
            .results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.task_id.clone())
            .collect();
        for task_id in &merged_task_ids {
            let mut sandbox = self.sandbox_for(task_id, &active_wave.run_id);
            self.sandbox_manager
                .cleanup_on_success(&mut sandbox, &self.config.repo_path)
                .await;
        }

        if merge_result.has_conflict {
            return Ok(WaveOutcome::MergeConflict {
                task_id: merge_result.conflict_task_id.unwrap_or_default(),
            });
        }
        Ok(WaveOutcome::Completed)
    }

    /// §4.10: wave-wide timeout cleanup, regardless of individual worker
    /// verdicts.
    async fn timeout_cleanup(
        &self,
        store: &StateStore,
        issue: &mut IssueRecord,
        tasks: &mut [Task],
        active_wave: &ActiveWaveRecord,
        summary: &mut WaveSummary,
        outcomes: Vec<WorkerOutcome>,
        kind: TimeoutKind,
    ) -> OrchestratorResult<WaveOutcome> {
        let kind_label = match kind {
            TimeoutKind::Iteration => "iteration",
            TimeoutKind::Inactivity => "inactivity",
        };

        for task_id in &active_wave.active_wave_task_ids {
            if let Some(task) = tasks.iter_mut().find(|t| &t.id == task_id) {
                task.force_status(TaskStatus::Failed);
            }
            let recorded_status = outcomes
                .iter()
                .find(|o| &o.task_id == task_id)
                .map(|o| format!("{:?}", o.status))
                .unwrap_or_else(|| "never started".to_string());
            let phase_label = active_wave.active_wave_phase.as_str();
            let body = format!(
                "# Wave timeout\n\nTask `{task_id}` was marked failed because the wave hit its \
                 {kind_label} timeout during `{phase_label}`.\n\nRecorded worker status at \
                 timeout: {recorded_status}\n"
            );
            store.write_canonical_feedback(task_id, &body).await?;
        }
        store.write_tasks(tasks).await?;

        summary.workers = outcomes;
        summary.any_failed = true;
        summary.all_passed = false;
        summary.ended_at = Some(Utc::now());
        store
            .write_wave_summary(&active_wave.run_id, &active_wave.active_wave_id, summary)
            .await?;

        apply_workflow_flags(issue, tasks);
        issue.status.active_wave = None;
        store.write_issue(issue).await?;

        let entry = progress::timeout_entry(
            &active_wave.active_wave_id,
            kind_label,
            &active_wave.active_wave_task_ids,
        );
        store.append_progress(&entry).await?;

        Ok(WaveOutcome::TimedOut)
    }

    /// §4.4 step 3 / §7: sandbox or spawn failure. Roll back reservations,
    /// write the setup-failed summary, never touch workflow flags.
    async fn handle_setup_failure(
        &self,
        store: &StateStore,
        issue: &mut IssueRecord,
        tasks: &mut [Task],
        active_wave: &ActiveWaveRecord,
        summary: &mut WaveSummary,
        failure: SetupFailure,
    ) -> OrchestratorResult<WaveOutcome> {
        self.recovery.rollback_reservation(tasks, active_wave);
        store.write_tasks(tasks).await?;
        issue.status.active_wave = None;
        store.write_issue(issue).await?;

        summary.state = Some("setup_failed".to_string());
        summary.error = Some(failure.error.to_string());
        summary.error_stack = Some(format!("{:?}", failure.error));
        summary.partial_setup = Some(PartialSetup {
            created_sandboxes: failure.created_sandboxes,
            started_workers: failure.started_workers,
        });
        summary.ended_at = Some(Utc::now());
        store
            .write_wave_summary(&active_wave.run_id, &active_wave.active_wave_id, summary)
            .await?;

        let entry = progress::setup_failure_entry(&active_wave.active_wave_id, &failure.error.to_string());
        store.append_progress(&entry).await?;

        Ok(WaveOutcome::SetupFailed)
    }

    /// §4.7.3: manual stop. Restore pre-reservation statuses; leave the
    /// active-wave record for the caller to decide whether it survives
    /// (stop mid-implement clears it; stop between phases is not reachable
    /// through this path since the wave always completes one phase before
    /// the caller can observe a stop between phases).
    async fn rollback_for_stop(
        &self,
        store: &StateStore,
        issue: &mut IssueRecord,
        tasks: &mut [Task],
        active_wave: &ActiveWaveRecord,
    ) -> OrchestratorResult<()> {
        self.recovery.rollback_reservation(tasks, active_wave);
        store.write_tasks(tasks).await?;
        issue.status.active_wave = None;
        store.write_issue(issue).await
    }

    fn sandbox_for(&self, task_id: &str, run_id: &str) -> Sandbox {
        Sandbox::new(
            &self.config.issue_id,
            task_id,
            run_id,
            self.sandbox_manager.runs_root(),
            self.sandbox_manager.work_root(),
        )
        .expect("task/run ids were already validated by the active-wave record")
    }

    async fn read_completed_spec_check(&self, sandbox: &Sandbox) -> OrchestratorResult<WorkerOutcome> {
        let worker_store = StateStore::new(&sandbox.state_dir);
        let record = worker_store.read_issue().await?;
        let (task_passed, task_failed) = record
            .map(|r| (r.status.flags.task_passed, r.status.flags.task_failed))
            .unwrap_or((false, true));
        let status = if task_passed && !task_failed {
            WorkerStatus::Passed
        } else {
            WorkerStatus::Failed
        };
        Ok(WorkerOutcome {
            task_id: sandbox.task_id.clone(),
            exit_code: if status == WorkerStatus::Passed { 0 } else { 1 },
            status,
            task_passed,
            task_failed,
            branch: sandbox.branch.clone(),
        })
    }

    /// Create (implement) or reuse (spec-check) a sandbox for every pending
    /// id and spawn its worker. Any failure rolls back everything spawned
    /// so far and returns a [`SetupFailure`] with partial-setup details.
    async fn create_sandboxes_and_spawn(
        &self,
        store: &StateStore,
        run_id: &str,
        pending_ids: &[String],
        phase: crate::domain::models::WavePhase,
        create_fresh: bool,
    ) -> Result<Vec<RunningWorker>, SetupFailure> {
        let supervisor = WorkerSupervisor::new();
        let mut created_sandboxes = Vec::new();
        let mut started_workers = Vec::new();
        let mut running = Vec::new();

        for task_id in pending_ids {
            let ctx = SandboxContext {
                issue_id: self.config.issue_id.clone(),
                task_id: task_id.clone(),
                run_id: run_id.to_string(),
                canonical_repo: self.config.repo_path.clone(),
                canonical_branch: self.config.canonical_branch.clone(),
            };

            let sandbox = if create_fresh {
                self.sandbox_manager.create(&ctx, store).await
            } else {
                self.sandbox_manager.reuse(&ctx).await
            };

            let sandbox = match sandbox {
                Ok(sb) => sb,
                Err(error) => {
                    kill_all(&supervisor, &running);
                    return Err(SetupFailure {
                        error,
                        created_sandboxes,
                        started_workers,
                    });
                }
            };
            if create_fresh {
                created_sandboxes.push(task_id.clone());
            }

            let spec = SpawnSpec {
                runner_bin: self.config.runner_bin.clone(),
                workflow_name: self.config.workflow_name.clone(),
                phase,
                provider: self.config.provider.clone(),
                workflows_dir: self.config.workflows_dir.clone(),
                prompts_dir: self.config.prompts_dir.clone(),
                state_dir: sandbox.state_dir.clone(),
                work_dir: sandbox.work_dir.clone(),
                task_id: task_id.clone(),
            };

            let handle = match supervisor.spawn(&spec) {
                Ok(h) => h,
                Err(error) => {
                    kill_all(&supervisor, &running);
                    return Err(SetupFailure {
                        error,
                        created_sandboxes,
                        started_workers,
                    });
                }
            };
            started_workers.push(task_id.clone());

            let pid = handle.pid();
            let activity = handle.activity_handle();
            let task_id_owned = task_id.clone();
            let wait_task = tokio::spawn(async move { supervisor.wait(handle).await });

            running.push(RunningWorker {
                task_id: task_id_owned,
                branch: sandbox.branch.clone(),
                pid,
                activity,
                wait_task,
            });
        }

        Ok(running)
    }

    /// Wait for every running worker, racing the timeout monitor and the
    /// manual-stop signal. `phase` selects the pass/fail rule applied to
    /// each worker's terminal condition: the implement phase passes on
    /// exit code zero (§4.4 step 4); the spec-check phase passes only when
    /// the harvested worker-local `taskPassed` is true and `taskFailed` is
    /// false (§4.6 step 4) — the exit code is recorded but never decides
    /// the verdict there.
    async fn wait_for_workers(
        &self,
        workers: Vec<RunningWorker>,
        phase: WavePhase,
        timeout_bounds: TimeoutBounds,
        stop: watch::Receiver<bool>,
    ) -> WaveWaitResult {
        if workers.is_empty() {
            return WaveWaitResult {
                outcomes: Vec::new(),
                timed_out: None,
                stopped: false,
            };
        }

        let supervisor = WorkerSupervisor::new();
        let monitor = TimeoutMonitor::new(timeout_bounds);
        let fired_rx = monitor.subscribe();

        let activities: Vec<Arc<Mutex<Instant>>> =
            workers.iter().map(|w| w.activity.clone()).collect();
        let idle_probe = move || {
            activities
                .iter()
                .map(|a| a.lock().expect("activity mutex poisoned").elapsed())
                .min()
        };

        let monitor_task = {
            let stop = stop.clone();
            tokio::spawn(async move {
                monitor.run(stop, idle_probe).await;
            })
        };

        let pids: Vec<(String, u32)> = workers.iter().map(|w| (w.task_id.clone(), w.pid)).collect();
        let branches: HashMap<String, String> =
            workers.iter().map(|w| (w.task_id.clone(), w.branch.clone())).collect();
        let wait_futures = workers.into_iter().map(|w| async move {
            let result = w.wait_task.await;
            (w.task_id, result)
        });
        let all_done = futures::future::join_all(wait_futures);

        let mut stop_changed = stop.clone();
        tokio::pin!(all_done);

        let outcomes;
        let mut timed_out = None;
        let mut stopped = false;

        tokio::select! {
            results = &mut all_done => {
                outcomes = results;
                monitor_task.abort();
            }
            _ = fired_rx.clone().wait_for(Option::is_some) => {
                timed_out = Some(*fired_rx.borrow());
                for (task_id, pid) in &pids {
                    supervisor.kill(*pid);
                    tracing::warn!(task_id = %task_id, pid, "killed worker after wave timeout");
                }
                outcomes = all_done.await;
            }
            changed = stop_changed.changed() => {
                if changed.is_ok() && *stop_changed.borrow() {
                    stopped = true;
                    for (task_id, pid) in &pids {
                        supervisor.terminate(*pid);
                        tracing::info!(task_id = %task_id, pid, "sent SIGTERM to worker on manual stop");
                    }
                }
                outcomes = all_done.await;
                monitor_task.abort();
            }
        }

        let timed_out = timed_out.flatten();

        let worker_outcomes = outcomes
            .into_iter()
            .map(|(task_id, wait_result)| {
                let branch = branches.get(&task_id).cloned().unwrap_or_default();
                let exit = wait_result.unwrap_or(Ok(FAILED_WORKER_EXIT)).unwrap_or(FAILED_WORKER_EXIT);
                let passed = match phase {
                    WavePhase::ImplementTask => exit.exit_code == 0,
                    WavePhase::TaskSpecCheck => exit.task_passed && !exit.task_failed,
                };
                let status = if timed_out.is_some() {
                    WorkerStatus::TimedOut
                } else if passed {
                    WorkerStatus::Passed
                } else {
                    WorkerStatus::Failed
                };
                WorkerOutcome {
                    task_id,
                    exit_code: exit.exit_code,
                    status,
                    task_passed: status == WorkerStatus::Passed,
                    task_failed: status != WorkerStatus::Passed,
                    branch,
                }
            })
            .collect();

        WaveWaitResult {
            outcomes: worker_outcomes,
            timed_out,
            stopped,
        }
    }
}

/// Fallback verdict for a worker whose wait task itself errored or
/// panicked (distinct from a worker that exited and wrote no local
/// record, which `WorkerSupervisor::wait` already reports as failed).
const FAILED_WORKER_EXIT: WorkerExit = WorkerExit {
    exit_code: 1,
    task_passed: false,
    task_failed: true,
};

struct WaveWaitResult {
    outcomes: Vec<WorkerOutcome>,
    timed_out: Option<TimeoutKind>,
    stopped: bool,
}

fn kill_all(supervisor: &WorkerSupervisor, running: &[RunningWorker]) {
    for worker in running {
        supervisor.kill(worker.pid);
    }
}

/// §4.9: derive the workflow signal flags from final task statuses.
fn apply_workflow_flags(issue: &mut IssueRecord, tasks: &[Task]) {
    let any_failed = tasks.iter().any(|t| t.status == TaskStatus::Failed);
    let all_passed = !tasks.is_empty() && tasks.iter().all(|t| t.status == TaskStatus::Passed);

    issue.status.flags.task_passed = !any_failed;
    issue.status.flags.task_failed = any_failed;
    issue.status.flags.all_tasks_complete = all_passed && !any_failed;
    issue.status.flags.has_more_tasks = !issue.status.flags.all_tasks_complete;
}
