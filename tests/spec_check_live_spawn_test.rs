//! Regression coverage for the live-spawn spec-check path (§4.6 step 4):
//! a worker that exits zero but writes `taskPassed=false` to its
//! worker-local `issue.json` must still be recorded `failed`, because the
//! spec-check verdict comes from the harvested flags, never the exit code.
//! The other integration tests in this crate pre-seed `spec_check.done` and
//! so only ever exercise the resume path (`read_completed_spec_check`);
//! this test spawns a real process to exercise `WorkerSupervisor::wait` and
//! `WaveEngine::wait_for_workers` instead.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use wavebed::domain::errors::OrchestratorResult;
use wavebed::domain::models::{
    ActiveWaveRecord, ExecutionMode, IssueRecord, IssueSettings, IssueStatus, Sandbox, Task,
    TaskExecutionSettings, TaskStatus, WaveOutcome, WavePhase, WorkflowSignalFlags,
};
use wavebed::domain::ports::{GitOps, MergeAttempt};
use wavebed::engine::{EngineConfig, TimeoutBounds, WaveEngine};
use wavebed::sandbox::SandboxManager;
use wavebed::state::StateStore;

struct AlwaysMergeGit;

#[async_trait]
impl GitOps for AlwaysMergeGit {
    async fn create_worktree(
        &self,
        _repo: &std::path::Path,
        _worktree_path: &std::path::Path,
        _branch: &str,
        _start_point: &str,
    ) -> OrchestratorResult<()> {
        Ok(())
    }

    async fn remove_worktree(
        &self,
        _repo: &std::path::Path,
        _worktree_path: &std::path::Path,
    ) -> OrchestratorResult<()> {
        Ok(())
    }

    async fn would_conflict(
        &self,
        _repo: &std::path::Path,
        _target_branch: &str,
        _source_branch: &str,
    ) -> OrchestratorResult<bool> {
        Ok(false)
    }

    async fn merge_branch(
        &self,
        _repo: &std::path::Path,
        _target_branch: &str,
        source_branch: &str,
        _message: &str,
    ) -> OrchestratorResult<MergeAttempt> {
        Ok(MergeAttempt::Merged {
            commit_sha: format!("sha-{source_branch}"),
        })
    }

    async fn rev_parse(&self, _repo: &std::path::Path, _reference: &str) -> OrchestratorResult<String> {
        Ok("sha-head".to_string())
    }
}

/// A shell script standing in for the real task runner: it exits `0`
/// regardless, but writes a worker-local `issue.json` with the given
/// `taskPassed`/`taskFailed` flags, to probe that the spec-check verdict
/// comes from those flags and not the exit code.
fn write_fake_runner(dir: &std::path::Path, task_passed: bool, task_failed: bool) -> std::path::PathBuf {
    let script_path = dir.join("fake-runner.sh");
    let body = format!(
        r#"#!/bin/sh
state_dir=""
while [ $# -gt 0 ]; do
  case "$1" in
    --state-dir) state_dir="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$state_dir"
cat > "$state_dir/issue.json" <<JSON
{{"issue_id":"42","phase":"task_spec_check","settings":{{"task_execution":{{"mode":"parallel"}}}},"status":{{"task_passed":{task_passed},"task_failed":{task_failed},"has_more_tasks":false,"all_tasks_complete":false}}}}
JSON
exit 0
"#
    );
    std::fs::write(&script_path, body).unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
    script_path
}

#[tokio::test]
async fn spec_check_fails_task_that_exits_zero_but_reports_task_passed_false() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().join("state");
    let store = StateStore::new(state_dir.clone());
    let git: Arc<dyn GitOps> = Arc::new(AlwaysMergeGit);
    let work_root = dir.path().join("work");
    let sandbox_manager = SandboxManager::new(git.clone(), store.runs_root(), work_root.clone());

    let runner_bin = write_fake_runner(dir.path(), false, true);

    let config = EngineConfig {
        issue_id: "42".to_string(),
        repo_path: dir.path().join("repo"),
        canonical_branch: "main".to_string(),
        runner_bin: runner_bin.display().to_string(),
        workflow_name: "default".to_string(),
        provider: "anthropic".to_string(),
        workflows_dir: dir.path().join("workflows"),
        prompts_dir: dir.path().join("prompts"),
    };
    let engine = WaveEngine::new(git, sandbox_manager, config);

    let run_id = "run-1".to_string();
    let task_id = "t1".to_string();

    // The sandbox's working directory must already exist for the
    // spec-check phase's `SandboxManager::reuse` to accept it, as it would
    // after a real implement phase ran first.
    let sandbox = Sandbox::new("42", &task_id, &run_id, store.runs_root(), &work_root).unwrap();
    tokio::fs::create_dir_all(&sandbox.work_dir).await.unwrap();

    let tasks = vec![Task {
        id: task_id.clone(),
        status: TaskStatus::InProgress,
        depends_on: vec![],
        extra: serde_json::Map::new(),
    }];
    store.write_tasks(&tasks).await.unwrap();

    let active_wave = ActiveWaveRecord {
        run_id: run_id.clone(),
        active_wave_id: "wave-1".to_string(),
        active_wave_phase: WavePhase::TaskSpecCheck,
        active_wave_task_ids: vec![task_id.clone()],
        reserved_status_by_task_id: [(task_id.clone(), TaskStatus::Pending)].into(),
        reserved_at: Utc::now(),
    };
    let issue = IssueRecord {
        issue_id: "42".to_string(),
        phase: "task_spec_check".to_string(),
        settings: IssueSettings {
            task_execution: TaskExecutionSettings {
                mode: ExecutionMode::Parallel,
                max_parallel_tasks: Some(1),
                iteration_timeout_sec: None,
                inactivity_timeout_sec: None,
            },
        },
        status: IssueStatus {
            flags: WorkflowSignalFlags::default(),
            active_wave: Some(active_wave),
        },
    };
    store.write_issue(&issue).await.unwrap();

    let (_tx, rx) = watch::channel(false);
    let outcome = engine
        .run_wave(&store, TimeoutBounds::from_secs(None, None), rx)
        .await
        .expect("run_wave should not error");
    assert_eq!(outcome, WaveOutcome::Completed);

    let tasks = store.read_tasks().await.unwrap();
    let t1 = tasks.iter().find(|t| t.id == task_id).unwrap();
    assert_eq!(
        t1.status,
        TaskStatus::Failed,
        "a worker exiting 0 with taskPassed=false must still fail spec-check"
    );

    let issue = store.read_issue().await.unwrap().unwrap();
    assert!(issue.status.flags.task_failed);
}
