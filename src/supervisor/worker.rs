//! Worker supervisor (§4.11).
//!
//! Grounded on `adapters/substrates/claude_code.rs`'s `execute_streaming`:
//! spawn via `tokio::process::Command` with piped stdout/stderr and
//! `kill_on_drop(true)`, drain each stream through a `BufReader::lines()`
//! loop in its own task, track the child's pid for out-of-band signalling,
//! and await `child.wait()` on the main task. This module keeps that shape
//! but forwards every line through `tracing` with a `[WORKER <taskId>]
//! [<stream>]` prefix and records the most recent line's arrival time for
//! the inactivity timeout (§4.5) instead of a generic output channel.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::WavePhase;
use crate::state::StateStore;

/// Everything needed to construct the spawn command (§6.2).
pub struct SpawnSpec {
    pub runner_bin: String,
    pub workflow_name: String,
    pub phase: WavePhase,
    pub provider: String,
    pub workflows_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub state_dir: PathBuf,
    pub work_dir: PathBuf,
    pub task_id: String,
}

impl SpawnSpec {
    fn phase_arg(&self) -> &'static str {
        match self.phase {
            WavePhase::ImplementTask => "implement_task",
            WavePhase::TaskSpecCheck => "task_spec_check",
        }
    }
}

/// A running (or just-exited) worker process plus its activity clock.
pub struct WorkerHandle {
    pub task_id: String,
    state_dir: PathBuf,
    child: Child,
    pid: u32,
    last_activity: Arc<Mutex<Instant>>,
    stdout_task: tokio::task::JoinHandle<()>,
    stderr_task: tokio::task::JoinHandle<()>,
}

/// A worker's terminal exit condition plus the verdict flags harvested
/// from its worker-local `issue.json` (§4.11: "on exit, read the
/// worker-local issue record to harvest `taskPassed`/`taskFailed`").
/// A worker that exited without ever writing a readable local record is
/// treated as having failed (`task_passed = false, task_failed = true`),
/// matching [`crate::engine::wave::WaveEngine::read_completed_spec_check`]'s
/// handling of the same absent-record case on resume.
#[derive(Debug, Clone, Copy)]
pub struct WorkerExit {
    pub exit_code: i32,
    pub task_passed: bool,
    pub task_failed: bool,
}

impl WorkerHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Seconds since the most recent line observed on stdout or stderr.
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.lock().expect("activity mutex poisoned").elapsed()
    }

    /// A cheap clone of the activity clock, for monitors that need to poll
    /// idle time after the handle itself has been moved into a wait task.
    pub fn activity_handle(&self) -> Arc<Mutex<Instant>> {
        self.last_activity.clone()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerSupervisor;

impl WorkerSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Spawn one worker process per the §6.2 argument contract.
    pub fn spawn(&self, spec: &SpawnSpec) -> OrchestratorResult<WorkerHandle> {
        let mut command = Command::new(&spec.runner_bin);
        command
            .arg("run-phase")
            .arg("--workflow")
            .arg(&spec.workflow_name)
            .arg("--phase")
            .arg(spec.phase_arg())
            .arg("--provider")
            .arg(&spec.provider)
            .arg("--workflows-dir")
            .arg(&spec.workflows_dir)
            .arg("--prompts-dir")
            .arg(&spec.prompts_dir)
            .arg("--state-dir")
            .arg(&spec.state_dir)
            .arg("--work-dir")
            .arg(&spec.work_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| OrchestratorError::WorkerSpawn {
            task_id: spec.task_id.clone(),
            source: e.into(),
        })?;

        let pid = child.id().ok_or_else(|| OrchestratorError::WorkerSpawn {
            task_id: spec.task_id.clone(),
            source: anyhow::anyhow!("worker process exited before its pid could be read"),
        })?;

        let last_activity = Arc::new(Mutex::new(Instant::now()));

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let stdout_task = spawn_line_forwarder(stdout, spec.task_id.clone(), "stdout", last_activity.clone());
        let stderr_task = spawn_line_forwarder(stderr, spec.task_id.clone(), "stderr", last_activity.clone());

        Ok(WorkerHandle {
            task_id: spec.task_id.clone(),
            state_dir: spec.state_dir.clone(),
            child,
            pid,
            last_activity,
            stdout_task,
            stderr_task,
        })
    }

    /// Wait for the worker to exit, normalize its exit condition (§4.11):
    /// numeric exit code, `128 + signal` if signalled, `0` if neither was
    /// observable, then read the worker-local `issue.json` it wrote to
    /// harvest its `taskPassed`/`taskFailed` verdict flags.
    pub async fn wait(&self, mut handle: WorkerHandle) -> OrchestratorResult<WorkerExit> {
        let status = handle.child.wait().await.map_err(|e| OrchestratorError::WorkerSpawn {
            task_id: handle.task_id.clone(),
            source: e.into(),
        })?;
        let _ = tokio::join!(handle.stdout_task, handle.stderr_task);

        let exit_code = status
            .code()
            .or_else(|| status.signal().map(|sig| 128 + sig))
            .unwrap_or(0);

        let worker_store = StateStore::new(&handle.state_dir);
        let (task_passed, task_failed) = match worker_store.read_issue().await {
            Ok(Some(record)) => (record.status.flags.task_passed, record.status.flags.task_failed),
            Ok(None) => (false, true),
            Err(e) => {
                tracing::warn!(
                    task_id = %handle.task_id,
                    error = %e,
                    "failed to read worker-local issue record; treating as failed"
                );
                (false, true)
            }
        };

        Ok(WorkerExit {
            exit_code,
            task_passed,
            task_failed,
        })
    }

    /// Cooperative termination (manual stop): SIGTERM. Takes a bare pid so
    /// callers can signal a worker whose `WorkerHandle` has already been
    /// moved into its wait task.
    pub fn terminate(&self, pid: u32) {
        send_signal(pid, Signal::SIGTERM);
    }

    /// Coercive termination (timeout or setup rollback): SIGKILL.
    pub fn kill(&self, pid: u32) {
        send_signal(pid, Signal::SIGKILL);
    }
}

impl Default for WorkerSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn send_signal(pid: u32, sig: Signal) {
    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), sig) {
        tracing::warn!(pid, signal = ?sig, error = %e, "failed to signal worker process");
    }
}

fn spawn_line_forwarder<R>(
    reader: R,
    task_id: String,
    stream: &'static str,
    last_activity: Arc<Mutex<Instant>>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    *last_activity.lock().expect("activity mutex poisoned") = Instant::now();
                    tracing::info!(target: "worker", task_id = %task_id, stream, "[WORKER {task_id}][{stream}] {line}");
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(task_id = %task_id, stream, error = %e, "error reading worker output");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(task_id: &str) -> SpawnSpec {
        SpawnSpec {
            runner_bin: "true".to_string(),
            workflow_name: "default".to_string(),
            phase: WavePhase::ImplementTask,
            provider: "anthropic".to_string(),
            workflows_dir: PathBuf::from("./workflows"),
            prompts_dir: PathBuf::from("./prompts"),
            state_dir: PathBuf::from("/tmp"),
            work_dir: PathBuf::from("/tmp"),
            task_id: task_id.to_string(),
        }
    }

    fn seed_issue(state_dir: &std::path::Path, task_passed: bool, task_failed: bool) {
        use crate::domain::models::{
            ExecutionMode, IssueRecord, IssueSettings, IssueStatus, TaskExecutionSettings,
            WorkflowSignalFlags,
        };
        let store = StateStore::new(state_dir);
        let record = IssueRecord {
            issue_id: "42".to_string(),
            phase: "implement_task".to_string(),
            settings: IssueSettings {
                task_execution: TaskExecutionSettings {
                    mode: ExecutionMode::Parallel,
                    max_parallel_tasks: Some(1),
                    iteration_timeout_sec: None,
                    inactivity_timeout_sec: None,
                },
            },
            status: IssueStatus {
                flags: WorkflowSignalFlags {
                    task_passed,
                    task_failed,
                    has_more_tasks: false,
                    all_tasks_complete: false,
                },
                active_wave: None,
            },
        };
        tokio::runtime::Handle::current()
            .block_on(store.write_issue(&record))
            .unwrap();
    }

    #[tokio::test]
    async fn spawn_and_wait_exits_zero_for_true() {
        let dir = tempfile::tempdir().unwrap();
        let mut test_spec = spec("t1");
        test_spec.state_dir = dir.path().to_path_buf();
        let supervisor = WorkerSupervisor::new();
        let handle = supervisor.spawn(&test_spec).unwrap();
        let result = supervisor.wait(handle).await.unwrap();
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn wait_harvests_passed_flags_from_worker_local_issue_record() {
        let dir = tempfile::tempdir().unwrap();
        seed_issue(dir.path(), true, false);
        let mut test_spec = spec("t1");
        test_spec.state_dir = dir.path().to_path_buf();
        let supervisor = WorkerSupervisor::new();
        let handle = supervisor.spawn(&test_spec).unwrap();
        let result = supervisor.wait(handle).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.task_passed);
        assert!(!result.task_failed);
    }

    #[tokio::test]
    async fn wait_harvests_failed_flags_even_when_exit_code_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        seed_issue(dir.path(), false, true);
        let mut test_spec = spec("t1");
        test_spec.state_dir = dir.path().to_path_buf();
        let supervisor = WorkerSupervisor::new();
        let handle = supervisor.spawn(&test_spec).unwrap();
        let result = supervisor.wait(handle).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(!result.task_passed);
        assert!(result.task_failed);
    }

    #[tokio::test]
    async fn wait_defaults_to_failed_when_no_local_record_exists() {
        let dir = tempfile::tempdir().unwrap();
        let mut test_spec = spec("t1");
        test_spec.state_dir = dir.path().to_path_buf();
        let supervisor = WorkerSupervisor::new();
        let handle = supervisor.spawn(&test_spec).unwrap();
        let result = supervisor.wait(handle).await.unwrap();
        assert!(!result.task_passed);
        assert!(result.task_failed);
    }

    #[tokio::test]
    async fn spawn_missing_binary_errors() {
        let supervisor = WorkerSupervisor::new();
        let mut bad_spec = spec("t1");
        bad_spec.runner_bin = "/no/such/binary-wavebed-test".to_string();
        assert!(supervisor.spawn(&bad_spec).is_err());
    }
}
