//! Worker sandbox model: naming, markers, and an in-memory lifecycle.

use std::path::PathBuf;

use super::ident::validate_path_safe_id;
use crate::domain::errors::OrchestratorResult;

/// In-memory lifecycle of a sandbox, kept purely for typed bookkeeping in
/// the sandbox manager — not part of the persisted JSON contract (§6.3/6.4
/// already enumerate everything that's written to disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Creating,
    Active,
    Completed,
    Removed,
    Failed,
}

impl SandboxStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Removed | Self::Failed)
    }
}

/// A per-(run, task) worker workspace.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub run_id: String,
    pub task_id: String,
    pub issue_id: String,
    pub branch: String,
    pub state_dir: PathBuf,
    pub work_dir: PathBuf,
    pub status: SandboxStatus,
}

impl Sandbox {
    /// Deterministic branch name per §6.6:
    /// `issue/<issueNumber>-<taskId>-<runId>`.
    pub fn branch_name_for(issue_id: &str, task_id: &str, run_id: &str) -> String {
        format!("issue/{issue_id}-{task_id}-{run_id}")
    }

    /// Worker state directory: `<run_root>/workers/<taskId>/`.
    pub fn state_dir_for(runs_root: &std::path::Path, run_id: &str, task_id: &str) -> PathBuf {
        runs_root.join(run_id).join("workers").join(task_id)
    }

    pub fn new(
        issue_id: &str,
        task_id: &str,
        run_id: &str,
        runs_root: &std::path::Path,
        work_root: &std::path::Path,
    ) -> OrchestratorResult<Self> {
        validate_path_safe_id("taskId", task_id)?;
        validate_path_safe_id("runId", run_id)?;
        validate_path_safe_id("issueId", issue_id)?;
        let state_dir = Self::state_dir_for(runs_root, run_id, task_id);
        let work_dir = work_root.join(format!("{run_id}-{task_id}"));
        Ok(Self {
            run_id: run_id.to_string(),
            task_id: task_id.to_string(),
            issue_id: issue_id.to_string(),
            branch: Self::branch_name_for(issue_id, task_id, run_id),
            state_dir,
            work_dir,
            status: SandboxStatus::Creating,
        })
    }

    pub fn implement_marker(&self) -> PathBuf {
        self.state_dir.join("implement.done")
    }

    pub fn spec_check_marker(&self) -> PathBuf {
        self.state_dir.join("spec_check.done")
    }

    pub fn feedback_file(&self) -> PathBuf {
        self.state_dir.join("task-feedback.md")
    }
}
