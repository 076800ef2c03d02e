//! Sandbox manager (§4.2).
//!
//! Grounded on `services/worktree_service.rs`'s `setup_task_worktree`
//! (creates a state directory, creates a working directory on a fresh
//! branch off a start point) and `is_valid_worktree` (a sandbox is only
//! "reusable" if its working directory still looks like a live worktree).

use std::sync::Arc;

use tokio::fs;
use tracing::instrument;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{Sandbox, SandboxStatus};
use crate::domain::ports::GitOps;
use crate::state::StateStore;

/// Everything the sandbox manager needs to build one sandbox.
pub struct SandboxContext {
    pub issue_id: String,
    pub task_id: String,
    pub run_id: String,
    /// The canonical repository working directory whose branch tip seeds
    /// every fresh sandbox.
    pub canonical_repo: std::path::PathBuf,
    pub canonical_branch: String,
}

pub struct SandboxManager {
    git: Arc<dyn GitOps>,
    runs_root: std::path::PathBuf,
    work_root: std::path::PathBuf,
}

impl SandboxManager {
    pub fn new(
        git: Arc<dyn GitOps>,
        runs_root: std::path::PathBuf,
        work_root: std::path::PathBuf,
    ) -> Self {
        Self {
            git,
            runs_root,
            work_root,
        }
    }

    pub fn runs_root(&self) -> &std::path::Path {
        &self.runs_root
    }

    pub fn work_root(&self) -> &std::path::Path {
        &self.work_root
    }

    /// Create a fresh sandbox: state directory seeded with copies of the
    /// canonical issue/tasks files, working directory on a new branch
    /// rooted at the canonical branch tip.
    #[instrument(skip(self, store), fields(task_id = %ctx.task_id, run_id = %ctx.run_id))]
    pub async fn create(&self, ctx: &SandboxContext, store: &StateStore) -> OrchestratorResult<Sandbox> {
        let mut sandbox = Sandbox::new(
            &ctx.issue_id,
            &ctx.task_id,
            &ctx.run_id,
            &self.runs_root,
            &self.work_root,
        )?;

        fs::create_dir_all(&sandbox.state_dir)
            .await
            .map_err(|e| OrchestratorError::SandboxSetup {
                task_id: ctx.task_id.clone(),
                source: e.into(),
            })?;

        if let Some(issue) = store.read_issue().await? {
            let worker_store = StateStore::new(&sandbox.state_dir);
            worker_store.write_issue(&issue).await?;
        }
        let tasks = store.read_tasks().await?;
        let worker_store = StateStore::new(&sandbox.state_dir);
        worker_store.write_tasks(&tasks).await?;

        // Carry a prior canonical feedback file in for retries, so a
        // worker re-attempting a `failed` task can read why it failed
        // last time before it overwrites `task-feedback.md` with its own.
        let prior_feedback = store.task_feedback_path(&ctx.task_id);
        if let Ok(body) = fs::read_to_string(&prior_feedback).await {
            fs::write(sandbox.feedback_file(), body)
                .await
                .map_err(|e| OrchestratorError::SandboxSetup {
                    task_id: ctx.task_id.clone(),
                    source: e.into(),
                })?;
        }

        self.git
            .create_worktree(
                &ctx.canonical_repo,
                &sandbox.work_dir,
                &sandbox.branch,
                &ctx.canonical_branch,
            )
            .await
            .map_err(|e| OrchestratorError::SandboxSetup {
                task_id: ctx.task_id.clone(),
                source: anyhow::anyhow!(e.to_string()),
            })?;

        sandbox.status = SandboxStatus::Active;
        Ok(sandbox)
    }

    /// Reuse an existing sandbox for the next phase without resetting the
    /// branch (spec-check must see the implement phase's commits).
    #[instrument(skip(self))]
    pub async fn reuse(&self, ctx: &SandboxContext) -> OrchestratorResult<Sandbox> {
        let mut sandbox = Sandbox::new(
            &ctx.issue_id,
            &ctx.task_id,
            &ctx.run_id,
            &self.runs_root,
            &self.work_root,
        )?;
        if !sandbox.work_dir.exists() {
            return Err(OrchestratorError::SandboxSetup {
                task_id: ctx.task_id.clone(),
                source: anyhow::anyhow!(
                    "no existing working directory at {} to reuse",
                    sandbox.work_dir.display()
                ),
            });
        }
        sandbox.status = SandboxStatus::Active;
        Ok(sandbox)
    }

    /// Best-effort removal after a successful merge; never fatal.
    #[instrument(skip(self, sandbox))]
    pub async fn cleanup_on_success(&self, sandbox: &mut Sandbox, repo: &std::path::Path) {
        if self
            .git
            .remove_worktree(repo, &sandbox.work_dir)
            .await
            .is_err()
        {
            tracing::warn!(task_id = %sandbox.task_id, "failed to remove worktree during cleanup");
        }
        sandbox.status = SandboxStatus::Removed;
    }
}
