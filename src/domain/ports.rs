//! Git primitives, modeled as a small interface (spec §1) so the merge
//! integrator and sandbox manager can be tested without a real repository.

use async_trait::async_trait;

use crate::domain::errors::OrchestratorResult;

/// The outcome of attempting to merge one branch into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAttempt {
    Merged { commit_sha: String },
    Conflict,
    Failed { message: String },
}

/// Abstraction over the git operations the orchestrator needs. Grounded on
/// `services/merge_queue.rs`'s `check_merge_conflicts`/`git_merge` and
/// `services/worktree_service.rs`'s worktree add/remove construction.
#[async_trait]
pub trait GitOps: Send + Sync {
    /// `git worktree add <path> -b <branch> <start_point>`.
    async fn create_worktree(
        &self,
        repo: &std::path::Path,
        worktree_path: &std::path::Path,
        branch: &str,
        start_point: &str,
    ) -> OrchestratorResult<()>;

    /// `git worktree remove --force <path>`; best-effort, never fatal to a
    /// caller that just wants cleanup.
    async fn remove_worktree(
        &self,
        repo: &std::path::Path,
        worktree_path: &std::path::Path,
    ) -> OrchestratorResult<()>;

    /// Probe for a conflict without mutating the working tree, via
    /// `git merge-tree <target> <source>`.
    async fn would_conflict(
        &self,
        repo: &std::path::Path,
        target_branch: &str,
        source_branch: &str,
    ) -> OrchestratorResult<bool>;

    /// Checkout `target_branch` then `git merge --no-ff -m <message> --
    /// <source_branch>`, aborting cleanly on failure.
    async fn merge_branch(
        &self,
        repo: &std::path::Path,
        target_branch: &str,
        source_branch: &str,
        message: &str,
    ) -> OrchestratorResult<MergeAttempt>;

    /// Resolve a branch name to its current commit SHA.
    async fn rev_parse(&self, repo: &std::path::Path, reference: &str) -> OrchestratorResult<String>;
}
