//! Real [`GitOps`] implementation that shells out to the `git` binary.
//!
//! Grounded on `services/merge_queue.rs`'s `check_merge_conflicts` (via
//! `git merge-tree`) and `git_merge` (checkout + `merge --no-ff`, abort on
//! failure), and `services/worktree_service.rs`'s worktree command
//! construction.

use async_trait::async_trait;
use tokio::process::Command;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::ports::{GitOps, MergeAttempt};

pub struct CliGitOps;

impl CliGitOps {
    async fn run(
        &self,
        repo: &std::path::Path,
        args: &[&str],
    ) -> OrchestratorResult<std::process::Output> {
        Command::new("git")
            .current_dir(repo)
            .args(args)
            .output()
            .await
            .map_err(|e| OrchestratorError::WorkerSpawn {
                task_id: format!("git {}", args.join(" ")),
                source: e.into(),
            })
    }
}

#[async_trait]
impl GitOps for CliGitOps {
    async fn create_worktree(
        &self,
        repo: &std::path::Path,
        worktree_path: &std::path::Path,
        branch: &str,
        start_point: &str,
    ) -> OrchestratorResult<()> {
        let path_str = worktree_path.to_string_lossy().into_owned();
        let output = self
            .run(
                repo,
                &["worktree", "add", "-b", branch, &path_str, start_point],
            )
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(OrchestratorError::SandboxSetup {
                task_id: branch.to_string(),
                source: anyhow::anyhow!(String::from_utf8_lossy(&output.stderr).into_owned()),
            })
        }
    }

    async fn remove_worktree(
        &self,
        repo: &std::path::Path,
        worktree_path: &std::path::Path,
    ) -> OrchestratorResult<()> {
        let path_str = worktree_path.to_string_lossy().into_owned();
        let _ = self
            .run(repo, &["worktree", "remove", "--force", &path_str])
            .await?;
        Ok(())
    }

    async fn would_conflict(
        &self,
        repo: &std::path::Path,
        target_branch: &str,
        source_branch: &str,
    ) -> OrchestratorResult<bool> {
        let output = self
            .run(repo, &["merge-tree", target_branch, source_branch])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.contains("<<<<<<<") || stdout.contains(">>>>>>>"))
    }

    async fn merge_branch(
        &self,
        repo: &std::path::Path,
        target_branch: &str,
        source_branch: &str,
        message: &str,
    ) -> OrchestratorResult<MergeAttempt> {
        let checkout = self.run(repo, &["checkout", target_branch]).await?;
        if !checkout.status.success() {
            return Ok(MergeAttempt::Failed {
                message: String::from_utf8_lossy(&checkout.stderr).into_owned(),
            });
        }

        if self
            .would_conflict(repo, target_branch, source_branch)
            .await?
        {
            return Ok(MergeAttempt::Conflict);
        }

        let merge = self
            .run(repo, &["merge", "--no-ff", "-m", message, "--", source_branch])
            .await?;
        if !merge.status.success() {
            let _ = self.run(repo, &["merge", "--abort"]).await;
            let stderr = String::from_utf8_lossy(&merge.stderr);
            return if stderr.contains("CONFLICT") {
                Ok(MergeAttempt::Conflict)
            } else {
                Ok(MergeAttempt::Failed {
                    message: stderr.into_owned(),
                })
            };
        }

        let sha = self.rev_parse(repo, "HEAD").await?;
        Ok(MergeAttempt::Merged { commit_sha: sha })
    }

    async fn rev_parse(&self, repo: &std::path::Path, reference: &str) -> OrchestratorResult<String> {
        let output = self.run(repo, &["rev-parse", reference]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
