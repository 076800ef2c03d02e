//! Merge integrator (§4.8).
//!
//! Grounded on `services/merge_queue.rs`'s `check_merge_conflicts`/
//! `git_merge`, generalized from its two-stage agent-to-task/task-to-main
//! queue down to a single serial pass over [`GitOps`] for one wave's
//! passing tasks.

use std::sync::Arc;

use crate::domain::ports::{GitOps, MergeAttempt};

/// Per-task merge outcome, in merge order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMergeResult {
    pub task_id: String,
    pub success: bool,
    pub conflict: bool,
    pub commit_sha: Option<String>,
    pub error: Option<String>,
}

/// The aggregate result the wave engine folds into the wave summary and
/// uses to pick the run's terminal [`crate::domain::models::WaveOutcome`].
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    pub results: Vec<TaskMergeResult>,
    pub has_conflict: bool,
    pub conflict_task_id: Option<String>,
}

pub struct MergeIntegrator {
    git: Arc<dyn GitOps>,
}

impl MergeIntegrator {
    pub fn new(git: Arc<dyn GitOps>) -> Self {
        Self { git }
    }

    /// `passing`: (task_id, branch) pairs whose tasks passed spec-check.
    /// Merges in lexicographic task-id order, stopping at the first
    /// conflict (§4.8 steps 1-4).
    pub async fn merge_wave(
        &self,
        repo: &std::path::Path,
        canonical_branch: &str,
        mut passing: Vec<(String, String)>,
    ) -> MergeResult {
        passing.sort_by(|a, b| a.0.cmp(&b.0));

        let mut result = MergeResult::default();
        for (task_id, branch) in passing {
            if result.has_conflict {
                break;
            }
            let message = format!("Merge task {task_id}");
            match self
                .git
                .merge_branch(repo, canonical_branch, &branch, &message)
                .await
            {
                Ok(MergeAttempt::Merged { commit_sha }) => {
                    result.results.push(TaskMergeResult {
                        task_id,
                        success: true,
                        conflict: false,
                        commit_sha: Some(commit_sha),
                        error: None,
                    });
                }
                Ok(MergeAttempt::Conflict) => {
                    result.has_conflict = true;
                    result.conflict_task_id = Some(task_id.clone());
                    result.results.push(TaskMergeResult {
                        task_id,
                        success: false,
                        conflict: true,
                        commit_sha: None,
                        error: Some("merge conflict".to_string()),
                    });
                }
                Ok(MergeAttempt::Failed { message }) => {
                    result.results.push(TaskMergeResult {
                        task_id,
                        success: false,
                        conflict: false,
                        commit_sha: None,
                        error: Some(message),
                    });
                }
                Err(e) => {
                    result.results.push(TaskMergeResult {
                        task_id,
                        success: false,
                        conflict: false,
                        commit_sha: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::OrchestratorResult;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedGit {
        conflicts_on: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GitOps for ScriptedGit {
        async fn create_worktree(
            &self,
            _: &std::path::Path,
            _: &std::path::Path,
            _: &str,
            _: &str,
        ) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn remove_worktree(&self, _: &std::path::Path, _: &std::path::Path) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn would_conflict(&self, _: &std::path::Path, _: &str, _: &str) -> OrchestratorResult<bool> {
            Ok(false)
        }
        async fn merge_branch(
            &self,
            _repo: &std::path::Path,
            _target: &str,
            source: &str,
            _message: &str,
        ) -> OrchestratorResult<MergeAttempt> {
            self.calls.lock().unwrap().push(source.to_string());
            if self.conflicts_on.iter().any(|b| b == source) {
                Ok(MergeAttempt::Conflict)
            } else {
                Ok(MergeAttempt::Merged { commit_sha: format!("sha-{source}") })
            }
        }
        async fn rev_parse(&self, _: &std::path::Path, _: &str) -> OrchestratorResult<String> {
            Ok("sha".to_string())
        }
    }

    #[tokio::test]
    async fn merges_in_lexicographic_order_without_conflict() {
        let git = Arc::new(ScriptedGit { conflicts_on: vec![], calls: Mutex::new(vec![]) });
        let integrator = MergeIntegrator::new(git.clone());
        let result = integrator
            .merge_wave(
                std::path::Path::new("/tmp"),
                "main",
                vec![
                    ("t2".to_string(), "branch-t2".to_string()),
                    ("t1".to_string(), "branch-t1".to_string()),
                ],
            )
            .await;
        assert!(!result.has_conflict);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].task_id, "t1");
        assert_eq!(result.results[1].task_id, "t2");
        assert_eq!(*git.calls.lock().unwrap(), vec!["branch-t1", "branch-t2"]);
    }

    #[tokio::test]
    async fn stops_at_first_conflict() {
        let git = Arc::new(ScriptedGit {
            conflicts_on: vec!["branch-t1".to_string()],
            calls: Mutex::new(vec![]),
        });
        let integrator = MergeIntegrator::new(git.clone());
        let result = integrator
            .merge_wave(
                std::path::Path::new("/tmp"),
                "main",
                vec![
                    ("t1".to_string(), "branch-t1".to_string()),
                    ("t2".to_string(), "branch-t2".to_string()),
                ],
            )
            .await;
        assert!(result.has_conflict);
        assert_eq!(result.conflict_task_id, Some("t1".to_string()));
        // t2 never attempted: processing stops at the first conflict.
        assert_eq!(result.results.len(), 1);
        assert_eq!(*git.calls.lock().unwrap(), vec!["branch-t1"]);
    }
}
