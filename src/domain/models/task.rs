//! Task domain model.
//!
//! A task moves through a small, closed state machine: `pending`/`failed`
//! tasks are eligible for selection into a wave, `in_progress` while a wave
//! holds a reservation on them, and `passed`/`failed` are terminal for a
//! given attempt (a `failed` task remains eligible for re-selection).

use serde::{Deserialize, Serialize};

use super::ident::validate_path_safe_id;
use crate::domain::errors::OrchestratorResult;

/// The four task states the wave engine recognizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Passed,
    Failed,
}

impl TaskStatus {
    /// `true` for the two statuses a task can be reserved from (§4.3).
    pub const fn is_selectable_from(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

/// One unit of work tracked in the canonical tasks file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Opaque task description fields the worker consumes; passed through
    /// unmodified by the engine.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// Reject tasks whose id fails the path-safety boundary (§9).
    pub fn validate_id(&self) -> OrchestratorResult<()> {
        validate_path_safe_id("taskId", &self.id)
    }

    /// I2: a task is dependency-eligible only if every dependency has
    /// already reached `passed`.
    pub fn dependencies_satisfied(&self, tasks: &[Task]) -> bool {
        self.depends_on.iter().all(|dep_id| {
            tasks
                .iter()
                .any(|t| t.id == *dep_id && t.status == TaskStatus::Passed)
        })
    }

    /// Combines selectability and dependency-satisfaction (§4.3 step 1).
    pub fn is_eligible(&self, tasks: &[Task]) -> bool {
        self.status.is_selectable_from() && self.dependencies_satisfied(tasks)
    }

    /// Bypass transition used only by recovery paths (orphan repair,
    /// timeout cleanup, merge-conflict rollback). Unlike an ordinary
    /// transition this never validates the prior state; callers must log
    /// their own reason, matching the teacher's `force_status` discipline
    /// of never silently skipping a warning on a recovery bypass.
    pub fn force_status(&mut self, status: TaskStatus) {
        self.status = status;
    }
}

/// The tasks file: an ordered sequence whose order is the tie-break for
/// selection (§4.3 step 2b) and is therefore never re-sorted in place.
pub type TasksFile = Vec<Task>;

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, status: TaskStatus, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            status,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn eligible_when_pending_and_deps_passed() {
        let tasks = vec![
            task("a", TaskStatus::Passed, &[]),
            task("b", TaskStatus::Pending, &["a"]),
        ];
        assert!(tasks[1].is_eligible(&tasks));
    }

    #[test]
    fn ineligible_when_dep_not_passed() {
        let tasks = vec![
            task("a", TaskStatus::Pending, &[]),
            task("b", TaskStatus::Pending, &["a"]),
        ];
        assert!(!tasks[1].is_eligible(&tasks));
    }

    #[test]
    fn ineligible_when_in_progress() {
        let tasks = vec![task("a", TaskStatus::InProgress, &[])];
        assert!(!tasks[0].is_eligible(&tasks));
    }

    #[test]
    fn failed_task_is_reselectable() {
        let tasks = vec![task("a", TaskStatus::Failed, &[])];
        assert!(tasks[0].is_eligible(&tasks));
    }

    #[test]
    fn validate_id_rejects_unsafe_ids() {
        let t = task("../etc", TaskStatus::Pending, &[]);
        assert!(t.validate_id().is_err());
    }

    #[test]
    fn force_status_overwrites_unconditionally() {
        let mut t = task("a", TaskStatus::InProgress, &[]);
        t.force_status(TaskStatus::Failed);
        assert_eq!(t.status, TaskStatus::Failed);
    }
}
