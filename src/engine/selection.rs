//! Deterministic wave task selection (§4.3).
//!
//! Grounded on `other_examples/..._wave_executor.rs.rs`'s `compute_waves`
//! dependency-satisfied scan, adapted into a pure function over a single
//! wave (rather than precomputing the whole DAG) because resumable
//! single-wave reservation (§4.4) must re-derive the next wave fresh on
//! every call — calling it twice on unchanged input must return the same
//! list (the round-trip property in §8).

use crate::domain::models::{Task, TaskStatus};

/// Select up to `max_parallel` eligible task ids, `failed` tasks first,
/// otherwise preserving file order. A pure function of its inputs.
pub fn select_wave_tasks(tasks: &[Task], max_parallel: usize) -> Vec<String> {
    let mut failed_first: Vec<&Task> = Vec::new();
    let mut pending_rest: Vec<&Task> = Vec::new();

    for task in tasks {
        if !task.is_eligible(tasks) {
            continue;
        }
        match task.status {
            TaskStatus::Failed => failed_first.push(task),
            TaskStatus::Pending => pending_rest.push(task),
            _ => unreachable!("is_eligible only returns true for pending/failed"),
        }
    }

    failed_first
        .into_iter()
        .chain(pending_rest)
        .take(max_parallel)
        .map(|t| t.id.clone())
        .collect()
}

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
    fn prefers_failed_over_pending() {
        let tasks = vec![
            task("a", TaskStatus::Pending, &[]),
            task("b", TaskStatus::Failed, &[]),
        ];
        assert_eq!(select_wave_tasks(&tasks, 2), vec!["b", "a"]);
    }

    #[test]
    fn preserves_file_order_within_group() {
        let tasks = vec![
            task("a", TaskStatus::Pending, &[]),
            task("b", TaskStatus::Pending, &[]),
            task("c", TaskStatus::Pending, &[]),
        ];
        assert_eq!(select_wave_tasks(&tasks, 2), vec!["a", "b"]);
    }

    #[test]
    fn excludes_tasks_with_unmet_dependencies() {
        let tasks = vec![
            task("a", TaskStatus::Pending, &[]),
            task("b", TaskStatus::Pending, &["a"]),
        ];
        assert_eq!(select_wave_tasks(&tasks, 5), vec!["a"]);
    }

    #[test]
    fn selection_is_a_pure_function() {
        let tasks = vec![
            task("a", TaskStatus::Pending, &[]),
            task("b", TaskStatus::Failed, &[]),
            task("c", TaskStatus::Pending, &[]),
        ];
        let first = select_wave_tasks(&tasks, 2);
        let second = select_wave_tasks(&tasks, 2);
        let third = select_wave_tasks(&tasks, 2);
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[test]
    fn empty_when_nothing_eligible() {
        let tasks = vec![task("a", TaskStatus::InProgress, &[])];
        assert!(select_wave_tasks(&tasks, 5).is_empty());
    }
}
