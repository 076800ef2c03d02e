//! Property-based tests for the selection/clamping/reservation invariants
//! in §8 (Testable Properties), grounded on the teacher's
//! `tests/property_dependency_resolver.rs` (`proptest!` blocks generating
//! small task graphs and asserting an ordering/structural invariant holds
//! for every generated input).

use std::collections::HashMap;

use proptest::prelude::*;

use wavebed::domain::models::{clamp_max_parallel_tasks, Task, TaskStatus};
use wavebed::engine::{select_wave_tasks, RecoveryManager};

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Passed),
        Just(TaskStatus::Failed),
    ]
}

/// A small task graph: `n` tasks named `t0..tn`, each with a random
/// status and an optional dependency on a strictly-earlier task (so the
/// graph is acyclic by construction).
fn arb_tasks(max_len: usize) -> impl Strategy<Value = Vec<Task>> {
    (1..=max_len).prop_flat_map(|n| {
        proptest::collection::vec(arb_status(), n).prop_map(move |statuses| {
            statuses
                .into_iter()
                .enumerate()
                .map(|(i, status)| {
                    let depends_on = if i > 0 && i % 3 == 0 {
                        vec![format!("t{}", i - 1)]
                    } else {
                        vec![]
                    };
                    Task {
                        id: format!("t{i}"),
                        status,
                        depends_on,
                        extra: serde_json::Map::new(),
                    }
                })
                .collect()
        })
    })
}

proptest! {
    /// Selection purity (§8): calling `select_wave_tasks` repeatedly on an
    /// unchanged tasks file always returns the same list.
    #[test]
    fn prop_selection_is_pure(tasks in arb_tasks(12), max_parallel in 1usize..8) {
        let first = select_wave_tasks(&tasks, max_parallel);
        let second = select_wave_tasks(&tasks, max_parallel);
        let third = select_wave_tasks(&tasks, max_parallel);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&second, &third);
    }

    /// I2 (§8): every selected task's dependencies are all `passed`.
    #[test]
    fn prop_selection_respects_dependencies(tasks in arb_tasks(12), max_parallel in 1usize..8) {
        let selected = select_wave_tasks(&tasks, max_parallel);
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        for id in &selected {
            let task = by_id[id.as_str()];
            for dep in &task.depends_on {
                let dep_status = by_id.get(dep.as_str()).map(|t| t.status);
                prop_assert_eq!(dep_status, Some(TaskStatus::Passed));
            }
        }
    }

    /// Bounded concurrency (§8): selection never returns more than
    /// `max_parallel` ids, and never selects a task that wasn't
    /// `pending`/`failed`.
    #[test]
    fn prop_selection_bounded_and_only_selectable_statuses(
        tasks in arb_tasks(12), max_parallel in 1usize..8
    ) {
        let selected = select_wave_tasks(&tasks, max_parallel);
        prop_assert!(selected.len() <= max_parallel);
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        for id in &selected {
            let status = by_id[id.as_str()].status;
            prop_assert!(matches!(status, TaskStatus::Pending | TaskStatus::Failed));
        }
    }

    /// `failed` tasks are never ordered after a `pending` task (§4.3 step 2a).
    #[test]
    fn prop_failed_tasks_precede_pending_tasks(tasks in arb_tasks(12)) {
        let selected = select_wave_tasks(&tasks, tasks.len().max(1));
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut seen_pending = false;
        for id in &selected {
            match by_id[id.as_str()].status {
                TaskStatus::Failed => prop_assert!(!seen_pending),
                TaskStatus::Pending => seen_pending = true,
                other => prop_assert!(false, "selection returned an ineligible status {other:?}"),
            }
        }
    }

    /// Boundary behaviors (§8): any `i64` clamps into `[1, 8]`, with the
    /// in-range values passed through unchanged.
    #[test]
    fn prop_clamp_always_in_bounds(raw in any::<i64>()) {
        let clamped = clamp_max_parallel_tasks(Some(raw));
        prop_assert!((1..=8).contains(&clamped));
        if (1..=8).contains(&raw) {
            prop_assert_eq!(clamped as i64, raw);
        }
    }

    /// Reservation round-trip (§8): reserving a subset of tasks (flipping
    /// them to `in_progress`) and then rolling back via
    /// `RecoveryManager::rollback_reservation` restores every reserved
    /// task's original status, leaving untouched tasks untouched.
    #[test]
    fn prop_reservation_rollback_restores_prior_status(tasks in arb_tasks(10)) {
        let recovery = RecoveryManager::new();
        let eligible_ids: Vec<String> = tasks
            .iter()
            .filter(|t| t.is_eligible(&tasks))
            .map(|t| t.id.clone())
            .collect();

        let mut working = tasks.clone();
        let mut reserved_status_by_task_id = HashMap::new();
        for task in working.iter_mut() {
            if eligible_ids.contains(&task.id) {
                reserved_status_by_task_id.insert(task.id.clone(), task.status);
                task.force_status(TaskStatus::InProgress);
            }
        }

        let active_wave = wavebed::domain::models::ActiveWaveRecord {
            run_id: "run-1".to_string(),
            active_wave_id: "wave-1".to_string(),
            active_wave_phase: wavebed::domain::models::WavePhase::ImplementTask,
            active_wave_task_ids: eligible_ids.clone(),
            reserved_status_by_task_id,
            reserved_at: chrono::Utc::now(),
        };

        if !eligible_ids.is_empty() {
            recovery.rollback_reservation(&mut working, &active_wave);
            for (before, after) in tasks.iter().zip(working.iter()) {
                prop_assert_eq!(before.status, after.status);
            }
        }
    }
}
