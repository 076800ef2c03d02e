//! Wave and active-wave-record types.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ident::validate_path_safe_id;
use super::task::TaskStatus;
use crate::domain::errors::{OrchestratorError, OrchestratorResult};

/// The phase a wave is currently executing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WavePhase {
    ImplementTask,
    TaskSpecCheck,
}

impl WavePhase {
    /// The canonical `issue.json.phase` string for this wave phase.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ImplementTask => "implement_task",
            Self::TaskSpecCheck => "task_spec_check",
        }
    }
}

/// The persisted active-wave record at `issue.json.status.parallel` (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveWaveRecord {
    pub run_id: String,
    pub active_wave_id: String,
    pub active_wave_phase: WavePhase,
    pub active_wave_task_ids: Vec<String>,
    pub reserved_status_by_task_id: HashMap<String, TaskStatus>,
    pub reserved_at: DateTime<Utc>,
}

impl ActiveWaveRecord {
    /// Structural validation (I3): path-safe ids, and the reservation map's
    /// keys equal exactly the active wave's task id set.
    pub fn validate(&self) -> OrchestratorResult<()> {
        validate_path_safe_id("runId", &self.run_id)?;
        validate_path_safe_id("waveId", &self.active_wave_id)?;
        if self.active_wave_task_ids.is_empty() {
            return Err(OrchestratorError::CorruptActiveWave(
                "activeWaveTaskIds must not be empty".to_string(),
            ));
        }
        for id in &self.active_wave_task_ids {
            validate_path_safe_id("taskId", id)?;
        }
        let wave_ids: HashSet<&str> = self.active_wave_task_ids.iter().map(String::as_str).collect();
        let reserved_ids: HashSet<&str> =
            self.reserved_status_by_task_id.keys().map(String::as_str).collect();
        if wave_ids != reserved_ids {
            return Err(OrchestratorError::CorruptActiveWave(format!(
                "reservedStatusByTaskId keys {reserved_ids:?} do not match activeWaveTaskIds {wave_ids:?}"
            )));
        }
        Ok(())
    }
}

/// A single worker's terminal status, as recorded in the wave summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Passed,
    Failed,
    TimedOut,
}

/// Per-worker outcome collected by the wave engine while waiting (§4.4 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub task_id: String,
    pub exit_code: i32,
    pub status: WorkerStatus,
    pub task_passed: bool,
    pub task_failed: bool,
    pub branch: String,
}

/// The wave engine's top-level, closed result — no control flow by
/// exception (Design Notes §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaveOutcome {
    /// No eligible tasks; nothing was done.
    NoWave,
    /// The wave ran to completion (spec-check + merge), whether or not
    /// every task ultimately passed.
    Completed,
    /// Sandbox or worker spawn failed before any wave state advanced past
    /// reservation; reservations were rolled back.
    SetupFailed,
    /// The iteration or inactivity deadline fired; all workers were killed
    /// and every wave task was marked failed.
    TimedOut,
    /// A manual stop was requested; state was rolled back or preserved for
    /// resume depending on when the stop arrived.
    Stopped,
    /// The merge integrator hit a conflict; the run should end as errored.
    MergeConflict { task_id: String },
}

/// Single source of truth for `maxParallelTasks` clamping (Open Question
/// #2, `DESIGN.md`): any out-of-range or untyped input falls back to `1`,
/// never to an absent value. The hard cap of 8 (§5) is enforced here too.
pub fn clamp_max_parallel_tasks(value: Option<i64>) -> usize {
    const HARD_CAP: i64 = 8;
    match value {
        Some(v) if v >= 1 && v <= HARD_CAP => v as usize,
        Some(v) if v > HARD_CAP => HARD_CAP as usize,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ActiveWaveRecord {
        ActiveWaveRecord {
            run_id: "run-1".to_string(),
            active_wave_id: "wave-1".to_string(),
            active_wave_phase: WavePhase::ImplementTask,
            active_wave_task_ids: vec!["t1".to_string(), "t2".to_string()],
            reserved_status_by_task_id: HashMap::from([
                ("t1".to_string(), TaskStatus::Pending),
                ("t2".to_string(), TaskStatus::Failed),
            ]),
            reserved_at: Utc::now(),
        }
    }

    #[test]
    fn valid_record_passes() {
        assert!(sample_record().validate().is_ok());
    }

    #[test]
    fn mismatched_reservation_keys_fail() {
        let mut r = sample_record();
        r.reserved_status_by_task_id.remove("t2");
        assert!(r.validate().is_err());
    }

    #[test]
    fn unsafe_run_id_fails() {
        let mut r = sample_record();
        r.run_id = "../evil".to_string();
        assert!(r.validate().is_err());
    }

    #[test]
    fn empty_task_ids_fail() {
        let mut r = sample_record();
        r.active_wave_task_ids.clear();
        r.reserved_status_by_task_id.clear();
        assert!(r.validate().is_err());
    }

    #[test]
    fn clamp_boundaries() {
        assert_eq!(clamp_max_parallel_tasks(Some(-1)), 1);
        assert_eq!(clamp_max_parallel_tasks(Some(0)), 1);
        assert_eq!(clamp_max_parallel_tasks(Some(1)), 1);
        assert_eq!(clamp_max_parallel_tasks(Some(7)), 7);
        assert_eq!(clamp_max_parallel_tasks(Some(8)), 8);
        assert_eq!(clamp_max_parallel_tasks(Some(9)), 8);
        assert_eq!(clamp_max_parallel_tasks(None), 1);
    }
}
