//! Recovery manager (§4.7).
//!
//! Grounded on the teacher's recovery-bypass discipline in
//! `domain/models/task.rs` (`force_status` paired with a `tracing::warn!`
//! rather than a silent mutation), generalized here to whole-tasks-file
//! reconciliation and active-wave-record repair.

use chrono::Utc;

use crate::domain::models::{ActiveWaveRecord, Task, TaskStatus, WavePhase};
use crate::state::StateStore;

pub struct RecoveryManager;

impl RecoveryManager {
    pub fn new() -> Self {
        Self
    }

    /// I1 (§4.7.1): a task left `in_progress` without a matching active
    /// wave is an orphan. Repairs in place and returns the repaired ids so
    /// the caller can write canonical feedback for each.
    pub fn repair_orphans(
        &self,
        tasks: &mut [Task],
        active_wave: Option<&ActiveWaveRecord>,
    ) -> Vec<String> {
        let active_ids: Vec<&str> = active_wave
            .map(|w| w.active_wave_task_ids.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let mut repaired = Vec::new();
        for task in tasks.iter_mut() {
            if task.status == TaskStatus::InProgress && !active_ids.contains(&task.id.as_str()) {
                tracing::warn!(task_id = %task.id, "orphan task recovered: in_progress with no matching active wave");
                task.force_status(TaskStatus::Failed);
                repaired.push(task.id.clone());
            }
        }
        repaired
    }

    /// §4.7.2: on resume, an `activeWavePhase` that disagrees with the
    /// canonical phase is corruption, not a hint. Always warns before
    /// correcting (Open Question #3 in `DESIGN.md`: there is no silent
    /// path).
    pub fn reconcile_phase(
        &self,
        active_wave: &mut ActiveWaveRecord,
        canonical_phase: &str,
    ) -> bool {
        let recorded = active_wave.active_wave_phase.as_str();
        if recorded == canonical_phase {
            return false;
        }
        tracing::warn!(
            recorded_phase = recorded,
            canonical_phase,
            "active wave phase mismatch on resume; correcting to canonical phase"
        );
        active_wave.active_wave_phase = match canonical_phase {
            "task_spec_check" => WavePhase::TaskSpecCheck,
            _ => WavePhase::ImplementTask,
        };
        true
    }

    /// §4.7.3: manual stop mid-wave. Restores every reserved task to its
    /// pre-reservation status; the active-wave record itself is left for
    /// the caller to decide whether to clear (implement-phase stop) or
    /// preserve (between-phase stop, so a later run resumes exactly here).
    pub fn rollback_reservation(&self, tasks: &mut [Task], active_wave: &ActiveWaveRecord) {
        for task in tasks.iter_mut() {
            if let Some(prior) = active_wave.reserved_status_by_task_id.get(&task.id) {
                task.force_status(*prior);
            }
        }
    }

    pub async fn write_orphan_feedback(&self, store: &StateStore, task_id: &str, run_root: &std::path::Path) {
        let body = format!(
            "# Orphan recovery\n\nTask `{task_id}` was left `in_progress` at start-of-run with no \
             matching active wave record and has been marked `failed`.\n\nWorker state directory \
             (if any): `{}`\nRecovered at: {}\n",
            run_root.join("workers").join(task_id).display(),
            Utc::now().to_rfc3339(),
        );
        if let Err(e) = store.write_canonical_feedback(task_id, &body).await {
            tracing::warn!(task_id, error = %e, "failed to write orphan recovery feedback");
        }
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}
