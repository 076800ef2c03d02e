//! Progress log entry rendering (§4.1, §4.10).
//!
//! One combined entry per ordinary wave (implement + spec-check + merge);
//! timeout and setup-failure each get a dedicated entry instead.

use chrono::Utc;

use crate::domain::models::WorkerStatus;
use crate::engine::merge::MergeResult;

pub struct WaveReport<'a> {
    pub wave_id: &'a str,
    pub phase_label: &'a str,
    pub task_statuses: &'a [(String, WorkerStatus)],
    pub merge: &'a MergeResult,
}

/// One combined progress entry for an ordinary (non-timeout,
/// non-setup-failure) wave completion.
pub fn combined_wave_entry(report: &WaveReport<'_>) -> String {
    let passed = report
        .task_statuses
        .iter()
        .filter(|(_, s)| *s == WorkerStatus::Passed)
        .count();
    let total = report.task_statuses.len();
    let merged = report.merge.results.iter().filter(|r| r.success).count();

    let mut lines = vec![format!(
        "[{}] Wave {} ({}) — Passed: {passed}/{total}, Merged: {merged}",
        Utc::now().to_rfc3339(),
        report.wave_id,
        report.phase_label,
    )];
    for (task_id, status) in report.task_statuses {
        lines.push(format!("  - {task_id}: {status:?}"));
    }
    if report.merge.has_conflict {
        lines.push(format!(
            "  ! merge conflict on {}",
            report.merge.conflict_task_id.as_deref().unwrap_or("?")
        ));
    }
    lines.join("\n")
}

/// Dedicated entry for a wave that hit its iteration or inactivity
/// deadline (§4.10).
pub fn timeout_entry(wave_id: &str, kind: &str, task_ids: &[String]) -> String {
    format!(
        "[{}] Parallel Wave Timeout — wave {wave_id} ({kind}); tasks marked failed: {}",
        Utc::now().to_rfc3339(),
        task_ids.join(", "),
    )
}

/// Dedicated entry for a setup failure during reservation/spawn (§4.4 step 3).
pub fn setup_failure_entry(wave_id: &str, error: &str) -> String {
    format!(
        "[{}] Parallel Wave Setup Failure — wave {wave_id}: {error}",
        Utc::now().to_rfc3339(),
    )
}

/// Entry for a corrupted active-wave-record phase mismatch (§4.7.2).
pub fn state_corruption_entry(wave_id: &str, recorded_phase: &str, canonical_phase: &str) -> String {
    format!(
        "[{}] Parallel State Corruption Warning — wave {wave_id}: recorded phase {recorded_phase:?} \
         disagreed with canonical phase {canonical_phase:?}; corrected to canonical",
        Utc::now().to_rfc3339(),
    )
}
