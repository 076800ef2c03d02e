//! Canonical issue record: workflow phase, task-execution settings, the
//! workflow signal flags, and the (optional) active-wave record.

use serde::{Deserialize, Serialize};

use super::wave::ActiveWaveRecord;

/// `settings.taskExecution.mode`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Parallel,
    Sequential,
}

/// Accepts a JSON integer, a float (truncated toward zero), or a numeric
/// string (§8: `1.5` -> `1`, `"3"` -> `3`) wherever `maxParallelTasks` would
/// normally be a bare integer; anything else (object, array, bool) is
/// rejected rather than silently coerced.
fn deserialize_max_parallel_tasks<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(Some(i)),
            None => n
                .as_f64()
                .map(|f| Some(f.trunc() as i64))
                .ok_or_else(|| serde::de::Error::custom("maxParallelTasks number out of range")),
        },
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(|f| Some(f.trunc() as i64))
            .map_err(|_| serde::de::Error::custom(format!("maxParallelTasks is not numeric: {s:?}"))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "maxParallelTasks must be a number, numeric string, or null, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionSettings {
    pub mode: ExecutionMode,
    /// Raw, pre-clamp value as read from JSON; always pass through
    /// [`crate::domain::models::wave::clamp_max_parallel_tasks`] before use.
    #[serde(default, deserialize_with = "deserialize_max_parallel_tasks")]
    pub max_parallel_tasks: Option<i64>,
    /// Seconds; zero/absent disables the bound.
    #[serde(default)]
    pub iteration_timeout_sec: Option<u64>,
    /// Seconds; zero/absent disables the bound.
    #[serde(default)]
    pub inactivity_timeout_sec: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSettings {
    pub task_execution: TaskExecutionSettings,
}

/// The four canonical workflow signal flags (§4.9) the external workflow
/// engine reads to decide the next phase transition.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowSignalFlags {
    pub task_passed: bool,
    pub task_failed: bool,
    pub has_more_tasks: bool,
    pub all_tasks_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueStatus {
    #[serde(flatten)]
    pub flags: WorkflowSignalFlags,
    #[serde(default, rename = "parallel", skip_serializing_if = "Option::is_none")]
    pub active_wave: Option<ActiveWaveRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub issue_id: String,
    pub phase: String,
    pub settings: IssueSettings,
    pub status: IssueStatus,
}
