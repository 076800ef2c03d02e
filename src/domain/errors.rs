//! Domain errors for the wave orchestrator.

use thiserror::Error;

/// Errors that can occur while driving a wave.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid {kind} {value:?}: {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("corrupted active wave record: {0}")]
    CorruptActiveWave(String),

    #[error("sandbox setup failed for task {task_id}: {source}")]
    SandboxSetup {
        task_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to spawn worker for task {task_id}: {source}")]
    WorkerSpawn {
        task_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("merge failed for task {task_id}: {reason}")]
    Merge { task_id: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identifier_display() {
        let err = OrchestratorError::InvalidIdentifier {
            kind: "taskId",
            value: "..".to_string(),
            reason: "must not contain '..'",
        };
        assert_eq!(
            err.to_string(),
            "invalid taskId \"..\": must not contain '..'"
        );
    }

    #[test]
    fn merge_error_display() {
        let err = OrchestratorError::Merge {
            task_id: "t1".to_string(),
            reason: "conflict".to_string(),
        };
        assert_eq!(err.to_string(), "merge failed for task t1: conflict");
    }
}
