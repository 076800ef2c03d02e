pub mod ident;
pub mod issue;
pub mod sandbox;
pub mod task;
pub mod wave;

pub use ident::validate_path_safe_id;
pub use issue::{
    ExecutionMode, IssueRecord, IssueSettings, IssueStatus, TaskExecutionSettings,
    WorkflowSignalFlags,
};
pub use sandbox::{Sandbox, SandboxStatus};
pub use task::{Task, TaskStatus, TasksFile};
pub use wave::{
    clamp_max_parallel_tasks, ActiveWaveRecord, WaveOutcome, WavePhase, WorkerOutcome,
    WorkerStatus,
};
