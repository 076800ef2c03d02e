//! Wave orchestration engine: task selection, timeout supervision, merge
//! integration, crash recovery, and the top-level [`wave::WaveEngine`] that
//! ties them together.

pub mod merge;
pub mod recovery;
pub mod selection;
pub mod timeout;
pub mod wave;

pub use merge::{MergeIntegrator, MergeResult, TaskMergeResult};
pub use recovery::RecoveryManager;
pub use selection::select_wave_tasks;
pub use timeout::{TimeoutBounds, TimeoutKind, TimeoutMonitor};
pub use wave::{EngineConfig, MergeSummary, MergeTaskSummary, PartialSetup, TaskVerdict, WaveEngine, WaveSummary};
