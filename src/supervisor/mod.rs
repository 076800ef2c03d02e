pub mod worker;

pub use worker::{SpawnSpec, WorkerExit, WorkerHandle, WorkerSupervisor};
