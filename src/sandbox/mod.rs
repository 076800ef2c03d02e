pub mod manager;

pub use manager::{SandboxContext, SandboxManager};
