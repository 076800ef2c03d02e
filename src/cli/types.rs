//! CLI type definitions: clap command structures for the two operations
//! the external workflow engine drives.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wavebed")]
#[command(about = "Crash-safe parallel wave orchestrator for issue-resolution task graphs", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive a single wave-engine iteration for one issue.
    RunWave {
        /// Issue id; its canonical state lives at `<state_root>/<issue_id>/`.
        issue_id: String,

        /// Branch every fresh sandbox is rooted on and merges land on.
        #[arg(long, default_value = "main")]
        canonical_branch: String,
    },

    /// Repeatedly call the wave engine until a terminal workflow signal
    /// (`allTasksComplete`, a merge conflict, or a hard error) is reached.
    Resolve {
        /// Issue id; its canonical state lives at `<state_root>/<issue_id>/`.
        issue_id: String,

        /// Branch every fresh sandbox is rooted on and merges land on.
        #[arg(long, default_value = "main")]
        canonical_branch: String,

        /// Safety bound on loop iterations; `None` means unbounded.
        #[arg(long)]
        max_iterations: Option<usize>,
    },

    /// Print a human-readable table of task statuses and the active wave,
    /// if any.
    Status {
        /// Issue id; its canonical state lives at `<state_root>/<issue_id>/`.
        issue_id: String,
    },
}
