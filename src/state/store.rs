//! Atomic filesystem state store (§4.1, §6.1).
//!
//! Grounded on `bobisme-maw/src/merge/commit.rs`'s `write_merge_state`:
//! write to a `.tmp` sibling, `sync_all` the temp file, `rename` over the
//! target, then open and `sync_all` the parent directory so the rename
//! itself survives a host crash. Every canonical JSON write in this crate
//! goes through [`StateStore::write_json`].

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{validate_path_safe_id, IssueRecord, Task, TasksFile};

fn io_err(path: &Path, source: std::io::Error) -> OrchestratorError {
    OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Root of one issue's canonical state directory.
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn issue_path(&self) -> PathBuf {
        self.root.join("issue.json")
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.root.join("tasks.json")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.root.join("progress.txt")
    }

    pub fn task_feedback_path(&self, task_id: &str) -> PathBuf {
        self.root.join("task-feedback").join(format!("{task_id}.md"))
    }

    pub fn runs_root(&self) -> PathBuf {
        self.root.join(".runs")
    }

    pub fn wave_summary_path(&self, run_id: &str, wave_id: &str) -> PathBuf {
        self.runs_root()
            .join(run_id)
            .join("waves")
            .join(format!("{wave_id}.json"))
    }

    /// Write `value` to `path` via write-to-temp, fsync, rename, fsync-dir.
    pub async fn write_json<T: Serialize + Sync>(
        &self,
        path: &Path,
        value: &T,
    ) -> OrchestratorResult<()> {
        let parent = path.parent().expect("state paths always have a parent");
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;

        let tmp_path = path.with_extension("tmp");
        let body = serde_json::to_vec_pretty(value)?;

        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| io_err(&tmp_path, e))?;
        file.write_all(&body)
            .await
            .map_err(|e| io_err(&tmp_path, e))?;
        file.write_all(b"\n").await.map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().await.map_err(|e| io_err(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| io_err(path, e))?;

        let dir = fs::File::open(parent).await.map_err(|e| io_err(parent, e))?;
        dir.sync_all().await.map_err(|e| io_err(parent, e))?;
        Ok(())
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> OrchestratorResult<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(path, e)),
        }
    }

    pub async fn read_issue(&self) -> OrchestratorResult<Option<IssueRecord>> {
        self.read_json(&self.issue_path()).await
    }

    pub async fn write_issue(&self, record: &IssueRecord) -> OrchestratorResult<()> {
        self.write_json(&self.issue_path(), record).await
    }

    pub async fn read_tasks(&self) -> OrchestratorResult<TasksFile> {
        Ok(self.read_json(&self.tasks_path()).await?.unwrap_or_default())
    }

    pub async fn write_tasks(&self, tasks: &[Task]) -> OrchestratorResult<()> {
        self.write_json(&self.tasks_path(), &tasks).await
    }

    /// Append one entry to the progress log, creating it on first write.
    pub async fn append_progress(&self, text: &str) -> OrchestratorResult<()> {
        let path = self.progress_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_err(parent, e))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| io_err(&path, e))?;
        file.write_all(b"\n").await.map_err(|e| io_err(&path, e))?;
        file.sync_all().await.map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    pub async fn write_wave_summary<T: Serialize + Sync>(
        &self,
        run_id: &str,
        wave_id: &str,
        summary: &T,
    ) -> OrchestratorResult<()> {
        self.write_json(&self.wave_summary_path(run_id, wave_id), summary)
            .await
    }

    pub async fn write_canonical_feedback(&self, task_id: &str, body: &str) -> OrchestratorResult<()> {
        validate_path_safe_id("taskId", task_id)?;
        let path = self.task_feedback_path(task_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_err(parent, e))?;
        }
        fs::write(&path, body).await.map_err(|e| io_err(&path, e))
    }
}
