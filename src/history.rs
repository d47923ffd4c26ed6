//! Run History
//!
//! Append-only JSON Lines store of finished dispatch runs, one
//! [`RunSummary`] per line.

use crate::dispatch::{HistorySink, RunSummary};
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.local/share/wacrm/history.jsonl` (platform data dir)
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wacrm")
            .join("history.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, summary: &RunSummary) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(summary)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Up to `limit` most recent runs, newest first. Unreadable lines are
    /// skipped.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunSummary>(line) {
                Ok(summary) => runs.push(summary),
                Err(e) => tracing::warn!("Skipping history line {}: {}", i + 1, e),
            }
        }

        runs.reverse();
        runs.truncate(limit);
        Ok(runs)
    }
}

#[async_trait]
impl HistorySink for JsonlHistory {
    async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        self.append(summary).await?;
        tracing::debug!("Run {} saved to {}", summary.run_id, self.path.display());
        Ok(())
    }
}
