//! Destinations for processed-email records.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::types::ProcessedEmail;

/// Persists the outcome of every run, successful or failed.
#[async_trait]
pub trait RunRecorder: Send + Sync {
    async fn record(&self, processed: &ProcessedEmail) -> anyhow::Result<()>;
}

/// Keeps records in memory for later inspection.
#[derive(Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<ProcessedEmail>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ProcessedEmail> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl RunRecorder for MemoryRecorder {
    async fn record(&self, processed: &ProcessedEmail) -> anyhow::Result<()> {
        self.records.lock().await.push(processed.clone());
        Ok(())
    }
}

/// Prints each record as one JSON line on stdout.
pub struct StdoutRecorder;

#[async_trait]
impl RunRecorder for StdoutRecorder {
    async fn record(&self, processed: &ProcessedEmail) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string(processed)?);
        Ok(())
    }
}

/// Writes `<email_id>.json` into a directory.
pub struct DirRecorder {
    dir: PathBuf,
}

impl DirRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl RunRecorder for DirRecorder {
    async fn record(&self, processed: &ProcessedEmail) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.dir.join(format!("{}.json", processed.email_id));
        let body = serde_json::to_vec_pretty(processed)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
