//! Flat-file sink: `case_<CNR>.json` per record, an appended
//! `failed_cnrs.json`, and a timestamped run summary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::CaseSink;
use crate::core::types::{BatchReport, FailedCase, LookupOutcome};

pub struct JsonDirSink {
    dir: PathBuf,
    // Serializes read-modify-write of the failed list.
    failed_lock: Mutex<()>,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            failed_lock: Mutex::new(()),
        }
    }

    async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating output dir {}", self.dir.display()))
    }

    fn failed_path(&self) -> PathBuf {
        self.dir.join("failed_cnrs.json")
    }
}

#[async_trait]
impl CaseSink for JsonDirSink {
    async fn store_case(&self, outcome: &LookupOutcome) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.dir.join(format!("case_{}.json", outcome.cnr));
        let body = serde_json::to_vec_pretty(&outcome.record)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!("case {} saved to {}", outcome.cnr, path.display());
        Ok(())
    }

    async fn store_failed(&self, failed: &FailedCase) -> Result<()> {
        self.ensure_dir().await?;
        let _guard = self.failed_lock.lock().await;

        let path = self.failed_path();
        let mut entries: Vec<FailedCase> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        if !entries.iter().any(|e| e.cnr_number == failed.cnr_number) {
            entries.push(failed.clone());
        }
        tokio::fs::write(&path, serde_json::to_vec_pretty(&entries)?)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    async fn write_report(&self, report: &BatchReport) -> Result<()> {
        self.ensure_dir().await?;
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S");
        let path = self.dir.join(format!("harvest_results_{}.json", stamp));
        tokio::fs::write(&path, serde_json::to_vec_pretty(report)?)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!("batch report saved to {}", path.display());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
