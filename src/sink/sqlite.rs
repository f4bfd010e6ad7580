//! SQLite sink.
//!
//! One row per case keyed by CNR with the scalar columns the downstream
//! consumers filter on, plus the full record as JSON. Failed CNRs are
//! buffered and inserted in batches of 50 to keep bulk runs off the fsync
//! treadmill; `flush()` drains the remainder.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::info;

use super::CaseSink;
use crate::core::types::{BatchReport, FailedCase, LookupOutcome};

const FAILED_BATCH_SIZE: usize = 50;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cases (
    cnr_number        TEXT PRIMARY KEY,
    court_name        TEXT,
    case_type         TEXT,
    case_status       TEXT,
    filing_number     TEXT,
    registration_number TEXT,
    decision_date     TEXT,
    record_json       TEXT NOT NULL,
    scraped_at        TEXT,
    attempts          INTEGER NOT NULL,
    duration_ms       INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS failed_cnrs (
    cnr_number    TEXT PRIMARY KEY,
    error_message TEXT NOT NULL,
    attempts      INTEGER NOT NULL,
    failed_at     TEXT NOT NULL
);
";

pub struct SqliteSink {
    conn: Mutex<Connection>,
    pending_failed: Mutex<Vec<FailedCase>>,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("opening sqlite db {}", path.display()))?;
        conn.execute_batch(SCHEMA)?;
        info!("sqlite sink ready at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            pending_failed: Mutex::new(Vec::new()),
        })
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            pending_failed: Mutex::new(Vec::new()),
        })
    }

    fn insert_failed_batch(&self, batch: &[FailedCase]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("sqlite lock poisoned");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO failed_cnrs
                 (cnr_number, error_message, attempts, failed_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for failed in batch {
                stmt.execute(params![
                    failed.cnr_number,
                    failed.error_message,
                    failed.attempts,
                    failed.failed_at,
                ])?;
            }
        }
        tx.commit()?;
        info!("batch saved {} failed CNRs", batch.len());
        Ok(())
    }
}

#[async_trait]
impl CaseSink for SqliteSink {
    async fn store_case(&self, outcome: &LookupOutcome) -> Result<()> {
        let record = &outcome.record;
        let record_json = serde_json::to_string(record)?;
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO cases
             (cnr_number, court_name, case_type, case_status, filing_number,
              registration_number, decision_date, record_json, scraped_at,
              attempts, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                outcome.cnr,
                record.court_name,
                record.case_type,
                record.case_status,
                record.filing_number,
                record.registration_number,
                record.decision_date,
                record_json,
                record.scraped_at,
                outcome.attempts,
                outcome.duration_ms,
            ],
        )?;
        Ok(())
    }

    async fn store_failed(&self, failed: &FailedCase) -> Result<()> {
        let drained = {
            let mut pending = self.pending_failed.lock().expect("pending lock poisoned");
            pending.push(failed.clone());
            if pending.len() >= FAILED_BATCH_SIZE {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };
        if let Some(batch) = drained {
            self.insert_failed_batch(&batch)?;
        }
        Ok(())
    }

    async fn write_report(&self, report: &BatchReport) -> Result<()> {
        // The summary is derivable from the tables; log it instead of
        // inventing a third table for it.
        info!(
            "batch complete: {}/{} stored, {} failed, {:.1}s avg per lookup",
            report.successful,
            report.total,
            report.failed,
            report.avg_seconds_per_lookup()
        );
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let remaining = {
            let mut pending = self.pending_failed.lock().expect("pending lock poisoned");
            std::mem::take(&mut *pending)
        };
        self.insert_failed_batch(&remaining)
    }
}
