//! Result persistence.
//!
//! Two interchangeable sinks: a directory of pretty-printed JSON files (one
//! per case, plus a failed-cases list and a run summary) and a SQLite
//! database. Both ignore duplicate CNRs so re-runs are idempotent.

mod json_dir;
mod sqlite;

pub use json_dir::JsonDirSink;
pub use sqlite::SqliteSink;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::types::{BatchReport, FailedCase, LookupOutcome};

#[async_trait]
pub trait CaseSink: Send + Sync {
    async fn store_case(&self, outcome: &LookupOutcome) -> Result<()>;

    async fn store_failed(&self, failed: &FailedCase) -> Result<()>;

    /// Persist the batch summary at the end of a run.
    async fn write_report(&self, report: &BatchReport) -> Result<()>;

    /// Flush anything buffered (the SQLite sink batches failed rows).
    async fn flush(&self) -> Result<()>;
}
