//! Concurrent batch driver.
//!
//! Lookups are independent, so the batch is just a bounded-concurrency
//! stream over [`lookup::lookup_case`], with one twist: the portal bans IPs
//! that hammer it, so lookup *starts* are additionally gated by a shared
//! rate limiter (sliding one-minute window plus a minimum gap).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use super::lookup;
use crate::cnr::CnrNumber;
use crate::core::error::HarvestError;
use crate::core::types::{BatchReport, BatchResult, FailedCase};
use crate::core::AppState;

/// Sliding-window rate limiter for lookup starts.
pub struct RateLimiter {
    max_per_minute: usize,
    min_gap: tokio::time::Duration,
    state: tokio::sync::Mutex<Window>,
}

struct Window {
    starts: VecDeque<tokio::time::Instant>,
    last: Option<tokio::time::Instant>,
}

impl RateLimiter {
    pub fn new(max_per_minute: usize, min_gap_ms: u64) -> Self {
        Self {
            max_per_minute: max_per_minute.max(1),
            min_gap: tokio::time::Duration::from_millis(min_gap_ms),
            state: tokio::sync::Mutex::new(Window {
                starts: VecDeque::new(),
                last: None,
            }),
        }
    }

    /// Block until another lookup may start, then record the start.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.state.lock().await;
                let now = tokio::time::Instant::now();
                let minute = tokio::time::Duration::from_secs(60);
                while let Some(&front) = window.starts.front() {
                    if now.duration_since(front) >= minute {
                        window.starts.pop_front();
                    } else {
                        break;
                    }
                }

                // tokio's `duration_since` saturates to zero for later instants.
                let gap_wait = window
                    .last
                    .map(|last| (last + self.min_gap).duration_since(now))
                    .unwrap_or_default();
                let window_wait = if window.starts.len() >= self.max_per_minute {
                    // Oldest start ages out of the window first.
                    (*window.starts.front().expect("non-empty window") + minute)
                        .duration_since(now)
                } else {
                    tokio::time::Duration::ZERO
                };

                let wait = gap_wait.max(window_wait);
                if wait.is_zero() {
                    window.starts.push_back(now);
                    window.last = Some(now);
                    return;
                }
                wait
            };
            if wait > tokio::time::Duration::from_secs(1) {
                info!("rate limit reached, waiting {:.1}s", wait.as_secs_f64());
            }
            tokio::time::sleep(wait).await;
        }
    }
}

/// Run every CNR through the lookup loop with bounded concurrency, persist
/// results as they land, and return the aggregate report.
pub async fn run_batch(state: &Arc<AppState>, cnrs: Vec<CnrNumber>) -> Result<BatchReport> {
    let start_time = Instant::now();
    let total = cnrs.len();
    let max_concurrent = state.config.resolve_max_concurrent();
    let limiter = Arc::new(RateLimiter::new(
        state.config.resolve_requests_per_minute(),
        state.config.resolve_min_request_gap_ms(),
    ));

    info!(
        "starting batch of {} CNRs (concurrency {}, {}/min)",
        total,
        max_concurrent,
        state.config.resolve_requests_per_minute()
    );

    let results: Vec<BatchResult> = stream::iter(cnrs)
        .map(|cnr| {
            let state = Arc::clone(state);
            let limiter = Arc::clone(&limiter);
            async move {
                limiter.acquire().await;
                let lookup_start = Instant::now();

                match lookup::lookup_case(&state, &cnr).await {
                    Ok(outcome) => {
                        if let Err(e) = state.sink.store_case(&outcome).await {
                            warn!("failed to persist case {}: {}", cnr, e);
                        }
                        BatchResult {
                            cnr: cnr.to_string(),
                            success: true,
                            record: Some(outcome.record),
                            error: None,
                            attempts: outcome.attempts,
                            duration_ms: outcome.duration_ms,
                        }
                    }
                    Err(e) => {
                        let attempts = match &e {
                            HarvestError::Exhausted { attempts, .. } => *attempts,
                            _ => 1,
                        };
                        warn!("CNR {} failed: {}", cnr, e);
                        let failed = FailedCase {
                            cnr_number: cnr.to_string(),
                            error_message: e.to_string(),
                            attempts,
                            failed_at: chrono::Utc::now().to_rfc3339(),
                        };
                        if let Err(sink_err) = state.sink.store_failed(&failed).await {
                            warn!("failed to record failed CNR {}: {}", cnr, sink_err);
                        }
                        BatchResult {
                            cnr: cnr.to_string(),
                            success: false,
                            record: None,
                            error: Some(e.to_string()),
                            attempts,
                            duration_ms: lookup_start.elapsed().as_millis() as u64,
                        }
                    }
                }
            }
        })
        .buffer_unordered(max_concurrent)
        .collect()
        .await;

    let successful = results.iter().filter(|r| r.success).count();
    let failed = results.len() - successful;
    let report = BatchReport {
        total,
        successful,
        failed,
        total_duration_ms: start_time.elapsed().as_millis() as u64,
        results,
    };

    state.sink.flush().await?;
    state.sink.write_report(&report).await?;

    info!(
        "batch complete: {}/{} successful, {} failed, {:.1}s avg per lookup, {:.1}s total",
        report.successful,
        report.total,
        report.failed,
        report.avg_seconds_per_lookup(),
        report.total_duration_ms as f64 / 1000.0
    );
    Ok(report)
}
