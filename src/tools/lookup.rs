//! The retry/CAPTCHA-solve/verify loop driving a single CNR lookup.
//!
//! One attempt is: ensure session token → fetch captcha → solve → submit →
//! classify. Retryable failures (wrong captcha, stale token, blank record)
//! burn an attempt and sleep an exponential backoff; terminal ones (invalid
//! CNR, no such case) return immediately. Exhaustion is itself a typed error
//! carrying the attempt count so callers can file the CNR under failed.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::cnr::CnrNumber;
use crate::core::error::HarvestError;
use crate::core::types::{CaseRecord, LookupOutcome};
use crate::core::AppState;
use crate::portal::parse::{self, ResponseClass};

/// Sleep before retry `n` (1-based): 2s, 4s, 8s, capped at 10s.
pub fn backoff_delay(failed_attempts: u32) -> std::time::Duration {
    let ms = 1000u64
        .saturating_mul(1u64 << failed_attempts.min(10))
        .min(10_000);
    std::time::Duration::from_millis(ms)
}

pub async fn lookup_case(
    state: &Arc<AppState>,
    cnr: &CnrNumber,
) -> Result<LookupOutcome, HarvestError> {
    let max_attempts = state.config.resolve_max_attempts();
    let start = Instant::now();
    let mut last_error: Option<HarvestError> = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            tokio::time::sleep(backoff_delay(attempt - 1)).await;
        }
        info!("attempt {}/{} for CNR {}", attempt, max_attempts, cnr);

        match run_attempt(state, cnr).await {
            Ok(record) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    "CNR {} scraped in {:.1}s ({} attempt(s))",
                    cnr,
                    duration_ms as f64 / 1000.0,
                    attempt
                );
                return Ok(LookupOutcome {
                    cnr: cnr.to_string(),
                    record,
                    attempts: attempt,
                    duration_ms,
                });
            }
            Err(e) if e.is_retryable() => {
                warn!("attempt {} for CNR {} failed: {}", attempt, cnr, e);
                if e.needs_token_refresh() {
                    if let Err(refresh_err) = state.portal.refresh_token().await {
                        warn!("token refresh failed: {}", refresh_err);
                    }
                }
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(HarvestError::Exhausted {
        attempts: max_attempts,
        last: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    })
}

async fn run_attempt(
    state: &Arc<AppState>,
    cnr: &CnrNumber,
) -> Result<CaseRecord, HarvestError> {
    state.portal.ensure_token().await?;

    let image = state.portal.fetch_captcha().await?;
    let solution = state
        .solver
        .solve(&image)
        .await
        .map_err(|e| HarvestError::CaptchaSolveFailed(e.to_string()))?;

    let html = state.portal.search_by_cnr(cnr, &solution).await?;

    match parse::classify_response(&html) {
        ResponseClass::CaptchaRejected => {
            // Wrong answer; make sure a re-served image is not answered
            // from cache with the same wrong text.
            state.solver.invalidate(&image).await;
            Err(HarvestError::CaptchaRejected)
        }
        ResponseClass::InvalidRequest => Err(HarvestError::InvalidRequest),
        ResponseClass::NotFound => Err(HarvestError::RecordNotFound),
        ResponseClass::Content => {
            let mut record = parse::parse_case_record(&html, state.portal.kind());
            if record.is_effectively_empty() {
                return Err(HarvestError::EmptyRecord);
            }
            if record.cnr_number.is_none() {
                record.cnr_number = Some(cnr.to_string());
            }

            // History is an extra endpoint and strictly additive; a failure
            // here never fails the lookup.
            if record.case_history.is_empty() {
                match state.portal.fetch_case_history(cnr).await {
                    Ok(history) => record.case_history = history,
                    Err(e) => warn!("history fetch for CNR {} failed: {}", cnr, e),
                }
            }
            Ok(record)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::{CachedSolver, CaptchaSolver};
    use crate::core::config::HarvestConfig;
    use crate::core::types::HearingEntry;
    use crate::portal::{CasePortal, PortalKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const GOOD_PAGE: &str = r#"
        <h2 id="chHeading">District Court Ernakulam</h2>
        <table class="case_details_table">
            <tr><td>Case Type</td><td>OS - ORIGINAL SUIT</td></tr>
            <tr><td>CNR Number</td><td>KLER150000052020</td></tr>
        </table>"#;
    const CAPTCHA_ERROR_PAGE: &str =
        r#"<div class="error_message">Invalid Captcha</div>"#;
    // Parses cleanly but carries neither court name nor case type; the portal
    // serves this shape when the session goes stale mid-search.
    const BLANK_PAGE: &str = r#"
        <html><body>
        <table class="case_details_table"><tr><td></td></tr></table>
        </body></html>"#;
    const OOPS_PAGE: &str = "<body>Oops! <a>Invalid Request</a></body>";
    const NOT_FOUND_PAGE: &str = "<body>Invalid CNR Number</body>";

    /// Scripted portal: each search pops the next canned response.
    struct FakePortal {
        responses: Mutex<VecDeque<&'static str>>,
        captcha_serial: AtomicU32,
        refreshes: AtomicUsize,
        searches: AtomicUsize,
    }

    impl FakePortal {
        fn new(responses: Vec<&'static str>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                captcha_serial: AtomicU32::new(0),
                refreshes: AtomicUsize::new(0),
                searches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CasePortal for FakePortal {
        fn kind(&self) -> PortalKind {
            PortalKind::District
        }

        async fn refresh_token(&self) -> Result<(), HarvestError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn ensure_token(&self) -> Result<(), HarvestError> {
            Ok(())
        }

        async fn fetch_captcha(&self) -> Result<Vec<u8>, HarvestError> {
            // Distinct bytes per call so the solve cache never short-circuits
            // the attempt sequence.
            let n = self.captcha_serial.fetch_add(1, Ordering::SeqCst);
            Ok(format!("captcha-{n}").into_bytes())
        }

        async fn search_by_cnr(
            &self,
            _cnr: &CnrNumber,
            _captcha: &str,
        ) -> Result<String, HarvestError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap().pop_front();
            Ok(next.unwrap_or(CAPTCHA_ERROR_PAGE).to_string())
        }

        async fn fetch_case_history(
            &self,
            _cnr: &CnrNumber,
        ) -> Result<Vec<HearingEntry>, HarvestError> {
            Ok(vec![HearingEntry {
                judge: "JUSTICE T".into(),
                business_date: "01-01-2021".into(),
                hearing_date: "15-01-2021".into(),
                purpose: "HEARING".into(),
            }])
        }
    }

    struct FixedSolver;

    #[async_trait]
    impl CaptchaSolver for FixedSolver {
        async fn solve(&self, _image: &[u8]) -> anyhow::Result<String> {
            Ok("aB3x9".into())
        }
        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn test_state(portal: Arc<FakePortal>, max_attempts: u32) -> Arc<AppState> {
        let config: HarvestConfig =
            serde_json::from_str(&format!(r#"{{ "max_attempts": {max_attempts} }}"#)).unwrap();
        Arc::new(
            AppState::new(config)
                .unwrap()
                .with_portal(portal)
                .with_solver(Arc::new(CachedSolver::new(Arc::new(FixedSolver)))),
        )
    }

    fn cnr() -> CnrNumber {
        CnrNumber::parse("KLER150000052020").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_captcha_rejection() {
        let portal = Arc::new(FakePortal::new(vec![CAPTCHA_ERROR_PAGE, GOOD_PAGE]));
        let state = test_state(portal.clone(), 5);

        let outcome = lookup_case(&state, &cnr()).await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            outcome.record.court_name.as_deref(),
            Some("District Court Ernakulam")
        );
        // History was fetched because the result page carried none.
        assert_eq!(outcome.record.case_history.len(), 1);
        assert_eq!(portal.searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_result_page_burns_attempt_then_succeeds() {
        let portal = Arc::new(FakePortal::new(vec![BLANK_PAGE, GOOD_PAGE]));
        let state = test_state(portal.clone(), 5);

        let outcome = lookup_case(&state, &cnr()).await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert!(!outcome.record.is_effectively_empty());
        assert_eq!(portal.searches.load(Ordering::SeqCst), 2);
        // A blank page is a session problem, not a token problem.
        assert_eq!(portal.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempt_budget() {
        let portal = Arc::new(FakePortal::new(vec![]));
        let state = test_state(portal.clone(), 3);

        let err = lookup_case(&state, &cnr()).await.unwrap_err();
        match err {
            HarvestError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("captcha"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(portal.searches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_terminal_after_one_attempt() {
        let portal = Arc::new(FakePortal::new(vec![NOT_FOUND_PAGE, GOOD_PAGE]));
        let state = test_state(portal.clone(), 5);

        let err = lookup_case(&state, &cnr()).await.unwrap_err();
        assert!(matches!(err, HarvestError::RecordNotFound));
        assert_eq!(portal.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_request_triggers_token_refresh() {
        let portal = Arc::new(FakePortal::new(vec![OOPS_PAGE, GOOD_PAGE]));
        let state = test_state(portal.clone(), 5);

        let outcome = lookup_case(&state, &cnr()).await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(portal.refreshes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_delays_double_and_cap() {
        assert_eq!(backoff_delay(1).as_millis(), 2000);
        assert_eq!(backoff_delay(2).as_millis(), 4000);
        assert_eq!(backoff_delay(3).as_millis(), 8000);
        assert_eq!(backoff_delay(4).as_millis(), 10_000);
        assert_eq!(backoff_delay(30).as_millis(), 10_000);
    }
}
