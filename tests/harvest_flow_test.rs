//! End-to-end flow against a scripted portal: a batch where one CNR needs a
//! captcha retry before succeeding and another does not exist, persisted
//! through the JSON sink.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cnr_harvest::captcha::{CachedSolver, CaptchaSolver};
use cnr_harvest::cnr::CnrNumber;
use cnr_harvest::core::config::HarvestConfig;
use cnr_harvest::core::types::{CaseRecord, FailedCase, HearingEntry};
use cnr_harvest::portal::{CasePortal, PortalKind};
use cnr_harvest::sink::JsonDirSink;
use cnr_harvest::tools::batch;
use cnr_harvest::{AppState, HarvestError};

const RESULT_PAGE: &str = include_str!("fixtures/case_result.html");
const CAPTCHA_ERROR: &str = r#"<div class="error_message">Invalid Captcha</div>"#;
const NOT_FOUND: &str = "<body>Invalid CNR Number</body>";

const GOOD_CNR: &str = "KLHC010248732020";
const MISSING_CNR: &str = "KLHC019999992020";

/// Portal that scripts a response queue per CNR.
struct ScriptedPortal {
    scripts: Mutex<HashMap<String, VecDeque<&'static str>>>,
    captcha_serial: Mutex<u32>,
}

impl ScriptedPortal {
    fn new(scripts: Vec<(&str, Vec<&'static str>)>) -> Self {
        Self {
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|(cnr, pages)| (cnr.to_string(), pages.into()))
                    .collect(),
            ),
            captcha_serial: Mutex::new(0),
        }
    }
}

#[async_trait]
impl CasePortal for ScriptedPortal {
    fn kind(&self) -> PortalKind {
        PortalKind::District
    }

    async fn refresh_token(&self) -> Result<(), HarvestError> {
        Ok(())
    }

    async fn ensure_token(&self) -> Result<(), HarvestError> {
        Ok(())
    }

    async fn fetch_captcha(&self) -> Result<Vec<u8>, HarvestError> {
        let mut serial = self.captcha_serial.lock().unwrap();
        *serial += 1;
        Ok(format!("captcha-{serial}").into_bytes())
    }

    async fn search_by_cnr(
        &self,
        cnr: &CnrNumber,
        _captcha: &str,
    ) -> Result<String, HarvestError> {
        let mut scripts = self.scripts.lock().unwrap();
        let page = scripts
            .get_mut(cnr.as_str())
            .and_then(|queue| queue.pop_front())
            .unwrap_or(NOT_FOUND);
        Ok(page.to_string())
    }

    async fn fetch_case_history(
        &self,
        _cnr: &CnrNumber,
    ) -> Result<Vec<HearingEntry>, HarvestError> {
        Ok(Vec::new())
    }
}

struct FixedSolver;

#[async_trait]
impl CaptchaSolver for FixedSolver {
    async fn solve(&self, _image: &[u8]) -> anyhow::Result<String> {
        Ok("x7Kp2".into())
    }
    fn name(&self) -> &'static str {
        "fixed"
    }
}

fn temp_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("cnr_harvest_it_{}_{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[tokio::test(start_paused = true)]
async fn batch_flow_persists_cases_and_failures() {
    let out_dir = temp_dir("flow");
    let portal = Arc::new(ScriptedPortal::new(vec![
        (GOOD_CNR, vec![CAPTCHA_ERROR, RESULT_PAGE]),
        (MISSING_CNR, vec![NOT_FOUND]),
    ]));

    let config: HarvestConfig = serde_json::from_str(
        r#"{ "max_attempts": 3, "min_request_gap_ms": 0, "requests_per_minute": 1000, "max_concurrent": 2 }"#,
    )
    .unwrap();
    let state = Arc::new(
        AppState::new(config)
            .unwrap()
            .with_portal(portal)
            .with_solver(Arc::new(CachedSolver::new(Arc::new(FixedSolver))))
            .with_sink(Arc::new(JsonDirSink::new(out_dir.clone()))),
    );

    let cnrs = vec![
        CnrNumber::parse(GOOD_CNR).unwrap(),
        CnrNumber::parse(MISSING_CNR).unwrap(),
    ];
    let report = batch::run_batch(&state, cnrs).await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 1);

    let good = report
        .results
        .iter()
        .find(|r| r.cnr == GOOD_CNR)
        .expect("good CNR in report");
    assert!(good.success);
    assert_eq!(good.attempts, 2, "captcha rejection costs one attempt");

    // The record file exists and round-trips with the extracted fields.
    let case_path = out_dir.join(format!("case_{}.json", GOOD_CNR));
    let record: CaseRecord =
        serde_json::from_slice(&std::fs::read(&case_path).unwrap()).unwrap();
    assert_eq!(
        record.court_name.as_deref(),
        Some("In the High Court of Kerala at Ernakulam")
    );
    assert_eq!(record.cnr_number.as_deref(), Some(GOOD_CNR));
    assert_eq!(record.case_status.as_deref(), Some("Pending"));
    assert_eq!(record.next_hearing_date.as_deref(), Some("03-02-2021"));
    assert_eq!(record.petitioner_advocate.as_deref(), Some("P A MOHAMMED ASLAM"));
    assert_eq!(record.under_acts.as_deref(), Some("Constitution of India"));
    assert_eq!(record.case_history.len(), 2);
    assert_eq!(record.ia_details.len(), 1);
    assert_eq!(record.ia_details[0].purpose, "INTERIM STAY");

    // The missing CNR landed in the failed list.
    let failed: Vec<FailedCase> =
        serde_json::from_slice(&std::fs::read(out_dir.join("failed_cnrs.json")).unwrap())
            .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].cnr_number, MISSING_CNR);
    assert!(failed[0].error_message.contains("no case found"));
}

#[tokio::test(start_paused = true)]
async fn exhausted_lookup_reports_attempt_budget() {
    let out_dir = temp_dir("exhaust");
    // Every response rejects the captcha; the budget must run out.
    let portal = Arc::new(ScriptedPortal::new(vec![(
        GOOD_CNR,
        vec![CAPTCHA_ERROR, CAPTCHA_ERROR, CAPTCHA_ERROR],
    )]));

    let config: HarvestConfig = serde_json::from_str(
        r#"{ "max_attempts": 3, "min_request_gap_ms": 0, "requests_per_minute": 1000 }"#,
    )
    .unwrap();
    let state = Arc::new(
        AppState::new(config)
            .unwrap()
            .with_portal(portal)
            .with_solver(Arc::new(CachedSolver::new(Arc::new(FixedSolver))))
            .with_sink(Arc::new(JsonDirSink::new(out_dir.clone()))),
    );

    let report = batch::run_batch(&state, vec![CnrNumber::parse(GOOD_CNR).unwrap()])
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    let result = &report.results[0];
    assert_eq!(result.attempts, 3);
    assert!(result.error.as_deref().unwrap().contains("exhausted"));
}
