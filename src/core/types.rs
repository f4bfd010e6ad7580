use serde::{Deserialize, Serialize};

/// One normalized case record as extracted from the portal's result tables.
///
/// Every field is optional: the portals render only the tables that apply to
/// a given case, and absence is data ("no acts on record"), not an error.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CaseRecord {
    pub cnr_number: Option<String>,
    pub court_name: Option<String>,
    pub case_type: Option<String>,
    pub filing_number: Option<String>,
    pub filing_date: Option<String>,
    pub registration_number: Option<String>,
    pub registration_date: Option<String>,
    pub case_status: Option<String>,
    pub disposal_nature: Option<String>,
    pub decision_date: Option<String>,
    pub court_number_and_judge: Option<String>,
    pub first_hearing_date: Option<String>,
    pub next_hearing_date: Option<String>,
    pub petitioner_name: Option<String>,
    pub petitioner_advocate: Option<String>,
    pub respondent_name: Option<String>,
    pub respondent_advocate: Option<String>,
    pub under_acts: Option<String>,
    pub under_sections: Option<String>,
    #[serde(default)]
    pub acts: Vec<ActEntry>,
    #[serde(default)]
    pub case_history: Vec<HearingEntry>,
    #[serde(default)]
    pub ia_details: Vec<IaEntry>,
    #[serde(default)]
    pub transfer_details: Vec<TransferEntry>,
    /// RFC 3339 timestamp stamped at extraction time.
    #[serde(default)]
    pub scraped_at: Option<String>,
}

impl CaseRecord {
    /// A record with neither a court name nor a case type is the portal's way
    /// of serving a blank page with HTTP 200; treat it as a failed search.
    pub fn is_effectively_empty(&self) -> bool {
        self.court_name.as_deref().unwrap_or("").trim().is_empty()
            && self.case_type.as_deref().unwrap_or("").trim().is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ActEntry {
    pub under_act: String,
    pub under_section: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct HearingEntry {
    pub judge: String,
    pub business_date: String,
    pub hearing_date: String,
    pub purpose: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct IaEntry {
    pub ia_number: String,
    pub party: String,
    pub filing_date: String,
    pub next_date: String,
    pub purpose: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TransferEntry {
    pub registration_number: String,
    pub transfer_date: String,
    pub from_court: String,
    pub to_court: String,
}

/// Outcome of one successful lookup, with the bookkeeping the batch report
/// and the sinks want alongside the record itself.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LookupOutcome {
    pub cnr: String,
    pub record: CaseRecord,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// A CNR the lookup loop gave up on, destined for the failed-cases list.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FailedCase {
    pub cnr_number: String,
    pub error_message: String,
    pub attempts: u32,
    pub failed_at: String,
}

/// Per-CNR entry in a batch run.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchResult {
    pub cnr: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<CaseRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Aggregate report for a batch run.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
    pub results: Vec<BatchResult>,
}

impl BatchReport {
    /// Mean seconds per lookup across the run, 0.0 for an empty batch.
    pub fn avg_seconds_per_lookup(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        let summed: u64 = self.results.iter().map(|r| r.duration_ms).sum();
        summed as f64 / self.results.len() as f64 / 1000.0
    }
}
