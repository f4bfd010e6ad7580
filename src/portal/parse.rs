//! HTML-table-to-record extraction.
//!
//! The portals render results as a fistful of classed tables. Markup is not
//! under our control and changes without notice, so everything here is
//! defensive in shape only: a missing table yields an empty field, never an
//! error. Tables are label-matched rather than position-matched wherever the
//! page allows it.

use scraper::{ElementRef, Html, Selector};

use super::PortalKind;
use crate::core::types::{ActEntry, CaseRecord, HearingEntry, IaEntry, TransferEntry};

/// What a raw search response turned out to be, before any extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseClass {
    /// The portal said the captcha text was wrong.
    CaptchaRejected,
    /// The "Oops! Invalid Request" interstitial (stale app token).
    InvalidRequest,
    /// The portal answered "Invalid CNR Number" / case does not exist.
    NotFound,
    /// Looks like a result document, hand it to the extractor.
    Content,
}

/// Classify a search response by its error markers. Order matters: the
/// interstitial also contains the word "Captcha" in its page chrome on some
/// deployments, so the invalid-request check runs first.
pub fn classify_response(html: &str) -> ResponseClass {
    if is_invalid_request_page(html) {
        return ResponseClass::InvalidRequest;
    }
    let error = error_message(html).unwrap_or_default().to_lowercase();
    let lower = html.to_lowercase();
    if error.contains("captcha") || lower.contains("invalid captcha") {
        return ResponseClass::CaptchaRejected;
    }
    if lower.contains("invalid cnr") || lower.contains("this case code does not exists") {
        return ResponseClass::NotFound;
    }
    ResponseClass::Content
}

/// The "Oops! Invalid Request" page the portal serves when the app token has
/// gone stale.
pub fn is_invalid_request_page(html: &str) -> bool {
    html.contains("Oops") && html.contains("Invalid Request")
}

/// Text of the portal's `error_message` div, if present and non-empty.
pub fn error_message(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(".error_message").ok()?;
    let text = collapse_ws(&doc.select(&sel).next()?.text().collect::<String>());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cell_text(cell: ElementRef) -> String {
    collapse_ws(&cell.text().collect::<String>())
}

/// All rows of the first table matching `table_selector`, as trimmed `th`/`td`
/// cell text. All-empty rows are dropped.
pub fn table_rows(doc: &Html, table_selector: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let (Ok(table_sel), Ok(tr_sel), Ok(cell_sel)) = (
        Selector::parse(table_selector),
        Selector::parse("tr"),
        Selector::parse("th, td"),
    ) else {
        return rows;
    };
    let Some(table) = doc.select(&table_sel).next() else {
        return rows;
    };
    for tr in table.select(&tr_sel) {
        let cells: Vec<String> = tr.select(&cell_sel).map(cell_text).collect();
        if cells.iter().any(|c| !c.is_empty()) {
            rows.push(cells);
        }
    }
    rows
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let text = cell_text(doc.select(&sel).next()?);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Party rows come as one blob per side: `NAME Advocate- ADVOCATE`.
fn split_party(raw: &str) -> (Option<String>, Option<String>) {
    match raw.split_once("Advocate-") {
        Some((name, advocate)) => {
            let name = name.trim().trim_end_matches(&['-', '–'][..]).trim();
            let advocate = advocate.trim();
            (
                (!name.is_empty()).then(|| name.to_string()),
                (!advocate.is_empty()).then(|| advocate.to_string()),
            )
        }
        None => {
            let name = raw.trim();
            ((!name.is_empty()).then(|| name.to_string()), None)
        }
    }
}

/// `next_date (purpose)` → `(next_date, purpose)`.
fn split_next_date_purpose(raw: &str) -> (String, String) {
    match raw.split_once('(') {
        Some((date, rest)) => (
            date.trim().to_string(),
            rest.trim_end_matches(')').trim().to_string(),
        ),
        None => (raw.trim().to_string(), String::new()),
    }
}

/// Extract a normalized [`CaseRecord`] from a search result document.
pub fn parse_case_record(html: &str, kind: PortalKind) -> CaseRecord {
    let doc = Html::parse_document(html);
    let markup = kind.markup();
    let mut record = CaseRecord {
        court_name: first_text(&doc, "#chHeading"),
        ..Default::default()
    };

    // Case details: label/value pairs, with filing and registration dates in
    // the fourth column when present.
    for row in table_rows(&doc, ".case_details_table") {
        let Some(label) = row.first() else { continue };
        let label = label.to_lowercase();
        let value = row.get(1).cloned().unwrap_or_default();
        if label.contains("case type") {
            record.case_type = Some(value);
        } else if label.contains("filing number") {
            record.filing_number = Some(value);
            record.filing_date = row.get(3).cloned();
        } else if label.contains("registration number") {
            record.registration_number = Some(value);
            record.registration_date = row.get(3).cloned();
        } else if label.contains("cnr number") {
            // The cell appends "(Note the CNR ...)" chatter after the key.
            record.cnr_number = Some(value.chars().take(16).collect());
        }
    }

    for row in table_rows(&doc, markup.status_table) {
        let Some(label) = row.first() else { continue };
        let label = label.to_lowercase();
        let value = row.get(1).cloned().unwrap_or_default();
        if label.contains("first hearing date") {
            record.first_hearing_date = Some(value);
        } else if label.contains("next hearing date") {
            record.next_hearing_date = Some(value);
        } else if label.contains("decision date") {
            record.decision_date = Some(value);
        } else if label.contains("case status") || label.contains("stage of case") {
            record.case_status = Some(value);
        } else if label.contains("nature of disposal") {
            record.disposal_nature = Some(value);
        } else if label.contains("court number and judge") || label.contains("coram") {
            record.court_number_and_judge = Some(value);
        }
    }

    if let Some(row) = table_rows(&doc, ".Petitioner_Advocate_table").first() {
        let (name, advocate) = split_party(&row.join(" "));
        record.petitioner_name = name;
        record.petitioner_advocate = advocate;
    }
    if let Some(row) = table_rows(&doc, ".Respondent_Advocate_table").first() {
        let (name, advocate) = split_party(&row.join(" "));
        record.respondent_name = name;
        record.respondent_advocate = advocate;
    }

    // Acts table: header row first, then act/section pairs.
    for row in table_rows(&doc, markup.acts_table).iter().skip(1) {
        let act = row.first().map(|a| a.trim_end_matches('\\').trim()).unwrap_or("");
        let section = row.get(1).map(String::as_str).unwrap_or("");
        if act.is_empty() && section.is_empty() {
            continue;
        }
        record.acts.push(ActEntry {
            under_act: act.to_string(),
            under_section: section.to_string(),
        });
    }
    if !record.acts.is_empty() {
        record.under_acts = Some(
            record
                .acts
                .iter()
                .map(|a| a.under_act.clone())
                .filter(|a| !a.is_empty())
                .collect::<Vec<_>>()
                .join(","),
        );
        record.under_sections = Some(
            record
                .acts
                .iter()
                .map(|a| a.under_section.clone())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(","),
        );
    }

    record.case_history = parse_history_rows(table_rows(&doc, ".history_table"));

    for row in table_rows(&doc, ".transfer_table").iter().skip(1) {
        if row.len() < 4 {
            continue;
        }
        record.transfer_details.push(TransferEntry {
            registration_number: row[0].clone(),
            transfer_date: row[1].clone(),
            from_court: row[2].clone(),
            to_court: row[3].clone(),
        });
    }

    for row in table_rows(&doc, ".IAheading").iter().skip(1) {
        if row.len() < 5 {
            continue;
        }
        let (next_date, purpose) = split_next_date_purpose(&row[3]);
        record.ia_details.push(IaEntry {
            ia_number: row[0].clone(),
            party: row[1].clone(),
            filing_date: row[2].clone(),
            next_date,
            purpose,
            status: row[4].clone(),
        });
    }

    record.scraped_at = Some(chrono::Utc::now().to_rfc3339());
    record
}

/// History rows from either the result page or the `viewBusiness` response.
/// Both portals emit judge / business-date / hearing-date / purpose, the High
/// Court variant with a leading cause-list column.
pub fn parse_history_rows(rows: Vec<Vec<String>>) -> Vec<HearingEntry> {
    let mut entries = Vec::new();
    for row in rows.iter().skip(1) {
        let cells: &[String] = if row.len() >= 5 { &row[1..5] } else { &row[..] };
        if cells.len() < 4 {
            continue;
        }
        let entry = HearingEntry {
            judge: cells[0].clone(),
            business_date: cells[1].split('\n').next().unwrap_or("").trim().to_string(),
            hearing_date: cells[2].clone(),
            purpose: cells[3].clone(),
        };
        if [&entry.judge, &entry.business_date, &entry.hearing_date, &entry.purpose]
            .iter()
            .any(|v| !v.is_empty())
        {
            entries.push(entry);
        }
    }
    entries
}
