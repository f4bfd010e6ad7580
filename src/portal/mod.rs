//! Portal HTTP session.
//!
//! The eCourts family gates its search form behind two tokens: a cookie jar
//! established on the landing page and an `app_token` embedded in the page
//! source. Both go stale together; when the portal starts answering with the
//! "Oops! Invalid Request" interstitial the only cure is re-fetching the
//! landing page.

pub mod parse;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use regex::Regex;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::antibot;
use crate::cnr::CnrNumber;
use crate::core::error::HarvestError;
use crate::core::types::HearingEntry;

/// Which deployment of the case-status service we are talking to. They share
/// the flow but differ in base URL and a couple of table classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalKind {
    /// National district-court portal (`ecourtindia_v6`).
    District,
    /// High Court services portal (`hcservices`).
    HighCourt,
}

/// The handful of markup differences the extractor cares about. Anything
/// beyond these lives in `parse.rs` as shared selectors.
pub struct PortalMarkup {
    pub status_table: &'static str,
    pub acts_table: &'static str,
}

impl PortalKind {
    pub fn parse_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "district" | "ecourts" => Some(PortalKind::District),
            "highcourt" | "hc" | "hcservices" => Some(PortalKind::HighCourt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PortalKind::District => "district",
            PortalKind::HighCourt => "highcourt",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            PortalKind::District => "https://services.ecourts.gov.in/ecourtindia_v6/",
            PortalKind::HighCourt => "https://hcservices.ecourts.gov.in/hcservices/",
        }
    }

    pub fn markup(&self) -> PortalMarkup {
        match self {
            PortalKind::District => PortalMarkup {
                status_table: ".case_status_table",
                acts_table: "#act_table",
            },
            PortalKind::HighCourt => PortalMarkup {
                status_table: ".table_r",
                acts_table: ".Acts_table",
            },
        }
    }
}

/// Seam between the lookup loop and the actual portal, so the loop can be
/// exercised against a scripted fake.
#[async_trait]
pub trait CasePortal: Send + Sync {
    fn kind(&self) -> PortalKind;

    /// Re-fetch the landing page and pull a fresh `app_token` out of it.
    async fn refresh_token(&self) -> Result<(), HarvestError>;

    /// Fetch a token only if none is held yet.
    async fn ensure_token(&self) -> Result<(), HarvestError>;

    /// Current captcha image bytes for this session.
    async fn fetch_captcha(&self) -> Result<Vec<u8>, HarvestError>;

    /// Submit the search form; returns the raw response HTML.
    async fn search_by_cnr(&self, cnr: &CnrNumber, captcha: &str)
        -> Result<String, HarvestError>;

    /// Best-effort hearing history via the `viewBusiness` endpoint.
    async fn fetch_case_history(&self, cnr: &CnrNumber)
        -> Result<Vec<HearingEntry>, HarvestError>;
}

pub struct EcourtsClient {
    http: reqwest::Client,
    kind: PortalKind,
    base_url: Url,
    user_agent: &'static str,
    app_token: RwLock<Option<String>>,
}

impl EcourtsClient {
    pub fn new(
        http: reqwest::Client,
        kind: PortalKind,
        base_url: Option<String>,
    ) -> Result<Self, HarvestError> {
        let raw = base_url.unwrap_or_else(|| kind.default_base_url().to_string());
        // A trailing slash makes `Url::join` append instead of replace.
        let base_url = Url::parse(&format!("{}/", raw.trim_end_matches('/')))
            .map_err(|e| HarvestError::Other(format!("invalid portal base URL '{}': {}", raw, e)))?;
        Ok(Self {
            http,
            kind,
            base_url,
            // One UA per session; switching mid-session is itself a bot signal.
            user_agent: antibot::get_random_user_agent(),
            app_token: RwLock::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> Url {
        // Paths here are static relative segments; join cannot fail on them.
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder.header("User-Agent", self.user_agent);
        for (name, value) in antibot::get_stealth_headers() {
            builder = builder.header(name, value);
        }
        builder
    }

    async fn current_token(&self) -> Result<String, HarvestError> {
        self.app_token
            .read()
            .await
            .clone()
            .ok_or(HarvestError::TokenMissing)
    }

    /// `var app_token = '...'` in the landing page source.
    fn extract_app_token(html: &str) -> Option<String> {
        let re = Regex::new(r#"var\s+app_token\s*=\s*['"]([^'"]+)['"]"#).ok()?;
        re.captures(html).map(|c| c[1].to_string())
    }

    fn retry_policy() -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(std::time::Duration::from_millis(500))
            .with_max_interval(std::time::Duration::from_secs(2))
            .with_max_elapsed_time(Some(std::time::Duration::from_secs(10)))
            .build()
    }
}

#[async_trait]
impl CasePortal for EcourtsClient {
    fn kind(&self) -> PortalKind {
        self.kind
    }

    async fn refresh_token(&self) -> Result<(), HarvestError> {
        antibot::apply_request_delay().await;

        // Transient network hiccups and token-less responses both get the
        // same short backoff; the landing page occasionally renders without
        // the token when the backend is mid-rollover.
        let token = backoff::future::retry(Self::retry_policy(), || async {
            let html = self
                .request(self.http.get(self.base_url.clone()))
                .send()
                .await
                .map_err(|e| backoff::Error::transient(HarvestError::Http(e)))?
                .text()
                .await
                .map_err(|e| backoff::Error::transient(HarvestError::Http(e)))?;
            Self::extract_app_token(&html)
                .ok_or(backoff::Error::transient(HarvestError::TokenMissing))
        })
        .await?;

        debug!("app token refreshed ({} chars)", token.len());
        *self.app_token.write().await = Some(token);
        Ok(())
    }

    async fn ensure_token(&self) -> Result<(), HarvestError> {
        if self.app_token.read().await.is_some() {
            return Ok(());
        }
        info!("initializing portal session against {}", self.base_url);
        self.refresh_token().await
    }

    async fn fetch_captcha(&self) -> Result<Vec<u8>, HarvestError> {
        let token = self.current_token().await?;
        antibot::apply_request_delay().await;

        let response = self
            .request(self.http.post(self.endpoint("getCaptcha")))
            .form(&[("app_token", token.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HarvestError::Other(format!(
                "getCaptcha returned HTTP {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(HarvestError::Other("getCaptcha returned no bytes".into()));
        }
        Ok(bytes.to_vec())
    }

    async fn search_by_cnr(
        &self,
        cnr: &CnrNumber,
        captcha: &str,
    ) -> Result<String, HarvestError> {
        let token = self.current_token().await?;
        antibot::apply_request_delay().await;

        let html = self
            .request(self.http.post(self.endpoint("searchByCNR")))
            .form(&[
                ("cino", cnr.as_str()),
                ("fcaptcha_code", captcha),
                ("app_token", token.as_str()),
            ])
            .send()
            .await?
            .text()
            .await?;
        Ok(html)
    }

    async fn fetch_case_history(
        &self,
        cnr: &CnrNumber,
    ) -> Result<Vec<HearingEntry>, HarvestError> {
        // History wants its own fresh token; the search response invalidates
        // the one used to submit the form.
        self.refresh_token().await?;
        let token = self.current_token().await?;
        antibot::apply_request_delay().await;

        let html = self
            .request(self.http.post(self.endpoint("viewBusiness")))
            .form(&[
                ("state_code", cnr.state_code()),
                ("dist_code", cnr.district_code()),
                ("court_code", cnr.establishment_code()),
                ("case_no", cnr.case_part()),
                ("cino", cnr.as_str()),
                ("app_token", token.as_str()),
            ])
            .send()
            .await?
            .text()
            .await?;

        if parse::is_invalid_request_page(&html) {
            warn!("viewBusiness served the invalid-request page for {}", cnr);
            return Err(HarvestError::InvalidRequest);
        }

        let doc = scraper::Html::parse_document(&html);
        Ok(parse::parse_history_rows(parse::table_rows(
            &doc,
            ".history_table",
        )))
    }
}
