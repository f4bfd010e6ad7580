//! CAPTCHA solving backends.
//!
//! Solving itself is an external collaborator (either the 2captcha paid API
//! or a local OCR HTTP service), so this module is thin HTTP plumbing plus
//! the two pieces every backend shares: solution normalization and a bounded
//! cache so a re-served captcha image never costs a second round trip.

mod ocr_http;
mod two_captcha;

pub use ocr_http::OcrHttpSolver;
pub use two_captcha::TwoCaptchaSolver;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::config::CaptchaConfig;

/// A backend that turns a captcha image into text.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> Result<String>;

    /// Short backend label for logs.
    fn name(&self) -> &'static str;
}

/// Strip everything that cannot appear in a portal captcha and sanity-check
/// the length. The portals use 4-8 alphanumeric glyphs; anything else is an
/// OCR misread and not worth submitting.
pub fn normalize_solution(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if (4..=8).contains(&cleaned.len()) {
        Some(cleaned)
    } else {
        None
    }
}

/// Stable cache key for a captcha image.
pub fn image_key(image: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    image.hash(&mut hasher);
    hasher.finish()
}

/// Caching wrapper around any [`CaptchaSolver`].
///
/// The portals re-serve captcha images surprisingly often within a session.
/// Solutions the portal later rejects must be evicted with
/// [`CachedSolver::invalidate`] or the loop would resubmit the same wrong
/// answer until exhaustion.
pub struct CachedSolver {
    inner: Arc<dyn CaptchaSolver>,
    cache: moka::future::Cache<u64, String>,
}

impl CachedSolver {
    pub fn new(inner: Arc<dyn CaptchaSolver>) -> Self {
        Self {
            inner,
            cache: moka::future::Cache::builder()
                .max_capacity(1_000)
                .time_to_live(std::time::Duration::from_secs(60 * 30))
                .build(),
        }
    }

    pub async fn solve(&self, image: &[u8]) -> Result<String> {
        let key = image_key(image);
        if let Some(hit) = self.cache.get(&key).await {
            debug!("captcha cache hit for image key {key:x}");
            return Ok(hit);
        }
        let raw = self.inner.solve(image).await?;
        let solution = normalize_solution(&raw)
            .ok_or_else(|| anyhow!("{} returned unusable text: '{}'", self.inner.name(), raw))?;
        info!("{} solved captcha: {}", self.inner.name(), solution);
        self.cache.insert(key, solution.clone()).await;
        Ok(solution)
    }

    /// Drop the cached solution for an image the portal rejected.
    pub async fn invalidate(&self, image: &[u8]) {
        self.cache.invalidate(&image_key(image)).await;
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Build the configured backend. Unknown names fall back to the OCR service
/// with a warning rather than failing the whole run.
pub fn solver_from_config(config: &CaptchaConfig, http: reqwest::Client) -> Arc<dyn CaptchaSolver> {
    match config.resolve_backend().as_str() {
        "2captcha" | "twocaptcha" => match config.resolve_api_key() {
            Some(key) => Arc::new(TwoCaptchaSolver::new(
                http,
                key,
                config.resolve_poll_interval_secs(),
                config.resolve_poll_timeout_secs(),
            )),
            None => {
                tracing::warn!(
                    "2captcha backend selected but no API key configured, falling back to OCR service"
                );
                Arc::new(OcrHttpSolver::new(http, config.resolve_ocr_url()))
            }
        },
        "ocr" => Arc::new(OcrHttpSolver::new(http, config.resolve_ocr_url())),
        other => {
            tracing::warn!("unknown captcha backend '{}', using OCR service", other);
            Arc::new(OcrHttpSolver::new(http, config.resolve_ocr_url()))
        }
    }
}
