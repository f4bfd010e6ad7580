//! Local OCR service backend.
//!
//! Talks to a small sidecar (typically an EasyOCR wrapper) exposing
//! `POST /ocr`. The image travels inline as base64 so the sidecar never
//! needs to share a filesystem with this process.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::json;

use super::CaptchaSolver;

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct OcrHttpSolver {
    http: reqwest::Client,
    endpoint: String,
}

impl OcrHttpSolver {
    /// `base_url` without a trailing slash, e.g. `http://127.0.0.1:5000`.
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            http,
            endpoint: format!("{}/ocr", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl CaptchaSolver for OcrHttpSolver {
    async fn solve(&self, image: &[u8]) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "image_base64": BASE64.encode(image) }))
            .send()
            .await?;

        let status = response.status();
        let body: OcrResponse = response.json().await?;

        if let Some(err) = body.error {
            return Err(anyhow!("OCR service error ({}): {}", status, err));
        }
        body.text
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow!("OCR service returned empty text ({})", status))
    }

    fn name(&self) -> &'static str {
        "ocr-http"
    }
}
