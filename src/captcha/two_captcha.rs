//! 2captcha backend: submit the image to `in.php`, then poll `res.php`
//! until a human (or their farm) answers.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use tracing::{debug, info};

use super::CaptchaSolver;

const SUBMIT_URL: &str = "http://2captcha.com/in.php";
const RESULT_URL: &str = "http://2captcha.com/res.php";

/// Both endpoints answer `{"status": 0|1, "request": "..."}` with `json=1`.
/// `status == 1` means `request` holds the payload (submit id / solution);
/// `status == 0` with `request == "CAPCHA_NOT_READY"` means keep polling.
#[derive(Debug, Deserialize)]
struct TwoCaptchaResponse {
    status: u8,
    request: String,
}

pub struct TwoCaptchaSolver {
    http: reqwest::Client,
    api_key: String,
    poll_interval: std::time::Duration,
    poll_timeout: std::time::Duration,
}

impl TwoCaptchaSolver {
    pub fn new(
        http: reqwest::Client,
        api_key: String,
        poll_interval_secs: u64,
        poll_timeout_secs: u64,
    ) -> Self {
        Self {
            http,
            api_key,
            poll_interval: std::time::Duration::from_secs(poll_interval_secs),
            poll_timeout: std::time::Duration::from_secs(poll_timeout_secs),
        }
    }

    async fn submit(&self, image: &[u8]) -> Result<String> {
        let form = reqwest::multipart::Form::new()
            .text("key", self.api_key.clone())
            .text("method", "base64")
            .text("body", BASE64.encode(image))
            .text("json", "1");

        let response: TwoCaptchaResponse = self
            .http
            .post(SUBMIT_URL)
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;

        if response.status != 1 {
            return Err(anyhow!("2captcha rejected submission: {}", response.request));
        }
        info!("captcha submitted to 2captcha, id {}", response.request);
        Ok(response.request)
    }

    async fn poll(&self, captcha_id: &str) -> Result<String> {
        let deadline = std::time::Instant::now() + self.poll_timeout;
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let response: TwoCaptchaResponse = self
                .http
                .get(RESULT_URL)
                .query(&[
                    ("key", self.api_key.as_str()),
                    ("action", "get"),
                    ("id", captcha_id),
                    ("json", "1"),
                ])
                .send()
                .await?
                .json()
                .await?;

            if response.status == 1 {
                return Ok(response.request);
            }
            if response.request != "CAPCHA_NOT_READY" {
                return Err(anyhow!("2captcha error: {}", response.request));
            }
            if std::time::Instant::now() >= deadline {
                return Err(anyhow!(
                    "2captcha did not solve id {} within {:?}",
                    captcha_id,
                    self.poll_timeout
                ));
            }
            debug!("2captcha id {} not ready, polling again", captcha_id);
        }
    }
}

#[async_trait]
impl CaptchaSolver for TwoCaptchaSolver {
    async fn solve(&self, image: &[u8]) -> Result<String> {
        let captcha_id = self.submit(image).await?;
        self.poll(&captcha_id).await
    }

    fn name(&self) -> &'static str {
        "2captcha"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_shape_parses() {
        let ready: TwoCaptchaResponse =
            serde_json::from_str(r#"{"status":1,"request":"aB3x9"}"#).unwrap();
        assert_eq!(ready.status, 1);
        assert_eq!(ready.request, "aB3x9");

        let pending: TwoCaptchaResponse =
            serde_json::from_str(r#"{"status":0,"request":"CAPCHA_NOT_READY"}"#).unwrap();
        assert_eq!(pending.status, 0);
    }
}
