// ---------------------------------------------------------------------------
// HarvestConfig: file-based config loader (cnr-harvest.json) with env-var
// fallback for every field
// ---------------------------------------------------------------------------

/// Captcha sub-config (mirrors the `captcha` key in cnr-harvest.json).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct CaptchaConfig {
    /// Backend selector: `"2captcha"` or `"ocr"`. Defaults to `"ocr"`.
    pub backend: Option<String>,
    /// 2captcha API key. Never logged.
    pub api_key: Option<String>,
    /// Base URL of the local OCR HTTP service, e.g. `http://127.0.0.1:5000`.
    pub ocr_url: Option<String>,
    /// Seconds between 2captcha result polls. Default: 5.
    pub poll_interval_secs: Option<u64>,
    /// Total seconds to wait for a 2captcha solve before giving up. Default: 120.
    pub poll_timeout_secs: Option<u64>,
}

impl CaptchaConfig {
    /// Backend name: JSON field → `CNR_HARVEST_CAPTCHA_BACKEND` env var → `ocr`.
    pub fn resolve_backend(&self) -> String {
        if let Some(b) = &self.backend {
            if !b.trim().is_empty() {
                return b.trim().to_ascii_lowercase();
            }
        }
        std::env::var("CNR_HARVEST_CAPTCHA_BACKEND")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "ocr".to_string())
    }

    /// API key: JSON field → `TWOCAPTCHA_API_KEY` env var → `None`.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.trim().to_string());
        }
        std::env::var("TWOCAPTCHA_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    /// OCR endpoint: JSON field → `CNR_HARVEST_OCR_URL` env var → local default.
    pub fn resolve_ocr_url(&self) -> String {
        if let Some(u) = &self.ocr_url {
            if !u.trim().is_empty() {
                return u.trim().trim_end_matches('/').to_string();
            }
        }
        std::env::var("CNR_HARVEST_OCR_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| "http://127.0.0.1:5000".to_string())
    }

    pub fn resolve_poll_interval_secs(&self) -> u64 {
        if let Some(n) = self.poll_interval_secs {
            return n.max(1);
        }
        std::env::var("CNR_HARVEST_CAPTCHA_POLL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5)
    }

    pub fn resolve_poll_timeout_secs(&self) -> u64 {
        if let Some(n) = self.poll_timeout_secs {
            return n;
        }
        std::env::var("CNR_HARVEST_CAPTCHA_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120)
    }
}

/// Top-level config loaded from `cnr-harvest.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct HarvestConfig {
    #[serde(default)]
    pub captcha: CaptchaConfig,
    /// Portal selector: `"district"` or `"highcourt"`. Defaults to `"district"`.
    pub portal: Option<String>,
    /// Override for the portal base URL (the portals move occasionally).
    pub base_url: Option<String>,
    /// Attempt budget per CNR. Default: 5.
    pub max_attempts: Option<u32>,
    /// Concurrent in-flight lookups in a batch. Default: 4.
    pub max_concurrent: Option<usize>,
    /// Client-side cap on lookup starts per minute. Default: 30.
    pub requests_per_minute: Option<usize>,
    /// Minimum milliseconds between consecutive lookup starts. Default: 2000.
    pub min_request_gap_ms: Option<u64>,
    /// Output directory for the JSON sink. Default: `./cases`.
    pub output_dir: Option<String>,
}

impl HarvestConfig {
    pub fn resolve_portal(&self) -> String {
        if let Some(p) = &self.portal {
            if !p.trim().is_empty() {
                return p.trim().to_ascii_lowercase();
            }
        }
        std::env::var("CNR_HARVEST_PORTAL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "district".to_string())
    }

    pub fn resolve_base_url(&self) -> Option<String> {
        if let Some(u) = &self.base_url {
            if !u.trim().is_empty() {
                return Some(u.trim().to_string());
            }
        }
        std::env::var("CNR_HARVEST_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn resolve_max_attempts(&self) -> u32 {
        if let Some(n) = self.max_attempts {
            return n.max(1);
        }
        std::env::var("CNR_HARVEST_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5)
    }

    pub fn resolve_max_concurrent(&self) -> usize {
        if let Some(n) = self.max_concurrent {
            return n.max(1);
        }
        std::env::var("CNR_HARVEST_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4)
    }

    pub fn resolve_requests_per_minute(&self) -> usize {
        if let Some(n) = self.requests_per_minute {
            return n.max(1);
        }
        std::env::var("CNR_HARVEST_REQUESTS_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30)
    }

    pub fn resolve_min_request_gap_ms(&self) -> u64 {
        if let Some(n) = self.min_request_gap_ms {
            return n;
        }
        std::env::var("CNR_HARVEST_MIN_GAP_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000)
    }

    pub fn resolve_output_dir(&self) -> String {
        if let Some(d) = &self.output_dir {
            if !d.trim().is_empty() {
                return d.trim().to_string();
            }
        }
        std::env::var("CNR_HARVEST_OUTPUT_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "cases".to_string())
    }
}

/// Load `cnr-harvest.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `CNR_HARVEST_CONFIG` env var path
/// 2. `./cnr-harvest.json` (process cwd)
/// 3. `../cnr-harvest.json` (repo root when running from a subdirectory)
/// 4. `<user config dir>/cnr-harvest/cnr-harvest.json`
///
/// Missing file → `HarvestConfig::default()` (silent, env-var fallbacks apply).
/// Parse error → log a warning, return `HarvestConfig::default()`.
pub fn load_harvest_config() -> HarvestConfig {
    let candidates: Vec<std::path::PathBuf> = {
        let mut v = vec![
            std::path::PathBuf::from("cnr-harvest.json"),
            std::path::PathBuf::from("../cnr-harvest.json"),
        ];
        if let Ok(env_path) = std::env::var("CNR_HARVEST_CONFIG") {
            v.insert(0, std::path::PathBuf::from(env_path));
        }
        if let Some(config_dir) = dirs::config_dir() {
            v.push(config_dir.join("cnr-harvest").join("cnr-harvest.json"));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<HarvestConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("cnr-harvest.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "cnr-harvest.json parse error at {}: {}, using defaults",
                        path.display(),
                        e
                    );
                    return HarvestConfig::default();
                }
            },
            Err(_) => continue, // file not found at this path, try next
        }
    }

    HarvestConfig::default()
}
