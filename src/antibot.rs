//! Standard scraping hygiene for the government portals: a rotating desktop
//! User-Agent pool, the header set a real browser sends when submitting the
//! search form, and a jittered inter-request delay.

pub const USER_AGENTS: &[&str] = &[
    // Chrome Desktop (Windows, macOS, Linux)
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",

    // Firefox Desktop
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",

    // Edge Desktop
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36 Edg/121.0.0.0",
];

/// Get a random user agent string for the session.
pub fn get_random_user_agent() -> &'static str {
    use rand::prelude::*;
    let mut rng = rand::rng();
    let index = rng.random_range(0..USER_AGENTS.len());
    USER_AGENTS[index]
}

/// The headers the portal's own form submission carries in a real browser.
pub fn get_stealth_headers() -> Vec<(String, String)> {
    vec![
        (
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                .to_string(),
        ),
        ("Accept-Language".to_string(), "en-US,en;q=0.5".to_string()),
        ("Connection".to_string(), "keep-alive".to_string()),
        ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
    ]
}

/// Jittered delay before each portal request. The eCourts backends throttle
/// aggressively when hits arrive in lockstep; a 300-900 ms spread is enough.
pub async fn apply_request_delay() {
    let ms = {
        use rand::prelude::*;
        let mut rng = rand::rng();
        rng.random_range(300..=900)
    };
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}
