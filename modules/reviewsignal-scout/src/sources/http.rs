//! HTTP plumbing shared by the adapters: client construction, proxy
//! selection, user-agent rotation, and request pacing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use tracing::debug;

use reviewsignal_common::config::{ProxyConfig, RateLimitConfig};

use super::{ScrapeContext, SourceError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Proxy URL for a new client. With rotation on, one of `urls` is picked at
/// random; otherwise `url` wins, then the first of `urls`.
pub fn select_proxy(proxy: &ProxyConfig) -> Option<String> {
    if !proxy.enabled {
        return None;
    }
    if proxy.rotate && !proxy.urls.is_empty() {
        let idx = rand::rng().random_range(0..proxy.urls.len());
        return Some(proxy.urls[idx].clone());
    }
    if !proxy.url.is_empty() {
        return Some(proxy.url.clone());
    }
    proxy.urls.first().cloned()
}

pub fn build_client(proxy: &ProxyConfig) -> Result<reqwest::Client, SourceError> {
    let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);

    if let Some(url) = select_proxy(proxy) {
        let mut p = reqwest::Proxy::all(&url)
            .map_err(|e| SourceError::Config(format!("invalid proxy {url}: {e}")))?;
        if !proxy.username.is_empty() {
            p = p.basic_auth(&proxy.username, &proxy.password);
        }
        debug!(proxy = url.as_str(), "Using proxy");
        builder = builder.proxy(p);
    }

    builder
        .build()
        .map_err(|e| SourceError::Config(format!("failed to build HTTP client: {e}")))
}

/// Headers a desktop browser would send for an HTML page.
pub fn browser_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, ua);
    }
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers
}

/// Send `request` and return the body, racing both halves against `ctx`.
pub async fn fetch_text(
    ctx: &ScrapeContext,
    request: reqwest::RequestBuilder,
) -> Result<String, SourceError> {
    let response = ctx.run(request.send()).await??;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        });
    }
    Ok(ctx.run(response.text()).await??)
}

// --- Pacer ---

/// Spacing between consecutive requests of one adapter.
pub struct Pacer {
    config: RateLimitConfig,
    requests: AtomicU32,
}

impl Pacer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            requests: AtomicU32::new(0),
        }
    }

    pub fn user_agent(&self) -> &'static str {
        if self.config.randomize_user_agents {
            USER_AGENTS[rand::rng().random_range(0..USER_AGENTS.len())]
        } else {
            USER_AGENTS[0]
        }
    }

    /// Delay owed before request number `n` (1-based).
    pub fn delay_before(&self, n: u32) -> Duration {
        if n <= 1 {
            return Duration::ZERO;
        }
        let c = &self.config;
        let mut gap = if c.requests_per_minute > 0 {
            Duration::from_millis(60_000 / u64::from(c.requests_per_minute))
        } else {
            Duration::ZERO
        };
        if c.pause_between_requests {
            gap = gap.max(c.pause_duration());
        }
        if c.randomize_pause_times && !gap.is_zero() {
            let factor: f64 = rand::rng().random_range(0.5..1.5);
            gap = gap.mul_f64(factor);
        }
        // Extra pause after every batch of `pause_after_requests`.
        if c.pause_after_requests > 0 && (n - 1) % c.pause_after_requests == 0 {
            gap += c.pause_duration();
        }
        gap
    }

    /// Call before every request. Sleeps as needed; cancellable.
    pub async fn wait(&self, ctx: &ScrapeContext) -> Result<(), SourceError> {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        let delay = self.delay_before(n);
        if !delay.is_zero() {
            debug!(request = n, delay_ms = delay.as_millis() as u64, "Pacing request");
        }
        ctx.sleep(delay).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacing(config: RateLimitConfig) -> Pacer {
        Pacer::new(config)
    }

    #[test]
    fn first_request_is_never_delayed() {
        let pacer = pacing(RateLimitConfig {
            requests_per_minute: 1,
            pause_between_requests: true,
            pause_duration_ms: 5_000,
            ..Default::default()
        });
        assert_eq!(pacer.delay_before(1), Duration::ZERO);
    }

    #[test]
    fn rate_and_pause_take_the_larger_gap() {
        let pacer = pacing(RateLimitConfig {
            requests_per_minute: 60,
            pause_between_requests: true,
            pause_duration_ms: 250,
            ..Default::default()
        });
        assert_eq!(pacer.delay_before(2), Duration::from_secs(1));

        let pacer = pacing(RateLimitConfig {
            requests_per_minute: 600,
            pause_between_requests: true,
            pause_duration_ms: 250,
            ..Default::default()
        });
        assert_eq!(pacer.delay_before(2), Duration::from_millis(250));
    }

    #[test]
    fn batch_pause_lands_after_every_n_requests() {
        let pacer = pacing(RateLimitConfig {
            pause_after_requests: 3,
            pause_duration_ms: 100,
            ..Default::default()
        });
        let delays: Vec<u128> = (1..=7).map(|n| pacer.delay_before(n).as_millis()).collect();
        assert_eq!(delays, vec![0, 0, 0, 100, 0, 0, 100]);
    }

    #[test]
    fn randomized_pause_stays_within_half_to_one_and_a_half() {
        let pacer = pacing(RateLimitConfig {
            pause_between_requests: true,
            pause_duration_ms: 1_000,
            randomize_pause_times: true,
            ..Default::default()
        });
        for _ in 0..50 {
            let d = pacer.delay_before(2);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1_500));
        }
    }

    #[test]
    fn proxy_selection_prefers_rotation_list() {
        let proxy = ProxyConfig {
            enabled: true,
            url: "http://single:8080".to_string(),
            urls: vec!["http://a:1".to_string(), "http://b:2".to_string()],
            rotate: true,
            ..Default::default()
        };
        let picked = select_proxy(&proxy).unwrap();
        assert!(proxy.urls.contains(&picked));

        let fixed = ProxyConfig {
            rotate: false,
            ..proxy.clone()
        };
        assert_eq!(select_proxy(&fixed).as_deref(), Some("http://single:8080"));
        assert_eq!(
            select_proxy(&ProxyConfig {
                enabled: false,
                ..proxy
            }),
            None
        );
    }
}
