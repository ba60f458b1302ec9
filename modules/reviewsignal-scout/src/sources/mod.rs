//! Source adapters: one per origin, all behind [`SourceAdapter`].

pub mod g2;
pub mod http;
pub mod oauth;
pub mod trustpilot;
pub mod twitter;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use reviewsignal_common::config::ScrapersConfig;
use reviewsignal_common::Review;

pub use g2::G2Source;
pub use trustpilot::TrustpilotSource;
pub use twitter::TwitterSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("scrape cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("parse error: {0}")]
    Parse(String),
}

impl SourceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SourceError::Cancelled)
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Parse(e.to_string())
    }
}

/// A failed scrape. Whatever was collected before the failure is kept.
#[derive(Debug)]
pub struct SourceFailure {
    pub partial: Vec<Review>,
    pub error: SourceError,
}

impl SourceFailure {
    pub fn new(partial: Vec<Review>, error: SourceError) -> Self {
        Self { partial, error }
    }
}

impl From<SourceError> for SourceFailure {
    fn from(error: SourceError) -> Self {
        Self {
            partial: Vec::new(),
            error,
        }
    }
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if !self.partial.is_empty() {
            write!(f, " ({} reviews collected before failure)", self.partial.len())?;
        }
        Ok(())
    }
}

// --- ScrapeContext ---

/// Cancellation signal plus shared deadline for one scrape run.
#[derive(Debug, Clone)]
pub struct ScrapeContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ScrapeContext {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the token is cancelled or the deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Race `fut` against cancellation.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, SourceError> {
        if self.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(SourceError::Cancelled),
            out = fut => Ok(out),
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), SourceError> {
        if duration.is_zero() {
            return if self.is_cancelled() {
                Err(SourceError::Cancelled)
            } else {
                Ok(())
            };
        }
        self.run(tokio::time::sleep(duration)).await
    }
}

// --- SourceAdapter trait ---

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable origin label, used in ids, logs, and error messages.
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// All network I/O for one run. Must return promptly once `ctx` is
    /// cancelled, carrying whatever was collected so far.
    async fn scrape(&self, ctx: &ScrapeContext) -> Result<Vec<Review>, SourceFailure>;
}

/// Construct every adapter the configuration knows about. Adapters whose
/// HTTP client cannot be built are logged and skipped.
pub fn build_sources(config: &ScrapersConfig) -> Vec<Arc<dyn SourceAdapter>> {
    let mut sources: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    match TwitterSource::new(config.twitter.clone(), &config.rate_limits, &config.proxy) {
        Ok(s) => sources.push(Arc::new(s)),
        Err(e) => warn!(source = "twitter", error = %e, "Failed to build source"),
    }
    match G2Source::new(config.g2.clone(), &config.rate_limits, &config.proxy) {
        Ok(s) => sources.push(Arc::new(s)),
        Err(e) => warn!(source = "g2", error = %e, "Failed to build source"),
    }
    match TrustpilotSource::new(config.trustpilot.clone(), &config.rate_limits, &config.proxy) {
        Ok(s) => sources.push(Arc::new(s)),
        Err(e) => warn!(source = "trustpilot", error = %e, "Failed to build source"),
    }

    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_cancelled_once_token_fires() {
        let token = CancellationToken::new();
        let ctx = ScrapeContext::new(token.clone());
        let handle = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.sleep(Duration::from_secs(30)).await }
        });
        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(SourceError::Cancelled)));
    }

    #[tokio::test]
    async fn deadline_cancels_without_token() {
        let ctx = ScrapeContext::new(CancellationToken::new()).with_timeout(Duration::from_millis(20));
        let started = std::time::Instant::now();
        let result = ctx.sleep(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(SourceError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn completed_future_passes_through() {
        let ctx = ScrapeContext::new(CancellationToken::new()).with_timeout(Duration::from_secs(5));
        assert_eq!(ctx.run(async { 7 }).await.unwrap(), 7);
    }

    #[test]
    fn default_config_builds_all_three_disabled() {
        let sources = build_sources(&ScrapersConfig::default());
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["twitter", "g2", "trustpilot"]);
        assert!(sources.iter().all(|s| !s.is_enabled()));
    }
}
