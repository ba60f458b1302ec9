//! Fans a scrape out to every enabled source under one deadline.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use reviewsignal_common::Review;

use crate::sources::{ScrapeContext, SourceAdapter, SourceError, SourceFailure};

pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Every enabled source failed and nothing was collected.
    #[error("all sources failed: {message}")]
    AllSourcesFailed { message: String },

    #[error("no sources are enabled")]
    NoSourcesEnabled,
}

/// Outcome of one source in the last run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeStats {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reviews_scraped: usize,
    /// Reviews a failed source collected before failing; never returned.
    pub discarded: usize,
    pub error: Option<String>,
}

impl ScrapeStats {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

pub struct ScrapeOrchestrator {
    sources: Vec<Arc<dyn SourceAdapter>>,
    timeout: Duration,
    last_run: RwLock<Vec<ScrapeStats>>,
}

impl ScrapeOrchestrator {
    pub fn new(sources: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self {
            sources,
            timeout: DEFAULT_SCRAPE_TIMEOUT,
            last_run: RwLock::new(Vec::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn enabled_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|s| s.is_enabled())
            .map(|s| s.name())
            .collect()
    }

    /// Per-source stats from the most recent run.
    pub fn last_run_stats(&self) -> Vec<ScrapeStats> {
        self.last_run
            .read()
            .expect("scrape stats lock poisoned")
            .clone()
    }

    /// Scrape every enabled source concurrently.
    ///
    /// Returns the union of the reviews from sources that succeeded. A failed
    /// source contributes nothing, even if it collected some reviews before
    /// failing. Errors when every source failed.
    pub async fn scrape_all(&self, shutdown: &CancellationToken) -> Result<Vec<Review>, ScrapeError> {
        let enabled: Vec<Arc<dyn SourceAdapter>> = self
            .sources
            .iter()
            .filter(|s| s.is_enabled())
            .cloned()
            .collect();
        if enabled.is_empty() {
            warn!("No scrape sources enabled");
            return Err(ScrapeError::NoSourcesEnabled);
        }

        let ctx = ScrapeContext::new(shutdown.child_token()).with_timeout(self.timeout);
        // Stops stragglers if this future is dropped mid-run.
        let _abort_on_drop = ctx.token().clone().drop_guard();
        info!(
            sources = enabled.len(),
            timeout_secs = self.timeout.as_secs(),
            "Starting scrape run"
        );

        let handles: Vec<_> = enabled
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let started_at = Utc::now();
                    let result = source.scrape(&ctx).await;
                    (started_at, Utc::now(), result)
                })
            })
            .collect();

        let outcomes = futures::future::join_all(handles).await;

        let mut reviews = Vec::new();
        let mut seen = HashSet::new();
        let mut stats = Vec::with_capacity(enabled.len());
        let mut errors = Vec::new();

        for (source, outcome) in enabled.iter().zip(outcomes) {
            let name = source.name().to_string();
            let (started_at, finished_at, result) = match outcome {
                Ok(done) => done,
                Err(join_err) => {
                    let now = Utc::now();
                    let failure = SourceFailure::from(SourceError::Network(format!(
                        "scrape task aborted: {join_err}"
                    )));
                    (now, now, Err(failure))
                }
            };

            let (collected, partial, error) = match result {
                Ok(found) => (found, 0, None),
                Err(SourceFailure { partial, error }) => {
                    warn!(source = name.as_str(), error = %error, partial = partial.len(), "Source failed, discarding its reviews");
                    errors.push(format!("{name} scraper error: {error}"));
                    (Vec::new(), partial.len(), Some(error.to_string()))
                }
            };

            let mut kept = 0;
            for review in collected {
                if seen.insert(review.id.clone()) {
                    reviews.push(review);
                    kept += 1;
                } else {
                    warn!(source = name.as_str(), id = review.id.as_str(), "Dropping duplicate review id");
                }
            }

            info!(source = name.as_str(), count = kept, "Source finished");
            stats.push(ScrapeStats {
                source: name,
                started_at,
                finished_at,
                reviews_scraped: kept,
                discarded: partial,
                error,
            });
        }

        let all_failed = stats.iter().all(|s| !s.succeeded());
        *self.last_run.write().expect("scrape stats lock poisoned") = stats;

        if all_failed {
            return Err(ScrapeError::AllSourcesFailed {
                message: errors.join("; "),
            });
        }

        info!(total = reviews.len(), failed_sources = errors.len(), "Scrape run complete");
        Ok(reviews)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{review, MockSource};

    #[tokio::test]
    async fn duplicate_ids_keep_first_occurrence() {
        let a = MockSource::ok("a", vec![review("dup-1", "first"), review("a-2", "x")]);
        let b = MockSource::ok("b", vec![review("dup-1", "second")]);
        let orch = ScrapeOrchestrator::new(vec![Arc::new(a), Arc::new(b)]);

        let reviews = orch.scrape_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(reviews.len(), 2);
        let dup = reviews.iter().find(|r| r.id == "dup-1").unwrap();
        assert_eq!(dup.content, "first");
    }

    #[tokio::test]
    async fn disabled_sources_are_never_invoked() {
        let disabled = Arc::new(MockSource::ok("off", vec![review("x", "y")]).disabled());
        let enabled = Arc::new(MockSource::ok("on", vec![review("z", "w")]));
        let orch = ScrapeOrchestrator::new(vec![disabled.clone(), enabled.clone()]);

        assert_eq!(orch.enabled_sources(), vec!["on"]);
        orch.scrape_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(disabled.calls(), 0);
        assert_eq!(enabled.calls(), 1);
    }

    #[tokio::test]
    async fn nothing_enabled_is_an_error() {
        let orch = ScrapeOrchestrator::new(vec![Arc::new(MockSource::ok("off", vec![]).disabled())]);
        assert!(matches!(
            orch.scrape_all(&CancellationToken::new()).await,
            Err(ScrapeError::NoSourcesEnabled)
        ));
    }

    #[tokio::test]
    async fn partial_results_of_failed_source_are_discarded() {
        let ok = MockSource::ok("ok", vec![review("ok-1", "fine")]);
        let flaky = MockSource::failing("flaky", "HTTP 503").with_partial(vec![review("f-1", "got one")]);
        let orch = ScrapeOrchestrator::new(vec![Arc::new(ok), Arc::new(flaky)]);

        let reviews = orch.scrape_all(&CancellationToken::new()).await.unwrap();
        let ids: Vec<&str> = reviews.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ok-1"]);

        let stats = orch.last_run_stats();
        let flaky = stats.iter().find(|s| s.source == "flaky").unwrap();
        assert_eq!(flaky.reviews_scraped, 0);
        assert_eq!(flaky.discarded, 1);
        assert!(flaky.error.as_deref().unwrap().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn all_failed_is_an_error_even_with_partials() {
        let a = MockSource::failing("a", "HTTP 500").with_partial(vec![review("a-1", "x")]);
        let b = MockSource::failing("b", "timeout");
        let orch = ScrapeOrchestrator::new(vec![Arc::new(a), Arc::new(b)]);

        match orch.scrape_all(&CancellationToken::new()).await {
            Err(ScrapeError::AllSourcesFailed { message }) => {
                assert!(message.contains("a scraper error"), "{message}");
                assert!(message.contains("b scraper error"), "{message}");
            }
            other => panic!("expected AllSourcesFailed, got {other:?}"),
        }
    }
}
