//! Pipeline driver: scrape, classify, filter, route, notify.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

use reviewsignal_common::{AnalysisResult, Department, Review};

use crate::classifier::{Classifier, ClassifyError};
use crate::notifier::Notifier;
use crate::orchestrator::{ScrapeError, ScrapeOrchestrator};
use crate::router::DepartmentRouter;

/// Long-lived collaborators, built once at startup.
#[derive(Clone, TypedBuilder)]
pub struct PipelineDeps {
    pub orchestrator: Arc<ScrapeOrchestrator>,
    pub classifier: Arc<Classifier>,
    pub router: Arc<DepartmentRouter>,
    #[builder(default)]
    pub notifiers: Vec<Arc<dyn Notifier>>,
    /// Reviews classified at once.
    #[builder(default = 8)]
    pub concurrency: usize,
    #[builder(default = 100)]
    pub recent_capacity: usize,
}

/// A classified review, with its department when it was routed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedReview {
    pub review: Review,
    pub analysis: AnalysisResult,
    pub department: Option<Department>,
}

/// Stats from one pipeline run.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub scraped: u32,
    pub classified: u32,
    pub local_fallbacks: u32,
    pub classify_failures: u32,
    pub filtered: u32,
    pub routed: u32,
    pub notified: u32,
    pub notify_failures: u32,
    pub by_department: BTreeMap<String, u32>,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Pipeline Run Complete ===")?;
        writeln!(f, "Reviews scraped:    {}", self.scraped)?;
        writeln!(f, "Classified:         {}", self.classified)?;
        writeln!(f, "Local fallbacks:    {}", self.local_fallbacks)?;
        writeln!(f, "Classify failures:  {}", self.classify_failures)?;
        writeln!(f, "Filtered out:       {}", self.filtered)?;
        writeln!(f, "Routed:             {}", self.routed)?;
        writeln!(f, "Notified:           {}", self.notified)?;
        writeln!(f, "Notify failures:    {}", self.notify_failures)?;
        if !self.by_department.is_empty() {
            writeln!(f, "\nBy department:")?;
            for (dept, count) in &self.by_department {
                writeln!(f, "  {dept:<18}{count}")?;
            }
        }
        Ok(())
    }
}

enum Outcome {
    Failed,
    Filtered { processed: ProcessedReview, fallback: bool },
    Routed {
        processed: ProcessedReview,
        fallback: bool,
        notified: u32,
        notify_failures: u32,
    },
}

pub struct Pipeline {
    deps: PipelineDeps,
    recent: RwLock<VecDeque<ProcessedReview>>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            recent: RwLock::new(VecDeque::with_capacity(deps.recent_capacity)),
            deps,
        }
    }

    pub fn router(&self) -> &DepartmentRouter {
        &self.deps.router
    }

    pub fn classifier(&self) -> &Classifier {
        &self.deps.classifier
    }

    /// Most recently classified reviews, newest first.
    pub fn recent_reviews(&self) -> Vec<ProcessedReview> {
        self.recent
            .read()
            .expect("recent reviews lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    fn remember(&self, processed: ProcessedReview) {
        let mut recent = self.recent.write().expect("recent reviews lock poisoned");
        recent.push_front(processed);
        recent.truncate(self.deps.recent_capacity);
    }

    /// One full run. Fails only when the scrape as a whole fails; per-review
    /// problems are counted and logged.
    pub async fn run_once(&self, shutdown: &CancellationToken) -> Result<PipelineStats, ScrapeError> {
        let reviews = self.deps.orchestrator.scrape_all(shutdown).await?;
        let mut stats = PipelineStats {
            scraped: reviews.len() as u32,
            ..Default::default()
        };

        let outcomes: Vec<Outcome> = stream::iter(reviews)
            .map(|review| self.process(review))
            .buffer_unordered(self.deps.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Failed => stats.classify_failures += 1,
                Outcome::Filtered { processed, fallback } => {
                    stats.classified += 1;
                    stats.local_fallbacks += u32::from(fallback);
                    stats.filtered += 1;
                    self.remember(processed);
                }
                Outcome::Routed {
                    processed,
                    fallback,
                    notified,
                    notify_failures,
                } => {
                    stats.classified += 1;
                    stats.local_fallbacks += u32::from(fallback);
                    stats.routed += 1;
                    stats.notified += notified;
                    stats.notify_failures += notify_failures;
                    if let Some(dept) = &processed.department {
                        *stats.by_department.entry(dept.id.clone()).or_default() += 1;
                    }
                    self.remember(processed);
                }
            }
        }

        info!(
            scraped = stats.scraped,
            classified = stats.classified,
            routed = stats.routed,
            notify_failures = stats.notify_failures,
            "Pipeline run complete"
        );
        Ok(stats)
    }

    async fn process(&self, review: Review) -> Outcome {
        let classifier = &self.deps.classifier;
        let (analysis, fallback) = match classifier.classify(&review).await {
            Ok(a) => (a, false),
            Err(ClassifyError::EmptyContent(id)) => {
                warn!(review_id = id.as_str(), "Skipping review without content");
                return Outcome::Failed;
            }
            Err(e) if !classifier.is_local() => {
                warn!(review_id = review.id.as_str(), error = %e, "Remote classification failed, using local");
                match classifier.classify_local(&review) {
                    Ok(a) => (a, true),
                    Err(e) => {
                        warn!(review_id = review.id.as_str(), error = %e, "Local classification failed");
                        return Outcome::Failed;
                    }
                }
            }
            Err(e) => {
                warn!(review_id = review.id.as_str(), error = %e, "Classification failed");
                return Outcome::Failed;
            }
        };

        if !analysis.needs_follow_up() {
            return Outcome::Filtered {
                processed: ProcessedReview {
                    review,
                    analysis,
                    department: None,
                },
                fallback,
            };
        }

        let department = self.deps.router.route(&analysis);
        let mut notified = 0;
        let mut notify_failures = 0;
        for notifier in &self.deps.notifiers {
            match notifier.notify(&department, &review, &analysis).await {
                Ok(()) => notified += 1,
                Err(e) => {
                    notify_failures += 1;
                    warn!(
                        notifier = notifier.name(),
                        department = department.id.as_str(),
                        review_id = review.id.as_str(),
                        error = %e,
                        "Notification failed"
                    );
                }
            }
        }

        Outcome::Routed {
            processed: ProcessedReview {
                review,
                analysis,
                department: Some(department),
            },
            fallback,
            notified,
            notify_failures,
        }
    }

    /// Run immediately, then once per `interval`, until `shutdown` fires.
    /// A failed run is logged and retried at the next tick.
    pub async fn run_scheduled(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_once(&shutdown).await {
                        Ok(stats) => info!("{stats}"),
                        Err(e) => error!(error = %e, "Pipeline run failed, retrying next interval"),
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}
