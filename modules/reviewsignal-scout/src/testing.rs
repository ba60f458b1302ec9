// Test mocks for the review pipeline.
//
// One mock per trait boundary:
// - MockSource (SourceAdapter): canned reviews or a canned failure, optional delay
// - CountingStrategy (ClassificationStrategy): fixed analysis, counts calls
// - RecordingNotifier (Notifier): records deliveries, can be told to fail

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use reviewsignal_common::{
    AnalysisResult, Department, IntentCategory, RawAnalysis, Review, ReviewSignalError,
};

use crate::classifier::{ClassificationStrategy, ClassifyError};
use crate::notifier::Notifier;
use crate::sources::{ScrapeContext, SourceAdapter, SourceError, SourceFailure};

/// Minimal review with the given id and content.
pub fn review(id: &str, content: &str) -> Review {
    Review::builder()
        .id(id)
        .source("mock")
        .source_id(id)
        .content(content)
        .build()
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

pub struct MockSource {
    name: String,
    enabled: bool,
    reviews: Vec<Review>,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockSource {
    pub fn ok(name: &str, reviews: Vec<Review>) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            reviews,
            failure: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::ok(name, Vec::new())
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Reviews returned alongside the failure.
    pub fn with_partial(mut self, reviews: Vec<Review>) -> Self {
        self.reviews = reviews;
        self
    }

    /// Wait this long (cancellably) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn scrape(&self, ctx: &ScrapeContext) -> Result<Vec<Review>, SourceFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            ctx.sleep(delay).await?;
        }
        match &self.failure {
            Some(message) => Err(SourceFailure::new(
                self.reviews.clone(),
                SourceError::Network(message.clone()),
            )),
            None => Ok(self.reviews.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// CountingStrategy
// ---------------------------------------------------------------------------

pub struct CountingStrategy {
    result: Option<RawAnalysis>,
    calls: AtomicUsize,
}

impl CountingStrategy {
    pub fn returning(raw: RawAnalysis) -> Self {
        Self {
            result: Some(raw),
            calls: AtomicUsize::new(0),
        }
    }

    /// Strongly negative, confident bug report.
    pub fn negative_bug() -> Self {
        Self::returning(RawAnalysis {
            sentiment_score: -0.9,
            intent_category: IntentCategory::BugReport,
            confidence: 0.9,
            keywords: BTreeSet::from(["crash".to_string()]),
            entities: Vec::new(),
            category_scores: BTreeMap::from([(IntentCategory::BugReport, 1.0)]),
        })
    }

    /// Every call fails like an unreachable model endpoint.
    pub fn failing() -> Self {
        Self {
            result: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn raw(&self) -> RawAnalysis {
        self.result.clone().unwrap_or_else(|| RawAnalysis {
            sentiment_score: 0.0,
            intent_category: IntentCategory::GeneralComplaint,
            confidence: 0.5,
            keywords: BTreeSet::new(),
            entities: Vec::new(),
            category_scores: BTreeMap::new(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationStrategy for CountingStrategy {
    fn name(&self) -> &str {
        "counting"
    }

    async fn classify(&self, _review: &Review) -> Result<RawAnalysis, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            Some(raw) => Ok(raw.clone()),
            None => Err(ClassifyError::Model(ai_client::AiError::Network(
                "connection refused".to_string(),
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// (department id, review id) pairs in delivery order.
pub struct RecordingNotifier {
    delivered: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(
        &self,
        department: &Department,
        review: &Review,
        _analysis: &AnalysisResult,
    ) -> Result<(), ReviewSignalError> {
        if self.fail {
            return Err(ReviewSignalError::Notification("channel unavailable".to_string()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((department.id.clone(), review.id.clone()));
        Ok(())
    }
}
