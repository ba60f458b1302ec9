//! Classification engine: strategy dispatch, result cache, threshold flags.

pub mod local;
pub mod remote;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ai_client::AiError;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use reviewsignal_common::config::{AnalyzerConfig, AnalyzerMode};
use reviewsignal_common::{content_fingerprint, AnalysisResult, RawAnalysis, Review, Thresholds};

pub use local::LocalStrategy;
pub use remote::RemoteStrategy;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("review {0} has no content")]
    EmptyContent(String),

    #[error("model request failed: {0}")]
    Model(#[from] AiError),

    #[error("malformed model reply: {0}")]
    MalformedReply(String),
}

/// Turns one review into sentiment, intent, and confidence.
#[async_trait]
pub trait ClassificationStrategy: Send + Sync {
    fn name(&self) -> &str;
    async fn classify(&self, review: &Review) -> Result<RawAnalysis, ClassifyError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierStats {
    pub mode: String,
    pub cache_size: usize,
    pub negative_threshold: f64,
    pub relevance_threshold: f64,
    pub keyword_count: usize,
    pub category_count: usize,
}

pub struct Classifier {
    strategy: Arc<dyn ClassificationStrategy>,
    local: Arc<LocalStrategy>,
    thresholds: Thresholds,
    cache: RwLock<HashMap<String, AnalysisResult>>,
}

impl Classifier {
    pub fn new(
        strategy: Arc<dyn ClassificationStrategy>,
        local: Arc<LocalStrategy>,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            strategy,
            local,
            thresholds,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Pick the strategy named by `config.mode`. A remote mode that cannot be
    /// set up (missing key, bad endpoint) degrades to the local heuristic.
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        let local = Arc::new(LocalStrategy::from_config(config));
        let strategy: Arc<dyn ClassificationStrategy> = match config.mode() {
            AnalyzerMode::Local => local.clone(),
            mode => match RemoteStrategy::from_config(config) {
                Ok(remote) => Arc::new(remote),
                Err(e) => {
                    warn!(mode = mode.as_str(), error = %e, "Remote classifier unavailable, using local");
                    local.clone()
                }
            },
        };
        info!(strategy = strategy.name(), "Classifier ready");
        Self::new(strategy, local, config.thresholds())
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn is_local(&self) -> bool {
        self.strategy.name() == self.local.name()
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Classify through the configured strategy. Results are cached by content
    /// fingerprint; a hit is returned as stored without calling the strategy.
    pub async fn classify(&self, review: &Review) -> Result<AnalysisResult, ClassifyError> {
        if review.content.trim().is_empty() {
            return Err(ClassifyError::EmptyContent(review.id.clone()));
        }

        let key = review.fingerprint();
        if let Some(hit) = self.cached(&key) {
            debug!(review_id = review.id.as_str(), "Classification cache hit");
            return Ok(hit);
        }

        let raw = self.strategy.classify(review).await?;
        raw.validate().map_err(ClassifyError::MalformedReply)?;
        let result = AnalysisResult::from_raw(review.id.clone(), raw, &self.thresholds);

        self.cache
            .write()
            .expect("classification cache lock poisoned")
            .entry(key)
            .or_insert_with(|| result.clone());
        Ok(result)
    }

    /// Local heuristic only, bypassing the cache. Used as the fallback when
    /// the remote strategy fails so the remote is retried next time.
    pub fn classify_local(&self, review: &Review) -> Result<AnalysisResult, ClassifyError> {
        if review.content.trim().is_empty() {
            return Err(ClassifyError::EmptyContent(review.id.clone()));
        }
        let raw = self.local.analyze(review);
        Ok(AnalysisResult::from_raw(review.id.clone(), raw, &self.thresholds))
    }

    /// Classify free text that did not come from a source.
    pub async fn analyze_text(
        &self,
        text: &str,
        title: Option<&str>,
        rating: Option<f64>,
    ) -> Result<AnalysisResult, ClassifyError> {
        let fingerprint = content_fingerprint(text);
        let mut review = Review::builder()
            .id(format!("manual-{}", &fingerprint[..12]))
            .source("manual")
            .source_id(fingerprint)
            .content(text)
            .build();
        review.title = title.map(str::to_string);
        review.rating = rating;
        self.classify(&review).await
    }

    fn cached(&self, key: &str) -> Option<AnalysisResult> {
        self.cache
            .read()
            .expect("classification cache lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn cache_size(&self) -> usize {
        self.cache
            .read()
            .expect("classification cache lock poisoned")
            .len()
    }

    pub fn stats(&self) -> ClassifierStats {
        ClassifierStats {
            mode: self.strategy.name().to_string(),
            cache_size: self.cache_size(),
            negative_threshold: self.thresholds.negative,
            relevance_threshold: self.thresholds.relevance,
            keyword_count: self.local.keyword_count(),
            category_count: self.local.category_count(),
        }
    }
}
