use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use typed_builder::TypedBuilder;

// --- Review ---

/// One piece of scraped feedback. Built by a source adapter during a scrape
/// call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    /// Source-prefixed identifier, unique within a pipeline run.
    #[builder(setter(into))]
    pub id: String,
    #[builder(setter(into))]
    pub source: String,
    #[builder(setter(into))]
    pub source_id: String,
    #[builder(setter(into))]
    pub content: String,
    #[builder(default, setter(strip_option, into))]
    pub title: Option<String>,
    #[builder(default, setter(into))]
    pub author: String,
    /// Star rating on a 1-5 scale when the origin has one.
    #[builder(default, setter(strip_option))]
    pub rating: Option<f64>,
    #[builder(default, setter(into))]
    pub url: String,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub retrieved_at: DateTime<Utc>,
    #[builder(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Review {
    /// Cache key for classification results.
    pub fn fingerprint(&self) -> String {
        content_fingerprint(&self.content)
    }
}

/// SHA-256 of the review text, hex encoded.
pub fn content_fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

// --- Intent categories ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    BugReport,
    FeatureRequest,
    Performance,
    Billing,
    Logistics,
    CustomerService,
    UiUx,
    Security,
    GeneralComplaint,
}

impl IntentCategory {
    pub const ALL: [IntentCategory; 9] = [
        IntentCategory::BugReport,
        IntentCategory::FeatureRequest,
        IntentCategory::Performance,
        IntentCategory::Billing,
        IntentCategory::Logistics,
        IntentCategory::CustomerService,
        IntentCategory::UiUx,
        IntentCategory::Security,
        IntentCategory::GeneralComplaint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::BugReport => "bug_report",
            IntentCategory::FeatureRequest => "feature_request",
            IntentCategory::Performance => "performance",
            IntentCategory::Billing => "billing",
            IntentCategory::Logistics => "logistics",
            IntentCategory::CustomerService => "customer_service",
            IntentCategory::UiUx => "ui_ux",
            IntentCategory::Security => "security",
            IntentCategory::GeneralComplaint => "general_complaint",
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntentCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown intent category: {s}"))
    }
}

// --- Analysis ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Entity {
    pub text: String,
    /// Type tag, e.g. "PRODUCT".
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Character offset of the first occurrence in the lowercased text.
    pub position: usize,
}

/// What a classification strategy produces. Carries no review id and no
/// threshold flags; those are attached by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalysis {
    /// -1 (very negative) to 1 (very positive)
    pub sentiment_score: f64,
    pub intent_category: IntentCategory,
    /// 0 to 1
    pub confidence: f64,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub category_scores: BTreeMap<IntentCategory, f64>,
}

impl RawAnalysis {
    /// Range checks for values coming from outside the process.
    pub fn validate(&self) -> Result<(), String> {
        if !(-1.0..=1.0).contains(&self.sentiment_score) {
            return Err(format!(
                "sentimentScore {} outside [-1, 1]",
                self.sentiment_score
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        if let Some((cat, score)) = self.category_scores.iter().find(|(_, s)| !s.is_finite()) {
            return Err(format!("categoryScores[{cat}] is not finite: {score}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Scores at or below this are negative.
    pub negative: f64,
    /// Confidence at or above this is relevant.
    pub relevance: f64,
}

impl Thresholds {
    pub fn is_negative(&self, sentiment_score: f64) -> bool {
        sentiment_score <= self.negative
    }

    pub fn is_relevant(&self, confidence: f64) -> bool {
        confidence >= self.relevance
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            negative: -0.3,
            relevance: 0.3,
        }
    }
}

/// Classification output for one review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub review_id: String,
    pub sentiment_score: f64,
    pub is_negative: bool,
    pub is_relevant: bool,
    pub intent_category: IntentCategory,
    pub confidence: f64,
    pub keywords: BTreeSet<String>,
    pub entities: Vec<Entity>,
    pub category_scores: BTreeMap<IntentCategory, f64>,
}

impl AnalysisResult {
    /// The only way to build a result: flags always derive from thresholds.
    pub fn from_raw(review_id: impl Into<String>, raw: RawAnalysis, thresholds: &Thresholds) -> Self {
        Self {
            review_id: review_id.into(),
            is_negative: thresholds.is_negative(raw.sentiment_score),
            is_relevant: thresholds.is_relevant(raw.confidence),
            sentiment_score: raw.sentiment_score,
            intent_category: raw.intent_category,
            confidence: raw.confidence,
            keywords: raw.keywords,
            entities: raw.entities,
            category_scores: raw.category_scores,
        }
    }

    /// Items the driver forwards to routing.
    pub fn needs_follow_up(&self) -> bool {
        self.is_negative && self.is_relevant
    }
}

// --- Departments ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: String,
    pub name: String,
    /// Email address or chat channel.
    pub contact_info: String,
    #[serde(default)]
    pub categories: Vec<IntentCategory>,
}

impl Department {
    pub const TERMINAL_ID: &'static str = "support";

    /// Last-resort routing target. Always valid.
    pub fn terminal() -> Self {
        Self {
            id: Self::TERMINAL_ID.to_string(),
            name: "Customer Support".to_string(),
            contact_info: "support@company.com".to_string(),
            categories: vec![IntentCategory::GeneralComplaint],
        }
    }
}
