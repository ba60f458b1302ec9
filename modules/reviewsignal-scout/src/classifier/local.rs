//! Deterministic lexical heuristic. No network, no model.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use reviewsignal_common::config::AnalyzerConfig;
use reviewsignal_common::{Entity, IntentCategory, RawAnalysis, Review};

use super::{ClassificationStrategy, ClassifyError};

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "awesome", "excellent", "amazing", "love", "loved", "best", "fantastic",
    "perfect", "happy", "pleased", "satisfied", "wonderful", "helpful", "thank", "thanks",
    "reliable", "secure", "efficient", "intuitive",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "poor", "terrible", "awful", "horrible", "worst", "hate", "disappointed",
    "frustrating", "useless", "broken", "annoying", "slow", "expensive", "waste", "difficult",
    "confusing", "crash", "crashes", "crashed", "bug", "bugs", "error", "errors", "problem",
    "problems", "issue", "issues", "fail", "fails", "failed", "failing", "failure", "cannot",
    "can't", "won't", "doesn't", "didn't", "insecure", "vulnerability", "breach", "outage",
    "downtime",
];

const NEGATIONS: &[&str] = &["not", "don't", "doesn't", "didn't", "never", "no"];

const ENTITY_TYPE: &str = "PRODUCT";

fn word_regex(words: &[&str]) -> Regex {
    let alternation = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{alternation})\b")).expect("valid lexicon regex")
}

static POSITIVE_RE: LazyLock<Regex> = LazyLock::new(|| word_regex(POSITIVE_WORDS));
static NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| word_regex(NEGATIVE_WORDS));

// A negation, up to three words, then a positive word.
static NEGATED_POSITIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    let neg = NEGATIONS.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join("|");
    let pos = POSITIVE_WORDS.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join("|");
    Regex::new(&format!(r"\b(?:{neg})\s+(?:[\w']+\s+){{0,3}}(?:{pos})\b")).expect("valid negation regex")
});

static CAPS_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Z]{3,}").expect("valid regex"));

pub struct LocalStrategy {
    category_keywords: BTreeMap<String, IntentCategory>,
    extra_keywords: Vec<String>,
    product_terms: Vec<String>,
    generic_terms: Vec<String>,
}

impl LocalStrategy {
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        let lower = |v: &[String]| -> Vec<String> {
            v.iter().map(|s| s.to_lowercase()).filter(|s| !s.is_empty()).collect()
        };
        Self {
            category_keywords: config
                .category_keywords
                .iter()
                .map(|(k, v)| (k.to_lowercase(), *v))
                .collect(),
            extra_keywords: lower(&config.keywords),
            product_terms: lower(&config.product_terms),
            generic_terms: lower(&config.generic_terms),
        }
    }

    pub fn keyword_count(&self) -> usize {
        self.category_keywords.len() + self.extra_keywords.len() + self.product_terms.len()
    }

    pub fn category_count(&self) -> usize {
        self.category_keywords.values().collect::<BTreeSet<_>>().len()
    }

    pub fn analyze(&self, review: &Review) -> RawAnalysis {
        let raw_text = match &review.title {
            Some(title) => format!("{} {}", title, review.content),
            None => review.content.clone(),
        };
        let text = raw_text.to_lowercase();

        let sentiment_score = blend_rating(amplify(lexical_score(&text), &raw_text), review.rating);

        let (keywords, category_scores) = self.scan_keywords(&text);
        let intent_category = top_category(&category_scores);
        let confidence = if keywords.is_empty() {
            0.5
        } else {
            (keywords.len() as f64 / 10.0).clamp(0.3, 1.0)
        };

        RawAnalysis {
            sentiment_score,
            intent_category,
            confidence,
            keywords,
            entities: self.extract_entities(&text),
            category_scores,
        }
    }

    /// Every matched keyword, plus each category's share of the category hits.
    fn scan_keywords(&self, text: &str) -> (BTreeSet<String>, BTreeMap<IntentCategory, f64>) {
        let mut keywords = BTreeSet::new();
        let mut hits: BTreeMap<IntentCategory, f64> = BTreeMap::new();

        for (keyword, category) in &self.category_keywords {
            if text.contains(keyword.as_str()) {
                keywords.insert(keyword.clone());
                *hits.entry(*category).or_default() += 1.0;
            }
        }
        for term in self.extra_keywords.iter().chain(&self.product_terms) {
            if text.contains(term.as_str()) {
                keywords.insert(term.clone());
            }
        }

        let total: f64 = hits.values().sum();
        if total > 0.0 {
            for score in hits.values_mut() {
                *score /= total;
            }
        }
        (keywords, hits)
    }

    fn extract_entities(&self, text: &str) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self
            .product_terms
            .iter()
            .filter_map(|term| {
                char_offset(text, term).map(|position| Entity {
                    text: term.clone(),
                    entity_type: ENTITY_TYPE.to_string(),
                    position,
                })
            })
            .collect();

        for term in &self.generic_terms {
            if let Some(position) = char_offset(text, term) {
                if !entities.iter().any(|e| e.position == position) {
                    entities.push(Entity {
                        text: term.clone(),
                        entity_type: ENTITY_TYPE.to_string(),
                        position,
                    });
                }
            }
        }

        entities.sort_by_key(|e| e.position);
        entities
    }
}

/// (positive - negative) / (positive + negative), or 0 with no lexicon hits.
pub fn lexical_score(text: &str) -> f64 {
    let mut positive = POSITIVE_RE.find_iter(text).count() as f64;
    let mut negative = NEGATIVE_RE.find_iter(text).count() as f64;

    let negated = NEGATED_POSITIVE_RE.find_iter(text).count() as f64;
    positive = (positive - negated).max(0.0);
    negative += negated;

    let total = positive + negative;
    if total == 0.0 {
        0.0
    } else {
        (positive - negative) / total
    }
}

/// Shouting (more than two '!' or more than two capital runs) scales by 1.2.
pub fn amplify(score: f64, raw_text: &str) -> f64 {
    let exclamations = raw_text.matches('!').count();
    let caps_runs = CAPS_RUN_RE.find_iter(raw_text).count();
    if exclamations > 2 || caps_runs > 2 {
        (score * 1.2).clamp(-1.0, 1.0)
    } else {
        score
    }
}

pub fn blend_rating(score: f64, rating: Option<f64>) -> f64 {
    match rating {
        Some(r) => (score * 0.6 + ((r - 3.0) / 2.0) * 0.4).clamp(-1.0, 1.0),
        None => score,
    }
}

/// Highest score wins; ties go to the earlier category.
fn top_category(scores: &BTreeMap<IntentCategory, f64>) -> IntentCategory {
    let mut best: Option<(IntentCategory, f64)> = None;
    for (category, score) in scores {
        if best.map_or(true, |(_, s)| *score > s) {
            best = Some((*category, *score));
        }
    }
    best.map(|(c, _)| c).unwrap_or(IntentCategory::GeneralComplaint)
}

fn char_offset(text: &str, needle: &str) -> Option<usize> {
    text.find(needle).map(|byte| text[..byte].chars().count())
}

#[async_trait]
impl ClassificationStrategy for LocalStrategy {
    fn name(&self) -> &str {
        "local"
    }

    async fn classify(&self, review: &Review) -> Result<RawAnalysis, ClassifyError> {
        Ok(self.analyze(review))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> LocalStrategy {
        LocalStrategy::from_config(&AnalyzerConfig::default())
    }

    fn rated(content: &str, rating: Option<f64>) -> Review {
        let mut review = Review::builder()
            .id("t-1")
            .source("test")
            .source_id("1")
            .content(content)
            .build();
        review.rating = rating;
        review
    }

    #[test]
    fn shouted_praise_with_top_rating_is_positive() {
        let raw = strategy().analyze(&rated("BEST DNS tool EVER!!! Love it", Some(5.0)));
        assert!(raw.sentiment_score > 0.0);
        assert!(raw.keywords.contains("dns"));
    }

    #[test]
    fn crashes_and_terrible_support_is_negative_bug_family() {
        let raw = strategy().analyze(&rated(
            "Constant crashes and terrible DHCP support",
            Some(1.0),
        ));
        assert!(raw.sentiment_score < 0.0);
        assert!(matches!(
            raw.intent_category,
            IntentCategory::BugReport | IntentCategory::Performance
        ));
        assert!((raw.sentiment_score + 1.0).abs() < 1e-9);
        assert!(raw.entities.iter().any(|e| e.text == "dhcp" && e.entity_type == "PRODUCT"));
    }

    #[test]
    fn negation_moves_one_positive_to_negative() {
        // "good" counted once, then negated: 0 positive, 1 negative.
        assert_eq!(lexical_score("this is not very good"), -1.0);
        // Four words between negation and positive word: rule does not apply.
        assert_eq!(lexical_score("not one two three four good"), 1.0);
    }

    #[test]
    fn contractions_count_as_words_inside_the_negation_window() {
        assert_eq!(lexical_score("not sure it's good"), -1.0);
        assert_eq!(lexical_score("doesn't think it isn't reliable"), -1.0);
    }

    #[test]
    fn lexicon_matches_whole_words_only() {
        assert_eq!(lexical_score("the goodwill of the bugsy team"), 0.0);
        assert_eq!(lexical_score("great but slow"), 0.0);
    }

    #[test]
    fn amplification_needs_more_than_two_markers() {
        assert_eq!(amplify(0.5, "nice!!"), 0.5);
        assert!((amplify(0.5, "nice!!!") - 0.6).abs() < 1e-9);
        assert!((amplify(-0.5, "DNS DHCP IPAM down") - -0.6).abs() < 1e-9);
        assert_eq!(amplify(0.9, "WOW WOW WOW"), 1.0);
    }

    #[test]
    fn rating_blend_weights_lexicon_and_stars() {
        assert!((blend_rating(0.0, Some(5.0)) - 0.4).abs() < 1e-9);
        assert!((blend_rating(1.0, Some(1.0)) - 0.2).abs() < 1e-9);
        assert_eq!(blend_rating(-0.25, None), -0.25);
    }

    #[test]
    fn no_keywords_means_half_confidence_and_general_complaint() {
        let raw = strategy().analyze(&rated("meh", None));
        assert_eq!(raw.confidence, 0.5);
        assert_eq!(raw.intent_category, IntentCategory::GeneralComplaint);
        assert!(raw.category_scores.is_empty());
    }

    #[test]
    fn confidence_scales_with_keyword_count() {
        let raw = strategy().analyze(&rated("crash", None));
        assert_eq!(raw.confidence, 0.3);
        let raw = strategy().analyze(&rated(
            "bug crash error broken freeze slow laggy refund rude ddos threat",
            None,
        ));
        assert_eq!(raw.confidence, 1.0);
    }

    #[test]
    fn generic_terms_do_not_shadow_products_at_same_offset() {
        let raw = strategy().analyze(&rated("dns service keeps dying", None));
        let at_zero: Vec<_> = raw.entities.iter().filter(|e| e.position == 0).collect();
        assert!(at_zero.iter().all(|e| e.text == "dns"));
        assert!(raw.entities.iter().any(|e| e.text == "service" && e.position == 4));
    }

    #[test]
    fn entity_offsets_count_characters_not_bytes() {
        let raw = strategy().analyze(&rated("déjà vu with ipam", None));
        let ipam = raw.entities.iter().find(|e| e.text == "ipam").unwrap();
        assert_eq!(ipam.position, 13);
    }

    #[test]
    fn security_keywords_pick_security() {
        let raw = strategy().analyze(&rated("ddos protection did nothing", None));
        assert_eq!(raw.intent_category, IntentCategory::Security);
    }
}
