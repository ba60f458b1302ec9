use async_trait::async_trait;
use tracing::info;

use reviewsignal_common::{AnalysisResult, Department, ReviewSignalError, Review};

/// Outbound channel for routed reviews (email, chat, ticketing).
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(
        &self,
        department: &Department,
        review: &Review,
        analysis: &AnalysisResult,
    ) -> Result<(), ReviewSignalError>;
}

/// Writes one structured log line per routed review.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(
        &self,
        department: &Department,
        review: &Review,
        analysis: &AnalysisResult,
    ) -> Result<(), ReviewSignalError> {
        info!(
            department = department.id.as_str(),
            contact = department.contact_info.as_str(),
            review_id = review.id.as_str(),
            source = review.source.as_str(),
            category = %analysis.intent_category,
            sentiment = analysis.sentiment_score,
            confidence = analysis.confidence,
            url = review.url.as_str(),
            "Negative review routed"
        );
        Ok(())
    }
}
