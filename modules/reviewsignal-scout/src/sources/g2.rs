use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info};

use reviewsignal_common::config::{G2Config, ProxyConfig, RateLimitConfig};
use reviewsignal_common::Review;

use super::http::{build_client, fetch_text, Pacer};
use super::{ScrapeContext, SourceAdapter, SourceError, SourceFailure};

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct G2Page {
    #[serde(default)]
    reviews: Vec<G2Review>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    current_page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct G2Review {
    id: String,
    #[serde(default)]
    headline: String,
    #[serde(default)]
    review_text: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    stars: Option<f64>,
    #[serde(default)]
    pros: String,
    #[serde(default)]
    cons: String,
    #[serde(default)]
    reviewer_info: ReviewerInfo,
    #[serde(default)]
    vendor_response: Option<VendorResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct ReviewerInfo {
    #[serde(default)]
    reviewer_name: String,
    #[serde(default)]
    job_title: String,
    #[serde(default)]
    company_size: String,
    #[serde(default)]
    industry: String,
    #[serde(default)]
    is_verified: bool,
}

#[derive(Debug, Deserialize)]
struct VendorResponse {
    #[serde(default)]
    response_text: String,
}

// --- Adapter ---

/// Paginated JSON review listing for one product.
pub struct G2Source {
    config: G2Config,
    client: reqwest::Client,
    pacer: Pacer,
}

impl G2Source {
    pub fn new(
        config: G2Config,
        rate_limits: &RateLimitConfig,
        proxy: &ProxyConfig,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(proxy)?,
            pacer: Pacer::new(rate_limits.clone()),
            config,
        })
    }

    fn max_pages(&self) -> u32 {
        if self.config.max_pages == 0 {
            5
        } else {
            self.config.max_pages
        }
    }

    fn page_url(&self, page: u32) -> String {
        format!(
            "{}/products/{}/reviews?page={}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.product_id),
            page
        )
    }

    /// Returns the page's reviews and whether another page follows.
    async fn fetch_page(
        &self,
        ctx: &ScrapeContext,
        page: u32,
    ) -> Result<(Vec<Review>, bool), SourceError> {
        self.pacer.wait(ctx).await?;

        let mut request = self
            .client
            .get(self.page_url(page))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, self.pacer.user_agent());
        if !self.config.api_token.is_empty() {
            request = request.header(
                AUTHORIZATION,
                format!("Token token={}", self.config.api_token),
            );
        }

        let body = fetch_text(ctx, request).await?;
        let parsed: G2Page = serde_json::from_str(&body)?;
        let has_more = match &parsed.pagination {
            Some(p) => p.current_page < p.total_pages,
            None => !parsed.reviews.is_empty(),
        };

        let reviews = parsed
            .reviews
            .into_iter()
            .filter_map(|r| self.to_review(r))
            .collect();
        Ok((reviews, has_more))
    }

    fn to_review(&self, review: G2Review) -> Option<Review> {
        if review.review_text.trim().is_empty() {
            return None;
        }
        let info = review.reviewer_info;
        let mut metadata = BTreeMap::new();
        metadata.insert("product_id".to_string(), self.config.product_id.clone().into());
        metadata.insert("pros".to_string(), review.pros.into());
        metadata.insert("cons".to_string(), review.cons.into());
        metadata.insert("reviewer_title".to_string(), info.job_title.into());
        metadata.insert("company_size".to_string(), info.company_size.into());
        metadata.insert("industry".to_string(), info.industry.into());
        metadata.insert("verified".to_string(), info.is_verified.into());
        if let Some(vendor) = review.vendor_response.filter(|v| !v.response_text.is_empty()) {
            metadata.insert("vendor_response".to_string(), vendor.response_text.into());
        }

        let now = Utc::now();
        let mut built = Review::builder()
            .id(format!("g2-{}", review.id))
            .source("g2")
            .source_id(review.id.clone())
            .content(review.review_text)
            .author(info.reviewer_name)
            .url(format!(
                "{}/products/{}/reviews#review-{}",
                self.config.base_url.trim_end_matches('/'),
                self.config.product_id,
                review.id
            ))
            .created_at(review.created_at.unwrap_or(now))
            .retrieved_at(now)
            .metadata(metadata)
            .build();
        built.title = Some(review.headline).filter(|h| !h.is_empty());
        built.rating = review.stars.map(|s| s.clamp(1.0, 5.0));
        Some(built)
    }
}

#[async_trait]
impl SourceAdapter for G2Source {
    fn name(&self) -> &str {
        "g2"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn scrape(&self, ctx: &ScrapeContext) -> Result<Vec<Review>, SourceFailure> {
        if self.config.product_id.is_empty() {
            return Err(SourceError::Config("g2 product_id is not set".into()).into());
        }

        let mut reviews = Vec::new();
        for page in 1..=self.max_pages() {
            match self.fetch_page(ctx, page).await {
                Ok((found, has_more)) => {
                    debug!(source = "g2", page, count = found.len(), "Fetched page");
                    reviews.extend(found);
                    if !has_more {
                        break;
                    }
                }
                Err(e) => return Err(SourceFailure::new(reviews, e)),
            }
        }

        info!(source = "g2", count = reviews.len(), "Scrape complete");
        Ok(reviews)
    }
}
