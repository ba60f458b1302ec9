use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use reviewsignal_common::config::{ProxyConfig, RateLimitConfig, TrustpilotConfig};
use reviewsignal_common::Review;

use super::http::{browser_headers, build_client, fetch_text, Pacer};
use super::{ScrapeContext, SourceAdapter, SourceError, SourceFailure};

static REVIEW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("article.review").expect("valid selector"));
static STARS_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.star-rating img[alt]").expect("valid selector"));
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2.review-content__title").expect("valid selector"));
static TEXT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p.review-content__text").expect("valid selector"));
static AUTHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.consumer-information__name").expect("valid selector"));
static DATES_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.review-content-header__dates").expect("valid selector"));
static REPLY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.brand-reply").expect("valid selector"));
static NEXT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.pagination-link--next").expect("valid selector"));

static RATING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d)").expect("valid regex"));

const DATE_FORMATS: &[&str] = &["%b %d, %Y", "%B %d, %Y", "%d %b %Y", "%Y-%m-%d"];

/// Paginated HTML review pages for one business.
pub struct TrustpilotSource {
    config: TrustpilotConfig,
    client: reqwest::Client,
    pacer: Pacer,
}

/// One parsed listing page.
#[derive(Debug)]
pub struct ParsedPage {
    pub reviews: Vec<Review>,
    pub has_next: bool,
}

impl TrustpilotSource {
    pub fn new(
        config: TrustpilotConfig,
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

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn page_url(&self, page: u32) -> String {
        format!(
            "{}/review/{}?page={}",
            self.base_url(),
            urlencoding::encode(&self.config.business_id),
            page
        )
    }

    /// Parse one listing page. Pure: no I/O, `now` supplied by the caller.
    pub fn parse_page(&self, html: &str, page: u32, now: DateTime<Utc>) -> ParsedPage {
        let doc = Html::parse_document(html);
        let business = self.config.business_id.as_str();

        let reviews = doc
            .select(&REVIEW_SEL)
            .enumerate()
            .filter_map(|(i, article)| {
                let content = text_of(article, &TEXT_SEL);
                if content.is_empty() {
                    return None;
                }
                let source_id = article
                    .value()
                    .attr("id")
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{business}-{page}-{i}"));

                // Undated reviews age one day per position so ordering stays stable.
                let created_at = parse_review_date(&text_of(article, &DATES_SEL)).unwrap_or_else(
                    || now - Duration::days(i64::from(page.saturating_sub(1)) * 10 + i as i64),
                );

                let reply = text_of(article, &REPLY_SEL);
                let mut metadata = BTreeMap::new();
                metadata.insert("business_id".to_string(), business.into());
                metadata.insert("has_vendor_response".to_string(), (!reply.is_empty()).into());
                if !reply.is_empty() {
                    metadata.insert("vendor_response".to_string(), reply.into());
                }

                let mut review = Review::builder()
                    .id(format!("trustpilot-{source_id}"))
                    .source("trustpilot")
                    .source_id(source_id.clone())
                    .content(content)
                    .author(text_of(article, &AUTHOR_SEL))
                    .url(format!("{}/reviews/{}#{}", self.base_url(), business, source_id))
                    .created_at(created_at)
                    .retrieved_at(now)
                    .metadata(metadata)
                    .build();
                review.title = Some(text_of(article, &TITLE_SEL)).filter(|t| !t.is_empty());
                review.rating = star_rating(article);
                Some(review)
            })
            .collect();

        ParsedPage {
            reviews,
            has_next: doc.select(&NEXT_SEL).next().is_some(),
        }
    }
}

fn text_of(element: ElementRef<'_>, selector: &Selector) -> String {
    element
        .select(selector)
        .next()
        .map(|e| {
            e.text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

fn star_rating(article: ElementRef<'_>) -> Option<f64> {
    let img = article.select(&STARS_SEL).next()?;
    let alt = img.value().attr("alt")?;
    let digit: f64 = RATING_RE.captures(alt)?.get(1)?.as_str().parse().ok()?;
    (1.0..=5.0).contains(&digit).then_some(digit)
}

/// Accepts the date layouts the site has used; `None` when none match.
pub fn parse_review_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(raw, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    })
}

#[async_trait]
impl SourceAdapter for TrustpilotSource {
    fn name(&self) -> &str {
        "trustpilot"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn scrape(&self, ctx: &ScrapeContext) -> Result<Vec<Review>, SourceFailure> {
        if self.config.business_id.is_empty() {
            return Err(SourceError::Config("trustpilot business_id is not set".into()).into());
        }

        let mut reviews = Vec::new();
        for page in 1..=self.max_pages() {
            if let Err(e) = self.pacer.wait(ctx).await {
                return Err(SourceFailure::new(reviews, e));
            }
            let request = self
                .client
                .get(self.page_url(page))
                .headers(browser_headers(self.pacer.user_agent()));
            let html = match fetch_text(ctx, request).await {
                Ok(html) => html,
                Err(e) => return Err(SourceFailure::new(reviews, e)),
            };

            let parsed = self.parse_page(&html, page, Utc::now());
            debug!(source = "trustpilot", page, count = parsed.reviews.len(), "Parsed page");
            reviews.extend(parsed.reviews);
            if !parsed.has_next {
                break;
            }
        }

        info!(source = "trustpilot", count = reviews.len(), "Scrape complete");
        Ok(reviews)
    }
}
