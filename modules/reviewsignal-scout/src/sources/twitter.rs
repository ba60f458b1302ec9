use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{info, warn};

use reviewsignal_common::config::{ProxyConfig, RateLimitConfig, TwitterConfig};
use reviewsignal_common::Review;

use super::http::{build_client, fetch_text, Pacer};
use super::oauth::{self, OAuthCredentials};
use super::{ScrapeContext, SourceAdapter, SourceError, SourceFailure};

const SEARCH_PATH: &str = "/1.1/search/tweets.json";
const TWEET_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    statuses: Vec<Tweet>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id_str: String,
    #[serde(default)]
    full_text: Option<String>,
    #[serde(default)]
    text: Option<String>,
    created_at: String,
    user: TweetUser,
    #[serde(default)]
    favorite_count: u64,
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    in_reply_to_status_id_str: Option<String>,
    #[serde(default)]
    entities: TweetEntities,
}

#[derive(Debug, Deserialize)]
struct TweetUser {
    screen_name: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct TweetEntities {
    #[serde(default)]
    hashtags: Vec<Hashtag>,
}

#[derive(Debug, Deserialize)]
struct Hashtag {
    text: String,
}

// --- Adapter ---

/// Keyword search over the v1.1 search API, one request per keyword.
pub struct TwitterSource {
    config: TwitterConfig,
    credentials: OAuthCredentials,
    client: reqwest::Client,
    pacer: Pacer,
}

impl TwitterSource {
    pub fn new(
        config: TwitterConfig,
        rate_limits: &RateLimitConfig,
        proxy: &ProxyConfig,
    ) -> Result<Self, SourceError> {
        let credentials = OAuthCredentials {
            consumer_key: config.api_key.clone(),
            consumer_secret: config.api_secret.clone(),
            token: config.access_token.clone(),
            token_secret: config.access_secret.clone(),
        };
        Ok(Self {
            client: build_client(proxy)?,
            pacer: Pacer::new(rate_limits.clone()),
            credentials,
            config,
        })
    }

    /// Keyword plus `-word` for every exclusion.
    fn build_query(&self, keyword: &str) -> String {
        let mut query = keyword.to_string();
        for word in &self.config.exclude_words {
            query.push_str(" -");
            query.push_str(word);
        }
        query
    }

    async fn search(
        &self,
        ctx: &ScrapeContext,
        keyword: &str,
    ) -> Result<Vec<Review>, SourceError> {
        let base_url = format!("{}{}", self.config.base_url.trim_end_matches('/'), SEARCH_PATH);
        let query = self.build_query(keyword);
        let count = self.config.max_results.clamp(1, 100).to_string();
        let params: [(&str, &str); 5] = [
            ("q", query.as_str()),
            ("count", count.as_str()),
            ("tweet_mode", "extended"),
            ("result_type", "recent"),
            ("lang", "en"),
        ];

        let timestamp = Utc::now().timestamp().to_string();
        let auth = oauth::authorization_header(
            "GET",
            &base_url,
            &params,
            &self.credentials,
            &oauth::nonce(),
            &timestamp,
        )?;

        // The query string is encoded exactly as it was signed.
        let url = format!("{}?{}", base_url, oauth::encode_query(&params));
        self.pacer.wait(ctx).await?;
        let body = fetch_text(
            ctx,
            self.client
                .get(&url)
                .header(AUTHORIZATION, auth)
                .header(reqwest::header::USER_AGENT, self.pacer.user_agent()),
        )
        .await?;

        let response: SearchResponse = serde_json::from_str(&body)?;
        Ok(response
            .statuses
            .into_iter()
            .filter_map(|t| self.to_review(t, keyword))
            .collect())
    }

    fn is_excluded(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.config
            .exclude_words
            .iter()
            .any(|w| !w.is_empty() && lower.contains(&w.to_lowercase()))
    }

    fn to_review(&self, tweet: Tweet, keyword: &str) -> Option<Review> {
        let raw = tweet.full_text.or(tweet.text).unwrap_or_default();
        if self.is_excluded(&raw) {
            return None;
        }
        let content = URL_RE.replace_all(&raw, "").trim().to_string();
        if content.is_empty() {
            return None;
        }

        let now = Utc::now();
        let created_at = DateTime::parse_from_str(&tweet.created_at, TWEET_TIME_FORMAT)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);

        let mut metadata = BTreeMap::new();
        metadata.insert("keyword".to_string(), keyword.into());
        metadata.insert("likes".to_string(), tweet.favorite_count.into());
        metadata.insert("retweets".to_string(), tweet.retweet_count.into());
        metadata.insert(
            "hashtags".to_string(),
            tweet
                .entities
                .hashtags
                .iter()
                .map(|h| h.text.clone())
                .collect::<Vec<_>>()
                .into(),
        );
        metadata.insert(
            "is_reply".to_string(),
            tweet.in_reply_to_status_id_str.is_some().into(),
        );
        if !tweet.user.name.is_empty() {
            metadata.insert("display_name".to_string(), tweet.user.name.clone().into());
        }

        Some(
            Review::builder()
                .id(format!("twitter-{}", tweet.id_str))
                .source("twitter")
                .source_id(tweet.id_str.clone())
                .content(content)
                .author(tweet.user.screen_name.clone())
                .rating(engagement_rating(tweet.favorite_count, tweet.retweet_count))
                .url(format!(
                    "https://twitter.com/{}/status/{}",
                    tweet.user.screen_name, tweet.id_str
                ))
                .created_at(created_at)
                .retrieved_at(now)
                .metadata(metadata)
                .build(),
        )
    }
}

/// Pseudo-rating from engagement: every ten interactions cost one star,
/// bounded to the 1-5 scale.
pub fn engagement_rating(likes: u64, retweets: u64) -> f64 {
    let penalty = ((likes + retweets) / 10).min(4);
    (5 - penalty) as f64
}

#[async_trait]
impl SourceAdapter for TwitterSource {
    fn name(&self) -> &str {
        "twitter"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn scrape(&self, ctx: &ScrapeContext) -> Result<Vec<Review>, SourceFailure> {
        if !self.credentials.is_complete() {
            return Err(SourceError::Config("twitter credentials are incomplete".into()).into());
        }

        let mut reviews = Vec::new();
        let mut last_error = None;
        for keyword in &self.config.keywords {
            match self.search(ctx, keyword).await {
                Ok(found) => {
                    info!(source = "twitter", keyword = keyword.as_str(), count = found.len(), "Keyword search complete");
                    reviews.extend(found);
                }
                Err(SourceError::Cancelled) => {
                    return Err(SourceFailure::new(reviews, SourceError::Cancelled));
                }
                Err(e) => {
                    warn!(source = "twitter", keyword = keyword.as_str(), error = %e, "Keyword search failed");
                    last_error = Some(e);
                }
            }
        }

        // One bad keyword does not sink the others; all failing does.
        match last_error {
            Some(e) if reviews.is_empty() => Err(SourceFailure::new(reviews, e)),
            _ => Ok(reviews),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(exclude: &[&str]) -> TwitterSource {
        let config = TwitterConfig {
            enabled: true,
            exclude_words: exclude.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        TwitterSource::new(config, &RateLimitConfig::default(), &ProxyConfig::default()).unwrap()
    }

    fn tweet(text: &str, likes: u64, retweets: u64) -> Tweet {
        serde_json::from_value(serde_json::json!({
            "id_str": "1790",
            "full_text": text,
            "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            "user": { "screen_name": "netops_jane", "name": "Jane" },
            "favorite_count": likes,
            "retweet_count": retweets,
            "entities": { "hashtags": [ { "text": "dns" } ] }
        }))
        .unwrap()
    }

    #[test]
    fn engagement_rating_is_bounded() {
        assert_eq!(engagement_rating(0, 0), 5.0);
        assert_eq!(engagement_rating(9, 0), 5.0);
        assert_eq!(engagement_rating(6, 6), 4.0);
        assert_eq!(engagement_rating(1_000, 1_000), 1.0);
    }

    #[test]
    fn urls_are_stripped_and_fields_mapped() {
        let review = source(&[])
            .to_review(tweet("DNS down again https://t.co/abc", 25, 0), "dns")
            .unwrap();
        assert_eq!(review.id, "twitter-1790");
        assert_eq!(review.content, "DNS down again");
        assert_eq!(review.rating, Some(3.0));
        assert_eq!(review.url, "https://twitter.com/netops_jane/status/1790");
        assert_eq!(review.created_at.to_rfc3339(), "2018-10-10T20:19:24+00:00");
        assert_eq!(review.metadata["hashtags"], serde_json::json!(["dns"]));
    }

    #[test]
    fn excluded_words_drop_the_tweet() {
        let s = source(&["giveaway"]);
        assert!(s.to_review(tweet("DDI GIVEAWAY today", 0, 0), "ddi").is_none());
        assert_eq!(s.build_query("infoblox"), "infoblox -giveaway");
    }

    #[test]
    fn link_only_tweets_are_skipped() {
        assert!(source(&[])
            .to_review(tweet("https://t.co/xyz", 0, 0), "dns")
            .is_none());
    }
}
