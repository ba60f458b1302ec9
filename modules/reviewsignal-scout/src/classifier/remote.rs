//! Chat-completion backed classification (OpenAI or Azure OpenAI).

use std::fmt::Write as _;

use ai_client::{strip_code_blocks, truncate_to_char_boundary, AiError, ChatClient, Provider};
use async_trait::async_trait;
use tracing::debug;

use reviewsignal_common::config::{AnalyzerConfig, AnalyzerMode};
use reviewsignal_common::{IntentCategory, RawAnalysis, Review};

use super::{ClassificationStrategy, ClassifyError};

const MAX_CONTENT_BYTES: usize = 8_000;

const SYSTEM_PROMPT: &str = "You analyze customer feedback about network infrastructure \
products (DNS, DHCP, IPAM). Reply with a single JSON object matching the schema you are \
given. Do not add commentary.";

pub struct RemoteStrategy {
    client: ChatClient,
    name: &'static str,
}

impl RemoteStrategy {
    pub fn new(client: ChatClient) -> Self {
        let name = client.provider().name();
        Self { client, name }
    }

    pub fn from_config(config: &AnalyzerConfig) -> Result<Self, ClassifyError> {
        let provider = match config.mode() {
            AnalyzerMode::AzureOpenAi => {
                if config.azure_deployment.is_empty() {
                    return Err(AiError::Config("azure_deployment is not set".into()).into());
                }
                Provider::Azure {
                    endpoint: config.model_endpoint.clone(),
                    deployment: config.azure_deployment.clone(),
                    api_version: config.azure_api_version.clone(),
                }
            }
            _ => Provider::OpenAi {
                base_url: config.model_endpoint.clone(),
                model: config.model.clone(),
            },
        };
        let client = ChatClient::new(config.api_key.clone(), provider)?.with_max_tokens(config.max_tokens);
        Ok(Self::new(client))
    }
}

/// User prompt: the review plus the reply schema.
pub fn build_prompt(review: &Review) -> String {
    let schema = schemars::schema_for!(RawAnalysis);
    let schema_json = serde_json::to_string_pretty(&schema).unwrap_or_default();
    let categories = IntentCategory::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut prompt = String::new();
    let _ = writeln!(prompt, "Analyze this review.");
    let _ = writeln!(prompt);
    if let Some(title) = &review.title {
        let _ = writeln!(prompt, "Title: {title}");
    }
    let _ = writeln!(
        prompt,
        "Content: {}",
        truncate_to_char_boundary(&review.content, MAX_CONTENT_BYTES)
    );
    match review.rating {
        Some(r) => {
            let _ = writeln!(prompt, "Rating: {r}/5");
        }
        None => {
            let _ = writeln!(prompt, "Rating: none");
        }
    }
    if let Some(tags) = review.metadata.get("hashtags").and_then(|v| v.as_array()) {
        let tags: Vec<&str> = tags.iter().filter_map(|t| t.as_str()).collect();
        if !tags.is_empty() {
            let _ = writeln!(prompt, "Tags: {}", tags.join(", "));
        }
    }
    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "sentimentScore is -1 (very negative) to 1 (very positive). confidence is 0 to 1. \
intentCategory is one of: {categories}. entities lists product names with their type and \
character position."
    );
    let _ = writeln!(prompt);
    let _ = write!(prompt, "JSON schema:\n{schema_json}");
    prompt
}

/// Parse a model reply into a checked analysis.
pub fn parse_reply(reply: &str) -> Result<RawAnalysis, ClassifyError> {
    let json = strip_code_blocks(reply);
    let raw: RawAnalysis = serde_json::from_str(json)
        .map_err(|e| ClassifyError::MalformedReply(format!("{e}: {}", truncate_to_char_boundary(json, 200))))?;
    raw.validate().map_err(ClassifyError::MalformedReply)?;
    Ok(raw)
}

#[async_trait]
impl ClassificationStrategy for RemoteStrategy {
    fn name(&self) -> &str {
        self.name
    }

    async fn classify(&self, review: &Review) -> Result<RawAnalysis, ClassifyError> {
        let reply = self
            .client
            .chat_completion(SYSTEM_PROMPT, &build_prompt(review))
            .await?;
        debug!(review_id = review.id.as_str(), strategy = self.name, "Model replied");
        parse_reply(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_reply_is_accepted() {
        let reply = "```json\n{\"sentimentScore\": -0.8, \"intentCategory\": \"security\", \"confidence\": 0.9, \"keywords\": [\"breach\"]}\n```";
        let raw = parse_reply(reply).unwrap();
        assert_eq!(raw.intent_category, IntentCategory::Security);
        assert!(raw.keywords.contains("breach"));
        assert!(raw.entities.is_empty());
    }

    #[test]
    fn unknown_category_is_malformed() {
        let reply = r#"{"sentimentScore": 0.1, "intentCategory": "kudos", "confidence": 0.4}"#;
        assert!(matches!(parse_reply(reply), Err(ClassifyError::MalformedReply(_))));
    }

    #[test]
    fn prose_reply_is_malformed() {
        assert!(matches!(
            parse_reply("I think this review is negative."),
            Err(ClassifyError::MalformedReply(_))
        ));
    }

    #[test]
    fn prompt_carries_review_fields_and_schema() {
        let mut review = Review::builder()
            .id("twitter-5")
            .source("twitter")
            .source_id("5")
            .content("grid manager is down")
            .title("Outage")
            .rating(2.0)
            .build();
        review
            .metadata
            .insert("hashtags".to_string(), serde_json::json!(["nios", "outage"]));

        let prompt = build_prompt(&review);
        assert!(prompt.contains("Title: Outage"));
        assert!(prompt.contains("Content: grid manager is down"));
        assert!(prompt.contains("Rating: 2/5"));
        assert!(prompt.contains("Tags: nios, outage"));
        assert!(prompt.contains("\"sentimentScore\""));
        assert!(prompt.contains("ui_ux"));
    }
}
