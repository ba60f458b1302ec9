use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use super::types::*;
use crate::error::AiError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where chat-completion requests go and how they authenticate.
#[derive(Debug, Clone)]
pub enum Provider {
    /// `POST {base_url}/chat/completions` with a bearer token.
    OpenAi { base_url: String, model: String },
    /// `POST {endpoint}/openai/deployments/{deployment}/chat/completions`
    /// with an `api-key` header.
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi { .. } => "openai",
            Provider::Azure { .. } => "azure_openai",
        }
    }
}

#[derive(Clone)]
pub struct ChatClient {
    api_key: String,
    provider: Provider,
    http: reqwest::Client,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>, provider: Provider) -> Result<Self, AiError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AiError::Config(format!(
                "{} API key is not set",
                provider.name()
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AiError::Config(e.to_string()))?;
        Ok(Self {
            api_key,
            provider,
            http,
            max_tokens: Some(500),
            temperature: Some(0.0),
        })
    }

    /// Reply budget; defaults to 500.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    fn url(&self) -> String {
        match &self.provider {
            Provider::OpenAi { base_url, .. } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            Provider::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
        }
    }

    fn headers(&self) -> Result<HeaderMap, AiError> {
        let mut headers = HeaderMap::new();
        let invalid = |e: reqwest::header::InvalidHeaderValue| AiError::Config(e.to_string());
        match self.provider {
            Provider::OpenAi { .. } => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(invalid)?,
                );
            }
            Provider::Azure { .. } => {
                headers.insert(
                    HeaderName::from_static("api-key"),
                    HeaderValue::from_str(&self.api_key).map_err(invalid)?,
                );
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// One system + user exchange. Returns the first choice's text.
    pub async fn chat_completion(&self, system: &str, user: &str) -> Result<String, AiError> {
        let model = match &self.provider {
            Provider::OpenAi { model, .. } => Some(model.clone()),
            Provider::Azure { .. } => None,
        };
        let request = ChatRequest {
            model,
            messages: vec![WireMessage::system(system), WireMessage::user(user)],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: Some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        debug!(provider = self.provider.name(), "Chat completion request");

        let response = self
            .http
            .post(self.url())
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let chat: ChatResponse = serde_json::from_str(&body)?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(AiError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn openai_at(base_url: String) -> Provider {
        Provider::OpenAi {
            base_url,
            model: "gpt-4o-mini".to_string(),
        }
    }

    fn reply(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    #[tokio::test]
    async fn openai_sends_bearer_token_and_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("{\"ok\":true}")))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new("sk-test", openai_at(server.uri())).unwrap();
        let text = client.chat_completion("sys", "user").await.unwrap();
        assert_eq!(text, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn azure_uses_deployment_path_and_api_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/reviews/chat/completions"))
            .and(query_param("api-version", "2024-02-15-preview"))
            .and(header("api-key", "azure-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("hi")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Provider::Azure {
            endpoint: server.uri(),
            deployment: "reviews".to_string(),
            api_version: "2024-02-15-preview".to_string(),
        };
        let client = ChatClient::new("azure-key", provider).unwrap();
        assert_eq!(client.chat_completion("sys", "user").await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn non_success_status_is_an_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = ChatClient::new("k", openai_at(server.uri())).unwrap();
        match client.chat_completion("s", "u").await {
            Err(AiError::Api { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&server)
            .await;

        let client = ChatClient::new("k", openai_at(server.uri())).unwrap();
        assert!(matches!(
            client.chat_completion("s", "u").await,
            Err(AiError::EmptyResponse)
        ));
    }

    #[test]
    fn missing_key_is_a_config_error() {
        assert!(matches!(
            ChatClient::new("", openai_at("http://localhost".to_string())),
            Err(AiError::Config(_))
        ));
    }
}
