//! Remote classification against a stubbed chat-completion endpoint.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reviewsignal_common::config::AnalyzerConfig;
use reviewsignal_common::IntentCategory;
use reviewsignal_scout::classifier::{ClassifyError, Classifier};
use reviewsignal_scout::testing::review;

fn config(endpoint: &str) -> AnalyzerConfig {
    AnalyzerConfig {
        mode: "openai".to_string(),
        model_endpoint: endpoint.to_string(),
        api_key: "sk-test".to_string(),
        ..Default::default()
    }
}

fn reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}

#[tokio::test]
async fn fenced_json_reply_becomes_an_analysis() {
    let server = MockServer::start().await;
    let body = "```json\n{\"sentimentScore\": -0.8, \"intentCategory\": \"security\", \
\"confidence\": 0.9, \"keywords\": [\"cve\"]}\n```";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(reply(body))
        .expect(1)
        .mount(&server)
        .await;

    let classifier = Classifier::from_config(&config(&server.uri()));
    assert_eq!(classifier.strategy_name(), "openai");
    assert!(!classifier.is_local());

    let r = review("g2-1", "Unpatched CVE in the appliance for months");
    let analysis = classifier.classify(&r).await.unwrap();
    assert_eq!(analysis.review_id, "g2-1");
    assert_eq!(analysis.intent_category, IntentCategory::Security);
    assert!(analysis.is_negative);
    assert!(analysis.is_relevant);

    // Cached: the stub only allows one call.
    classifier.classify(&r).await.unwrap();
    assert_eq!(classifier.cache_size(), 1);
}

#[tokio::test]
async fn out_of_range_reply_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(reply(
            "{\"sentimentScore\": -3.0, \"intentCategory\": \"billing\", \"confidence\": 0.5}",
        ))
        .mount(&server)
        .await;

    let classifier = Classifier::from_config(&config(&server.uri()));
    let err = classifier
        .classify(&review("t-1", "charged twice"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClassifyError::MalformedReply(_)), "{err}");
    assert_eq!(classifier.cache_size(), 0);
}

#[tokio::test]
async fn endpoint_error_surfaces_as_model_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let classifier = Classifier::from_config(&config(&server.uri()));
    let r = review("t-2", "Constant crashes and terrible DHCP support");
    assert!(matches!(
        classifier.classify(&r).await.unwrap_err(),
        ClassifyError::Model(_)
    ));

    let fallback = classifier.classify_local(&r).unwrap();
    assert_eq!(fallback.review_id, "t-2");
    assert_eq!(classifier.cache_size(), 0);
}

#[tokio::test]
async fn remote_mode_without_key_degrades_to_local() {
    let classifier = Classifier::from_config(&AnalyzerConfig {
        mode: "openai".to_string(),
        ..Default::default()
    });
    assert!(classifier.is_local());
}

#[tokio::test]
async fn configured_token_budget_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "max_tokens": 256,
            "response_format": { "type": "json_object" }
        })))
        .respond_with(reply(
            "{\"sentimentScore\": 0.2, \"intentCategory\": \"feature_request\", \"confidence\": 0.6}",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let classifier = Classifier::from_config(&AnalyzerConfig {
        max_tokens: 256,
        ..config(&server.uri())
    });
    let analysis = classifier
        .classify(&review("g2-7", "Please add IPv6 reporting"))
        .await
        .unwrap();
    assert_eq!(analysis.intent_category, IntentCategory::FeatureRequest);
}
