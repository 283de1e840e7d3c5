mod common;

use std::time::Duration;

use serde_json::json;
use vaani_server::error::UpstreamError;
use vaani_server::proxy::{CompletionApi, CompletionParams, ImagePayload, OpenRouterClient};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{completion_body, settings_for, TEST_API_KEY, TEST_MODEL};

fn params() -> CompletionParams {
    CompletionParams {
        api_key: TEST_API_KEY.into(),
        model: TEST_MODEL.into(),
        max_tokens: 500,
        temperature: 0.7,
    }
}

fn client_for(server: &MockServer) -> OpenRouterClient {
    OpenRouterClient::new(&settings_for(server).completion).unwrap()
}

#[tokio::test]
async fn test_sends_system_prompt_and_settings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-or-test-key"))
        .and(header("x-title", "VaaniAI Hindi Chatbot"))
        .and(body_partial_json(json!({
            "model": TEST_MODEL,
            "max_tokens": 500,
            "temperature": 0.7,
            "top_p": 0.9,
            "messages": [
                { "role": "system" },
                { "role": "user", "content": "What is Rust?" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("  रस्ट एक भाषा है।  ")))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client_for(&server).complete(&params(), "What is Rust?").await.unwrap();
    assert_eq!(reply, "रस्ट एक भाषा है।");
}

#[tokio::test]
async fn test_image_is_sent_as_content_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "system" },
                { "role": "user", "content": [
                    { "type": "text", "text": "इसमें क्या है?" },
                    { "type": "image_url", "image_url": { "url": "https://example.com/cat.png" } }
                ]}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("एक बिल्ली 🐱")))
        .expect(1)
        .mount(&server)
        .await;

    let image = ImagePayload { url: "https://example.com/cat.png".into() };
    let reply = client_for(&server)
        .complete_with_image(&params(), "इसमें क्या है?", &image)
        .await
        .unwrap();
    assert_eq!(reply, "एक बिल्ली 🐱");
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let err = client_for(&server).complete(&params(), "hi").await.unwrap_err();
    match err {
        UpstreamError::Status(code, body) => {
            assert_eq!(code, 429);
            assert_eq!(body, "rate limited");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let err = client_for(&server).complete(&params(), "hi").await.unwrap_err();
    assert!(matches!(err, UpstreamError::MalformedResponse(_)));

    server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client_for(&server).complete(&params(), "hi").await.unwrap_err();
    assert!(matches!(err, UpstreamError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("देर से"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut settings = settings_for(&server);
    settings.completion.timeout_secs = 1;
    let client = OpenRouterClient::new(&settings.completion).unwrap();

    let err = client.complete(&params(), "hi").await.unwrap_err();
    assert!(matches!(err, UpstreamError::Timeout));
}

#[tokio::test]
async fn test_unreachable_upstream_is_request_failure() {
    let mut settings = vaani_server::Settings::new_for_test().unwrap();
    settings.completion.base_url = "http://127.0.0.1:9".into();
    let client = OpenRouterClient::new(&settings.completion).unwrap();

    let err = client.complete(&params(), "hi").await.unwrap_err();
    assert!(matches!(err, UpstreamError::RequestFailed(_)));
}
