//! Client for the OpenAI-compatible chat completion API (OpenRouter by default).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::CompletionConfig;
use crate::error::UpstreamError;

const TOP_P: f64 = 0.9;
const FREQUENCY_PENALTY: f64 = 0.1;
const PRESENCE_PENALTY: f64 = 0.1;

/// Instruction sent ahead of every user message.
pub const SYSTEM_PROMPT: &str = "You are VaaniAI, a helpful AI assistant that responds in Hindi (Devanagari script).

CRITICAL RULES:
1. ALWAYS respond in Hindi (Devanagari script), even when the user writes in Hinglish or English.
2. Never translate the user's text. Preserve their intent and answer it in Hindi.
3. Be helpful, friendly and conversational. Use emojis where they fit.
4. Keep responses concise but informative; explain technical topics in simple Hindi.
5. Always maintain a respectful and professional tone.";

/// Per-request settings, read from the admin configuration on every send.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub api_key: String,
    pub model: String,
    pub max_tokens: i64,
    pub temperature: f64,
}

/// An image attached to a user message: either a URL or a data URI.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub url: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(&self, params: &CompletionParams, text: &str) -> Result<String, UpstreamError>;

    async fn complete_with_image(
        &self,
        params: &CompletionParams,
        text: &str,
        image: &ImagePayload,
    ) -> Result<String, UpstreamError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: i64,
    temperature: f64,
    top_p: f64,
    frequency_penalty: f64,
    presence_penalty: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Content<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Content<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenRouterClient {
    client: Client,
    chat_url: String,
    referer: String,
    app_title: String,
}

impl OpenRouterClient {
    pub fn new(config: &CompletionConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| UpstreamError::RequestFailed(e.to_string()))?;

        let base_url = config.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            chat_url: format!("{}/chat/completions", base_url),
            referer: config.referer.clone(),
            app_title: config.app_title.clone(),
        })
    }

    async fn send(&self, params: &CompletionParams, user_content: Content<'_>) -> Result<String, UpstreamError> {
        let body = ChatRequest {
            model: &params.model,
            messages: vec![
                ChatMessage { role: "system", content: Content::Text(SYSTEM_PROMPT) },
                ChatMessage { role: "user", content: user_content },
            ],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: TOP_P,
            frequency_penalty: FREQUENCY_PENALTY,
            presence_penalty: PRESENCE_PENALTY,
        };

        debug!("Sending completion request to {} with model {}", self.chat_url, params.model);

        let response = self.client
            .post(&self.chat_url)
            .bearer_auth(&params.api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.app_title)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Completion API returned {}: {}", status, text);
            return Err(UpstreamError::Status(status.as_u16(), text));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::MalformedResponse(e.to_string())
            }
        })?;

        extract_reply(parsed)
    }
}

#[async_trait]
impl CompletionApi for OpenRouterClient {
    async fn complete(&self, params: &CompletionParams, text: &str) -> Result<String, UpstreamError> {
        self.send(params, Content::Text(text)).await
    }

    async fn complete_with_image(
        &self,
        params: &CompletionParams,
        text: &str,
        image: &ImagePayload,
    ) -> Result<String, UpstreamError> {
        let parts = vec![
            ContentPart::Text { text },
            ContentPart::ImageUrl { image_url: ImageUrl { url: &image.url } },
        ];
        self.send(params, Content::Parts(parts)).await
    }
}

fn map_transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::RequestFailed(err.to_string())
    }
}

fn extract_reply(response: ChatResponse) -> Result<String, UpstreamError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();

    if content.is_empty() {
        return Err(UpstreamError::MalformedResponse("no message content in choices".into()));
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_reply_trims_content() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"  नमस्ते!  "}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_reply(response).unwrap(), "नमस्ते!");
    }

    #[test]
    fn test_extract_reply_rejects_missing_choices() {
        let response: ChatResponse = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(matches!(extract_reply(response), Err(UpstreamError::MalformedResponse(_))));

        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"   "}}]}"#).unwrap();
        assert!(matches!(extract_reply(response), Err(UpstreamError::MalformedResponse(_))));
    }

    #[test]
    fn test_image_request_uses_content_parts() {
        let content = Content::Parts(vec![
            ContentPart::Text { text: "यह क्या है?" },
            ContentPart::ImageUrl { image_url: ImageUrl { url: "data:image/png;base64,AAAA" } },
        ]);
        let json = serde_json::to_value(ChatMessage { role: "user", content }).unwrap();

        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }
}
