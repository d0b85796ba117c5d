//! GroqProvider - OpenAI-compatible chat completions against Groq.

use crate::http::{map_http_error, map_transport_error, parse_retry_after};
use async_trait::async_trait;
use insight_core::config::ProviderConfig;
use insight_core::llm::{CompletionRequest, LlmProvider, ProviderError, ProviderKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const MAX_COMPLETION_TOKENS: u32 = 8192;

/// Provider that talks to the Groq HTTP API.
#[derive(Clone, Default)]
pub struct GroqProvider {
    client: Client,
}

impl GroqProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn endpoint(config: &ProviderConfig) -> String {
        let base = config
            .base_url
            .as_deref()
            .unwrap_or(GROQ_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmProvider for GroqProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Groq
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        config: &ProviderConfig,
    ) -> Result<String, ProviderError> {
        if !config.has_credentials() {
            return Err(ProviderError::MissingCredentials);
        }

        let body = build_request(request, config);
        let response = self
            .client
            .post(Self::endpoint(config))
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| map_transport_error("groq", err))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Groq error body".to_string());
            return Err(map_http_error("groq", status, body_text, retry_after));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|err| {
            ProviderError::Transport(format!("Failed to parse Groq response: {err}"))
        })?;

        extract_text_response(parsed)
    }
}

fn build_request(request: &CompletionRequest, config: &ProviderConfig) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(2);
    if !request.system.trim().is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: request.system.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: request.prompt.clone(),
    });

    ChatCompletionRequest {
        model: config.model.clone(),
        messages,
        temperature: config.temperature,
        max_tokens: MAX_COMPLETION_TOKENS,
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

fn extract_text_response(response: ChatCompletionResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| ProviderError::EmptyResponse("Groq API returned no message content".into()))
}
