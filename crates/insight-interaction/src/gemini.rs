//! GeminiProvider - direct REST implementation of the Gemini generateContent API.

use crate::http::{map_http_error, map_transport_error, parse_retry_after};
use async_trait::async_trait;
use insight_core::config::ProviderConfig;
use insight_core::llm::{CompletionRequest, LlmProvider, ProviderError, ProviderKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Provider that talks to the Gemini HTTP API.
#[derive(Clone, Default)]
pub struct GeminiProvider {
    client: Client,
}

impl GeminiProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn endpoint(config: &ProviderConfig) -> String {
        let base = config
            .base_url
            .as_deref()
            .unwrap_or(GEMINI_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/models/{}:generateContent", config.model)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        config: &ProviderConfig,
    ) -> Result<String, ProviderError> {
        if !config.has_credentials() {
            return Err(ProviderError::MissingCredentials);
        }

        let body = build_request(request, config.temperature);
        let response = self
            .client
            .post(Self::endpoint(config))
            .query(&[("key", config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|err| map_transport_error("gemini", err))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(map_http_error("gemini", status, body_text, retry_after));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|err| {
            ProviderError::Transport(format!("Failed to parse Gemini response: {err}"))
        })?;

        extract_text_response(parsed)
    }
}

fn build_request(request: &CompletionRequest, temperature: f32) -> GenerateContentRequest {
    let system_instruction = (!request.system.trim().is_empty()).then(|| Content {
        role: None,
        parts: vec![Part {
            text: request.system.clone(),
        }],
    });

    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: request.prompt.clone(),
            }],
        }],
        system_instruction,
        generation_config: GenerationConfig { temperature },
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: Option<String>,
}

fn extract_text_response(response: GenerateContentResponse) -> Result<String, ProviderError> {
    let text: String = response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse(
            "Gemini API returned no text in the response candidates".into(),
        ));
    }
    Ok(text)
}
