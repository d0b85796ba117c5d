//! Language-model contracts.
//!
//! The gateway in `insight-interaction` drives any number of [`LlmProvider`]
//! implementations; the orchestrator only ever sees [`GatewayError`].

use crate::config::ProviderConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// The two interchangeable language-model backends.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    Gemini,
    Groq,
}

impl ProviderKind {
    /// The provider used when this one is exhausted.
    pub fn alternate(self) -> Self {
        match self {
            ProviderKind::Gemini => ProviderKind::Groq,
            ProviderKind::Groq => ProviderKind::Gemini,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.5-flash",
            ProviderKind::Groq => "llama-3.3-70b-versatile",
        }
    }

    /// Environment variable consulted when the config carries no API key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Groq => "GROQ_API_KEY",
        }
    }
}

/// What a completion is for. Used for trace labels and by test doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LlmTask {
    #[strum(to_string = "Query analysis")]
    Analyze,
    #[strum(to_string = "Query generation")]
    GenerateQuery,
    #[strum(to_string = "Query repair")]
    RepairQuery,
    #[strum(to_string = "Visualization code generation")]
    ChartCode,
    #[strum(to_string = "Visualization code repair")]
    RepairChart,
    #[strum(to_string = "Answer composition")]
    Answer,
}

/// A single prompt sent to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub task: LlmTask,
    pub system: String,
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(task: LlmTask, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            task,
            system: system.into(),
            prompt: prompt.into(),
        }
    }

    /// Full text as sent, kept in the trace for auditability.
    pub fn transcript(&self) -> String {
        if self.system.is_empty() {
            self.prompt.clone()
        } else {
            format!("[system]\n{}\n\n[user]\n{}", self.system, self.prompt)
        }
    }
}

/// Failure of one provider call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned {}: {message}", status.map(|s| s.to_string()).unwrap_or_else(|| "an error".to_string()))]
    Api {
        status: Option<u16>,
        message: String,
        retryable: bool,
    },
    #[error("empty response: {0}")]
    EmptyResponse(String),
    #[error("no API key configured")]
    MissingCredentials,
}

impl ProviderError {
    /// Whether another attempt against the same provider may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout
            | ProviderError::RateLimited { .. }
            | ProviderError::Transport(_)
            | ProviderError::EmptyResponse(_) => true,
            ProviderError::Api { retryable, .. } => *retryable,
            ProviderError::MissingCredentials => false,
        }
    }
}

/// Failure reported by the gateway after retries and fallback.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayError {
    #[error("language model timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error("language model rate limited after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },
    #[error("language model returned an invalid response: {message}")]
    InvalidResponse { message: String },
    #[error("no language model provider available: {message}")]
    ProviderUnavailable { message: String },
}

impl GatewayError {
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

/// One language-model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Sends one request. Timeouts are enforced by the caller.
    async fn complete(
        &self,
        request: &CompletionRequest,
        config: &ProviderConfig,
    ) -> Result<String, ProviderError>;
}
