//! LLM gateway: one request interface over the configured providers.
//!
//! A request goes to the preferred provider first and is retried there with
//! exponential backoff while the failure is retryable. The alternate provider
//! then gets the same treatment once before the gateway gives up.

use crate::gemini::GeminiProvider;
use crate::groq::GroqProvider;
use crate::response::parse_llm_json;
use anyhow::Context;
use insight_core::config::{GatewayConfig, ProviderConfig, ProvidersConfig, RootConfig};
use insight_core::llm::{CompletionRequest, GatewayError, LlmProvider, ProviderError, ProviderKind};
use insight_core::trace::TraceRecorder;
use rand::Rng;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Delay schedule between attempts against the same provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// No waiting between attempts.
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based), honoring a server hint.
    pub fn delay(&self, retry: u32, hint: Option<Duration>) -> Duration {
        if self.max.is_zero() {
            return Duration::ZERO;
        }
        let exponent = retry.saturating_sub(1).min(16);
        let scheduled = self.base.saturating_mul(1 << exponent).min(self.max);
        let jitter_ms = (scheduled.as_millis() / 4) as u64;
        let jittered = scheduled + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        hint.map_or(jittered, |h| h.max(jittered)).min(self.max)
    }
}

impl From<&GatewayConfig> for BackoffPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

/// Failures seen across all attempts of one request.
#[derive(Debug, Default)]
struct FailureTally {
    attempts: u32,
    timeouts: u32,
    rate_limited: u32,
    last: Option<String>,
}

impl FailureTally {
    fn record(&mut self, kind: ProviderKind, err: &ProviderError) {
        self.attempts += 1;
        match err {
            ProviderError::Timeout => self.timeouts += 1,
            ProviderError::RateLimited { .. } => self.rate_limited += 1,
            _ => {}
        }
        self.last = Some(format!("{kind}: {err}"));
    }

    fn into_error(self, skipped: Vec<String>) -> GatewayError {
        if self.attempts == 0 {
            let detail = if skipped.is_empty() {
                "no provider configured".to_string()
            } else {
                skipped.join("; ")
            };
            return GatewayError::ProviderUnavailable { message: detail };
        }
        if self.timeouts == self.attempts {
            return GatewayError::Timeout {
                attempts: self.attempts,
            };
        }
        if self.rate_limited == self.attempts {
            return GatewayError::RateLimited {
                attempts: self.attempts,
            };
        }
        GatewayError::ProviderUnavailable {
            message: self
                .last
                .unwrap_or_else(|| "all providers failed".to_string()),
        }
    }
}

pub struct LlmGateway {
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
    configs: ProvidersConfig,
    backoff: BackoffPolicy,
}

impl LlmGateway {
    pub fn new(configs: ProvidersConfig, backoff: BackoffPolicy) -> Self {
        Self {
            providers: HashMap::new(),
            configs,
            backoff,
        }
    }

    /// Registers a provider implementation, replacing one of the same kind.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Builds a gateway with the Gemini and Groq REST providers.
    pub fn from_config(config: &RootConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("insight/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(
            Self::new(config.providers.clone(), BackoffPolicy::from(&config.gateway))
                .with_provider(Arc::new(GeminiProvider::new(client.clone())))
                .with_provider(Arc::new(GroqProvider::new(client))),
        )
    }

    /// Whether a provider is registered and has credentials.
    pub fn is_available(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind) && self.configs.get(kind).has_credentials()
    }

    /// Sends `request`, starting with `preferred` (or the configured default).
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        preferred: Option<ProviderKind>,
        trace: &mut TraceRecorder,
    ) -> Result<String, GatewayError> {
        let primary = preferred.unwrap_or(self.configs.default);
        let mut tally = FailureTally::default();
        let mut skipped = Vec::new();

        for kind in [primary, primary.alternate()] {
            let config = self.configs.get(kind);
            let Some(provider) = self.providers.get(&kind) else {
                skipped.push(format!("{kind}: not registered"));
                continue;
            };
            if !config.has_credentials() {
                tracing::warn!(provider = %kind, "Skipping provider without API key");
                skipped.push(format!("{kind}: {}", ProviderError::MissingCredentials));
                continue;
            }
            if kind != primary {
                tracing::warn!(from = %primary, to = %kind, task = %request.task, "Falling back to alternate provider");
            }

            if let Some(text) = self
                .try_provider(provider.as_ref(), config, request, &mut tally, trace)
                .await
            {
                return Ok(text);
            }
        }

        let error = tally.into_error(skipped);
        tracing::warn!(task = %request.task, error = %error, "All providers failed");
        Err(error)
    }

    /// Sends `request` and parses the reply as JSON into `T`.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        request: &CompletionRequest,
        preferred: Option<ProviderKind>,
        trace: &mut TraceRecorder,
    ) -> Result<T, GatewayError> {
        let text = self.complete(request, preferred, trace).await?;
        parse_llm_json(&text).map_err(GatewayError::invalid_response)
    }

    async fn try_provider(
        &self,
        provider: &dyn LlmProvider,
        config: &ProviderConfig,
        request: &CompletionRequest,
        tally: &mut FailureTally,
        trace: &mut TraceRecorder,
    ) -> Option<String> {
        let kind = provider.kind();
        let mut retry_hint = None;

        for attempt in 0..=config.max_retries {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt, retry_hint);
                tracing::warn!(provider = %kind, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Retrying language model call");
                tokio::time::sleep(delay).await;
            }

            let label = format!(
                "{} via {kind} ({}), attempt {}",
                request.task,
                config.model,
                attempt + 1
            );
            let transcript = request.transcript();
            tracing::debug!(provider = %kind, prompt_chars = transcript.len(), "Sending prompt");
            trace.prompt(label.clone(), transcript);

            let outcome = tokio::time::timeout(config.timeout(), provider.complete(request, config))
                .await
                .unwrap_or(Err(ProviderError::Timeout))
                .and_then(|text| {
                    if text.trim().is_empty() {
                        Err(ProviderError::EmptyResponse(format!("{kind} returned an empty reply")))
                    } else {
                        Ok(text)
                    }
                });

            match outcome {
                Ok(text) => {
                    trace.response(format!("{label}: ok"), Some(text.clone()));
                    return Some(text);
                }
                Err(err) => {
                    trace.response(format!("{label}: failed: {err}"), None);
                    tally.record(kind, &err);
                    if !err.is_retryable() {
                        return None;
                    }
                    retry_hint = match &err {
                        ProviderError::RateLimited {
                            retry_after_ms: Some(ms),
                            ..
                        } => Some(Duration::from_millis(*ms)),
                        _ => None,
                    };
                }
            }
        }
        None
    }
}
