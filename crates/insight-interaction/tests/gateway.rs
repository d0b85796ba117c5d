//! Gateway retry and fallback behavior against scripted providers.

use async_trait::async_trait;
use insight_core::config::{ProviderConfig, ProvidersConfig};
use insight_core::llm::{
    CompletionRequest, GatewayError, LlmProvider, LlmTask, ProviderError, ProviderKind,
};
use insight_core::trace::{TraceKind, TraceRecorder};
use insight_interaction::{BackoffPolicy, LlmGateway};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Reply {
    Text(&'static str),
    Fail(ProviderError),
    Hang,
}

struct ScriptedProvider {
    kind: ProviderKind,
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<u32>,
}

impl ScriptedProvider {
    fn new(kind: ProviderKind, replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn complete(
        &self,
        _request: &CompletionRequest,
        _config: &ProviderConfig,
    ) -> Result<String, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Text(text)) => Ok(text.to_string()),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok("too late".to_string())
            }
            None => Err(ProviderError::Transport("script exhausted".into())),
        }
    }
}

fn configs(retries: u32) -> ProvidersConfig {
    let mut configs = ProvidersConfig::default();
    for kind in [ProviderKind::Gemini, ProviderKind::Groq] {
        let config = configs.get_mut(kind);
        config.api_key = "test-key".into();
        config.max_retries = retries;
        config.timeout_ms = 50;
    }
    configs
}

fn gateway(
    configs: ProvidersConfig,
    groq: &Arc<ScriptedProvider>,
    gemini: &Arc<ScriptedProvider>,
) -> LlmGateway {
    LlmGateway::new(configs, BackoffPolicy::none())
        .with_provider(groq.clone())
        .with_provider(gemini.clone())
}

fn request() -> CompletionRequest {
    CompletionRequest::new(LlmTask::GenerateQuery, "system", "How many rows?")
}

fn api_error(status: u16, retryable: bool) -> ProviderError {
    ProviderError::Api {
        status: Some(status),
        message: "error".into(),
        retryable,
    }
}

#[tokio::test]
async fn test_primary_success_records_prompt_and_response() {
    let groq = ScriptedProvider::new(ProviderKind::Groq, vec![Reply::Text("SELECT 1")]);
    let gemini = ScriptedProvider::new(ProviderKind::Gemini, vec![]);
    let gateway = gateway(configs(2), &groq, &gemini);
    let mut trace = TraceRecorder::new();

    let text = gateway
        .complete(&request(), Some(ProviderKind::Groq), &mut trace)
        .await
        .unwrap();

    assert_eq!(text, "SELECT 1");
    assert_eq!(groq.calls(), 1);
    assert_eq!(gemini.calls(), 0);
    let steps = trace.into_steps();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].kind, TraceKind::Prompt);
    assert!(steps[0].prompt.as_deref().unwrap().contains("How many rows?"));
    assert_eq!(steps[1].kind, TraceKind::Response);
    assert_eq!(steps[1].response.as_deref(), Some("SELECT 1"));
}

#[tokio::test]
async fn test_retries_then_succeeds_on_same_provider() {
    let groq = ScriptedProvider::new(
        ProviderKind::Groq,
        vec![
            Reply::Fail(api_error(503, true)),
            Reply::Fail(ProviderError::Transport("reset".into())),
            Reply::Text("ok"),
        ],
    );
    let gemini = ScriptedProvider::new(ProviderKind::Gemini, vec![]);
    let gateway = gateway(configs(2), &groq, &gemini);
    let mut trace = TraceRecorder::new();

    let text = gateway.complete(&request(), None, &mut trace).await.unwrap();

    assert_eq!(text, "ok");
    assert_eq!(groq.calls(), 3);
    assert_eq!(gemini.calls(), 0);
    assert_eq!(trace.count(TraceKind::Prompt), 3);
    assert_eq!(trace.count(TraceKind::Response), 3);
}

#[tokio::test]
async fn test_falls_back_after_primary_exhausted() {
    let groq = ScriptedProvider::new(
        ProviderKind::Groq,
        vec![
            Reply::Fail(api_error(500, true)),
            Reply::Fail(api_error(500, true)),
        ],
    );
    let gemini = ScriptedProvider::new(ProviderKind::Gemini, vec![Reply::Text("from gemini")]);
    let gateway = gateway(configs(1), &groq, &gemini);
    let mut trace = TraceRecorder::new();

    let text = gateway
        .complete(&request(), Some(ProviderKind::Groq), &mut trace)
        .await
        .unwrap();

    assert_eq!(text, "from gemini");
    assert_eq!(groq.calls(), 2);
    assert_eq!(gemini.calls(), 1);
    assert!(trace.into_steps()[4].text.contains("gemini"));
}

#[tokio::test]
async fn test_preferred_provider_is_tried_first() {
    let groq = ScriptedProvider::new(ProviderKind::Groq, vec![Reply::Text("groq")]);
    let gemini = ScriptedProvider::new(ProviderKind::Gemini, vec![Reply::Text("gemini")]);
    let gateway = gateway(configs(0), &groq, &gemini);
    let mut trace = TraceRecorder::new();

    let text = gateway
        .complete(&request(), Some(ProviderKind::Gemini), &mut trace)
        .await
        .unwrap();

    assert_eq!(text, "gemini");
    assert_eq!(groq.calls(), 0);
}

#[tokio::test]
async fn test_non_retryable_error_skips_remaining_retries() {
    let groq = ScriptedProvider::new(ProviderKind::Groq, vec![Reply::Fail(api_error(401, false))]);
    let gemini = ScriptedProvider::new(ProviderKind::Gemini, vec![Reply::Text("fallback")]);
    let gateway = gateway(configs(3), &groq, &gemini);
    let mut trace = TraceRecorder::new();

    let text = gateway
        .complete(&request(), Some(ProviderKind::Groq), &mut trace)
        .await
        .unwrap();

    assert_eq!(text, "fallback");
    assert_eq!(groq.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_all_timeouts_map_to_timeout() {
    let groq = ScriptedProvider::new(ProviderKind::Groq, vec![Reply::Hang, Reply::Hang]);
    let gemini = ScriptedProvider::new(ProviderKind::Gemini, vec![Reply::Hang, Reply::Hang]);
    let gateway = gateway(configs(1), &groq, &gemini);
    let mut trace = TraceRecorder::new();

    let err = gateway
        .complete(&request(), None, &mut trace)
        .await
        .unwrap_err();

    assert_eq!(err, GatewayError::Timeout { attempts: 4 });
    assert_eq!(trace.count(TraceKind::Prompt), 4);
    assert_eq!(trace.count(TraceKind::Response), 4);
}

#[tokio::test]
async fn test_all_rate_limited_maps_to_rate_limited() {
    let limited = || {
        Reply::Fail(ProviderError::RateLimited {
            message: "slow down".into(),
            retry_after_ms: Some(2_000),
        })
    };
    let groq = ScriptedProvider::new(ProviderKind::Groq, vec![limited(), limited()]);
    let gemini = ScriptedProvider::new(ProviderKind::Gemini, vec![limited(), limited()]);
    let gateway = gateway(configs(1), &groq, &gemini);
    let mut trace = TraceRecorder::new();

    let err = gateway
        .complete(&request(), None, &mut trace)
        .await
        .unwrap_err();

    assert_eq!(err, GatewayError::RateLimited { attempts: 4 });
}

#[tokio::test]
async fn test_missing_credentials_treated_as_unavailable() {
    let mut groq_without_key = configs(0);
    groq_without_key.groq.api_key.clear();
    let groq = ScriptedProvider::new(ProviderKind::Groq, vec![Reply::Text("never")]);
    let gemini = ScriptedProvider::new(ProviderKind::Gemini, vec![Reply::Text("gemini")]);
    let gateway = gateway(groq_without_key, &groq, &gemini);
    let mut trace = TraceRecorder::new();

    assert!(!gateway.is_available(ProviderKind::Groq));
    let text = gateway
        .complete(&request(), Some(ProviderKind::Groq), &mut trace)
        .await
        .unwrap();
    assert_eq!(text, "gemini");
    assert_eq!(groq.calls(), 0);

    let mut none = configs(0);
    none.groq.api_key.clear();
    none.gemini.api_key.clear();
    let gateway = LlmGateway::new(none, BackoffPolicy::none()).with_provider(groq.clone());
    let err = gateway
        .complete(&request(), None, &mut TraceRecorder::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ProviderUnavailable { .. }));
}

#[tokio::test]
async fn test_empty_reply_is_retried() {
    let groq = ScriptedProvider::new(ProviderKind::Groq, vec![Reply::Text("   "), Reply::Text("SELECT 2")]);
    let gemini = ScriptedProvider::new(ProviderKind::Gemini, vec![]);
    let gateway = gateway(configs(1), &groq, &gemini);

    let text = gateway
        .complete(&request(), None, &mut TraceRecorder::new())
        .await
        .unwrap();
    assert_eq!(text, "SELECT 2");
}

#[derive(Debug, Deserialize)]
struct Plan {
    steps: Vec<String>,
}

#[tokio::test]
async fn test_complete_json_parses_or_reports_invalid_response() {
    let groq = ScriptedProvider::new(
        ProviderKind::Groq,
        vec![
            Reply::Text("```json\n{\"steps\": [\"count rows\"]}\n```"),
            Reply::Text("not json at all"),
        ],
    );
    let gemini = ScriptedProvider::new(ProviderKind::Gemini, vec![]);
    let gateway = gateway(configs(0), &groq, &gemini);
    let mut trace = TraceRecorder::new();

    let plan: Plan = gateway
        .complete_json(&request(), None, &mut trace)
        .await
        .unwrap();
    assert_eq!(plan.steps, vec!["count rows"]);

    let err = gateway
        .complete_json::<Plan>(&request(), None, &mut trace)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidResponse { .. }));
}
