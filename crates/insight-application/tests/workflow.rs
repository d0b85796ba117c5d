//! End-to-end turns against scripted models, a scripted engine and a fake sandbox.

use async_trait::async_trait;
use insight_application::{Orchestrator, SessionUseCase};
use insight_core::config::{ProviderConfig, ProvidersConfig, WorkflowConfig};
use insight_core::llm::{
    CompletionRequest, GatewayError, LlmProvider, LlmTask, ProviderError, ProviderKind,
};
use insight_core::query::{QueryError, QueryExecutionAdapter, QueryLimits, Rows, TabularEngine};
use insight_core::sandbox::{
    DataBindings, ImageArtifact, SandboxDispatcher, SandboxError, SandboxErrorKind, SandboxLimits,
    SandboxRuntime,
};
use insight_core::schema::{ColumnDescriptor, SchemaContext, SchemaDescriptor};
use insight_core::session::{Session, SessionRepository, title_from_query};
use insight_core::trace::{TraceKind, TraceStep};
use insight_core::workflow::{StepStatus, WorkflowError};
use insight_core::InsightError;
use insight_infrastructure::InMemorySessionRepository;
use insight_interaction::{BackoffPolicy, LlmGateway};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Scripted language model
// ---------------------------------------------------------------------------

enum Reply {
    Text(String),
    Fail(ProviderError),
    Hang,
}

fn text(reply: &str) -> Reply {
    Reply::Text(reply.to_string())
}

struct ScriptedProvider {
    kind: ProviderKind,
    script: Mutex<HashMap<LlmTask, VecDeque<Reply>>>,
    calls: Mutex<Vec<LlmTask>>,
}

impl ScriptedProvider {
    fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn reply(self, task: LlmTask, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(task)
            .or_default()
            .push_back(reply);
        self
    }

    fn calls(&self) -> Vec<LlmTask> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _config: &ProviderConfig,
    ) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(request.task);
        let reply = self
            .script
            .lock()
            .unwrap()
            .get_mut(&request.task)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok("too late".to_string())
            }
            None => Err(ProviderError::Api {
                status: Some(400),
                message: format!("unscripted {}", request.task),
                retryable: false,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted engine and sandbox
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockEngine {
    results: Mutex<VecDeque<Result<Rows, QueryError>>>,
    executed: Mutex<Vec<String>>,
    /// Cancelled from inside the engine, then the call never returns.
    cancel_on_execute: Option<CancellationToken>,
    /// (started, release): signals entry and waits before answering.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl MockEngine {
    fn new(results: Vec<Result<Rows, QueryError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TabularEngine for MockEngine {
    async fn execute(&self, query: &str, _row_cap: usize) -> Result<Rows, QueryError> {
        self.executed.lock().unwrap().push(query.to_string());
        if let Some(token) = &self.cancel_on_execute {
            token.cancel();
            std::future::pending::<()>().await;
        }
        if let Some((started, release)) = &self.gate {
            started.notify_one();
            release.notified().await;
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(QueryError::rejected("unexpected query")))
    }
}

#[derive(Default)]
struct MockSandbox {
    results: Mutex<VecDeque<Result<Vec<ImageArtifact>, SandboxError>>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockSandbox {
    fn new(results: Vec<Result<Vec<ImageArtifact>, SandboxError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxRuntime for MockSandbox {
    async fn execute(
        &self,
        code: &str,
        data: &DataBindings,
        _limits: SandboxLimits,
    ) -> Result<Vec<ImageArtifact>, SandboxError> {
        self.calls
            .lock()
            .unwrap()
            .push((code.to_string(), data.keys().cloned().collect()));
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SandboxError::new(SandboxErrorKind::NoOutput, "unscripted")))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn schema() -> SchemaContext {
    SchemaContext::new(SchemaDescriptor {
        table_name: "transactions".to_string(),
        description: "UPI transactions".to_string(),
        columns: vec![
            ColumnDescriptor {
                name: "transaction_type".to_string(),
                data_type: "TEXT".to_string(),
                description: "P2P, P2M, Bill Payment, Recharge".to_string(),
                nullable: false,
                null_condition: None,
                valid_values: vec![json!("P2P"), json!("P2M")],
                example: None,
            },
            ColumnDescriptor {
                name: "transaction_status".to_string(),
                data_type: "TEXT".to_string(),
                description: "SUCCESS or FAILED".to_string(),
                nullable: false,
                null_condition: None,
                valid_values: vec![],
                example: Some(json!("SUCCESS")),
            },
        ],
        important_notes: vec![],
        query_guidelines: vec![],
    })
}

fn providers(max_retries: u32) -> ProvidersConfig {
    let mut configs = ProvidersConfig::default();
    for kind in [ProviderKind::Gemini, ProviderKind::Groq] {
        let config = configs.get_mut(kind);
        config.api_key = "test-key".into();
        config.max_retries = max_retries;
        config.timeout_ms = 1_000;
    }
    configs
}

struct Harness {
    groq: Arc<ScriptedProvider>,
    engine: Arc<MockEngine>,
    sandbox: Arc<MockSandbox>,
    orchestrator: Arc<Orchestrator>,
}

fn harness_with(
    groq: ScriptedProvider,
    gemini: ScriptedProvider,
    engine: MockEngine,
    sandbox: MockSandbox,
    provider_retries: u32,
    max_step_retries: u32,
) -> Harness {
    let groq = Arc::new(groq);
    let engine = Arc::new(engine);
    let sandbox = Arc::new(sandbox);
    let gateway = LlmGateway::new(providers(provider_retries), BackoffPolicy::none())
        .with_provider(groq.clone())
        .with_provider(Arc::new(gemini));
    let orchestrator = Orchestrator::new(
        Arc::new(gateway),
        QueryExecutionAdapter::new(
            engine.clone(),
            QueryLimits {
                timeout: Duration::from_secs(5),
                max_rows: 100,
            },
        ),
        SandboxDispatcher::new(
            sandbox.clone(),
            SandboxLimits {
                timeout: Duration::from_secs(5),
                max_memory_mb: 256,
            },
        ),
        Arc::new(schema()),
        WorkflowConfig {
            max_step_retries,
            ..WorkflowConfig::default()
        },
    )
    .unwrap();

    Harness {
        groq,
        engine,
        sandbox,
        orchestrator: Arc::new(orchestrator),
    }
}

fn harness(groq: ScriptedProvider, engine: MockEngine, sandbox: MockSandbox) -> Harness {
    harness_with(
        groq,
        ScriptedProvider::new(ProviderKind::Gemini),
        engine,
        sandbox,
        0,
        3,
    )
}

fn failure_rates() -> Rows {
    Rows::new(
        vec!["transaction_type".into(), "failure_rate_pct".into()],
        vec![
            vec![json!("Bill Payment"), json!(8.2)],
            vec![json!("Recharge"), json!(6.7)],
            vec![json!("P2M"), json!(4.3)],
            vec![json!("P2P"), json!(2.1)],
        ],
    )
}

fn scalar(column: &str, value: i64) -> Rows {
    Rows::new(vec![column.to_string()], vec![vec![json!(value)]])
}

fn chart() -> ImageArtifact {
    ImageArtifact::png("iVBORw0KGgo=")
}

fn count(trace: &[TraceStep], kind: TraceKind) -> usize {
    trace.iter().filter(|s| s.kind == kind).count()
}

const FAILURE_RATE_QUERY: &str = "SELECT transaction_type, ROUND(SUM(CASE WHEN transaction_status = 'FAILED' THEN 1 ELSE 0 END) * 100.0 / COUNT(*), 2) AS failure_rate_pct FROM transactions GROUP BY transaction_type ORDER BY failure_rate_pct DESC";

fn failure_rate_script() -> ScriptedProvider {
    ScriptedProvider::new(ProviderKind::Groq)
        .reply(
            LlmTask::Analyze,
            text(r#"{"steps": [{"description": "Failure rate per transaction type"}], "reasoning": "Group by type"}"#),
        )
        .reply(LlmTask::GenerateQuery, text(&format!("```sql\n{FAILURE_RATE_QUERY}\n```")))
        .reply(
            LlmTask::ChartCode,
            text("import matplotlib.pyplot as plt\nrows = DATA['step_1']\nplt.figure(figsize=(5, 3))\nplt.bar([r['transaction_type'] for r in rows], [r['failure_rate_pct'] for r in rows])\nplt.show()"),
        )
        .reply(
            LlmTask::Answer,
            text("Bill Payments have the highest failure rate at 8.2%, while P2P transfers show the lowest at 2.1%."),
        )
}

// ---------------------------------------------------------------------------
// Orchestrator scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failure_rate_question_runs_one_step_and_one_chart() {
    let h = harness(
        failure_rate_script(),
        MockEngine::new(vec![Ok(failure_rates())]),
        MockSandbox::new(vec![Ok(vec![chart()])]),
    );

    let outcome = h
        .orchestrator
        .run(
            "What is the failure rate for each transaction type?",
            &[],
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.answer.starts_with("Bill Payments have the highest failure rate"));
    assert!(outcome.error.is_none());
    assert_eq!(outcome.visualizations, vec![chart()]);
    assert_eq!(outcome.queries, vec![FAILURE_RATE_QUERY.to_string()]);
    assert_eq!(count(&outcome.trace, TraceKind::Sql), 1);
    assert_eq!(count(&outcome.trace, TraceKind::Error), 0);
    assert_eq!(
        outcome.trace.last().map(|s| s.text.as_str()),
        Some("Response generated (1 charts)")
    );
    assert!(outcome.trace.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let plan = outcome.plan.unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.steps[0].status, StepStatus::Succeeded);
    assert_eq!(plan.steps[0].retry_count, 0);

    assert_eq!(h.engine.executed(), vec![FAILURE_RATE_QUERY.to_string()]);
    let sandbox_calls = h.sandbox.calls();
    assert_eq!(sandbox_calls.len(), 1);
    assert!(!sandbox_calls[0].0.contains("import matplotlib"));
    assert!(!sandbox_calls[0].0.contains("plt.show()"));
    assert_eq!(sandbox_calls[0].1, vec!["step_1".to_string()]);
    assert_eq!(
        h.groq.calls(),
        vec![
            LlmTask::Analyze,
            LlmTask::GenerateQuery,
            LlmTask::ChartCode,
            LlmTask::Answer
        ]
    );
}

#[tokio::test]
async fn test_missing_column_is_repaired_on_second_attempt() {
    let groq = ScriptedProvider::new(ProviderKind::Groq)
        .reply(
            LlmTask::Analyze,
            text(r#"{"steps": [{"description": "Total transactions", "sql_query": "SELECT COUNT(txn_id) AS total FROM transactions"}], "reasoning": "Count rows"}"#),
        )
        .reply(
            LlmTask::RepairQuery,
            text("SELECT COUNT(*) AS total FROM transactions"),
        )
        .reply(LlmTask::Answer, text("There are 250,000 transactions."));
    let h = harness(
        groq,
        MockEngine::new(vec![
            Err(QueryError::rejected("no such column: txn_id")),
            Ok(scalar("total", 250_000)),
        ]),
        MockSandbox::default(),
    );

    let outcome = h
        .orchestrator
        .run("How many transactions are there?", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    let plan = outcome.plan.unwrap();
    assert_eq!(plan.steps[0].status, StepStatus::Succeeded);
    assert_eq!(plan.steps[0].retry_count, 1);
    assert!(outcome.error.is_none());

    assert_eq!(count(&outcome.trace, TraceKind::Error), 1);
    let error_at = outcome
        .trace
        .iter()
        .position(|s| s.kind == TraceKind::Error)
        .unwrap();
    assert!(outcome.trace[error_at].text.contains("no such column: txn_id"));
    let repaired_at = outcome
        .trace
        .iter()
        .rposition(|s| s.kind == TraceKind::Sql)
        .unwrap();
    assert!(repaired_at > error_at);
    assert_eq!(
        outcome.trace[repaired_at].prompt.as_deref(),
        Some("SELECT COUNT(*) AS total FROM transactions")
    );

    assert_eq!(
        h.engine.executed(),
        vec![
            "SELECT COUNT(txn_id) AS total FROM transactions".to_string(),
            "SELECT COUNT(*) AS total FROM transactions".to_string(),
        ]
    );
    assert_eq!(outcome.queries, vec!["SELECT COUNT(*) AS total FROM transactions".to_string()]);
    // A scalar result is not charted.
    assert!(h.sandbox.calls().is_empty());
    assert!(outcome.visualizations.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_provider_timeouts_during_analysis_end_the_turn() {
    let groq = ScriptedProvider::new(ProviderKind::Groq)
        .reply(LlmTask::Analyze, Reply::Hang)
        .reply(LlmTask::Analyze, Reply::Hang);
    let gemini = ScriptedProvider::new(ProviderKind::Gemini)
        .reply(LlmTask::Analyze, Reply::Hang)
        .reply(LlmTask::Analyze, Reply::Hang);
    let h = harness_with(groq, gemini, MockEngine::default(), MockSandbox::default(), 1, 3);

    let outcome = h
        .orchestrator
        .run("Which bank fails most?", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.answer, "");
    assert_eq!(
        outcome.error,
        Some(WorkflowError::Gateway {
            error: GatewayError::Timeout { attempts: 4 }
        })
    );
    assert!(outcome.plan.is_none());
    assert!(outcome.visualizations.is_empty());
    assert!(h.engine.executed().is_empty());
    assert!(h.sandbox.calls().is_empty());
    assert_eq!(count(&outcome.trace, TraceKind::Prompt), 4);
}

#[tokio::test]
async fn test_conversational_question_skips_engine_and_sandbox() {
    let groq = ScriptedProvider::new(ProviderKind::Groq).reply(
        LlmTask::Analyze,
        text(r#"{"steps": [], "reasoning": "Conversational question", "conversational_answer": "I am an AI data analyst that explores UPI transaction data."}"#),
    );
    let h = harness(groq, MockEngine::default(), MockSandbox::default());

    let outcome = h
        .orchestrator
        .run("Who are you?", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.answer,
        "I am an AI data analyst that explores UPI transaction data."
    );
    assert!(outcome.error.is_none());
    assert!(outcome.plan.is_none());
    assert!(outcome.queries.is_empty());
    assert!(h.engine.executed().is_empty());
    assert!(h.sandbox.calls().is_empty());
    assert_eq!(h.groq.calls(), vec![LlmTask::Analyze]);
}

#[tokio::test]
async fn test_exhausted_step_does_not_stop_remaining_steps() {
    let groq = ScriptedProvider::new(ProviderKind::Groq)
        .reply(
            LlmTask::Analyze,
            text(r#"{"steps": [{"description": "Volume by bank", "query": "SELECT bank FROM transactions"}, {"description": "Total volume", "query": "SELECT COUNT(*) AS total FROM transactions"}], "reasoning": "Two views"}"#),
        )
        .reply(LlmTask::RepairQuery, text("SELECT bank_name FROM transactions"))
        .reply(LlmTask::Answer, text("Total volume is 250,000 transactions."));
    let h = harness_with(
        groq,
        ScriptedProvider::new(ProviderKind::Gemini),
        MockEngine::new(vec![
            Err(QueryError::rejected("no such column: bank")),
            Err(QueryError::rejected("no such column: bank_name")),
            Ok(scalar("total", 250_000)),
        ]),
        MockSandbox::default(),
        0,
        1,
    );

    let outcome = h
        .orchestrator
        .run("Volume by bank and overall?", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    let plan = outcome.plan.unwrap();
    assert_eq!(plan.steps[0].status, StepStatus::Failed);
    assert_eq!(plan.steps[0].retry_count, 1);
    assert_eq!(
        plan.steps[0].last_error.as_deref(),
        Some("no such column: bank_name")
    );
    assert_eq!(plan.steps[1].status, StepStatus::Succeeded);

    // Step 1 ran twice (maxRetries + 1) and finished before step 2 started.
    assert_eq!(
        h.engine.executed(),
        vec![
            "SELECT bank FROM transactions".to_string(),
            "SELECT bank_name FROM transactions".to_string(),
            "SELECT COUNT(*) AS total FROM transactions".to_string(),
        ]
    );
    assert!(outcome.answer.starts_with("Total volume is 250,000 transactions."));
    assert!(
        outcome
            .answer
            .contains("Step 1 (Volume by bank) could not be completed")
    );
    // Partial results are usable, so no error is surfaced.
    assert!(outcome.error.is_none());
    assert_eq!(
        outcome.queries,
        vec!["SELECT COUNT(*) AS total FROM transactions".to_string()]
    );
}

#[tokio::test]
async fn test_every_step_failing_surfaces_repair_exhausted() {
    let groq = ScriptedProvider::new(ProviderKind::Groq)
        .reply(
            LlmTask::Analyze,
            text(r#"{"steps": [{"description": "Volume by bank", "query": "SELECT bank FROM transactions"}], "reasoning": "r"}"#),
        )
        .reply(LlmTask::Answer, text("The bank breakdown could not be computed."));
    let h = harness_with(
        groq,
        ScriptedProvider::new(ProviderKind::Gemini),
        MockEngine::new(vec![Err(QueryError::rejected("no such column: bank"))]),
        MockSandbox::default(),
        0,
        0,
    );

    let outcome = h
        .orchestrator
        .run("Volume by bank?", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.error,
        Some(WorkflowError::RepairExhausted {
            step: 1,
            description: "Volume by bank".to_string(),
            attempts: 1,
            last_error: "no such column: bank".to_string(),
        })
    );
    assert!(!outcome.answer.is_empty());
    assert_eq!(h.engine.executed().len(), 1);
    assert!(!h.groq.calls().contains(&LlmTask::RepairQuery));
}

#[tokio::test]
async fn test_malformed_plan_is_an_analysis_error() {
    let groq = ScriptedProvider::new(ProviderKind::Groq)
        .reply(LlmTask::Analyze, text("Sorry, I cannot plan this."));
    let h = harness(groq, MockEngine::default(), MockSandbox::default());

    let outcome = h
        .orchestrator
        .run("???", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.answer, "");
    assert!(matches!(outcome.error, Some(WorkflowError::Analysis { .. })));
    assert!(outcome.plan.is_none());
    assert!(h.engine.executed().is_empty());
}

#[tokio::test]
async fn test_planner_reply_without_steps_is_an_analysis_error() {
    let groq = ScriptedProvider::new(ProviderKind::Groq)
        .reply(LlmTask::Analyze, text(r#"{"answer": "There are 42 transactions."}"#));
    let h = harness(groq, MockEngine::default(), MockSandbox::default());

    let outcome = h
        .orchestrator
        .run("How many?", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.answer, "");
    match outcome.error {
        Some(WorkflowError::Analysis { message }) => assert!(message.contains("steps")),
        other => panic!("expected an analysis error, got {other:?}"),
    }
    assert!(outcome.plan.is_none());
    assert!(h.engine.executed().is_empty());
    assert_eq!(h.groq.calls(), vec![LlmTask::Analyze]);
}

#[tokio::test]
async fn test_unreachable_models_after_planning_report_gateway_error() {
    // Only the plan comes back; query generation and the answer both fail.
    let groq = ScriptedProvider::new(ProviderKind::Groq).reply(
        LlmTask::Analyze,
        text(r#"{"steps": [{"description": "Failure rate per transaction type"}], "reasoning": "r"}"#),
    );
    let h = harness(groq, MockEngine::default(), MockSandbox::default());

    let outcome = h
        .orchestrator
        .run("Failure rate by type?", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(h.engine.executed().is_empty());
    let plan = outcome.plan.unwrap();
    assert_eq!(plan.steps[0].status, StepStatus::Failed);
    assert_eq!(plan.steps[0].retry_count, 0);
    assert!(!plan.steps[0].exhausted);
    assert!(matches!(
        outcome.error,
        Some(WorkflowError::Gateway {
            error: GatewayError::ProviderUnavailable { .. }
        })
    ));
}

#[tokio::test]
async fn test_step_gateway_failure_surfaces_when_answer_succeeds() {
    let groq = ScriptedProvider::new(ProviderKind::Groq)
        .reply(
            LlmTask::Analyze,
            text(r#"{"steps": [{"description": "Failure rate per transaction type"}], "reasoning": "r"}"#),
        )
        .reply(LlmTask::GenerateQuery, text("```sql\n```"))
        .reply(LlmTask::Answer, text("The failure rates could not be retrieved."));
    let h = harness(groq, MockEngine::default(), MockSandbox::default());

    let outcome = h
        .orchestrator
        .run("Failure rate by type?", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(h.engine.executed().is_empty());
    assert!(outcome.answer.starts_with("The failure rates could not be retrieved."));
    assert!(matches!(
        outcome.error,
        Some(WorkflowError::Gateway {
            error: GatewayError::InvalidResponse { .. }
        })
    ));
}

#[tokio::test]
async fn test_answer_falls_back_to_summary_when_models_fail() {
    let groq = ScriptedProvider::new(ProviderKind::Groq)
        .reply(
            LlmTask::Analyze,
            text(r#"{"steps": [{"description": "Total", "query": "SELECT COUNT(*) AS total FROM transactions"}], "reasoning": "r"}"#),
        );
    let h = harness(
        groq,
        MockEngine::new(vec![Ok(scalar("total", 42))]),
        MockSandbox::default(),
    );

    let outcome = h
        .orchestrator
        .run("How many?", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.answer,
        "Results retrieved:\n- Total: 1 row(s), first: {\"total\":42}"
    );
    assert!(matches!(
        outcome.error,
        Some(WorkflowError::Gateway {
            error: GatewayError::ProviderUnavailable { .. }
        })
    ));
    assert_eq!(
        outcome.trace.last().map(|s| s.text.as_str()),
        Some("Response generated (0 charts)")
    );
}

#[tokio::test]
async fn test_failed_chart_code_gets_one_fix() {
    let groq = failure_rate_script().reply(
        LlmTask::RepairChart,
        text("rows = DATA['step_1']\nplt.figure()\nplt.bar(range(len(rows)), [r['failure_rate_pct'] for r in rows])"),
    );
    let h = harness(
        groq,
        MockEngine::new(vec![Ok(failure_rates())]),
        MockSandbox::new(vec![
            Err(SandboxError::new(
                SandboxErrorKind::ExecutionFailed,
                "KeyError: 'type'",
            )),
            Ok(vec![chart()]),
        ]),
    );

    let outcome = h
        .orchestrator
        .run("Failure rate by type?", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.visualizations.len(), 1);
    assert!(outcome.error.is_none());
    assert_eq!(count(&outcome.trace, TraceKind::Error), 1);
    assert!(
        outcome
            .trace
            .iter()
            .any(|s| s.text == "Chart code failed: KeyError: 'type'")
    );
    assert_eq!(h.sandbox.calls().len(), 2);
}

#[tokio::test]
async fn test_sandbox_failure_is_tolerated() {
    let h = harness(
        failure_rate_script(),
        MockEngine::new(vec![Ok(failure_rates())]),
        MockSandbox::new(vec![Err(SandboxError::new(
            SandboxErrorKind::Timeout,
            "Chart generation timed out",
        ))]),
    );

    let outcome = h
        .orchestrator
        .run("Failure rate by type?", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.visualizations.is_empty());
    assert!(outcome.error.is_none());
    assert!(outcome.answer.starts_with("Bill Payments"));
    assert_eq!(
        outcome.trace.last().map(|s| s.text.as_str()),
        Some("Response generated (0 charts)")
    );
}

#[tokio::test]
async fn test_identical_runs_produce_identical_structure() {
    let mut runs = Vec::new();
    for _ in 0..2 {
        let h = harness(
            failure_rate_script(),
            MockEngine::new(vec![Ok(failure_rates())]),
            MockSandbox::new(vec![Ok(vec![chart()])]),
        );
        let outcome = h
            .orchestrator
            .run("Failure rate by type?", &[], None, &CancellationToken::new())
            .await
            .unwrap();
        runs.push(outcome);
    }

    let shape = |trace: &[TraceStep]| {
        trace
            .iter()
            .map(|s| (s.kind, s.text.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&runs[0].trace), shape(&runs[1].trace));
    assert_eq!(runs[0].answer, runs[1].answer);
    assert_eq!(runs[0].queries, runs[1].queries);
    assert_eq!(
        runs[0].plan.as_ref().map(|p| p.steps.clone()),
        runs[1].plan.as_ref().map(|p| p.steps.clone())
    );
}

// ---------------------------------------------------------------------------
// Session use case
// ---------------------------------------------------------------------------

fn usecase(h: &Harness, repository: Arc<InMemorySessionRepository>) -> SessionUseCase {
    SessionUseCase::new(repository, h.orchestrator.clone())
}

#[tokio::test]
async fn test_new_session_is_auto_titled_once() {
    let groq = failure_rate_script()
        .reply(
            LlmTask::Analyze,
            text(r#"{"steps": [], "conversational_answer": "Happy to help."}"#),
        );
    let h = harness(
        groq,
        MockEngine::new(vec![Ok(failure_rates())]),
        MockSandbox::new(vec![Ok(vec![chart()])]),
    );
    let repository = Arc::new(InMemorySessionRepository::new(50));
    let usecase = usecase(&h, repository.clone());
    let question = "What is the failure rate for each transaction type across the whole dataset?";

    let first = usecase
        .submit_query(None, question, None, &CancellationToken::new())
        .await
        .unwrap();

    let session = usecase.get_session(&first.session_id).await.unwrap();
    assert_eq!(session.title, title_from_query(question));
    assert!(session.title.chars().count() <= 60);
    assert!(session.auto_titled);
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.turns[0].content, question);
    assert_eq!(session.turns[1].content, first.answer);
    assert_eq!(session.turns[1].visualizations.len(), 1);
    assert_eq!(session.turns[1].queries, first.queries);
    assert!(session.turns[1].trace.is_some());

    let second = usecase
        .submit_query(Some(&first.session_id), "Thanks!", None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.answer, "Happy to help.");

    let history = usecase.history(&first.session_id).await.unwrap();
    assert_eq!(history.len(), 4);
    let session = usecase.get_session(&first.session_id).await.unwrap();
    assert_eq!(session.title, title_from_query(question));
    assert_eq!(usecase.list_sessions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_new_session_respects_turn_limit() {
    let groq = ScriptedProvider::new(ProviderKind::Groq).reply(
        LlmTask::Analyze,
        text(r#"{"steps": [], "conversational_answer": "Hello."}"#),
    );
    let h = harness(groq, MockEngine::default(), MockSandbox::default());
    let usecase = usecase(&h, Arc::new(InMemorySessionRepository::new(1)));

    let response = usecase
        .submit_query(None, "Hi there", None, &CancellationToken::new())
        .await
        .unwrap();

    let session = usecase.get_session(&response.session_id).await.unwrap();
    assert_eq!(session.turns.len(), 1);
    assert_eq!(session.turns[0].content, "Hello.");
    assert_eq!(session.title, "Hi there");
}

#[tokio::test]
async fn test_cancelled_turn_persists_nothing() {
    let token = CancellationToken::new();
    let groq = ScriptedProvider::new(ProviderKind::Groq).reply(
        LlmTask::Analyze,
        text(r#"{"steps": [{"description": "Total", "query": "SELECT COUNT(*) FROM transactions"}], "reasoning": "r"}"#),
    );
    let engine = MockEngine {
        cancel_on_execute: Some(token.clone()),
        ..MockEngine::default()
    };
    let h = harness(groq, engine, MockSandbox::default());
    let repository = Arc::new(InMemorySessionRepository::new(50));
    let usecase = usecase(&h, repository.clone());

    let err = usecase
        .submit_query(None, "How many?", None, &token)
        .await
        .unwrap_err();

    assert!(matches!(err, InsightError::Cancelled));
    assert!(repository.is_empty().await);
    assert_eq!(h.groq.calls(), vec![LlmTask::Analyze]);
}

#[tokio::test]
async fn test_cancelled_turn_leaves_existing_session_untouched() {
    let token = CancellationToken::new();
    token.cancel();
    let h = harness(
        ScriptedProvider::new(ProviderKind::Groq),
        MockEngine::default(),
        MockSandbox::default(),
    );
    let repository = Arc::new(InMemorySessionRepository::new(50));
    let session = Session::new("Existing");
    repository.create(&session).await.unwrap();
    let usecase = usecase(&h, repository.clone());

    let err = usecase
        .submit_query(Some(&session.id), "How many?", None, &token)
        .await
        .unwrap_err();

    assert!(matches!(err, InsightError::Cancelled));
    assert!(usecase.history(&session.id).await.unwrap().is_empty());
    assert!(h.groq.calls().is_empty());
}

#[tokio::test]
async fn test_rename_during_turn_is_preserved() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let groq = ScriptedProvider::new(ProviderKind::Groq)
        .reply(
            LlmTask::Analyze,
            text(r#"{"steps": [{"description": "Total", "query": "SELECT COUNT(*) AS total FROM transactions"}], "reasoning": "r"}"#),
        )
        .reply(LlmTask::Answer, text("There are 7 transactions."));
    let engine = MockEngine {
        results: Mutex::new(vec![Ok(scalar("total", 7))].into()),
        gate: Some((started.clone(), release.clone())),
        ..MockEngine::default()
    };
    let h = harness(groq, engine, MockSandbox::default());
    let repository = Arc::new(InMemorySessionRepository::new(50));
    let session = Session::new("Old title");
    repository.create(&session).await.unwrap();
    let usecase = usecase(&h, repository.clone());
    let token = CancellationToken::new();

    let (response, renamed) = tokio::join!(
        usecase.submit_query(Some(&session.id), "How many?", None, &token),
        async {
            started.notified().await;
            let renamed = usecase.rename_session(&session.id, "Renamed").await;
            release.notify_one();
            renamed
        }
    );

    assert_eq!(renamed.unwrap().title, "Renamed");
    let response = response.unwrap();
    assert_eq!(response.answer, "There are 7 transactions.");

    let stored = usecase.get_session(&session.id).await.unwrap();
    assert_eq!(stored.title, "Renamed");
    assert_eq!(stored.turns.len(), 2);
}

#[tokio::test]
async fn test_session_operations_report_missing_sessions() {
    let h = harness(
        ScriptedProvider::new(ProviderKind::Groq),
        MockEngine::default(),
        MockSandbox::default(),
    );
    let usecase = usecase(&h, Arc::new(InMemorySessionRepository::new(50)));

    assert!(usecase.history("missing").await.unwrap_err().is_not_found());
    assert!(usecase.delete_session("missing").await.unwrap_err().is_not_found());
    assert!(
        usecase
            .submit_query(Some("missing"), "hi", None, &CancellationToken::new())
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(matches!(
        usecase
            .submit_query(None, "   ", None, &CancellationToken::new())
            .await
            .unwrap_err(),
        InsightError::InvalidInput(_)
    ));
    assert_eq!(usecase.schema().table_name, "transactions");
}
