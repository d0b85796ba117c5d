//! The per-turn workflow state machine.
//!
//! One [`Orchestrator`] is shared by every turn; all per-turn state lives in a
//! private `TurnRun` owned by the task that drives the turn. The orchestrator
//! never touches sessions, so callers decide what gets persisted.

use super::prompts::{PromptLibrary, render_history};
use super::viz;
use anyhow::Context as _;
use insight_core::config::WorkflowConfig;
use insight_core::error::{InsightError, Result};
use insight_core::llm::{CompletionRequest, GatewayError, LlmTask, ProviderKind};
use insight_core::query::{QueryExecutionAdapter, Rows};
use insight_core::sandbox::{DataBindings, ImageArtifact, SandboxDispatcher};
use insight_core::schema::SchemaProvider;
use insight_core::session::Turn;
use insight_core::trace::{TraceKind, TraceRecorder, TraceStep};
use insight_core::workflow::{ExecutionPlan, Step, WorkflowError, WorkflowState};
use insight_interaction::{LlmGateway, strip_code_fences};
use minijinja::{Value, context};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Results up to this size go to the answer prompt in full.
const ANSWER_FULL_ROWS: usize = 10;
const ANSWER_SAMPLE_ROWS: usize = 5;
const ERROR_PREVIEW_CHARS: usize = 200;

/// Planner reply. `steps` is required, even when empty; `sql_query` is
/// accepted as an alias for `query`.
#[derive(Debug, Deserialize)]
struct AnalysisReply {
    steps: Vec<PlannedStep>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    conversational_answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlannedStep {
    #[serde(default)]
    description: String,
    #[serde(default, alias = "sql_query")]
    query: Option<String>,
}

/// One successful step as shown to the answer prompt.
#[derive(Debug, Serialize)]
struct AnswerStep {
    description: String,
    row_count: usize,
    label: &'static str,
    records: String,
}

/// Everything a completed turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    pub visualizations: Vec<ImageArtifact>,
    pub trace: Vec<TraceStep>,
    /// Successfully executed queries, in plan order.
    pub queries: Vec<String>,
    pub error: Option<WorkflowError>,
    /// The finished plan, `None` when the turn never planned.
    pub plan: Option<ExecutionPlan>,
}

struct TurnRun<'a> {
    query: &'a str,
    history: String,
    preferred: Option<ProviderKind>,
    trace: TraceRecorder,
    plan: Option<ExecutionPlan>,
    direct_reply: Option<String>,
    visualizations: Vec<ImageArtifact>,
    answer: String,
    error: Option<WorkflowError>,
    /// First gateway failure that cost a step its query.
    step_gateway_error: Option<GatewayError>,
}

impl<'a> TurnRun<'a> {
    fn new(query: &'a str, history: String, preferred: Option<ProviderKind>) -> Self {
        Self {
            query,
            history,
            preferred,
            trace: TraceRecorder::new(),
            plan: None,
            direct_reply: None,
            visualizations: Vec::new(),
            answer: String::new(),
            error: None,
            step_gateway_error: None,
        }
    }

    fn plan(&self) -> Result<&ExecutionPlan> {
        self.plan
            .as_ref()
            .ok_or_else(|| InsightError::internal("workflow reached a step state without a plan"))
    }

    fn plan_mut(&mut self) -> Result<&mut ExecutionPlan> {
        self.plan
            .as_mut()
            .ok_or_else(|| InsightError::internal("workflow reached a step state without a plan"))
    }

    fn current_step(&self) -> Result<&Step> {
        self.plan()?
            .current()
            .ok_or_else(|| InsightError::internal("plan cursor is past the last step"))
    }

    fn current_step_mut(&mut self) -> Result<&mut Step> {
        self.plan_mut()?
            .current_mut()
            .ok_or_else(|| InsightError::internal("plan cursor is past the last step"))
    }

    fn record_step_gateway_error(&mut self, error: GatewayError) {
        if self.step_gateway_error.is_none() {
            self.step_gateway_error = Some(error);
        }
    }

    /// Where to go once the current step has finished.
    fn after_step(&self) -> WorkflowState {
        match &self.plan {
            Some(plan) if plan.has_next() => WorkflowState::AdvanceStep,
            _ => WorkflowState::GenerateViz,
        }
    }

    fn finish(self) -> TurnOutcome {
        let queries = self
            .plan
            .as_ref()
            .map(ExecutionPlan::executed_queries)
            .unwrap_or_default();
        TurnOutcome {
            answer: self.answer,
            visualizations: self.visualizations,
            trace: self.trace.into_steps(),
            queries,
            error: self.error,
            plan: self.plan,
        }
    }
}

/// Drives a question through analysis, query steps, charting and the answer.
pub struct Orchestrator {
    gateway: Arc<LlmGateway>,
    queries: QueryExecutionAdapter,
    sandbox: SandboxDispatcher,
    schema: Arc<dyn SchemaProvider>,
    config: WorkflowConfig,
    prompts: PromptLibrary,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<LlmGateway>,
        queries: QueryExecutionAdapter,
        sandbox: SandboxDispatcher,
        schema: Arc<dyn SchemaProvider>,
        config: WorkflowConfig,
    ) -> anyhow::Result<Self> {
        let prompts = PromptLibrary::new().context("Failed to compile prompt templates")?;
        Ok(Self {
            gateway,
            queries,
            sandbox,
            schema,
            config,
            prompts,
        })
    }

    pub fn schema(&self) -> &dyn SchemaProvider {
        self.schema.as_ref()
    }

    /// Runs one turn to completion.
    ///
    /// Workflow failures are reported inside the outcome. The only error is
    /// [`InsightError::Cancelled`] (plus internal invariant violations); once
    /// `token` fires no further external call is issued.
    pub async fn run(
        &self,
        query: &str,
        history: &[Turn],
        preferred: Option<ProviderKind>,
        token: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let history = render_history(
            history,
            self.config.history_turns,
            self.config.history_chars,
        );
        let mut run = TurnRun::new(query, history, preferred);
        let mut state = WorkflowState::INITIAL;

        while !state.is_terminal() {
            if token.is_cancelled() {
                tracing::info!(%state, "Turn cancelled");
                return Err(InsightError::Cancelled);
            }

            let next = match state {
                WorkflowState::Analyze => self.analyze(&mut run, token).await?,
                WorkflowState::PrepareStep => self.prepare_step(&mut run, token).await?,
                WorkflowState::ExecuteQuery => self.execute_query(&mut run, token).await?,
                WorkflowState::RepairQuery => self.repair_query(&mut run, token).await?,
                WorkflowState::AdvanceStep => self.advance_step(&mut run)?,
                WorkflowState::GenerateViz => self.generate_viz(&mut run, token).await?,
                WorkflowState::Answer => self.answer(&mut run, token).await?,
                WorkflowState::End => break,
            };

            debug_assert!(
                state.can_transition_to(next),
                "illegal workflow transition {state} -> {next}"
            );
            tracing::info!(from = %state, to = %next, "Workflow transition");
            state = next;
        }

        let trace_errors = run.trace.count(TraceKind::Error);
        let outcome = run.finish();
        tracing::info!(
            trace_errors,
            steps = outcome.plan.as_ref().map_or(0, ExecutionPlan::len),
            charts = outcome.visualizations.len(),
            failed = outcome.error.is_some(),
            "Turn completed"
        );
        Ok(outcome)
    }

    fn render(&self, task: LlmTask, ctx: Value) -> Result<CompletionRequest> {
        let request = self
            .prompts
            .request(task, ctx)
            .map_err(|e| InsightError::internal(format!("prompt for {task}: {e}")))?;
        tracing::debug!(%task, prompt_chars = request.prompt.len(), "Rendered prompt");
        Ok(request)
    }

    async fn complete(
        &self,
        run: &mut TurnRun<'_>,
        task: LlmTask,
        ctx: Value,
        token: &CancellationToken,
    ) -> Result<std::result::Result<String, GatewayError>> {
        let request = self.render(task, ctx)?;
        cancellable(
            token,
            self.gateway
                .complete(&request, run.preferred, &mut run.trace),
        )
        .await
    }

    async fn complete_json<T: DeserializeOwned>(
        &self,
        run: &mut TurnRun<'_>,
        task: LlmTask,
        ctx: Value,
        token: &CancellationToken,
    ) -> Result<std::result::Result<T, GatewayError>> {
        let request = self.render(task, ctx)?;
        cancellable(
            token,
            self.gateway
                .complete_json(&request, run.preferred, &mut run.trace),
        )
        .await
    }

    async fn analyze(
        &self,
        run: &mut TurnRun<'_>,
        token: &CancellationToken,
    ) -> Result<WorkflowState> {
        let ctx = context! {
            schema => self.schema.context(),
            query => run.query,
            history => run.history.as_str(),
        };
        match self
            .complete_json::<AnalysisReply>(run, LlmTask::Analyze, ctx, token)
            .await?
        {
            Ok(reply) => Ok(apply_analysis(run, reply)),
            Err(GatewayError::InvalidResponse { message }) => {
                run.trace.error(format!("Query analysis failed: {message}"));
                run.error = Some(WorkflowError::Analysis { message });
                Ok(WorkflowState::End)
            }
            Err(error) => {
                run.trace.error(format!("Query analysis failed: {error}"));
                run.error = Some(error.into());
                Ok(WorkflowState::End)
            }
        }
    }

    async fn prepare_step(
        &self,
        run: &mut TurnRun<'_>,
        token: &CancellationToken,
    ) -> Result<WorkflowState> {
        let plan = run.plan()?;
        let number = plan.current_number();
        let count = plan.len();
        let step = run.current_step()?;
        let description = step.description.clone();
        let planned = step.query.clone();

        let candidate = match planned {
            Some(query) => Ok(query),
            None => {
                let ctx = context! {
                    schema => self.schema.context(),
                    query => run.query,
                    step_number => number,
                    step_count => count,
                    description => description.as_str(),
                };
                self.complete(run, LlmTask::GenerateQuery, ctx, token)
                    .await?
                    .and_then(require_query)
            }
        };

        match candidate {
            Ok(query) => {
                run.trace.sql(format!("Step {number}: {description}"), query.clone());
                run.current_step_mut()?.query = Some(query);
                Ok(WorkflowState::ExecuteQuery)
            }
            Err(err) => {
                let reason = err.to_string();
                run.record_step_gateway_error(err);
                tracing::warn!(step = number, %reason, "No query for step");
                run.trace
                    .error(format!("Step {number}: no query could be generated: {reason}"));
                run.current_step_mut()?
                    .fail(format!("Query generation failed: {reason}"));
                Ok(run.after_step())
            }
        }
    }

    async fn execute_query(
        &self,
        run: &mut TurnRun<'_>,
        token: &CancellationToken,
    ) -> Result<WorkflowState> {
        let number = run.plan()?.current_number();
        let query = run
            .current_step()?
            .query
            .clone()
            .ok_or_else(|| InsightError::internal("step reached execution without a query"))?;

        match cancellable(token, self.queries.run(&query)).await? {
            Ok(rows) => {
                tracing::debug!(step = number, rows = rows.len(), "Step succeeded");
                run.trace
                    .info(format!("Step {number}: query returned {} rows", rows.len()));
                run.current_step_mut()?.succeed(rows);
                Ok(run.after_step())
            }
            Err(err) => {
                tracing::debug!(step = number, kind = ?err.kind, "Step query failed");
                run.trace
                    .error(format!("Step {number}: query failed: {}", err.message));
                run.current_step_mut()?.last_error = Some(err.message);
                Ok(WorkflowState::RepairQuery)
            }
        }
    }

    async fn repair_query(
        &self,
        run: &mut TurnRun<'_>,
        token: &CancellationToken,
    ) -> Result<WorkflowState> {
        let number = run.plan()?.current_number();
        let max_retries = self.config.max_step_retries;
        let step = run.current_step_mut()?;
        let last_error = step.last_error.clone().unwrap_or_default();

        if !step.try_consume_retry(max_retries) {
            let attempts = step.retry_count + 1;
            step.exhaust(last_error.clone());
            tracing::warn!(step = number, attempts, "Step failed after exhausting repairs");
            run.trace.error(format!(
                "Step {number}: giving up after {attempts} attempt(s): {last_error}"
            ));
            return Ok(run.after_step());
        }

        let attempt = step.retry_count + 1;
        let description = step.description.clone();
        let failed_query = step.query.clone().unwrap_or_default();
        let ctx = context! {
            schema => self.schema.context(),
            query => run.query,
            description => description.as_str(),
            failed_query => failed_query.as_str(),
            error => last_error.as_str(),
        };

        let repaired = self
            .complete(run, LlmTask::RepairQuery, ctx, token)
            .await?
            .and_then(require_query);

        match repaired {
            Ok(query) => {
                run.trace.sql(
                    format!("Step {number}: repaired query (attempt {attempt})"),
                    query.clone(),
                );
                run.current_step_mut()?.query = Some(query);
                Ok(WorkflowState::ExecuteQuery)
            }
            Err(err) => {
                let reason = err.to_string();
                run.record_step_gateway_error(err);
                tracing::warn!(step = number, %reason, "Query repair failed");
                run.trace
                    .error(format!("Step {number}: query repair failed: {reason}"));
                run.current_step_mut()?
                    .fail(format!("Query repair failed: {reason}"));
                Ok(run.after_step())
            }
        }
    }

    fn advance_step(&self, run: &mut TurnRun<'_>) -> Result<WorkflowState> {
        if !run.plan_mut()?.advance() {
            return Err(InsightError::internal("no pending step to advance to"));
        }
        Ok(WorkflowState::PrepareStep)
    }

    async fn generate_viz(
        &self,
        run: &mut TurnRun<'_>,
        token: &CancellationToken,
    ) -> Result<WorkflowState> {
        let plan = run.plan()?;
        if !viz::has_chart_worthy_result(plan) {
            run.trace
                .info("Skipped visualization: no chart-worthy results");
            return Ok(WorkflowState::Answer);
        }
        let data_summary = viz::data_summary(plan);
        let bindings = viz::bindings(plan);

        let ctx = context! { query => run.query, data_summary => data_summary.as_str() };
        let code = match self.complete(run, LlmTask::ChartCode, ctx, token).await? {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "Chart code generation failed");
                run.trace.error(format!("Visualization skipped: {err}"));
                return Ok(WorkflowState::Answer);
            }
        };
        let Some(code) = viz::clean_chart_code(&code) else {
            run.trace.info("Model chose not to chart this result");
            return Ok(WorkflowState::Answer);
        };

        let images = match cancellable(token, self.sandbox.render(&code, &bindings)).await? {
            Ok(images) => images,
            Err(err) => {
                tracing::warn!(kind = ?err.kind, "Chart code failed, asking for a fix");
                run.trace.error(format!(
                    "Chart code failed: {}",
                    preview(&err.message, ERROR_PREVIEW_CHARS)
                ));
                self.repair_chart(run, &code, &err.message, &data_summary, &bindings, token)
                    .await?
            }
        };

        if !images.is_empty() {
            run.trace.info(format!("Generated {} chart(s)", images.len()));
        }
        run.visualizations.extend(images);
        Ok(WorkflowState::Answer)
    }

    /// One fix attempt for failed chart code. Failures are recorded and tolerated.
    async fn repair_chart(
        &self,
        run: &mut TurnRun<'_>,
        code: &str,
        error: &str,
        data_summary: &str,
        bindings: &DataBindings,
        token: &CancellationToken,
    ) -> Result<Vec<ImageArtifact>> {
        let ctx = context! {
            code => code,
            error => error,
            data_keys => bindings.keys().collect::<Vec<_>>(),
            data_summary => data_summary,
        };
        let fixed = match self.complete(run, LlmTask::RepairChart, ctx, token).await? {
            Ok(reply) => viz::clean_chart_code(&reply),
            Err(err) => {
                run.trace.error(format!("Chart repair failed: {err}"));
                None
            }
        };
        let Some(fixed) = fixed else {
            return Ok(Vec::new());
        };

        match cancellable(token, self.sandbox.render(&fixed, bindings)).await? {
            Ok(images) => Ok(images),
            Err(err) => {
                tracing::warn!(kind = ?err.kind, "Repaired chart code failed");
                run.trace.error(format!(
                    "Repaired chart code failed: {}",
                    preview(&err.message, ERROR_PREVIEW_CHARS)
                ));
                Ok(Vec::new())
            }
        }
    }

    async fn answer(
        &self,
        run: &mut TurnRun<'_>,
        token: &CancellationToken,
    ) -> Result<WorkflowState> {
        if let Some(reply) = run.direct_reply.take() {
            run.answer = reply;
            run.trace.info("Response generated (0 charts)");
            return Ok(WorkflowState::End);
        }

        let results = run.plan.as_ref().map(answer_steps).unwrap_or_default();
        let failed = run.plan.as_ref().map(failed_steps).unwrap_or_default();
        let ctx = context! { query => run.query, results => results, failed => failed };

        let mut answer = match self.complete(run, LlmTask::Answer, ctx, token).await? {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "Answer composition failed, using summary");
                run.trace
                    .error(format!("Answer composition failed, using summary: {err}"));
                run.error = Some(err.into());
                fallback_summary(run.plan.as_ref())
            }
        };

        if let Some(plan) = &run.plan {
            if let Some(note) = unresolved_note(plan) {
                answer.push_str("\n\n");
                answer.push_str(&note);
            }
            // Nothing usable came back. A spent repair budget is the reported
            // cause; otherwise the gateway kept every step from running.
            if plan.all_failed() {
                if let Some((number, step)) = plan.first_exhausted() {
                    run.error = Some(WorkflowError::RepairExhausted {
                        step: number,
                        description: step.description.clone(),
                        attempts: step.retry_count + 1,
                        last_error: step.last_error.clone().unwrap_or_default(),
                    });
                } else if run.error.is_none() {
                    run.error = run.step_gateway_error.take().map(WorkflowError::from);
                }
            }
        }

        run.answer = answer;
        run.trace.info(format!(
            "Response generated ({} charts)",
            run.visualizations.len()
        ));
        Ok(WorkflowState::End)
    }
}

async fn cancellable<F: Future>(token: &CancellationToken, future: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(InsightError::Cancelled),
        output = future => Ok(output),
    }
}

fn apply_analysis(run: &mut TurnRun<'_>, reply: AnalysisReply) -> WorkflowState {
    if reply.steps.is_empty() {
        match reply.conversational_answer {
            Some(answer) if !answer.trim().is_empty() => {
                run.trace.info("Conversational question, answering directly");
                run.direct_reply = Some(answer.trim().to_string());
            }
            _ => run.trace.info("No query needed, composing answer without data"),
        }
        return WorkflowState::Answer;
    }

    let mut steps = Vec::with_capacity(reply.steps.len());
    for (idx, planned) in reply.steps.into_iter().enumerate() {
        let query = planned.query.unwrap_or_default();
        let description = planned.description.trim();
        if description.is_empty() && query.trim().is_empty() {
            let message = format!("planned step {} has neither a description nor a query", idx + 1);
            run.trace.error(format!("Query analysis failed: {message}"));
            run.error = Some(WorkflowError::Analysis { message });
            return WorkflowState::End;
        }
        let description = if description.is_empty() {
            format!("Step {}", idx + 1)
        } else {
            description.to_string()
        };
        steps.push(Step::new(description).with_query(query));
    }

    let count = steps.len();
    run.trace.info(format!(
        "Plan: {} ({count} step{})",
        reply.reasoning.trim(),
        if count == 1 { "" } else { "s" }
    ));
    run.plan = Some(ExecutionPlan::new(steps, reply.reasoning));
    WorkflowState::PrepareStep
}

fn clean_query(reply: &str) -> Option<String> {
    let query = strip_code_fences(reply).trim();
    (!query.is_empty()).then(|| query.to_string())
}

/// An empty query is an invalid model reply.
fn require_query(reply: String) -> std::result::Result<String, GatewayError> {
    clean_query(&reply).ok_or_else(|| GatewayError::invalid_response("model returned an empty query"))
}

fn answer_steps(plan: &ExecutionPlan) -> Vec<AnswerStep> {
    viz::successful_results(plan)
        .into_iter()
        .map(|(_, description, _, rows)| {
            let (label, records) = if rows.len() <= ANSWER_FULL_ROWS {
                ("Results", rows.records())
            } else {
                ("Sample (first 5)", rows.sample(ANSWER_SAMPLE_ROWS))
            };
            AnswerStep {
                description: description.to_string(),
                row_count: rows.len(),
                label,
                records: serde_json::Value::Array(records).to_string(),
            }
        })
        .collect()
}

fn failed_steps(plan: &ExecutionPlan) -> Vec<String> {
    plan.failed()
        .map(|(number, step)| {
            format!(
                "Step {number} ({}): {}",
                step.description,
                step.last_error.as_deref().unwrap_or("no result")
            )
        })
        .collect()
}

/// One sentence per failed step, appended to every composed answer.
fn unresolved_note(plan: &ExecutionPlan) -> Option<String> {
    let sentences: Vec<String> = plan
        .failed()
        .map(|(number, step)| {
            format!(
                "Step {number} ({}) could not be completed, so its figures are missing.",
                step.description
            )
        })
        .collect();
    (!sentences.is_empty()).then(|| sentences.join(" "))
}

/// Deterministic answer used when the model cannot compose one.
fn fallback_summary(plan: Option<&ExecutionPlan>) -> String {
    let results = plan.map(viz::successful_results).unwrap_or_default();
    if results.is_empty() {
        return "No results could be retrieved for this question.".to_string();
    }
    let mut lines = vec!["Results retrieved:".to_string()];
    for (_, description, _, rows) in results {
        lines.push(summarize_rows(description, rows));
    }
    lines.join("\n")
}

fn summarize_rows(description: &str, rows: &Rows) -> String {
    match rows.sample(1).into_iter().next() {
        Some(first) => format!("- {description}: {} row(s), first: {first}", rows.len()),
        None => format!("- {description}: no rows"),
    }
}

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_interaction::parse_llm_json;
    use serde_json::json;

    fn plan_with_failure() -> ExecutionPlan {
        let mut ok = Step::new("Failure rate by type").with_query("SELECT 1");
        ok.succeed(Rows::new(
            vec!["transaction_type".into(), "failure_rate_pct".into()],
            vec![vec![json!("P2P"), json!(2.1)]],
        ));
        let mut failed = Step::new("Volume by bank");
        failed.fail("no such column: bank");
        ExecutionPlan::new(vec![ok, failed], "")
    }

    #[test]
    fn test_planner_reply_accepts_sql_query_alias() {
        let reply: AnalysisReply = parse_llm_json(
            r#"{"steps": [{"description": "d", "sql_query": "SELECT 1"}], "reasoning": "r"}"#,
        )
        .unwrap();
        assert_eq!(reply.steps[0].query.as_deref(), Some("SELECT 1"));
        assert!(reply.conversational_answer.is_none());
    }

    #[test]
    fn test_planner_reply_requires_steps() {
        assert!(parse_llm_json::<AnalysisReply>(r#"{"answer": "42"}"#).is_err());
        assert!(parse_llm_json::<AnalysisReply>(r#"{"plan": [{"description": "d"}]}"#).is_err());
        let empty: AnalysisReply =
            parse_llm_json(r#"{"steps": [], "conversational_answer": "Hi"}"#).unwrap();
        assert!(empty.steps.is_empty());
    }

    #[test]
    fn test_unresolved_note_names_failed_steps() {
        let note = unresolved_note(&plan_with_failure()).unwrap();
        assert!(note.contains("Step 2 (Volume by bank) could not be completed"));
        assert!(unresolved_note(&ExecutionPlan::new(vec![], "")).is_none());
    }

    #[test]
    fn test_fallback_summary_is_deterministic() {
        let plan = plan_with_failure();
        let summary = fallback_summary(Some(&plan));
        assert_eq!(
            summary,
            "Results retrieved:\n- Failure rate by type: 1 row(s), first: {\"transaction_type\":\"P2P\",\"failure_rate_pct\":2.1}"
        );
        assert_eq!(
            fallback_summary(None),
            "No results could be retrieved for this question."
        );
    }

    #[test]
    fn test_clean_query_strips_fences() {
        assert_eq!(
            clean_query("```sql\nSELECT 1\n```").as_deref(),
            Some("SELECT 1")
        );
        assert_eq!(clean_query("```\n```"), None);
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
    }
}
