//! Session use case implementation.
//!
//! `SessionUseCase` is the inbound surface of the application: it runs a
//! question through the [`Orchestrator`] with the session's history and
//! persists the resulting pair of turns, plus the plain session operations
//! (list, history, rename, delete).

use crate::workflow::Orchestrator;
use insight_core::error::{InsightError, Result};
use insight_core::llm::ProviderKind;
use insight_core::sandbox::ImageArtifact;
use insight_core::schema::SchemaDescriptor;
use insight_core::session::{Session, SessionRepository, Turn, title_from_query};
use insight_core::trace::TraceStep;
use insight_core::workflow::WorkflowError;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Reply to a submitted question.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub session_id: String,
    pub answer: String,
    pub visualizations: Vec<ImageArtifact>,
    pub trace: Vec<TraceStep>,
    pub queries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowError>,
}

/// Use case for asking questions within sessions.
///
/// # Consistency
///
/// The orchestrator never holds a session. Turns are appended only after the
/// workflow finishes, through the repository's serialized `append_turns`, so
/// a rename issued while a turn is running is kept and a cancelled turn
/// leaves no trace in storage.
pub struct SessionUseCase {
    /// Repository for session data persistence
    session_repository: Arc<dyn SessionRepository>,
    /// Shared workflow engine
    orchestrator: Arc<Orchestrator>,
}

impl SessionUseCase {
    pub fn new(session_repository: Arc<dyn SessionRepository>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            session_repository,
            orchestrator,
        }
    }

    /// Answers `query` and records the exchange.
    ///
    /// # Arguments
    ///
    /// * `session_id` - Existing session to continue; `None` starts a new
    ///   session titled after the question
    /// * `query` - The user's question
    /// * `provider` - Language model to try first
    /// * `token` - Cancels the turn; nothing is persisted once it fires
    ///
    /// # Errors
    ///
    /// Returns an error if the question is blank, the session does not exist,
    /// the turn is cancelled, or the repository fails. Workflow failures are
    /// not errors: they come back in [`SubmitResponse::error`].
    pub async fn submit_query(
        &self,
        session_id: Option<&str>,
        query: &str,
        provider: Option<ProviderKind>,
        token: &CancellationToken,
    ) -> Result<SubmitResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(InsightError::invalid_input("question must not be empty"));
        }

        let existing = match session_id {
            Some(id) => Some(self.get_session(id).await?),
            None => None,
        };
        let history = existing
            .as_ref()
            .map(|session| session.turns.as_slice())
            .unwrap_or_default();

        tracing::info!(
            "[SessionUseCase] Submitting question (session: {})",
            session_id.unwrap_or("new")
        );

        let user_turn = Turn::user(query);
        let outcome = self
            .orchestrator
            .run(query, history, provider, token)
            .await?;

        let assistant_turn = Turn::assistant(outcome.answer.clone())
            .with_trace(outcome.trace.clone())
            .with_visualizations(outcome.visualizations.clone())
            .with_error(outcome.error.clone())
            .with_queries(outcome.queries.clone());
        let turns = vec![user_turn, assistant_turn];

        let session_id = match existing {
            Some(session) => {
                self.session_repository
                    .append_turns(&session.id, turns)
                    .await?
                    .id
            }
            None => {
                let mut session = Session::new(title_from_query(query));
                session.auto_titled = true;
                session.turns = turns;
                self.session_repository.create(&session).await?;
                tracing::info!(
                    "[SessionUseCase] Created session {} ({})",
                    session.id,
                    session.title
                );
                session.id
            }
        };

        Ok(SubmitResponse {
            session_id,
            answer: outcome.answer,
            visualizations: outcome.visualizations,
            trace: outcome.trace,
            queries: outcome.queries,
            error: outcome.error,
        })
    }

    /// Lists sessions, most recently updated first.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.session_repository.list_all().await
    }

    /// Loads a session or fails with `NotFound`.
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.session_repository
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| InsightError::not_found("Session", session_id))
    }

    /// Turn history of a session, oldest first.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>> {
        Ok(self.get_session(session_id).await?.turns)
    }

    /// Renames a session. Safe while a turn for the session is running.
    pub async fn rename_session(&self, session_id: &str, title: &str) -> Result<Session> {
        let title = title.trim();
        if title.is_empty() {
            return Err(InsightError::invalid_input("title must not be empty"));
        }
        let session = self.session_repository.rename(session_id, title).await?;
        tracing::info!("[SessionUseCase] Renamed session {} to {}", session_id, title);
        Ok(session)
    }

    /// Deletes a session.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        if !self.session_repository.delete(session_id).await? {
            return Err(InsightError::not_found("Session", session_id));
        }
        tracing::info!("[SessionUseCase] Deleted session {}", session_id);
        Ok(())
    }

    /// The dataset schema, loaded once per process.
    pub fn schema(&self) -> &SchemaDescriptor {
        self.orchestrator.schema().descriptor()
    }
}
