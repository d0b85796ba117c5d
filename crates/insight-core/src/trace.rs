//! Execution trace of a single turn.
//!
//! The recorder is owned by the task running the turn and handed out as
//! `&mut`, so entries are appended by exactly one writer in call order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Category of a trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TraceKind {
    Prompt,
    Response,
    Sql,
    Error,
    Info,
}

/// One timestamped trace entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TraceKind,
    pub text: String,
    /// Full text sent to a language model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Full text received from a language model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// Append-only trace log.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    steps: Vec<TraceStep>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.push(TraceKind::Info, text.into(), None, None);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(TraceKind::Error, text.into(), None, None);
    }

    /// Records a query string about to be executed.
    pub fn sql(&mut self, text: impl Into<String>, query: impl Into<String>) {
        self.push(TraceKind::Sql, text.into(), Some(query.into()), None);
    }

    pub fn prompt(&mut self, text: impl Into<String>, prompt: impl Into<String>) {
        self.push(TraceKind::Prompt, text.into(), Some(prompt.into()), None);
    }

    pub fn response(&mut self, text: impl Into<String>, response: Option<String>) {
        self.push(TraceKind::Response, text.into(), None, response);
    }

    pub fn count(&self, kind: TraceKind) -> usize {
        self.steps.iter().filter(|s| s.kind == kind).count()
    }

    pub fn into_steps(self) -> Vec<TraceStep> {
        self.steps
    }

    fn push(
        &mut self,
        kind: TraceKind,
        text: String,
        prompt: Option<String>,
        response: Option<String>,
    ) {
        // Wall clock may step backwards; entries must stay ordered.
        let now = Utc::now();
        let timestamp = match self.steps.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.steps.push(TraceStep {
            timestamp,
            kind,
            text,
            prompt,
            response,
        });
    }
}
