//! Turn-scoped execution plan.

use crate::query::Rows;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Succeeded,
    Failed,
}

/// One independently retryable query unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub description: String,
    /// Current candidate query, replaced on repair.
    pub query: Option<String>,
    pub status: StepStatus,
    pub retry_count: u32,
    pub result: Option<Rows>,
    pub last_error: Option<String>,
    /// Set when the step failed with its repair budget spent.
    #[serde(default)]
    pub exhausted: bool,
}

impl Step {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            query: None,
            status: StepStatus::Pending,
            retry_count: 0,
            result: None,
            last_error: None,
            exhausted: false,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        if !query.trim().is_empty() {
            self.query = Some(query);
        }
        self
    }

    pub fn succeed(&mut self, rows: Rows) {
        self.result = Some(rows);
        self.status = StepStatus::Succeeded;
    }

    /// Marks the step terminally failed.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.result = None;
        self.status = StepStatus::Failed;
    }

    /// Consumes one repair attempt. Returns `false` once `max_retries` is spent,
    /// leaving `retry_count` unchanged.
    pub fn try_consume_retry(&mut self, max_retries: u32) -> bool {
        if self.retry_count >= max_retries {
            return false;
        }
        self.retry_count += 1;
        true
    }

    /// Marks the step terminally failed after its last repair attempt.
    pub fn exhaust(&mut self, reason: impl Into<String>) {
        self.fail(reason);
        self.exhausted = true;
    }
}

/// Ordered steps plus a cursor. Created per question, never persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub steps: Vec<Step>,
    pub cursor: usize,
    pub reasoning: String,
}

impl ExecutionPlan {
    pub fn new(steps: Vec<Step>, reasoning: impl Into<String>) -> Self {
        Self {
            steps,
            cursor: 0,
            reasoning: reasoning.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    pub fn current_mut(&mut self) -> Option<&mut Step> {
        self.steps.get_mut(self.cursor)
    }

    /// 1-based number of the step under the cursor.
    pub fn current_number(&self) -> usize {
        self.cursor + 1
    }

    /// Whether a pending step follows the cursor.
    pub fn has_next(&self) -> bool {
        self.steps
            .iter()
            .skip(self.cursor + 1)
            .any(|s| s.status == StepStatus::Pending)
    }

    /// Moves the cursor to the next pending step.
    pub fn advance(&mut self) -> bool {
        match self
            .steps
            .iter()
            .enumerate()
            .skip(self.cursor + 1)
            .find(|(_, s)| s.status == StepStatus::Pending)
        {
            Some((idx, _)) => {
                self.cursor = idx;
                true
            }
            None => false,
        }
    }

    /// Succeeded steps with their 1-based numbers.
    pub fn succeeded(&self) -> impl Iterator<Item = (usize, &Step)> {
        self.numbered(StepStatus::Succeeded)
    }

    /// Failed steps with their 1-based numbers.
    pub fn failed(&self) -> impl Iterator<Item = (usize, &Step)> {
        self.numbered(StepStatus::Failed)
    }

    pub fn all_failed(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.status == StepStatus::Failed)
    }

    /// First step that failed by running out of repairs.
    pub fn first_exhausted(&self) -> Option<(usize, &Step)> {
        self.failed().find(|(_, step)| step.exhausted)
    }

    /// Executed query strings in plan order.
    pub fn executed_queries(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .filter_map(|s| s.query.clone())
            .collect()
    }

    fn numbered(&self, status: StepStatus) -> impl Iterator<Item = (usize, &Step)> {
        self.steps
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.status == status)
            .map(|(idx, s)| (idx + 1, s))
    }
}
