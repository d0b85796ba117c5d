//! Query execution contracts.
//!
//! [`TabularEngine`] is the external engine; [`QueryExecutionAdapter`] wraps it
//! with the time and row limits from configuration and turns every overrun into
//! a [`QueryError`] the orchestrator can feed back to the model.

use crate::config::QueryConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result set of one query, columns in engine order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rows {
    pub columns: Vec<String>,
    pub values: Vec<Vec<Value>>,
}

impl Rows {
    pub fn new(columns: Vec<String>, values: Vec<Vec<Value>>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Rows as JSON objects keyed by column name.
    pub fn records(&self) -> Vec<Value> {
        self.values
            .iter()
            .map(|row| {
                let mut object = Map::new();
                for (column, value) in self.columns.iter().zip(row) {
                    object.insert(column.clone(), value.clone());
                }
                Value::Object(object)
            })
            .collect()
    }

    /// First `limit` rows as JSON objects.
    pub fn sample(&self, limit: usize) -> Vec<Value> {
        let mut records = self.records();
        records.truncate(limit);
        records
    }

    /// Columns whose non-null values are all numbers (and not all null).
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| {
                let mut seen = false;
                for row in &self.values {
                    match row.get(*idx) {
                        Some(Value::Number(_)) => seen = true,
                        Some(Value::Null) | None => {}
                        Some(_) => return false,
                    }
                }
                seen
            })
            .map(|(_, name)| name.as_str())
            .collect()
    }

    /// Minimum and maximum of a numeric column.
    pub fn numeric_range(&self, column: &str) -> Option<(f64, f64)> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values
            .iter()
            .filter_map(|row| row.get(idx).and_then(Value::as_f64))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// More than one data point, with a numeric measure next to another column.
    pub fn is_chart_worthy(&self) -> bool {
        self.len() > 1 && self.columns.len() >= 2 && !self.numeric_columns().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorKind {
    /// The engine rejected or failed the query.
    Rejected,
    Timeout,
    RowLimitExceeded,
}

/// Structured execution failure, always repairable from the orchestrator's view.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// Engine diagnostic, passed verbatim to the repair prompt.
    pub message: String,
}

impl QueryError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self {
            kind: QueryErrorKind::Timeout,
            message: format!(
                "Query exceeded the {} ms execution limit; simplify it or aggregate earlier",
                limit.as_millis()
            ),
        }
    }

    pub fn row_limit(max_rows: usize) -> Self {
        Self {
            kind: QueryErrorKind::RowLimitExceeded,
            message: format!(
                "Query returned more than {max_rows} rows; aggregate the data or add a LIMIT clause"
            ),
        }
    }
}

/// The external tabular engine.
#[async_trait]
pub trait TabularEngine: Send + Sync {
    /// Executes `query` verbatim, returning at most `row_cap` rows.
    async fn execute(&self, query: &str, row_cap: usize) -> Result<Rows, QueryError>;
}

/// Limits enforced around every engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub timeout: Duration,
    pub max_rows: usize,
}

impl From<&QueryConfig> for QueryLimits {
    fn from(config: &QueryConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_rows: config.max_rows,
        }
    }
}

/// Passes query strings to the engine under configured limits.
#[derive(Clone)]
pub struct QueryExecutionAdapter {
    engine: Arc<dyn TabularEngine>,
    limits: QueryLimits,
}

impl QueryExecutionAdapter {
    pub fn new(engine: Arc<dyn TabularEngine>, limits: QueryLimits) -> Self {
        Self { engine, limits }
    }

    /// Runs `query` without rewriting it.
    pub async fn run(&self, query: &str) -> Result<Rows, QueryError> {
        let row_cap = self.limits.max_rows.saturating_add(1);
        let rows = tokio::time::timeout(self.limits.timeout, self.engine.execute(query, row_cap))
            .await
            .map_err(|_| QueryError::timeout(self.limits.timeout))??;

        if rows.len() > self.limits.max_rows {
            return Err(QueryError::row_limit(self.limits.max_rows));
        }

        tracing::debug!(rows = rows.len(), columns = rows.columns.len(), "query executed");
        Ok(rows)
    }
}
