//! Read-only SQLite implementation of the tabular engine.
//!
//! Every query runs on a fresh read-only connection inside `spawn_blocking`.
//! When the time budget elapses, or the caller drops the future, the statement
//! is interrupted through the connection's interrupt handle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use insight_core::query::{QueryError, Rows, TabularEngine};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use serde_json::{Number, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteEngine {
    db_path: PathBuf,
    budget: Duration,
}

impl SqliteEngine {
    /// Opens `db_path` once to verify it is a readable database.
    pub fn open(db_path: impl AsRef<Path>, budget: Duration) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let conn = connect(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view')",
                [],
                |row| row.get(0),
            )
            .with_context(|| format!("{} is not a readable SQLite database", db_path.display()))?;
        tracing::info!(path = %db_path.display(), tables, "Database opened read-only");
        Ok(Self { db_path, budget })
    }

    /// Column names of `table`, in declaration order.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let conn = connect(&self.db_path)?;
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

fn connect(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Interrupts the connection's running statement when dropped while armed.
///
/// Dropping the `execute` future mid-query drops this guard too, so a caller
/// that abandons a query still stops the blocking worker.
struct InterruptOnDrop(Option<InterruptHandle>);

impl InterruptOnDrop {
    fn new(handle: InterruptHandle) -> Self {
        Self(Some(handle))
    }

    /// The worker has finished; nothing left to interrupt.
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.interrupt();
            tracing::debug!("Running query interrupted");
        }
    }
}

#[async_trait]
impl TabularEngine for SqliteEngine {
    async fn execute(&self, query: &str, row_cap: usize) -> Result<Rows, QueryError> {
        let conn = connect(&self.db_path)
            .map_err(|e| QueryError::rejected(format!("Failed to open database: {e}")))?;
        let guard = InterruptOnDrop::new(conn.get_interrupt_handle());
        let query = query.to_string();

        let task = tokio::task::spawn_blocking(move || run_query(&conn, &query, row_cap));

        match tokio::time::timeout(self.budget, task).await {
            Ok(joined) => {
                guard.disarm();
                joined.unwrap_or_else(|join_err| {
                    Err(QueryError::rejected(format!(
                        "Query worker failed: {join_err}"
                    )))
                })
            }
            Err(_) => {
                drop(guard);
                tracing::warn!(budget_ms = self.budget.as_millis() as u64, "Query interrupted");
                Err(QueryError::timeout(self.budget))
            }
        }
    }
}

fn run_query(conn: &Connection, query: &str, row_cap: usize) -> Result<Rows, QueryError> {
    let mut stmt = conn
        .prepare(query)
        .map_err(|e| QueryError::rejected(e.to_string()))?;
    if !stmt.readonly() {
        return Err(QueryError::rejected(
            "Only read-only SELECT statements are allowed",
        ));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();
    let mut rows = stmt
        .query([])
        .map_err(|e| QueryError::rejected(e.to_string()))?;

    let mut values = Vec::new();
    while values.len() < row_cap {
        let Some(row) = rows.next().map_err(|e| QueryError::rejected(e.to_string()))? else {
            break;
        };
        let mut record = Vec::with_capacity(width);
        for idx in 0..width {
            let value = row
                .get_ref(idx)
                .map_err(|e| QueryError::rejected(e.to_string()))?;
            record.push(to_json(value));
        }
        values.push(record);
    }

    Ok(Rows::new(columns, values))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(bytes.iter().map(|b| format!("{b:02x}")).collect()),
    }
}
