use crate::db::backend::{Backends, RowSet};
use crate::db::registry::DatabaseTarget;
use crate::db::statement::{StatementKind, classify};
use crate::error::DbResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of running one statement. Exactly one shape is ever populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionResult {
    Select {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        row_count: usize,
    },
    Modification {
        rows_affected: u64,
        message: String,
    },
    Failure {
        error: String,
    },
}

impl ExecutionResult {
    pub fn from_rows(rows: RowSet) -> Self {
        ExecutionResult::Select {
            row_count: rows.rows.len(),
            columns: rows.columns,
            rows: rows.rows,
        }
    }

    pub fn modification(rows_affected: u64) -> Self {
        ExecutionResult::Modification {
            rows_affected,
            message: format!(
                "Query executed successfully. Rows affected: {}",
                rows_affected
            ),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ExecutionResult::Failure {
            error: error.into(),
        }
    }

    pub fn success(&self) -> bool {
        !matches!(self, ExecutionResult::Failure { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionResult::Failure { error } => Some(error),
            _ => None,
        }
    }

    pub fn row_count(&self) -> Option<usize> {
        match self {
            ExecutionResult::Select { row_count, .. } => Some(*row_count),
            _ => None,
        }
    }
}

/// Runs statements against named databases.
#[derive(Clone)]
pub struct QueryExecutor {
    backends: Arc<Backends>,
}

impl QueryExecutor {
    pub fn new(backends: Arc<Backends>) -> Self {
        Self { backends }
    }

    /// Execute `sql` on `target`. Driver errors come back as
    /// [`ExecutionResult::Failure`] carrying the driver's message.
    pub async fn execute(&self, target: &DatabaseTarget, sql: &str) -> ExecutionResult {
        let kind = classify(sql);
        debug!(database = %target.name, ?kind, "Executing SQL: {}", sql);

        match self.run(target.clone(), sql.to_string(), kind).await {
            Ok(result) => result,
            Err(e) => {
                warn!(database = %target.name, error = %e, "Query execution failed");
                ExecutionResult::failure(e.to_string())
            }
        }
    }

    async fn run(
        &self,
        target: DatabaseTarget,
        sql: String,
        kind: StatementKind,
    ) -> DbResult<ExecutionResult> {
        let backend = self.backends.for_target(&target)?;

        let result = tokio::task::spawn_blocking(move || -> DbResult<ExecutionResult> {
            match kind {
                StatementKind::Read => Ok(ExecutionResult::from_rows(backend.select(&target, &sql)?)),
                StatementKind::Write => Ok(ExecutionResult::modification(backend.modify(&target, &sql)?)),
            }
        })
        .await??;

        Ok(result)
    }
}
