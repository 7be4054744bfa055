use crate::db::registry::{DatabaseTarget, Dialect, Locator};
use crate::db::schema::TableSchema;
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A storage engine that can be addressed through a textual SQL dialect.
///
/// Every call opens its own connection and closes it before returning, so a
/// database file replaced or deleted between calls never leaves a stale
/// handle behind.
pub trait SqlBackend: Send + Sync {
    /// Human readable dialect name, embedded into generation prompts.
    fn dialect(&self) -> &'static str;

    /// Query listing the user tables of a database, used as the degraded
    /// answer when the language model is unavailable.
    fn list_tables_sql(&self) -> &'static str;

    /// Create an empty database at `path`.
    fn create_database(&self, path: &Path) -> DbResult<()>;

    /// Run a read statement and fetch every row eagerly.
    fn select(&self, target: &DatabaseTarget, sql: &str) -> DbResult<RowSet>;

    /// Run a write statement, commit it and report the affected-row count.
    fn modify(&self, target: &DatabaseTarget, sql: &str) -> DbResult<u64>;

    /// Describe the user tables of a database. Names in `table_filter` that
    /// do not exist are skipped.
    fn introspect(
        &self,
        target: &DatabaseTarget,
        table_filter: Option<&[String]>,
        sample_rows: usize,
    ) -> DbResult<Vec<TableSchema>>;
}

/// Rows returned by a read statement, in result-set column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render at most `limit` rows as a markdown table.
    pub fn to_markdown(&self, limit: usize) -> String {
        let mut out = String::new();
        if self.columns.is_empty() {
            return out;
        }

        out.push_str("| ");
        out.push_str(&self.columns.join(" | "));
        out.push_str(" |\n|");
        for _ in &self.columns {
            out.push_str(" --- |");
        }
        out.push('\n');

        for row in self.rows.iter().take(limit) {
            let cells: Vec<String> = row.iter().map(format_cell).collect();
            out.push_str("| ");
            out.push_str(&cells.join(" | "));
            out.push_str(" |\n");
        }
        out
    }
}

pub fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Picks the backend serving a given database target.
pub struct Backends {
    local: Arc<dyn SqlBackend>,
    external: HashMap<Dialect, Arc<dyn SqlBackend>>,
}

impl Backends {
    pub fn new(local: Arc<dyn SqlBackend>) -> Self {
        Self {
            local,
            external: HashMap::new(),
        }
    }

    /// Serve external targets of `dialect` with `backend`.
    pub fn with_external(mut self, dialect: Dialect, backend: Arc<dyn SqlBackend>) -> Self {
        self.external.insert(dialect, backend);
        self
    }

    pub fn local(&self) -> &Arc<dyn SqlBackend> {
        &self.local
    }

    pub fn for_target(&self, target: &DatabaseTarget) -> DbResult<Arc<dyn SqlBackend>> {
        match &target.locator {
            Locator::Local { .. } => Ok(Arc::clone(&self.local)),
            Locator::External { dialect, .. } => self
                .external
                .get(dialect)
                .cloned()
                .ok_or_else(|| DbError::UnsupportedDialect {
                    dialect: dialect.to_string(),
                }),
        }
    }
}
