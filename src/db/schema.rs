use crate::db::backend::{Backends, RowSet};
use crate::db::registry::DatabaseTarget;
use crate::error::DbResult;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

impl ColumnInfo {
    fn constraints(&self) -> Vec<String> {
        let mut constraints = Vec::new();
        if self.primary_key {
            constraints.push("PRIMARY KEY".to_string());
        }
        if !self.nullable {
            constraints.push("NOT NULL".to_string());
        }
        if let Some(default) = &self.default {
            constraints.push(format!("DEFAULT {}", default));
        }
        constraints
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKey>,
    pub sample: RowSet,
}

/// Snapshot of a database's structure, taken when it was described.
///
/// A description never fails to exist: when introspection breaks, `error`
/// carries the reason and `tables` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub database: String,
    pub tables: Vec<TableSchema>,
    pub filtered: bool,
    pub error: Option<String>,
}

impl SchemaDescription {
    pub fn failed(database: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            tables: Vec::new(),
            filtered: false,
            error: Some(error.into()),
        }
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Prompt-ready text for this database.
    pub fn render(&self) -> String {
        if let Some(error) = &self.error {
            return format!("Error getting schema: {}", error);
        }

        let mut out = if self.filtered {
            format!("DATABASE SCHEMA (FILTERED): {}\n\n", self.database)
        } else {
            format!("DATABASE SCHEMA: {}\n\n", self.database)
        };

        if self.tables.is_empty() {
            out.push_str("No tables found in this database.\n");
            return out;
        }

        for table in &self.tables {
            render_table(&mut out, &table.name, table);
        }
        out
    }
}

/// Text for several databases at once, table names qualified by database.
pub fn render_combined(descriptions: &[SchemaDescription]) -> String {
    let mut out = String::from("MULTI-DATABASE SCHEMA:\n\n");

    for description in descriptions {
        let _ = writeln!(out, "=== DATABASE: {} ===", description.database);
        if let Some(error) = &description.error {
            let _ = writeln!(out, "Error getting schema: {}\n", error);
            continue;
        }
        if description.tables.is_empty() {
            out.push_str("No tables found in this database.\n\n");
            continue;
        }
        for table in &description.tables {
            let qualified = format!("{}.{}", description.database, table.name);
            render_table(&mut out, &qualified, table);
        }
    }
    out
}

fn render_table(out: &mut String, label: &str, table: &TableSchema) {
    let _ = writeln!(out, "Table: {}", label);
    for column in &table.columns {
        let constraints = column.constraints();
        if constraints.is_empty() {
            let _ = writeln!(out, "  - {}: {}", column.name, column.data_type);
        } else {
            let _ = writeln!(
                out,
                "  - {}: {} ({})",
                column.name,
                column.data_type,
                constraints.join(", ")
            );
        }
    }

    if !table.foreign_keys.is_empty() {
        out.push_str("  Foreign keys:\n");
        for fk in &table.foreign_keys {
            let _ = writeln!(
                out,
                "  - {} -> {}({})",
                fk.column, fk.references_table, fk.references_column
            );
        }
    }

    if !table.sample.is_empty() {
        out.push_str("  Sample data:\n");
        out.push_str(&table.sample.to_markdown(table.sample.len()));
    }
    out.push('\n');
}

/// Produces schema descriptions off the async runtime.
#[derive(Clone)]
pub struct SchemaDescriber {
    backends: Arc<Backends>,
    sample_rows: usize,
}

impl SchemaDescriber {
    pub fn new(backends: Arc<Backends>, sample_rows: usize) -> Self {
        Self {
            backends,
            sample_rows,
        }
    }

    pub fn sample_rows(&self) -> usize {
        self.sample_rows
    }

    /// Describe `target`, optionally restricted to `table_filter`.
    /// Never fails; problems are folded into the returned description.
    pub async fn describe(
        &self,
        target: &DatabaseTarget,
        table_filter: Option<&[String]>,
    ) -> SchemaDescription {
        self.describe_with_samples(target, table_filter, self.sample_rows)
            .await
    }

    pub async fn describe_with_samples(
        &self,
        target: &DatabaseTarget,
        table_filter: Option<&[String]>,
        sample_rows: usize,
    ) -> SchemaDescription {
        let filter = table_filter.map(|names| names.to_vec());
        let filtered = filter.is_some();

        match self.introspect(target.clone(), filter, sample_rows).await {
            Ok(tables) => {
                debug!(
                    database = %target.name,
                    tables = tables.len(),
                    filtered,
                    "Described database schema"
                );
                SchemaDescription {
                    database: target.name.clone(),
                    tables,
                    filtered,
                    error: None,
                }
            }
            Err(e) => {
                warn!(database = %target.name, error = %e, "Schema description failed");
                SchemaDescription::failed(target.name.clone(), e.to_string())
            }
        }
    }

    async fn introspect(
        &self,
        target: DatabaseTarget,
        filter: Option<Vec<String>>,
        sample_rows: usize,
    ) -> DbResult<Vec<TableSchema>> {
        let backend = self.backends.for_target(&target)?;
        let tables = tokio::task::spawn_blocking(move || {
            backend.introspect(&target, filter.as_deref(), sample_rows)
        })
        .await??;
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::backend::SqlBackend;
    use crate::db::duckdb_backend::DuckDbBackend;
    use serde_json::json;
    use tempfile::TempDir;

    fn customers() -> TableSchema {
        TableSchema {
            name: "customers".to_string(),
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    data_type: "INTEGER".to_string(),
                    nullable: false,
                    default: None,
                    primary_key: true,
                },
                ColumnInfo {
                    name: "city".to_string(),
                    data_type: "VARCHAR".to_string(),
                    nullable: true,
                    default: Some("'Oslo'".to_string()),
                    primary_key: false,
                },
            ],
            foreign_keys: vec![ForeignKey {
                column: "region_id".to_string(),
                references_table: "regions".to_string(),
                references_column: "id".to_string(),
            }],
            sample: RowSet {
                columns: vec!["id".to_string(), "city".to_string()],
                rows: vec![vec![json!(1), json!("Bergen")]],
            },
        }
    }

    #[test]
    fn render_lists_constraints_keys_and_samples() {
        let description = SchemaDescription {
            database: "main".to_string(),
            tables: vec![customers()],
            filtered: false,
            error: None,
        };

        let text = description.render();
        assert!(text.starts_with("DATABASE SCHEMA: main"));
        assert!(text.contains("Table: customers"));
        assert!(text.contains("  - id: INTEGER (PRIMARY KEY, NOT NULL)"));
        assert!(text.contains("  - city: VARCHAR (DEFAULT 'Oslo')"));
        assert!(text.contains("  - region_id -> regions(id)"));
        assert!(text.contains("| 1 | Bergen |"));
    }

    #[test]
    fn render_marks_filtered_and_empty_descriptions() {
        let description = SchemaDescription {
            database: "main".to_string(),
            tables: Vec::new(),
            filtered: true,
            error: None,
        };
        let text = description.render();
        assert!(text.starts_with("DATABASE SCHEMA (FILTERED): main"));
        assert!(text.contains("No tables found in this database."));

        let failed = SchemaDescription::failed("gone", "file missing");
        assert_eq!(failed.render(), "Error getting schema: file missing");
    }

    #[test]
    fn combined_rendering_qualifies_table_names() {
        let text = render_combined(&[
            SchemaDescription {
                database: "main".to_string(),
                tables: vec![customers()],
                filtered: false,
                error: None,
            },
            SchemaDescription::failed("quakes", "boom"),
        ]);

        assert!(text.starts_with("MULTI-DATABASE SCHEMA:"));
        assert!(text.contains("Table: main.customers"));
        assert!(text.contains("=== DATABASE: quakes ==="));
        assert!(text.contains("Error getting schema: boom"));
    }

    #[tokio::test]
    async fn unknown_filter_names_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main").join("main.duckdb");
        let backend = DuckDbBackend::new();
        backend.create_database(&path).unwrap();
        let target = DatabaseTarget::local("main", path);
        backend
            .modify(&target, "CREATE TABLE orders (id INTEGER)")
            .unwrap();

        let describer = SchemaDescriber::new(Arc::new(Backends::new(Arc::new(backend))), 3);
        let filter = vec!["ORDERS".to_string(), "no_such_table".to_string()];
        let description = describer.describe(&target, Some(&filter)).await;

        assert!(description.error.is_none());
        assert!(description.filtered);
        assert_eq!(description.table_names(), vec!["orders"]);

        let only_missing = vec!["no_such_table".to_string()];
        let description = describer.describe(&target, Some(&only_missing)).await;
        assert!(description.error.is_none());
        assert!(description.tables.is_empty());
    }

    #[tokio::test]
    async fn missing_database_degrades_to_error_description() {
        let dir = TempDir::new().unwrap();
        let target = DatabaseTarget::local("gone", dir.path().join("gone/gone.duckdb"));
        let describer =
            SchemaDescriber::new(Arc::new(Backends::new(Arc::new(DuckDbBackend::new()))), 3);

        let description = describer.describe(&target, None).await;
        assert!(description.is_error());
        assert!(description.render().starts_with("Error getting schema:"));
    }
}
