use crate::db::backend::{RowSet, SqlBackend};
use crate::db::registry::{DatabaseTarget, Locator};
use crate::db::schema::{ColumnInfo, ForeignKey, TableSchema};
use crate::error::{DbError, DbResult};
use arrow::array::Array;
use arrow::json::WriterBuilder;
use arrow::json::writer::JsonArray;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use duckdb::Connection;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, warn};

const LIST_TABLES_SQL: &str = "SELECT table_name FROM information_schema.tables WHERE table_schema = 'main' AND table_type = 'BASE TABLE' ORDER BY table_name";

const COLUMNS_SQL: &str = "
    SELECT column_name, data_type, is_nullable, column_default
    FROM information_schema.columns
    WHERE table_schema = 'main' AND table_name = ?
    ORDER BY ordinal_position
";

const PRIMARY_KEY_SQL: &str = "
    SELECT UNNEST(constraint_column_names)
    FROM duckdb_constraints()
    WHERE schema_name = 'main' AND table_name = ? AND constraint_type = 'PRIMARY KEY'
";

const FOREIGN_KEY_SQL: &str = "
    SELECT UNNEST(constraint_column_names), referenced_table, UNNEST(referenced_column_names)
    FROM duckdb_constraints()
    WHERE schema_name = 'main' AND table_name = ? AND constraint_type = 'FOREIGN KEY'
";

/// Local databases stored as DuckDB files.
#[derive(Debug, Default, Clone)]
pub struct DuckDbBackend;

impl DuckDbBackend {
    pub fn new() -> Self {
        Self
    }

    fn connect(&self, target: &DatabaseTarget) -> DbResult<Connection> {
        let path = match &target.locator {
            Locator::Local { path } => path,
            Locator::External { dialect, .. } => {
                return Err(DbError::UnsupportedDialect {
                    dialect: dialect.to_string(),
                });
            }
        };

        // Connection::open would silently create a fresh database
        if !path.exists() {
            return Err(DbError::MissingFile { path: path.clone() });
        }

        debug!("Opening DuckDB database {} at {}", target.name, path.display());
        Ok(Connection::open(path)?)
    }
}

impl SqlBackend for DuckDbBackend {
    fn dialect(&self) -> &'static str {
        "DuckDB"
    }

    fn list_tables_sql(&self) -> &'static str {
        LIST_TABLES_SQL
    }

    fn create_database(&self, path: &Path) -> DbResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        drop(conn);
        Ok(())
    }

    fn select(&self, target: &DatabaseTarget, sql: &str) -> DbResult<RowSet> {
        let conn = self.connect(target)?;
        read_rows(&conn, sql)
    }

    fn modify(&self, target: &DatabaseTarget, sql: &str) -> DbResult<u64> {
        let conn = self.connect(target)?;
        // DuckDB connections auto-commit each statement
        let affected = conn.execute(sql, [])?;
        Ok(affected as u64)
    }

    fn introspect(
        &self,
        target: &DatabaseTarget,
        table_filter: Option<&[String]>,
        sample_rows: usize,
    ) -> DbResult<Vec<TableSchema>> {
        let conn = self.connect(target)?;

        let mut stmt = conn.prepare(LIST_TABLES_SQL)?;
        let mut tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(Result::ok)
            .collect();

        if let Some(filter) = table_filter {
            tables.retain(|table| filter.iter().any(|wanted| wanted.eq_ignore_ascii_case(table)));
        }

        debug!("Found {} tables in database {}", tables.len(), target.name);

        tables
            .into_iter()
            .map(|table| describe_table(&conn, table, sample_rows))
            .collect()
    }
}

fn describe_table(conn: &Connection, name: String, sample_rows: usize) -> DbResult<TableSchema> {
    let primary_keys = primary_key_columns(conn, &name);

    let mut stmt = conn.prepare(COLUMNS_SQL)?;
    let columns: Vec<ColumnInfo> = stmt
        .query_map([name.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)? == "YES",
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .filter_map(Result::ok)
        .map(|(column, data_type, nullable, default)| ColumnInfo {
            primary_key: primary_keys.contains(&column),
            name: column,
            data_type,
            nullable,
            default,
        })
        .collect();

    let foreign_keys = foreign_keys(conn, &name);

    let sample = if sample_rows == 0 {
        RowSet::default()
    } else {
        let sql = format!("SELECT * FROM {} LIMIT {}", quote_ident(&name), sample_rows);
        match read_rows(conn, &sql) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Could not retrieve sample data for {}: {}", name, e);
                RowSet::default()
            }
        }
    };

    Ok(TableSchema {
        name,
        columns,
        foreign_keys,
        sample,
    })
}

fn primary_key_columns(conn: &Connection, table: &str) -> Vec<String> {
    let result = conn.prepare(PRIMARY_KEY_SQL).and_then(|mut stmt| {
        let columns = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .filter_map(Result::ok)
            .collect::<Vec<_>>();
        Ok(columns)
    });

    result.unwrap_or_else(|e| {
        debug!("Primary key lookup failed for {}: {}", table, e);
        Vec::new()
    })
}

fn foreign_keys(conn: &Connection, table: &str) -> Vec<ForeignKey> {
    let result = conn.prepare(FOREIGN_KEY_SQL).and_then(|mut stmt| {
        let keys = stmt
            .query_map([table], |row| {
                Ok(ForeignKey {
                    column: row.get(0)?,
                    references_table: row.get(1)?,
                    references_column: row.get(2)?,
                })
            })?
            .filter_map(Result::ok)
            .collect::<Vec<_>>();
        Ok(keys)
    });

    result.unwrap_or_else(|e| {
        debug!("Foreign key lookup failed for {}: {}", table, e);
        Vec::new()
    })
}

fn read_rows(conn: &Connection, sql: &str) -> DbResult<RowSet> {
    let mut stmt = conn.prepare(sql)?;
    let result = stmt.query_arrow([])?;
    let schema = result.get_schema();

    let columns = schema
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect::<Vec<String>>();

    let batches: Vec<RecordBatch> = result.collect();
    let rows = match json_rows(&columns, &batches) {
        Ok(rows) => rows,
        Err(e) => {
            // Types without a JSON encoding still have a display form
            debug!("Falling back to display formatting: {}", e);
            display_rows(&batches)?
        }
    };

    Ok(RowSet { columns, rows })
}

fn json_rows(columns: &[String], batches: &[RecordBatch]) -> DbResult<Vec<Vec<Value>>> {
    if batches.iter().all(|batch| batch.num_rows() == 0) {
        return Ok(Vec::new());
    }

    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer.write_batches(&refs)?;
    writer.finish()?;

    let records: Vec<Map<String, Value>> = serde_json::from_slice(&writer.into_inner())?;
    Ok(records
        .into_iter()
        .map(|record| {
            columns
                .iter()
                .map(|column| record.get(column).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect())
}

fn display_rows(batches: &[RecordBatch]) -> DbResult<Vec<Vec<Value>>> {
    let options = FormatOptions::default();
    let mut rows = Vec::new();

    for batch in batches {
        let formatters = batch
            .columns()
            .iter()
            .map(|array| ArrayFormatter::try_new(array.as_ref(), &options))
            .collect::<Result<Vec<_>, _>>()?;

        for row in 0..batch.num_rows() {
            let values = formatters
                .iter()
                .enumerate()
                .map(|(i, formatter)| {
                    if batch.column(i).is_null(row) {
                        Value::Null
                    } else {
                        Value::String(formatter.value(row).to_string())
                    }
                })
                .collect();
            rows.push(values);
        }
    }

    Ok(rows)
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
