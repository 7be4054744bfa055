pub mod backend;
pub mod duckdb_backend;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod statement;

pub use backend::{Backends, RowSet, SqlBackend};
pub use duckdb_backend::DuckDbBackend;
pub use executor::{ExecutionResult, QueryExecutor};
pub use registry::{DatabaseRegistry, DatabaseTarget, Dialect, Locator};
pub use schema::{SchemaDescriber, SchemaDescription, TableSchema};
pub use statement::{StatementKind, classify};
