//! Error types shared by the storage layer and the agent.
//!
//! Components recover locally wherever they can; these types describe what
//! is left over once they cannot.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database '{name}' not found")]
    NotFound { name: String },

    #[error("Database file missing: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("Database name '{name}' is already registered to a different target")]
    NameConflict { name: String },

    #[error("No backend registered for {dialect} databases")]
    UnsupportedDialect { dialect: String },

    #[error("Invalid database name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("{0}")]
    Engine(#[from] duckdb::Error),

    #[error("Failed to convert result set: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::Task(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Faults that escape the query pipeline. The agent converts every one of
/// them into a failure-shaped response at its outer boundary.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Query pipeline exceeded {limit} state transitions")]
    TransitionLimit { limit: u32 },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_keep_driver_text() {
        let err = DbError::NotFound {
            name: "sales".to_string(),
        };
        assert_eq!(err.to_string(), "Database 'sales' not found");

        let err = DbError::MissingFile {
            path: PathBuf::from("/data/x/x.duckdb"),
        };
        assert!(err.to_string().contains("/data/x/x.duckdb"));
    }

    #[test]
    fn agent_error_wraps_db_error_transparently() {
        let err: AgentError = DbError::UnsupportedDialect {
            dialect: "postgresql".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "No backend registered for postgresql databases"
        );
    }
}
