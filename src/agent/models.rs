use crate::db::executor::ExecutionResult;
use serde::Serialize;

/// Answer to one natural-language question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub question: String,
    pub sql_query: String,
    pub query_result: ExecutionResult,
    pub explanation: String,
    pub success: bool,
    pub rate_limited: bool,
    pub database_used: Option<String>,
    pub databases_considered: Vec<String>,
}

impl QueryResponse {
    /// The response for a fault nothing downstream could recover from.
    /// `rate_limited` mirrors the session flag at the time of the fault.
    pub fn internal_error(
        question: &str,
        error: impl std::fmt::Display,
        rate_limited: bool,
    ) -> Self {
        let message = error.to_string();
        Self {
            question: question.to_string(),
            sql_query: String::new(),
            explanation: format!(
                "An error occurred while processing your question: {}",
                message
            ),
            query_result: ExecutionResult::failure(message),
            success: false,
            rate_limited,
            database_used: None,
            databases_considered: Vec::new(),
        }
    }
}

/// Working record of one question moving through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct QueryAttempt {
    pub question: String,
    pub sql: String,
    pub outcome: Option<ExecutionResult>,
    /// Failure of the latest generation or execution, cleared on regenerate.
    pub error: Option<String>,
    pub retry_count: u32,
}

impl QueryAttempt {
    pub fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            ..Self::default()
        }
    }
}
