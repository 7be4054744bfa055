use crate::db::backend::RowSet;
use crate::db::executor::ExecutionResult;
use crate::llm::LanguageModel;
use std::sync::Arc;
use tracing::{debug, warn};

pub const RATE_LIMIT_PLACEHOLDER: &str = "API rate limit reached. The query executed successfully, but detailed explanation is temporarily unavailable. Please wait a moment and try again for AI insights.";

#[derive(Debug, Clone, PartialEq)]
pub enum Explanation {
    Text(String),
    /// Quota hit, or already flagged; holds the placeholder text.
    RateLimited(String),
}

impl Explanation {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Explanation::RateLimited(_))
    }

    pub fn into_text(self) -> String {
        match self {
            Explanation::Text(text) | Explanation::RateLimited(text) => text,
        }
    }
}

/// The inputs an explanation is written about.
pub struct ExplanationRequest<'a> {
    pub question: &'a str,
    pub sql: &'a str,
    pub result: &'a ExecutionResult,
    pub schema: &'a str,
}

pub struct ExplanationGenerator {
    model: Arc<dyn LanguageModel>,
    preview_rows: usize,
}

impl ExplanationGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, preview_rows: usize) -> Self {
        Self {
            model,
            preview_rows,
        }
    }

    pub fn set_model(&mut self, model: Arc<dyn LanguageModel>) {
        self.model = model;
    }

    /// Explain a final result. Failures are reported as-is, and the model is
    /// not consulted at all while `rate_limited` is set.
    pub async fn explain(&self, request: &ExplanationRequest<'_>, rate_limited: bool) -> Explanation {
        if let ExecutionResult::Failure { error } = request.result {
            return Explanation::Text(format!("Query failed with error: {}", error));
        }

        if rate_limited {
            return Explanation::RateLimited(RATE_LIMIT_PLACEHOLDER.to_string());
        }

        let prompt = self.prepare_prompt(request);
        debug!("Prepared explanation prompt: {}", prompt);

        match self.model.complete(&prompt).await {
            Ok(text) => Explanation::Text(text.trim().to_string()),
            Err(e) if e.is_rate_limit() => {
                warn!(error = %e, "Language model rate limited during explanation");
                Explanation::RateLimited(RATE_LIMIT_PLACEHOLDER.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Explanation generation failed");
                Explanation::Text(format!("Error generating explanation: {}", e))
            }
        }
    }

    fn prepare_prompt(&self, request: &ExplanationRequest<'_>) -> String {
        let summary = match request.result {
            ExecutionResult::Select { columns, rows, row_count } => {
                let preview = if rows.is_empty() {
                    "No data returned".to_string()
                } else {
                    RowSet {
                        columns: columns.clone(),
                        rows: rows.clone(),
                    }
                    .to_markdown(self.preview_rows)
                };
                format!(
                    "Query Results Summary:\n- Rows returned: {}\n- Columns: {}\n\nFirst few results:\n{}",
                    row_count,
                    columns.join(", "),
                    preview
                )
            }
            ExecutionResult::Modification { message, .. } => message.clone(),
            ExecutionResult::Failure { error } => format!("Query failed: {}", error),
        };

        format!(
            r#"You are an expert data analyst. Provide a clear, comprehensive explanation of the SQL query and its results.

Database Schema Context:
{schema}

User Question: {question}

SQL Query Generated:
{sql}

{summary}

Please provide:
1. A brief explanation of what the SQL query does
2. Analysis of the results (key insights, patterns, notable findings)
3. Answer to the original user question in plain English
4. Any recommendations or additional insights based on the data

Keep the explanation clear, informative, and user-friendly."#,
            schema = request.schema,
            question = request.question,
            sql = request.sql,
            summary = summary,
        )
    }
}
