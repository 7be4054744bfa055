use crate::llm::LanguageModel;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SQL_KEYWORDS: [&str; 8] = [
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP",
];

/// What the generator produced for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Sql(String),
    /// The model call failed for a reason other than quota.
    Failed(String),
    /// The model refused on quota; `fallback_sql` lists the available tables.
    RateLimited { fallback_sql: String },
}

/// The failing statement and its error, fed back on a retry.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub failed_sql: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub question: &'a str,
    pub schema: &'a str,
    pub dialect: &'a str,
    pub fallback_sql: &'a str,
    pub error_context: Option<ErrorContext>,
}

pub struct QueryGenerator {
    model: Arc<dyn LanguageModel>,
    table_hints: BTreeMap<String, String>,
}

impl QueryGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, table_hints: BTreeMap<String, String>) -> Self {
        Self { model, table_hints }
    }

    pub fn set_model(&mut self, model: Arc<dyn LanguageModel>) {
        self.model = model;
    }

    pub async fn generate(&self, request: &GenerationRequest<'_>) -> Generation {
        let prompt = self.prepare_prompt(request);
        debug!("Prepared SQL generation prompt: {}", prompt);

        match self.model.complete(&prompt).await {
            Ok(response) => {
                let sql = strip_code_fences(&response);
                if sql.is_empty() {
                    warn!("Language model returned no SQL");
                    Generation::Failed("Failed to extract valid SQL from response".to_string())
                } else {
                    info!("Generated SQL: {}", sql);
                    Generation::Sql(sql)
                }
            }
            Err(e) if e.is_rate_limit() => {
                warn!(error = %e, "Language model rate limited, using fallback query");
                Generation::RateLimited {
                    fallback_sql: request.fallback_sql.to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "SQL generation failed");
                Generation::Failed(e.to_string())
            }
        }
    }

    fn prepare_prompt(&self, request: &GenerationRequest<'_>) -> String {
        let mut prompt = format!(
            r#"You are an expert SQL query generator.

Given the following database schema, generate a SQL query to answer the user's question.

{schema}

IMPORTANT RULES:
1. Only generate valid {dialect} SQL queries
2. Use proper table and column names from the schema
3. Include appropriate WHERE clauses, JOINs, and aggregations as needed
4. Return ONLY the SQL query, no explanations or markdown formatting
5. Ensure the query is safe and does not modify data unless explicitly requested
6. Quote identifiers that contain spaces or special characters with double quotes
7. PAY CLOSE ATTENTION to table names and their purpose, and choose the table that matches what the user is asking about
"#,
            schema = request.schema,
            dialect = request.dialect,
        );

        if !self.table_hints.is_empty() {
            prompt.push_str("\nTABLE SELECTION EXAMPLES:\n");
            for (vocabulary, table) in &self.table_hints {
                let _ = writeln!(prompt, "- \"{}\" -> USE {}", vocabulary, table);
            }
        }

        match &request.error_context {
            Some(context) => {
                let _ = write!(
                    prompt,
                    "\nThe previous SQL query failed with error: {}\n\nOriginal query: {}\n\nPlease generate a corrected SQL query for: {}\n\nSQL Query:",
                    context.error, context.failed_sql, request.question
                );
            }
            None => {
                let _ = write!(prompt, "\nUser Question: {}\n\nSQL Query:", request.question);
            }
        }

        prompt
    }
}

/// Pull the SQL statement out of a model response that may wrap it in
/// markdown fences or surround it with prose.
pub fn strip_code_fences(content: &str) -> String {
    let content = content.trim();

    if let Some(start) = content.find("```") {
        let after = &content[start + 3..];
        // Skip a language tag such as ```sql
        let body = match after.find('\n') {
            Some(newline) if is_language_tag(&after[..newline]) => &after[newline + 1..],
            _ => after,
        };
        let body = body.split("```").next().unwrap_or(body);
        return body.trim().to_string();
    }

    // Prose with a statement somewhere inside: start at the first SQL line
    let lines: Vec<&str> = content.lines().collect();
    let is_sql_line = |line: &str| {
        let upper = line.trim_start().to_uppercase();
        SQL_KEYWORDS.iter().any(|kw| upper.starts_with(kw))
    };

    match lines.iter().position(|line| is_sql_line(line)) {
        Some(0) | None => content.to_string(),
        Some(first) => lines[first..].join("\n").trim().to_string(),
    }
}

fn is_language_tag(line: &str) -> bool {
    let tag = line.trim();
    tag.chars().all(|c| c.is_ascii_alphanumeric())
        && !SQL_KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl Canned {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn err(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for Canned {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(LlmError::Connection)
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn request(error_context: Option<ErrorContext>) -> GenerationRequest<'static> {
        GenerationRequest {
            question: "How many customers are there?",
            schema: "DATABASE SCHEMA: main\n\nTable: customers\n",
            dialect: "DuckDB",
            fallback_sql: "SELECT table_name FROM information_schema.tables",
            error_context,
        }
    }

    #[test]
    fn fences_and_prose_are_stripped() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(strip_code_fences("```\nSELECT 2\n```"), "SELECT 2");
        assert_eq!(
            strip_code_fences("Here you go:\n```sql\nSELECT 3\n```\nEnjoy"),
            "SELECT 3"
        );
        assert_eq!(
            strip_code_fences("Sure, this works:\nSELECT *\nFROM t"),
            "SELECT *\nFROM t"
        );
        assert_eq!(strip_code_fences("  select 4  "), "select 4");
    }

    #[tokio::test]
    async fn prompt_embeds_schema_hints_and_question() {
        let model = Canned::ok("SELECT COUNT(*) FROM customers");
        let mut hints = BTreeMap::new();
        hints.insert("earthquake".to_string(), "earthquake_data".to_string());
        let generator = QueryGenerator::new(model.clone(), hints);

        let generation = generator.generate(&request(None)).await;
        assert_eq!(
            generation,
            Generation::Sql("SELECT COUNT(*) FROM customers".to_string())
        );

        let prompts = model.prompts.lock().unwrap();
        let prompt = &prompts[0];
        assert!(prompt.contains("Only generate valid DuckDB SQL queries"));
        assert!(prompt.contains("Table: customers"));
        assert!(prompt.contains("\"earthquake\" -> USE earthquake_data"));
        assert!(prompt.contains("User Question: How many customers are there?"));
        assert!(prompt.ends_with("SQL Query:"));
    }

    #[tokio::test]
    async fn retry_prompt_carries_failed_query_and_error() {
        let model = Canned::ok("SELECT id FROM customers");
        let generator = QueryGenerator::new(model.clone(), BTreeMap::new());

        generator
            .generate(&request(Some(ErrorContext {
                failed_sql: "SELECT nme FROM customers".to_string(),
                error: "column nme not found".to_string(),
            })))
            .await;

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("failed with error: column nme not found"));
        assert!(prompts[0].contains("Original query: SELECT nme FROM customers"));
        assert!(!prompts[0].contains("User Question:"));
    }

    #[tokio::test]
    async fn quota_errors_fall_back_and_others_fail() {
        let generator =
            QueryGenerator::new(Canned::err("429 Resource has been exhausted"), BTreeMap::new());
        assert_eq!(
            generator.generate(&request(None)).await,
            Generation::RateLimited {
                fallback_sql: "SELECT table_name FROM information_schema.tables".to_string()
            }
        );

        let generator = QueryGenerator::new(Canned::err("connection refused"), BTreeMap::new());
        match generator.generate(&request(None)).await {
            Generation::Failed(reason) => assert!(reason.contains("connection refused")),
            other => panic!("unexpected generation {:?}", other),
        }

        let generator = QueryGenerator::new(Canned::ok("```sql\n```"), BTreeMap::new());
        assert!(matches!(
            generator.generate(&request(None)).await,
            Generation::Failed(_)
        ));
    }
}
