use crate::agent::models::QueryAttempt;
use crate::db::executor::ExecutionResult;
use crate::error::{AgentError, AgentResult};
use crate::llm::{ErrorContext, Explanation, Generation};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// The side-effecting steps the controller sequences.
#[async_trait]
pub trait QuerySteps: Send + Sync {
    async fn generate(&self, error_context: Option<ErrorContext>) -> Generation;

    async fn execute(&self, sql: &str) -> ExecutionResult;

    async fn explain(&self, sql: &str, result: &ExecutionResult, rate_limited: bool) -> Explanation;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    GenerateQuery,
    ExecuteQuery,
    RegenerateWithError,
    GenerateExplanation,
    Done,
}

#[derive(Debug, Clone)]
pub struct ControllerOutcome {
    pub attempt: QueryAttempt,
    pub result: ExecutionResult,
    pub explanation: Explanation,
    pub rate_limited: bool,
}

/// Drives generate, execute, regenerate and explain for one question.
#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    max_retries: u32,
    transition_limit: u32,
}

impl RetryController {
    pub fn new(max_retries: u32, transition_limit: u32) -> Self {
        Self {
            max_retries,
            transition_limit,
        }
    }

    pub async fn run<S: QuerySteps + ?Sized>(
        &self,
        steps: &S,
        question: &str,
    ) -> AgentResult<ControllerOutcome> {
        let mut attempt = QueryAttempt::new(question);
        let mut rate_limited = false;
        let mut explanation = None;
        let mut transitions = 0;
        let mut state = State::GenerateQuery;

        while state != State::Done {
            transitions += 1;
            if transitions > self.transition_limit {
                return Err(AgentError::TransitionLimit {
                    limit: self.transition_limit,
                });
            }
            debug!(?state, retry = attempt.retry_count, "Query state transition");

            state = match state {
                State::GenerateQuery => {
                    let generation = steps.generate(None).await;
                    accept(&mut attempt, generation, &mut rate_limited);
                    State::ExecuteQuery
                }
                State::ExecuteQuery => {
                    let result = match attempt.error.take() {
                        Some(reason) => {
                            ExecutionResult::failure(format!("SQL generation failed: {}", reason))
                        }
                        None => steps.execute(&attempt.sql).await,
                    };
                    attempt.error = result.error().map(str::to_string);
                    attempt.outcome = Some(result);

                    if attempt.error.is_some()
                        && attempt.retry_count < self.max_retries
                        && !rate_limited
                    {
                        State::RegenerateWithError
                    } else {
                        State::GenerateExplanation
                    }
                }
                State::RegenerateWithError => {
                    attempt.retry_count += 1;
                    let error = attempt.error.take().unwrap_or_default();
                    warn!(
                        retry = attempt.retry_count,
                        error = %error,
                        "Regenerating query after failure"
                    );
                    let context = ErrorContext {
                        failed_sql: attempt.sql.clone(),
                        error,
                    };
                    let generation = steps.generate(Some(context)).await;
                    accept(&mut attempt, generation, &mut rate_limited);
                    State::ExecuteQuery
                }
                State::GenerateExplanation => {
                    let result = attempt
                        .outcome
                        .clone()
                        .unwrap_or_else(|| ExecutionResult::failure("No query was executed"));
                    let text = steps.explain(&attempt.sql, &result, rate_limited).await;
                    rate_limited |= text.is_rate_limited();
                    explanation = Some(text);
                    State::Done
                }
                State::Done => State::Done,
            };
        }

        let result = attempt
            .outcome
            .clone()
            .ok_or_else(|| AgentError::Internal("query finished without a result".to_string()))?;
        let explanation = explanation
            .ok_or_else(|| AgentError::Internal("query finished without an explanation".to_string()))?;

        info!(
            success = result.success(),
            retries = attempt.retry_count,
            rate_limited,
            "Query pipeline finished"
        );

        Ok(ControllerOutcome {
            attempt,
            result,
            explanation,
            rate_limited,
        })
    }
}

fn accept(attempt: &mut QueryAttempt, generation: Generation, rate_limited: &mut bool) {
    match generation {
        Generation::Sql(sql) => {
            attempt.sql = sql;
            attempt.error = None;
        }
        Generation::Failed(reason) => {
            attempt.error = Some(reason);
        }
        Generation::RateLimited { fallback_sql } => {
            attempt.sql = fallback_sql;
            attempt.error = None;
            *rate_limited = true;
        }
    }
}
