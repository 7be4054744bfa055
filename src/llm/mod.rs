pub mod explainer;
pub mod generator;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub use explainer::{Explanation, ExplanationGenerator, ExplanationRequest};
pub use generator::{ErrorContext, Generation, GenerationRequest, QueryGenerator};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    Connection(String),

    #[error("LLM response error ({status}): {message}")]
    Response { status: u16, message: String },

    #[error("LLM configuration error: {0}")]
    Config(String),

    #[error("LLM rate limit reached: {0}")]
    RateLimited(String),
}

impl LlmError {
    /// Quota and rate-limit signals, whichever way the provider reported them.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            LlmError::RateLimited(_) => true,
            LlmError::Response { status: 429, .. } => true,
            other => looks_rate_limited(&other.to_string()),
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, LlmError::Connection(_)) && !self.is_rate_limit()
    }
}

/// Pattern match for quota markers in free-form error text.
pub fn looks_rate_limited(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["429", "quota", "rate limit", "resource exhausted", "resource_exhausted"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// A text-completion service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

pub struct LlmManager;

impl LlmManager {
    /// Build the provider selected by `config.backend`.
    pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
        let model: Arc<dyn LanguageModel> = match config.backend.as_str() {
            "remote" => Arc::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Arc::new(providers::ollama::OllamaProvider::new(config)?),
            "gemini" => Arc::new(providers::gemini::GeminiProvider::new(config)?),
            _ => {
                return Err(LlmError::Config(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )));
            }
        };

        info!("Using {} language model ({})", model.name(), config.model);
        Ok(model)
    }
}

/// Run `call` again after transient connection failures, at most
/// `max_retries` extra times. Every other error is returned immediately.
pub(crate) async fn with_retries<F, Fut>(max_retries: u32, mut call: F) -> Result<String, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                warn!(attempt, error = %e, "Retrying language model call");
                tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
            }
            result => return result,
        }
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Config(e.to_string()))
}

/// Map a non-success HTTP response to an error, 429 included.
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> LlmError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return LlmError::RateLimited(format!("{} responded with 429: {}", provider, body));
    }

    LlmError::Response {
        status: status.as_u16(),
        message: format!("{} API responded with status code {}: {}", provider, status, body),
    }
}
