use crate::config::LlmConfig;
use crate::llm::{LanguageModel, LlmError, error_from_response, http_client, with_retries};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const DEFAULT_URL: &str = "http://localhost:11434/api/generate";

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

#[derive(Serialize, Debug)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    response: String,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_url,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    async fn send(&self, prompt: &str) -> Result<String, LlmError> {
        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let err = error_from_response("Ollama", response).await;
            error!("{}", err);
            return Err(err);
        }

        let status = response.status().as_u16();
        let response_text = response.text().await.map_err(|e| LlmError::Response {
            status,
            message: format!("Failed to read response body: {}", e),
        })?;

        debug!("Raw response from Ollama: {}", response_text);

        let parsed: OllamaResponse =
            serde_json::from_str(&response_text).map_err(|e| LlmError::Response {
                status,
                message: format!(
                    "Failed to parse Ollama response: {} - Response was: {}",
                    e, response_text
                ),
            })?;

        Ok(parsed.response)
    }
}

#[async_trait]
impl LanguageModel for OllamaProvider {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        debug!("Sending request to Ollama with model: {}", self.model);
        with_retries(self.max_retries, || self.send(prompt)).await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
