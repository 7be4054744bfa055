use crate::config::LlmConfig;
use crate::llm::{LanguageModel, LlmError, error_from_response, http_client, with_retries};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini `generateContent` REST API.
pub struct GeminiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::Config("API key is required for the Gemini provider".to_string())
        })?;

        let base = config
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let endpoint = format!(
            "{}/{}:generateContent",
            base.trim_end_matches('/'),
            config.model
        );

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint,
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    async fn send(&self, prompt: &str) -> Result<String, LlmError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response("Gemini", response).await);
        }

        let status = response.status().as_u16();
        let parsed: GenerateResponse = response.json().await.map_err(|e| LlmError::Response {
            status,
            message: e.to_string(),
        })?;

        extract_text(parsed).ok_or_else(|| LlmError::Response {
            status,
            message: "Gemini returned no candidates".to_string(),
        })
    }
}

fn extract_text(response: GenerateResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().map(|part| part.text).collect();
    if text.is_empty() { None } else { Some(text) }
}

#[async_trait]
impl LanguageModel for GeminiProvider {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        debug!("Sending prompt to Gemini ({} chars)", prompt.len());
        with_retries(self.max_retries, || self.send(prompt)).await
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_includes_model() {
        let config = LlmConfig {
            api_key: Some("key".to_string()),
            model: "gemini-2.5-pro".to_string(),
            ..LlmConfig::default()
        };
        let provider = GeminiProvider::new(&config).unwrap();
        assert_eq!(
            provider.endpoint,
            format!("{}/gemini-2.5-pro:generateContent", DEFAULT_BASE_URL)
        );
    }

    #[test]
    fn missing_key_is_rejected() {
        assert!(matches!(
            GeminiProvider::new(&LlmConfig::default()),
            Err(LlmError::Config(_))
        ));
    }

    #[test]
    fn text_parts_are_joined() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"SELECT "},{"text":"1"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).as_deref(), Some("SELECT 1"));

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(extract_text(empty).is_none());
    }
}
