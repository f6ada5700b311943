//! Inference provider implementations
//!
//! OpenAI-compatible chat completions (JSON mode) and Ollama (`format:
//! "json"`). Both validate the model output into a JSON object on
//! receipt and classify every failure into an [`InferenceError`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orx_core::{
    ConfigError, InferenceError, InferenceProvider, LlmConfig, LlmProvider, OrxError, Result,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str = "You are a biomedical relation extraction assistant. \
Always answer with a single JSON object.";

// ============================================================================
// OpenAI Provider
// ============================================================================

/// OpenAI-compatible chat completions provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            max_tokens: 1024,
            temperature: 0.0,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("OPENAI_API_KEY".to_string()))?;

        let base_url = config
            .openai_base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key: api_key.clone(),
            base_url,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Set custom base URL (for Azure or compatible APIs)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl InferenceProvider for OpenAiProvider {
    async fn complete_json(
        &self,
        prompt: &str,
    ) -> std::result::Result<serde_json::Value, InferenceError> {
        let request = OpenAiRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let result: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(format!("response envelope: {e}")))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InferenceError::Malformed("no content in response".to_string()))?;

        parse_json_object(&content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Ollama Provider
// ============================================================================

/// Ollama API provider
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            temperature: 0.0,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: config.ollama_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl InferenceProvider for OllamaProvider {
    async fn complete_json(
        &self,
        prompt: &str,
    ) -> std::result::Result<serde_json::Value, InferenceError> {
        let request = OllamaRequest {
            model: &self.model,
            prompt: format!("{SYSTEM_PROMPT}\n\n{prompt}"),
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let result: OllamaResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(format!("response envelope: {e}")))?;

        parse_json_object(&result.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Failure classification
// ============================================================================

fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| OrxError::ConfigError(format!("HTTP client: {e}")))
}

/// Map an HTTP error status to a failure; 408, 429 and 5xx are transient
pub(crate) fn classify_status(status: StatusCode, body: &str) -> InferenceError {
    let message = format!("{status}: {}", body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        InferenceError::Transient(message)
    } else {
        InferenceError::Provider(message)
    }
}

fn classify_transport(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout(err.to_string())
    } else {
        InferenceError::Transient(err.to_string())
    }
}

/// Parse model output into a JSON object
pub(crate) fn parse_json_object(
    content: &str,
) -> std::result::Result<serde_json::Value, InferenceError> {
    let value: serde_json::Value = serde_json::from_str(content.trim())
        .map_err(|e| InferenceError::Malformed(format!("content is not JSON: {e}")))?;
    if !value.is_object() {
        return Err(InferenceError::Malformed(
            "content is not a JSON object".to_string(),
        ));
    }
    Ok(value)
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an inference provider from config
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn InferenceProvider>> {
    match config.provider {
        LlmProvider::OpenAI | LlmProvider::Azure => {
            Ok(Arc::new(OpenAiProvider::from_config(config)?))
        }
        LlmProvider::Ollama => Ok(Arc::new(OllamaProvider::from_config(config)?)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_provider_creation() {
        let provider = OpenAiProvider::new("test-key", "gpt-4o-mini");
        assert_eq!(provider.model_name(), "gpt-4o-mini");
    }

    #[test]
    fn test_openai_requires_key() {
        let config = LlmConfig::default();
        match OpenAiProvider::from_config(&config) {
            Err(OrxError::ConfigError(message)) => {
                assert!(message.contains("Missing required configuration: OPENAI_API_KEY"));
            }
            other => panic!("expected a configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_ollama_provider_creation() {
        let provider = OllamaProvider::new("http://localhost:11434", "llama3");
        assert_eq!(provider.model_name(), "llama3");
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "bad key").is_retryable());
    }

    #[test]
    fn test_parse_json_object() {
        assert!(parse_json_object(r#" {"entities": []} "#).is_ok());
        assert!(matches!(
            parse_json_object("[1, 2]"),
            Err(InferenceError::Malformed(_))
        ));
        assert!(matches!(
            parse_json_object("Sure! Here is the JSON"),
            Err(InferenceError::Malformed(_))
        ));
    }
}
