//! OpenAI-compatible chat completions provider (Groq, OpenAI, local gateways).

use super::{Completion, GenerationParams, GeneratorError, TextProvider};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub timeout: Duration,
}

pub struct OpenAiCompatibleProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, GeneratorError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GeneratorError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn api_key(&self) -> Result<&str, GeneratorError> {
        self.config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().as_str())
            .ok_or_else(|| GeneratorError::NotConfigured("LLM_API_KEY is not set".to_string()))
    }
}

#[async_trait]
impl TextProvider for OpenAiCompatibleProvider {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Completion, GeneratorError> {
        let api_key = self.api_key()?;

        let request = ChatCompletionRequest {
            model: &params.model,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .traced_post(&self.api_url("chat/completions"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GeneratorError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(GeneratorError::RateLimited);
            }
            if status.is_server_error() {
                return Err(GeneratorError::Network(format!(
                    "LLM API error {}: {}",
                    status, error_text
                )));
            }

            return Err(GeneratorError::Api(format!(
                "LLM API error {}: {}",
                status, error_text
            )));
        }

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Api(format!("Failed to parse response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or(GeneratorError::EmptyResponse)?;

        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!(
                model = %params.model,
                max_tokens = params.max_tokens,
                "Completion was truncated at max_tokens"
            );
        }

        let text = choice.message.content.unwrap_or_default();
        if text.trim().is_empty() {
            return Err(GeneratorError::EmptyResponse);
        }

        let usage = api_response.usage.unwrap_or_default();

        Ok(Completion {
            text,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }

    async fn health_check(&self) -> Result<(), GeneratorError> {
        let api_key = self.api_key()?;

        let response = self
            .client
            .traced_get(&self.api_url("models"))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| GeneratorError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(GeneratorError::Api(format!(
                "Health check failed: {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &'static str {
        "openai-compatible"
    }
}

// ============================================================================
// Chat Completions Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
