//! OpenAI-compatible chat-completions provider (Groq, OpenAI, Ollama, custom).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::AdvisorError;

use super::{ChatMessage, ChatRole, GenerationConfig, LLMConfig, LLMProvider, ProviderInfo};

pub struct OpenAiCompatibleProvider {
    config: LLMConfig,
    api_key: String,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: LLMConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        tracing::info!(
            provider = config.provider.name(),
            model = %config.model,
            max_retries = config.max_retries,
            "Creating OpenAI-compatible provider"
        );

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// Parse a response body as JSON, returning a clear error if the server returned HTML
    /// (e.g. a gateway error page) instead of valid JSON.
    async fn parse_json_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;

        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(AdvisorError::Llm(format!(
                "Endpoint {} returned HTML instead of JSON (HTTP {}). Response: {}",
                endpoint, status, preview
            ))
            .into());
        }

        serde_json::from_str::<T>(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!(
                "Failed to parse JSON from {} (HTTP {}): {}. Response body: {}",
                endpoint,
                status,
                e,
                preview
            )
        })
    }

    fn format_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect()
    }

    async fn send_once(&self, messages: &[ChatMessage], config: &GenerationConfig) -> Result<String> {
        let endpoint = self.config.provider.endpoint();
        let mut request = json!({
            "model": self.config.model,
            "messages": Self::format_messages(messages),
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": false
        });
        if !config.stop_sequences.is_empty() {
            request["stop"] = json!(config.stop_sequences);
        }

        let mut builder = self.client.post(&endpoint).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow!("Request to {} timed out", endpoint)
            } else if e.is_connect() {
                anyhow!("Failed to connect to {}: {}", endpoint, e)
            } else {
                anyhow!("Request to {} failed: {}", endpoint, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("API error ({}): {}", status, error));
        }

        let result: OpenAIResponse = Self::parse_json_response(response, &endpoint).await?;
        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| AdvisorError::Llm("No choices returned from API".to_string()).into())
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatibleProvider {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        self.chat(&[ChatMessage::user(prompt)], config).await
    }

    async fn chat(&self, messages: &[ChatMessage], config: &GenerationConfig) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.send_once(messages, config).await {
                Ok(text) => {
                    tracing::debug!(chars = text.len(), attempt, "API response received");
                    return Ok(text);
                }
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    let backoff = std::time::Duration::from_millis(250 * u64::from(attempt));
                    tracing::warn!(error = %e, attempt, "LLM call failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.config.provider.name().to_string(),
            model: self.config.model.clone(),
            is_local: matches!(self.config.provider, super::ApiProvider::Ollama),
        }
    }
}

fn is_retryable(e: &anyhow::Error) -> bool {
    let msg = e.to_string();
    msg.contains("timed out")
        || msg.contains("Failed to connect")
        || msg.contains("API error (5")
        || msg.contains("API error (429")
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}
