//! LLM Module - provider abstraction for the structured-output calls
//! (classify, score, rewrite, generate) made by the routing core.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod external;
pub mod structured;

pub use external::OpenAiCompatibleProvider;

/// External API providers. All of them speak the OpenAI chat-completions format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApiProvider {
    Groq,
    OpenAI,
    Ollama,
    Custom { endpoint: String },
}

impl ApiProvider {
    pub fn endpoint(&self) -> String {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1/chat/completions".to_string(),
            Self::OpenAI => "https://api.openai.com/v1/chat/completions".to_string(),
            Self::Ollama => "http://localhost:11434/v1/chat/completions".to_string(),
            Self::Custom { endpoint } => endpoint.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Groq => "Groq",
            Self::OpenAI => "OpenAI",
            Self::Ollama => "Ollama",
            Self::Custom { .. } => "Custom",
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: ApiProvider,
    pub model: String,
    /// Environment variable holding the API key. Never the key itself.
    pub api_key_env: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    /// Provider-level retries on transport errors and 5xx responses.
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: ApiProvider::Groq,
            model: "llama-3.1-8b-instant".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 1024,
            max_retries: 2,
            timeout_secs: 60,
        }
    }
}

impl LLMConfig {
    pub fn resolve_api_key(&self) -> Result<String> {
        if matches!(self.provider, ApiProvider::Ollama) {
            return Ok(std::env::var(&self.api_key_env).unwrap_or_default());
        }
        std::env::var(&self.api_key_env)
            .map_err(|_| anyhow!("environment variable {} is not set", self.api_key_env))
    }
}

/// Generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub stop_sequences: Vec<String>,
}

impl From<&LLMConfig> for GenerationConfig {
    fn from(config: &LLMConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            stop_sequences: vec![],
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig::from(&LLMConfig::default())
    }
}

impl GenerationConfig {
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A chat message with role and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Provider information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub is_local: bool,
}

/// Core trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion for a single prompt.
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;

    /// Chat completion with full message history.
    /// Default implementation flattens the messages and calls generate().
    async fn chat(&self, messages: &[ChatMessage], config: &GenerationConfig) -> Result<String> {
        let prompt = messages
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.generate(&prompt, config).await
    }

    fn info(&self) -> ProviderInfo;
}

/// Build a provider from config. Fails when the API key is missing.
pub fn build_provider(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
    let api_key = config.resolve_api_key()?;
    let provider = OpenAiCompatibleProvider::new(config.clone(), api_key)?;
    Ok(Arc::new(provider))
}

/// Provider used when no backend could be configured. Every call fails, so
/// each component falls back to its own conservative default.
pub struct UnavailableProvider {
    reason: String,
}

impl UnavailableProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl LLMProvider for UnavailableProvider {
    async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String> {
        Err(anyhow!("LLM unavailable: {}", self.reason))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Unavailable".to_string(),
            model: String::new(),
            is_local: true,
        }
    }
}
