use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use thiserror::Error;

use querydesk_core::config::{LlmConfig, LlmProvider};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model request timed out after {0}s")]
    Timeout(u64),
    #[error("model provider error: {0}")]
    Provider(String),
    #[error("model returned an empty completion")]
    EmptyCompletion,
}

/// The generation capability consumed by the planning loop. Strictly a
/// translator: it proposes SQL text and narrates results, and never decides
/// tenant scoping or whether a result is acceptable.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// HTTP-backed client covering the chat-completions shape (OpenAI, Ollama)
/// and the Anthropic messages shape.
pub struct HttpLlmClient {
    client: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| GenerationError::Provider(err.to_string()))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string());
        Ok(Self {
            client,
            provider: config.provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.as_ref().map(|key| key.expose_secret().to_string()),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    async fn complete_chat(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.0,
        });
        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response: Value = self.send(request).await?;
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or(GenerationError::EmptyCompletion)
    }

    async fn complete_anthropic(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = json!({
            "model": self.model,
            "max_tokens": 2048,
            "messages": [{"role": "user", "content": prompt}],
        });
        let mut request = self
            .client
            .post(&url)
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.header("x-api-key", api_key);
        }
        let response: Value = self.send(request).await?;
        response["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or(GenerationError::EmptyCompletion)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, GenerationError> {
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                GenerationError::Timeout(self.timeout_secs)
            } else {
                GenerationError::Provider(err.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Provider(format!("{status}: {body}")));
        }
        response.json().await.map_err(|err| GenerationError::Provider(err.to_string()))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let completion = match self.provider {
            LlmProvider::OpenAi | LlmProvider::Ollama => self.complete_chat(prompt).await?,
            LlmProvider::Anthropic => self.complete_anthropic(prompt).await?,
        };
        if completion.trim().is_empty() {
            return Err(GenerationError::EmptyCompletion);
        }
        Ok(completion)
    }
}

fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "https://api.openai.com",
        LlmProvider::Anthropic => "https://api.anthropic.com",
        LlmProvider::Ollama => "http://localhost:11434",
    }
}
