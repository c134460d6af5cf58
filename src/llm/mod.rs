//! OpenAI-compatible chat-completions client (spec §6) used by the summary,
//! entity, and diff workers.

mod config;
pub mod stub;

pub use config::LlmConfig;
pub use stub::StubLlmClient;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: i32,
    #[serde(default)]
    completion_tokens: i32,
    #[serde(default)]
    total_tokens: i32,
}

#[derive(Debug, Clone)]
pub struct LlmCompletion {
    pub content: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
}

#[derive(Debug)]
pub enum LlmError {
    Connection(String),
    Api { status: u16, body: String },
    Parse(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Connection(msg) => write!(f, "connection error: {msg}"),
            LlmError::Api { status, body } => write!(f, "api error: HTTP {status}: {body}"),
            LlmError::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    /// True for statuses/conditions worth retrying (transient): network
    /// failures and HTTP 408/429/5xx (spec §4.6).
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Connection(_) => true,
            LlmError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            LlmError::Parse(_) => false,
        }
    }
}

/// Seam between the worker pools and whatever actually answers chat
/// completions — the real HTTP-backed [`LlmClient`] in production, or a
/// scripted [`StubLlmClient`] in tests. Workers hold `Arc<dyn LlmProvider>`
/// rather than a concrete client so integration tests can exercise the full
/// budget/retry/parse pipeline without a network call.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn config(&self) -> &LlmConfig;

    /// One chat-completions call, no retry: callers (the worker pools)
    /// apply the spec §4.6-style bounded retry around this.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmCompletion, LlmError>;
}

#[derive(Clone)]
pub struct LlmClient {
    config: LlmConfig,
    client: Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("failed to build LLM HTTP client");
        Self { config, client }
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmCompletion, LlmError> {
        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        };

        debug!(model = %self.config.model, "calling llm chat-completions");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("empty choices array".to_string()))?;

        Ok(LlmCompletion {
            content,
            prompt_tokens: parsed.usage.prompt_tokens,
            completion_tokens: parsed.usage.completion_tokens,
            total_tokens: parsed.usage.total_tokens,
        })
    }
}
