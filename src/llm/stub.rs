//! Scripted [`LlmProvider`] for integration tests: no network call, answers
//! drawn from a fixed or per-call-index script.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChatMessage, LlmCompletion, LlmConfig, LlmError, LlmProvider};

/// One scripted response: either a completion to hand back, or an error.
#[derive(Clone)]
pub enum StubResponse {
    Content(String),
    Error(StubError),
}

/// A cloneable stand-in for [`LlmError`] (which isn't `Clone`), since a
/// script may need to replay the same error across repeated calls.
#[derive(Clone)]
pub enum StubError {
    Connection(String),
    Api { status: u16, body: String },
    Parse(String),
}

impl From<StubError> for LlmError {
    fn from(e: StubError) -> Self {
        match e {
            StubError::Connection(m) => LlmError::Connection(m),
            StubError::Api { status, body } => LlmError::Api { status, body },
            StubError::Parse(m) => LlmError::Parse(m),
        }
    }
}

impl StubResponse {
    pub fn content(content: impl Into<String>) -> Self {
        Self::Content(content.into())
    }
}

/// Hands back [`StubResponse`]s in order, one per `complete()` call; the
/// last entry repeats once the script runs out so tests don't need to size
/// the script exactly to the number of chunks a filing produces.
pub struct StubLlmClient {
    config: LlmConfig,
    script: Vec<StubResponse>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<Vec<ChatMessage>>>,
}

impl StubLlmClient {
    pub fn new(script: Vec<StubResponse>) -> Self {
        Self {
            config: LlmConfig {
                endpoint: "stub://llm".to_string(),
                api_key: String::new(),
                model: "stub-model".to_string(),
                max_output_tokens: 256,
                temperature: 0.0,
            },
            script,
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// A stub that always returns the same content.
    pub fn always(content: impl Into<String>) -> Self {
        Self::new(vec![StubResponse::content(content)])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User-message content from every recorded call, in order, for
    /// assertions like "was the failed chunk re-sent on retry".
    pub fn recorded_contents(&self) -> Vec<String> {
        self.recorded
            .lock()
            .unwrap()
            .iter()
            .flat_map(|msgs| msgs.iter().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl LlmProvider for StubLlmClient {
    fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmCompletion, LlmError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().push(
            messages
                .iter()
                .map(|m| ChatMessage { role: m.role, content: m.content.clone() })
                .collect(),
        );

        let response = self
            .script
            .get(index)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or_else(|| StubResponse::content(""));

        match response {
            StubResponse::Content(content) => {
                let total_tokens = (content.len() as i64 / 4).max(1) as i32;
                Ok(LlmCompletion {
                    content,
                    prompt_tokens: total_tokens,
                    completion_tokens: total_tokens,
                    total_tokens: total_tokens * 2,
                })
            }
            StubResponse::Error(e) => Err(e.into()),
        }
    }
}
