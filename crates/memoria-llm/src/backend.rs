//! Text-model backends.
//!
//! The engine talks to models through the [`TextModel`] trait. Two
//! implementations ship here: a deterministic [`MockTextModel`] for tests
//! and an OpenAI-compatible chat-completions backend for anything that
//! speaks that wire format (OpenAI, Ark, Ollama, vLLM, ...).

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use memoria_types::TokenUsage;

use crate::error::{LlmError, Result};

/// A completed model invocation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Trait for chat-completion style text models.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Run one completion with a system preamble and a user message.
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion>;

    /// Name of this backend.
    fn name(&self) -> &str;
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock model
// ─────────────────────────────────────────────────────────────────────────────

/// A scripted model for tests.
///
/// Responses are matched by prompt-name marker when configured with
/// [`MockTextModel::respond_to`], otherwise consumed in order. Every request
/// is logged for assertion.
#[derive(Debug, Default)]
pub struct MockTextModel {
    queued: Mutex<Vec<Completion>>,
    by_marker: Mutex<Vec<(String, Completion)>>,
    requests: Mutex<Vec<String>>,
}

impl MockTextModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw response text, returned in FIFO order.
    pub fn push(&self, text: impl Into<String>) {
        self.queued.lock().unwrap().push(Completion {
            text: text.into(),
            usage: TokenUsage::new(10, 20),
        });
    }

    /// Respond with `text` whenever the rendered prompt contains `marker`.
    ///
    /// Marker responses are not consumed and take precedence over the queue,
    /// so one configuration can serve a whole pipeline run.
    pub fn respond_to(&self, marker: impl Into<String>, text: impl Into<String>) {
        self.by_marker.lock().unwrap().push((
            marker.into(),
            Completion {
                text: text.into(),
                usage: TokenUsage::new(10, 20),
            },
        ));
    }

    /// Prompts this model has been asked to complete.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl TextModel for MockTextModel {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<Completion> {
        self.requests.lock().unwrap().push(prompt.to_string());

        for (marker, completion) in self.by_marker.lock().unwrap().iter() {
            if prompt.contains(marker.as_str()) {
                return Ok(completion.clone());
            }
        }

        let mut queued = self.queued.lock().unwrap();
        if queued.is_empty() {
            return Err(LlmError::Generation(
                "mock model: no response configured".to_string(),
            ));
        }
        Ok(queued.remove(0))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI-compatible backend
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for an OpenAI-compatible chat backend.
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl OpenAiCompatConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Chat-completions backend for OpenAI-compatible providers.
pub struct OpenAiCompatModel {
    config: OpenAiCompatConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiCompatModel {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self> {
        if config.model.is_empty() {
            return Err(LlmError::Config("model is required".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl TextModel for OpenAiCompatModel {
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Generation(format!(
                "provider returned {status}: {detail}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Generation(format!("malformed provider response: {e}")))?;

        let text = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::Generation("empty response".to_string()));
        }

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion { text, usage })
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fifo_order() {
        let model = MockTextModel::new();
        model.push("first");
        model.push("second");

        let a = model.complete("", "one").await.unwrap();
        let b = model.complete("", "two").await.unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");
        assert_eq!(model.request_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_marker_not_consumed() {
        let model = MockTextModel::new();
        model.respond_to("topic label", r#"{"topic": "咖啡"}"#);

        for _ in 0..3 {
            let c = model.complete("", "Give the message a topic label").await.unwrap();
            assert!(c.text.contains("咖啡"));
        }
    }

    #[tokio::test]
    async fn test_mock_exhausted_errors() {
        let model = MockTextModel::new();
        let err = model.complete("", "anything").await;
        assert!(matches!(err, Err(LlmError::Generation(_))));
    }

    #[test]
    fn test_openai_config_requires_model() {
        let config = OpenAiCompatConfig::new("key", "");
        assert!(matches!(
            OpenAiCompatModel::new(config),
            Err(LlmError::Config(_))
        ));
    }
}
