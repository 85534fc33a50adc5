//! The facade the engine calls for generation and embedding.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use memoria_types::TokenUsage;

use crate::backend::TextModel;
use crate::embeddings::Embedder;
use crate::error::{LlmError, Result};
use crate::prompt::PromptRegistry;

/// Named-prompt execution and text embedding behind one handle.
///
/// Stateless and safe for concurrent use; clone the `Arc`s freely.
#[derive(Clone)]
pub struct LlmFacade {
    model: Arc<dyn TextModel>,
    embedder: Arc<dyn Embedder>,
    prompts: Arc<PromptRegistry>,
}

impl LlmFacade {
    pub fn new(model: Arc<dyn TextModel>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            model,
            embedder,
            prompts: Arc::new(PromptRegistry::builtin()),
        }
    }

    pub fn with_prompts(mut self, prompts: PromptRegistry) -> Self {
        self.prompts = Arc::new(prompts);
        self
    }

    /// Render the named prompt with `input`, invoke the model, and parse the
    /// response into `T`.
    ///
    /// Fails with a generation error when the model errors or returns empty,
    /// and a schema error when the response does not decode into `T`.
    pub async fn generate<T: DeserializeOwned>(
        &self,
        prompt_name: &str,
        input: &HashMap<String, Value>,
    ) -> Result<(T, TokenUsage)> {
        let prompt = self.prompts.lookup(prompt_name)?;
        let rendered = prompt.render(input)?;
        let system = render_system(prompt.system, input);

        let completion = self.model.complete(&system, &rendered).await?;
        if completion.text.trim().is_empty() {
            return Err(LlmError::Generation("empty response".to_string()));
        }

        debug!(
            prompt = prompt_name,
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "llm response"
        );

        let json = extract_json(&completion.text).ok_or_else(|| {
            LlmError::Schema(format!(
                "prompt {prompt_name}: no JSON object in response"
            ))
        })?;
        let parsed: T = serde_json::from_str(json)
            .map_err(|e| LlmError::Schema(format!("prompt {prompt_name}: {e}")))?;

        Ok((parsed, completion.usage))
    }

    /// Embed a text into a dense vector. Empty results are failures.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.embedder.embed(text).await?;
        if embedding.is_empty() {
            return Err(LlmError::Embedding("empty embedding response".to_string()));
        }
        Ok(embedding)
    }

    /// Dimensionality of the configured embedder.
    pub fn embedding_dimensions(&self) -> usize {
        self.embedder.dimensions()
    }
}

/// System preambles only ever reference `language`; substitute it directly.
fn render_system(system: &str, input: &HashMap<String, Value>) -> String {
    match input.get("language").and_then(Value::as_str) {
        Some(language) => system.replace("{{language}}", language),
        None => system.to_string(),
    }
}

/// Locate the outermost JSON object in model output, tolerating code fences
/// and stray prose around it.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
