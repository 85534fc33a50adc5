//! Named prompt templates and the registry the engine resolves them from.
//!
//! Templates use `{{name}}` placeholders resolved against a string-keyed
//! input mapping. Rendering is strict: an unresolved placeholder is a config
//! error, caught at call time rather than silently shipped to the model.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{LlmError, Result};

/// A named prompt with a system preamble and a user-message template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub system: &'static str,
    pub template: &'static str,
}

impl PromptTemplate {
    /// Render the user-message template against the input mapping.
    pub fn render(&self, input: &HashMap<String, Value>) -> Result<String> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                LlmError::Config(format!("prompt {}: unclosed placeholder", self.name))
            })?;
            let key = after[..end].trim();

            let value = input.get(key).ok_or_else(|| {
                LlmError::Config(format!("prompt {}: missing input `{key}`", self.name))
            })?;
            match value {
                Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }

            rest = &after[end + 2..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

/// Registry of the named prompts the engine consumes.
#[derive(Debug, Clone)]
pub struct PromptRegistry {
    prompts: HashMap<&'static str, PromptTemplate>,
}

impl PromptRegistry {
    /// Registry with the built-in prompt set.
    pub fn builtin() -> Self {
        let mut prompts = HashMap::new();
        for prompt in [TOPIC, EXTRACTION, MEMORY_EXTRACT, EVENT_EXTRACT, SUMMARY] {
            prompts.insert(prompt.name, prompt);
        }
        Self { prompts }
    }

    /// Look up a prompt by name.
    pub fn lookup(&self, name: &str) -> Result<&PromptTemplate> {
        self.prompts
            .get(name)
            .ok_or_else(|| LlmError::PromptNotFound(name.to_string()))
    }

    /// Register or replace a prompt.
    pub fn register(&mut self, prompt: PromptTemplate) {
        self.prompts.insert(prompt.name, prompt);
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in prompts
// ─────────────────────────────────────────────────────────────────────────────

/// Per-message topic label, 2-4 characters/words.
pub const TOPIC: PromptTemplate = PromptTemplate {
    name: "topic",
    system: "You label dialog messages with a short topic tag in {{language}}.",
    template: "Give the message below a topic label of 2-4 characters or words in {{language}}.\n\
               Message: {{content}}\n\n\
               Respond with a single JSON object and nothing else. No prose, no code fences.\n\
               Schema: {\"topic\": string}",
};

/// Entities and subject-predicate-object relations from a conversation.
pub const EXTRACTION: PromptTemplate = PromptTemplate {
    name: "extraction",
    system: "You extract entities and relations from conversations. Output {{language}} text.",
    template: "Extract the entities and the relations between them from this conversation.\n\
               Entity types: person, place, thing, event, emotion, activity.\n\
               For each relation state subject and object by entity name, a short predicate,\n\
               and a one-sentence fact describing it.\n\n\
               Conversation:\n{{conversation}}\n\n\
               Respond with a single JSON object and nothing else. No prose, no code fences.\n\
               Schema: {\"entities\": [{\"name\": string, \"type\": string, \"description\": string}],\n\
               \"relations\": [{\"subject\": string, \"predicate\": string, \"object\": string, \"fact\": string}]}",
};

/// High-level memories with importance, type, and keywords.
pub const MEMORY_EXTRACT: PromptTemplate = PromptTemplate {
    name: "memory_extract",
    system: "You distill conversations into durable user memories in {{language}}.",
    template: "Distill the conversation into user-level memories. Mark each as `fact`\n\
               (durable knowledge about the user) or `working` (task-scoped context),\n\
               score importance in [0, 1], and list keywords.\n\n\
               Conversation:\n{{conversation}}\n\n\
               Respond with a single JSON object and nothing else. No prose, no code fences.\n\
               Schema: {\"memories\": [{\"content\": string, \"importance\": number,\n\
               \"memory_type\": \"fact\"|\"working\", \"keywords\": [string]}]}",
};

/// Event triplets and causal/temporal links between them.
pub const EVENT_EXTRACT: PromptTemplate = PromptTemplate {
    name: "event_extract",
    system: "You extract event structures from conversations. Output {{language}} text.",
    template: "Extract events from this conversation as (argument1, trigger_word, argument2)\n\
               triplets, where trigger_word is the verb. Then list relations between the\n\
               extracted events by index as causal or temporal.\n\n\
               Conversation:\n{{conversation}}\n\n\
               Respond with a single JSON object and nothing else. No prose, no code fences.\n\
               Schema: {\"events\": [{\"trigger_word\": string, \"argument1\": string, \"argument2\": string}],\n\
               \"relations\": [{\"from_index\": number, \"to_index\": number, \"relation_type\": \"causal\"|\"temporal\"}]}",
};

/// Free-text digest of a run of episodes.
pub const SUMMARY: PromptTemplate = PromptTemplate {
    name: "summary",
    system: "You summarize conversations concisely in {{language}}.",
    template: "Summarize the key information in this conversation in a short paragraph.\n\n\
               Conversation:\n{{conversation}}\n\n\
               Respond with a single JSON object and nothing else. No prose, no code fences.\n\
               Schema: {\"content\": string}",
};
