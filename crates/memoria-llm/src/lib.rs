//! LLM and embedding facade for the memoria memory service.
//!
//! The engine never talks to a provider directly. It calls two operations on
//! [`LlmFacade`]:
//!
//! - [`LlmFacade::generate`] — look up a named prompt, render it with an
//!   input mapping, invoke the model, and parse the response against a typed
//!   output schema. Token usage is returned alongside the parsed value.
//! - [`LlmFacade::embed`] — produce a dense `f32` vector for a text.
//!
//! Providers plug in behind the [`TextModel`] and [`Embedder`] traits. The
//! crate ships an OpenAI-compatible HTTP backend plus deterministic mocks
//! for testing.

pub mod backend;
pub mod embeddings;
pub mod error;
pub mod facade;
pub mod prompt;

pub use backend::{Completion, MockTextModel, OpenAiCompatConfig, OpenAiCompatModel, TextModel};
pub use embeddings::{Embedder, MockEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig};
pub use error::{LlmError, Result};
pub use facade::LlmFacade;
pub use prompt::{PromptRegistry, PromptTemplate};
