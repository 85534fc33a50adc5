//! Small shared helpers for the pipelines.

use std::collections::HashMap;

use serde_json::Value;

/// Characters per token for budget estimation (Chinese-leaning heuristic).
pub const CHARS_PER_TOKEN: f64 = 1.5;

/// Estimate the token cost of a text: `ceil(chars / 1.5)`.
pub fn estimate_tokens(text: &str) -> i64 {
    let chars = text.chars().count() as f64;
    (chars / CHARS_PER_TOKEN).ceil() as i64
}

/// Cosine similarity between two vectors; 0 when shapes differ or either is
/// empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..a.len() {
        dot += a[i] as f64 * b[i] as f64;
        norm_a += (a[i] as f64).powi(2);
        norm_b += (b[i] as f64).powi(2);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Human-readable language name for a language tag.
pub fn language_name(tag: &str) -> &'static str {
    match tag {
        "en_US" => "English",
        "ja_JP" => "日本語",
        _ => "中文",
    }
}

/// Build a prompt input mapping from string/value pairs.
pub fn prompt_input<const N: usize>(pairs: [(&str, Value); N]) -> HashMap<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
