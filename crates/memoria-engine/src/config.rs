//! Engine configuration.

/// Tunables for the pipelines and the forgetting job.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Language tag injected into every prompt rendering.
    pub language: String,
    /// Short-term window capacity in messages.
    pub window_size: usize,
    /// Topic-embedding cosine similarity below which a session summary is
    /// generated.
    pub topic_threshold: f64,
    /// Default per-search hit limit for retrieval.
    pub default_limit: usize,
}

impl EngineConfig {
    /// Human-readable language name for prompt input.
    pub fn language_name(&self) -> &'static str {
        crate::util::language_name(&self.language)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            language: "zh_CN".to_string(),
            window_size: memoria_store::DEFAULT_WINDOW_SIZE,
            topic_threshold: 0.7,
            default_limit: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.window_size, 20);
        assert!((config.topic_threshold - 0.7).abs() < 1e-9);
        assert_eq!(config.language_name(), "中文");
    }

    #[test]
    fn test_language_names() {
        let mut config = EngineConfig::default();
        config.language = "en_US".into();
        assert_eq!(config.language_name(), "English");
        config.language = "ja_JP".into();
        assert_eq!(config.language_name(), "日本語");
    }
}
