//! Server configuration loaded from TOML with env-var secret overrides.

use std::path::Path;

use serde::Deserialize;

use memoria_store::{Neo4jConfig, OpenSearchConfig, PostgresConfig};

/// Top-level configuration file shape.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub opensearch: OpenSearchConfig,
    pub neo4j: Neo4jConfig,
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub engine: EngineSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// LLM provider settings (OpenAI-compatible endpoints).
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
}

/// Engine tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_topic_threshold")]
    pub topic_threshold: f64,
}

fn default_language() -> String {
    "zh_CN".to_string()
}

fn default_window_size() -> usize {
    memoria_store::DEFAULT_WINDOW_SIZE
}

fn default_topic_threshold() -> f64 {
    0.7
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            language: default_language(),
            window_size: default_window_size(),
            topic_threshold: default_topic_threshold(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// `MEMORIA_LLM_API_KEY` overrides the configured LLM key so secrets can
    /// stay out of the file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&raw)?;

        if let Ok(key) = std::env::var("MEMORIA_LLM_API_KEY") {
            config.llm.api_key = key;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.llm.model.is_empty() {
            anyhow::bail!("llm.model is required");
        }
        if self.llm.embedding_model.is_empty() {
            anyhow::bail!("llm.embedding_model is required");
        }
        if self.llm.embedding_dim == 0 {
            anyhow::bail!("llm.embedding_dim must be positive");
        }
        if self.llm.embedding_dim != self.opensearch.embedding_dim {
            anyhow::bail!(
                "llm.embedding_dim ({}) must match opensearch.embedding_dim ({})",
                self.llm.embedding_dim,
                self.opensearch.embedding_dim
            );
        }
        self.opensearch.validate()?;
        if self.neo4j.enabled {
            self.neo4j.validate()?;
        }
        self.postgres.validate()?;
        Ok(())
    }

    pub fn engine_config(&self) -> memoria_engine::EngineConfig {
        memoria_engine::EngineConfig {
            language: self.engine.language.clone(),
            window_size: self.engine.window_size,
            topic_threshold: self.engine.topic_threshold,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        port = 9090

        [llm]
        model = "gpt-4o-mini"
        embedding_model = "text-embedding-3-small"
        embedding_dim = 1536

        [opensearch]
        addresses = ["http://localhost:9200"]
        index = "memoria"
        embedding_dim = 1536

        [neo4j]
        enabled = true
        uri = "http://localhost:7474"
        database = "neo4j"

        [postgres]
        enabled = true
        host = "localhost"
        port = 5432
        user = "memoria"
        database = "memoria"
    "#;

    #[test]
    fn test_parse_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.engine.window_size, 20);
        assert!((config.engine.topic_threshold - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.opensearch.embedding_dim = 768;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_model_rejected() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.llm.model = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memoria.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.opensearch.index, "memoria");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(dir.path().join("absent.toml")).is_err());
    }
}
