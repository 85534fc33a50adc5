//! memoria server binary: composition root and HTTP listener.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use memoria_engine::Memory;
use memoria_llm::{
    LlmFacade, OpenAiCompatConfig, OpenAiCompatModel, OpenAiEmbedder, OpenAiEmbedderConfig,
};
use memoria_store::{
    GraphStore, MemoryGraphStore, MemoryRelationStore, Neo4jStore, OpenSearchStore,
    PostgresRelationStore, RelationStore, VectorStore,
};
use memoria_server::{routes, AppState, Config};

/// Bounded wait for store initialization.
const INIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "memoria", about = "Conversational memory service")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "memoria.toml", env = "MEMORIA_CONFIG")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config))?;

    // LLM facade.
    let model = OpenAiCompatModel::new(apply_base_url(
        OpenAiCompatConfig::new(config.llm.api_key.clone(), config.llm.model.clone()),
        &config.llm.base_url,
    ))?;
    let embedder = OpenAiEmbedder::new(apply_embedder_base_url(
        OpenAiEmbedderConfig::new(
            config.llm.api_key.clone(),
            config.llm.embedding_model.clone(),
            config.llm.embedding_dim,
        ),
        &config.llm.base_url,
    ))?;
    let llm = LlmFacade::new(Arc::new(model), Arc::new(embedder));

    // Vector store: required, index auto-created.
    let vector = OpenSearchStore::new(config.opensearch.clone())?;
    tokio::time::timeout(INIT_TIMEOUT, vector.ensure_index())
        .await
        .context("vector store initialization timed out")??;
    let vector: Arc<dyn VectorStore> = Arc::new(vector);

    // Graph store: falls back to the in-process implementation when the
    // external one is disabled.
    let graph: Arc<dyn GraphStore> = if config.neo4j.enabled {
        let store = Neo4jStore::new(config.neo4j.clone())?;
        tokio::time::timeout(INIT_TIMEOUT, store.health())
            .await
            .context("graph store initialization timed out")??;
        Arc::new(store)
    } else {
        warn!("neo4j disabled, using in-process graph store");
        Arc::new(MemoryGraphStore::new())
    };

    // Relational store, same fallback policy.
    let relation: Arc<dyn RelationStore> = if config.postgres.enabled {
        let store = tokio::time::timeout(
            INIT_TIMEOUT,
            PostgresRelationStore::connect(&config.postgres),
        )
        .await
        .context("relational store initialization timed out")??;
        Arc::new(store)
    } else {
        warn!("postgres disabled, using in-process relation store");
        Arc::new(MemoryRelationStore::new())
    };

    let memory = Arc::new(Memory::new(
        llm,
        Arc::clone(&vector),
        Arc::clone(&graph),
        Arc::clone(&relation),
        config.engine_config(),
    ));
    let shutdown_scope = memory.server_scope().clone();

    let app = routes::router(AppState::new(Arc::clone(&memory)));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "memoria listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            shutdown_scope.cancel();
        })
        .await?;

    // Release pooled connections.
    vector.close().await.ok();
    graph.close().await.ok();
    relation.close().await.ok();

    Ok(())
}

fn apply_base_url(mut config: OpenAiCompatConfig, base_url: &str) -> OpenAiCompatConfig {
    if !base_url.is_empty() {
        config = config.with_base_url(base_url);
    }
    config
}

fn apply_embedder_base_url(
    mut config: OpenAiEmbedderConfig,
    base_url: &str,
) -> OpenAiEmbedderConfig {
    if !base_url.is_empty() {
        config = config.with_base_url(base_url);
    }
    config
}
