//! Topic-change detection and session summarization.
//!
//! Compares the current user episode's topic embedding against the previous
//! user episode in the same session. A similarity below the threshold marks
//! a topic change: every episode in the session since the last persisted
//! summary is digested into a new summary document.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use memoria_llm::LlmFacade;
use memoria_store::{decode, encode, SearchQuery, VectorStore};
use memoria_types::{new_id, Episode, Summary, SUMMARY_PREFIX};

use crate::context::{WriteContext, WriteHandler};
use crate::handlers::{cancellable, DOC_EPISODE, DOC_SUMMARY};
use crate::util::{cosine_similarity, language_name, prompt_input};

#[derive(Debug, Deserialize)]
struct SummaryOutput {
    content: String,
}

/// Generates a consolidated summary when the conversation topic shifts.
///
/// Every failure in this stage is local: the pipeline continues without a
/// summary.
pub struct TopicSummary {
    llm: LlmFacade,
    vector: Arc<dyn VectorStore>,
    threshold: f64,
}

impl TopicSummary {
    pub fn new(llm: LlmFacade, vector: Arc<dyn VectorStore>, threshold: f64) -> Self {
        Self {
            llm,
            vector,
            threshold,
        }
    }

    fn scope_query(&self, ctx: &WriteContext) -> SearchQuery {
        SearchQuery::new()
            .with_filter("agent_id", ctx.agent_id.as_str())
            .with_filter("user_id", ctx.user_id.as_str())
    }

    /// Most recent user episode in the session other than the current one.
    async fn load_last_user_episode(
        &self,
        ctx: &WriteContext,
        exclude_id: &str,
    ) -> Option<Episode> {
        let query = self
            .scope_query(ctx)
            .with_filter("type", DOC_EPISODE)
            .with_filter("session_id", ctx.session_id.as_str())
            .with_filter("role", "user")
            .with_limit(2);

        let docs = match self.vector.search(query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "failed to load last user episode");
                return None;
            }
        };

        docs.into_iter()
            .filter(|doc| doc.get("id").and_then(Value::as_str) != Some(exclude_id))
            .find_map(|doc| decode::<Episode>(doc).ok())
    }

    /// Session episodes created after the most recent summary, oldest data
    /// included when no summary exists yet.
    async fn load_episodes_since_last_summary(
        &self,
        ctx: &WriteContext,
        exclude_id: &str,
    ) -> Vec<Episode> {
        // Distilled summary memories share the `summary` doc type but carry
        // a `memory_type`; only consolidated episode digests count here.
        let summary_query = self
            .scope_query(ctx)
            .with_filter("type", DOC_SUMMARY)
            .without_field("memory_type")
            .with_limit(1);
        let last_summary_at = match self.vector.search(summary_query).await {
            Ok(docs) => docs
                .first()
                .and_then(|doc| doc.get("created_at").and_then(Value::as_str).map(String::from)),
            Err(e) => {
                warn!(error = %e, "failed to load last summary");
                None
            }
        };

        let mut query = self
            .scope_query(ctx)
            .with_filter("type", DOC_EPISODE)
            .with_filter("session_id", ctx.session_id.as_str())
            .with_limit(1000);
        if let Some(created_at) = last_summary_at {
            query = query.with_range("created_at", "gt", created_at);
        }

        let docs = match self.vector.search(query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "failed to load session episodes");
                return Vec::new();
            }
        };

        docs.into_iter()
            .filter(|doc| doc.get("id").and_then(Value::as_str) != Some(exclude_id))
            .filter_map(|doc| decode::<Episode>(doc).ok())
            .collect()
    }

    fn format_episodes(episodes: &[Episode]) -> String {
        episodes
            .iter()
            .map(|ep| {
                let name = if ep.name.is_empty() { &ep.role } else { &ep.name };
                format!("{}: {}", name, ep.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn generate_and_store(&self, ctx: &mut WriteContext, episodes: Vec<Episode>) {
        let token = ctx.cancellation.clone();
        let conversation = Self::format_episodes(&episodes);
        let input = prompt_input([
            ("conversation", json!(conversation)),
            ("language", json!(language_name(&ctx.language))),
        ]);

        let content = match cancellable(
            &token,
            self.llm.generate::<SummaryOutput>("summary", &input),
        )
        .await
        {
            Err(cancelled) => {
                ctx.set_error(cancelled);
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to generate summary");
                return;
            }
            Ok(Ok((output, usage))) => {
                ctx.add_usage(self.name(), usage);
                output.content
            }
        };

        let embedding = match self.llm.embed(&content).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(error = %e, "failed to embed summary");
                Vec::new()
            }
        };

        let now = Utc::now();
        let summary = Summary {
            id: new_id(SUMMARY_PREFIX),
            agent_id: ctx.agent_id.clone(),
            user_id: ctx.user_id.clone(),
            episode_ids: episodes.iter().map(|e| e.id.clone()).collect(),
            topic: episodes.first().map(|e| e.topic.clone()).unwrap_or_default(),
            content,
            embedding,
            created_at: now,
            updated_at: now,
            score: 0.0,
        };

        let doc = match encode(&summary, DOC_SUMMARY) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "failed to encode summary");
                return;
            }
        };
        if let Err(e) = self.vector.store(&summary.id, doc).await {
            warn!(id = %summary.id, error = %e, "failed to store summary");
            return;
        }

        info!(
            id = %summary.id,
            topic = %summary.topic,
            episode_count = summary.episode_ids.len(),
            "summary generated and stored"
        );
        ctx.summaries.push(summary);
    }
}

#[async_trait]
impl WriteHandler for TopicSummary {
    fn name(&self) -> &'static str {
        "summary"
    }

    async fn handle(&self, ctx: &mut WriteContext) {
        let Some(current) = ctx.episodes.iter().find(|e| e.role == "user").cloned() else {
            ctx.next().await;
            return;
        };

        let Some(last) = self.load_last_user_episode(ctx, &current.id).await else {
            ctx.next().await;
            return;
        };

        // Either side missing a topic embedding: similarity is undefined,
        // no summary is produced.
        if last.topic_embedding.is_empty() || current.topic_embedding.is_empty() {
            ctx.next().await;
            return;
        }

        let similarity = cosine_similarity(&last.topic_embedding, &current.topic_embedding);
        info!(
            last_topic = %last.topic,
            current_topic = %current.topic,
            similarity,
            threshold = self.threshold,
            "topic similarity"
        );

        if similarity >= self.threshold {
            ctx.next().await;
            return;
        }

        let episodes = self
            .load_episodes_since_last_summary(ctx, &current.id)
            .await;
        if episodes.is_empty() {
            ctx.next().await;
            return;
        }

        self.generate_and_store(ctx, episodes).await;
        ctx.next().await;
    }
}
