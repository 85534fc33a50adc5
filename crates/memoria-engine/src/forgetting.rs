//! The forgetting job: scores and evicts decayed memories.
//!
//! Three phases, each isolated: working-memory eviction, event eviction
//! (with relational cascade), and fact expiry after 90 days. A failing
//! phase logs and the next one proceeds; the response carries whatever
//! counts succeeded.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use memoria_store::{decode, RelationStore, SearchQuery, VectorStore};
use memoria_types::{EventTriplet, ForgetResponse, MemoryType, SummaryMemory};

use crate::handlers::{DOC_EVENT, DOC_SUMMARY};

/// Records scoring above this are removed.
pub const FORGET_THRESHOLD: f64 = 0.7;

/// Days after which unprotected facts are hard-deleted.
pub const FACT_EXPIRY_DAYS: i64 = 90;

/// Normalization ceiling for the time-decay factor, in days.
pub const MAX_DECAY_DAYS: f64 = 30.0;

fn time_factor(last_accessed_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days = (now - last_accessed_at).num_seconds() as f64 / 86_400.0;
    (days / MAX_DECAY_DAYS).clamp(0.0, 1.0)
}

fn freq_factor(access_count: u64) -> f64 {
    if access_count == 0 {
        1.0
    } else {
        1.0 / (1.0 + (access_count as f64).ln())
    }
}

/// Forget score for a working memory:
/// `0.5·(1−importance) + 0.3·min(daysSinceAccess/30, 1) + 0.2·freq`.
pub fn working_forget_score(
    importance: f64,
    access_count: u64,
    last_accessed_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    0.5 * (1.0 - importance) + 0.3 * time_factor(last_accessed_at, now) + 0.2 * freq_factor(access_count)
}

/// Forget score for an event triplet:
/// `0.6·min(daysSinceAccess/30, 1) + 0.4·freq`.
pub fn event_forget_score(
    access_count: u64,
    last_accessed_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    0.6 * time_factor(last_accessed_at, now) + 0.4 * freq_factor(access_count)
}

/// Scope-level forgetting over the vector and relational stores.
pub struct ForgettingJob {
    vector: Arc<dyn VectorStore>,
    relation: Arc<dyn RelationStore>,
}

impl ForgettingJob {
    pub fn new(vector: Arc<dyn VectorStore>, relation: Arc<dyn RelationStore>) -> Self {
        Self { vector, relation }
    }

    /// Run all three phases for one scope.
    pub async fn execute(&self, agent_id: &str, user_id: &str) -> ForgetResponse {
        info!(agent_id, user_id, "executing forgetting");
        let mut response = ForgetResponse {
            success: true,
            ..Default::default()
        };

        match self.forget_working(agent_id, user_id).await {
            Ok(count) => response.working_forgot = count,
            Err(e) => warn!(error = %e, "failed to forget working memories"),
        }

        match self.forget_events(agent_id, user_id).await {
            Ok(count) => response.events_forgot = count,
            Err(e) => warn!(error = %e, "failed to forget events"),
        }

        match self.expire_facts(agent_id, user_id).await {
            Ok(count) => response.facts_expired = count,
            Err(e) => warn!(error = %e, "failed to expire fact memories"),
        }

        info!(
            working_forgot = response.working_forgot,
            events_forgot = response.events_forgot,
            facts_expired = response.facts_expired,
            "forgetting completed"
        );
        response
    }

    fn scope(&self, agent_id: &str, user_id: &str) -> SearchQuery {
        SearchQuery::new()
            .with_filter("agent_id", agent_id)
            .with_filter("user_id", user_id)
            .with_limit(1000)
    }

    async fn forget_working(
        &self,
        agent_id: &str,
        user_id: &str,
    ) -> crate::error::Result<usize> {
        let query = self
            .scope(agent_id, user_id)
            .with_filter("type", DOC_SUMMARY)
            .with_filter("memory_type", MemoryType::Working.as_str());
        let docs = self.vector.search(query).await?;

        let now = Utc::now();
        let mut forgot = 0;
        for doc in docs {
            let memory: SummaryMemory = match decode(doc) {
                Ok(memory) => memory,
                Err(e) => {
                    warn!(error = %e, "failed to decode working memory");
                    continue;
                }
            };

            if memory.is_protected || memory.expired_at.is_some() {
                continue;
            }

            let score = working_forget_score(
                memory.importance,
                memory.access_count,
                memory.last_accessed_at,
                now,
            );
            if score > FORGET_THRESHOLD {
                if let Err(e) = self.vector.delete(&memory.id).await {
                    warn!(id = %memory.id, error = %e, "failed to delete working memory");
                    continue;
                }
                forgot += 1;
            }
        }

        Ok(forgot)
    }

    async fn forget_events(&self, agent_id: &str, user_id: &str) -> crate::error::Result<usize> {
        let query = self
            .scope(agent_id, user_id)
            .with_filter("type", DOC_EVENT);
        let docs = self.vector.search(query).await?;

        let now = Utc::now();
        let mut forgot = 0;
        for doc in docs {
            let event: EventTriplet = match decode(doc) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "failed to decode event");
                    continue;
                }
            };

            let score = event_forget_score(event.access_count, event.last_accessed_at, now);
            if score > FORGET_THRESHOLD {
                if let Err(e) = self.vector.delete(&event.id).await {
                    warn!(id = %event.id, error = %e, "failed to delete event");
                }
                if let Err(e) = self.relation.delete_by_event_id(&event.id).await {
                    warn!(id = %event.id, error = %e, "failed to delete event relations");
                }
                forgot += 1;
            }
        }

        Ok(forgot)
    }

    /// Hard-delete unprotected facts older than [`FACT_EXPIRY_DAYS`].
    async fn expire_facts(&self, agent_id: &str, user_id: &str) -> crate::error::Result<usize> {
        let cutoff = Utc::now() - Duration::days(FACT_EXPIRY_DAYS);
        let query = self
            .scope(agent_id, user_id)
            .with_filter("type", DOC_SUMMARY)
            .with_filter("memory_type", MemoryType::Fact.as_str())
            .with_range("created_at", "lt", cutoff.to_rfc3339());
        let docs = self.vector.search(query).await?;

        let mut expired = 0;
        for doc in docs {
            let memory: SummaryMemory = match decode(doc) {
                Ok(memory) => memory,
                Err(_) => continue,
            };

            if memory.is_protected {
                continue;
            }

            if let Err(e) = self.vector.delete(&memory.id).await {
                warn!(id = %memory.id, error = %e, "failed to delete expired fact");
                continue;
            }
            expired += 1;
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_working_score_is_pure_and_monotonic() {
        let now = Utc::now();
        let old = now - Duration::days(60);

        let stale = working_forget_score(0.2, 0, old, now);
        let same = working_forget_score(0.2, 0, old, now);
        assert_eq!(stale, same);

        // importance=0.2, never accessed, 60d stale:
        // 0.5*0.8 + 0.3*1.0 + 0.2*1.0 = 0.9
        assert!((stale - 0.9).abs() < 1e-9);
        assert!(stale > FORGET_THRESHOLD);

        // Higher importance lowers the score.
        assert!(working_forget_score(0.9, 0, old, now) < stale);
        // Frequent access lowers the score.
        assert!(working_forget_score(0.2, 50, old, now) < stale);
        // Recent access lowers the score.
        assert!(working_forget_score(0.2, 0, now, now) < stale);
    }

    #[test]
    fn test_event_score() {
        let now = Utc::now();
        let old = now - Duration::days(45);

        // Never accessed, 45d stale: 0.6*1.0 + 0.4*1.0 = 1.0
        let score = event_forget_score(0, old, now);
        assert!((score - 1.0).abs() < 1e-9);

        // Fresh, frequently accessed events stay.
        assert!(event_forget_score(100, now, now) < FORGET_THRESHOLD);
    }

    #[test]
    fn test_time_factor_caps_at_one() {
        let now = Utc::now();
        assert!((time_factor(now - Duration::days(300), now) - 1.0).abs() < 1e-9);
        assert!(time_factor(now, now).abs() < 1e-9);
    }

    #[test]
    fn test_freq_factor_zero_access_is_one() {
        assert_eq!(freq_factor(0), 1.0);
        assert_eq!(freq_factor(1), 1.0);
        assert!(freq_factor(10) < 1.0);
    }
}
