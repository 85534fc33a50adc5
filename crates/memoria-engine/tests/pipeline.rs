//! End-to-end pipeline tests over the in-memory store doubles and a
//! scripted LLM backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use memoria_engine::{EngineConfig, EngineError, Memory};
use memoria_llm::{Embedder, LlmFacade, MockTextModel};
use memoria_store::{
    Document, MemoryGraphStore, MemoryRelationStore, MemoryVectorStore, RelationStore,
    VectorStore,
};
use memoria_types::{
    AddRequest, EntityType, ForgetRequest, MemoryType, Message, RetrieveOptions, RetrieveRequest,
    Role,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Keyword-bucket embedder: texts about the same subject land on the same
/// axis, so similarity behaves semantically enough for pipeline tests.
struct StubEmbedder;

const AXES: &[&[&str]] = &[
    &["咖啡", "原味", "星巴克", "喝"],
    &["住在", "北京", "上海", "哪里"],
    &["旅行", "计划"],
];

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, text: &str) -> memoria_llm::Result<Vec<f32>> {
        let mut v = vec![0.0f32; 4];
        for (axis, words) in AXES.iter().enumerate() {
            if words.iter().any(|w| text.contains(w)) {
                v[axis] = 1.0;
            }
        }
        if v.iter().all(|x| *x == 0.0) {
            v[3] = 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        Ok(v.into_iter().map(|x| x / norm).collect())
    }

    fn dimensions(&self) -> usize {
        4
    }

    fn name(&self) -> &str {
        "stub"
    }
}

struct Fixture {
    memory: Memory,
    model: Arc<MockTextModel>,
    vector: Arc<MemoryVectorStore>,
    graph: Arc<MemoryGraphStore>,
    relation: Arc<MemoryRelationStore>,
}

fn fixture() -> Fixture {
    let model = Arc::new(MockTextModel::new());
    let vector = Arc::new(MemoryVectorStore::new());
    let graph = Arc::new(MemoryGraphStore::new());
    let relation = Arc::new(MemoryRelationStore::new());

    let llm = LlmFacade::new(model.clone(), Arc::new(StubEmbedder));
    let memory = Memory::new(
        llm,
        vector.clone(),
        graph.clone(),
        relation.clone(),
        EngineConfig::default(),
    );

    Fixture {
        memory,
        model,
        vector,
        graph,
        relation,
    }
}

/// Script the model for the coffee conversation used by several tests.
fn script_coffee_conversation(model: &MockTextModel) {
    model.respond_to(
        "Extract the entities",
        r#"{
            "entities": [
                {"name": "星巴克", "type": "place", "description": "连锁咖啡店"},
                {"name": "axin", "type": "person", "description": "用户"}
            ],
            "relations": [
                {"subject": "axin", "predicate": "喜欢", "object": "星巴克",
                 "fact": "axin 喜欢在星巴克喝原味咖啡"},
                {"subject": "axin", "predicate": "认识", "object": "幽灵实体",
                 "fact": "引用了未提取的实体"}
            ]
        }"#,
    );
    model.respond_to(
        "Distill",
        r#"{
            "memories": [
                {"content": "用户喜欢在星巴克喝原味不加糖的咖啡", "importance": 0.6,
                 "memory_type": "working", "keywords": ["咖啡", "原味"]}
            ]
        }"#,
    );
    model.respond_to(
        "Extract events",
        r#"{
            "events": [
                {"trigger_word": "去了", "argument1": "用户", "argument2": "星巴克"},
                {"trigger_word": "喝", "argument1": "用户", "argument2": "咖啡"}
            ],
            "relations": [
                {"from_index": 0, "to_index": 1, "relation_type": "temporal"},
                {"from_index": 0, "to_index": 9, "relation_type": "causal"}
            ]
        }"#,
    );
    model.respond_to("Summarize the key", r#"{"content": "用户聊了去星巴克喝咖啡"}"#);
    model.respond_to("topic label", r#"{"topic": "咖啡"}"#);
}

fn coffee_messages() -> Vec<Message> {
    vec![
        Message::new(Role::User, "axin", "我今天去了星巴克喝咖啡"),
        Message::new(Role::Assistant, "jarvis", "好的"),
        Message::new(Role::User, "axin", "我喜欢原味不加糖"),
    ]
}

fn add_request(session: &str, messages: Vec<Message>) -> AddRequest {
    AddRequest {
        agent_id: "jarvis".into(),
        user_id: "axin".into(),
        session_id: session.into(),
        messages,
    }
}

fn retrieve_request(query: &str, options: RetrieveOptions) -> RetrieveRequest {
    RetrieveRequest {
        agent_id: "jarvis".into(),
        user_id: "axin".into(),
        session_id: "s1".into(),
        query: query.into(),
        limit: 0,
        options,
    }
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within timeout");
}

// ─────────────────────────────────────────────────────────────────────────────
// Write pipeline
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_add_builds_all_layers() {
    let f = fixture();
    script_coffee_conversation(&f.model);

    let resp = f
        .memory
        .add(CancellationToken::new(), add_request("s1", coffee_messages()))
        .await
        .unwrap();

    assert!(resp.success);
    assert_eq!(resp.episodes.len(), 3);
    assert!(resp.episodes.iter().all(|e| e.topic == "咖啡"));
    assert!(resp.episodes.iter().all(|e| !e.embedding.is_empty()));

    // Entities: both stored, 星巴克 typed as a place.
    let starbucks = resp
        .entities
        .iter()
        .find(|e| e.name == "星巴克")
        .expect("星巴克 entity");
    assert_eq!(starbucks.entity_type, EntityType::Place);
    assert_eq!(f.graph.node_count(), 2);

    // The orphan relation was dropped; the resolvable one became an edge.
    assert_eq!(resp.edges.len(), 1);
    let edge = &resp.edges[0];
    assert!(edge.fact.contains("喜欢") && edge.fact.contains("原味"));
    assert_eq!(edge.episode_ids.len(), 3);
    assert_eq!(f.graph.rel_count(), 1);

    // One working memory in range.
    assert_eq!(resp.memories.len(), 1);
    let memory = &resp.memories[0];
    assert_eq!(memory.memory_type, MemoryType::Working);
    assert!((0.0..=1.0).contains(&memory.importance));
    assert!(!memory.is_protected);

    // Two events, one in-range relation persisted.
    assert_eq!(resp.events.len(), 2);
    assert_eq!(resp.event_relations.len(), 1);
    assert_eq!(f.relation.len(), 1);
    assert!(f
        .relation
        .get(&resp.events[0].id, &resp.events[1].id, "temporal")
        .is_some());
}

#[tokio::test]
async fn test_reextraction_reuses_entity_id() {
    let f = fixture();
    script_coffee_conversation(&f.model);

    let first = f
        .memory
        .add(CancellationToken::new(), add_request("s1", coffee_messages()))
        .await
        .unwrap();
    let second = f
        .memory
        .add(CancellationToken::new(), add_request("s1", coffee_messages()))
        .await
        .unwrap();

    let id_of = |resp: &memoria_types::AddResponse| {
        resp.entities
            .iter()
            .find(|e| e.name == "星巴克")
            .map(|e| e.id.clone())
            .unwrap()
    };
    assert_eq!(id_of(&first), id_of(&second));
    assert_eq!(f.graph.node_count(), 2);
}

#[tokio::test]
async fn test_add_empty_messages_skips_llm() {
    let f = fixture();
    let resp = f
        .memory
        .add(CancellationToken::new(), add_request("s1", vec![]))
        .await
        .unwrap();

    assert!(resp.success);
    assert!(resp.episodes.is_empty());
    assert!(resp.memories.is_empty());
    assert_eq!(f.model.request_count(), 0);
    assert!(f.vector.is_empty());
}

#[tokio::test]
async fn test_add_cancelled_scope_aborts() {
    let f = fixture();
    script_coffee_conversation(&f.model);

    let token = CancellationToken::new();
    token.cancel();

    let err = f
        .memory
        .add(token, add_request("s1", coffee_messages()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}

#[tokio::test]
async fn test_extraction_failure_degrades_to_partial_results() {
    let f = fixture();
    // Topic works, extraction prompt has no scripted response and fails.
    f.model.respond_to("topic label", r#"{"topic": "咖啡"}"#);

    let resp = f
        .memory
        .add(CancellationToken::new(), add_request("s1", coffee_messages()))
        .await
        .unwrap();

    // Episodes were stored before the failing stage; nothing downstream ran.
    assert!(resp.success);
    assert_eq!(resp.episodes.len(), 3);
    assert!(resp.entities.is_empty());
    assert!(resp.memories.is_empty());
    assert!(resp.events.is_empty());
}

#[tokio::test]
async fn test_topic_change_generates_summary() {
    let f = fixture();
    f.model
        .respond_to("Extract the entities", r#"{"entities": [], "relations": []}"#);
    f.model.respond_to("Distill", r#"{"memories": []}"#);
    f.model
        .respond_to("Extract events", r#"{"events": [], "relations": []}"#);
    f.model
        .respond_to("Summarize the key", r#"{"content": "总结了咖啡话题"}"#);
    f.model.respond_to("星巴克", r#"{"topic": "咖啡"}"#);
    f.model.respond_to("旅行", r#"{"topic": "旅行"}"#);

    let first = f
        .memory
        .add(
            CancellationToken::new(),
            add_request("s1", vec![Message::new(Role::User, "axin", "我今天去了星巴克")]),
        )
        .await
        .unwrap();
    assert!(first.summaries.is_empty());

    let second = f
        .memory
        .add(
            CancellationToken::new(),
            add_request("s1", vec![Message::new(Role::User, "axin", "我想去旅行")]),
        )
        .await
        .unwrap();

    assert_eq!(second.summaries.len(), 1);
    let summary = &second.summaries[0];
    assert!(summary.content.contains("总结"));
    assert_eq!(summary.episode_ids, vec![first.episodes[0].id.clone()]);
    assert_eq!(summary.topic, "咖啡");
}

#[tokio::test]
async fn test_same_topic_produces_no_summary() {
    let f = fixture();
    f.model
        .respond_to("Extract the entities", r#"{"entities": [], "relations": []}"#);
    f.model.respond_to("Distill", r#"{"memories": []}"#);
    f.model
        .respond_to("Extract events", r#"{"events": [], "relations": []}"#);
    f.model.respond_to("topic label", r#"{"topic": "咖啡"}"#);

    for content in ["我今天去了星巴克", "我喜欢喝咖啡"] {
        let resp = f
            .memory
            .add(
                CancellationToken::new(),
                add_request("s1", vec![Message::new(Role::User, "axin", content)]),
            )
            .await
            .unwrap();
        assert!(resp.summaries.is_empty());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Read pipeline
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_retrieve_builds_memory_context() {
    let f = fixture();
    script_coffee_conversation(&f.model);
    f.memory
        .add(CancellationToken::new(), add_request("s1", coffee_messages()))
        .await
        .unwrap();

    let resp = f
        .memory
        .retrieve(
            CancellationToken::new(),
            retrieve_request("用户喜欢喝什么", RetrieveOptions::default()),
        )
        .await
        .unwrap();

    assert!(resp.success);
    assert!(resp.total >= 2);
    assert!(resp.memory_context.contains("原味"));
    assert!(resp.memory_context.contains("星巴克"));
    assert!(resp.memory_context.contains("## 近期对话"));
    assert!(!resp.short_term.is_empty());
}

#[tokio::test]
async fn test_retrieve_all_buckets_disabled() {
    let f = fixture();
    script_coffee_conversation(&f.model);
    f.memory
        .add(CancellationToken::new(), add_request("s1", coffee_messages()))
        .await
        .unwrap();

    let options = RetrieveOptions {
        max_facts: -1,
        max_graph: -1,
        max_working: -1,
        ..Default::default()
    };
    let resp = f
        .memory
        .retrieve(
            CancellationToken::new(),
            retrieve_request("用户喜欢喝什么", options),
        )
        .await
        .unwrap();

    assert!(resp.facts.is_empty());
    assert!(resp.working.is_empty());
    assert!(resp.events.is_empty());
    assert!(!resp.short_term.is_empty());
    assert!(resp.memory_context.contains("## 近期对话"));
    assert!(!resp.memory_context.contains("## 用户事实"));
    assert!(!resp.memory_context.contains("## 工作记忆"));
    assert!(!resp.memory_context.contains("## 相关事件"));
}

#[tokio::test]
async fn test_retrieve_nothing_yields_empty_literal() {
    let f = fixture();
    let resp = f
        .memory
        .retrieve(
            CancellationToken::new(),
            retrieve_request("任何问题", RetrieveOptions::default()),
        )
        .await
        .unwrap();

    assert_eq!(resp.total, 0);
    assert_eq!(resp.memory_context, "没有找到相关的记忆信息。");
}

#[tokio::test]
async fn test_retrieve_validation() {
    let f = fixture();
    let mut req = retrieve_request("q", RetrieveOptions::default());
    req.agent_id = String::new();
    assert!(matches!(
        f.memory.retrieve(CancellationToken::new(), req).await,
        Err(EngineError::Validation(_))
    ));

    let mut req = retrieve_request("", RetrieveOptions::default());
    req.query = String::new();
    assert!(matches!(
        f.memory.retrieve(CancellationToken::new(), req).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn test_retrieve_bumps_access_stats() {
    let f = fixture();
    script_coffee_conversation(&f.model);
    let added = f
        .memory
        .add(CancellationToken::new(), add_request("s1", coffee_messages()))
        .await
        .unwrap();
    let memory_id = added.memories[0].id.clone();

    f.memory
        .retrieve(
            CancellationToken::new(),
            retrieve_request("用户喜欢喝什么", RetrieveOptions::default()),
        )
        .await
        .unwrap();

    let vector = f.vector.clone();
    wait_until(move || {
        let vector = vector.clone();
        let memory_id = memory_id.clone();
        async move {
            let doc = vector.get(&memory_id).await.unwrap().unwrap();
            doc.get("access_count").and_then(Value::as_u64) == Some(1)
        }
    })
    .await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Consistency check
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_conflicting_fact_expires_older_row() {
    let f = fixture();
    f.model.respond_to("topic label", r#"{"topic": "居住"}"#);
    f.model
        .respond_to("Extract the entities", r#"{"entities": [], "relations": []}"#);
    f.model
        .respond_to("Extract events", r#"{"events": [], "relations": []}"#);
    f.model.respond_to(
        "住在北京",
        r#"{"memories": [{"content": "用户住在北京", "importance": 0.95,
            "memory_type": "fact", "keywords": ["住在"]}]}"#,
    );
    f.model.respond_to(
        "住在上海",
        r#"{"memories": [{"content": "用户住在上海", "importance": 0.95,
            "memory_type": "fact", "keywords": ["住在"]}]}"#,
    );

    let first = f
        .memory
        .add(
            CancellationToken::new(),
            add_request("s1", vec![Message::new(Role::User, "axin", "我住在北京")]),
        )
        .await
        .unwrap();
    let old_id = first.memories[0].id.clone();
    assert!(first.memories[0].is_protected);

    f.memory
        .add(
            CancellationToken::new(),
            add_request("s1", vec![Message::new(Role::User, "axin", "我住在上海")]),
        )
        .await
        .unwrap();

    // Conflict detection is fire-and-forget; the older row gains expired_at
    // within a bounded time.
    let vector = f.vector.clone();
    let id = old_id.clone();
    wait_until(move || {
        let vector = vector.clone();
        let id = id.clone();
        async move {
            let doc = vector.get(&id).await.unwrap().unwrap();
            doc.get("expired_at").is_some_and(|v| !v.is_null())
        }
    })
    .await;

    // Subsequent retrieval sees only the newer fact.
    let resp = f
        .memory
        .retrieve(
            CancellationToken::new(),
            retrieve_request("用户住在哪里", RetrieveOptions::default()),
        )
        .await
        .unwrap();
    assert_eq!(resp.facts.len(), 1);
    assert!(resp.facts[0].content.contains("上海"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Forgetting
// ─────────────────────────────────────────────────────────────────────────────

async fn seed_memory_doc(
    vector: &MemoryVectorStore,
    id: &str,
    memory_type: &str,
    importance: f64,
    days_old: i64,
    is_protected: bool,
) {
    let at = (chrono::Utc::now() - chrono::Duration::days(days_old)).to_rfc3339();
    let doc: Document = serde_json::from_value(serde_json::json!({
        "id": id,
        "type": "summary",
        "memory_type": memory_type,
        "agent_id": "jarvis",
        "user_id": "axin",
        "content": "一些旧记忆",
        "importance": importance,
        "keywords": [],
        "embedding": [0.5, 0.5, 0.5, 0.5],
        "access_count": 0,
        "last_accessed_at": at,
        "is_protected": is_protected,
        "created_at": at,
        "updated_at": at
    }))
    .unwrap();
    vector.store(id, doc).await.unwrap();
}

#[tokio::test]
async fn test_forget_evicts_stale_working_memories() {
    let f = fixture();
    for i in 0..3 {
        seed_memory_doc(&f.vector, &format!("mem_w{i}"), "working", 0.2, 60, false).await;
    }
    seed_memory_doc(&f.vector, "mem_protected", "fact", 0.95, 60, true).await;

    let resp = f
        .memory
        .forget(ForgetRequest {
            agent_id: "jarvis".into(),
            user_id: "axin".into(),
        })
        .await
        .unwrap();

    assert!(resp.success);
    assert_eq!(resp.working_forgot, 3);
    assert_eq!(resp.facts_expired, 0);

    // The stale working memories are gone; the protected fact survives.
    for i in 0..3 {
        assert!(f.vector.get(&format!("mem_w{i}")).await.unwrap().is_none());
    }
    assert!(f.vector.get("mem_protected").await.unwrap().is_some());

    let retrieve = f
        .memory
        .retrieve(
            CancellationToken::new(),
            retrieve_request("旧记忆", RetrieveOptions::default()),
        )
        .await
        .unwrap();
    assert!(retrieve.working.is_empty());
}

#[tokio::test]
async fn test_forget_expires_old_unprotected_facts() {
    let f = fixture();
    seed_memory_doc(&f.vector, "mem_old", "fact", 0.5, 120, false).await;
    seed_memory_doc(&f.vector, "mem_recent", "fact", 0.5, 10, false).await;
    seed_memory_doc(&f.vector, "mem_guarded", "fact", 0.95, 120, true).await;

    let resp = f
        .memory
        .forget(ForgetRequest {
            agent_id: "jarvis".into(),
            user_id: "axin".into(),
        })
        .await
        .unwrap();

    assert_eq!(resp.facts_expired, 1);
    assert!(f.vector.get("mem_old").await.unwrap().is_none());
    assert!(f.vector.get("mem_recent").await.unwrap().is_some());
    assert!(f.vector.get("mem_guarded").await.unwrap().is_some());
}

#[tokio::test]
async fn test_forget_evicts_stale_events_with_cascade() {
    let f = fixture();
    let at = (chrono::Utc::now() - chrono::Duration::days(60)).to_rfc3339();
    let doc: Document = serde_json::from_value(serde_json::json!({
        "id": "evt_old",
        "type": "event",
        "agent_id": "jarvis",
        "user_id": "axin",
        "trigger_word": "去了",
        "argument1": "用户",
        "argument2": "星巴克",
        "embedding": [1.0, 0.0, 0.0, 0.0],
        "access_count": 0,
        "last_accessed_at": at,
        "created_at": at
    }))
    .unwrap();
    f.vector.store("evt_old", doc).await.unwrap();
    f.relation
        .create_relation(&memoria_types::EventRelation {
            id: "rel_1".into(),
            relation_type: memoria_types::RelationType::Causal,
            from_event_id: "evt_old".into(),
            to_event_id: "evt_other".into(),
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let resp = f
        .memory
        .forget(ForgetRequest {
            agent_id: "jarvis".into(),
            user_id: "axin".into(),
        })
        .await
        .unwrap();

    assert_eq!(resp.events_forgot, 1);
    assert!(f.vector.get("evt_old").await.unwrap().is_none());
    assert_eq!(f.relation.len(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Delete
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_delete_event_cascades_relations() {
    let f = fixture();
    let doc: Document = serde_json::from_value(serde_json::json!({
        "id": "evt_x",
        "type": "event",
        "agent_id": "jarvis",
        "user_id": "axin",
        "trigger_word": "喝",
        "argument1": "用户",
        "argument2": "咖啡",
        "access_count": 0,
        "last_accessed_at": chrono::Utc::now().to_rfc3339(),
        "created_at": chrono::Utc::now().to_rfc3339()
    }))
    .unwrap();
    f.vector.store("evt_x", doc).await.unwrap();
    f.relation
        .create_relation(&memoria_types::EventRelation {
            id: "rel_1".into(),
            relation_type: memoria_types::RelationType::Temporal,
            from_event_id: "evt_x".into(),
            to_event_id: "evt_y".into(),
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    f.memory.delete("evt_x").await.unwrap();
    assert!(f.vector.get("evt_x").await.unwrap().is_none());
    assert_eq!(f.relation.len(), 0);

    // Deleting again is NotFound.
    assert!(f.memory.delete("evt_x").await.is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_adds_interleave_without_loss() {
    let f = fixture();
    script_coffee_conversation(&f.model);

    let batch = |tag: &str| -> Vec<Message> {
        (0..5)
            .map(|i| Message::new(Role::User, "axin", format!("{tag} 喝咖啡 {i}")))
            .collect()
    };

    let (a, b) = tokio::join!(
        f.memory
            .add(CancellationToken::new(), add_request("s1", batch("甲"))),
        f.memory
            .add(CancellationToken::new(), add_request("s1", batch("乙"))),
    );
    a.unwrap();
    b.unwrap();

    let resp = f
        .memory
        .retrieve(
            CancellationToken::new(),
            retrieve_request("咖啡", RetrieveOptions::default()),
        )
        .await
        .unwrap();

    // All 10 interleaved messages survive, none duplicated.
    assert_eq!(resp.short_term.len(), 10);
    let mut contents: Vec<String> = resp
        .short_term
        .iter()
        .map(|m| m.content.clone())
        .collect();
    contents.sort();
    contents.dedup();
    assert_eq!(contents.len(), 10);
}
