//! Request handlers (§4.H): thin adapters over `sqrl-core`.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqrl_core::embeddings::Embedder;
use sqrl_core::episode::chunk_episodes;
use sqrl_core::evaluator::evaluate_batch;
use sqrl_core::policy::Policy;
use sqrl_core::retrieval::{self, RetrievalFilters};
use sqrl_core::store::Store;
use sqrl_core::types::{
    Decision, Episode, Event, Memory, MemoryKind, MemoryMetrics, MemoryOp, MemoryStatus, MemoryTier, OwnerType, Polarity,
    Scope,
};
use std::sync::Arc;
use uuid::Uuid;

/// Upstream of this layer, the remote LLM call that turns an episode's
/// events into `MemoryOp`s — treated as an opaque collaborator (§1).
/// Substituted by a deterministic fake in tests.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        episode: &Episode,
        recent_memories: &[Memory],
    ) -> std::result::Result<Vec<MemoryOp>, String>;
}

/// Confidence threshold applied upstream of the commit layer by default
/// (§4.D "Confidence filter").
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.8;

pub struct AppState {
    pub store: Arc<Store>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub extractor: Option<Arc<dyn Extractor>>,
    pub policy: Policy,
    pub max_memories_per_episode: usize,
}

// -- embed_text --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EmbedTextParams {
    text: String,
}

#[derive(Debug, Serialize)]
struct EmbedTextResult {
    embedding: Vec<f32>,
}

pub async fn embed_text(state: &AppState, params: Value) -> Result<Value> {
    let params: EmbedTextParams = serde_json::from_value(params).map_err(|e| {
        tracing::debug!(%e, "malformed embed_text params");
        Error::EmbedEmptyText
    })?;

    if params.text.trim().is_empty() {
        return Err(Error::EmbedEmptyText);
    }

    let embedder = state
        .embedder
        .as_ref()
        .ok_or_else(|| Error::EmbedFailed("no embedder configured".into()))?;

    let embedding = embedder.embed(&params.text).await.map_err(|e| match e {
        sqrl_core::Error::EmptyText => Error::EmbedEmptyText,
        other => Error::EmbedFailed(other.to_string()),
    })?;

    Ok(serde_json::to_value(EmbedTextResult { embedding }).expect("serializable result"))
}

// -- ingest_chunk --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IngestChunkParams {
    project_id: String,
    owner_type: OwnerType,
    owner_id: String,
    #[serde(default)]
    chunk_index: u32,
    events: Vec<Event>,
    #[serde(default)]
    carry_state: Value,
    #[serde(default)]
    recent_memories: Vec<Memory>,
}

#[derive(Debug, Serialize)]
struct IngestChunkResult {
    episodes: Vec<Uuid>,
    memories: Vec<Uuid>,
    carry_state: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    discard_reason: Option<String>,
}

pub async fn ingest_chunk(state: &AppState, params: Value) -> Result<Value> {
    let params: IngestChunkParams =
        serde_json::from_value(params).map_err(|_| Error::ChunkEmpty)?;

    if params.events.is_empty() {
        return Err(Error::ChunkEmpty);
    }
    if params.project_id.trim().is_empty() {
        return Err(Error::InvalidProject(params.project_id));
    }

    let Some(extractor) = &state.extractor else {
        // Mirrors the original's stub behavior when no extractor is wired
        // in: an empty result rather than a hard failure (§9 open
        // question, resolved in SPEC_FULL.md).
        return Ok(serde_json::to_value(IngestChunkResult {
            episodes: vec![],
            memories: vec![],
            carry_state: params.carry_state,
            discard_reason: Some("extractor not configured".to_string()),
        })
        .expect("serializable result"));
    };

    let episodes = chunk_episodes(Some(params.project_id.clone()), params.events);
    let mut episode_ids = Vec::with_capacity(episodes.len());
    let mut memory_ids = Vec::new();

    for episode in episodes {
        state.store.insert_episode(&episode)?;
        episode_ids.push(episode.id);

        let ops = extractor
            .extract(&episode, &params.recent_memories)
            .await
            .map_err(Error::ExtractorError)?;

        let filtered: Vec<MemoryOp> = ops
            .into_iter()
            .filter(|op| op_confidence(op) > DEFAULT_CONFIDENCE_THRESHOLD)
            .take(state.max_memories_per_episode)
            .collect();

        let outcomes = sqrl_core::commit::commit_ops(&state.store, state.embedder.as_deref(), episode.id, &filtered)
            .await?;

        memory_ids.extend(outcomes.into_iter().filter_map(|o| o.new_memory_id));
        state.store.mark_episode_processed(episode.id)?;
    }

    Ok(serde_json::to_value(IngestChunkResult {
        episodes: episode_ids,
        memories: memory_ids,
        carry_state: params.carry_state,
        discard_reason: None,
    })
    .expect("serializable result"))
}

fn op_confidence(op: &MemoryOp) -> f32 {
    match op {
        MemoryOp::Add { confidence, .. } => *confidence,
        MemoryOp::Update { confidence, .. } => *confidence,
        MemoryOp::Deprecate { .. } => 1.0,
    }
}

// -- compose_context --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ComposeContextParams {
    task: String,
    memories: Vec<Memory>,
    #[serde(default = "default_token_budget")]
    token_budget: u32,
}

fn default_token_budget() -> u32 {
    2000
}

#[derive(Debug, Serialize)]
struct ComposeContextResult {
    context_prompt: String,
    used_memory_ids: Vec<Uuid>,
}

pub async fn compose_context(state: &AppState, params: Value) -> Result<Value> {
    let params: ComposeContextParams =
        serde_json::from_value(params).map_err(|_| Error::EmptyTask)?;

    if params.task.trim().is_empty() {
        return Err(Error::EmptyTask);
    }

    let embedder = state
        .embedder
        .as_ref()
        .ok_or_else(|| Error::EmbedFailed("no embedder configured".into()))?;
    let query_embedding = embedder
        .embed(&params.task)
        .await
        .map_err(|e| Error::EmbedFailed(e.to_string()))?;

    let ranked = retrieval::rank(
        &params.memories,
        &query_embedding,
        params.memories.len(),
        0.0,
        &RetrievalFilters::default(),
    )?;
    let context_prompt = retrieval::format_context(&ranked, params.token_budget);
    let used_memory_ids = ranked.iter().map(|r| r.memory.id).collect();

    Ok(serde_json::to_value(ComposeContextResult {
        context_prompt,
        used_memory_ids,
    })
    .expect("serializable result"))
}

// -- search_memories --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchMemoriesFilters {
    #[serde(default)]
    scope: Option<Scope>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    kind: Option<MemoryKind>,
}

#[derive(Debug, Deserialize)]
struct SearchMemoriesParams {
    project_id: String,
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    filters: Option<SearchMemoriesFilters>,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Serialize)]
struct SearchMemoriesResult {
    results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
struct SearchHit {
    memory: Memory,
    similarity: f32,
}

pub async fn search_memories(state: &AppState, params: Value) -> Result<Value> {
    let params: SearchMemoriesParams =
        serde_json::from_value(params).map_err(|_| Error::ProjectNotInitialized(String::new()))?;

    if params.project_id.trim().is_empty() {
        return Err(Error::ProjectNotInitialized(params.project_id));
    }
    if params.query.trim().is_empty() {
        return Err(Error::EmptyQuery);
    }

    let embedder = state
        .embedder
        .as_ref()
        .ok_or_else(|| Error::EmbedFailed("no embedder configured".into()))?;
    let query_embedding = embedder
        .embed(&params.query)
        .await
        .map_err(|e| Error::EmbedFailed(e.to_string()))?;

    let store_filters = sqrl_core::store::MemoryFilters {
        scope: params.filters.as_ref().and_then(|f| f.scope),
        owner_id: params.filters.as_ref().and_then(|f| f.owner_id.clone()),
        kind: params.filters.as_ref().and_then(|f| f.kind),
        project_id: Some(params.project_id),
    };
    let candidates = state.store.get_active_memories(&store_filters, 1000)?;

    let retrieval_filters = RetrievalFilters {
        scope: store_filters.scope,
        owner_id: store_filters.owner_id.clone(),
        kind: store_filters.kind,
    };
    let ranked = retrieval::rank(&candidates, &query_embedding, params.top_k, 0.0, &retrieval_filters)?;

    let results = ranked
        .into_iter()
        .map(|r| SearchHit {
            memory: r.memory,
            similarity: r.similarity,
        })
        .collect();

    Ok(serde_json::to_value(SearchMemoriesResult { results }).expect("serializable result"))
}

// -- evaluate_memories --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EvaluateMemoryInput {
    id: Uuid,
    kind: MemoryKind,
    status: MemoryStatus,
    tier: MemoryTier,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    metrics: EvaluateMemoryMetricsInput,
}

#[derive(Debug, Deserialize)]
struct EvaluateMemoryMetricsInput {
    use_count: u32,
    opportunities: u32,
    #[serde(default)]
    suspected_regret_hits: u32,
    #[serde(default)]
    estimated_regret_saved: f32,
    #[serde(default)]
    last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct EvaluateMemoriesParams {
    #[serde(default)]
    now: Option<DateTime<Utc>>,
    memories: Vec<EvaluateMemoryInput>,
}

#[derive(Debug, Serialize)]
struct EvaluateMemoriesResult {
    decisions: Vec<Decision>,
}

fn placeholder_memory(input: &EvaluateMemoryInput) -> Memory {
    let now = Utc::now();
    Memory {
        id: input.id,
        scope: Scope::Project,
        project_id: None,
        owner_type: OwnerType::User,
        owner_id: String::new(),
        kind: input.kind,
        tier: input.tier,
        polarity: Polarity::Positive,
        key: None,
        text: String::new(),
        status: input.status,
        confidence: 1.0,
        expires_at: input.expires_at,
        embedding: None,
        created_at: now,
        updated_at: now,
    }
}

fn placeholder_metrics(input: &EvaluateMemoryInput) -> MemoryMetrics {
    MemoryMetrics {
        memory_id: input.id,
        use_count: input.metrics.use_count,
        opportunities: input.metrics.opportunities,
        suspected_regret_hits: input.metrics.suspected_regret_hits,
        estimated_regret_saved: input.metrics.estimated_regret_saved,
        last_used_at: input.metrics.last_used_at,
        last_evaluated_at: None,
    }
}

/// Evaluate is read-only relative to the Store (§5): this handler never
/// touches `state.store`, it only runs the pure evaluator over the
/// caller-supplied snapshot.
pub async fn evaluate_memories(state: &AppState, params: Value) -> Result<Value> {
    let params: EvaluateMemoriesParams =
        serde_json::from_value(params).map_err(|_| Error::EvaluateListEmpty)?;

    if params.memories.is_empty() {
        return Err(Error::EvaluateListEmpty);
    }

    let now = params.now.unwrap_or_else(Utc::now);
    let items: Vec<(Memory, MemoryMetrics)> = params
        .memories
        .iter()
        .map(|input| (placeholder_memory(input), placeholder_metrics(input)))
        .collect();

    let decisions = evaluate_batch(&items, now, &state.policy)
        .into_iter()
        .filter(|d| d.result != sqrl_core::types::EvalResult::NoChange)
        .collect();

    Ok(serde_json::to_value(EvaluateMemoriesResult { decisions }).expect("serializable result"))
}
