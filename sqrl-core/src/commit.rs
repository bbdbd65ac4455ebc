//! Commit layer (§4.D): applies a batch of extractor `MemoryOp`s to the
//! Store.

use crate::embeddings::Embedder;
use crate::error::Result;
use crate::store::{NewMemory, Store};
use crate::types::MemoryOp;
use uuid::Uuid;

/// Per-op outcome, reported back to the caller so `ingest_chunk` can build
/// its response (§4.H).
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub op_index: usize,
    pub new_memory_id: Option<Uuid>,
    pub deprecated_memory_id: Option<Uuid>,
}

/// Applies `ops` against `store` in order (§4.D "ops in the batch are
/// applied in input order; earlier ops are visible to later ones'
/// reads" — true here because the Store commits each op's transaction
/// before the next op runs).
///
/// Embedding generation is best-effort: on failure the memory commits with
/// `embedding = NULL`, searchable by text only (§4.D, §9 open question —
/// documented in `DESIGN.md`).
#[tracing::instrument(skip(store, embedder, ops), fields(op_count = ops.len()))]
pub async fn commit_ops(
    store: &Store,
    embedder: Option<&dyn Embedder>,
    episode_id: Uuid,
    ops: &[MemoryOp],
) -> Result<Vec<CommitOutcome>> {
    let mut outcomes = Vec::with_capacity(ops.len());

    for (op_index, op) in ops.iter().enumerate() {
        let outcome = match op {
            MemoryOp::Add {
                scope,
                project_id,
                owner_type,
                owner_id,
                kind,
                tier,
                polarity,
                key,
                text,
                confidence,
                source,
                frustration,
            } => {
                let embedding = embed_best_effort(embedder, text).await;
                let new = NewMemory {
                    scope: *scope,
                    project_id: project_id.clone(),
                    owner_type: *owner_type,
                    owner_id: owner_id.clone(),
                    kind: *kind,
                    tier: *tier,
                    polarity: *polarity,
                    key: key.clone(),
                    text: text.clone(),
                    confidence: *confidence,
                    source: *source,
                    frustration: *frustration,
                };
                let id = store.insert_memory(&new, episode_id, embedding.as_deref())?;
                CommitOutcome {
                    op_index,
                    new_memory_id: Some(id),
                    deprecated_memory_id: None,
                }
            }
            MemoryOp::Update {
                target_memory_id,
                scope,
                project_id,
                owner_type,
                owner_id,
                kind,
                tier,
                polarity,
                text,
                confidence,
                source,
                frustration,
            } => {
                // Deprecate-then-insert (§4.D, §9 "no cyclic graphs"): the
                // old row is never rewritten in place. The new row inherits
                // the old row's `key` so downstream lookups keep working.
                let previous = store
                    .get_memory_by_id(*target_memory_id)?
                    .ok_or(crate::error::Error::NotFound(*target_memory_id))?;
                store.deprecate_memory(*target_memory_id)?;

                let embedding = embed_best_effort(embedder, text).await;
                let new = NewMemory {
                    scope: *scope,
                    project_id: project_id.clone(),
                    owner_type: *owner_type,
                    owner_id: owner_id.clone(),
                    kind: *kind,
                    tier: *tier,
                    polarity: *polarity,
                    key: previous.key.clone(),
                    text: text.clone(),
                    confidence: *confidence,
                    source: *source,
                    frustration: *frustration,
                };
                let id = store.insert_memory(&new, episode_id, embedding.as_deref())?;
                CommitOutcome {
                    op_index,
                    new_memory_id: Some(id),
                    deprecated_memory_id: Some(*target_memory_id),
                }
            }
            MemoryOp::Deprecate { target_memory_id } => {
                store.deprecate_memory(*target_memory_id)?;
                CommitOutcome {
                    op_index,
                    new_memory_id: None,
                    deprecated_memory_id: Some(*target_memory_id),
                }
            }
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

async fn embed_best_effort(embedder: Option<&dyn Embedder>, text: &str) -> Option<Vec<f32>> {
    match embedder {
        Some(embedder) => match embedder.embed(text).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                tracing::warn!(error = %err, "embedding failed during commit, proceeding with embedding = NULL");
                None
            }
        },
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbedder;
    use crate::store::Store;
    use crate::types::{Episode, EvidenceSource, Frustration, MemoryKind, MemoryStatus, MemoryTier, OwnerType, Polarity, Scope};
    use chrono::Utc;

    fn episode() -> Episode {
        Episode {
            id: Uuid::new_v4(),
            project_id: Some("proj".into()),
            events: vec![],
            error_count: 0,
            retry_loops: 0,
            user_frustration: Frustration::None,
            processed: false,
            created_at: Utc::now(),
        }
    }

    fn add_op(text: &str, key: Option<&str>) -> MemoryOp {
        MemoryOp::Add {
            scope: Scope::Project,
            project_id: Some("proj".into()),
            owner_type: OwnerType::User,
            owner_id: "u1".into(),
            kind: MemoryKind::Pattern,
            tier: MemoryTier::ShortTerm,
            polarity: Polarity::Positive,
            key: key.map(String::from),
            text: text.into(),
            confidence: 0.9,
            source: EvidenceSource::ExplicitStatement,
            frustration: Frustration::None,
        }
    }

    #[tokio::test]
    async fn add_creates_a_provisional_memory_with_embedding() {
        let store = Store::open_in_memory().unwrap();
        let ep = episode();
        store.insert_episode(&ep).unwrap();
        let embedder = MockEmbedder::new(8);

        let outcomes = commit_ops(&store, Some(&embedder), ep.id, &[add_op("use rustls", None)])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        let id = outcomes[0].new_memory_id.expect("add produces a new id");
        let memory = store.get_memory_by_id(id).unwrap().unwrap();
        assert_eq!(memory.status, MemoryStatus::Provisional);
        assert!(memory.embedding.is_some());
    }

    #[tokio::test]
    async fn add_without_embedder_commits_with_null_embedding() {
        let store = Store::open_in_memory().unwrap();
        let ep = episode();
        store.insert_episode(&ep).unwrap();

        let outcomes = commit_ops(&store, None, ep.id, &[add_op("use rustls", None)])
            .await
            .unwrap();

        let id = outcomes[0].new_memory_id.unwrap();
        let memory = store.get_memory_by_id(id).unwrap().unwrap();
        assert!(memory.embedding.is_none());
    }

    #[tokio::test]
    async fn update_deprecates_old_row_and_inserts_new_one_inheriting_key() {
        let store = Store::open_in_memory().unwrap();
        let ep = episode();
        store.insert_episode(&ep).unwrap();

        let add_outcomes = commit_ops(&store, None, ep.id, &[add_op("old text", Some("project.http.client"))])
            .await
            .unwrap();
        let old_id = add_outcomes[0].new_memory_id.unwrap();

        let update_op = MemoryOp::Update {
            target_memory_id: old_id,
            scope: Scope::Project,
            project_id: Some("proj".into()),
            owner_type: OwnerType::User,
            owner_id: "u1".into(),
            kind: MemoryKind::Pattern,
            tier: MemoryTier::ShortTerm,
            polarity: Polarity::Positive,
            text: "new text".into(),
            confidence: 0.95,
            source: EvidenceSource::UserCorrection,
            frustration: Frustration::None,
        };

        let update_outcomes = commit_ops(&store, None, ep.id, &[update_op]).await.unwrap();
        let new_id = update_outcomes[0].new_memory_id.unwrap();

        let old_memory = store.get_memory_by_id(old_id).unwrap().unwrap();
        assert_eq!(old_memory.status, MemoryStatus::Deprecated);

        let new_memory = store.get_memory_by_id(new_id).unwrap().unwrap();
        assert_eq!(new_memory.key.as_deref(), Some("project.http.client"));
        assert_eq!(new_memory.text, "new text");
    }

    #[tokio::test]
    async fn deprecate_sets_status_and_produces_no_new_row() {
        let store = Store::open_in_memory().unwrap();
        let ep = episode();
        store.insert_episode(&ep).unwrap();

        let add_outcomes = commit_ops(&store, None, ep.id, &[add_op("text", None)]).await.unwrap();
        let id = add_outcomes[0].new_memory_id.unwrap();

        let outcomes = commit_ops(&store, None, ep.id, &[MemoryOp::Deprecate { target_memory_id: id }])
            .await
            .unwrap();

        assert!(outcomes[0].new_memory_id.is_none());
        assert_eq!(outcomes[0].deprecated_memory_id, Some(id));
        let memory = store.get_memory_by_id(id).unwrap().unwrap();
        assert_eq!(memory.status, MemoryStatus::Deprecated);
    }

    #[tokio::test]
    async fn ops_in_batch_apply_in_order_and_are_visible_to_later_ops() {
        let store = Store::open_in_memory().unwrap();
        let ep = episode();
        store.insert_episode(&ep).unwrap();

        let add_outcomes = commit_ops(&store, None, ep.id, &[add_op("text", Some("k"))]).await.unwrap();
        let first_id = add_outcomes[0].new_memory_id.unwrap();

        let update_op = MemoryOp::Update {
            target_memory_id: first_id,
            scope: Scope::Project,
            project_id: Some("proj".into()),
            owner_type: OwnerType::User,
            owner_id: "u1".into(),
            kind: MemoryKind::Pattern,
            tier: MemoryTier::ShortTerm,
            polarity: Polarity::Positive,
            text: "replacement".into(),
            confidence: 0.9,
            source: EvidenceSource::RepeatedPattern,
            frustration: Frustration::None,
        };
        let outcomes = commit_ops(&store, None, ep.id, &[update_op]).await.unwrap();
        let second_id = outcomes[0].new_memory_id.unwrap();

        let active = store.get_memories_by_key("k", Some(MemoryStatus::Provisional)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second_id);
    }
}
