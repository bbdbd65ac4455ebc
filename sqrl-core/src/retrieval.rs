//! Retrieval engine (§4.E): ranks memories by semantic similarity to a
//! query, combined with tier/kind priors, and formats the result as a
//! Markdown context block.

use crate::embeddings::bytes_to_embedding;
use crate::error::Result;
use crate::types::{Memory, MemoryKind, MemoryTier, Polarity};

/// Filters narrowing the candidate set before ranking (§4.E).
#[derive(Debug, Default, Clone)]
pub struct RetrievalFilters {
    pub scope: Option<crate::types::Scope>,
    pub owner_id: Option<String>,
    pub kind: Option<MemoryKind>,
}

/// One ranked hit: the memory plus its raw (unboosted) similarity (§4.E
/// step 6: "return... raw similarity scores, not the boosted score").
#[derive(Debug, Clone)]
pub struct RankedMemory {
    pub memory: Memory,
    pub similarity: f32,
}

fn tier_boost(tier: MemoryTier) -> f32 {
    match tier {
        MemoryTier::Emergency => 0.30,
        MemoryTier::LongTerm => 0.20,
        MemoryTier::ShortTerm => 0.00,
    }
}

fn kind_boost(kind: MemoryKind) -> f32 {
    match kind {
        MemoryKind::Invariant => 0.15,
        MemoryKind::Preference => 0.15,
        MemoryKind::Pattern => 0.10,
        MemoryKind::Guard => 0.05,
        MemoryKind::Note => 0.00,
    }
}

/// Cosine similarity between two vectors of equal length. Vectors of
/// mismatched length or zero magnitude yield `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn matches_filters(memory: &Memory, filters: &RetrievalFilters) -> bool {
    if let Some(scope) = filters.scope {
        if memory.scope != scope {
            return false;
        }
    }
    if let Some(owner_id) = &filters.owner_id {
        if &memory.owner_id != owner_id {
            return false;
        }
    }
    if let Some(kind) = filters.kind {
        if memory.kind != kind {
            return false;
        }
    }
    true
}

/// Ranks `candidates` against `query_embedding`, returning the top `top_k`
/// by `rank_score = similarity + tier_boost + kind_boost`, ties broken by
/// more recent `created_at` (§4.E).
pub fn rank(
    candidates: &[Memory],
    query_embedding: &[f32],
    top_k: usize,
    min_similarity: f32,
    filters: &RetrievalFilters,
) -> Result<Vec<RankedMemory>> {
    let mut scored: Vec<(f32, RankedMemory)> = Vec::new();

    for memory in candidates {
        if !matches_filters(memory, filters) {
            continue;
        }
        let Some(embedding_bytes) = &memory.embedding else {
            continue;
        };
        let vector = bytes_to_embedding(embedding_bytes)?;
        let similarity = cosine_similarity(query_embedding, &vector);
        if similarity < min_similarity {
            continue;
        }
        let rank_score = similarity + tier_boost(memory.tier) + kind_boost(memory.kind);
        scored.push((
            rank_score,
            RankedMemory {
                memory: memory.clone(),
                similarity,
            },
        ));
    }

    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
    });

    Ok(scored.into_iter().take(top_k).map(|(_, ranked)| ranked).collect())
}

/// Fixed per-kind grouping order for the context formatter (§4.E).
const KIND_ORDER: [MemoryKind; 5] = [
    MemoryKind::Guard,
    MemoryKind::Invariant,
    MemoryKind::Preference,
    MemoryKind::Pattern,
    MemoryKind::Note,
];

const TOKENS_PER_WORD: f64 = 1.3;

fn kind_heading(kind: MemoryKind) -> &'static str {
    match kind {
        MemoryKind::Guard => "Guards",
        MemoryKind::Invariant => "Invariants",
        MemoryKind::Preference => "Preferences",
        MemoryKind::Pattern => "Patterns",
        MemoryKind::Note => "Notes",
    }
}

/// Formats ranked memories into a deterministic Markdown context block,
/// grouped by kind in the fixed order `guard, invariant, preference,
/// pattern, note` (§4.E). Truncates word-wise if the estimated token
/// count exceeds `token_budget`.
pub fn format_context(ranked: &[RankedMemory], token_budget: u32) -> String {
    let mut lines = vec!["## Relevant Memories".to_string()];

    for kind in KIND_ORDER {
        let group: Vec<&RankedMemory> = ranked.iter().filter(|r| r.memory.kind == kind).collect();
        if group.is_empty() {
            continue;
        }
        lines.push(String::new());
        lines.push(format!("### {}", kind_heading(kind)));
        for ranked_memory in group {
            let memory = &ranked_memory.memory;
            let prefix = if memory.kind == MemoryKind::Guard && memory.polarity == Polarity::Negative {
                "\u{26A0}\u{FE0F} "
            } else {
                ""
            };
            lines.push(format!("- {prefix}{}", memory.text));
        }
    }

    let mut body = lines.join("\n");
    let word_count = body.split_whitespace().count();
    let estimated_tokens = word_count as f64 * TOKENS_PER_WORD;

    if estimated_tokens > token_budget as f64 {
        let budget_words = (token_budget as f64 / TOKENS_PER_WORD).floor() as usize;
        let truncated: Vec<&str> = body.split_whitespace().take(budget_words).collect();
        body = format!("{}...", truncated.join(" "));
    }

    body
}

/// Convenience for when the caller already has a query vector and wants
/// both ranking and formatting in one call.
pub fn compose_context(
    candidates: &[Memory],
    query_embedding: &[f32],
    top_k: usize,
    min_similarity: f32,
    filters: &RetrievalFilters,
    token_budget: u32,
) -> Result<(String, Vec<RankedMemory>)> {
    let ranked = rank(candidates, query_embedding, top_k, min_similarity, filters)?;
    let context = format_context(&ranked, token_budget);
    Ok((context, ranked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::embedding_to_bytes;
    use crate::types::{MemoryStatus, OwnerType, Scope};
    use chrono::Utc;
    use uuid::Uuid;

    fn memory(kind: MemoryKind, tier: MemoryTier, polarity: Polarity, text: &str, vector: &[f32]) -> Memory {
        let now = Utc::now();
        Memory {
            id: Uuid::new_v4(),
            scope: Scope::Project,
            project_id: Some("proj".into()),
            owner_type: OwnerType::User,
            owner_id: "u1".into(),
            kind,
            tier,
            polarity,
            key: None,
            text: text.into(),
            status: MemoryStatus::Active,
            confidence: 0.9,
            expires_at: None,
            embedding: Some(embedding_to_bytes(vector)),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn rank_applies_tier_and_kind_boosts() {
        let query = vec![1.0, 0.0];
        let guard = memory(MemoryKind::Guard, MemoryTier::ShortTerm, Polarity::Negative, "never do X", &[1.0, 0.0]);
        let note = memory(MemoryKind::Note, MemoryTier::Emergency, Polarity::Positive, "a note", &[1.0, 0.0]);

        let ranked = rank(&[guard.clone(), note.clone()], &query, 10, 0.0, &RetrievalFilters::default()).unwrap();

        // Same raw similarity for both; note's tier boost (0.30) beats
        // guard's kind boost (0.05) + short_term's 0.00, so note ranks first.
        assert_eq!(ranked[0].memory.id, note.id);
        assert_eq!(ranked[1].memory.id, guard.id);
        // Raw similarity returned, not the boosted score.
        assert!((ranked[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rank_drops_candidates_below_min_similarity() {
        let query = vec![1.0, 0.0];
        let orthogonal = memory(MemoryKind::Note, MemoryTier::ShortTerm, Polarity::Positive, "unrelated", &[0.0, 1.0]);
        let ranked = rank(&[orthogonal], &query, 10, 0.5, &RetrievalFilters::default()).unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn format_context_groups_by_kind_in_fixed_order() {
        let guard = memory(MemoryKind::Guard, MemoryTier::ShortTerm, Polarity::Negative, "do not do X", &[1.0, 0.0]);
        let note = memory(MemoryKind::Note, MemoryTier::ShortTerm, Polarity::Positive, "a note", &[1.0, 0.0]);
        let ranked = vec![
            RankedMemory { memory: note, similarity: 0.9 },
            RankedMemory { memory: guard, similarity: 0.9 },
        ];
        let context = format_context(&ranked, 10_000);
        let guard_pos = context.find("### Guards").unwrap();
        let note_pos = context.find("### Notes").unwrap();
        assert!(guard_pos < note_pos);
        assert!(context.contains("\u{26A0}\u{FE0F} do not do X"));
    }

    #[test]
    fn format_context_truncates_to_token_budget() {
        let long_text = "word ".repeat(200);
        let note = memory(MemoryKind::Note, MemoryTier::ShortTerm, Polarity::Positive, long_text.trim(), &[1.0, 0.0]);
        let ranked = vec![RankedMemory { memory: note, similarity: 0.9 }];
        let context = format_context(&ranked, 10);
        assert!(context.ends_with("..."));
    }
}
