//! Data model shared by the store, evaluator, commit layer, retrieval engine,
//! and chunker.

mod enums;

pub use enums::{
    EvalResult, EventKind, EvidenceSource, Frustration, MemoryKind, MemoryStatus, MemoryTier,
    OpType, OwnerType, Polarity, Role, Scope,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The central entity: a durable behavioral rule the assistant should
/// respect (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub scope: Scope,
    pub project_id: Option<String>,
    pub owner_type: OwnerType,
    pub owner_id: String,
    pub kind: MemoryKind,
    pub tier: MemoryTier,
    pub polarity: Polarity,
    pub key: Option<String>,
    pub text: String,
    pub status: MemoryStatus,
    pub confidence: f32,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why a memory exists: links it to the episode that produced it (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub memory_id: Uuid,
    pub episode_id: Uuid,
    pub source: EvidenceSource,
    pub frustration: Frustration,
    pub created_at: DateTime<Utc>,
}

/// Per-memory usage counters, 1:1 with `Memory` (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub memory_id: Uuid,
    pub use_count: u32,
    pub opportunities: u32,
    pub suspected_regret_hits: u32,
    pub estimated_regret_saved: f32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl MemoryMetrics {
    /// A fresh metrics row for a newly committed memory: all counters zero
    /// (§8 invariant: "exactly one metrics row with all counters = 0").
    pub fn zeroed(memory_id: Uuid) -> Self {
        MemoryMetrics {
            memory_id,
            use_count: 0,
            opportunities: 0,
            suspected_regret_hits: 0,
            estimated_regret_saved: 0.0,
            last_used_at: None,
            last_evaluated_at: None,
        }
    }

    /// `use_count / opportunities`, defining `0/0 = 0` (§4.C step 4).
    pub fn use_ratio(&self) -> f64 {
        if self.opportunities == 0 {
            0.0
        } else {
            self.use_count as f64 / self.opportunities as f64
        }
    }
}

/// A normalized session event, the unit the chunker consumes (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub role: Role,
    pub kind: EventKind,
    pub summary: String,
    pub tool_name: Option<String>,
    pub file: Option<String>,
    pub raw_snippet: Option<String>,
    pub is_error: bool,
}

/// A bounded slice of a session, the provenance unit for evidence (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub project_id: Option<String>,
    pub events: Vec<Event>,
    pub error_count: u32,
    pub retry_loops: u32,
    pub user_frustration: Frustration,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// A unit of work emitted by an extractor and applied by the commit layer
/// (§4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op_type", rename_all = "snake_case")]
pub enum MemoryOp {
    Add {
        scope: Scope,
        project_id: Option<String>,
        owner_type: OwnerType,
        owner_id: String,
        kind: MemoryKind,
        tier: MemoryTier,
        polarity: Polarity,
        key: Option<String>,
        text: String,
        confidence: f32,
        source: EvidenceSource,
        frustration: Frustration,
    },
    Update {
        target_memory_id: Uuid,
        scope: Scope,
        project_id: Option<String>,
        owner_type: OwnerType,
        owner_id: String,
        kind: MemoryKind,
        tier: MemoryTier,
        polarity: Polarity,
        text: String,
        confidence: f32,
        source: EvidenceSource,
        frustration: Frustration,
    },
    Deprecate {
        target_memory_id: Uuid,
    },
}

impl MemoryOp {
    pub fn op_type(&self) -> OpType {
        match self {
            MemoryOp::Add { .. } => OpType::Add,
            MemoryOp::Update { .. } => OpType::Update,
            MemoryOp::Deprecate { .. } => OpType::Deprecate,
        }
    }
}

/// Result of one CR-Memory evaluation: a verdict plus whatever fields it
/// implies changed (§4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub memory_id: Uuid,
    pub result: EvalResult,
    pub new_status: Option<MemoryStatus>,
    pub new_tier: Option<MemoryTier>,
    pub new_expires_at: Option<Option<DateTime<Utc>>>,
    pub reason: String,
}
