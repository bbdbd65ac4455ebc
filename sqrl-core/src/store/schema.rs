//! DDL for the embedded store (§3, §4.A). Schema init is idempotent:
//! every statement uses `CREATE TABLE IF NOT EXISTS`.

pub const SCHEMA_VERSION: i64 = 1;

pub const CREATE_SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
";

pub const CREATE_MEMORY_TABLE: &str = "
CREATE TABLE IF NOT EXISTS memory (
    id TEXT PRIMARY KEY,
    scope TEXT NOT NULL,
    project_id TEXT,
    owner_type TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    tier TEXT NOT NULL,
    polarity INTEGER NOT NULL,
    key TEXT,
    text TEXT NOT NULL,
    status TEXT NOT NULL,
    confidence REAL NOT NULL,
    expires_at TEXT,
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

pub const CREATE_MEMORY_KEY_INDEX: &str = "
CREATE INDEX IF NOT EXISTS idx_memory_key ON memory(key);
";

pub const CREATE_MEMORY_STATUS_INDEX: &str = "
CREATE INDEX IF NOT EXISTS idx_memory_status ON memory(status);
";

pub const CREATE_MEMORY_METRICS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS memory_metrics (
    memory_id TEXT PRIMARY KEY REFERENCES memory(id),
    use_count INTEGER NOT NULL DEFAULT 0,
    opportunities INTEGER NOT NULL DEFAULT 0,
    suspected_regret_hits INTEGER NOT NULL DEFAULT 0,
    estimated_regret_saved REAL NOT NULL DEFAULT 0,
    last_used_at TEXT,
    last_evaluated_at TEXT
);
";

pub const CREATE_EPISODE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS episode (
    id TEXT PRIMARY KEY,
    project_id TEXT,
    events TEXT NOT NULL,
    error_count INTEGER NOT NULL,
    retry_loops INTEGER NOT NULL,
    user_frustration TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
";

pub const CREATE_EVIDENCE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS evidence (
    id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL REFERENCES memory(id),
    episode_id TEXT NOT NULL REFERENCES episode(id),
    source TEXT NOT NULL,
    frustration TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

pub const CREATE_EVIDENCE_MEMORY_INDEX: &str = "
CREATE INDEX IF NOT EXISTS idx_evidence_memory ON evidence(memory_id);
";

/// All DDL statements, in dependency order.
pub const ALL_STATEMENTS: &[&str] = &[
    CREATE_SCHEMA_VERSION_TABLE,
    CREATE_MEMORY_TABLE,
    CREATE_MEMORY_KEY_INDEX,
    CREATE_MEMORY_STATUS_INDEX,
    CREATE_MEMORY_METRICS_TABLE,
    CREATE_EPISODE_TABLE,
    CREATE_EVIDENCE_TABLE,
    CREATE_EVIDENCE_MEMORY_INDEX,
];
