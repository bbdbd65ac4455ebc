//! Embedded relational store (§4.A): persists memories, evidence, metrics,
//! and episodes behind an atomic commit boundary.
//!
//! Backed by `rusqlite` rather than the async engine the wider corpus
//! favors for multi-node deployments — see `DESIGN.md` for why. The
//! connection is wrapped in a `Mutex` and accessed synchronously; per §5,
//! callers on an async runtime should offload Store calls to a blocking
//! worker (e.g. `tokio::task::spawn_blocking`).

pub mod schema;

use crate::embeddings::{bytes_to_embedding, embedding_to_bytes};
use crate::error::{Error, Result};
use crate::types::{
    Episode, Event, EvidenceSource, Frustration, Memory, MemoryKind, MemoryMetrics, MemoryStatus,
    MemoryTier, OwnerType, Polarity, Scope,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

/// The fields needed to write a new memory row, shared by the `ADD` and
/// `UPDATE` branches of the commit layer (§4.D).
pub struct NewMemory {
    pub scope: Scope,
    pub project_id: Option<String>,
    pub owner_type: OwnerType,
    pub owner_id: String,
    pub kind: MemoryKind,
    pub tier: MemoryTier,
    pub polarity: Polarity,
    pub key: Option<String>,
    pub text: String,
    pub confidence: f32,
    pub source: EvidenceSource,
    pub frustration: Frustration,
}

/// Filters accepted by `get_active_memories` (§4.A).
#[derive(Debug, Default, Clone)]
pub struct MemoryFilters {
    pub scope: Option<Scope>,
    pub owner_id: Option<String>,
    pub kind: Option<MemoryKind>,
    pub project_id: Option<String>,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if needed) the database at `path` and runs schema
    /// init. Schema init is idempotent (§4.A).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        for statement in schema::ALL_STATEMENTS {
            conn.execute_batch(statement)?;
        }
        let version: i64 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?
            .unwrap_or(-1);
        if version < 0 {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![schema::SCHEMA_VERSION],
            )?;
        }
        Ok(())
    }

    // -- Episodes ---------------------------------------------------------

    pub fn insert_episode(&self, episode: &Episode) -> Result<()> {
        let events_json = serde_json::to_string(&episode.events)?;
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        conn.execute(
            "INSERT INTO episode (id, project_id, events, error_count, retry_loops, user_frustration, processed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                episode.id.to_string(),
                episode.project_id.clone(),
                events_json,
                episode.error_count,
                episode.retry_loops,
                episode.user_frustration.to_string(),
                episode.processed as i64,
                episode.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn mark_episode_processed(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        let affected = conn.execute(
            "UPDATE episode SET processed = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        if affected == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    pub fn get_unprocessed_episodes(&self, project_id: Option<&str>, limit: u32) -> Result<Vec<Episode>> {
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, events, error_count, retry_loops, user_frustration, processed, created_at
             FROM episode
             WHERE processed = 0 AND (?1 IS NULL OR project_id = ?1)
             ORDER BY created_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![project_id, limit], row_to_episode)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    // -- Memories -----------------------------------------------------------

    /// Writes a new memory row, its zeroed metrics row, and an evidence row
    /// linking it to `episode_id`, all in one transaction (§4.A, §3
    /// invariant: "exactly one metrics row with all counters = 0").
    pub fn insert_memory(
        &self,
        new: &NewMemory,
        episode_id: Uuid,
        embedding: Option<&[f32]>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let status = MemoryStatus::Provisional;
        let expires_at = default_expiry(new.tier, now);
        let embedding_bytes = embedding.map(embedding_to_bytes);

        let mut conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO memory (id, scope, project_id, owner_type, owner_id, kind, tier, polarity, key, text, status, confidence, expires_at, embedding, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                id.to_string(),
                new.scope.to_string(),
                new.project_id.clone(),
                new.owner_type.to_string(),
                new.owner_id.clone(),
                new.kind.to_string(),
                new.tier.to_string(),
                new.polarity.as_i8(),
                new.key.clone(),
                new.text.clone(),
                status.to_string(),
                new.confidence,
                expires_at.map(|e| e.to_rfc3339()),
                embedding_bytes,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "INSERT INTO memory_metrics (memory_id, use_count, opportunities, suspected_regret_hits, estimated_regret_saved, last_used_at, last_evaluated_at)
             VALUES (?1, 0, 0, 0, 0, NULL, NULL)",
            params![id.to_string()],
        )?;

        tx.execute(
            "INSERT INTO evidence (id, memory_id, episode_id, source, frustration, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                id.to_string(),
                episode_id.to_string(),
                new.source.to_string(),
                new.frustration.to_string(),
                now.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(id)
    }

    /// Sets `status = deprecated` and stamps `updated_at` (§4.A).
    pub fn deprecate_memory(&self, id: Uuid) -> Result<()> {
        let now = Utc::now();
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        let affected = conn.execute(
            "UPDATE memory SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![MemoryStatus::Deprecated.to_string(), now.to_rfc3339(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    pub fn get_memory_by_id(&self, id: Uuid) -> Result<Option<Memory>> {
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        conn.query_row(
            "SELECT id, scope, project_id, owner_type, owner_id, kind, tier, polarity, key, text, status, confidence, expires_at, embedding, created_at, updated_at
             FROM memory WHERE id = ?1",
            params![id.to_string()],
            row_to_memory,
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn get_memories_by_key(&self, key: &str, status: Option<MemoryStatus>) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        let status_str = status.map(|s| s.to_string());
        let mut stmt = conn.prepare(
            "SELECT id, scope, project_id, owner_type, owner_id, kind, tier, polarity, key, text, status, confidence, expires_at, embedding, created_at, updated_at
             FROM memory WHERE key = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![key, status_str], row_to_memory)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    pub fn get_active_memories(&self, filters: &MemoryFilters, limit: u32) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        let scope_str = filters.scope.map(|s| s.to_string());
        let kind_str = filters.kind.map(|k| k.to_string());
        let mut stmt = conn.prepare(
            "SELECT id, scope, project_id, owner_type, owner_id, kind, tier, polarity, key, text, status, confidence, expires_at, embedding, created_at, updated_at
             FROM memory
             WHERE status IN ('active', 'provisional')
               AND (?1 IS NULL OR scope = ?1)
               AND (?2 IS NULL OR owner_id = ?2)
               AND (?3 IS NULL OR kind = ?3)
               AND (?4 IS NULL OR project_id = ?4 OR scope = 'global')
             ORDER BY created_at DESC
             LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            params![scope_str, filters.owner_id.clone(), kind_str, filters.project_id.clone(), limit],
            row_to_memory,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    pub fn search_memories_by_text(&self, substring: &str, limit: u32) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        let pattern = format!("%{substring}%");
        let mut stmt = conn.prepare(
            "SELECT id, scope, project_id, owner_type, owner_id, kind, tier, polarity, key, text, status, confidence, expires_at, embedding, created_at, updated_at
             FROM memory
             WHERE status IN ('active', 'provisional') AND text LIKE ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![pattern, limit], row_to_memory)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Increments `use_count` and stamps `last_used_at` (§4.A).
    pub fn increment_use_count(&self, id: Uuid) -> Result<()> {
        let now = Utc::now();
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        let affected = conn.execute(
            "UPDATE memory_metrics SET use_count = use_count + 1, last_used_at = ?1 WHERE memory_id = ?2",
            params![now.to_rfc3339(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    /// Increments `opportunities` for each id (§4.A). Ids with no metrics
    /// row are silently skipped rather than failing the whole batch.
    pub fn increment_opportunities(&self, ids: &[Uuid]) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        for id in ids {
            conn.execute(
                "UPDATE memory_metrics SET opportunities = opportunities + 1 WHERE memory_id = ?1",
                params![id.to_string()],
            )?;
        }
        Ok(())
    }

    pub fn get_metrics(&self, id: Uuid) -> Result<Option<MemoryMetrics>> {
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;
        conn.query_row(
            "SELECT memory_id, use_count, opportunities, suspected_regret_hits, estimated_regret_saved, last_used_at, last_evaluated_at
             FROM memory_metrics WHERE memory_id = ?1",
            params![id.to_string()],
            row_to_metrics,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Applies an evaluator `Decision` to the store: updates status, tier,
    /// expiry, and stamps `last_evaluated_at` on the metrics row.
    pub fn apply_decision(&self, decision: &crate::types::Decision) -> Result<()> {
        let now = Utc::now();
        let conn = self.conn.lock().map_err(|_| Error::Storage("store mutex poisoned".into()))?;

        if decision.new_status.is_some() || decision.new_tier.is_some() || decision.new_expires_at.is_some() {
            let memory = conn
                .query_row(
                    "SELECT status, tier, expires_at FROM memory WHERE id = ?1",
                    params![decision.memory_id.to_string()],
                    |row| {
                        let status: String = row.get(0)?;
                        let tier: String = row.get(1)?;
                        let expires_at: Option<String> = row.get(2)?;
                        Ok((status, tier, expires_at))
                    },
                )
                .optional()?
                .ok_or(Error::NotFound(decision.memory_id))?;

            let status = decision
                .new_status
                .map(|s| s.to_string())
                .unwrap_or(memory.0);
            let tier = decision.new_tier.map(|t| t.to_string()).unwrap_or(memory.1);
            let expires_at = match &decision.new_expires_at {
                Some(inner) => inner.map(|dt| dt.to_rfc3339()),
                None => memory.2,
            };

            conn.execute(
                "UPDATE memory SET status = ?1, tier = ?2, expires_at = ?3, updated_at = ?4 WHERE id = ?5",
                params![status, tier, expires_at, now.to_rfc3339(), decision.memory_id.to_string()],
            )?;
        }

        conn.execute(
            "UPDATE memory_metrics SET last_evaluated_at = ?1 WHERE memory_id = ?2",
            params![now.to_rfc3339(), decision.memory_id.to_string()],
        )?;

        Ok(())
    }
}

fn default_expiry(tier: MemoryTier, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match tier {
        MemoryTier::ShortTerm => Some(now + chrono::Duration::days(30)),
        MemoryTier::Emergency => Some(now + chrono::Duration::days(7)),
        MemoryTier::LongTerm => None,
    }
}

fn parse_or_storage<T: FromStr>(raw: &str, field: &str) -> rusqlite::Result<T> {
    raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("invalid {field}: {raw}").into(),
        )
    })
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let scope_raw: String = row.get(1)?;
    let owner_type_raw: String = row.get(3)?;
    let kind_raw: String = row.get(5)?;
    let tier_raw: String = row.get(6)?;
    let polarity_raw: i64 = row.get(7)?;
    let status_raw: String = row.get(10)?;
    let expires_at_raw: Option<String> = row.get(12)?;
    let embedding_raw: Option<Vec<u8>> = row.get(13)?;
    let created_at_raw: String = row.get(14)?;
    let updated_at_raw: String = row.get(15)?;

    Ok(Memory {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, "invalid id".into())
        })?,
        scope: parse_or_storage(&scope_raw, "scope")?,
        project_id: row.get(2)?,
        owner_type: parse_or_storage(&owner_type_raw, "owner_type")?,
        owner_id: row.get(4)?,
        kind: parse_or_storage(&kind_raw, "kind")?,
        tier: parse_or_storage(&tier_raw, "tier")?,
        polarity: crate::types::Polarity::from_i8(polarity_raw as i8).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Integer, "invalid polarity".into())
        })?,
        key: row.get(8)?,
        text: row.get(9)?,
        status: parse_or_storage(&status_raw, "status")?,
        confidence: row.get(11)?,
        expires_at: expires_at_raw
            .map(|raw| parse_timestamp(&raw))
            .transpose()?,
        embedding: embedding_raw,
        created_at: parse_timestamp(&created_at_raw)?,
        updated_at: parse_timestamp(&updated_at_raw)?,
    })
}

fn row_to_metrics(row: &Row<'_>) -> rusqlite::Result<MemoryMetrics> {
    let last_used_raw: Option<String> = row.get(5)?;
    let last_evaluated_raw: Option<String> = row.get(6)?;
    Ok(MemoryMetrics {
        memory_id: Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, "invalid id".into())
        })?,
        use_count: row.get(1)?,
        opportunities: row.get(2)?,
        suspected_regret_hits: row.get(3)?,
        estimated_regret_saved: row.get(4)?,
        last_used_at: last_used_raw.map(|raw| parse_timestamp(&raw)).transpose()?,
        last_evaluated_at: last_evaluated_raw.map(|raw| parse_timestamp(&raw)).transpose()?,
    })
}

fn row_to_episode(row: &Row<'_>) -> rusqlite::Result<Episode> {
    let events_raw: String = row.get(2)?;
    let frustration_raw: String = row.get(5)?;
    let created_at_raw: String = row.get(7)?;
    let events: Vec<Event> = serde_json::from_str(&events_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Episode {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, "invalid id".into())
        })?,
        project_id: row.get(1)?,
        events,
        error_count: row.get(3)?,
        retry_loops: row.get(4)?,
        user_frustration: parse_or_storage(&frustration_raw, "user_frustration")?,
        processed: row.get::<_, i64>(6)? != 0,
        created_at: parse_timestamp(&created_at_raw)?,
    })
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EvidenceSource, Frustration, MemoryKind, MemoryStatus, MemoryTier, OwnerType, Polarity, Scope};

    fn sample_episode() -> Episode {
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

    fn sample_new_memory() -> NewMemory {
        NewMemory {
            scope: Scope::Project,
            project_id: Some("proj".into()),
            owner_type: OwnerType::User,
            owner_id: "u1".into(),
            kind: MemoryKind::Pattern,
            tier: MemoryTier::ShortTerm,
            polarity: Polarity::Positive,
            key: Some("project.http.client".into()),
            text: "use reqwest with rustls".into(),
            confidence: 0.95,
            source: EvidenceSource::ExplicitStatement,
            frustration: Frustration::None,
        }
    }

    #[test]
    fn insert_memory_creates_memory_metrics_and_evidence_atomically() {
        let store = Store::open_in_memory().unwrap();
        let episode = sample_episode();
        store.insert_episode(&episode).unwrap();

        let id = store.insert_memory(&sample_new_memory(), episode.id, None).unwrap();

        let memory = store.get_memory_by_id(id).unwrap().expect("memory exists");
        assert_eq!(memory.status, MemoryStatus::Provisional);
        assert_eq!(memory.key.as_deref(), Some("project.http.client"));

        let metrics = store.get_metrics(id).unwrap().expect("metrics exist");
        assert_eq!(metrics.use_count, 0);
        assert_eq!(metrics.opportunities, 0);
        assert_eq!(metrics.suspected_regret_hits, 0);
    }

    #[test]
    fn short_term_memory_gets_default_ttl() {
        let store = Store::open_in_memory().unwrap();
        let episode = sample_episode();
        store.insert_episode(&episode).unwrap();
        let id = store.insert_memory(&sample_new_memory(), episode.id, None).unwrap();
        let memory = store.get_memory_by_id(id).unwrap().unwrap();
        assert!(memory.expires_at.is_some());
    }

    #[test]
    fn deprecate_memory_sets_status() {
        let store = Store::open_in_memory().unwrap();
        let episode = sample_episode();
        store.insert_episode(&episode).unwrap();
        let id = store.insert_memory(&sample_new_memory(), episode.id, None).unwrap();
        store.deprecate_memory(id).unwrap();
        let memory = store.get_memory_by_id(id).unwrap().unwrap();
        assert_eq!(memory.status, MemoryStatus::Deprecated);
    }

    #[test]
    fn deprecate_missing_memory_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store.deprecate_memory(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn embedding_round_trips_through_storage() {
        let store = Store::open_in_memory().unwrap();
        let episode = sample_episode();
        store.insert_episode(&episode).unwrap();
        let vector = vec![0.1f32, 0.2, -0.3];
        let id = store
            .insert_memory(&sample_new_memory(), episode.id, Some(&vector))
            .unwrap();
        let memory = store.get_memory_by_id(id).unwrap().unwrap();
        let decoded = bytes_to_embedding(&memory.embedding.unwrap()).unwrap();
        assert_eq!(decoded, vector);
    }

    #[test]
    fn use_count_never_exceeds_opportunities_after_increments() {
        let store = Store::open_in_memory().unwrap();
        let episode = sample_episode();
        store.insert_episode(&episode).unwrap();
        let id = store.insert_memory(&sample_new_memory(), episode.id, None).unwrap();

        store.increment_opportunities(&[id]).unwrap();
        store.increment_opportunities(&[id]).unwrap();
        store.increment_use_count(id).unwrap();

        let metrics = store.get_metrics(id).unwrap().unwrap();
        assert!(metrics.use_count <= metrics.opportunities);
    }

    #[test]
    fn get_memories_by_key_filters_by_status() {
        let store = Store::open_in_memory().unwrap();
        let episode = sample_episode();
        store.insert_episode(&episode).unwrap();
        let id = store.insert_memory(&sample_new_memory(), episode.id, None).unwrap();

        let provisional = store
            .get_memories_by_key("project.http.client", Some(MemoryStatus::Provisional))
            .unwrap();
        assert_eq!(provisional.len(), 1);

        store.deprecate_memory(id).unwrap();
        let still_provisional = store
            .get_memories_by_key("project.http.client", Some(MemoryStatus::Provisional))
            .unwrap();
        assert!(still_provisional.is_empty());
    }

    #[test]
    fn unprocessed_episodes_exclude_processed_ones() {
        let store = Store::open_in_memory().unwrap();
        let episode = sample_episode();
        store.insert_episode(&episode).unwrap();
        store.mark_episode_processed(episode.id).unwrap();

        let unprocessed = store.get_unprocessed_episodes(Some("proj"), 10).unwrap();
        assert!(unprocessed.is_empty());
    }

    #[test]
    fn search_memories_by_text_matches_substring() {
        let store = Store::open_in_memory().unwrap();
        let episode = sample_episode();
        store.insert_episode(&episode).unwrap();
        store.insert_memory(&sample_new_memory(), episode.id, None).unwrap();

        let results = store.search_memories_by_text("reqwest", 10).unwrap();
        assert_eq!(results.len(), 1);
    }
}
