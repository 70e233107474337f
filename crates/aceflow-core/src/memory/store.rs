//! Memory Store Implementation
//!
//! SQLite-backed storage for categorized memories with similarity-ranked
//! recall. Writes happen inside transactions behind the database mutex, so
//! recall never observes a half-written record.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::embeddings::{cosine_similarity, Embedder};
use super::interaction::{
    classify_interaction, estimate_importance, extract_tags, interaction_content, token_overlap,
    MAX_INTERACTION_TAGS,
};
use super::types::*;
use crate::config::MemoryConfig;
use crate::db::Database;
use crate::retry::RetryPolicy;
use crate::utils::{age_in_days, content_hash, now_utc, validate_project_id, validate_unit_interval};
use crate::{AceflowError, AceflowResult};

/// Distance from a similarity of 1 still treated as the query's own content
pub const NEAR_EXACT_EPSILON: f64 = 1e-6;

const MEMORY_COLUMNS: &str = "id, project_id, category, content, content_hash, tags_json, \
     embedding_json, importance, created_at, last_accessed_at, access_count";

/// Memory store for persisting memory records to SQLite
pub struct MemoryStore {
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
    retry: RetryPolicy,
}

impl MemoryStore {
    /// Create a new memory store
    pub fn new(db: Arc<Database>, embedder: Arc<dyn Embedder>, config: MemoryConfig) -> Self {
        Self {
            db,
            embedder,
            config,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy for persistence failures
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Name of the active embedder
    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    /// Store a new memory and return its id
    ///
    /// A memory with the same category, content and project scope is not
    /// duplicated; the existing id is returned instead.
    pub fn add_memory(&self, input: NewMemory) -> AceflowResult<String> {
        let content = input.content.trim().to_string();
        if content.is_empty() {
            return Err(AceflowError::validation("memory content cannot be empty"));
        }

        let importance = input.importance.unwrap_or(self.config.default_importance);
        validate_unit_interval("importance", importance)?;

        if let Some(ref project_id) = input.project_id {
            validate_project_id(project_id)?;
        }

        let tags = normalize_tags(input.tags)?;
        let hash = content_hash(&content);
        let embedding = self.try_embed(&content);
        let now = now_millis();
        let memory = Memory {
            id: Uuid::new_v4().to_string(),
            project_id: input.project_id,
            category: input.category,
            content,
            content_hash: hash,
            tags,
            embedding,
            importance,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        };

        // Lookup and insert share one transaction so concurrent writers
        // cannot both store the same memory
        let existing = self.retry.run("add_memory", || {
            let mut conn = self.db.lock()?;
            let tx = conn.transaction()?;
            let existing = find_duplicate(
                &tx,
                memory.category,
                &memory.content_hash,
                memory.project_id.as_deref(),
            )?;
            if existing.is_none() {
                insert_memory(&tx, &memory, false)?;
                tx.commit()?;
            }
            Ok(existing)
        })?;

        if let Some(existing) = existing {
            debug!(memory_id = %existing, "Memory already stored, skipping duplicate");
            return Ok(existing);
        }

        debug!(
            memory_id = %memory.id,
            category = %memory.category,
            embedded = memory.has_embedding(),
            "Stored memory"
        );
        Ok(memory.id)
    }

    /// Remember a request/response exchange
    ///
    /// Category, importance and up to five tags are derived from the text
    /// (see [`classify_interaction`] and [`estimate_importance`]); the
    /// response is kept as an excerpt.
    pub fn store_interaction(&self, interaction: Interaction) -> AceflowResult<String> {
        let input = interaction.input.trim();
        if input.is_empty() {
            return Err(AceflowError::validation("interaction input cannot be empty"));
        }

        let response = interaction.response.as_str();
        let category = classify_interaction(input, response);
        let importance = estimate_importance(input, response);
        let tags = extract_tags(&format!("{} {}", input, response), MAX_INTERACTION_TAGS);

        let mut memory = NewMemory::new(interaction_content(input, response), category)
            .with_tags(tags)
            .with_importance(importance);
        memory.project_id = interaction.project_id;

        debug!(category = %category, importance, "Storing interaction");
        self.add_memory(memory)
    }

    /// Get a memory by id
    pub fn get(&self, id: &str) -> AceflowResult<Memory> {
        let conn = self.db.lock()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS),
            params![id],
            row_to_memory,
        );

        match result {
            Ok(memory) => Ok(memory),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(AceflowError::not_found("Memory", id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Retrieve memories relevant to a query
    ///
    /// Memories with an embedding are scored by
    /// `clamp(cosine, 0, 1) * recency * (0.5 + 0.5 * importance)`. Memories
    /// without one, or all memories when the query cannot be embedded, match
    /// only on a case-insensitive substring hit and score the fixed keyword
    /// fallback score. Near-exact semantic matches (similarity within
    /// [`NEAR_EXACT_EPSILON`] of 1) rank ahead of every other hit, so a
    /// memory queried by its own content comes first whatever its
    /// importance. Every returned memory has its access recorded.
    pub fn recall(&self, query: &RecallQuery) -> AceflowResult<Vec<RecallHit>> {
        if query.min_relevance.is_nan() {
            return Err(AceflowError::validation("min_relevance must be a number"));
        }
        if query.min_relevance > 1.0 {
            return Ok(Vec::new());
        }

        let text = query.query.trim();
        if text.is_empty() {
            return Err(AceflowError::validation("recall query cannot be empty"));
        }
        if let Some(ref project_id) = query.context.project_id {
            validate_project_id(project_id)?;
        }

        let top_k = query.top_k.unwrap_or(self.config.default_top_k);
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.try_embed(text);
        let needle = text.to_lowercase();
        let tag_filter: BTreeSet<&str> = query.context.tags.iter().map(|t| t.trim()).collect();
        let now = now_millis();

        let candidates = self.load_candidates(&query.context)?;
        let mut hits: Vec<RecallHit> = candidates
            .into_iter()
            .filter(|m| tag_filter.is_empty() || m.tags.iter().any(|t| tag_filter.contains(t.as_str())))
            .filter_map(|memory| self.score(memory, query_embedding.as_deref(), &needle, now))
            .filter(|hit| hit.score >= query.min_relevance)
            .collect();

        hits.sort_by(|a, b| {
            is_near_exact(b)
                .cmp(&is_near_exact(a))
                .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
                .then_with(|| b.memory.last_accessed_at.cmp(&a.memory.last_accessed_at))
                .then_with(|| {
                    b.memory
                        .importance
                        .partial_cmp(&a.memory.importance)
                        .unwrap_or(Ordering::Equal)
                })
        });
        hits.truncate(top_k);

        if !hits.is_empty() {
            let ids: Vec<&str> = hits.iter().map(|h| h.memory.id.as_str()).collect();
            self.retry.run("record_access", || self.record_access(&ids, now))?;
            for hit in hits.iter_mut() {
                hit.memory.access_count += 1;
                hit.memory.last_accessed_at = now;
            }
        }

        debug!(query = %text, results = hits.len(), "Recalled memories");
        Ok(hits)
    }

    /// Remove stale, unimportant, never-read memories
    ///
    /// A memory is removed only when it is older than `retention_days`, its
    /// importance is below the cleanup floor, and it has never been recalled.
    pub fn cleanup(&self, retention_days: u32) -> AceflowResult<usize> {
        let cutoff = now_millis() - Duration::days(i64::from(retention_days));
        let floor = self.config.cleanup_importance_floor;

        let removed = self.retry.run("cleanup", || {
            let conn = self.db.lock()?;
            Ok(conn.execute(
                "DELETE FROM memories WHERE created_at < ?1 AND importance < ?2 AND access_count = 0",
                params![cutoff.timestamp_millis(), floor],
            )?)
        })?;

        info!(retention_days, removed, "Memory cleanup finished");
        Ok(removed)
    }

    /// Fold near-duplicate memories into one
    ///
    /// Memories sharing a category and project scope are compared pairwise,
    /// by embedding cosine when both have one and by token overlap
    /// otherwise. Every cluster at or above `threshold` (configured default
    /// when `None`) keeps its most important member. The survivor takes the
    /// union of the tags, the summed access count, the earliest creation
    /// time and the latest access time; the rest are deleted in the same
    /// transaction.
    pub fn merge_similar(&self, threshold: Option<f64>) -> AceflowResult<MergeReport> {
        let threshold = threshold.unwrap_or(self.config.merge_similarity_threshold);
        validate_unit_interval("threshold", threshold)?;

        let merges = self.retry.run("merge_similar", || {
            let mut conn = self.db.lock()?;
            let tx = conn.transaction()?;
            let merges = plan_merges(load_all(&tx)?, threshold);
            for (survivor, absorbed) in &merges {
                insert_memory(&tx, survivor, true)?;
                for id in absorbed {
                    tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
                }
            }
            tx.commit()?;
            Ok(merges)
        })?;

        let report = MergeReport {
            groups: merges.len(),
            removed: merges.iter().map(|(_, absorbed)| absorbed.len()).sum(),
            survivors: merges.into_iter().map(|(survivor, _)| survivor.id).collect(),
        };
        info!(
            threshold,
            groups = report.groups,
            removed = report.removed,
            "Merged similar memories"
        );
        Ok(report)
    }

    /// Memory statistics by category and embedding presence
    pub fn stats(&self) -> AceflowResult<MemoryStats> {
        let conn = self.db.lock()?;
        let mut stats = MemoryStats::default();

        let mut stmt = conn.prepare(
            "SELECT category, COUNT(*), AVG(importance), SUM(embedding_json IS NOT NULL)
             FROM memories GROUP BY category",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        for row in rows {
            let (category, count, mean_importance, embedded) = row?;
            stats.total += count as usize;
            stats.embedded += embedded as usize;
            stats.by_category.insert(
                category,
                CategoryStats {
                    count: count as usize,
                    mean_importance,
                },
            );
        }
        stats.unembedded = stats.total - stats.embedded;

        Ok(stats)
    }

    /// Every memory, oldest first, for backup or migration
    pub fn export(&self) -> AceflowResult<Vec<Memory>> {
        let conn = self.db.lock()?;
        load_all(&conn)
    }

    /// Import previously exported memories
    ///
    /// Records keep their ids, timestamps, access counts and embeddings.
    /// The whole batch is validated first and written in one transaction;
    /// one invalid record rejects the batch.
    pub fn import(&self, records: Vec<Memory>) -> AceflowResult<usize> {
        let mut prepared = Vec::with_capacity(records.len());
        for mut record in records {
            validate_record(&record)?;
            record.content_hash = content_hash(&record.content);
            prepared.push(record);
        }

        let count = self.retry.run("import", || {
            let mut conn = self.db.lock()?;
            let tx = conn.transaction()?;
            for record in &prepared {
                insert_memory(&tx, record, true)?;
            }
            tx.commit()?;
            Ok(prepared.len())
        })?;

        info!(count, "Imported memories");
        Ok(count)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Private helpers
    // ─────────────────────────────────────────────────────────────────────────────

    /// Embed text, absorbing failures into `None`
    fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(text) {
            Ok(vector) if vector.len() == self.embedder.dimensions() => Some(vector),
            Ok(vector) => {
                warn!(
                    embedder = self.embedder.name(),
                    expected = self.embedder.dimensions(),
                    actual = vector.len(),
                    "Embedder returned wrong dimensions, using keyword fallback"
                );
                None
            }
            Err(e) => {
                warn!(
                    embedder = self.embedder.name(),
                    "Embedding unavailable, using keyword fallback: {}", e
                );
                None
            }
        }
    }

    fn score(
        &self,
        memory: Memory,
        query_embedding: Option<&[f32]>,
        needle: &str,
        now: DateTime<Utc>,
    ) -> Option<RecallHit> {
        let similarity = match (query_embedding, memory.embedding.as_deref()) {
            (Some(q), Some(m)) if q.len() == m.len() => {
                Some(f64::from(cosine_similarity(q, m)).clamp(0.0, 1.0))
            }
            _ => None,
        };

        if let Some(similarity) = similarity {
            let recency = self.recency_weight(memory.created_at, now);
            let importance_weight = 0.5 + 0.5 * memory.importance;
            Some(RecallHit {
                score: similarity * recency * importance_weight,
                similarity: Some(similarity),
                match_kind: MatchKind::Semantic,
                memory,
            })
        } else if memory.matches_keyword(needle) {
            Some(RecallHit {
                score: self.config.keyword_fallback_score,
                similarity: None,
                match_kind: MatchKind::Keyword,
                memory,
            })
        } else {
            None
        }
    }

    fn recency_weight(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age = age_in_days(created_at, now);
        (-age / self.config.half_life_days)
            .exp()
            .clamp(self.config.min_recency_weight, 1.0)
    }

    fn load_candidates(&self, context: &RecallContext) -> AceflowResult<Vec<Memory>> {
        let mut sql = format!("SELECT {} FROM memories WHERE 1=1", MEMORY_COLUMNS);
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !context.categories.is_empty() {
            sql.push_str(&format!(
                " AND category IN ({})",
                context.categories.iter().map(|_| "?").collect::<Vec<_>>().join(",")
            ));
            for category in &context.categories {
                params_vec.push(Box::new(category.as_str()));
            }
        }

        if let Some(ref project_id) = context.project_id {
            sql.push_str(" AND (project_id = ? OR project_id IS NULL)");
            params_vec.push(Box::new(project_id.clone()));
        }

        let conn = self.db.lock()?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let memories = stmt
            .query_map(param_refs.as_slice(), row_to_memory)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(memories)
    }

    fn record_access(&self, ids: &[&str], now: DateTime<Utc>) -> AceflowResult<()> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?1 WHERE id = ?2",
            )?;
            for id in ids {
                stmt.execute(params![now.timestamp_millis(), id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn is_near_exact(hit: &RecallHit) -> bool {
    hit.similarity
        .is_some_and(|similarity| similarity >= 1.0 - NEAR_EXACT_EPSILON)
}

/// Current time truncated to the millisecond precision stored on disk
fn now_millis() -> DateTime<Utc> {
    let now = now_utc();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

fn normalize_tags(tags: Vec<String>) -> AceflowResult<BTreeSet<String>> {
    let mut normalized = BTreeSet::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(AceflowError::validation("memory tags cannot be empty"));
        }
        normalized.insert(tag.to_string());
    }
    Ok(normalized)
}

fn validate_record(record: &Memory) -> AceflowResult<()> {
    if record.id.trim().is_empty() {
        return Err(AceflowError::validation("imported memory has an empty id"));
    }
    if record.content.trim().is_empty() {
        return Err(AceflowError::validation(format!(
            "imported memory {} has empty content",
            record.id
        )));
    }
    validate_unit_interval("importance", record.importance)?;
    if let Some(ref project_id) = record.project_id {
        validate_project_id(project_id)?;
    }
    if let Some(ref embedding) = record.embedding {
        if embedding.is_empty() || embedding.iter().all(|x| *x == 0.0) || embedding.iter().any(|x| !x.is_finite()) {
            return Err(AceflowError::validation(format!(
                "imported memory {} has an unusable embedding",
                record.id
            )));
        }
    }
    if record.last_accessed_at < record.created_at {
        return Err(AceflowError::validation(format!(
            "imported memory {} was accessed before it was created",
            record.id
        )));
    }
    Ok(())
}

fn find_duplicate(
    conn: &Connection,
    category: MemoryCategory,
    hash: &str,
    project_id: Option<&str>,
) -> AceflowResult<Option<String>> {
    let result = conn.query_row(
        "SELECT id FROM memories WHERE category = ?1 AND content_hash = ?2 AND project_id IS ?3 LIMIT 1",
        params![category.as_str(), hash, project_id],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn load_all(conn: &Connection) -> AceflowResult<Vec<Memory>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM memories ORDER BY created_at ASC, id ASC",
        MEMORY_COLUMNS
    ))?;
    let memories = stmt
        .query_map([], row_to_memory)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(memories)
}

/// Greedy clustering in creation order within each (category, project)
/// scope. Returns each changed survivor with the ids it absorbed.
fn plan_merges(memories: Vec<Memory>, threshold: f64) -> Vec<(Memory, Vec<String>)> {
    let mut scopes: BTreeMap<(MemoryCategory, Option<String>), Vec<Memory>> = BTreeMap::new();
    for memory in memories {
        scopes
            .entry((memory.category, memory.project_id.clone()))
            .or_default()
            .push(memory);
    }

    let mut merges = Vec::new();
    for members in scopes.into_values() {
        let mut taken = vec![false; members.len()];
        for i in 0..members.len() {
            if taken[i] {
                continue;
            }
            let mut cluster = vec![&members[i]];
            for j in (i + 1)..members.len() {
                if !taken[j] && memory_similarity(&members[i], &members[j]) >= threshold {
                    taken[j] = true;
                    cluster.push(&members[j]);
                }
            }
            if cluster.len() > 1 {
                merges.push(fold_cluster(&cluster));
            }
        }
    }
    merges
}

fn memory_similarity(a: &Memory, b: &Memory) -> f64 {
    match (a.embedding.as_deref(), b.embedding.as_deref()) {
        (Some(x), Some(y)) if x.len() == y.len() => {
            f64::from(cosine_similarity(x, y)).clamp(0.0, 1.0)
        }
        _ => token_overlap(&a.content, &b.content),
    }
}

/// Most important member wins, the first one on ties
fn fold_cluster(cluster: &[&Memory]) -> (Memory, Vec<String>) {
    let base = cluster
        .iter()
        .copied()
        .reduce(|best, m| if m.importance > best.importance { m } else { best })
        .unwrap_or(cluster[0]);

    let mut survivor = base.clone();
    survivor.access_count = 0;
    let mut absorbed = Vec::with_capacity(cluster.len() - 1);
    for member in cluster {
        survivor.tags.extend(member.tags.iter().cloned());
        survivor.access_count += member.access_count;
        survivor.created_at = survivor.created_at.min(member.created_at);
        survivor.last_accessed_at = survivor.last_accessed_at.max(member.last_accessed_at);
        if member.id != base.id {
            absorbed.push(member.id.clone());
        }
    }
    (survivor, absorbed)
}

fn insert_memory(conn: &Connection, memory: &Memory, replace: bool) -> AceflowResult<()> {
    let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
    let embedding_json = memory
        .embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        &format!(
            "{} INTO memories ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            verb, MEMORY_COLUMNS
        ),
        params![
            &memory.id,
            &memory.project_id,
            memory.category.as_str(),
            &memory.content,
            &memory.content_hash,
            serde_json::to_string(&memory.tags)?,
            embedding_json,
            memory.importance,
            memory.created_at.timestamp_millis(),
            memory.last_accessed_at.timestamp_millis(),
            memory.access_count as i64,
        ],
    )?;
    Ok(())
}

fn row_to_memory(row: &Row) -> rusqlite::Result<Memory> {
    let category: String = row.get(2)?;
    let tags_json: String = row.get(5)?;
    let embedding_json: Option<String> = row.get(6)?;
    let created_at: i64 = row.get(8)?;
    let last_accessed_at: i64 = row.get(9)?;
    let access_count: i64 = row.get(10)?;

    let category = MemoryCategory::from_str(&category).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("invalid category: {}", category).into(),
        )
    })?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let embedding: Option<Vec<f32>> = embedding_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Memory {
        id: row.get(0)?,
        project_id: row.get(1)?,
        category,
        content: row.get(3)?,
        content_hash: row.get(4)?,
        tags,
        embedding,
        importance: row.get(7)?,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
        last_accessed_at: DateTime::from_timestamp_millis(last_accessed_at).unwrap_or_default(),
        access_count: access_count.max(0) as u64,
    })
}
