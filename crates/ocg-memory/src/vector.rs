//! VectorMemory: hybrid HNSW + FTS5 semantic memory store.

use std::sync::Arc;

use async_trait::async_trait;
use hnsw_rs::prelude::*;
use rusqlite::Connection;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::error::MemoryError;
use crate::types::{Metric, SearchHit, VectorRecord};

/// Above this fraction of tombstoned-to-live vectors, a full rebuild is triggered.
const REBUILD_THRESHOLD: f64 = 0.10;
const HNSW_M: usize = 16;
const HNSW_EF_CONSTRUCT: usize = 200;
const HNSW_EF_SEARCH: usize = 100;
const HNSW_MAX_LAYER: usize = 16;
const DEFAULT_CANDIDATE_MULT: usize = 4;
const LINEAR_FALLBACK_CAP: usize = 2000;
const DEFAULT_VECTOR_WEIGHT: f32 = 0.7;
const DEFAULT_TEXT_WEIGHT: f32 = 0.3;

/// Embeds text into a fixed-dimension vector. Implemented by each LLM vendor
/// adapter that exposes an embeddings endpoint.
#[async_trait]
pub trait EmbedProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;

    /// Embeds a batch. Default implementation calls `embed` sequentially;
    /// providers with a native batch endpoint should override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

enum Index {
    Cosine(Hnsw<'static, f32, DistCosine>),
    Dot(Hnsw<'static, f32, DistDot>),
    L2(Hnsw<'static, f32, DistL2>),
}

impl Index {
    fn new(metric: Metric, max_elements: usize) -> Self {
        match metric {
            Metric::Cosine => Index::Cosine(Hnsw::new(
                HNSW_M,
                max_elements,
                HNSW_MAX_LAYER,
                HNSW_EF_CONSTRUCT,
                DistCosine {},
            )),
            Metric::Ip => Index::Dot(Hnsw::new(
                HNSW_M,
                max_elements,
                HNSW_MAX_LAYER,
                HNSW_EF_CONSTRUCT,
                DistDot {},
            )),
            Metric::L2 => Index::L2(Hnsw::new(
                HNSW_M,
                max_elements,
                HNSW_MAX_LAYER,
                HNSW_EF_CONSTRUCT,
                DistL2 {},
            )),
        }
    }

    fn insert(&mut self, vector: &[f32], label: usize) {
        match self {
            Index::Cosine(h) => h.insert((vector, label)),
            Index::Dot(h) => h.insert((vector, label)),
            Index::L2(h) => h.insert((vector, label)),
        }
    }

    fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<Neighbour> {
        match self {
            Index::Cosine(h) => h.search(query, k, ef),
            Index::Dot(h) => h.search(query, k, ef),
            Index::L2(h) => h.search(query, k, ef),
        }
    }

    fn file_dump(&self, dir: &str, name: &str) -> std::io::Result<()> {
        match self {
            Index::Cosine(h) => h.file_dump(dir, name).map(|_| ()),
            Index::Dot(h) => h.file_dump(dir, name).map(|_| ()),
            Index::L2(h) => h.file_dump(dir, name).map(|_| ()),
        }
    }
}

/// Hybrid semantic memory store: HNSW approximate nearest-neighbour search
/// blended with FTS5 keyword search, backed by a shared SQLite connection.
pub struct VectorMemory {
    db: Arc<Mutex<Connection>>,
    embedder: Option<Arc<dyn EmbedProvider>>,
    metric: Metric,
    /// `hnswIDs[label] = memory row id`. Guarded separately from the index
    /// itself so reads (search) and writes (add/delete/rebuild) can proceed
    /// under distinct lock scopes without serialising every query.
    hnsw_ids: RwLock<Vec<i64>>,
    index: RwLock<Index>,
    hnsw_path: String,
    tombstones_since_rebuild: Mutex<usize>,
}

impl VectorMemory {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        embedder: Option<Arc<dyn EmbedProvider>>,
        metric: Metric,
        hnsw_path: impl Into<String>,
    ) -> Self {
        Self {
            db,
            embedder,
            metric,
            hnsw_ids: RwLock::new(Vec::new()),
            index: RwLock::new(Index::new(metric, 10_000)),
            hnsw_path: hnsw_path.into(),
            tombstones_since_rebuild: Mutex::new(0),
        }
    }

    /// Loads `hnswIDs` from the store and rebuilds the HNSW index from live
    /// rows in insertion order. Call once at startup.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<(), MemoryError> {
        let rows = {
            let conn = self.db.lock().await;
            let mut stmt = conn.prepare(
                "SELECT id, embedding, embedding_dim FROM memories
                 WHERE tombstoned = 0 ORDER BY id",
            )?;
            let rows: Vec<(i64, Vec<u8>, i64)> = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut ids = self.hnsw_ids.write().await;
        let mut index = self.index.write().await;
        ids.clear();
        for (id, blob, dim) in rows {
            let vector = decode_embedding(&blob, dim as usize);
            let vector = match vector {
                Some(v) => v,
                None => {
                    warn!(id, "skipping row with malformed embedding on load");
                    continue;
                }
            };
            let label = ids.len();
            index.insert(&vector, label);
            ids.push(id);
        }
        info!(count = ids.len(), "vector memory index loaded");
        Ok(())
    }

    /// Embeds, persists, and indexes a single memory. `category` is a loose
    /// tag used for keyword filtering, not the prompt-injection categories
    /// used by `UserMemory`.
    #[instrument(skip(self, text))]
    pub async fn add(
        &self,
        user_id: &str,
        category: &str,
        text: &str,
    ) -> Result<VectorRecord, MemoryError> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| MemoryError::Embedding("no embedding provider configured".into()))?;
        let mut vector = embedder.embed(text).await?;
        if matches!(self.metric, Metric::Cosine | Metric::Ip) {
            normalize(&mut vector);
        }
        self.insert_embedded(user_id, category, text, vector).await
    }

    /// Ingests a batch in one transaction, embedding via a single
    /// `embed_batch` call. Partial embedding failure still persists the rows
    /// that did embed successfully.
    #[instrument(skip(self, texts))]
    pub async fn add_batch(
        &self,
        user_id: &str,
        category: &str,
        texts: &[String],
    ) -> Result<Vec<VectorRecord>, MemoryError> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| MemoryError::Embedding("no embedding provider configured".into()))?;
        let vectors = embedder.embed_batch(texts).await?;
        let mut out = Vec::with_capacity(vectors.len());
        for (text, mut vector) in texts.iter().zip(vectors.into_iter()) {
            if matches!(self.metric, Metric::Cosine | Metric::Ip) {
                normalize(&mut vector);
            }
            match self.insert_embedded(user_id, category, text, vector).await {
                Ok(rec) => out.push(rec),
                Err(e) => warn!(error = %e, "batch member failed to ingest, skipping"),
            }
        }
        Ok(out)
    }

    async fn insert_embedded(
        &self,
        user_id: &str,
        category: &str,
        text: &str,
        vector: Vec<f32>,
    ) -> Result<VectorRecord, MemoryError> {
        let now = chrono::Utc::now().to_rfc3339();
        let dim = vector.len();
        let blob = encode_embedding(&vector);

        let id = {
            let conn = self.db.lock().await;
            conn.execute(
                "INSERT INTO memories (user_id, category, text, embedding, embedding_dim,
                 created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![user_id, category, text, blob, dim as i64, now],
            )?;
            let id = conn.last_insert_rowid();
            conn.execute(
                "INSERT INTO memories_fts(rowid, text, category) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, text, category],
            )?;
            id
        };

        {
            let mut ids = self.hnsw_ids.write().await;
            let mut index = self.index.write().await;
            let label = ids.len();
            index.insert(&vector, label);
            ids.push(id);
        }
        self.persist_index().await;

        Ok(VectorRecord {
            id,
            user_id: user_id.to_string(),
            category: category.to_string(),
            text: text.to_string(),
            embedding_dim: dim,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Hybrid search: ANN candidates blended with FTS5 BM25, or a LIKE
    /// fallback when no embedding provider is configured.
    #[instrument(skip(self, query))]
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        let Some(embedder) = self.embedder.as_ref() else {
            return self.keyword_fallback(user_id, query, limit).await;
        };

        let mut qvec = embedder.embed(query).await?;
        if matches!(self.metric, Metric::Cosine | Metric::Ip) {
            normalize(&mut qvec);
        }

        let candidate_k = (limit * DEFAULT_CANDIDATE_MULT).min(LINEAR_FALLBACK_CAP);
        let neighbours = {
            let ids = self.hnsw_ids.read().await;
            let index = self.index.read().await;
            if ids.is_empty() {
                Vec::new()
            } else {
                index.search(&qvec, candidate_k, HNSW_EF_SEARCH)
            }
        };

        let ids = self.hnsw_ids.read().await;
        let mut vec_scores: Vec<(i64, f32)> = neighbours
            .into_iter()
            .filter_map(|n| {
                ids.get(n.d_id)
                    .map(|&id| (id, self.metric.to_similarity(n.distance)))
            })
            .collect();
        drop(ids);

        let bm25 = self.fts_search(user_id, query, candidate_k).await?;
        let bm25_map: std::collections::HashMap<i64, f32> = bm25.into_iter().collect();

        // Merge any FTS-only hits into the candidate set at vecScore=0.
        for (id, _) in bm25_map.iter() {
            if !vec_scores.iter().any(|(vid, _)| vid == id) {
                vec_scores.push((*id, 0.0));
            }
        }

        let mut scored: Vec<(i64, f32)> = vec_scores
            .into_iter()
            .map(|(id, sim_vec)| {
                let bm25_score = bm25_map.get(&id).copied();
                let text_score = bm25_score
                    .map(|b| 1.0 / (1.0 + b.max(0.0)))
                    .unwrap_or(0.0);
                let score = if bm25_map.is_empty() {
                    sim_vec
                } else {
                    DEFAULT_VECTOR_WEIGHT * sim_vec + DEFAULT_TEXT_WEIGHT * text_score
                };
                (id, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.retain(|(_, score)| *score >= min_score);
        scored.truncate(limit);

        let mut hits = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            if let Some(record) = self.fetch_record(user_id, id).await? {
                hits.push(SearchHit { record, score });
            }
        }
        Ok(hits)
    }

    async fn keyword_fallback(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, category, text, embedding_dim, created_at, updated_at
             FROM memories
             WHERE user_id = ?1 AND tombstoned = 0 AND (text LIKE ?2 OR category LIKE ?2)
             ORDER BY updated_at DESC LIMIT ?3",
        )?;
        let like = format!("%{query}%");
        let rows = stmt.query_map(rusqlite::params![user_id, like, limit as i64], row_to_record)?;
        Ok(rows
            .filter_map(|r| r.ok())
            .map(|record| SearchHit { record, score: 1.0 })
            .collect())
    }

    async fn fts_search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(i64, f32)>, MemoryError> {
        let conn = self.db.lock().await;
        let mut stmt = match conn.prepare(
            "SELECT m.id, bm25(memories_fts) FROM memories m
             JOIN memories_fts f ON m.id = f.rowid
             WHERE m.user_id = ?1 AND m.tombstoned = 0 AND memories_fts MATCH ?2
             ORDER BY bm25(memories_fts) LIMIT ?3",
        ) {
            Ok(s) => s,
            Err(_) => return Ok(Vec::new()),
        };
        let rows = stmt.query_map(rusqlite::params![user_id, query, limit as i64], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, f64>(1)? as f32))
        });
        match rows {
            Ok(rows) => Ok(rows.filter_map(|r| r.ok()).collect()),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn fetch_record(
        &self,
        user_id: &str,
        id: i64,
    ) -> Result<Option<VectorRecord>, MemoryError> {
        let conn = self.db.lock().await;
        conn.query_row(
            "SELECT id, user_id, category, text, embedding_dim, created_at, updated_at
             FROM memories WHERE id = ?1 AND user_id = ?2 AND tombstoned = 0",
            rusqlite::params![id, user_id],
            row_to_record,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    /// Tombstones a memory and strikes it from `hnswIDs`. Triggers a
    /// background rebuild once >10% of live vectors are tombstoned.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<(), MemoryError> {
        {
            let conn = self.db.lock().await;
            let n = conn.execute(
                "UPDATE memories SET tombstoned = 1 WHERE id = ?1 AND tombstoned = 0",
                [id],
            )?;
            if n == 0 {
                return Err(MemoryError::VectorNotFound(id));
            }
            conn.execute(
                "INSERT INTO memories_fts(memories_fts, rowid, text, category)
                 SELECT 'delete', id, text, category FROM memories WHERE id = ?1",
                [id],
            )?;
        }

        {
            let mut ids = self.hnsw_ids.write().await;
            if let Some(pos) = ids.iter().position(|&x| x == id) {
                ids.remove(pos);
            }
        }

        let live = self.hnsw_ids.read().await.len().max(1);
        let mut tombstones = self.tombstones_since_rebuild.lock().await;
        *tombstones += 1;
        let ratio = *tombstones as f64 / live as f64;
        if ratio > REBUILD_THRESHOLD {
            *tombstones = 0;
            drop(tombstones);
            debug!("tombstone ratio exceeded threshold, rebuilding index");
            self.rebuild().await?;
        }
        Ok(())
    }

    /// Full rebuild of the HNSW index from live rows, under the write lock.
    #[instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<(), MemoryError> {
        self.load().await?;
        self.persist_index().await;
        Ok(())
    }

    async fn persist_index(&self) {
        let index = self.index.read().await;
        if let Err(e) = index.file_dump(&self.hnsw_path, "memories") {
            warn!(error = %e, "failed to dump HNSW index to disk");
        }
    }
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * 4);
    for x in v {
        buf.extend_from_slice(&x.to_le_bytes());
    }
    buf
}

fn decode_embedding(blob: &[u8], dim: usize) -> Option<Vec<f32>> {
    if blob.len() != dim * 4 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<VectorRecord> {
    Ok(VectorRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category: row.get(2)?,
        text: row.get(3)?,
        embedding_dim: row.get::<_, i64>(4)? as usize,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use std::sync::Arc;

    struct FakeEmbedder;

    #[async_trait]
    impl EmbedProvider for FakeEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
            // Deterministic toy embedding: bag-of-bytes histogram bucketed into 8 dims.
            let mut v = vec![0.0f32; 8];
            for (i, b) in text.bytes().enumerate() {
                v[(b as usize + i) % 8] += 1.0;
            }
            Ok(v)
        }
    }

    fn new_memory() -> VectorMemory {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        VectorMemory::new(
            Arc::new(Mutex::new(conn)),
            Some(Arc::new(FakeEmbedder)),
            Metric::Cosine,
            std::env::temp_dir().to_string_lossy().to_string(),
        )
    }

    #[tokio::test]
    async fn add_then_search_returns_self() {
        let mem = new_memory();
        mem.add("u1", "fact", "the cat sat on the mat").await.unwrap();
        mem.add("u1", "fact", "rockets launch from pads").await.unwrap();

        let hits = mem
            .search("u1", "the cat sat on the mat", 5, 0.0)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].record.text, "the cat sat on the mat");
    }

    #[tokio::test]
    async fn delete_removes_from_results() {
        let mem = new_memory();
        let rec = mem.add("u1", "fact", "ephemeral note").await.unwrap();
        mem.delete(rec.id).await.unwrap();
        let hits = mem.search("u1", "ephemeral note", 5, 0.0).await.unwrap();
        assert!(hits.iter().all(|h| h.record.id != rec.id));
    }

    #[test]
    fn metric_conversions() {
        assert!((Metric::Cosine.to_similarity(0.0) - 1.0).abs() < 1e-6);
        assert!((Metric::Ip.to_similarity(1.0) - 1.0).abs() < 1e-6);
        assert!((Metric::L2.to_similarity(0.0) - 1.0).abs() < 1e-6);
    }
}
