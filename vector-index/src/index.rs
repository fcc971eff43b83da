use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use common::{error::AppError, utils::embedding::EmbeddingProvider};

pub const META_FILE: &str = "meta.json";
pub const CHUNKS_FILE: &str = "chunks.jsonl";

/// One embedded chunk inside the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Index-level metadata, stored next to the records.
///
/// `revision` changes on every mutation and drives session pipeline
/// invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub revision: String,
    pub dimension: usize,
    pub embedding_model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub chunk_count: usize,
}

/// A retrieval hit with its cosine similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// An in-memory vector index over embedded text chunks.
///
/// The index serialises into a directory (`meta.json` + `chunks.jsonl`) and
/// loads back fully into memory, so the directory can be archived or deleted
/// once a load completes.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    meta: IndexMeta,
    records: Vec<ChunkRecord>,
}

impl VectorIndex {
    /// Embeds `chunks` and builds a fresh index with a new revision.
    pub async fn from_chunks(
        chunks: &[String],
        embedder: &EmbeddingProvider,
    ) -> Result<Self, AppError> {
        if chunks.is_empty() {
            return Err(AppError::Validation(
                "cannot build an index from zero chunks".into(),
            ));
        }

        let embeddings = embedder.embed_batch(chunks.to_vec()).await?;
        if embeddings.len() != chunks.len() {
            return Err(AppError::Processing(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let dimension = embedder.dimension();
        let records: Vec<ChunkRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|(text, embedding)| ChunkRecord {
                id: Uuid::new_v4().to_string(),
                text: text.clone(),
                embedding,
            })
            .collect();

        for record in &records {
            if record.embedding.len() != dimension {
                return Err(AppError::Processing(format!(
                    "embedding dimension {} does not match provider dimension {}",
                    record.embedding.len(),
                    dimension
                )));
            }
        }

        let now = Utc::now();
        Ok(Self {
            meta: IndexMeta {
                revision: Uuid::new_v4().to_string(),
                dimension,
                embedding_model: embedder.model_code(),
                created_at: now,
                updated_at: now,
                chunk_count: records.len(),
            },
            records,
        })
    }

    /// Unions `other`'s records into this index, consuming `other`.
    ///
    /// Content-additive: nothing is deduplicated, so merging the same
    /// document twice doubles its records. Bumps the revision.
    pub fn merge(&mut self, other: VectorIndex) -> Result<(), AppError> {
        if other.meta.dimension != self.meta.dimension {
            return Err(AppError::Validation(format!(
                "cannot merge indexes with dimensions {} and {}",
                self.meta.dimension, other.meta.dimension
            )));
        }

        self.records.extend(other.records);
        self.meta.chunk_count = self.records.len();
        self.meta.updated_at = Utc::now();
        self.meta.revision = Uuid::new_v4().to_string();

        Ok(())
    }

    /// Exact cosine-similarity scan returning at most `k` chunks, best
    /// first. Ties and zero-norm vectors rank by insertion order.
    pub fn top_k(&self, query_embedding: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| {
                (position, cosine_similarity(query_embedding, &record.embedding))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(k)
            .map(|(position, score)| {
                let record = &self.records[position];
                ScoredChunk {
                    id: record.id.clone(),
                    text: record.text.clone(),
                    score,
                }
            })
            .collect()
    }

    /// Writes the index into `dir` (`meta.json` + `chunks.jsonl`).
    pub async fn save(&self, dir: &Path) -> Result<(), AppError> {
        tokio::fs::create_dir_all(dir).await?;

        let meta_json = serde_json::to_vec_pretty(&self.meta)?;
        tokio::fs::write(dir.join(META_FILE), meta_json).await?;

        let mut lines = String::new();
        for record in &self.records {
            lines.push_str(&serde_json::to_string(record)?);
            lines.push('\n');
        }
        tokio::fs::write(dir.join(CHUNKS_FILE), lines).await?;

        debug!(dir = %dir.display(), chunks = self.records.len(), "Saved index");
        Ok(())
    }

    /// Loads an index from `dir`, fully materialising it in memory. The
    /// directory is not needed afterwards.
    pub async fn load(dir: &Path) -> Result<Self, AppError> {
        let meta_bytes = tokio::fs::read(dir.join(META_FILE)).await?;
        let meta: IndexMeta = serde_json::from_slice(&meta_bytes)?;

        let chunk_bytes = tokio::fs::read(dir.join(CHUNKS_FILE)).await?;
        let contents = String::from_utf8(chunk_bytes)
            .map_err(|e| AppError::Processing(format!("chunk file is not UTF-8: {e}")))?;

        let mut records = Vec::with_capacity(meta.chunk_count);
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let record: ChunkRecord = serde_json::from_str(line)?;
            if record.embedding.len() != meta.dimension {
                return Err(AppError::Validation(format!(
                    "chunk {} has dimension {}, index metadata says {}",
                    record.id,
                    record.embedding.len(),
                    meta.dimension
                )));
            }
            records.push(record);
        }

        if records.len() != meta.chunk_count {
            return Err(AppError::Validation(format!(
                "index metadata counts {} chunks but {} were loaded",
                meta.chunk_count,
                records.len()
            )));
        }

        debug!(dir = %dir.display(), chunks = records.len(), "Loaded index");
        Ok(Self { meta, records })
    }

    pub fn revision(&self) -> &str {
        &self.meta.revision
    }

    pub fn dimension(&self) -> usize {
        self.meta.dimension
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
