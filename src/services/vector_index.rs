//! Local vector index with on-disk persistence.
//!
//! An index lives in one generation directory holding three artifacts that
//! must stay mutually consistent: `vectors.bin` (little-endian f32 rows),
//! `entries.json` (the chunk metadata side-table, positionally aligned with
//! the vector rows), and `manifest.json` (embedding model identity, vector
//! dimension, similarity metric, counts). An `ACTIVE` pointer file in the
//! index root names the live generation; rebuilds write a fresh generation
//! and swap the pointer atomically, so the old index stays servable until
//! the new one is complete.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::models::{Chunk, SIMILARITY_METRIC};

const VECTORS_FILE: &str = "vectors.bin";
const ENTRIES_FILE: &str = "entries.json";
const MANIFEST_FILE: &str = "manifest.json";
const ACTIVE_POINTER: &str = "ACTIVE";

/// Index metadata, validated before any loaded index is trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub model_id: String,
    pub dimension: usize,
    pub metric: String,
    pub chunk_count: u64,
    pub built_at: String,
}

/// Metadata for one stored vector, keyed by row position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub sequence_index: u32,
    pub text: String,
}

impl IndexEntry {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            source: chunk.source.clone(),
            sequence_index: chunk.sequence_index,
            text: chunk.text.clone(),
        }
    }
}

/// A search hit: entry metadata plus its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

/// In-memory cosine-similarity index over L2-normalized vectors.
///
/// Immutable once built and shared read-only between rebuilds; all vectors
/// must come from the single embedding model named in the manifest.
pub struct VectorIndex {
    model_id: String,
    dimension: usize,
    // Row-major, one row per entry
    vectors: Vec<f32>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
            vectors: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store one chunk's vector and metadata. The vector must match the
    /// index dimension; rejecting here keeps the two artifacts aligned.
    pub fn add(&mut self, entry: IndexEntry, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.vectors.extend_from_slice(vector);
        self.entries.push(entry);
        Ok(())
    }

    /// Nearest-neighbor search by descending cosine similarity.
    ///
    /// `k` larger than the index returns everything; an empty index returns
    /// an empty result. Ties keep insertion order (stable sort), so results
    /// are reproducible.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredEntry>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<ScoredEntry> = self
            .entries
            .iter()
            .enumerate()
            .map(|(row, entry)| {
                let offset = row * self.dimension;
                let vector = &self.vectors[offset..offset + self.dimension];
                ScoredEntry {
                    entry: entry.clone(),
                    score: dot(query, vector),
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    /// Persist into a fresh generation directory under `index_root`, then
    /// atomically swap the active-index pointer to it. Returns the
    /// generation path. Older generations are pruned after the swap.
    pub fn save(&self, index_root: &Path) -> Result<PathBuf, IndexError> {
        fs::create_dir_all(index_root)?;

        // Timestamp plus a process-wide counter so back-to-back rebuilds
        // never collide on a generation name.
        static GENERATION_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = GENERATION_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let generation = format!(
            "gen-{}-{:04}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            seq
        );
        let generation_dir = index_root.join(&generation);
        fs::create_dir_all(&generation_dir)?;

        let mut bytes = Vec::with_capacity(self.vectors.len() * 4);
        for value in &self.vectors {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        fs::write(generation_dir.join(VECTORS_FILE), bytes)?;

        let entries_json = serde_json::to_vec_pretty(&self.entries)?;
        fs::write(generation_dir.join(ENTRIES_FILE), entries_json)?;

        let manifest = IndexManifest {
            model_id: self.model_id.clone(),
            dimension: self.dimension,
            metric: SIMILARITY_METRIC.to_string(),
            chunk_count: self.entries.len() as u64,
            built_at: chrono::Utc::now().to_rfc3339(),
        };
        fs::write(
            generation_dir.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )?;

        // Pointer swap: write-then-rename so readers see either the old
        // generation or the new one, never a partial state.
        let pointer_tmp = index_root.join(format!("{}.tmp", ACTIVE_POINTER));
        fs::write(&pointer_tmp, &generation)?;
        fs::rename(&pointer_tmp, index_root.join(ACTIVE_POINTER))?;

        prune_stale_generations(index_root, &generation);

        Ok(generation_dir)
    }

    /// Read the active generation's manifest without loading vectors. Used
    /// by status reporting, which must stay cheap.
    pub fn load_manifest(index_root: &Path) -> Result<IndexManifest, IndexError> {
        let pointer_path = index_root.join(ACTIVE_POINTER);
        if !pointer_path.exists() {
            return Err(IndexError::NotFound(index_root.display().to_string()));
        }
        let generation = fs::read_to_string(&pointer_path)?;
        let manifest_path = index_root.join(generation.trim()).join(MANIFEST_FILE);
        Ok(serde_json::from_slice(&fs::read(manifest_path)?)?)
    }

    /// Load the active generation under `index_root`, validating the
    /// manifest and the consistency of vectors and metadata.
    pub fn load(index_root: &Path) -> Result<Self, IndexError> {
        let pointer_path = index_root.join(ACTIVE_POINTER);
        if !pointer_path.exists() {
            return Err(IndexError::NotFound(index_root.display().to_string()));
        }

        let generation = fs::read_to_string(&pointer_path)?;
        let generation_dir = index_root.join(generation.trim());
        if !generation_dir.is_dir() {
            return Err(IndexError::Corrupt(format!(
                "active pointer names missing generation: {}",
                generation.trim()
            )));
        }

        let manifest: IndexManifest =
            serde_json::from_slice(&fs::read(generation_dir.join(MANIFEST_FILE))?)?;

        if manifest.metric != SIMILARITY_METRIC {
            return Err(IndexError::Corrupt(format!(
                "index built with metric '{}', this build queries with '{}'",
                manifest.metric, SIMILARITY_METRIC
            )));
        }
        if manifest.dimension == 0 {
            return Err(IndexError::Corrupt("manifest dimension is zero".to_string()));
        }

        let entries: Vec<IndexEntry> =
            serde_json::from_slice(&fs::read(generation_dir.join(ENTRIES_FILE))?)?;

        let bytes = fs::read(generation_dir.join(VECTORS_FILE))?;
        if bytes.len() % 4 != 0 {
            return Err(IndexError::Corrupt(
                "vector file length is not a multiple of 4".to_string(),
            ));
        }
        let vectors: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let vector_rows = vectors.len() / manifest.dimension;
        if entries.len() as u64 != manifest.chunk_count
            || vector_rows as u64 != manifest.chunk_count
            || vectors.len() != vector_rows * manifest.dimension
        {
            return Err(IndexError::Corrupt(format!(
                "vector count ({}) and metadata count ({}) disagree with manifest ({})",
                vector_rows,
                entries.len(),
                manifest.chunk_count
            )));
        }

        Ok(Self {
            model_id: manifest.model_id,
            dimension: manifest.dimension,
            vectors,
            entries,
        })
    }

    /// Reject an index produced by a different embedding model or dimension;
    /// mixing models invalidates similarity comparisons.
    pub fn validate_model(&self, model_id: &str, dimension: usize) -> Result<(), IndexError> {
        if self.model_id != model_id {
            return Err(IndexError::Corrupt(format!(
                "index built with model '{}', configured model is '{}'; re-index required",
                self.model_id, model_id
            )));
        }
        if self.dimension != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: self.dimension,
            });
        }
        Ok(())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Best-effort removal of generations no longer referenced by the pointer.
fn prune_stale_generations(index_root: &Path, active: &str) {
    let Ok(entries) = fs::read_dir(index_root) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("gen-") && name != active {
            let _ = fs::remove_dir_all(entry.path());
        }
    }
}
