//! Append-only embedding index with cosine-similarity top-K retrieval.
//!
//! ## Semantics
//!
//! - Records are immutable once added; there is no update or delete.
//! - Scoring is **pairwise safe**: a stored vector whose length differs from the
//!   query (or that yields a non-finite score) ranks with [`MISMATCH_SCORE`]
//!   instead of failing the whole query.
//! - Equal scores keep insertion order (earlier record first).
//!
//! ## Durability
//!
//! A file-backed index rewrites its JSON file (temp file + rename) inside the
//! write lock *before* the new record is committed, so a failed write leaves
//! neither the file nor the in-memory view changed.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque metadata carried through to query results.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Score assigned to records that cannot be compared with the query.
pub const MISMATCH_SCORE: f32 = f32::MIN;

/// A stored embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A single match returned by [`VectorIndex::query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("vector index io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("vector index file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode vector index: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("record {id} has a non-finite component at position {position}")]
    NonFinite { id: String, position: usize },
}

/// Cosine similarity of two vectors.
///
/// Returns `0.0` when either vector has zero norm and [`MISMATCH_SCORE`] when
/// lengths differ. Accumulates in `f64` and clamps to `[-1, 1]`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return MISMATCH_SCORE;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !score.is_finite() {
        return MISMATCH_SCORE;
    }
    score.clamp(-1.0, 1.0) as f32
}

/// Candidate in the top-K heap. "Greater" means "ranks higher".
#[derive(Debug, Copy, Clone)]
struct Ranked {
    score: f32,
    position: usize,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.position.cmp(&self.position))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

/// Per-brand embedding index.
///
/// Single writer / many readers (`RwLock`). Never shared across brands.
#[derive(Debug)]
pub struct VectorIndex {
    path: Option<PathBuf>,
    records: RwLock<Vec<VectorRecord>>,
}

impl VectorIndex {
    /// Non-durable index (dev/tests). Contents vanish with the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(Vec::new()),
        }
    }

    /// Open a file-backed index. A missing file yields an empty index.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, VectorError> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| VectorError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(VectorError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), records = records.len(), "opened vector index");

        Ok(Self {
            path: Some(path),
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Dimension of the first stored vector, if any.
    pub fn dim(&self) -> Option<usize> {
        self.read().first().map(|r| r.vector.len())
    }

    /// Append a record. Visible to queries only once persisted.
    pub fn add(&self, record: VectorRecord) -> Result<(), VectorError> {
        if let Some(position) = record.vector.iter().position(|c| !c.is_finite()) {
            return Err(VectorError::NonFinite {
                id: record.id,
                position,
            });
        }

        let mut records = self.write();
        records.push(record);

        if let Some(path) = &self.path {
            if let Err(err) = persist(path, &records) {
                records.pop();
                return Err(err);
            }
        }

        Ok(())
    }

    /// Up to `top_k` records by descending cosine similarity to `query`.
    pub fn query(&self, query: &[f32], top_k: usize) -> Vec<SearchResult> {
        if top_k == 0 {
            return Vec::new();
        }

        let records = self.read();
        let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(top_k.min(records.len()) + 1);

        for (position, record) in records.iter().enumerate() {
            let score = cosine_similarity(query, &record.vector);
            heap.push(Reverse(Ranked { score, position }));
            if heap.len() > top_k {
                heap.pop();
            }
        }

        // Ascending order of Reverse<_> is descending rank.
        heap.into_sorted_vec()
            .into_iter()
            .map(|Reverse(ranked)| {
                let record = &records[ranked.position];
                SearchResult {
                    id: record.id.clone(),
                    score: ranked.score,
                    metadata: record.metadata.clone(),
                }
            })
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<VectorRecord>> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<VectorRecord>> {
        self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn persist(path: &Path, records: &[VectorRecord]) -> Result<(), VectorError> {
    let io_err = |source| VectorError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let bytes = serde_json::to_vec_pretty(records)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
