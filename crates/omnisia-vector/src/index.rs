//! In-memory embedding index with exact brute-force nearest-neighbour search.
//!
//! Records are kept in a single ordered collection of (text, vector) pairs so
//! a text can never exist without its vector or vice versa. A record's
//! position is its offset in insertion order; positions are qualified by the
//! index generation, which increments on every reset.
//!
//! One mutex guards the records, the dimension, and the generation. Embedding
//! runs before the lock is taken, so the lock is never held across an await
//! and a batch is committed in a single step.
//!
//! Snapshot writes are serialized by a second mutex so a slower writer can
//! never replace a newer file with an older copy.

use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::{DynEmbeddingService, EmbeddingService};
use crate::error::IndexError;

/// Current on-disk snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// Distance function used to rank stored vectors against a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Sum of squared component differences.
    #[default]
    L2Squared,
    /// `1 - cosine_similarity`; zero-magnitude vectors have distance 1.
    Cosine,
}

impl DistanceMetric {
    /// Distance between two equal-length vectors. Smaller is closer.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2Squared => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = f64::from(*x) - f64::from(*y);
                    d * d
                })
                .sum::<f64>() as f32,
            DistanceMetric::Cosine => {
                let dot: f64 = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| f64::from(*x) * f64::from(*y))
                    .sum();
                let mag_a = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
                let mag_b = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
                if mag_a == 0.0 || mag_b == 0.0 {
                    return 1.0;
                }
                (1.0 - dot / (mag_a * mag_b)) as f32
            }
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" | "l2_squared" => Ok(DistanceMetric::L2Squared),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(IndexError::InvalidArgument(format!(
                "unknown distance metric '{}'. Must be one of: l2_squared, cosine",
                other
            ))),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::L2Squared => f.write_str("l2_squared"),
            DistanceMetric::Cosine => f.write_str("cosine"),
        }
    }
}

/// A stored text together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedText {
    pub text: String,
    pub vector: Vec<f32>,
}

/// A single nearest-neighbour match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    /// Insertion position of the matched record within the current generation.
    pub position: usize,
    pub text: String,
    /// Distance to the query under the index metric; smaller is closer.
    pub distance: f32,
}

/// Positions assigned to a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inserted {
    pub generation: u64,
    pub positions: Range<usize>,
}

/// Serializable copy of an index's contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub metric: DistanceMetric,
    pub dimension: Option<usize>,
    pub generation: u64,
    pub records: Vec<IndexedText>,
}

/// Size, dimension and generation read under a single lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub size: usize,
    pub dimension: Option<usize>,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct IndexState {
    records: Vec<IndexedText>,
    dimension: Option<usize>,
    generation: u64,
}

/// Growing collection of (text, vector) records answering k-NN queries.
///
/// Shared across request handlers as `Arc<EmbeddingIndex>`.
pub struct EmbeddingIndex {
    state: Mutex<IndexState>,
    /// Held from snapshot to rename in [`EmbeddingIndex::save`].
    save_lock: Mutex<()>,
    embedder: Arc<dyn DynEmbeddingService>,
    metric: DistanceMetric,
}

impl fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("metric", &self.metric)
            .field("size", &self.size())
            .finish()
    }
}

impl EmbeddingIndex {
    /// Create an empty index over the given embedding service.
    pub fn new(embedder: impl EmbeddingService + 'static, metric: DistanceMetric) -> Self {
        Self::new_dyn(Arc::new(embedder), metric)
    }

    /// Create an empty index from a shared, type-erased embedding service.
    pub fn new_dyn(embedder: Arc<dyn DynEmbeddingService>, metric: DistanceMetric) -> Self {
        Self {
            state: Mutex::new(IndexState::default()),
            save_lock: Mutex::new(()),
            embedder,
            metric,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexState>, IndexError> {
        self.state.lock().map_err(|_| IndexError::LockPoisoned)
    }

    /// Embed and append a batch of texts, all-or-nothing.
    ///
    /// The first batch added to an empty index fixes the index dimension.
    pub async fn add_texts(&self, texts: &[String]) -> Result<Inserted, IndexError> {
        if texts.is_empty() {
            return Err(IndexError::InvalidArgument(
                "texts batch must not be empty".to_string(),
            ));
        }

        let vectors = self
            .embedder
            .embed_batch_boxed(texts)
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(IndexError::Embedding(format!(
                "embedding service returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }

        let batch_dim = vectors[0].len();
        if batch_dim == 0 {
            return Err(IndexError::Embedding(
                "embedding service returned a zero-length vector".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != batch_dim) {
            return Err(IndexError::DimensionMismatch {
                expected: batch_dim,
                actual: bad.len(),
            });
        }

        let mut state = self.lock()?;
        match state.dimension {
            Some(expected) if expected != batch_dim => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: batch_dim,
                });
            }
            Some(_) => {}
            None => state.dimension = Some(batch_dim),
        }

        let start = state.records.len();
        state.records.extend(
            texts
                .iter()
                .zip(vectors)
                .map(|(text, vector)| IndexedText {
                    text: text.clone(),
                    vector,
                }),
        );
        let end = state.records.len();

        debug!(
            added = end - start,
            size = end,
            generation = state.generation,
            "Texts added to embedding index"
        );

        Ok(Inserted {
            generation: state.generation,
            positions: start..end,
        })
    }

    /// Return the `k` records closest to `text`, best match first.
    ///
    /// Ties are broken by insertion position. An empty index yields an empty
    /// result without calling the embedding service.
    ///
    /// `text` that is empty or whitespace only is rejected with
    /// [`IndexError::InvalidArgument`]. Other text is embedded exactly as
    /// given, surrounding whitespace included.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryMatch>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidArgument(
                "k must be at least 1".to_string(),
            ));
        }
        if text.trim().is_empty() {
            return Err(IndexError::InvalidArgument(
                "query text must not be empty".to_string(),
            ));
        }
        if self.lock()?.records.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self
            .embedder
            .embed_boxed(text)
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        let state = self.lock()?;
        let Some(expected) = state.dimension else {
            // Reset between the emptiness check and the scan.
            return Ok(Vec::new());
        };
        if query_vec.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: query_vec.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = state
            .records
            .iter()
            .enumerate()
            .map(|(pos, record)| (pos, self.metric.distance(&query_vec, &record.vector)))
            .collect();

        // NaN distances rank after every number.
        scored.sort_by(|a, b| {
            a.1.is_nan()
                .cmp(&b.1.is_nan())
                .then(a.1.total_cmp(&b.1))
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, distance)| QueryMatch {
                position,
                text: state.records[position].text.clone(),
                distance,
            })
            .collect())
    }

    /// Size, dimension and generation, or [`IndexError::LockPoisoned`].
    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        let state = self.lock()?;
        Ok(IndexStats {
            size: state.records.len(),
            dimension: state.dimension,
            generation: state.generation,
        })
    }

    /// Current record count. Reads 0 on a poisoned index; use
    /// [`EmbeddingIndex::stats`] to tell the two apart.
    pub fn size(&self) -> usize {
        self.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Dimension fixed by the first batch, `None` while empty.
    pub fn dimension(&self) -> Option<usize> {
        self.lock().ok().and_then(|s| s.dimension)
    }

    /// Number of resets this index has undergone.
    pub fn generation(&self) -> u64 {
        self.lock().map(|s| s.generation).unwrap_or(0)
    }

    /// Discard every record and the dimension. Idempotent.
    pub fn reset(&self) -> Result<(), IndexError> {
        let mut state = self.lock()?;
        let discarded = state.records.len();
        state.records.clear();
        state.dimension = None;
        state.generation += 1;
        info!(discarded, generation = state.generation, "Embedding index reset");
        Ok(())
    }

    /// Copy the current contents.
    pub fn snapshot(&self) -> Result<IndexSnapshot, IndexError> {
        let state = self.lock()?;
        Ok(IndexSnapshot {
            version: SNAPSHOT_VERSION,
            metric: self.metric,
            dimension: state.dimension,
            generation: state.generation,
            records: state.records.clone(),
        })
    }

    /// Replace the contents with a validated snapshot.
    pub fn restore(&self, snapshot: IndexSnapshot) -> Result<(), IndexError> {
        validate_snapshot(&snapshot, self.metric)?;
        let mut state = self.lock()?;
        state.records = snapshot.records;
        state.dimension = snapshot.dimension;
        // Positions handed out before the restore must not be mistaken for
        // positions in the restored contents.
        state.generation = state.generation.max(snapshot.generation) + 1;
        Ok(())
    }

    /// Write a JSON snapshot, replacing `path` atomically.
    ///
    /// Concurrent saves run one at a time and each copies the contents only
    /// once it holds the save lock, so the file ends up with the newest
    /// contents. Blocking; call from `spawn_blocking` in async code.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        // Guards no data, so a poisoned lock is still usable.
        let _saving = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot = self.snapshot()?;
        let json = serde_json::to_vec(&snapshot)
            .map_err(|e| IndexError::Persistence(format!("serialize snapshot: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IndexError::Persistence(format!("create {}: {}", parent.display(), e))
            })?;
        }
        let tmp = temp_path(path);
        if let Err(e) = std::fs::write(&tmp, json) {
            discard_temp(&tmp);
            return Err(IndexError::Persistence(format!("write {}: {}", tmp.display(), e)));
        }
        if let Err(e) = std::fs::rename(&tmp, path) {
            discard_temp(&tmp);
            return Err(IndexError::Persistence(format!(
                "rename to {}: {}",
                path.display(),
                e
            )));
        }

        debug!(path = %path.display(), records = snapshot.records.len(), "Index snapshot saved");
        Ok(())
    }

    /// Restore from a JSON snapshot written by [`EmbeddingIndex::save`].
    pub fn load(&self, path: &Path) -> Result<usize, IndexError> {
        let bytes = std::fs::read(path)
            .map_err(|e| IndexError::Persistence(format!("read {}: {}", path.display(), e)))?;
        let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| IndexError::Persistence(format!("parse {}: {}", path.display(), e)))?;
        let count = snapshot.records.len();
        self.restore(snapshot)?;
        info!(path = %path.display(), records = count, "Index snapshot loaded");
        Ok(count)
    }

    /// Load `path` if it exists, logging and ignoring unreadable snapshots.
    pub fn load_if_present(&self, path: &Path) -> usize {
        if !path.exists() {
            return 0;
        }
        match self.load(path) {
            Ok(count) => count,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable index snapshot");
                0
            }
        }
    }
}

/// Sibling of `path` unique to one write.
fn temp_path(path: &Path) -> std::path::PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

fn discard_temp(tmp: &Path) {
    match std::fs::remove_file(tmp) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            warn!(path = %tmp.display(), error = %e, "Failed to remove temporary snapshot")
        }
        _ => {}
    }
}

fn validate_snapshot(snapshot: &IndexSnapshot, metric: DistanceMetric) -> Result<(), IndexError> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(IndexError::Persistence(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }
    if snapshot.metric != metric {
        return Err(IndexError::Persistence(format!(
            "snapshot metric {} does not match index metric {}",
            snapshot.metric, metric
        )));
    }
    match (snapshot.dimension, snapshot.records.is_empty()) {
        (None, true) => Ok(()),
        (Some(0), _) | (None, false) | (Some(_), true) => Err(IndexError::Persistence(
            "snapshot dimension inconsistent with its records".to_string(),
        )),
        (Some(dim), false) => match snapshot.records.iter().find(|r| r.vector.len() != dim) {
            Some(bad) => Err(IndexError::Persistence(format!(
                "snapshot record has dimension {}, expected {}",
                bad.vector.len(),
                dim
            ))),
            None => Ok(()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{MockEmbedding, StaticEmbedding};

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn fruit_index() -> EmbeddingIndex {
        let embedder = StaticEmbedding::new()
            .with("apple", vec![1.0, 0.0])
            .with("banana", vec![0.0, 1.0])
            .with("apple-like", vec![0.9, 0.1]);
        EmbeddingIndex::new(embedder, DistanceMetric::L2Squared)
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    #[tokio::test]
    async fn test_nearest_match_with_l2_distance() {
        let index = fruit_index();
        index.add_texts(&texts(&["apple", "banana"])).await.unwrap();

        let hits = index.query("apple-like", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "apple");
        assert_eq!(hits[0].position, 0);
        assert!((hits[0].distance - 0.02).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_query_empty_index_returns_nothing() {
        // The stub has no vector for "x", so this also proves the embedder
        // is not consulted for an empty index.
        let index = EmbeddingIndex::new(StaticEmbedding::new(), DistanceMetric::L2Squared);
        assert!(index.query("x", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_limits_and_sorts() {
        let embedder = StaticEmbedding::new()
            .with("a", vec![0.0, 0.0])
            .with("b", vec![3.0, 0.0])
            .with("c", vec![1.0, 0.0])
            .with("d", vec![5.0, 0.0])
            .with("e", vec![2.0, 0.0])
            .with("y", vec![0.4, 0.0]);
        let index = EmbeddingIndex::new(embedder, DistanceMetric::L2Squared);
        index.add_texts(&texts(&["a", "b", "c", "d", "e"])).await.unwrap();

        let hits = index.query("y", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "a");
        assert_eq!(hits[1].text, "c");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_failed_batch_commits_nothing() {
        let embedder = StaticEmbedding::new()
            .with("one", vec![1.0, 0.0])
            .with("two", vec![0.0, 1.0])
            .with("four", vec![1.0, 1.0])
            .with("five", vec![2.0, 1.0])
            .failing("three");
        let index = EmbeddingIndex::new(embedder, DistanceMetric::L2Squared);

        let err = index
            .add_texts(&texts(&["one", "two", "three", "four", "five"]))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
        assert_eq!(index.size(), 0);
        assert_eq!(index.dimension(), None);
    }

    #[tokio::test]
    async fn test_reset_then_new_dimension() {
        let embedder = StaticEmbedding::new()
            .with("old", vec![1.0, 0.0])
            .with("new", vec![1.0, 0.0, 0.0]);
        let index = EmbeddingIndex::new(embedder, DistanceMetric::L2Squared);
        index.add_texts(&texts(&["old"])).await.unwrap();
        assert_eq!(index.dimension(), Some(2));

        index.reset().unwrap();
        assert_eq!(index.size(), 0);
        assert_eq!(index.dimension(), None);

        index.add_texts(&texts(&["new"])).await.unwrap();
        assert_eq!(index.size(), 1);
        assert_eq!(index.dimension(), Some(3));
    }

    #[tokio::test]
    async fn test_identical_embeddings_keep_insertion_order() {
        let embedder = StaticEmbedding::new()
            .with("first", vec![0.5, 0.5])
            .with("far", vec![9.0, 9.0])
            .with("second", vec![0.5, 0.5])
            .with("between", vec![0.5, 0.5]);
        let index = EmbeddingIndex::new(embedder, DistanceMetric::L2Squared);
        index.add_texts(&texts(&["first", "far"])).await.unwrap();
        index.add_texts(&texts(&["second"])).await.unwrap();

        let hits = index.query("between", 3).await.unwrap();
        assert_eq!(hits[0].text, "first");
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[1].text, "second");
        assert_eq!(hits[1].distance, 0.0);
        assert_eq!(hits[1].position, 2);
        assert_eq!(hits[2].text, "far");
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[tokio::test]
    async fn test_size_counts_only_successful_batches() {
        let embedder = StaticEmbedding::new()
            .with("a", vec![1.0])
            .with("b", vec![2.0])
            .with("c", vec![3.0])
            .failing("bad");
        let index = EmbeddingIndex::new(embedder, DistanceMetric::L2Squared);

        index.add_texts(&texts(&["a", "b"])).await.unwrap();
        assert!(index.add_texts(&texts(&["c", "bad"])).await.is_err());
        index.add_texts(&texts(&["c"])).await.unwrap();
        assert_eq!(index.size(), 3);
    }

    #[tokio::test]
    async fn test_k_larger_than_size_returns_everything() {
        let index = EmbeddingIndex::new(MockEmbedding::new(), DistanceMetric::L2Squared);
        index.add_texts(&texts(&["one", "two", "three"])).await.unwrap();
        assert_eq!(index.query("anything", 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_query_is_deterministic() {
        let index = EmbeddingIndex::new(MockEmbedding::new(), DistanceMetric::L2Squared);
        for i in 0..20 {
            index.add_texts(&[format!("document {}", i)]).await.unwrap();
        }
        let first = index.query("document", 5).await.unwrap();
        for _ in 0..5 {
            assert_eq!(index.query("document", 5).await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let index = EmbeddingIndex::new(MockEmbedding::new(), DistanceMetric::L2Squared);
        index.add_texts(&texts(&["something"])).await.unwrap();
        index.reset().unwrap();
        assert_eq!(index.size(), 0);
        index.reset().unwrap();
        assert_eq!(index.size(), 0);
        assert!(index.query("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generation_advances_on_reset() {
        let index = EmbeddingIndex::new(MockEmbedding::new(), DistanceMetric::L2Squared);
        let first = index.add_texts(&texts(&["a", "b"])).await.unwrap();
        assert_eq!(first.generation, 0);
        assert_eq!(first.positions, 0..2);

        index.reset().unwrap();
        let second = index.add_texts(&texts(&["c"])).await.unwrap();
        assert_eq!(second.generation, 1);
        assert_eq!(second.positions, 0..1);
        assert_ne!(
            (first.generation, first.positions.start),
            (second.generation, second.positions.start)
        );
    }

    // =========================================================================
    // Argument and dimension errors
    // =========================================================================

    #[tokio::test]
    async fn test_invalid_arguments() {
        let index = EmbeddingIndex::new(MockEmbedding::new(), DistanceMetric::L2Squared);
        assert!(matches!(
            index.add_texts(&[]).await,
            Err(IndexError::InvalidArgument(_))
        ));
        assert!(matches!(
            index.query("text", 0).await,
            Err(IndexError::InvalidArgument(_))
        ));
        assert!(matches!(
            index.query("   ", 3).await,
            Err(IndexError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_whitespace_query_rejected_on_populated_index() {
        let index = fruit_index();
        index.add_texts(&texts(&["apple"])).await.unwrap();
        assert!(matches!(
            index.query(" \t\n ", 1).await,
            Err(IndexError::InvalidArgument(_))
        ));
        // Surrounding whitespace is kept; only the blank check trims.
        assert!(index.query(" apple-like", 1).await.is_err());
        assert_eq!(index.query("apple-like", 1).await.unwrap()[0].text, "apple");
    }

    fn poison(index: &Arc<EmbeddingIndex>) {
        let shared = Arc::clone(index);
        let panicked = std::thread::spawn(move || {
            let _guard = shared.state.lock().unwrap();
            panic!("writer crashed while holding the index lock");
        })
        .join();
        assert!(panicked.is_err());
    }

    #[tokio::test]
    async fn test_poisoned_index_reports_errors() {
        let index = Arc::new(fruit_index());
        index.add_texts(&texts(&["apple"])).await.unwrap();
        poison(&index);

        assert!(matches!(
            index.query("apple-like", 1).await,
            Err(IndexError::LockPoisoned)
        ));
        assert!(matches!(index.stats(), Err(IndexError::LockPoisoned)));
        assert!(matches!(
            index.add_texts(&texts(&["banana"])).await,
            Err(IndexError::LockPoisoned)
        ));
        assert!(matches!(index.reset(), Err(IndexError::LockPoisoned)));
    }

    #[tokio::test]
    async fn test_poisoned_empty_index_is_not_reported_empty() {
        let index = Arc::new(fruit_index());
        poison(&index);
        assert!(matches!(
            index.query("apple", 1).await,
            Err(IndexError::LockPoisoned)
        ));
    }

    #[tokio::test]
    async fn test_stats() {
        let index = fruit_index();
        assert_eq!(
            index.stats().unwrap(),
            IndexStats {
                size: 0,
                dimension: None,
                generation: 0
            }
        );
        index.add_texts(&texts(&["apple", "banana"])).await.unwrap();
        index.reset().unwrap();
        index.add_texts(&texts(&["apple"])).await.unwrap();
        assert_eq!(
            index.stats().unwrap(),
            IndexStats {
                size: 1,
                dimension: Some(2),
                generation: 1
            }
        );
    }

    #[tokio::test]
    async fn test_dimension_mismatch_on_insert() {
        let embedder = StaticEmbedding::new()
            .with("two", vec![1.0, 0.0])
            .with("three", vec![1.0, 0.0, 0.0]);
        let index = EmbeddingIndex::new(embedder, DistanceMetric::L2Squared);
        index.add_texts(&texts(&["two"])).await.unwrap();

        let err = index.add_texts(&texts(&["three"])).await.unwrap_err();
        assert_eq!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(index.size(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_within_batch() {
        let embedder = StaticEmbedding::new()
            .with("two", vec![1.0, 0.0])
            .with("three", vec![1.0, 0.0, 0.0]);
        let index = EmbeddingIndex::new(embedder, DistanceMetric::L2Squared);
        let err = index.add_texts(&texts(&["two", "three"])).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(index.size(), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_on_query() {
        let embedder = StaticEmbedding::new()
            .with("stored", vec![1.0, 0.0])
            .with("odd", vec![1.0, 0.0, 0.0]);
        let index = EmbeddingIndex::new(embedder, DistanceMetric::L2Squared);
        index.add_texts(&texts(&["stored"])).await.unwrap();
        assert!(matches!(
            index.query("odd", 1).await,
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_length_vector_rejected() {
        let index = EmbeddingIndex::new(
            StaticEmbedding::new().with("void", vec![]),
            DistanceMetric::L2Squared,
        );
        assert!(matches!(
            index.add_texts(&texts(&["void"])).await,
            Err(IndexError::Embedding(_))
        ));
    }

    #[tokio::test]
    async fn test_query_embedding_failure() {
        let embedder = StaticEmbedding::new().with("stored", vec![1.0]).failing("boom");
        let index = EmbeddingIndex::new(embedder, DistanceMetric::L2Squared);
        index.add_texts(&texts(&["stored"])).await.unwrap();
        assert!(matches!(
            index.query("boom", 1).await,
            Err(IndexError::Embedding(_))
        ));
    }

    // =========================================================================
    // Metrics
    // =========================================================================

    #[test]
    fn test_l2_squared_distance() {
        let d = DistanceMetric::L2Squared.distance(&[0.9, 0.1], &[1.0, 0.0]);
        assert!((d - 0.02).abs() < 1e-6);
        assert_eq!(DistanceMetric::L2Squared.distance(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_cosine_distance() {
        let m = DistanceMetric::Cosine;
        assert!(m.distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-6);
        assert!((m.distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((m.distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(m.distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_metric_parse_and_display() {
        assert_eq!("l2_squared".parse::<DistanceMetric>().unwrap(), DistanceMetric::L2Squared);
        assert_eq!("L2".parse::<DistanceMetric>().unwrap(), DistanceMetric::L2Squared);
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert!("manhattan".parse::<DistanceMetric>().is_err());
        assert_eq!(DistanceMetric::Cosine.to_string(), "cosine");
    }

    #[tokio::test]
    async fn test_cosine_index_ranking() {
        let embedder = StaticEmbedding::new()
            .with("east", vec![1.0, 0.0])
            .with("north", vec![0.0, 1.0])
            .with("mostly east", vec![10.0, 1.0]);
        let index = EmbeddingIndex::new(embedder, DistanceMetric::Cosine);
        index.add_texts(&texts(&["north", "east"])).await.unwrap();
        let hits = index.query("mostly east", 2).await.unwrap();
        assert_eq!(hits[0].text, "east");
        assert_eq!(hits[1].text, "north");
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_and_readers() {
        let index = Arc::new(EmbeddingIndex::new(
            MockEmbedding::new(),
            DistanceMetric::L2Squared,
        ));

        let mut handles = Vec::new();
        for writer in 0..8 {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                for batch in 0..10 {
                    let texts = vec![
                        format!("w{} b{} x", writer, batch),
                        format!("w{} b{} y", writer, batch),
                    ];
                    index.add_texts(&texts).await.unwrap();
                }
            }));
        }
        for reader in 0..4 {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let hits = index.query(&format!("reader {}", reader), 5).await.unwrap();
                    assert!(hits.len() <= 5);
                    for pair in hits.windows(2) {
                        assert!(pair[0].distance <= pair[1].distance);
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(index.size(), 8 * 10 * 2);
        let snapshot = index.snapshot().unwrap();
        assert!(snapshot.records.iter().all(|r| r.vector.len() == 384));
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx").join("index.json");

        let index = fruit_index();
        index.add_texts(&texts(&["apple", "banana"])).await.unwrap();
        index.save(&path).unwrap();

        let restored = fruit_index();
        assert_eq!(restored.load(&path).unwrap(), 2);
        assert_eq!(restored.size(), 2);
        assert_eq!(restored.dimension(), Some(2));
        assert!(restored.generation() > index.generation());
        let hits = restored.query("apple-like", 1).await.unwrap();
        assert_eq!(hits[0].text, "apple");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_keep_newest_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        for round in 0..10 {
            let index = Arc::new(EmbeddingIndex::new(
                MockEmbedding::new(),
                DistanceMetric::L2Squared,
            ));
            let mut handles = Vec::new();
            for task in 0..16 {
                let index = Arc::clone(&index);
                let path = path.clone();
                handles.push(tokio::spawn(async move {
                    for n in 0..5 {
                        let text = format!("round {} task {} text {}", round, task, n);
                        index.add_texts(&[text]).await.unwrap();
                        let index = Arc::clone(&index);
                        let path = path.clone();
                        tokio::task::spawn_blocking(move || index.save(&path))
                            .await
                            .unwrap()
                            .unwrap();
                    }
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            let reloaded = EmbeddingIndex::new(MockEmbedding::new(), DistanceMetric::L2Squared);
            assert_eq!(reloaded.load(&path).unwrap(), 80, "round {}", round);
            assert_eq!(index.size(), 80);
        }

        // Only the snapshot itself is left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("index.json")]);
    }

    #[test]
    fn test_temp_path_is_unique_sibling() {
        let path = Path::new("/data/context_index.json");
        let a = temp_path(path);
        let b = temp_path(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        assert!(a.to_string_lossy().ends_with(".tmp"));
    }

    #[test]
    fn test_restore_rejects_inconsistent_snapshot() {
        let index = EmbeddingIndex::new(MockEmbedding::new(), DistanceMetric::L2Squared);
        let snapshot = IndexSnapshot {
            version: SNAPSHOT_VERSION,
            metric: DistanceMetric::L2Squared,
            dimension: Some(2),
            generation: 0,
            records: vec![
                IndexedText {
                    text: "ok".into(),
                    vector: vec![1.0, 0.0],
                },
                IndexedText {
                    text: "bad".into(),
                    vector: vec![1.0],
                },
            ],
        };
        assert!(matches!(
            index.restore(snapshot),
            Err(IndexError::Persistence(_))
        ));
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn test_restore_rejects_metric_mismatch() {
        let index = EmbeddingIndex::new(MockEmbedding::new(), DistanceMetric::Cosine);
        let snapshot = IndexSnapshot {
            version: SNAPSHOT_VERSION,
            metric: DistanceMetric::L2Squared,
            dimension: None,
            generation: 0,
            records: vec![],
        };
        assert!(index.restore(snapshot).is_err());
    }

    #[test]
    fn test_load_if_present_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let index = EmbeddingIndex::new(MockEmbedding::new(), DistanceMetric::L2Squared);

        assert_eq!(index.load_if_present(&path), 0);
        std::fs::write(&path, b"not json").unwrap();
        assert_eq!(index.load_if_present(&path), 0);
        assert!(index.is_empty());
    }
}
