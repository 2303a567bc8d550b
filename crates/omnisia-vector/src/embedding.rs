//! Text-to-vector backends used by the context index.
//!
//! - `OnnxEmbeddingService` runs a sentence-transformer export (for example
//!   all-MiniLM-L6-v2) through ONNX Runtime, tokenised with `tokenizers`.
//! - `MockEmbedding` hashes text into stable 384-d unit vectors.
//! - `StaticEmbedding` maps hand-chosen texts to hand-chosen vectors, with
//!   optional failure injection, for exact ranking tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use omnisia_core::error::OmnisiaError;
use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::Tokenizer;
use tracing::info;

/// Boxed future returned by [`DynEmbeddingService`].
pub type BoxEmbedFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, OmnisiaError>> + Send + 'a>>;

/// Turns text into fixed-length vectors.
///
/// Implementations must be deterministic for identical input and model, and
/// must return exactly one vector per input, in input order.
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, OmnisiaError>> + Send;

    /// Embed a batch of texts, preserving order.
    ///
    /// Fails on the first error without returning partial results.
    /// Implementations may override this for batched inference.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, OmnisiaError>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    /// Length of every vector this service returns.
    fn dimensions(&self) -> usize;
}

/// Boxed-future twin of [`EmbeddingService`], usable as `dyn`.
///
/// Every `EmbeddingService` gets it through the blanket impl below.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxEmbedFuture<'a, Vec<f32>>;

    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxEmbedFuture<'a, Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxEmbedFuture<'a, Vec<f32>> {
        Box::pin(self.embed(text))
    }

    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxEmbedFuture<'a, Vec<Vec<f32>>> {
        Box::pin(self.embed_batch(texts))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// ONNX Runtime backend
// ---------------------------------------------------------------------------

/// Sentence-transformer inference on ONNX Runtime.
///
/// The model directory holds:
/// - `model.onnx`: the sentence-transformer ONNX export
/// - `tokenizer.json`: the HuggingFace fast-tokenizer file
///
/// Mean pooling (masked) is applied to produce a single L2-normalized vector
/// per input.
#[derive(Clone)]
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
}

// Session access is serialised through the Mutex.
unsafe impl Send for OnnxEmbeddingService {}
unsafe impl Sync for OnnxEmbeddingService {}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OnnxEmbeddingService {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn from_directory(model_dir: &Path) -> Result<Self, OmnisiaError> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
        )
    }

    pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self, OmnisiaError> {
        if !model_path.exists() {
            return Err(OmnisiaError::Embedding(format!(
                "embedding model missing: {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(OmnisiaError::Embedding(format!(
                "tokenizer missing: {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| OmnisiaError::Embedding(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| OmnisiaError::Embedding(format!("ONNX set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| OmnisiaError::Embedding(format!("ONNX load model: {}", e)))?;

        // Output 0 is [batch, tokens, hidden]; fall back to MiniLM's width.
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .map(|d| if d > 0 { d as usize } else { 384 })
            .unwrap_or(384);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| OmnisiaError::Embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(path = %model_path.display(), dimensions, "Embedding model ready");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
        })
    }

    /// Masked mean pooling over the token embeddings, then L2 normalisation.
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, OmnisiaError> {
        if text.is_empty() {
            return Err(OmnisiaError::Embedding("Cannot embed empty text".to_string()));
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| OmnisiaError::Embedding(format!("Tokenization failed: {}", e)))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();

        let seq_len = input_ids.len();
        let to_array = |name: &str, values: Vec<i64>| {
            ndarray::Array2::from_shape_vec((1, seq_len), values)
                .map_err(|e| OmnisiaError::Embedding(format!("{} array: {}", name, e)))
        };
        let ids_array = to_array("input_ids", input_ids)?;
        let mask_array = to_array("attention_mask", attention_mask.clone())?;
        let type_array = to_array("token_type_ids", token_type_ids)?;

        let ids_ref = TensorRef::from_array_view(&ids_array)
            .map_err(|e| OmnisiaError::Embedding(format!("TensorRef input_ids: {}", e)))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| OmnisiaError::Embedding(format!("TensorRef attention_mask: {}", e)))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(|e| OmnisiaError::Embedding(format!("TensorRef token_type_ids: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| OmnisiaError::Embedding(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| OmnisiaError::Embedding(format!("ONNX inference failed: {}", e)))?;

        // Token embeddings as a flat slice: [1, seq_len, hidden_dim].
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OmnisiaError::Embedding(format!("Extract embeddings: {}", e)))?;

        let shape_dims: Vec<i64> = shape.iter().copied().collect();
        let hidden_dim = match shape_dims.as_slice() {
            [.., _, last] if *last > 0 => *last as usize,
            _ => {
                return Err(OmnisiaError::Embedding(format!(
                    "Unexpected output shape: {:?}",
                    shape_dims
                )))
            }
        };

        let mut pooled = vec![0.0f32; hidden_dim];
        let mut count = 0.0f32;

        for (token, _) in attention_mask.iter().enumerate().filter(|(_, &m)| m > 0) {
            let row = &data[token * hidden_dim..(token + 1) * hidden_dim];
            for (slot, value) in pooled.iter_mut().zip(row) {
                *slot += value;
            }
            count += 1.0;
        }

        if count > 0.0 {
            for val in &mut pooled {
                *val /= count;
            }
        }

        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OmnisiaError> {
        let service = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || service.embed_sync(&text))
            .await
            .map_err(|e| OmnisiaError::Embedding(format!("Embedding task panicked: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn l2_normalize(values: &mut [f32]) {
    let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in values {
            *val /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// Test backends
// ---------------------------------------------------------------------------

/// Stable pseudo-embeddings: each component hashes `(text, index)`.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding;

impl MockEmbedding {
    pub const DIMENSIONS: usize = 384;

    pub fn new() -> Self {
        Self
    }

    fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut vector: Vec<f32> = (0..Self::DIMENSIONS)
            .map(|component| {
                let mut hasher = DefaultHasher::new();
                (text, component).hash(&mut hasher);
                (hasher.finish() as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();
        // Unit length, like the ONNX backend.
        l2_normalize(&mut vector);
        vector
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OmnisiaError> {
        if text.is_empty() {
            return Err(OmnisiaError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(Self::hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        Self::DIMENSIONS
    }
}

/// Embedding service backed by a fixed text -> vector table.
///
/// Unknown texts and texts registered with [`StaticEmbedding::failing`]
/// produce an error.
#[derive(Debug, Clone, Default)]
pub struct StaticEmbedding {
    vectors: HashMap<String, Vec<f32>>,
    failing: HashSet<String>,
}

impl StaticEmbedding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `text` to `vector`.
    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Make embedding `text` fail.
    pub fn failing(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }
}

impl EmbeddingService for StaticEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OmnisiaError> {
        if self.failing.contains(text) {
            return Err(OmnisiaError::Embedding(format!(
                "embedding model rejected input: {}",
                text
            )));
        }
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| OmnisiaError::Embedding(format!("no vector registered for: {}", text)))
    }

    fn dimensions(&self) -> usize {
        self.vectors.values().next().map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_is_stable_and_distinct() {
        let mock = MockEmbedding::new();
        let a = mock.embed("quarterly report").await.unwrap();
        assert_eq!(a.len(), MockEmbedding::DIMENSIONS);
        assert_eq!(EmbeddingService::dimensions(&mock), MockEmbedding::DIMENSIONS);
        assert_eq!(a, mock.embed("quarterly report").await.unwrap());
        assert_ne!(a, mock.embed("annual report").await.unwrap());
    }

    #[tokio::test]
    async fn test_mock_embedding_is_unit_length() {
        let service = MockEmbedding::new();
        let vec = service.embed("normalize me").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_mock_rejects_empty_text() {
        assert!(MockEmbedding::new().embed("").await.is_err());
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let service = MockEmbedding::new();
        let texts = vec!["first".to_string(), "second".to_string(), "third".to_string()];
        let batch = service.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(&service.embed(text).await.unwrap(), vector);
        }
    }

    #[tokio::test]
    async fn test_embed_batch_fails_without_partial_results() {
        let service = StaticEmbedding::new()
            .with("a", vec![1.0, 0.0])
            .with("b", vec![0.0, 1.0])
            .failing("c");
        let texts = vec!["a".to_string(), "c".to_string(), "b".to_string()];
        let err = service.embed_batch(&texts).await.unwrap_err();
        assert!(matches!(err, OmnisiaError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_static_embedding_lookup() {
        let service = StaticEmbedding::new().with("apple", vec![1.0, 0.0]);
        assert_eq!(service.embed("apple").await.unwrap(), vec![1.0, 0.0]);
        assert!(service.embed("pear").await.is_err());
        assert_eq!(EmbeddingService::dimensions(&service), 2);
    }

    #[tokio::test]
    async fn test_dyn_dispatch() {
        let service: Arc<dyn DynEmbeddingService> = Arc::new(MockEmbedding::new());
        let vec = service.embed_boxed("dynamic").await.unwrap();
        assert_eq!(vec.len(), service.dimensions());
        let batch = service
            .embed_batch_boxed(&["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_onnx_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxEmbeddingService::from_directory(dir.path()).unwrap_err();
        assert!(matches!(err, OmnisiaError::Embedding(ref m) if m.contains("model.onnx")));
    }
}
