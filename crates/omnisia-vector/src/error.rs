//! Error types for the embedding index.

use omnisia_core::error::OmnisiaError;

/// Errors returned by [`crate::EmbeddingIndex`] operations.
///
/// Every failing operation leaves the index exactly as it was.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    /// The embedding service failed for one or more inputs.
    #[error("embedding computation failed: {0}")]
    Embedding(String),
    /// A vector does not match the dimension established by the index.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// Empty batch, `k == 0`, or an empty query string.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Snapshot could not be written, read, or validated.
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("index lock poisoned")]
    LockPoisoned,
}

impl From<IndexError> for OmnisiaError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Embedding(msg) => OmnisiaError::Embedding(msg),
            other => OmnisiaError::Index(other.to_string()),
        }
    }
}
