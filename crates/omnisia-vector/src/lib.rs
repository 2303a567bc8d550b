//! Omnisia Vector crate - embedding services, the context embedding index,
//! and the ingestion pipeline that feeds it.
//!
//! The index keeps (text, vector) records in insertion order and answers
//! exact k-nearest-neighbour queries. Embedding backends are pluggable via
//! the [`EmbeddingService`] trait, with an ONNX Runtime implementation for
//! production and deterministic stubs for tests.

pub mod embedding;
pub mod error;
pub mod index;
pub mod pipeline;

pub use embedding::{
    DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService, StaticEmbedding,
};
pub use error::IndexError;
pub use index::{
    DistanceMetric, EmbeddingIndex, IndexSnapshot, IndexStats, IndexedText, Inserted, QueryMatch,
};
pub use pipeline::{chunk_text, IngestPipeline, IngestResult};
