//! Retrieval-augmented chat over the context index.
//!
//! Context texts go into a shared [`omnisia_vector::EmbeddingIndex`]; chat
//! messages retrieve the nearest texts and compose an extractive answer with
//! a confidence score and source previews. No language model is involved.

pub mod confidence;
pub mod error;
pub mod orchestrator;
pub mod response;

pub use confidence::{ConfidenceLevel, ConfidenceScorer};
pub use error::ChatError;
pub use orchestrator::{ChatOrchestrator, ContextInfo};
pub use response::{ChatResponse, ResponseBuilder, Retrieval, SourceRef};
