//! Chat orchestrator: owns the context scope and answers messages from it.

use std::path::PathBuf;
use std::sync::Arc;

use omnisia_core::config::ChatConfig;
use omnisia_core::types::ExtractedText;
use omnisia_vector::{EmbeddingIndex, IngestPipeline, IngestResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::confidence::ConfidenceScorer;
use crate::error::ChatError;
use crate::response::{ChatResponse, ResponseBuilder};

/// Summary of the context index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub total_texts: usize,
    /// True once a batch has fixed the index dimension.
    pub index_initialized: bool,
    pub dimension: Option<usize>,
    pub generation: u64,
}

/// Coordinates context management and retrieval-backed answers for one
/// context scope.
pub struct ChatOrchestrator {
    index: Arc<EmbeddingIndex>,
    pipeline: IngestPipeline,
    builder: ResponseBuilder,
    config: ChatConfig,
    snapshot_path: Option<PathBuf>,
}

impl ChatOrchestrator {
    pub fn new(index: Arc<EmbeddingIndex>, config: ChatConfig) -> Self {
        let builder = ResponseBuilder::new(ConfidenceScorer::from_config(&config), config.preview_chars);
        Self {
            pipeline: IngestPipeline::new(Arc::clone(&index), 0),
            index,
            builder,
            config,
            snapshot_path: None,
        }
    }

    /// Save the index to `path` after every context change.
    pub fn with_snapshot_path(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    /// Split ingested documents into chunks of at most `chunk_chars`
    /// characters. 0 keeps each document whole.
    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.pipeline = IngestPipeline::new(Arc::clone(&self.index), chunk_chars);
        self
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Add a batch of context texts.
    ///
    /// Texts are trimmed and blank entries dropped. The remaining batch is
    /// committed atomically.
    pub async fn add_context(&self, texts: &[String]) -> Result<ContextInfo, ChatError> {
        let cleaned: Vec<String> = texts
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        if cleaned.is_empty() {
            return Err(ChatError::EmptyContext);
        }
        let max = self.config.max_context_chars;
        if cleaned.iter().any(|t| t.chars().count() > max) {
            return Err(ChatError::ContextTooLong(max));
        }

        let inserted = self.index.add_texts(&cleaned).await?;
        info!(
            added = cleaned.len(),
            generation = inserted.generation,
            "Context added"
        );
        self.autosave().await;
        self.context_info()
    }

    /// Index text extracted from a file (OCR, transcription, plain text).
    pub async fn ingest(&self, extracted: &ExtractedText) -> Result<IngestResult, ChatError> {
        let result = self.pipeline.ingest(extracted).await?;
        if matches!(result, IngestResult::Stored { .. }) {
            self.autosave().await;
        }
        Ok(result)
    }

    pub fn context_info(&self) -> Result<ContextInfo, ChatError> {
        let stats = self.index.stats()?;
        Ok(ContextInfo {
            total_texts: stats.size,
            index_initialized: stats.dimension.is_some(),
            dimension: stats.dimension,
            generation: stats.generation,
        })
    }

    /// Drop all context.
    pub async fn clear_context(&self) -> Result<ContextInfo, ChatError> {
        self.index.reset()?;
        self.autosave().await;
        self.context_info()
    }

    /// Answer a message from the closest context texts.
    ///
    /// A failed lookup does not fail the request; the response reports the
    /// retrieval as unavailable instead.
    pub async fn chat(&self, message: &str) -> Result<ChatResponse, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let max = self.config.max_message_chars;
        if message.chars().count() > max {
            return Err(ChatError::MessageTooLong(max));
        }

        let k = self.config.top_k.max(1);
        let response = match self.index.query(message, k).await {
            Ok(matches) => {
                debug!(matches = matches.len(), "Context retrieved for chat");
                self.builder.from_matches(&matches)
            }
            Err(e) => {
                warn!(error = %e, "Context retrieval failed");
                self.builder.unavailable(e.to_string())
            }
        };
        Ok(response)
    }

    /// Write the snapshot on the blocking pool. Failures are logged only.
    async fn autosave(&self) {
        let Some(path) = self.snapshot_path.clone() else {
            return;
        };
        let index = Arc::clone(&self.index);
        let target = path.clone();
        match tokio::task::spawn_blocking(move || index.save(&target)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Failed to save context snapshot")
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Snapshot task failed"),
        }
    }
}
