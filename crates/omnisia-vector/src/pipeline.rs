//! Ingestion pipeline: extracted text in, indexed chunks out.
//!
//! OCR, transcription and manual submissions all produce an
//! [`ExtractedText`]. The pipeline optionally splits it into chunks on
//! whitespace boundaries and commits the chunks to the index as one batch.

use std::sync::Arc;

use omnisia_core::types::ExtractedText;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::IndexError;
use crate::index::EmbeddingIndex;

/// Outcome of ingesting a single extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestResult {
    /// Nothing was indexed.
    Skipped { id: Uuid, reason: String },
    /// All chunks were committed.
    Stored {
        id: Uuid,
        chunks: usize,
        first_position: usize,
        generation: u64,
    },
}

/// Pushes extracted text into a shared [`EmbeddingIndex`].
#[derive(Debug, Clone)]
pub struct IngestPipeline {
    index: Arc<EmbeddingIndex>,
    chunk_chars: usize,
}

impl IngestPipeline {
    /// `chunk_chars == 0` stores each text as a single record.
    pub fn new(index: Arc<EmbeddingIndex>, chunk_chars: usize) -> Self {
        Self { index, chunk_chars }
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    pub async fn ingest(&self, extracted: &ExtractedText) -> Result<IngestResult, IndexError> {
        let text = extracted.text.trim();
        if text.is_empty() {
            debug!(id = %extracted.id, origin = %extracted.origin, "Skipping empty extraction");
            return Ok(IngestResult::Skipped {
                id: extracted.id,
                reason: "no text extracted".to_string(),
            });
        }

        let chunks = chunk_text(text, self.chunk_chars);
        let inserted = self.index.add_texts(&chunks).await?;

        info!(
            id = %extracted.id,
            source = ?extracted.source,
            origin = %extracted.origin,
            chunks = chunks.len(),
            generation = inserted.generation,
            "Extracted text ingested"
        );

        Ok(IngestResult::Stored {
            id: extracted.id,
            chunks: chunks.len(),
            first_position: inserted.positions.start,
            generation: inserted.generation,
        })
    }
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Breaks fall on whitespace; a single word longer than `max_chars` is split
/// by character. Interior whitespace runs collapse to one space. `max_chars`
/// of 0 returns the trimmed text as one chunk.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if max_chars == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() { word_len } else { current_len + 1 + word_len };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
