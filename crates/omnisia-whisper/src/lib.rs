//! Omnisia Whisper crate - speech-to-text for audio and video files.
//!
//! Provides a trait-based abstraction over transcription backends, the
//! [`WhisperCliService`] that drives the `whisper` command-line tool, and a
//! mock implementation for tests.

pub mod whisper_cli;

use std::path::Path;

use async_trait::async_trait;
use omnisia_core::error::OmnisiaError;
use omnisia_core::types::SourceKind;
use serde::{Deserialize, Serialize};

pub use whisper_cli::WhisperCliService;

/// Model sizes accepted by the Whisper tool.
pub const MODEL_SIZES: [&str; 5] = ["tiny", "base", "small", "medium", "large"];

/// Reject model sizes Whisper does not ship.
pub fn validate_model_size(size: &str) -> Result<(), OmnisiaError> {
    if MODEL_SIZES.contains(&size) {
        Ok(())
    } else {
        Err(OmnisiaError::Transcription(format!(
            "unknown model size '{}'. Must be one of: {}",
            size,
            MODEL_SIZES.join(", ")
        )))
    }
}

/// Ensure `path` is an audio or video file.
pub fn media_kind(path: &Path) -> Result<SourceKind, OmnisiaError> {
    match SourceKind::from_path(path) {
        Some(kind @ (SourceKind::Audio | SourceKind::Video)) => Ok(kind),
        _ => Err(OmnisiaError::Transcription(format!(
            "unsupported file type for transcription: {}",
            path.display()
        ))),
    }
}

// =============================================================================
// Result types
// =============================================================================

/// The complete result of a transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Full transcribed text.
    pub text: String,
    /// Language requested, if any. `None` means Whisper auto-detected it.
    pub language: Option<String>,
    /// Model size used.
    pub model: String,
}

// =============================================================================
// Trait
// =============================================================================

/// Service for transcribing audio or video files to text.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe the file at `path`.
    ///
    /// `model_size` overrides the configured default when given.
    async fn transcribe(
        &self,
        path: &Path,
        model_size: Option<&str>,
    ) -> Result<TranscriptionResult, OmnisiaError>;

    /// Backend name reported by `/info`.
    fn name(&self) -> &str;
}

// =============================================================================
// Mock implementation
// =============================================================================

/// Mock transcription service that returns a fixed transcript.
#[derive(Debug, Clone)]
pub struct MockTranscriptionService {
    text: String,
}

impl MockTranscriptionService {
    pub fn new() -> Self {
        Self::with_text("Mock transcription of the audio")
    }

    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl Default for MockTranscriptionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptionService for MockTranscriptionService {
    async fn transcribe(
        &self,
        path: &Path,
        model_size: Option<&str>,
    ) -> Result<TranscriptionResult, OmnisiaError> {
        media_kind(path)?;
        let model = model_size.unwrap_or("base");
        validate_model_size(model)?;
        Ok(TranscriptionResult {
            text: self.text.clone(),
            language: None,
            model: model.to_string(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
