//! Application state shared across all route handlers.
//!
//! AppState holds references to all services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use omnisia_chat::ChatOrchestrator;
use omnisia_core::config::OmnisiaConfig;
use omnisia_ocr::OcrService;
use omnisia_train::TrainingManager;
use omnisia_vector::EmbeddingIndex;
use omnisia_whisper::TranscriptionService;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (read-only while serving).
    pub config: Arc<OmnisiaConfig>,
    /// Chat orchestrator owning the context index and its ingestion.
    pub chat: Arc<ChatOrchestrator>,
    pub ocr: Arc<dyn OcrService>,
    pub transcriber: Arc<dyn TranscriptionService>,
    pub training: TrainingManager,
    /// Bearer token required on protected routes.
    pub api_token: String,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services around one shared context index.
    ///
    /// When the index config names a snapshot file and autosave is on, every
    /// context change is saved to `<data_dir>/<snapshot_file>`.
    pub fn new(
        config: OmnisiaConfig,
        index: Arc<EmbeddingIndex>,
        ocr: Arc<dyn OcrService>,
        transcriber: Arc<dyn TranscriptionService>,
        training: TrainingManager,
    ) -> Self {
        let mut chat = ChatOrchestrator::new(index, config.chat.clone())
            .with_chunk_chars(config.ingest.chunk_chars);
        if config.index.autosave && !config.index.snapshot_file.is_empty() {
            chat = chat.with_snapshot_path(config.data_dir().join(&config.index.snapshot_file));
        }

        Self {
            config: Arc::new(config),
            chat: Arc::new(chat),
            ocr,
            transcriber,
            training,
            api_token: String::new(),
            start_time: Instant::now(),
        }
    }

    pub fn with_api_token(mut self, token: String) -> Self {
        self.api_token = token;
        self
    }
}
