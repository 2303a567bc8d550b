//! Omnisia application binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Build the embedding backend and the shared context index
//! 3. Restore the index snapshot from the data directory
//! 4. Wire OCR, transcription and training services into the API state
//! 5. Serve the REST API until Ctrl-C

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use omnisia_api::auth::{load_or_generate_token, TOKEN_FILE_NAME};
use omnisia_api::{start_server, AppState};
use omnisia_core::config::{expand_home, EmbeddingConfig, OmnisiaConfig};
use omnisia_core::error::OmnisiaError;
use omnisia_ocr::TesseractOcrService;
use omnisia_train::{CommandTrainingRunner, TrainingManager};
use omnisia_vector::{
    DistanceMetric, DynEmbeddingService, EmbeddingIndex, MockEmbedding, OnnxEmbeddingService,
};
use omnisia_whisper::WhisperCliService;

use crate::cli::CliArgs;

/// Resolve `path` against the data directory unless it is absolute.
fn under_data_dir(data_dir: &Path, path: &str) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        expanded
    } else {
        data_dir.join(expanded)
    }
}

fn build_embedder(
    config: &EmbeddingConfig,
    data_dir: &Path,
) -> Result<Arc<dyn DynEmbeddingService>, OmnisiaError> {
    match config.backend.as_str() {
        "onnx" => {
            let model_dir = under_data_dir(data_dir, &config.model_dir);
            let service = OnnxEmbeddingService::from_directory(&model_dir).map_err(|e| {
                OmnisiaError::Embedding(format!(
                    "{} (download the model into {} or set embedding.backend = \"mock\")",
                    e,
                    model_dir.display()
                ))
            })?;
            tracing::info!(model = %config.model_name, dir = %model_dir.display(), "ONNX embedding model loaded");
            Ok(Arc::new(service))
        }
        "mock" => {
            tracing::warn!("Using mock embeddings; retrieval results are not semantic");
            Ok(Arc::new(MockEmbedding::new()))
        }
        other => Err(OmnisiaError::Config(format!(
            "unknown embedding backend '{}' (expected \"onnx\" or \"mock\")",
            other
        ))),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = OmnisiaConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    config.server.port = args.resolve_port(config.server.port);

    // Tracing: RUST_LOG wins over flags and config.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting Omnisia v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    let data_dir = config.data_dir();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    // Context index, restored from the last snapshot.
    let metric: DistanceMetric = config.index.metric.parse()?;
    let embedder = build_embedder(&config.embedding, &data_dir)?;
    let index = Arc::new(EmbeddingIndex::new_dyn(embedder, metric));
    if !config.index.snapshot_file.is_empty() {
        let snapshot = data_dir.join(&config.index.snapshot_file);
        let restored = index.load_if_present(&snapshot);
        tracing::info!(%metric, records = restored, "Context index ready");
    }

    // Extraction and training backends.
    let ocr = Arc::new(TesseractOcrService::new(&config.ocr));
    let transcriber = Arc::new(WhisperCliService::new(&config.transcription)?);
    let runner = CommandTrainingRunner::new(config.training.trainer_command.clone())
        .map_err(OmnisiaError::from)?;
    let training = TrainingManager::new(
        Arc::new(runner),
        config.training.clone(),
        under_data_dir(&data_dir, &config.training.output_dir),
    );

    let token = load_or_generate_token(&data_dir.join(TOKEN_FILE_NAME));

    let state = AppState::new(config, index, ocr, transcriber, training).with_api_token(token);

    start_server(state, shutdown_signal()).await?;
    Ok(())
}
