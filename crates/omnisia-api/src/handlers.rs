//! Route handler functions for all API endpoints.
//!
//! Each handler extracts its JSON body or path parameters via axum
//! extractors, calls into the services on AppState, and returns JSON.

use std::path::{Path as FsPath, PathBuf};
use std::time::UNIX_EPOCH;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use omnisia_chat::{ChatResponse, ContextInfo};
use omnisia_core::types::{ExtractedText, SourceKind};
use omnisia_ocr::OcrInput;
use omnisia_train::{JobStatus, TrainingJob, TrainingRequest};
use omnisia_vector::IngestResult;
use omnisia_whisper::{media_kind, validate_model_size, MODEL_SIZES};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::upload::{check_extension, is_plain_text, sanitize_file_name, upload_dir, validate_file};

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct AddContextRequest {
    pub texts: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct OcrRequest {
    /// Local path of the image, PDF, or text file.
    pub path: PathBuf,
    #[serde(default)]
    pub add_to_context: bool,
}

#[derive(Debug, Deserialize)]
pub struct TranscribeRequest {
    /// Local path of the audio or video file.
    pub path: PathBuf,
    /// Whisper model size; the configured default when absent.
    pub model_size: Option<String>,
    #[serde(default)]
    pub add_to_context: bool,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub context_size: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub embedding_model: String,
    pub embedding_backend: String,
    pub metric: String,
    pub ocr_backend: String,
    pub transcription_backend: String,
    pub supported_models: Vec<String>,
    pub model_sizes: Vec<String>,
    pub allowed_extensions: Vec<String>,
    pub max_file_bytes: u64,
}

/// Text pulled out of a file, plus the indexing outcome when requested.
#[derive(Debug, Serialize, Deserialize)]
pub struct PreprocessResponse {
    pub text: String,
    pub chars: usize,
    pub ingest: Option<IngestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A file stored by `POST /upload`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    /// Server-side path, usable as `path` in the preprocess requests.
    pub path: PathBuf,
    pub size: u64,
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileEntry {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub modified: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileList {
    pub files: Vec<FileEntry>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileDeleted {
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainingStarted {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainingList {
    pub jobs: Vec<TrainingJob>,
}

// =============================================================================
// Public handlers
// =============================================================================

/// GET /health
///
/// Reports "degraded" when the context index can no longer be read.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, context_size) = match state.chat.index().stats() {
        Ok(stats) => ("healthy", stats.size),
        Err(e) => {
            warn!(error = %e, "Context index unreadable");
            ("degraded", 0)
        }
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        context_size,
    })
}

/// GET /info - configured backends and accepted inputs.
pub async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    let config = &state.config;
    Json(InfoResponse {
        embedding_model: config.embedding.model_name.clone(),
        embedding_backend: config.embedding.backend.clone(),
        metric: state.chat.index().metric().to_string(),
        ocr_backend: state.ocr.name().to_string(),
        transcription_backend: state.transcriber.name().to_string(),
        supported_models: state.training.supported_models().to_vec(),
        model_sizes: MODEL_SIZES.iter().map(|s| s.to_string()).collect(),
        allowed_extensions: config.upload.allowed_extensions.clone(),
        max_file_bytes: config.upload.max_file_bytes,
    })
}

// =============================================================================
// Chat
// =============================================================================

/// POST /chat
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    Ok(Json(state.chat.chat(&req.text).await?))
}

/// POST /chat/add-context
pub async fn add_context(
    State(state): State<AppState>,
    Json(req): Json<AddContextRequest>,
) -> Result<Json<ContextInfo>, ApiError> {
    Ok(Json(state.chat.add_context(&req.texts).await?))
}

/// GET /chat/context-info
pub async fn context_info(State(state): State<AppState>) -> Result<Json<ContextInfo>, ApiError> {
    Ok(Json(state.chat.context_info()?))
}

/// POST /chat/clear-context
pub async fn clear_context(State(state): State<AppState>) -> Result<Json<ContextInfo>, ApiError> {
    let info = state.chat.clear_context().await?;
    info!("Context cleared");
    Ok(Json(info))
}

// =============================================================================
// Preprocessing
// =============================================================================

/// POST /preprocess/ocr
///
/// Plain-text files are read as-is; images and PDFs go through OCR.
pub async fn preprocess_ocr(
    State(state): State<AppState>,
    Json(req): Json<OcrRequest>,
) -> Result<Json<PreprocessResponse>, ApiError> {
    validate_file(&req.path, &state.config.upload)?;

    let text = if is_plain_text(&req.path) {
        tokio::fs::read_to_string(&req.path)
            .await
            .map_err(|e| ApiError::UnprocessableEntity(format!("unreadable text file: {}", e)))?
    } else {
        OcrInput::from_path(&req.path).map_err(|e| ApiError::UnprocessableEntity(e.to_string()))?;
        state.ocr.extract_text(&req.path).await?
    };

    let source = SourceKind::from_path(&req.path).unwrap_or(SourceKind::Document);
    let ingest = maybe_ingest(&state, source, &req.path, &text, req.add_to_context).await?;
    info!(path = %req.path.display(), chars = text.chars().count(), "OCR preprocessing done");

    Ok(Json(PreprocessResponse {
        chars: text.chars().count(),
        text,
        ingest,
        model: None,
        language: None,
    }))
}

/// POST /preprocess/transcribe
pub async fn preprocess_transcribe(
    State(state): State<AppState>,
    Json(req): Json<TranscribeRequest>,
) -> Result<Json<PreprocessResponse>, ApiError> {
    if let Some(size) = &req.model_size {
        validate_model_size(size).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }
    validate_file(&req.path, &state.config.upload)?;
    let source = media_kind(&req.path).map_err(|e| ApiError::UnprocessableEntity(e.to_string()))?;

    let result = state
        .transcriber
        .transcribe(&req.path, req.model_size.as_deref())
        .await?;

    let ingest = maybe_ingest(&state, source, &req.path, &result.text, req.add_to_context).await?;
    info!(
        path = %req.path.display(),
        model = %result.model,
        chars = result.text.chars().count(),
        "Transcription done"
    );

    Ok(Json(PreprocessResponse {
        chars: result.text.chars().count(),
        text: result.text,
        ingest,
        model: Some(result.model),
        language: result.language,
    }))
}

async fn maybe_ingest(
    state: &AppState,
    source: SourceKind,
    path: &FsPath,
    text: &str,
    add_to_context: bool,
) -> Result<Option<IngestResult>, ApiError> {
    if !add_to_context {
        return Ok(None);
    }
    let extracted = ExtractedText::new(source, path.display().to_string(), text);
    Ok(Some(state.chat.ingest(&extracted).await?))
}

// =============================================================================
// Uploads
// =============================================================================

/// POST /upload - store the multipart `file` field under `<data_dir>/uploads`.
///
/// The client's file name is reduced to its last component and must carry an
/// allowed extension. The body is streamed to a partial file and renamed into
/// place once complete, replacing any earlier upload of the same name.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadedFile>), ApiError> {
    let limits = &state.config.upload;
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let raw_name = field
            .file_name()
            .ok_or_else(|| ApiError::BadRequest("file field has no file name".to_string()))?;
        let filename = sanitize_file_name(raw_name)?;
        check_extension(FsPath::new(&filename), limits)?;
        let content_type = field.content_type().map(str::to_string);

        let dir = upload_dir(&state.config.data_dir());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ApiError::Internal(format!("create {}: {}", dir.display(), e)))?;
        let dest = dir.join(&filename);
        let partial = dir.join(format!(".{}.{}.part", filename, Uuid::new_v4().simple()));

        let size = match write_field(&mut field, &partial, limits.max_file_bytes).await {
            Ok(size) => size,
            Err(e) => {
                discard_partial(&partial).await;
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&partial, &dest).await {
            discard_partial(&partial).await;
            return Err(ApiError::Internal(format!("store {}: {}", dest.display(), e)));
        }

        info!(filename = %filename, size, "File uploaded");
        return Ok((
            StatusCode::CREATED,
            Json(UploadedFile {
                filename,
                path: dest,
                size,
                content_type,
            }),
        ));
    }
    Err(ApiError::BadRequest("multipart body has no 'file' field".to_string()))
}

async fn write_field(
    field: &mut Field<'_>,
    dest: &FsPath,
    max_bytes: u64,
) -> Result<u64, ApiError> {
    let write_error =
        |e: std::io::Error| ApiError::Internal(format!("write {}: {}", dest.display(), e));
    let mut file = tokio::fs::File::create(dest).await.map_err(write_error)?;
    let mut size: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        size += chunk.len() as u64;
        if size > max_bytes {
            return Err(ApiError::UnprocessableEntity(format!(
                "file too large: more than {} bytes",
                max_bytes
            )));
        }
        file.write_all(&chunk).await.map_err(write_error)?;
    }
    file.flush().await.map_err(write_error)?;
    Ok(size)
}

async fn discard_partial(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::UnprocessableEntity(format!("upload too large: {}", e.body_text()))
    } else {
        ApiError::BadRequest(format!("invalid multipart body: {}", e.body_text()))
    }
}

/// GET /files - uploaded files, sorted by name.
pub async fn list_files(State(state): State<AppState>) -> Result<Json<FileList>, ApiError> {
    let dir = upload_dir(&state.config.data_dir());
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Json(FileList {
                files: Vec::new(),
                total: 0,
            }));
        }
        Err(e) => return Err(ApiError::Internal(format!("read {}: {}", dir.display(), e))),
    };

    let read_error =
        |e: std::io::Error| ApiError::Internal(format!("read {}: {}", dir.display(), e));
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        let filename = entry.file_name().to_string_lossy().into_owned();
        if filename.starts_with('.') {
            continue;
        }
        let metadata = entry.metadata().await.map_err(read_error)?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        files.push(FileEntry {
            path: entry.path(),
            filename,
            size: metadata.len(),
            modified,
        });
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));

    Ok(Json(FileList {
        total: files.len(),
        files,
    }))
}

/// DELETE /files/{filename}
pub async fn delete_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<FileDeleted>, ApiError> {
    if sanitize_file_name(&filename)? != filename {
        return Err(ApiError::BadRequest(format!("invalid file name: {:?}", filename)));
    }
    let path = upload_dir(&state.config.data_dir()).join(&filename);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            info!(filename = %filename, "Uploaded file deleted");
            Ok(Json(FileDeleted { filename }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound(format!("no uploaded file named {}", filename)))
        }
        Err(e) => Err(ApiError::Internal(format!("delete {}: {}", path.display(), e))),
    }
}

// =============================================================================
// Training
// =============================================================================

/// POST /training/start - queue a LoRA fine-tuning job.
pub async fn training_start(
    State(state): State<AppState>,
    Json(req): Json<TrainingRequest>,
) -> Result<(StatusCode, Json<TrainingStarted>), ApiError> {
    let job = state.training.start(req)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TrainingStarted {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /training
pub async fn list_training(State(state): State<AppState>) -> Result<Json<TrainingList>, ApiError> {
    Ok(Json(TrainingList {
        jobs: state.training.list()?,
    }))
}

/// GET /training/{id}
pub async fn get_training(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrainingJob>, ApiError> {
    Ok(Json(state.training.get(id)?))
}
