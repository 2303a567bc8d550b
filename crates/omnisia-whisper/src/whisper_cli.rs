//! Whisper transcription via the `whisper` command-line tool.
//!
//! Runs `whisper <file> --model <size> --output_format txt --output_dir <tmp>`
//! and reads `<tmp>/<stem>.txt`. Video files go through the same path; the
//! tool extracts the audio track with ffmpeg.

use std::path::Path;

use async_trait::async_trait;
use omnisia_core::config::TranscriptionConfig;
use omnisia_core::error::OmnisiaError;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{media_kind, validate_model_size, TranscriptionResult, TranscriptionService};

/// Transcription backend that shells out to OpenAI's `whisper` CLI.
#[derive(Debug, Clone)]
pub struct WhisperCliService {
    whisper_bin: String,
    default_model: String,
    language: Option<String>,
}

impl WhisperCliService {
    /// Create a service from configuration.
    ///
    /// # Errors
    /// Returns `OmnisiaError::Transcription` if the configured default model
    /// size is not one Whisper ships.
    pub fn new(config: &TranscriptionConfig) -> Result<Self, OmnisiaError> {
        validate_model_size(&config.model_size)?;
        let language = Some(config.language.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        Ok(Self {
            whisper_bin: config.whisper_bin.clone(),
            default_model: config.model_size.clone(),
            language,
        })
    }
}

#[async_trait]
impl TranscriptionService for WhisperCliService {
    async fn transcribe(
        &self,
        path: &Path,
        model_size: Option<&str>,
    ) -> Result<TranscriptionResult, OmnisiaError> {
        let kind = media_kind(path)?;
        let model = model_size.unwrap_or(&self.default_model);
        validate_model_size(model)?;
        if !path.is_file() {
            return Err(OmnisiaError::Transcription(format!(
                "file not found: {}",
                path.display()
            )));
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                OmnisiaError::Transcription(format!("invalid file name: {}", path.display()))
            })?;

        let out_dir = tempfile::tempdir()?;
        let mut cmd = Command::new(&self.whisper_bin);
        cmd.arg(path)
            .args(["--model", model])
            .args(["--output_format", "txt"])
            .arg("--output_dir")
            .arg(out_dir.path());
        if let Some(lang) = &self.language {
            cmd.args(["--language", lang]);
        }

        debug!(path = %path.display(), model, "Running whisper");
        let output = cmd.kill_on_drop(true).output().await.map_err(|e| {
            OmnisiaError::Transcription(format!("failed to run {}: {}", self.whisper_bin, e))
        })?;
        if !output.status.success() {
            return Err(OmnisiaError::Transcription(format!(
                "{} exited with {}: {}",
                self.whisper_bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let transcript = out_dir.path().join(format!("{}.txt", stem));
        let text = tokio::fs::read_to_string(&transcript).await.map_err(|e| {
            OmnisiaError::Transcription(format!(
                "whisper produced no transcript at {}: {}",
                transcript.display(),
                e
            ))
        })?;
        let text = text.trim().to_string();

        info!(
            path = %path.display(),
            kind = ?kind,
            model,
            chars = text.chars().count(),
            "Transcription completed"
        );

        Ok(TranscriptionResult {
            text,
            language: self.language.clone(),
            model: model.to_string(),
        })
    }

    fn name(&self) -> &str {
        "whisper-cli"
    }
}
