use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{OmnisiaError, Result};

/// Top-level configuration for the Omnisia platform.
///
/// Loaded from `~/.omnisia/config.toml` by default. Each section corresponds
/// to a bounded context or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OmnisiaConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl OmnisiaConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OmnisiaConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| OmnisiaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Data directory with a leading `~` expanded to the home directory.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for uploads, snapshots, models and training output.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.omnisia/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Global request body limit in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend: "onnx" or "mock".
    pub backend: String,
    /// Model name (informational; reported by /info).
    pub model_name: String,
    /// Directory holding `model.onnx` and `tokenizer.json`. Relative paths
    /// resolve against the data directory.
    pub model_dir: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "onnx".to_string(),
            model_name: "all-MiniLM-L6-v2".to_string(),
            model_dir: "models/all-MiniLM-L6-v2".to_string(),
        }
    }
}

/// Embedding index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Distance metric: "l2_squared" or "cosine".
    pub metric: String,
    /// Snapshot file name inside the data directory. Empty disables persistence.
    pub snapshot_file: String,
    /// Write the snapshot after every successful context mutation.
    pub autosave: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric: "l2_squared".to_string(),
            snapshot_file: "context_index.json".to_string(),
            autosave: true,
        }
    }
}

/// Chat and retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Number of context matches retrieved per chat message.
    pub top_k: usize,
    /// Maximum characters per context text.
    pub max_context_chars: usize,
    /// Maximum characters per chat message.
    pub max_message_chars: usize,
    /// Characters kept in each source preview.
    pub preview_chars: usize,
    /// Distance divisor in the confidence formula.
    pub confidence_scale: f32,
    /// Confidence at or above which an answer is "high".
    pub high_confidence: f32,
    /// Confidence at or above which an answer is "medium".
    pub medium_confidence: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_context_chars: 1000,
            max_message_chars: 4000,
            preview_chars: 200,
            confidence_scale: 2.0,
            high_confidence: 0.7,
            medium_confidence: 0.4,
        }
    }
}

/// Ingestion pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum characters per chunk. 0 disables chunking.
    pub chunk_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { chunk_chars: 1000 }
    }
}

/// Upload validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes.
    pub max_file_bytes: u64,
    /// Accepted file extensions, lowercase with leading dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 100 * 1024 * 1024,
            allowed_extensions: [
                ".pdf", ".txt", ".jpg", ".jpeg", ".png", ".gif", ".mp3", ".wav", ".mp4", ".avi",
                ".mov",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// OCR tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Path or name of the `tesseract` binary.
    pub tesseract_bin: String,
    /// Path or name of the `ocrmypdf` binary.
    pub ocrmypdf_bin: String,
    /// Tesseract language code(s), e.g. "eng" or "por+eng".
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_bin: "tesseract".to_string(),
            ocrmypdf_bin: "ocrmypdf".to_string(),
            language: "eng".to_string(),
        }
    }
}

/// Speech-to-text settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Path or name of the `whisper` CLI.
    pub whisper_bin: String,
    /// Default model size: tiny, base, small, medium, large.
    pub model_size: String,
    /// Language hint; empty lets whisper detect it.
    pub language: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            whisper_bin: "whisper".to_string(),
            model_size: "base".to_string(),
            language: String::new(),
        }
    }
}

/// LoRA fine-tuning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Trainer program; invoked as `<command...> --spec <job.json>`.
    pub trainer_command: Vec<String>,
    /// Output directory for adapters, relative to the data directory.
    pub output_dir: String,
    /// Base models accepted by `/training/start`.
    pub supported_models: Vec<String>,
    #[serde(default)]
    pub lora: LoraConfig,
    #[serde(default)]
    pub params: TrainingParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            trainer_command: vec![
                "python".to_string(),
                "-m".to_string(),
                "omnisia_trainer".to_string(),
            ],
            output_dir: "training".to_string(),
            supported_models: [
                "gpt2",
                "gpt2-medium",
                "gpt2-large",
                "gpt2-xl",
                "microsoft/DialoGPT-small",
                "microsoft/DialoGPT-medium",
                "microsoft/DialoGPT-large",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            lora: LoraConfig::default(),
            params: TrainingParams::default(),
        }
    }
}

/// LoRA adapter hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    pub r: u32,
    pub lora_alpha: u32,
    pub lora_dropout: f32,
    pub target_modules: Vec<String>,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            r: 16,
            lora_alpha: 32,
            lora_dropout: 0.1,
            target_modules: vec!["q_proj".to_string(), "v_proj".to_string()],
        }
    }
}

/// Trainer hyperparameters passed through to the fine-tuning library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    pub num_train_epochs: u32,
    pub per_device_train_batch_size: u32,
    pub gradient_accumulation_steps: u32,
    pub warmup_steps: u32,
    pub learning_rate: f64,
    pub fp16: bool,
    pub logging_steps: u32,
    pub save_steps: u32,
    /// Tokenizer truncation length.
    pub max_length: u32,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            num_train_epochs: 3,
            per_device_train_batch_size: 4,
            gradient_accumulation_steps: 4,
            warmup_steps: 100,
            learning_rate: 2e-4,
            fp16: true,
            logging_steps: 10,
            save_steps: 100,
            max_length: 512,
        }
    }
}
