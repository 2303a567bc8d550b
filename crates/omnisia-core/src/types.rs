use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Where a piece of extracted text came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// PDF or plain-text document.
    Document,
    /// Image run through OCR.
    Image,
    /// Audio transcribed by speech-to-text.
    Audio,
    /// Video whose audio track was transcribed.
    Video,
    /// Text submitted directly as chat context.
    Manual,
}

impl SourceKind {
    /// Classify an upload by its file extension.
    ///
    /// Returns `None` for extensions the platform does not ingest.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" | "txt" => Some(SourceKind::Document),
            "jpg" | "jpeg" | "png" | "gif" | "tif" | "tiff" | "bmp" => Some(SourceKind::Image),
            "mp3" | "wav" | "m4a" | "flac" | "ogg" => Some(SourceKind::Audio),
            "mp4" | "avi" | "mov" | "mkv" => Some(SourceKind::Video),
            _ => None,
        }
    }
}

// =============================================================================
// Structs
// =============================================================================

/// Plain text produced by an extraction collaborator (OCR, speech-to-text,
/// or a manual context submission), ready for indexing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub id: Uuid,
    pub source: SourceKind,
    /// File path or other origin label.
    pub origin: String,
    pub text: String,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedText {
    pub fn new(source: SourceKind, origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            origin: origin.into(),
            text: text.into(),
            extracted_at: Utc::now(),
        }
    }
}
