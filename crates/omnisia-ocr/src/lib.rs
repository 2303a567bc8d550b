//! Omnisia OCR crate - text extraction from images and scanned PDFs.
//!
//! Provides the [`OcrService`] trait, a [`TesseractOcrService`] that shells
//! out to `tesseract` and `ocrmypdf`, and a [`MockOcrService`] for tests.

pub mod tesseract;

use std::path::Path;

use async_trait::async_trait;
use omnisia_core::error::OmnisiaError;

pub use tesseract::TesseractOcrService;

/// Kind of file an OCR backend knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrInput {
    Image,
    Pdf,
}

impl OcrInput {
    /// Classify `path` by extension.
    pub fn from_path(path: &Path) -> Result<Self, OmnisiaError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(OcrInput::Pdf),
            "png" | "jpg" | "jpeg" | "gif" | "tif" | "tiff" | "bmp" => Ok(OcrInput::Image),
            _ => Err(OmnisiaError::Ocr(format!(
                "unsupported file type for OCR: {}",
                path.display()
            ))),
        }
    }
}

/// Service for extracting text from image and PDF files.
#[async_trait]
pub trait OcrService: Send + Sync {
    /// Extract the text content of the file at `path`.
    ///
    /// May return an empty string if no text is detected.
    async fn extract_text(&self, path: &Path) -> Result<String, OmnisiaError>;

    /// Backend name reported by `/info`.
    fn name(&self) -> &str;
}

/// Mock OCR service for testing.
///
/// Returns fixed text for any supported file without touching it.
#[derive(Debug, Clone)]
pub struct MockOcrService {
    response: Result<String, String>,
}

impl MockOcrService {
    pub fn new() -> Self {
        Self::with_text("Mock OCR extracted text: Lorem ipsum dolor sit amet")
    }

    pub fn with_text(text: &str) -> Self {
        Self {
            response: Ok(text.to_string()),
        }
    }

    /// Simulates an image with no text.
    pub fn empty() -> Self {
        Self::with_text("")
    }

    /// Every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
        }
    }
}

impl Default for MockOcrService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrService for MockOcrService {
    async fn extract_text(&self, path: &Path) -> Result<String, OmnisiaError> {
        OcrInput::from_path(path)?;
        self.response.clone().map_err(OmnisiaError::Ocr)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
