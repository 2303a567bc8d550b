use thiserror::Error;

/// Top-level error type for the Omnisia platform.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for OmnisiaError` (or the reverse) so that the `?`
/// operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OmnisiaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for OmnisiaError {
    fn from(err: toml::de::Error) -> Self {
        OmnisiaError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for OmnisiaError {
    fn from(err: toml::ser::Error) -> Self {
        OmnisiaError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for OmnisiaError {
    fn from(err: serde_json::Error) -> Self {
        OmnisiaError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Omnisia operations.
pub type Result<T> = std::result::Result<T, OmnisiaError>;
