//! Error types for chat and context management.

use omnisia_core::error::OmnisiaError;
use omnisia_vector::IndexError;

/// Errors from the chat orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("no context text provided")]
    EmptyContext,
    #[error("context text exceeds maximum length of {0} characters")]
    ContextTooLong(usize),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<ChatError> for OmnisiaError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Index(e) => e.into(),
            other => OmnisiaError::Api(other.to_string()),
        }
    }
}
