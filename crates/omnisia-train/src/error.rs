//! Error types for training job management.

use std::path::PathBuf;

use omnisia_core::error::OmnisiaError;
use uuid::Uuid;

use crate::types::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Unsupported base model: {0}")]
    UnsupportedModel(String),
    #[error("Dataset not found: {}", .0.display())]
    DatasetNotFound(PathBuf),
    #[error("Training job not found: {0}")]
    JobNotFound(Uuid),
    #[error("Invalid job transition: {0} -> {1}")]
    InvalidTransition(JobStatus, JobStatus),
    #[error("Trainer failed: {0}")]
    Runner(String),
    #[error("Job registry lock poisoned")]
    LockPoisoned,
}

impl From<TrainingError> for OmnisiaError {
    fn from(err: TrainingError) -> Self {
        OmnisiaError::Training(err.to_string())
    }
}
