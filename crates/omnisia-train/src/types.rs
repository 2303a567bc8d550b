use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use omnisia_core::config::{LoraConfig, TrainingParams};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// True once the job can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Request body for starting a fine-tuning job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub base_model: String,
    /// Plain-text dataset, one training example per line.
    pub dataset_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: Uuid,
    pub base_model: String,
    pub dataset_path: PathBuf,
    /// Directory the adapter weights are written to.
    pub output_dir: PathBuf,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Everything the external trainer needs, serialized to JSON for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSpec {
    pub job_id: Uuid,
    pub base_model: String,
    pub dataset_path: PathBuf,
    pub output_dir: PathBuf,
    pub lora: LoraConfig,
    pub params: TrainingParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_display_and_serde() {
        assert_eq!(JobStatus::Running.to_string(), "running");
        assert_eq!(
            serde_json::to_string(&JobStatus::Completed).unwrap(),
            "\"completed\""
        );
        let back: JobStatus = serde_json::from_str("\"queued\"").unwrap();
        assert_eq!(back, JobStatus::Queued);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_spec_serialization_carries_hyperparameters() {
        let spec = TrainingSpec {
            job_id: Uuid::nil(),
            base_model: "gpt2".into(),
            dataset_path: PathBuf::from("/data/train.txt"),
            output_dir: PathBuf::from("/data/training/job"),
            lora: LoraConfig::default(),
            params: TrainingParams::default(),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["lora"]["r"], 16);
        assert_eq!(json["lora"]["target_modules"][1], "v_proj");
        assert_eq!(json["params"]["max_length"], 512);
        assert_eq!(json["base_model"], "gpt2");
    }
}
