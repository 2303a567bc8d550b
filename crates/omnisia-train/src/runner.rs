//! Training runners: the process that actually fine-tunes a model.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::TrainingError;
use crate::types::TrainingSpec;

/// Spec file written into each job's output directory.
pub const SPEC_FILE_NAME: &str = "training_spec.json";

/// Most stderr characters kept in a failure message.
const STDERR_TAIL_CHARS: usize = 2000;

/// Executes a single fine-tuning job to completion.
#[async_trait]
pub trait TrainingRunner: Send + Sync {
    async fn run(&self, spec: &TrainingSpec) -> Result<(), TrainingError>;
}

/// Runs an external trainer program as `<command...> --spec <json>`.
///
/// The trainer reads the model, dataset, output directory and
/// hyperparameters from the spec file and exits non-zero on failure.
#[derive(Debug, Clone)]
pub struct CommandTrainingRunner {
    command: Vec<String>,
}

impl CommandTrainingRunner {
    pub fn new(command: Vec<String>) -> Result<Self, TrainingError> {
        if command.is_empty() {
            return Err(TrainingError::Runner(
                "trainer command must not be empty".to_string(),
            ));
        }
        Ok(Self { command })
    }
}

#[async_trait]
impl TrainingRunner for CommandTrainingRunner {
    async fn run(&self, spec: &TrainingSpec) -> Result<(), TrainingError> {
        tokio::fs::create_dir_all(&spec.output_dir)
            .await
            .map_err(|e| {
                TrainingError::Runner(format!(
                    "create output dir {}: {}",
                    spec.output_dir.display(),
                    e
                ))
            })?;

        let spec_path = spec.output_dir.join(SPEC_FILE_NAME);
        let json = serde_json::to_vec_pretty(spec)
            .map_err(|e| TrainingError::Runner(format!("serialize spec: {}", e)))?;
        tokio::fs::write(&spec_path, json)
            .await
            .map_err(|e| TrainingError::Runner(format!("write {}: {}", spec_path.display(), e)))?;

        let (program, args) = match self.command.as_slice() {
            [program, args @ ..] => (program, args),
            [] => {
                return Err(TrainingError::Runner(
                    "trainer command must not be empty".to_string(),
                ))
            }
        };

        debug!(job_id = %spec.job_id, program = %program, "Launching trainer");
        let output = Command::new(program)
            .args(args)
            .arg("--spec")
            .arg(&spec_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TrainingError::Runner(format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TrainingError::Runner(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                tail(stderr.trim(), STDERR_TAIL_CHARS)
            )));
        }

        info!(job_id = %spec.job_id, output_dir = %spec.output_dir.display(), "Trainer finished");
        Ok(())
    }
}

/// Last `max` characters of `s`.
fn tail(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Runner for tests: records every spec and succeeds or fails on demand.
#[derive(Debug, Default)]
pub struct MockTrainingRunner {
    failure: Option<String>,
    specs: Mutex<Vec<TrainingSpec>>,
}

impl MockTrainingRunner {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            specs: Mutex::new(Vec::new()),
        }
    }

    /// Specs received so far.
    pub fn specs(&self) -> Vec<TrainingSpec> {
        self.specs.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TrainingRunner for MockTrainingRunner {
    async fn run(&self, spec: &TrainingSpec) -> Result<(), TrainingError> {
        if let Ok(mut specs) = self.specs.lock() {
            specs.push(spec.clone());
        }
        match &self.failure {
            Some(message) => Err(TrainingError::Runner(message.clone())),
            None => Ok(()),
        }
    }
}
