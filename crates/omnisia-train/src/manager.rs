//! Training job registry and background execution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use omnisia_core::config::TrainingConfig;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::TrainingError;
use crate::runner::TrainingRunner;
use crate::state_machine::validate_transition;
use crate::types::{JobStatus, TrainingJob, TrainingRequest, TrainingSpec};

type JobMap = Arc<Mutex<HashMap<Uuid, TrainingJob>>>;

/// Validates, launches and tracks LoRA fine-tuning jobs.
///
/// Jobs live in memory for the lifetime of the process.
#[derive(Clone)]
pub struct TrainingManager {
    jobs: JobMap,
    runner: Arc<dyn TrainingRunner>,
    config: TrainingConfig,
    output_root: PathBuf,
}

impl TrainingManager {
    /// `output_root` receives one sub-directory per job.
    pub fn new(runner: Arc<dyn TrainingRunner>, config: TrainingConfig, output_root: PathBuf) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            runner,
            config,
            output_root,
        }
    }

    pub fn supported_models(&self) -> &[String] {
        &self.config.supported_models
    }

    /// Validate the request, queue a job, and run it in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, request: TrainingRequest) -> Result<TrainingJob, TrainingError> {
        if !self.config.supported_models.contains(&request.base_model) {
            return Err(TrainingError::UnsupportedModel(request.base_model));
        }
        if !request.dataset_path.is_file() {
            return Err(TrainingError::DatasetNotFound(request.dataset_path));
        }

        let id = Uuid::new_v4();
        let job = TrainingJob {
            id,
            base_model: request.base_model,
            dataset_path: request.dataset_path,
            output_dir: self.output_root.join(id.to_string()),
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        };

        self.jobs
            .lock()
            .map_err(|_| TrainingError::LockPoisoned)?
            .insert(id, job.clone());
        info!(job_id = %id, base_model = %job.base_model, "Training job queued");

        let spec = TrainingSpec {
            job_id: id,
            base_model: job.base_model.clone(),
            dataset_path: job.dataset_path.clone(),
            output_dir: job.output_dir.clone(),
            lora: self.config.lora.clone(),
            params: self.config.params.clone(),
        };
        let manager = self.clone();
        tokio::spawn(async move { manager.execute(spec).await });

        Ok(job)
    }

    async fn execute(&self, spec: TrainingSpec) {
        let id = spec.job_id;
        if let Err(e) = self.transition(id, JobStatus::Running, None) {
            error!(job_id = %id, error = %e, "Failed to start training job");
            if let Err(e) = self.transition(id, JobStatus::Failed, Some(e.to_string())) {
                error!(job_id = %id, error = %e, "Failed to record training outcome");
            }
            return;
        }

        let outcome = self.runner.run(&spec).await;
        let result = match outcome {
            Ok(()) => {
                info!(job_id = %id, "Training job completed");
                self.transition(id, JobStatus::Completed, None)
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "Training job failed");
                self.transition(id, JobStatus::Failed, Some(e.to_string()))
            }
        };
        if let Err(e) = result {
            error!(job_id = %id, error = %e, "Failed to record training outcome");
        }
    }

    fn transition(
        &self,
        id: Uuid,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<(), TrainingError> {
        let mut jobs = self.jobs.lock().map_err(|_| TrainingError::LockPoisoned)?;
        let job = jobs.get_mut(&id).ok_or(TrainingError::JobNotFound(id))?;
        validate_transition(job.status, to)?;

        let now = Utc::now();
        match to {
            JobStatus::Running => job.started_at = Some(now),
            JobStatus::Completed | JobStatus::Failed => job.finished_at = Some(now),
            JobStatus::Queued => {}
        }
        job.status = to;
        job.error = error;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<TrainingJob, TrainingError> {
        self.jobs
            .lock()
            .map_err(|_| TrainingError::LockPoisoned)?
            .get(&id)
            .cloned()
            .ok_or(TrainingError::JobNotFound(id))
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Result<Vec<TrainingJob>, TrainingError> {
        let jobs = self.jobs.lock().map_err(|_| TrainingError::LockPoisoned)?;
        let mut list: Vec<TrainingJob> = jobs.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockTrainingRunner;
    use std::path::Path;
    use std::time::Duration;

    fn dataset(dir: &Path) -> PathBuf {
        let path = dir.join("train.txt");
        std::fs::write(&path, "hello\nworld\n").unwrap();
        path
    }

    fn manager_with(runner: Arc<MockTrainingRunner>, dir: &Path) -> TrainingManager {
        TrainingManager::new(runner, TrainingConfig::default(), dir.join("training"))
    }

    async fn wait_terminal(manager: &TrainingManager, id: Uuid) -> TrainingJob {
        for _ in 0..200 {
            let job = manager.get(id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_start_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockTrainingRunner::succeeding());
        let manager = manager_with(Arc::clone(&runner), dir.path());

        let job = manager
            .start(TrainingRequest {
                base_model: "gpt2".into(),
                dataset_path: dataset(dir.path()),
            })
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.output_dir.ends_with(job.id.to_string()));

        let done = wait_terminal(&manager, job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.started_at.is_some());
        assert!(done.finished_at.is_some());
        assert!(done.error.is_none());

        let specs = runner.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].lora.r, 16);
        assert_eq!(specs[0].params.num_train_epochs, 3);
    }

    #[tokio::test]
    async fn test_runner_failure_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(MockTrainingRunner::failing("OOM")), dir.path());
        let job = manager
            .start(TrainingRequest {
                base_model: "microsoft/DialoGPT-small".into(),
                dataset_path: dataset(dir.path()),
            })
            .unwrap();

        let done = wait_terminal(&manager, job.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error.unwrap().contains("OOM"));
    }

    #[tokio::test]
    async fn test_unsupported_model() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(MockTrainingRunner::succeeding()), dir.path());
        let err = manager
            .start(TrainingRequest {
                base_model: "llama-70b".into(),
                dataset_path: dataset(dir.path()),
            })
            .unwrap_err();
        assert!(matches!(err, TrainingError::UnsupportedModel(_)));
        assert!(manager.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(MockTrainingRunner::succeeding()), dir.path());
        let err = manager
            .start(TrainingRequest {
                base_model: "gpt2".into(),
                dataset_path: dir.path().join("nope.txt"),
            })
            .unwrap_err();
        assert!(matches!(err, TrainingError::DatasetNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_unknown_job() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(MockTrainingRunner::succeeding()), dir.path());
        assert!(matches!(
            manager.get(Uuid::new_v4()),
            Err(TrainingError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(MockTrainingRunner::succeeding()), dir.path());
        let data = dataset(dir.path());
        let first = manager
            .start(TrainingRequest {
                base_model: "gpt2".into(),
                dataset_path: data.clone(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = manager
            .start(TrainingRequest {
                base_model: "gpt2-medium".into(),
                dataset_path: data,
            })
            .unwrap();

        let list = manager.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, second.id);
        assert_eq!(list[1].id, first.id);
    }

    #[tokio::test]
    async fn test_completed_job_cannot_restart() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(MockTrainingRunner::succeeding()), dir.path());
        let job = manager
            .start(TrainingRequest {
                base_model: "gpt2".into(),
                dataset_path: dataset(dir.path()),
            })
            .unwrap();
        wait_terminal(&manager, job.id).await;
        assert!(matches!(
            manager.transition(job.id, JobStatus::Running, None),
            Err(TrainingError::InvalidTransition(JobStatus::Completed, JobStatus::Running))
        ));
    }

    #[tokio::test]
    async fn test_rerun_of_finished_job_leaves_record_intact() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockTrainingRunner::succeeding());
        let manager = manager_with(Arc::clone(&runner), dir.path());
        let job = manager
            .start(TrainingRequest {
                base_model: "gpt2".into(),
                dataset_path: dataset(dir.path()),
            })
            .unwrap();
        let done = wait_terminal(&manager, job.id).await;

        // Neither Running nor the Failed fallback is a valid move from Completed.
        manager
            .execute(TrainingSpec {
                job_id: job.id,
                base_model: job.base_model.clone(),
                dataset_path: job.dataset_path.clone(),
                output_dir: job.output_dir.clone(),
                lora: TrainingConfig::default().lora,
                params: TrainingConfig::default().params,
            })
            .await;

        let after = manager.get(job.id).unwrap();
        assert_eq!(after.status, JobStatus::Completed);
        assert!(after.error.is_none());
        assert_eq!(after.finished_at, done.finished_at);
        assert_eq!(runner.specs().len(), 1);
    }
}
