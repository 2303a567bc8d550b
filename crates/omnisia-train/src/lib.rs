//! LoRA fine-tuning job management.
//!
//! Jobs are validated and queued by the [`TrainingManager`], executed in the
//! background by a [`TrainingRunner`], and tracked through a validated status
//! lifecycle: Queued -> Running -> Completed/Failed.

pub mod error;
pub mod manager;
pub mod runner;
pub mod state_machine;
pub mod types;

pub use error::TrainingError;
pub use manager::TrainingManager;
pub use runner::{CommandTrainingRunner, MockTrainingRunner, TrainingRunner};
pub use state_machine::validate_transition;
pub use types::{JobStatus, TrainingJob, TrainingRequest, TrainingSpec};
