//! Training job state machine with validated transitions.
//!
//! Queued -> Running -> Completed/Failed
//! Queued -> Failed (the job could not be launched)

use crate::error::TrainingError;
use crate::types::JobStatus;

/// Validate that a status transition is allowed.
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), TrainingError> {
    let valid = matches!(
        (from, to),
        (JobStatus::Queued, JobStatus::Running)
            | (JobStatus::Queued, JobStatus::Failed)
            | (JobStatus::Running, JobStatus::Completed)
            | (JobStatus::Running, JobStatus::Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(TrainingError::InvalidTransition(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    #[test]
    fn test_valid_transitions() {
        assert!(validate_transition(JobStatus::Queued, JobStatus::Running).is_ok());
        assert!(validate_transition(JobStatus::Queued, JobStatus::Failed).is_ok());
        assert!(validate_transition(JobStatus::Running, JobStatus::Completed).is_ok());
        assert!(validate_transition(JobStatus::Running, JobStatus::Failed).is_ok());
    }

    #[test]
    fn test_queued_cannot_complete_directly() {
        assert!(validate_transition(JobStatus::Queued, JobStatus::Completed).is_err());
    }

    #[test]
    fn test_no_self_transitions() {
        for status in ALL {
            assert!(validate_transition(status, status).is_err());
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [JobStatus::Completed, JobStatus::Failed] {
            for to in ALL {
                assert!(validate_transition(from, to).is_err(), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_running_cannot_go_back() {
        let err = validate_transition(JobStatus::Running, JobStatus::Queued).unwrap_err();
        assert!(matches!(
            err,
            TrainingError::InvalidTransition(JobStatus::Running, JobStatus::Queued)
        ));
    }
}
