//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::AttemptId;
use quiz_core::scheduler::SchedulerError;
use storage::repository::StorageError;

/// Errors raised by a presentation transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PresenterError {
    #[error("learner is unreachable: {0}")]
    Unreachable(String),
    #[error("presentation failed: {0}")]
    Transport(String),
}

/// Errors emitted by `PracticeService` and the components it drives.
///
/// Timeouts and exhausted pools are not errors; they are reported through
/// `CycleOutcome`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PracticeError {
    #[error("no learner registered for {external_ref}")]
    StudentNotFound { external_ref: String },
    #[error("attempt {attempt} is unknown or already graded")]
    StateConflict { attempt: AttemptId },
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Presenter(#[from] PresenterError),
}
