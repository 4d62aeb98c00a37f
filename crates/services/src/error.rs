//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by the backend client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("backend request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("backend response was malformed: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted by `AttemptStatusService` marker writes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AttemptError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ExamNavigator`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExamError {
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors emitted by the test-session workflow.
///
/// Persistence failures are deliberately absent: reads fall back to defaults
/// and writes are logged and swallowed, so only network and lifecycle
/// problems surface to the caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("this attempt was already submitted")]
    AlreadySubmitted,
    #[error("a submission for this attempt is already in flight")]
    SubmissionInFlight,
    #[error("this attempt is already being mounted")]
    MountInFlight,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
