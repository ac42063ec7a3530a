//! Error types for the generation pipeline.
//!
//! [`GenerationError`] is what callers of the coordinator see. Port
//! errors ([`BackendError`], [`StoreError`]) carry only a message; both
//! the HTTP clients and the test doubles produce them.

use ocforge_backend::api::BackendApiError;
use ocforge_backend::messages::MessageError;
use ocforge_core::archive::ArchiveError;
use ocforge_core::error::CoreError;
use ocforge_core::generation::{JobId, JobMode};

// ---------------------------------------------------------------------------
// Port errors
// ---------------------------------------------------------------------------

/// Failure talking to the generation backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Network failure or server-side error; retrying may help.
    #[error("Generation backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the request.
    #[error("Generation backend rejected the request: {0}")]
    Rejected(String),

    /// The backend answered with something unexpected.
    #[error("Unexpected generation backend response: {0}")]
    Protocol(String),
}

impl From<BackendApiError> for BackendError {
    fn from(err: BackendApiError) -> Self {
        match err {
            BackendApiError::Request(e) => Self::Unavailable(e.to_string()),
            BackendApiError::ApiError { status, body } if status >= 500 => {
                Self::Unavailable(format!("HTTP {status}: {body}"))
            }
            BackendApiError::ApiError { status, body } => {
                Self::Rejected(format!("HTTP {status}: {body}"))
            }
            BackendApiError::Message(MessageError::Rejected(message)) => Self::Rejected(message),
            BackendApiError::Message(other) => Self::Protocol(other.to_string()),
        }
    }
}

/// Failure reading or writing the character record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Character store unavailable: {0}")]
    Unavailable(String),

    #[error("Character store rejected the update: {0}")]
    Rejected(String),
}

impl From<BackendApiError> for StoreError {
    fn from(err: BackendApiError) -> Self {
        match BackendError::from(err) {
            BackendError::Unavailable(message) => Self::Unavailable(message),
            BackendError::Rejected(message) | BackendError::Protocol(message) => {
                Self::Rejected(message)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Archive reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The change was not persisted; the in-memory archive is unchanged.
    #[error("Persisting the visual archive failed: {0}")]
    Persistence(#[from] StoreError),
}

impl ReconcileError {
    /// Whether this is the "limit reached" rejection.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Archive(ArchiveError::CapacityReached { .. }))
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// A request that cannot be submitted as given. Raised before any call
/// to the job-creation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    #[error("{mode} generation needs a portrait reference; set a primary portrait or supply a reference image")]
    MissingPortrait { mode: JobMode },

    #[error("No prompt template available for {mode} generation")]
    MissingTemplate { mode: JobMode },

    #[error("Prompt template for {mode} generation has unresolved placeholders: {}", .keys.join(", "))]
    UnresolvedPlaceholders { mode: JobMode, keys: Vec<String> },

    #[error("Background generation needs a scene description")]
    MissingSceneDescription,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("Submission failed: {0}")]
    Submission(#[source] BackendError),

    /// The archive is full; archive-bound jobs are refused up front.
    #[error("Visual archive limit reached ({capacity} entries)")]
    Capacity { capacity: usize },

    #[error("Polling job {job_id} failed: {message}")]
    Polling { job_id: JobId, message: String },

    /// The job completed but its result could not be persisted. The
    /// result is retained for [`retry_apply`](crate::coordinator::GenerationCoordinator::retry_apply).
    #[error("Applying the result of job {job_id} failed: {source}")]
    Apply {
        job_id: JobId,
        #[source]
        source: ReconcileError,
    },

    #[error("Job {0} completed without any results")]
    EmptyResult(JobId),

    #[error("No unapplied result is held for job {0}")]
    NothingToApply(JobId),

    #[error(transparent)]
    State(#[from] CoreError),
}

impl GenerationError {
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }
}
