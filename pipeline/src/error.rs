//! Error taxonomy for the job pipeline.
//!
//! Every variant maps to a stable `code()` string so callers at the
//! orchestrator boundary can distinguish recoverable (business, validation)
//! from transient (internal) failures by code class rather than by message
//! text.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    // --- NotFound ---
    #[error("job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("resume not found: {0}")]
    ResumeNotFound(uuid::Uuid),

    #[error("file not found: {0}")]
    FileNotFound(String),

    // --- Conflict ---
    #[error("job already exists: {0}")]
    JobAlreadyExists(uuid::Uuid),

    #[error("job already processing: {0}")]
    JobAlreadyProcessing(uuid::Uuid),

    #[error("job already completed: {0}")]
    JobAlreadyCompleted(uuid::Uuid),

    // --- Validation ---
    #[error("invalid file type: {0}")]
    InvalidFileType(String),

    #[error("invalid job status for this operation: expected {expected}, found {found}")]
    InvalidJobStatus { expected: String, found: String },

    #[error("invalid pagination parameters: {0}")]
    InvalidPagination(String),

    // --- Business ---
    #[error("tenant has reached the maximum of {max} resumes")]
    MaxResumesExceeded { max: u32 },

    #[error("tenant mismatch: job does not belong to the requesting tenant")]
    TenantMismatch,

    // --- Internal ---
    #[error("failed to read file: {0}")]
    FileReadFailed(String),

    #[error("failed to parse resume: {0}")]
    ParseFailed(String),

    #[error("failed to generate embeddings: {0}")]
    EmbeddingFailed(String),

    #[error("failed to save resume: {0}")]
    SaveFailed(String),

    #[error("failed to update job row: {0}")]
    JobUpdateFailed(String),

    #[error("failed to enqueue job: {0}")]
    QueueEnqueueFailed(String),

    #[error("failed to dequeue job: {0}")]
    QueueDequeueFailed(String),

    #[error("queue connection error: {0}")]
    QueueConnectionError(String),

    #[error("failed to schedule retry: {0}")]
    JobRetryFailed(String),

    #[error("job reached max retries: {0}")]
    JobMaxRetriesReached(uuid::Uuid),

    #[error("capability not configured: {0}")]
    CapabilityNotConfigured(String),

    #[error("cancelled by shutdown")]
    Cancelled,
}

impl PipelineError {
    /// Stable error code, independent of the display message, suitable for
    /// surfacing to clients at the orchestrator boundary.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::JobNotFound(_) => "job-not-found",
            PipelineError::ResumeNotFound(_) => "resume-not-found",
            PipelineError::FileNotFound(_) => "file-not-found",

            PipelineError::JobAlreadyExists(_) => "job-already-exists",
            PipelineError::JobAlreadyProcessing(_) => "job-already-processing",
            PipelineError::JobAlreadyCompleted(_) => "job-already-completed",

            PipelineError::InvalidFileType(_) => "invalid-file-type",
            PipelineError::InvalidJobStatus { .. } => "invalid-job-status",
            PipelineError::InvalidPagination(_) => "invalid-pagination",

            PipelineError::MaxResumesExceeded { .. } => "max-resumes-exceeded",
            PipelineError::TenantMismatch => "tenant-mismatch",

            PipelineError::FileReadFailed(_) => "file-read-failed",
            PipelineError::ParseFailed(_) => "parse-failed",
            PipelineError::EmbeddingFailed(_) => "embedding-failed",
            PipelineError::SaveFailed(_) => "save-failed",
            PipelineError::JobUpdateFailed(_) => "job-update-failed",
            PipelineError::QueueEnqueueFailed(_) => "queue-enqueue-failed",
            PipelineError::QueueDequeueFailed(_) => "queue-dequeue-failed",
            PipelineError::QueueConnectionError(_) => "queue-connection-error",
            PipelineError::JobRetryFailed(_) => "job-retry-failed",
            PipelineError::JobMaxRetriesReached(_) => "job-max-retries-reached",
            PipelineError::CapabilityNotConfigured(_) => "capability-not-configured",
            PipelineError::Cancelled => "cancelled",
        }
    }

    /// Coarse error class, mirroring the taxonomy in the error handling design:
    /// `NotFound`, `Conflict`, `Validation`, `Business`, `Internal`.
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::JobNotFound(_)
            | PipelineError::ResumeNotFound(_)
            | PipelineError::FileNotFound(_) => ErrorClass::NotFound,

            PipelineError::JobAlreadyExists(_)
            | PipelineError::JobAlreadyProcessing(_)
            | PipelineError::JobAlreadyCompleted(_) => ErrorClass::Conflict,

            PipelineError::InvalidFileType(_)
            | PipelineError::InvalidJobStatus { .. }
            | PipelineError::InvalidPagination(_) => ErrorClass::Validation,

            PipelineError::MaxResumesExceeded { .. } | PipelineError::TenantMismatch => {
                ErrorClass::Business
            }

            _ => ErrorClass::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Conflict,
    Validation,
    Business,
    Internal,
}
