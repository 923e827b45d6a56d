//! The Job entity: the single source of truth for a résumé-processing
//! attempt's state, attempts, progress, and error detail.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::dto::IntakeRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_step", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Uploading,
    Parsing,
    Embedding,
    Saving,
}

impl Step {
    /// The progress percentage a stage is considered to have reached once it
    /// completes successfully.
    pub fn target_percentage(self) -> u8 {
        match self {
            Step::Uploading => 25,
            Step::Parsing => 50,
            Step::Embedding => 75,
            Step::Saving => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "file_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Jpg,
    Jpeg,
    Png,
}

impl std::str::FromStr for FileType {
    type Err = crate::error::PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(FileType::Pdf),
            "jpg" => Ok(FileType::Jpg),
            "jpeg" => Ok(FileType::Jpeg),
            "png" => Ok(FileType::Png),
            other => Err(crate::error::PipelineError::InvalidFileType(
                other.to_string(),
            )),
        }
    }
}

/// A single value in the opaque `error_details` bag. The bag is rendered
/// as-is to clients; the core never infers richer structure from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ErrorValue {
    Str(String),
    Int(i64),
    Timestamp(DateTime<Utc>),
    List(Vec<ErrorValue>),
}

impl From<&str> for ErrorValue {
    fn from(s: &str) -> Self {
        ErrorValue::Str(s.to_string())
    }
}

impl From<String> for ErrorValue {
    fn from(s: String) -> Self {
        ErrorValue::Str(s)
    }
}

impl From<i64> for ErrorValue {
    fn from(n: i64) -> Self {
        ErrorValue::Int(n)
    }
}

pub type ErrorDetails = BTreeMap<String, ErrorValue>;

/// A durable record of one submitted résumé awaiting or undergoing
/// transformation. See the state machine in the worker pool module for the
/// legal status transitions.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct Job {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,
    pub tenant_id: Uuid,

    #[builder(default)]
    pub status: JobStatus,

    pub file_path: String,
    pub file_name: String,
    pub file_type: FileType,
    pub title: String,

    #[builder(default)]
    pub attempt_count: u32,
    pub max_attempts: u32,

    #[builder(default, setter(strip_option))]
    pub current_step: Option<Step>,

    #[builder(default)]
    pub progress_percentage: u8,

    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,
    #[builder(default)]
    pub error_details: ErrorDetails,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub failed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub next_retry_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub resume_id: Option<Uuid>,

    pub request_payload: IntakeRequest,
}

impl Job {
    /// Construct a new PENDING job from an intake request, using the
    /// tenant-wide default attempt budget.
    pub fn new_pending(request: IntakeRequest, max_attempts: u32) -> Self {
        Job::builder()
            .tenant_id(request.tenant_id)
            .file_path(request.file_path.clone())
            .file_name(request.file_name.clone())
            .file_type(request.file_type)
            .title(request.title.clone())
            .max_attempts(max_attempts)
            .request_payload(request)
            .build()
    }

    /// `0 <= progress_percentage <= 100` and a COMPLETED job has reached 100
    /// with a non-null resume id.
    pub fn invariants_hold(&self) -> bool {
        if self.progress_percentage > 100 {
            return false;
        }
        if self.attempt_count > self.max_attempts {
            return false;
        }
        if self.status == JobStatus::Completed
            && (self.progress_percentage != 100 || self.resume_id.is_none())
        {
            return false;
        }
        true
    }

    /// Reset the fields a manual retry resets: fresh attempt budget, clean
    /// error state, progress back to zero.
    pub fn reset_for_manual_retry(&mut self) {
        self.status = JobStatus::Pending;
        self.attempt_count = 0;
        self.error_message = None;
        self.error_details.clear();
        self.failed_at = None;
        self.next_retry_at = None;
        self.progress_percentage = 0;
        self.current_step = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::IntakeRequest;

    fn sample_request() -> IntakeRequest {
        IntakeRequest {
            tenant_id: Uuid::now_v7(),
            file_path: "tenants/t1/resume.pdf".into(),
            file_name: "resume.pdf".into(),
            file_type: FileType::Pdf,
            title: "CV".into(),
            is_active: true,
            is_default: false,
        }
    }

    #[test]
    fn new_pending_job_starts_at_zero_progress() {
        let job = Job::new_pending(sample_request(), 3);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress_percentage, 0);
        assert_eq!(job.attempt_count, 0);
        assert!(job.invariants_hold());
    }

    #[test]
    fn completed_without_resume_id_violates_invariant() {
        let mut job = Job::new_pending(sample_request(), 3);
        job.status = JobStatus::Completed;
        job.progress_percentage = 100;
        assert!(!job.invariants_hold());
    }

    #[test]
    fn manual_retry_resets_attempt_budget_and_progress() {
        let mut job = Job::new_pending(sample_request(), 3);
        job.status = JobStatus::Failed;
        job.attempt_count = 3;
        job.progress_percentage = 50;
        job.error_message = Some("parsing_failed".into());
        job.reset_for_manual_retry();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.progress_percentage, 0);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn file_type_parses_case_insensitively() {
        assert_eq!("PDF".parse::<FileType>().unwrap(), FileType::Pdf);
        assert!("bmp".parse::<FileType>().is_err());
    }
}
