//! Boundary data-transfer shapes: what the Orchestrator accepts and returns.
//! These are behavioral contracts, not wire formats — the HTTP surface that
//! serializes them is out of scope here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ErrorDetails, FileType, JobStatus, Step};

/// What the Orchestrator accepts at intake. Captured verbatim on the Job row
/// as `request_payload` so a retry never needs client involvement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRequest {
    pub tenant_id: Uuid,
    pub file_path: String,
    pub file_name: String,
    pub file_type: FileType,
    pub title: String,
    pub is_active: bool,
    pub is_default: bool,
}

/// The error block surfaced on a FAILED (or FAILED-awaiting-retry) job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBlock {
    pub message: String,
    pub details: ErrorDetails,
}

/// Status response shape, tailored by current status per the external
/// interfaces contract: a human message, the current step while PROCESSING,
/// the error block plus `next_retry_at` while FAILED, and `resume_id` once
/// COMPLETED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: JobStatus,
    pub message: String,
    pub progress_percentage: u8,
    pub current_step: Option<Step>,
    pub resume_id: Option<Uuid>,
    pub error: Option<ErrorBlock>,
    pub attempt_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl StatusResponse {
    pub fn from_job(job: &crate::model::Job) -> Self {
        let message = match job.status {
            JobStatus::Pending if job.next_retry_at.is_some() => {
                "waiting to retry".to_string()
            }
            JobStatus::Pending => "queued".to_string(),
            JobStatus::Processing => "processing".to_string(),
            JobStatus::Completed => "completed".to_string(),
            JobStatus::Failed => job
                .error_message
                .clone()
                .unwrap_or_else(|| "failed".to_string()),
        };

        let error = job.error_message.as_ref().map(|message| ErrorBlock {
            message: message.clone(),
            details: job.error_details.clone(),
        });

        Self {
            id: job.id,
            tenant_id: job.tenant_id,
            status: job.status,
            message,
            progress_percentage: job.progress_percentage,
            current_step: job.current_step,
            resume_id: job.resume_id,
            error,
            attempt_count: job.attempt_count,
            next_retry_at: job.next_retry_at,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            failed_at: job.failed_at,
        }
    }
}

/// Pagination parameters for `list_by_tenant` / `list`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.per_page == 0 || self.per_page > 200 {
            return Err(crate::error::PipelineError::InvalidPagination(format!(
                "per_page must be in 1..=200, got {}",
                self.per_page
            )));
        }
        Ok(())
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64) * (self.per_page as i64)
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }
}

/// A page of results plus the total row count, used by `list_by_tenant`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// Aggregate counts returned by the Orchestrator's `stats` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub oldest_pending: Option<DateTime<Utc>>,
    pub last_completed: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_rejects_zero_per_page() {
        let p = Pagination {
            page: 0,
            per_page: 0,
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn pagination_offset_is_page_times_per_page() {
        let p = Pagination {
            page: 2,
            per_page: 10,
        };
        assert_eq!(p.offset(), 20);
        assert_eq!(p.limit(), 10);
    }
}
